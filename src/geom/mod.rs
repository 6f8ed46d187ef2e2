mod index;
mod ops;

pub(crate) use index::SpatialIndex;
pub(crate) use ops::{explode, is_empty_polygon, shared_boundary_length, union_polygons};
