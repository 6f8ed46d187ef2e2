use geo::{BoundingRect, Polygon, Rect};
use rstar::{RTree, RTreeObject, AABB};

/// A bounding box in an R-tree, associated with a feature by its store position.
#[derive(Debug, Clone)]
pub(crate) struct IndexedBox {
    pos: usize,
    bbox: Rect<f64>,
}

impl IndexedBox {
    /// Get the store position of the corresponding feature.
    #[inline] pub(crate) fn pos(&self) -> usize { self.pos }
}

impl RTreeObject for IndexedBox {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.bbox.min().into(), self.bbox.max().into())
    }
}

/// Bounding-box R-tree over a slice of polygons.
/// Polygons without a bounding box (empty rings) are left out of the tree.
#[derive(Debug, Clone, Default)]
pub(crate) struct SpatialIndex {
    rtree: RTree<IndexedBox>,
}

impl SpatialIndex {
    pub(crate) fn new<'a>(polygons: impl IntoIterator<Item = &'a Polygon<f64>>) -> Self {
        Self {
            rtree: RTree::bulk_load(polygons.into_iter().enumerate()
                .filter_map(|(pos, polygon)| polygon.bounding_rect()
                    .map(|bbox| IndexedBox { pos, bbox }))
                .collect()),
        }
    }

    /// Positions whose bounding boxes intersect `rect`.
    #[inline]
    pub(crate) fn query(&self, rect: &Rect<f64>) -> impl Iterator<Item = usize> + '_ {
        let envelope = AABB::from_corners(rect.min().into(), rect.max().into());
        self.rtree.locate_in_envelope_intersecting(&envelope).map(IndexedBox::pos)
    }
}
