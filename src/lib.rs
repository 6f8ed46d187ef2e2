#![doc = "Desliver public API"]
mod attr;
mod collection;
mod config;
mod geom;
mod io;
mod neighbor;
mod partition;
mod raster;
mod report;
mod simplify;
mod store;

#[doc(inline)]
pub use attr::{AttrValue, Column, ColumnType, Key, Schema};

#[doc(inline)]
pub use collection::{FeatureCollection, Record};

#[doc(inline)]
pub use config::{PartitionConfig, SimplifyConfig, Staging};

#[doc(inline)]
pub use io::{delete_layer, read_layer, write_layer, LayerFormat};

#[doc(inline)]
pub use partition::{simplify_partitioned, Quadrant};

#[doc(inline)]
pub use raster::{GeoTransform, RasterContext};

#[doc(inline)]
pub use report::{PartitionReport, SimplifyReport, Warning};

#[doc(inline)]
pub use simplify::{simplify, Simplifier};

#[doc(inline)]
pub use store::{Feature, FeatureId, FeatureStore, PassTag};
