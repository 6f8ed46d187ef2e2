mod fs;
mod geojson;
mod shp;

pub use fs::delete_layer;

use std::path::Path;

use anyhow::{bail, Result};

use crate::collection::FeatureCollection;

/// On-disk vector formats understood by [`read_layer`] and [`write_layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFormat {
    Shapefile,
    GeoJson,
}

impl LayerFormat {
    /// Pick the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("shp") => Ok(Self::Shapefile),
            Some("geojson" | "json") => Ok(Self::GeoJson),
            _ => bail!("Unsupported layer format: {} (expected .shp or .geojson)", path.display()),
        }
    }
}

/// Read a polygon layer from a shapefile or GeoJSON file.
pub fn read_layer(path: &Path) -> Result<FeatureCollection> {
    let layer = match LayerFormat::from_path(path)? {
        LayerFormat::Shapefile => shp::read_shapefile(path)?,
        LayerFormat::GeoJson => geojson::read_geojson(path)?,
    };
    tracing::debug!(path = %path.display(), features = layer.len(), columns = layer.schema.len(), "read layer");
    Ok(layer)
}

/// Write a polygon layer; the format follows the file extension.
pub fn write_layer(path: &Path, layer: &FeatureCollection) -> Result<()> {
    match LayerFormat::from_path(path)? {
        LayerFormat::Shapefile => shp::write_shapefile(path, layer)?,
        LayerFormat::GeoJson => geojson::write_geojson(path, layer)?,
    }
    tracing::debug!(path = %path.display(), features = layer.len(), "wrote layer");
    Ok(())
}
