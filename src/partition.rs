use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use geo::{Area, BoundingRect, Coord, Rect};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::{
    attr::{Column, Schema},
    collection::FeatureCollection,
    config::{PartitionConfig, SimplifyConfig, Staging},
    io::{self, delete_layer},
    raster::RasterContext,
    report::{PartitionReport, SimplifyReport},
    simplify::simplify,
};

/// One of the four tiles a layer is split into around its bounding-box center.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [Self::TopLeft, Self::TopRight, Self::BottomLeft, Self::BottomRight];

    /// The quadrant fully holding `rect`, or `None` if it straddles a midline.
    ///
    /// The vertical midline belongs to the left side, the horizontal one to the top.
    pub fn classify(rect: &Rect<f64>, mid: Coord<f64>) -> Option<Self> {
        let (min, max) = (rect.min(), rect.max());
        let (top, bottom) = (min.y >= mid.y, max.y < mid.y);
        let (left, right) = (max.x <= mid.x, min.x > mid.x);
        match (top, bottom, left, right) {
            (true, _, true, _) => Some(Self::TopLeft),
            (true, _, _, true) => Some(Self::TopRight),
            (_, true, true, _) => Some(Self::BottomLeft),
            (_, true, _, true) => Some(Self::BottomRight),
            _ => None,
        }
    }

    /// Whether `rect` reaches into the strip of width `dist` along either inner edge.
    ///
    /// The band is the union of both strips. Testing their intersection instead would
    /// only catch the corner box next to the split point, and slivers lying along the
    /// rest of an inner edge would be merged before their neighbors across the midline
    /// are seen.
    pub fn in_border_band(self, rect: &Rect<f64>, mid: Coord<f64>, dist: f64) -> bool {
        let (min, max) = (rect.min(), rect.max());
        let near_x = match self {
            Self::TopLeft | Self::BottomLeft => max.x > mid.x - dist,
            Self::TopRight | Self::BottomRight => min.x < mid.x + dist,
        };
        let near_y = match self {
            Self::TopLeft | Self::TopRight => min.y < mid.y + dist,
            Self::BottomLeft | Self::BottomRight => max.y > mid.y - dist,
        };
        near_x || near_y
    }
}

/// Quadrant layers (in [`Quadrant::ALL`] order) plus the records held back for the final pass.
#[derive(Debug)]
struct Split {
    quadrants: Vec<FeatureCollection>,
    deferred: FeatureCollection,
}

fn split(input: &FeatureCollection, area_lim: f64, dist_lim: f64) -> Split {
    let mut quadrants = Quadrant::ALL.map(|_| input.empty_like()).to_vec();
    let mut deferred = input.empty_like();

    let Some(bounds) = input.bounds() else {
        deferred.records = input.records.clone();
        return Split { quadrants, deferred };
    };
    let mid = bounds.center();

    for record in &input.records {
        let placed = record.geometry.bounding_rect()
            .and_then(|rect| Some((rect, Quadrant::classify(&rect, mid)?)))
            .filter(|(rect, q)| !(record.geometry.unsigned_area() < area_lim && q.in_border_band(rect, mid, dist_lim)));
        match placed {
            Some((_, q)) => quadrants[q as usize].records.push(record.clone()),
            None => deferred.records.push(record.clone()),
        }
    }

    Split { quadrants, deferred }
}

/// Same layer with columns renamed to `c0`, `c1`, ... so any schema fits dBase's 10-char names.
fn positional(mut layer: FeatureCollection) -> FeatureCollection {
    layer.schema = Schema::new(layer.schema.columns().iter().enumerate()
        .map(|(i, column)| Column { name: format!("c{i}"), ty: column.ty })
        .collect());
    layer
}

/// Read a staged layer back and put the real column names in place.
fn read_staged(path: &Path, schema: &Schema) -> Result<FeatureCollection> {
    let mut layer = io::read_layer(path)?;
    ensure!(layer.schema.len() == schema.len(),
        "Staged layer {} has {} columns, expected {}", path.display(), layer.schema.len(), schema.len());
    layer.schema = schema.clone();
    Ok(layer)
}

/// Worker side of shapefile staging: consume the staged input, write `<stem>_simplified.shp`.
fn simplify_staged(
    path: &Path,
    schema: &Schema,
    config: &SimplifyConfig,
    raster: Option<&RasterContext>,
) -> Result<(PathBuf, SimplifyReport)> {
    let layer = read_staged(path, schema)?;
    delete_layer(path)?;

    let (output, report) = simplify(&layer, config, raster)?;

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("part");
    let output_path = path.with_file_name(format!("{stem}_simplified.shp"));
    io::write_layer(&output_path, &positional(output))?;
    Ok((output_path, report))
}

/// A quadrant's result: held in memory, or written to disk by a staged worker.
enum Staged {
    Memory(FeatureCollection),
    Disk(PathBuf),
}

fn run_in_memory(
    quadrants: Vec<FeatureCollection>,
    config: &SimplifyConfig,
    raster: Option<&RasterContext>,
) -> Result<Vec<(FeatureCollection, SimplifyReport)>> {
    quadrants.into_par_iter()
        .map(|quadrant| simplify(&quadrant, config, raster))
        .collect()
}

fn run_staged(
    quadrants: Vec<FeatureCollection>,
    schema: &Schema,
    config: &SimplifyConfig,
    raster: Option<&RasterContext>,
) -> Result<Vec<(FeatureCollection, SimplifyReport)>> {
    let dir = tempfile::tempdir().context("Failed to create staging directory")?;

    // Empty quadrants have nothing to stage.
    let inputs = quadrants.into_iter().enumerate()
        .map(|(i, quadrant)| {
            if quadrant.is_empty() { return Ok(Staged::Memory(quadrant)) }
            let path = dir.path().join(format!("temp_part_{i}.shp"));
            io::write_layer(&path, &positional(quadrant))?;
            Ok(Staged::Disk(path))
        })
        .collect::<Result<Vec<_>>>()?;

    let outputs = inputs.into_par_iter()
        .map(|staged| match staged {
            Staged::Memory(quadrant) => {
                let (output, report) = simplify(&quadrant, config, raster)?;
                Ok((Staged::Memory(output), report))
            }
            Staged::Disk(path) => {
                let (output_path, report) = simplify_staged(&path, schema, config, raster)?;
                Ok((Staged::Disk(output_path), report))
            }
        })
        .collect::<Result<Vec<_>>>()?;

    outputs.into_iter()
        .map(|(staged, report)| match staged {
            Staged::Memory(output) => Ok((output, report)),
            Staged::Disk(path) => {
                let output = read_staged(&path, schema)?;
                delete_layer(&path)?;
                Ok((output, report))
            }
        })
        .collect()
}

/// Simplify a large layer quadrant by quadrant, then once more over the recombined result.
///
/// Undersized records near the inner quadrant edges, and records crossing a
/// midline, skip the quadrant stage and are only handled by the final pass.
pub fn simplify_partitioned(
    input: &FeatureCollection,
    config: &SimplifyConfig,
    partition: &PartitionConfig,
    raster: Option<&RasterContext>,
) -> Result<(FeatureCollection, PartitionReport)> {
    config.validate(&input.schema)?;
    partition.validate()?;

    let Split { quadrants, deferred } = split(input, config.area_lim, partition.dist_lim);
    info!(
        quadrants = ?quadrants.iter().map(FeatureCollection::len).collect::<Vec<_>>(),
        deferred = deferred.len(),
        staging = ?partition.staging,
        "partitioned layer"
    );

    let results = match partition.staging {
        Staging::InMemory => run_in_memory(quadrants, config, raster)?,
        Staging::Shapefile => run_staged(quadrants, &input.schema, config, raster)?,
    };

    let mut combined = input.empty_like();
    let mut reports = Vec::with_capacity(results.len());
    for (quadrant, (output, report)) in Quadrant::ALL.iter().zip(results) {
        debug!(?quadrant, features = output.len(), passes = report.passes, "quadrant finished");
        combined.extend(output)?;
        reports.push(report);
    }
    let deferred_count = deferred.len();
    combined.extend(deferred)?;

    let (output, global) = simplify(&combined, config, raster)?;
    Ok((output, PartitionReport { quadrants: reports, deferred: deferred_count, global }))
}
