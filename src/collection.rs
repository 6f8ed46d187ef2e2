use anyhow::{ensure, Result};
use geo::{BoundingRect, Coord, MultiPolygon, Polygon, Rect};

use crate::attr::{AttrValue, Schema};

/// One row of a vector layer: a (possibly multi-part) polygon and its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub geometry: MultiPolygon<f64>,
    pub attrs: Vec<AttrValue>, // Positional, in schema order
}

impl Record {
    pub fn new(geometry: impl Into<MultiPolygon<f64>>, attrs: Vec<AttrValue>) -> Self {
        Self { geometry: geometry.into(), attrs }
    }

    /// Build a single-part record from one polygon.
    pub fn from_polygon(polygon: Polygon<f64>, attrs: Vec<AttrValue>) -> Self {
        Self { geometry: MultiPolygon(vec![polygon]), attrs }
    }
}

/// A vector layer: schema, optional CRS and records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub schema: Schema,
    pub crs: Option<String>,
    pub records: Vec<Record>,
}

impl FeatureCollection {
    pub fn new(schema: Schema, crs: Option<String>) -> Self {
        Self { schema, crs, records: Vec::new() }
    }

    /// Build a collection, checking that each record matches the schema width.
    pub fn with_records(schema: Schema, crs: Option<String>, records: Vec<Record>) -> Result<Self> {
        for (i, record) in records.iter().enumerate() {
            ensure!(record.attrs.len() == schema.len(),
                "record {i} has {} attributes, schema has {} columns", record.attrs.len(), schema.len());
        }
        Ok(Self { schema, crs, records })
    }

    #[inline] pub fn len(&self) -> usize { self.records.len() }

    #[inline] pub fn is_empty(&self) -> bool { self.records.is_empty() }

    /// Create an empty collection sharing this collection's schema and CRS.
    pub fn empty_like(&self) -> Self { Self::new(self.schema.clone(), self.crs.clone()) }

    /// Append all records of another collection with the same schema.
    pub fn extend(&mut self, other: FeatureCollection) -> Result<()> {
        ensure!(self.schema == other.schema, "cannot concatenate layers with different schemas");
        self.records.extend(other.records);
        Ok(())
    }

    /// Compute the bounding rectangle of all records.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.records.iter()
            .filter_map(|record| record.geometry.bounding_rect())
            .reduce(|a, b| Rect::new(
                Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
                Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
            ))
    }

    /// Values of column `name` across all records.
    pub fn column(&self, name: &str) -> Option<Vec<&AttrValue>> {
        let idx = self.schema.index_of(name)?;
        Some(self.records.iter().map(|r| &r.attrs[idx]).collect())
    }
}
