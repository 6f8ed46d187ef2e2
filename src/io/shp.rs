use std::{fs::{self, File}, io::Read, path::Path};

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use shapefile::{
    self as shp,
    dbase::{self, FieldName, FieldType, FieldValue, TableWriterBuilder},
    Shape,
};

use crate::{
    attr::{AttrValue, Column, ColumnType, Schema},
    collection::{FeatureCollection, Record},
};

/// Signed ring area; negative for clockwise rings.
fn signed_area(pts: &[Coord<f64>]) -> f64 {
    pts.windows(2).map(|w| w[0].x * w[1].y - w[1].x * w[0].y).sum::<f64>() / 2.0
}

/// Convert a shapefile polygon into a MultiPolygon.
///
/// Shapefiles store rings flat: each clockwise outer ring is followed by its
/// counter-clockwise holes.
fn shp_to_geo(p: &shp::Polygon) -> MultiPolygon<f64> {
    let mut polygons = Vec::new();
    let mut exterior: Option<LineString<f64>> = None;
    let mut holes = Vec::new();

    for ring in p.rings() {
        let mut coords = ring.points().iter().map(|pt| Coord { x: pt.x, y: pt.y }).collect::<Vec<_>>();
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        let is_exterior = signed_area(&coords) < 0.0;
        let ls = LineString(coords);

        if is_exterior {
            if let Some(ext) = exterior.take() {
                polygons.push(Polygon::new(ext, std::mem::take(&mut holes)));
            }
            exterior = Some(ls);
        } else {
            holes.push(ls);
        }
    }
    if let Some(ext) = exterior {
        polygons.push(Polygon::new(ext, holes));
    }

    MultiPolygon(polygons)
}

/// Convert a MultiPolygon into a shapefile polygon (outer rings CW, holes CCW).
fn geo_to_shp(mp: &MultiPolygon<f64>) -> shp::Polygon {
    fn ring(ls: &LineString<f64>, clockwise: bool) -> Vec<shp::Point> {
        let mut coords = ls.0.clone();
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        if (signed_area(&coords) < 0.0) != clockwise {
            coords.reverse();
        }
        coords.into_iter().map(|c| shp::Point { x: c.x, y: c.y }).collect()
    }

    let rings = mp.0.iter()
        .filter(|poly| !poly.exterior().0.is_empty())
        .flat_map(|poly| std::iter::once(shp::PolygonRing::Outer(ring(poly.exterior(), true)))
            .chain(poly.interiors().iter().map(|hole| shp::PolygonRing::Inner(ring(hole, false)))))
        .collect::<Vec<_>>();

    shp::Polygon::with_rings(rings)
}

/// Decimal count of every field in a dBase header, keyed by field name.
fn field_decimals(dbf: &Path) -> Result<Vec<(String, u8)>> {
    let mut file = File::open(dbf)
        .with_context(|| format!("Failed to open attribute table: {}", dbf.display()))?;
    let mut head = [0u8; 32];
    file.read_exact(&mut head)
        .with_context(|| format!("Truncated dBase header in {}", dbf.display()))?;
    let header_len = usize::from(u16::from_le_bytes([head[8], head[9]]));

    let mut descriptors = vec![0u8; header_len.saturating_sub(32)];
    file.read_exact(&mut descriptors)
        .with_context(|| format!("Truncated dBase field descriptors in {}", dbf.display()))?;

    // 32-byte descriptors: name (11 bytes, NUL padded) at 0, decimal count at 17.
    Ok(descriptors.chunks_exact(32)
        .take_while(|d| d[0] != 0x0D)
        .map(|d| {
            let name = d[..11].split(|&b| b == 0).next().unwrap_or_default();
            (String::from_utf8_lossy(name).trim().to_string(), d[17])
        })
        .collect())
}

/// Numeric fields without decimals hold integers.
fn column_type(ty: FieldType, decimals: u8) -> ColumnType {
    match ty {
        FieldType::Integer => ColumnType::Integer,
        FieldType::Numeric if decimals == 0 => ColumnType::Integer,
        FieldType::Numeric | FieldType::Float | FieldType::Double | FieldType::Currency => ColumnType::Number,
        _ => ColumnType::Text,
    }
}

fn attr_value(value: &FieldValue) -> AttrValue {
    match value {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) if !s.trim().is_empty() => AttrValue::text(s.trim()),
        FieldValue::Numeric(Some(n)) => AttrValue::Number(*n),
        FieldValue::Float(Some(n)) => AttrValue::Number(f64::from(*n)),
        FieldValue::Integer(n) => AttrValue::Number(f64::from(*n)),
        FieldValue::Double(n) | FieldValue::Currency(n) => AttrValue::Number(*n),
        FieldValue::Logical(Some(b)) => AttrValue::text(if *b { "T" } else { "F" }),
        _ => AttrValue::Null,
    }
}

fn field_value(value: &AttrValue, column: &Column) -> Result<FieldValue> {
    Ok(match (column.ty, value) {
        (ColumnType::Text, AttrValue::Null) => FieldValue::Character(None),
        (ColumnType::Text, AttrValue::Text(s)) => FieldValue::Character(Some(s.to_string())),
        (ColumnType::Text, AttrValue::Number(n)) => FieldValue::Character(Some(n.to_string())),
        (_, AttrValue::Null) => FieldValue::Numeric(None),
        (_, AttrValue::Number(n)) => FieldValue::Numeric(Some(*n)),
        (_, AttrValue::Text(s)) => bail!("Column {:?} is numeric but holds text {:?}", column.name, s),
    })
}

/// Read a polygon shapefile, its attribute table and its `.prj` (if any).
pub(crate) fn read_shapefile(path: &Path) -> Result<FeatureCollection> {
    let dbf = path.with_extension("dbf");
    let table = dbase::Reader::from_path(&dbf)
        .with_context(|| format!("Failed to open attribute table: {}", dbf.display()))?;
    let decimals = field_decimals(&dbf)?;
    let schema = Schema::new(table.fields().iter()
        .filter(|field| field.name() != "DeletionFlag")
        .map(|field| {
            let places = decimals.iter().find(|(name, _)| name == field.name()).map_or(0, |&(_, d)| d);
            Column { name: field.name().to_string(), ty: column_type(field.field_type(), places) }
        })
        .collect());
    drop(table);

    let mut reader = shp::Reader::from_path(path)
        .with_context(|| format!("Failed to open shapefile: {}", path.display()))?;

    let mut records = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result.context("Error reading shape+record")?;
        let geometry = match shape {
            Shape::Polygon(p) => shp_to_geo(&p),
            Shape::NullShape => MultiPolygon(vec![]),
            other => bail!("Unsupported shape type {:?} in {}", other.shapetype(), path.display()),
        };
        let attrs = schema.columns().iter()
            .map(|column| record.get(&column.name).map(attr_value).unwrap_or_default())
            .collect();
        records.push(Record::new(geometry, attrs));
    }

    let crs = fs::read_to_string(path.with_extension("prj")).ok()
        .map(|wkt| wkt.trim().to_string())
        .filter(|wkt| !wkt.is_empty());

    Ok(FeatureCollection { schema, crs, records })
}

/// Write a collection as a polygon shapefile with `.shx`, `.dbf` and, if a CRS is set, `.prj`.
///
/// Records with empty geometry cannot be stored alongside polygons and are skipped.
pub(crate) fn write_shapefile(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let mut table = TableWriterBuilder::new();
    for (i, column) in collection.schema.columns().iter().enumerate() {
        let name = FieldName::try_from(column.name.as_str())
            .map_err(|_| anyhow!("Column name {:?} is not a valid dBase field name (max 10 chars)", column.name))?;
        table = match column.ty {
            ColumnType::Text => {
                let width = collection.records.iter()
                    .map(|r| r.attrs[i].as_str().map_or(0, str::len))
                    .max()
                    .unwrap_or(0)
                    .clamp(1, 254);
                table.add_character_field(name, width as u8)
            }
            ColumnType::Integer => table.add_numeric_field(name, 20, 0),
            ColumnType::Number => table.add_numeric_field(name, 32, 12),
        };
    }

    let mut writer = shp::Writer::from_path(path, table)
        .with_context(|| format!("Failed to create shapefile: {}", path.display()))?;

    let mut skipped = 0;
    for record in &collection.records {
        if record.geometry.0.iter().all(|poly| poly.exterior().0.is_empty()) {
            skipped += 1;
            continue;
        }
        let polygon = geo_to_shp(&record.geometry);
        let mut row = dbase::Record::default();
        for (column, value) in collection.schema.columns().iter().zip(&record.attrs) {
            row.insert(column.name.clone(), field_value(value, column)?);
        }
        writer.write_shape_and_record(&polygon, &row)
            .with_context(|| format!("Failed to write record to {}", path.display()))?;
    }
    drop(writer);

    if skipped > 0 {
        tracing::warn!(path = %path.display(), skipped, "skipped records with empty geometry");
    }
    if let Some(crs) = &collection.crs {
        fs::write(path.with_extension("prj"), crs)
            .with_context(|| format!("Failed to write projection for {}", path.display()))?;
    }
    Ok(())
}
