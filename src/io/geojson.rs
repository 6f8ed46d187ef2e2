use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use serde_json::{json, Map, Value};

use crate::{
    attr::{AttrValue, Column, ColumnType, Schema},
    collection::{FeatureCollection, Record},
};

fn ring_to_json(ls: &LineString<f64>) -> Value {
    Value::Array(ls.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_to_json(polygon: &Polygon<f64>) -> Value {
    Value::Array(std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(ring_to_json)
        .collect())
}

/// Single-part geometries are written as `Polygon`, empty ones as `null`.
fn geometry_to_json(mp: &MultiPolygon<f64>) -> Value {
    match mp.0.as_slice() {
        [] => Value::Null,
        [polygon] => json!({ "type": "Polygon", "coordinates": polygon_to_json(polygon) }),
        polygons => json!({
            "type": "MultiPolygon",
            "coordinates": polygons.iter().map(polygon_to_json).collect::<Vec<_>>(),
        }),
    }
}

fn value_to_json(value: &AttrValue, ty: ColumnType) -> Value {
    match value {
        AttrValue::Null => Value::Null,
        AttrValue::Number(n) if ty == ColumnType::Integer && n.fract() == 0.0 => json!(*n as i64),
        AttrValue::Number(n) => serde_json::Number::from_f64(*n).map_or(Value::Null, Value::Number),
        AttrValue::Text(s) => Value::String(s.to_string()),
    }
}

/// Serialize a collection as a GeoJSON FeatureCollection.
pub(crate) fn write_geojson_bytes(collection: &FeatureCollection) -> Result<Vec<u8>> {
    let features = collection.records.iter()
        .map(|record| {
            let properties = collection.schema.columns().iter()
                .zip(&record.attrs)
                .map(|(column, value)| (column.name.clone(), value_to_json(value, column.ty)))
                .collect::<Map<_, _>>();
            json!({
                "type": "Feature",
                "geometry": geometry_to_json(&record.geometry),
                "properties": properties,
            })
        })
        .collect::<Vec<_>>();

    let mut root = json!({ "type": "FeatureCollection", "features": features });
    if let Some(crs) = &collection.crs {
        root["crs"] = json!({ "type": "name", "properties": { "name": crs } });
    }

    serde_json::to_vec(&root).context("Failed to serialize GeoJSON to bytes")
}

/// Parse a ring: `[[x, y], [x, y], ...]`, closing it if needed.
fn parse_ring(value: &Value) -> Result<LineString<f64>> {
    let mut points = value.as_array()
        .ok_or_else(|| anyhow!("Invalid ring: expected an array of positions"))?
        .iter()
        .map(|pos| match pos.as_array().map(Vec::as_slice) {
            Some([x, y, ..]) => Ok(Coord {
                x: x.as_f64().ok_or_else(|| anyhow!("Invalid coordinate: x must be a number"))?,
                y: y.as_f64().ok_or_else(|| anyhow!("Invalid coordinate: y must be a number"))?,
            }),
            _ => bail!("Invalid position: {pos}"),
        })
        .collect::<Result<Vec<_>>>()?;

    if points.first() != points.last() {
        points.push(points[0]);
    }
    Ok(LineString(points))
}

/// Parse Polygon coordinates: `[exterior, hole, hole, ...]`.
fn parse_polygon(value: &Value) -> Result<Polygon<f64>> {
    let rings = value.as_array()
        .ok_or_else(|| anyhow!("Invalid Polygon: expected an array of rings"))?;
    let Some((exterior, holes)) = rings.split_first() else {
        return Ok(Polygon::new(LineString::new(vec![]), vec![]));
    };
    Ok(Polygon::new(parse_ring(exterior)?, holes.iter().map(parse_ring).collect::<Result<_>>()?))
}

fn parse_geometry(value: &Value) -> Result<MultiPolygon<f64>> {
    if value.is_null() { return Ok(MultiPolygon(vec![])) }

    let coords = &value["coordinates"];
    match value["type"].as_str() {
        Some("Polygon") => Ok(MultiPolygon(vec![parse_polygon(coords)?])),
        Some("MultiPolygon") => Ok(MultiPolygon(coords.as_array()
            .ok_or_else(|| anyhow!("Invalid MultiPolygon: expected an array of polygons"))?
            .iter()
            .map(parse_polygon)
            .collect::<Result<_>>()?)),
        other => bail!("Unsupported geometry type {other:?}; only Polygon and MultiPolygon layers are supported"),
    }
}

/// Narrowest column type holding every non-null value seen.
fn infer_type(values: impl Iterator<Item = Value>) -> ColumnType {
    let mut ty = None;
    for value in values {
        ty = match (&value, ty) {
            (Value::Null, ty) => ty,
            (Value::Number(n), None | Some(ColumnType::Integer)) if n.is_i64() || n.is_u64() => Some(ColumnType::Integer),
            (Value::Number(_), None | Some(ColumnType::Integer) | Some(ColumnType::Number)) => Some(ColumnType::Number),
            _ => return ColumnType::Text,
        };
    }
    ty.unwrap_or(ColumnType::Text)
}

fn json_to_value(value: &Value, ty: ColumnType) -> AttrValue {
    match (value, ty) {
        (Value::Null, _) => AttrValue::Null,
        (Value::Number(n), ColumnType::Integer | ColumnType::Number) => n.as_f64().map_or(AttrValue::Null, AttrValue::Number),
        (Value::String(s), _) => AttrValue::text(s),
        (other, _) => AttrValue::text(other.to_string()),
    }
}

/// Read a GeoJSON FeatureCollection of polygons.
///
/// Columns appear in first-seen order across all features' properties.
pub(crate) fn read_geojson_bytes(bytes: &[u8]) -> Result<FeatureCollection> {
    let root: Value = serde_json::from_slice(bytes).context("Failed to parse GeoJSON bytes")?;
    let features = root["features"].as_array()
        .ok_or_else(|| anyhow!("GeoJSON root is not a FeatureCollection"))?;

    let mut names: Vec<String> = Vec::new();
    for feature in features {
        if let Some(properties) = feature["properties"].as_object() {
            for name in properties.keys() {
                if !names.contains(name) { names.push(name.clone()) }
            }
        }
    }

    let schema = Schema::new(names.into_iter()
        .map(|name| {
            let ty = infer_type(features.iter().map(|f| f["properties"][&name].clone()));
            Column { name, ty }
        })
        .collect());

    let records = features.iter().enumerate()
        .map(|(i, feature)| {
            let geometry = parse_geometry(&feature["geometry"])
                .with_context(|| format!("Invalid geometry in feature {i}"))?;
            let attrs = schema.columns().iter()
                .map(|column| json_to_value(&feature["properties"][&column.name], column.ty))
                .collect();
            Ok(Record::new(geometry, attrs))
        })
        .collect::<Result<Vec<_>>>()?;

    let crs = root["crs"]["properties"]["name"].as_str().map(str::to_string);
    Ok(FeatureCollection { schema, crs, records })
}

pub(crate) fn read_geojson(path: &Path) -> Result<FeatureCollection> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read GeoJSON file: {}", path.display()))?;
    read_geojson_bytes(&bytes).with_context(|| format!("Failed to load {}", path.display()))
}

pub(crate) fn write_geojson(path: &Path, collection: &FeatureCollection) -> Result<()> {
    super::fs::write_atomic(path, &write_geojson_bytes(collection)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "EPSG:25832" } },
        "features": [
            { "type": "Feature",
              "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1]]] },
              "properties": { "use": "forest", "code": 3 } },
            { "type": "Feature",
              "geometry": null,
              "properties": { "code": 4.5, "owner": null } }
        ]
    }"#;

    #[test]
    fn reads_schema_in_first_seen_order() {
        let layer = read_geojson_bytes(SAMPLE.as_bytes()).unwrap();
        let columns = layer.schema.columns().iter().map(|c| (c.name.as_str(), c.ty)).collect::<Vec<_>>();
        assert_eq!(columns, vec![
            ("use", ColumnType::Text),
            ("code", ColumnType::Number),
            ("owner", ColumnType::Text),
        ]);
        assert_eq!(layer.crs.as_deref(), Some("EPSG:25832"));
        assert_eq!(layer.records[0].attrs, vec![AttrValue::text("forest"), AttrValue::Number(3.0), AttrValue::Null]);
        assert!(layer.records[1].geometry.0.is_empty());
    }

    #[test]
    fn rings_are_closed_on_read() {
        let layer = read_geojson_bytes(SAMPLE.as_bytes()).unwrap();
        let ring = layer.records[0].geometry.0[0].exterior();
        assert_eq!(ring.0.first(), ring.0.last());
        assert_eq!(ring.0.len(), 5);
    }

    #[test]
    fn integer_columns_are_inferred() {
        let values = [json!(1), json!(null), json!(7)];
        assert_eq!(infer_type(values.into_iter()), ColumnType::Integer);
        assert_eq!(infer_type([json!(1), json!("a")].into_iter()), ColumnType::Text);
    }

    #[test]
    fn non_polygon_geometry_is_rejected() {
        let bad = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","geometry":{"type":"Point","coordinates":[0,0]},"properties":{}}]}"#;
        assert!(read_geojson_bytes(bad.as_bytes()).is_err());
    }
}
