//! GeoJSON geometry codec built on `serde_json`.

use serde_json::{json, Value as Json};

use crate::core::error::{Error, Result};
use crate::geo::geometry::{Coordinate, Geometry};

fn coord_from_json(v: &Json) -> Result<Coordinate> {
    let arr = v.as_array().ok_or_else(|| Error::validation("geojson: coordinate must be an array"))?;
    let x = arr.get(0).and_then(|v| v.as_f64()).ok_or_else(|| Error::validation("geojson: missing x"))?;
    let y = arr.get(1).and_then(|v| v.as_f64()).ok_or_else(|| Error::validation("geojson: missing y"))?;
    match arr.get(2).and_then(|v| v.as_f64()) {
        Some(z) => Ok(Coordinate::new_3d(x, y, z)),
        None => Ok(Coordinate::new(x, y)),
    }
}

fn coords_from_json(v: &Json) -> Result<Vec<Coordinate>> {
    v.as_array()
        .ok_or_else(|| Error::validation("geojson: expected coordinate array"))?
        .iter()
        .map(coord_from_json)
        .collect()
}

fn rings_from_json(v: &Json) -> Result<Vec<Vec<Coordinate>>> {
    v.as_array()
        .ok_or_else(|| Error::validation("geojson: expected ring array"))?
        .iter()
        .map(coords_from_json)
        .collect()
}

pub fn parse(input: &str) -> Result<Geometry> {
    let v: Json = serde_json::from_str(input)?;
    parse_value(&v)
}

fn parse_value(v: &Json) -> Result<Geometry> {
    let kind = v.get("type").and_then(|t| t.as_str()).ok_or_else(|| Error::validation("geojson: missing type"))?;
    match kind {
        "Point" => Ok(Geometry::Point(coord_from_json(v.get("coordinates").ok_or_else(|| Error::validation("geojson: missing coordinates"))?)?)),
        "LineString" => Ok(Geometry::LineString(coords_from_json(
            v.get("coordinates").ok_or_else(|| Error::validation("geojson: missing coordinates"))?,
        )?)),
        "Polygon" => Ok(Geometry::Polygon(rings_from_json(
            v.get("coordinates").ok_or_else(|| Error::validation("geojson: missing coordinates"))?,
        )?)),
        "MultiPoint" => Ok(Geometry::MultiPoint(coords_from_json(
            v.get("coordinates").ok_or_else(|| Error::validation("geojson: missing coordinates"))?,
        )?)),
        "MultiLineString" => {
            let rings = rings_from_json(v.get("coordinates").ok_or_else(|| Error::validation("geojson: missing coordinates"))?)?;
            Ok(Geometry::MultiLineString(rings))
        }
        "MultiPolygon" => {
            let coords = v.get("coordinates").and_then(|c| c.as_array()).ok_or_else(|| Error::validation("geojson: missing coordinates"))?;
            let polys = coords.iter().map(rings_from_json).collect::<Result<Vec<_>>>()?;
            Ok(Geometry::MultiPolygon(polys))
        }
        "GeometryCollection" => {
            let geoms = v
                .get("geometries")
                .and_then(|g| g.as_array())
                .ok_or_else(|| Error::validation("geojson: missing geometries"))?
                .iter()
                .map(parse_value)
                .collect::<Result<Vec<_>>>()?;
            Ok(Geometry::GeometryCollection(geoms))
        }
        other => Err(Error::validation(format!("geojson: unsupported type {}", other))),
    }
}

fn coord_json(c: &Coordinate) -> Json {
    match c.z {
        Some(z) => json!([c.x, c.y, z]),
        None => json!([c.x, c.y]),
    }
}

fn ring_json(ring: &[Coordinate]) -> Json {
    Json::Array(ring.iter().map(coord_json).collect())
}

pub fn to_value(geom: &Geometry) -> Json {
    match geom {
        Geometry::Point(c) => json!({"type": "Point", "coordinates": coord_json(c)}),
        Geometry::LineString(cs) => json!({
            "type": "LineString",
            "coordinates": Json::Array(cs.iter().map(coord_json).collect()),
        }),
        Geometry::Polygon(rings) => json!({
            "type": "Polygon",
            "coordinates": Json::Array(rings.iter().map(|r| ring_json(r)).collect()),
        }),
        Geometry::MultiPoint(cs) => json!({
            "type": "MultiPoint",
            "coordinates": Json::Array(cs.iter().map(coord_json).collect()),
        }),
        Geometry::MultiLineString(lines) => json!({
            "type": "MultiLineString",
            "coordinates": Json::Array(lines.iter().map(|l| ring_json(l)).collect()),
        }),
        Geometry::MultiPolygon(polys) => json!({
            "type": "MultiPolygon",
            "coordinates": Json::Array(
                polys.iter().map(|p| Json::Array(p.iter().map(|r| ring_json(r)).collect())).collect()
            ),
        }),
        Geometry::GeometryCollection(gs) => json!({
            "type": "GeometryCollection",
            "geometries": Json::Array(gs.iter().map(to_value).collect()),
        }),
    }
}

pub fn to_geojson_string(geom: &Geometry) -> String {
    to_value(geom).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_roundtrip() {
        let g = Geometry::Point(Coordinate::new(13.4, 52.5));
        let s = to_geojson_string(&g);
        let back = parse(&s).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn polygon_roundtrip() {
        let g = Geometry::Polygon(vec![vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(1.0, 0.0),
            Coordinate::new(1.0, 1.0),
            Coordinate::new(0.0, 1.0),
        ]]);
        let s = to_geojson_string(&g);
        let back = parse(&s).unwrap();
        assert_eq!(g, back);
    }

    #[test]
    fn missing_type_is_error() {
        assert!(parse("{}").is_err());
    }
}
