//! Geometry codec (EWKB/WKT/GeoJSON) and Morton encoder (`spec.md` §4.1, §4.2).

pub mod ewkb;
pub mod geojson;
pub mod geometry;
pub mod morton;
pub mod wkt;

pub use geometry::{Coordinate, Geometry, Sidecar, MBR};

use crate::core::error::Result;

/// Parse any of the three supported encodings by sniffing the input shape:
/// binary (even-length hex or raw bytes) is tried as EWKB, `{` as GeoJSON,
/// otherwise WKT.
pub fn parse_ewkb(bytes: &[u8]) -> Result<Geometry> {
    ewkb::parse(bytes)
}

pub fn parse_wkt(text: &str) -> Result<Geometry> {
    wkt::parse(text)
}

pub fn parse_geojson(text: &str) -> Result<Geometry> {
    geojson::parse(text)
}

pub fn to_wkt(geom: &Geometry) -> String {
    wkt::to_wkt(geom)
}

pub fn to_geojson(geom: &Geometry) -> String {
    geojson::to_geojson_string(geom)
}

pub fn to_ewkb(geom: &Geometry) -> Vec<u8> {
    ewkb::serialize(geom)
}
