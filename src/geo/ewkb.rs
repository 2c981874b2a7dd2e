//! Extended Well-Known Binary codec (`spec.md` §4.1), grounded in
//! `original_source/include/utils/geo/ewkb.h`'s type-flag layout.

use crate::core::error::{Error, Result};
use crate::geo::geometry::{Coordinate, Geometry};

const WKB_POINT: u32 = 1;
const WKB_LINESTRING: u32 = 2;
const WKB_POLYGON: u32 = 3;
const WKB_MULTIPOINT: u32 = 4;
const WKB_MULTILINESTRING: u32 = 5;
const WKB_MULTIPOLYGON: u32 = 6;
const WKB_GEOMETRYCOLLECTION: u32 = 7;
const EWKB_Z_FLAG: u32 = 0x8000_0000;
const EWKB_SRID_FLAG: u32 = 0x2000_0000;

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Cursor { bytes, pos: 0 }
    }

    fn read_u8(&mut self) -> Result<u8> {
        let b = *self.bytes.get(self.pos).ok_or_else(|| Error::validation("ewkb: truncated"))?;
        self.pos += 1;
        Ok(b)
    }

    fn read_u32(&mut self, le: bool) -> Result<u32> {
        let s = self.bytes.get(self.pos..self.pos + 4).ok_or_else(|| Error::validation("ewkb: truncated u32"))?;
        self.pos += 4;
        let arr: [u8; 4] = s.try_into().unwrap();
        Ok(if le { u32::from_le_bytes(arr) } else { u32::from_be_bytes(arr) })
    }

    fn read_f64(&mut self, le: bool) -> Result<f64> {
        let s = self.bytes.get(self.pos..self.pos + 8).ok_or_else(|| Error::validation("ewkb: truncated f64"))?;
        self.pos += 8;
        let arr: [u8; 8] = s.try_into().unwrap();
        Ok(if le { f64::from_le_bytes(arr) } else { f64::from_be_bytes(arr) })
    }
}

fn read_coord(c: &mut Cursor, le: bool, has_z: bool) -> Result<Coordinate> {
    let x = c.read_f64(le)?;
    let y = c.read_f64(le)?;
    if has_z {
        let z = c.read_f64(le)?;
        Ok(Coordinate::new_3d(x, y, z))
    } else {
        Ok(Coordinate::new(x, y))
    }
}

fn read_ring(c: &mut Cursor, le: bool, has_z: bool) -> Result<Vec<Coordinate>> {
    let n = c.read_u32(le)? as usize;
    (0..n).map(|_| read_coord(c, le, has_z)).collect()
}

fn parse_geometry(c: &mut Cursor) -> Result<Geometry> {
    let byte_order = c.read_u8()?;
    let le = byte_order == 1;
    let type_word = c.read_u32(le)?;
    let has_z = type_word & EWKB_Z_FLAG != 0;
    let has_srid = type_word & EWKB_SRID_FLAG != 0;
    if has_srid {
        let _srid = c.read_u32(le)?;
    }
    let base_type = type_word & 0x0000_00ff;
    match base_type {
        WKB_POINT => Ok(Geometry::Point(read_coord(c, le, has_z)?)),
        WKB_LINESTRING => Ok(Geometry::LineString(read_ring(c, le, has_z)?)),
        WKB_POLYGON => {
            let n_rings = c.read_u32(le)? as usize;
            let rings = (0..n_rings).map(|_| read_ring(c, le, has_z)).collect::<Result<Vec<_>>>()?;
            Ok(Geometry::Polygon(rings))
        }
        WKB_MULTIPOINT => {
            let n = c.read_u32(le)? as usize;
            let mut pts = Vec::with_capacity(n);
            for _ in 0..n {
                match parse_geometry(c)? {
                    Geometry::Point(p) => pts.push(p),
                    _ => return Err(Error::validation("ewkb: expected point in multipoint")),
                }
            }
            Ok(Geometry::MultiPoint(pts))
        }
        WKB_MULTILINESTRING => {
            let n = c.read_u32(le)? as usize;
            let mut lines = Vec::with_capacity(n);
            for _ in 0..n {
                match parse_geometry(c)? {
                    Geometry::LineString(l) => lines.push(l),
                    _ => return Err(Error::validation("ewkb: expected linestring in multilinestring")),
                }
            }
            Ok(Geometry::MultiLineString(lines))
        }
        WKB_MULTIPOLYGON => {
            let n = c.read_u32(le)? as usize;
            let mut polys = Vec::with_capacity(n);
            for _ in 0..n {
                match parse_geometry(c)? {
                    Geometry::Polygon(p) => polys.push(p),
                    _ => return Err(Error::validation("ewkb: expected polygon in multipolygon")),
                }
            }
            Ok(Geometry::MultiPolygon(polys))
        }
        WKB_GEOMETRYCOLLECTION => {
            let n = c.read_u32(le)? as usize;
            let geoms = (0..n).map(|_| parse_geometry(c)).collect::<Result<Vec<_>>>()?;
            Ok(Geometry::GeometryCollection(geoms))
        }
        other => Err(Error::validation(format!("ewkb: unknown geometry type {}", other))),
    }
}

pub fn parse(bytes: &[u8]) -> Result<Geometry> {
    let mut c = Cursor::new(bytes);
    parse_geometry(&mut c)
}

pub fn validate(bytes: &[u8]) -> bool {
    parse(bytes).is_ok()
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_f64(buf: &mut Vec<u8>, v: f64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_coord(buf: &mut Vec<u8>, c: &Coordinate) {
    write_f64(buf, c.x);
    write_f64(buf, c.y);
    if let Some(z) = c.z {
        write_f64(buf, z);
    }
}

fn write_ring(buf: &mut Vec<u8>, ring: &[Coordinate]) {
    write_u32(buf, ring.len() as u32);
    for c in ring {
        write_coord(buf, c);
    }
}

fn type_word(base: u32, has_z: bool) -> u32 {
    if has_z { base | EWKB_Z_FLAG } else { base }
}

fn serialize_into(buf: &mut Vec<u8>, geom: &Geometry) {
    buf.push(1); // little-endian
    let has_z = geom.has_z();
    match geom {
        Geometry::Point(c) => {
            write_u32(buf, type_word(WKB_POINT, has_z));
            write_coord(buf, c);
        }
        Geometry::LineString(cs) => {
            write_u32(buf, type_word(WKB_LINESTRING, has_z));
            write_ring(buf, cs);
        }
        Geometry::Polygon(rings) => {
            write_u32(buf, type_word(WKB_POLYGON, has_z));
            write_u32(buf, rings.len() as u32);
            for r in rings {
                write_ring(buf, r);
            }
        }
        Geometry::MultiPoint(cs) => {
            write_u32(buf, type_word(WKB_MULTIPOINT, has_z));
            write_u32(buf, cs.len() as u32);
            for c in cs {
                serialize_into(buf, &Geometry::Point(*c));
            }
        }
        Geometry::MultiLineString(lines) => {
            write_u32(buf, type_word(WKB_MULTILINESTRING, has_z));
            write_u32(buf, lines.len() as u32);
            for l in lines {
                serialize_into(buf, &Geometry::LineString(l.clone()));
            }
        }
        Geometry::MultiPolygon(polys) => {
            write_u32(buf, type_word(WKB_MULTIPOLYGON, has_z));
            write_u32(buf, polys.len() as u32);
            for p in polys {
                serialize_into(buf, &Geometry::Polygon(p.clone()));
            }
        }
        Geometry::GeometryCollection(gs) => {
            write_u32(buf, type_word(WKB_GEOMETRYCOLLECTION, has_z));
            write_u32(buf, gs.len() as u32);
            for g in gs {
                serialize_into(buf, g);
            }
        }
    }
}

pub fn serialize(geom: &Geometry) -> Vec<u8> {
    let mut buf = Vec::new();
    serialize_into(&mut buf, geom);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_roundtrip() {
        let g = Geometry::Point(Coordinate::new(13.4, 52.5));
        let bytes = serialize(&g);
        assert!(validate(&bytes));
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, g);
    }

    #[test]
    fn polygon_roundtrip_with_hole() {
        let outer = vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(10.0, 0.0),
            Coordinate::new(10.0, 10.0),
            Coordinate::new(0.0, 10.0),
        ];
        let hole = vec![
            Coordinate::new(2.0, 2.0),
            Coordinate::new(4.0, 2.0),
            Coordinate::new(4.0, 4.0),
            Coordinate::new(2.0, 4.0),
        ];
        let g = Geometry::Polygon(vec![outer, hole]);
        let bytes = serialize(&g);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, g);
    }

    #[test]
    fn point_z_roundtrip() {
        let g = Geometry::Point(Coordinate::new_3d(1.0, 2.0, 3.0));
        let bytes = serialize(&g);
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, g);
    }

    #[test]
    fn truncated_input_is_validation_error_not_panic() {
        let bytes = vec![1u8, 1, 0, 0];
        assert!(parse(&bytes).is_err());
    }
}
