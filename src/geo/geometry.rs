use serde::{Deserialize, Serialize};

/// 2D/3D coordinate. `z` is `None` for planar geometries.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Coordinate { x, y, z: None }
    }

    pub fn new_3d(x: f64, y: f64, z: f64) -> Self {
        Coordinate { x, y, z: Some(z) }
    }

    pub fn has_z(&self) -> bool {
        self.z.is_some()
    }
}

/// Minimum bounding rectangle, optionally carrying a Z-range
/// (`spec.md` §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MBR {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
    pub z_min: Option<f64>,
    pub z_max: Option<f64>,
}

impl MBR {
    pub fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        MBR { minx, miny, maxx, maxy, z_min: None, z_max: None }
    }

    pub fn point(x: f64, y: f64) -> Self {
        MBR::new(x, y, x, y)
    }

    pub fn intersects(&self, other: &MBR) -> bool {
        !(self.minx > other.maxx
            || self.maxx < other.minx
            || self.miny > other.maxy
            || self.maxy < other.miny)
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.minx && x <= self.maxx && y >= self.miny && y <= self.maxy
    }

    pub fn contains_mbr(&self, other: &MBR) -> bool {
        other.minx >= self.minx
            && other.maxx <= self.maxx
            && other.miny >= self.miny
            && other.maxy <= self.maxy
    }

    /// Expand by an approximate distance in meters (used by `search_nearby`
    /// to build a coarse candidate box before exact haversine filtering).
    pub fn expand_meters(&self, distance_m: f64) -> MBR {
        let lat_deg = distance_m / 111_320.0;
        let lon_deg = distance_m / (111_320.0 * (self.center().y.to_radians().cos()).max(1e-6));
        MBR {
            minx: self.minx - lon_deg,
            miny: self.miny - lat_deg,
            maxx: self.maxx + lon_deg,
            maxy: self.maxy + lat_deg,
            z_min: self.z_min,
            z_max: self.z_max,
        }
    }

    pub fn area(&self) -> f64 {
        (self.maxx - self.minx) * (self.maxy - self.miny)
    }

    pub fn center(&self) -> Coordinate {
        Coordinate::new((self.minx + self.maxx) / 2.0, (self.miny + self.maxy) / 2.0)
    }

    pub fn union(&self, other: &MBR) -> MBR {
        MBR {
            minx: self.minx.min(other.minx),
            miny: self.miny.min(other.miny),
            maxx: self.maxx.max(other.maxx),
            maxy: self.maxy.max(other.maxy),
            z_min: merge_opt(self.z_min, other.z_min, f64::min),
            z_max: merge_opt(self.z_max, other.z_max, f64::max),
        }
    }

    pub fn has_z(&self) -> bool {
        self.z_min.is_some() && self.z_max.is_some()
    }
}

fn merge_opt(a: Option<f64>, b: Option<f64>, f: impl Fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

/// Compact spatial summary derived from a geometry at write time
/// (`spec.md` glossary: "Sidecar").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sidecar {
    pub mbr: MBR,
    pub centroid: Coordinate,
    pub z_min: f64,
    pub z_max: f64,
}

impl Sidecar {
    pub fn from_mbr(mbr: MBR) -> Self {
        let centroid = mbr.center();
        Sidecar { mbr, centroid, z_min: mbr.z_min.unwrap_or(0.0), z_max: mbr.z_max.unwrap_or(0.0) }
    }
}

/// A parsed geometry, common across EWKB/WKT/GeoJSON (`spec.md` §4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    /// First ring is the exterior, remaining rings are holes.
    Polygon(Vec<Vec<Coordinate>>),
    MultiPoint(Vec<Coordinate>),
    MultiLineString(Vec<Vec<Coordinate>>),
    MultiPolygon(Vec<Vec<Vec<Coordinate>>>),
    GeometryCollection(Vec<Geometry>),
}

impl Geometry {
    pub fn srid(&self) -> i32 {
        4326
    }

    pub fn has_z(&self) -> bool {
        match self {
            Geometry::Point(c) => c.has_z(),
            Geometry::LineString(cs) | Geometry::MultiPoint(cs) => {
                cs.first().map(|c| c.has_z()).unwrap_or(false)
            }
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => rings
                .first()
                .and_then(|r| r.first())
                .map(|c| c.has_z())
                .unwrap_or(false),
            Geometry::MultiPolygon(polys) => polys
                .first()
                .and_then(|p| p.first())
                .and_then(|r| r.first())
                .map(|c| c.has_z())
                .unwrap_or(false),
            Geometry::GeometryCollection(gs) => gs.first().map(|g| g.has_z()).unwrap_or(false),
        }
    }

    fn fold_coords(&self, f: &mut dyn FnMut(&Coordinate)) {
        match self {
            Geometry::Point(c) => f(c),
            Geometry::LineString(cs) | Geometry::MultiPoint(cs) => cs.iter().for_each(|c| f(c)),
            Geometry::Polygon(rings) | Geometry::MultiLineString(rings) => {
                rings.iter().flatten().for_each(|c| f(c))
            }
            Geometry::MultiPolygon(polys) => {
                polys.iter().flatten().flatten().for_each(|c| f(c))
            }
            Geometry::GeometryCollection(gs) => gs.iter().for_each(|g| g.fold_coords(f)),
        }
    }

    pub fn mbr(&self) -> MBR {
        let mut minx = f64::INFINITY;
        let mut miny = f64::INFINITY;
        let mut maxx = f64::NEG_INFINITY;
        let mut maxy = f64::NEG_INFINITY;
        let mut z_min = f64::INFINITY;
        let mut z_max = f64::NEG_INFINITY;
        let mut has_z = false;
        self.fold_coords(&mut |c| {
            minx = minx.min(c.x);
            miny = miny.min(c.y);
            maxx = maxx.max(c.x);
            maxy = maxy.max(c.y);
            if let Some(z) = c.z {
                has_z = true;
                z_min = z_min.min(z);
                z_max = z_max.max(z);
            }
        });
        if !minx.is_finite() {
            return MBR::new(0.0, 0.0, 0.0, 0.0);
        }
        MBR {
            minx,
            miny,
            maxx,
            maxy,
            z_min: if has_z { Some(z_min) } else { None },
            z_max: if has_z { Some(z_max) } else { None },
        }
    }

    pub fn centroid(&self) -> Coordinate {
        let mut sx = 0.0;
        let mut sy = 0.0;
        let mut n = 0u64;
        self.fold_coords(&mut |c| {
            sx += c.x;
            sy += c.y;
            n += 1;
        });
        if n == 0 {
            Coordinate::new(0.0, 0.0)
        } else {
            Coordinate::new(sx / n as f64, sy / n as f64)
        }
    }

    pub fn sidecar(&self) -> Sidecar {
        Sidecar::from_mbr(self.mbr())
    }

    /// Square buffer around the MBR by `distance` degrees (`ST_Buffer`,
    /// `spec.md` §4.10 — a bbox buffer, not a true geometric offset curve).
    pub fn buffer_bbox(&self, distance: f64) -> MBR {
        let m = self.mbr();
        MBR::new(m.minx - distance, m.miny - distance, m.maxx + distance, m.maxy + distance)
    }

    pub fn force_2d(&self) -> Geometry {
        fn strip(c: &Coordinate) -> Coordinate {
            Coordinate::new(c.x, c.y)
        }
        match self {
            Geometry::Point(c) => Geometry::Point(strip(c)),
            Geometry::LineString(cs) => Geometry::LineString(cs.iter().map(strip).collect()),
            Geometry::Polygon(rings) => {
                Geometry::Polygon(rings.iter().map(|r| r.iter().map(strip).collect()).collect())
            }
            Geometry::MultiPoint(cs) => Geometry::MultiPoint(cs.iter().map(strip).collect()),
            Geometry::MultiLineString(lines) => Geometry::MultiLineString(
                lines.iter().map(|l| l.iter().map(strip).collect()).collect(),
            ),
            Geometry::MultiPolygon(polys) => Geometry::MultiPolygon(
                polys
                    .iter()
                    .map(|p| p.iter().map(|r| r.iter().map(strip).collect()).collect())
                    .collect(),
            ),
            Geometry::GeometryCollection(gs) => {
                Geometry::GeometryCollection(gs.iter().map(|g| g.force_2d()).collect())
            }
        }
    }
}

/// Haversine distance in meters between two lat/lon points (degrees).
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_M: f64 = 6_371_000.0;
    let (lat1, lat2) = (lat1.to_radians(), lat2.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_M * c
}

pub fn euclidean_3d(x1: f64, y1: f64, z1: f64, x2: f64, y2: f64, z2: f64) -> f64 {
    ((x1 - x2).powi(2) + (y1 - y2).powi(2) + (z1 - z2).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbr_intersects_is_symmetric() {
        let a = MBR::new(0.0, 0.0, 10.0, 10.0);
        let b = MBR::new(5.0, 5.0, 15.0, 15.0);
        let c = MBR::new(20.0, 20.0, 30.0, 30.0);
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn polygon_mbr_covers_all_rings() {
        let g = Geometry::Polygon(vec![vec![
            Coordinate::new(0.0, 0.0),
            Coordinate::new(4.0, 0.0),
            Coordinate::new(4.0, 4.0),
            Coordinate::new(0.0, 4.0),
        ]]);
        let mbr = g.mbr();
        assert_eq!(mbr, MBR::new(0.0, 0.0, 4.0, 4.0));
    }

    #[test]
    fn haversine_zero_for_same_point() {
        assert!(haversine_distance_m(52.5, 13.4, 52.5, 13.4) < 1e-6);
    }
}
