//! R-tree-over-Morton-bucket spatial index (`spec.md` §4.4). Grounded on
//! `original_source/include/index/spatial_index.h` (`SpatialIndexManager`,
//! `RTreeConfig`, `SpatialResult`) plus the R-tree/quadtree container idiom
//! from `examples/other_examples/.../rusty-db spatial/mod.rs`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::registry::Registry;
use crate::geo::geometry::{haversine_distance_m, Coordinate, Sidecar, MBR};
use crate::geo::morton;
use crate::keyschema;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpatialConfig {
    pub bounds: MBR,
    pub use_3d: bool,
    pub fanout: usize,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        SpatialConfig { bounds: MBR::new(-180.0, -90.0, 180.0, 90.0), use_3d: false, fanout: 64 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BucketEntry {
    pk: String,
    mbr: MBR,
    z_min: f64,
    z_max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialResult {
    pub pk: String,
    pub mbr: MBR,
    pub distance_m: Option<f64>,
}

pub struct SpatialIndex {
    store: Arc<dyn KvStore>,
    registry: Registry,
}

impl SpatialIndex {
    pub fn new(store: Arc<dyn KvStore>, registry: Registry) -> Self {
        SpatialIndex { store, registry }
    }

    pub fn create(&self, table: &str, config: SpatialConfig) -> Result<()> {
        let key = keyschema::spatial_config_key(table);
        self.store.put(key.as_bytes(), &serde_json::to_vec(&config)?)?;
        Ok(())
    }

    fn config(&self, table: &str) -> Result<SpatialConfig> {
        let key = keyschema::spatial_config_key(table);
        match self.store.get(key.as_bytes())? {
            Some(v) => Ok(serde_json::from_slice(&v)?),
            None => Ok(SpatialConfig::default()),
        }
    }

    fn morton_hex(&self, table: &str, centroid: &Coordinate) -> Result<String> {
        let cfg = self.config(table)?;
        let code = morton::encode2d(centroid.x, centroid.y, &cfg.bounds);
        Ok(format!("{:016x}", code))
    }

    fn bucket_key(&self, table: &str, hex: &str) -> String {
        keyschema::spatial_key(table, hex)
    }

    fn load_bucket(&self, table: &str, hex: &str) -> Result<Vec<BucketEntry>> {
        let key = self.bucket_key(table, hex);
        match self.store.get(key.as_bytes())? {
            Some(v) => Ok(serde_json::from_slice(&v)?),
            None => Ok(Vec::new()),
        }
    }

    fn save_bucket(&self, table: &str, hex: &str, entries: &[BucketEntry]) -> Result<()> {
        let key = self.bucket_key(table, hex);
        if entries.is_empty() {
            self.store.delete(key.as_bytes())?;
        } else {
            self.store.put(key.as_bytes(), &serde_json::to_vec(entries)?)?;
        }
        Ok(())
    }

    pub fn insert(&self, table: &str, pk: &str, sidecar: &Sidecar) -> Result<()> {
        let hex = self.morton_hex(table, &sidecar.centroid)?;
        let mut entries = self.load_bucket(table, &hex)?;
        entries.retain(|e| e.pk != pk);
        entries.push(BucketEntry { pk: pk.to_string(), mbr: sidecar.mbr, z_min: sidecar.z_min, z_max: sidecar.z_max });
        self.save_bucket(table, &hex, &entries)
    }

    pub fn remove(&self, table: &str, pk: &str, sidecar: &Sidecar) -> Result<()> {
        let hex = self.morton_hex(table, &sidecar.centroid)?;
        let mut entries = self.load_bucket(table, &hex)?;
        entries.retain(|e| e.pk != pk);
        self.save_bucket(table, &hex, &entries)
    }

    pub fn update(&self, table: &str, pk: &str, old: &Sidecar, new: &Sidecar) -> Result<()> {
        self.remove(table, pk, old)?;
        self.insert(table, pk, new)
    }

    fn candidates_for_mbr(&self, table: &str, query: &MBR) -> Result<Vec<BucketEntry>> {
        let cfg = self.config(table)?;
        let ranges = morton::ranges(query, &cfg.bounds, 64);
        let mut out = Vec::new();
        for (lo, hi) in ranges {
            let lo_key = self.bucket_key(table, &format!("{:016x}", lo));
            let hi_key = self.bucket_key(table, &format!("{:016x}\u{10ffff}", hi));
            self.store.scan_range(lo_key.as_bytes(), hi_key.as_bytes(), false, &mut |_, v| {
                if let Ok(entries) = serde_json::from_slice::<Vec<BucketEntry>>(v) {
                    out.extend(entries);
                }
                true
            })?;
        }
        Ok(out)
    }

    pub fn search_intersects(&self, table: &str, query: &MBR) -> Result<Vec<SpatialResult>> {
        let candidates = self.candidates_for_mbr(table, query)?;
        Ok(candidates
            .into_iter()
            .filter(|e| e.mbr.intersects(query))
            .map(|e| SpatialResult { pk: e.pk, mbr: e.mbr, distance_m: None })
            .collect())
    }

    pub fn search_within(&self, table: &str, query: &MBR, z_range: Option<(f64, f64)>) -> Result<Vec<SpatialResult>> {
        let candidates = self.candidates_for_mbr(table, query)?;
        Ok(candidates
            .into_iter()
            .filter(|e| query.contains_mbr(&e.mbr))
            .filter(|e| match z_range {
                Some((lo, hi)) => e.z_min >= lo && e.z_max <= hi,
                None => true,
            })
            .map(|e| SpatialResult { pk: e.pk, mbr: e.mbr, distance_m: None })
            .collect())
    }

    pub fn search_contains(&self, table: &str, x: f64, y: f64) -> Result<Vec<SpatialResult>> {
        let point = MBR::point(x, y);
        let candidates = self.candidates_for_mbr(table, &point)?;
        Ok(candidates
            .into_iter()
            .filter(|e| e.mbr.contains_point(x, y))
            .map(|e| SpatialResult { pk: e.pk, mbr: e.mbr, distance_m: None })
            .collect())
    }

    pub fn search_nearby(&self, table: &str, x: f64, y: f64, max_distance_m: f64, limit: usize) -> Result<Vec<SpatialResult>> {
        let probe = MBR::point(x, y).expand_meters(max_distance_m);
        let candidates = self.candidates_for_mbr(table, &probe)?;
        let mut scored: Vec<SpatialResult> = candidates
            .into_iter()
            .map(|e| {
                let c = e.mbr.center();
                let d = haversine_distance_m(y, x, c.y, c.x);
                SpatialResult { pk: e.pk, mbr: e.mbr, distance_m: Some(d) }
            })
            .filter(|r| r.distance_m.unwrap() <= max_distance_m)
            .collect();
        scored.sort_by(|a, b| a.distance_m.partial_cmp(&b.distance_m).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    /// Best-first MBR-distance-lower-bound expansion, widening the probe
    /// radius until `k` confirmed results are found (`spec.md` §4.4).
    pub fn search_knn(&self, table: &str, x: f64, y: f64, k: usize) -> Result<Vec<SpatialResult>> {
        let cfg = self.config(table)?;
        let world_diag = haversine_distance_m(cfg.bounds.miny, cfg.bounds.minx, cfg.bounds.maxy, cfg.bounds.maxx);
        let mut radius = (world_diag / 1000.0).max(100.0);
        loop {
            let mut results = self.search_nearby(table, x, y, radius, k)?;
            if results.len() >= k || radius >= world_diag {
                results.truncate(k);
                return Ok(results);
            }
            radius *= 4.0;
        }
    }

    pub fn exact_intersects(&self, a: &crate::geo::geometry::Geometry, b: &crate::geo::geometry::Geometry) -> bool {
        self.registry.geometry_backend.intersects(a, b)
    }

    pub fn exact_within(&self, a: &crate::geo::geometry::Geometry, b: &crate::geo::geometry::Geometry) -> bool {
        self.registry.geometry_backend.within(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memstore::MemStore;

    fn index() -> SpatialIndex {
        let store = Arc::new(MemStore::new());
        SpatialIndex::new(store, Registry::default())
    }

    #[test]
    fn insert_then_intersects_finds_point() {
        let idx = index();
        idx.create("poi", SpatialConfig::default()).unwrap();
        let sc = Sidecar::from_mbr(MBR::point(13.4, 52.5));
        idx.insert("poi", "berlin", &sc).unwrap();
        let hits = idx.search_intersects("poi", &MBR::new(13.0, 52.0, 14.0, 53.0)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].pk, "berlin");
    }

    #[test]
    fn remove_empties_bucket() {
        let idx = index();
        idx.create("poi", SpatialConfig::default()).unwrap();
        let sc = Sidecar::from_mbr(MBR::point(13.4, 52.5));
        idx.insert("poi", "berlin", &sc).unwrap();
        idx.remove("poi", "berlin", &sc).unwrap();
        let hits = idx.search_intersects("poi", &MBR::new(13.0, 52.0, 14.0, 53.0)).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn nearby_respects_distance_bound() {
        let idx = index();
        idx.create("poi", SpatialConfig::default()).unwrap();
        idx.insert("poi", "near", &Sidecar::from_mbr(MBR::point(13.405, 52.52))).unwrap();
        idx.insert("poi", "far", &Sidecar::from_mbr(MBR::point(2.35, 48.85))).unwrap();
        let hits = idx.search_nearby("poi", 13.4, 52.5, 5000.0, 10).unwrap();
        let pks: Vec<&str> = hits.iter().map(|h| h.pk.as_str()).collect();
        assert!(pks.contains(&"near"));
        assert!(!pks.contains(&"far"));
    }
}
