use std::sync::Arc;

use crate::core::error::Result;
use crate::geo::geometry::Geometry;

/// Batch distance computation against a candidate vector set, abstracted so
/// GPU/SIMD accelerators can be swapped in without touching the index
/// (`spec.md` §4.6, §6). The core never assumes an alternate is present.
pub trait DistanceKernel: Send + Sync {
    /// Distance from `query` to every vector in `db`, in `db` order.
    fn compute_distances(&self, query: &[f32], db: &[Vec<f32>], metric: Metric) -> Vec<f32>;

    /// Indices (into `db`) and distances of the `k` nearest vectors to `query`.
    fn batch_knn(&self, query: &[f32], db: &[Vec<f32>], k: usize, metric: Metric) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .compute_distances(query, db, metric)
            .into_iter()
            .enumerate()
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Metric {
    L2,
    Cosine,
    InnerProduct,
}

pub struct CpuDistanceKernel;

impl DistanceKernel for CpuDistanceKernel {
    fn compute_distances(&self, query: &[f32], db: &[Vec<f32>], metric: Metric) -> Vec<f32> {
        db.iter().map(|v| distance(query, v, metric)).collect()
    }
}

pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::L2 => {
            a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum::<f32>().sqrt()
        }
        Metric::Cosine => {
            let dot = crate::simd::dot_product(a, b);
            let na = crate::simd::dot_product(a, a).sqrt();
            let nb = crate::simd::dot_product(b, b).sqrt();
            if na == 0.0 || nb == 0.0 { 1.0 } else { 1.0 - dot / (na * nb) }
        }
        Metric::InnerProduct => -crate::simd::dot_product(a, b),
    }
}

/// Pairwise exact geometry predicates, delegated to after the spatial
/// index's coarse MBR/Morton filter (`spec.md` §4.4).
pub trait ExactGeometryBackend: Send + Sync {
    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool;
    fn within(&self, a: &Geometry, b: &Geometry) -> bool;
    fn contains(&self, a: &Geometry, b: &Geometry) -> bool;
}

pub struct CpuGeometryBackend;

impl ExactGeometryBackend for CpuGeometryBackend {
    fn intersects(&self, a: &Geometry, b: &Geometry) -> bool {
        a.mbr().intersects(&b.mbr())
    }

    fn within(&self, a: &Geometry, b: &Geometry) -> bool {
        let (amb, bmb) = (a.mbr(), b.mbr());
        bmb.contains_mbr(&amb)
    }

    fn contains(&self, a: &Geometry, b: &Geometry) -> bool {
        let (amb, bmb) = (a.mbr(), b.mbr());
        amb.contains_mbr(&bmb)
    }
}

/// Tokenization/stemming pipeline feeding the fulltext index, pluggable so
/// an embedder can substitute language-specific analysis (`spec.md` §6).
pub trait FulltextAnalyzer: Send + Sync {
    fn analyze(&self, text: &str) -> Vec<String>;
}

pub struct DefaultFulltextAnalyzer {
    pub pipeline: crate::analysis::analyzer::Analyzer,
}

impl Default for DefaultFulltextAnalyzer {
    fn default() -> Self {
        DefaultFulltextAnalyzer { pipeline: crate::analysis::analyzer::Analyzer::standard_english() }
    }
}

impl FulltextAnalyzer for DefaultFulltextAnalyzer {
    fn analyze(&self, text: &str) -> Vec<String> {
        self.pipeline.analyze(text).into_iter().map(|t| t.text).collect()
    }
}

/// Process-level capability registry constructed once by the caller and
/// threaded through the engine by reference — no hidden mutable global
/// (`spec.md` §9).
#[derive(Clone)]
pub struct Registry {
    pub distance_kernel: Arc<dyn DistanceKernel>,
    pub geometry_backend: Arc<dyn ExactGeometryBackend>,
    pub fulltext_analyzer: Arc<dyn FulltextAnalyzer>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry {
            distance_kernel: Arc::new(CpuDistanceKernel),
            geometry_backend: Arc::new(CpuGeometryBackend),
            fulltext_analyzer: Arc::new(DefaultFulltextAnalyzer::default()),
        }
    }
}

impl Registry {
    pub fn validate(&self) -> Result<()> {
        Ok(())
    }
}
