use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Every tunable named in `spec.md` §6, plus storage-adjacent knobs kept in
/// the same flat `Config` struct style. Persisted under `config:<name>`
/// keys via `serde_json` round-trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage_path: PathBuf,
    pub memory_limit: usize,
    pub cache_size: usize,

    /// Oversampling factor for Vector-first hybrid plans (`spec.md` §6).
    pub vector_first_overfetch: u32,
    /// Below this bbox/world-area ratio, Spatial-first may still lose to
    /// Vector-first when a prefilter is strong.
    pub bbox_ratio_threshold: f64,
    pub fulltext_bm25_k1: f64,
    pub fulltext_bm25_b: f64,
    pub hnsw_ef_search_default: usize,

    pub writer_batch_size: usize,
    pub writer_commit_interval_secs: u64,
    pub writer_max_segment_size: usize,
    pub max_readers: usize,

    /// Materialization threshold / batch size for parallel entity loads
    /// (`spec.md` §4.10 "Entity materialization").
    pub materialize_parallel_threshold: usize,
    pub materialize_batch_size: usize,

    /// Hint for how many worker tasks independent scans/conjuncts may fan
    /// out to (`spec.md` §5 "shared worker pool"); defaults to the host's
    /// logical core count.
    pub parallelism: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),
            cache_size: 10 * 1024 * 1024,
            memory_limit: 100 * 1024 * 1024,

            vector_first_overfetch: 3,
            bbox_ratio_threshold: 0.1,
            fulltext_bm25_k1: 1.2,
            fulltext_bm25_b: 0.75,
            hnsw_ef_search_default: 64,

            writer_batch_size: 1000,
            writer_commit_interval_secs: 60,
            writer_max_segment_size: 50 * 1024 * 1024,
            max_readers: 10,

            materialize_parallel_threshold: 100,
            materialize_batch_size: 50,

            parallelism: num_cpus::get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = Config::default();
        assert_eq!(c.vector_first_overfetch, 3);
        assert!((c.bbox_ratio_threshold - 0.1).abs() < 1e-9);
        assert!((c.fulltext_bm25_k1 - 1.2).abs() < 1e-9);
        assert!((c.fulltext_bm25_b - 0.75).abs() < 1e-9);
        assert_eq!(c.hnsw_ef_search_default, 64);
    }
}
