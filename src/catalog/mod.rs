//! Index Catalog: register/persist/introspect index metadata per
//! (table, column, kind) (`spec.md` §2, §4.3, SPEC_FULL.md §4.18).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::error::{Error, Result};
use crate::core::registry::Metric;
use crate::keyschema;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub enum IndexKind {
    Equality,
    RangeOrdered,
    Sparse,
    TTL,
    Fulltext,
    Spatial,
    Graph,
    VectorANN,
    Composite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorParams {
    pub dim: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialParams {
    pub fanout: usize,
    pub use_3d: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexParams {
    pub ttl_seconds: Option<i64>,
    pub fulltext_analyzer: Option<String>,
    pub vector: Option<VectorParams>,
    pub spatial: Option<SpatialParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub table: String,
    pub columns: Vec<String>,
    pub kind: IndexKind,
    pub unique: bool,
    pub params: IndexParams,
}

impl IndexDescriptor {
    pub fn column(&self) -> &str {
        self.columns.first().map(|s| s.as_str()).unwrap_or("")
    }

    pub fn meta_key(&self) -> String {
        match self.kind {
            IndexKind::Composite => keyschema::composite_idxmeta_key(
                &self.table,
                &self.columns.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            ),
            IndexKind::RangeOrdered => keyschema::ridxmeta_key(&self.table, self.column()),
            IndexKind::Sparse => keyschema::sidxmeta_key(&self.table, self.column()),
            IndexKind::TTL => keyschema::ttlidxmeta_key(&self.table, self.column()),
            IndexKind::Fulltext => keyschema::ftidxmeta_key(&self.table, self.column()),
            IndexKind::Spatial => keyschema::gidxmeta_key(&self.table, self.column()),
            IndexKind::Graph | IndexKind::VectorANN | IndexKind::Equality => {
                keyschema::idxmeta_key(&self.table, self.column())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IndexStats {
    pub kind: String,
    pub table: String,
    pub column: String,
    pub entry_count: u64,
    pub unique: bool,
    pub additional_info: String,
}

#[derive(Default)]
pub struct RebuildMetrics {
    pub rebuild_count: AtomicU64,
    pub rebuild_duration_ms: AtomicU64,
    pub rebuild_entities_processed: AtomicU64,
}

impl RebuildMetrics {
    pub fn record(&self, duration_ms: u64, entities: u64) {
        self.rebuild_count.fetch_add(1, Ordering::Relaxed);
        self.rebuild_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.rebuild_entities_processed.fetch_add(entities, Ordering::Relaxed);
    }
}

/// Copy-on-read descriptor cache refreshed on change (`spec.md` §5).
pub struct IndexCatalog {
    store: Arc<dyn KvStore>,
    descriptors: RwLock<HashMap<String, IndexDescriptor>>,
    pub rebuild_metrics: RebuildMetrics,
}

fn descriptor_cache_key(table: &str, columns: &[String], kind: IndexKind) -> String {
    format!("{}\0{}\0{:?}", table, columns.join("+"), kind)
}

impl IndexCatalog {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        IndexCatalog { store, descriptors: RwLock::new(HashMap::new()), rebuild_metrics: RebuildMetrics::default() }
    }

    /// Loads every persisted descriptor into the in-memory snapshot. Meant
    /// to run once at startup per `spec.md` §3 ("Metadata ... loaded on startup").
    pub fn load_all(&self) -> Result<()> {
        let mut cache = self.descriptors.write();
        cache.clear();
        for prefix in ["idxmeta:", "ridxmeta:", "sidxmeta:", "ttlidxmeta:", "ftidxmeta:", "gidxmeta:"] {
            self.store.scan_prefix(prefix.as_bytes(), &mut |_k, v| {
                if let Ok(desc) = serde_json::from_slice::<IndexDescriptor>(v) {
                    let key = descriptor_cache_key(&desc.table, &desc.columns, desc.kind);
                    cache.insert(key, desc);
                }
                true
            })?;
        }
        Ok(())
    }

    pub fn register(&self, desc: IndexDescriptor) -> Result<()> {
        let key = descriptor_cache_key(&desc.table, &desc.columns, desc.kind);
        {
            let cache = self.descriptors.read();
            if let Some(existing) = cache.get(&key) {
                if existing.unique != desc.unique {
                    return Err(Error::validation(format!(
                        "conflicting index already exists on {}.{:?}",
                        desc.table, desc.columns
                    )));
                }
                return Ok(()); // idempotent
            }
        }
        let meta_key = desc.meta_key();
        let value = serde_json::to_vec(&desc)?;
        self.store.put(meta_key.as_bytes(), &value)?;
        self.descriptors.write().insert(key, desc);
        Ok(())
    }

    pub fn drop_index(&self, table: &str, columns: &[String], kind: IndexKind) -> Result<()> {
        let key = descriptor_cache_key(table, columns, kind);
        let mut cache = self.descriptors.write();
        if let Some(desc) = cache.remove(&key) {
            self.store.delete(desc.meta_key().as_bytes())?;
        }
        Ok(())
    }

    pub fn has_index(&self, table: &str, column: &str, kind: IndexKind) -> bool {
        let key = descriptor_cache_key(table, &[column.to_string()], kind);
        self.descriptors.read().contains_key(&key)
    }

    pub fn get(&self, table: &str, columns: &[String], kind: IndexKind) -> Option<IndexDescriptor> {
        let key = descriptor_cache_key(table, columns, kind);
        self.descriptors.read().get(&key).cloned()
    }

    pub fn indexes_for_table(&self, table: &str) -> Vec<IndexDescriptor> {
        self.descriptors.read().values().filter(|d| d.table == table).cloned().collect()
    }

    pub fn all_index_stats(&self, table: &str) -> Vec<IndexStats> {
        self.indexes_for_table(table)
            .into_iter()
            .map(|d| IndexStats {
                kind: format!("{:?}", d.kind),
                table: d.table.clone(),
                column: d.columns.join("+"),
                entry_count: 0,
                unique: d.unique,
                additional_info: String::new(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memstore::MemStore;

    fn desc(table: &str, col: &str, kind: IndexKind) -> IndexDescriptor {
        IndexDescriptor {
            table: table.to_string(),
            columns: vec![col.to_string()],
            kind,
            unique: false,
            params: IndexParams::default(),
        }
    }

    #[test]
    fn register_then_has_index() {
        let store = Arc::new(MemStore::new());
        let cat = IndexCatalog::new(store);
        cat.register(desc("users", "city", IndexKind::Equality)).unwrap();
        assert!(cat.has_index("users", "city", IndexKind::Equality));
        assert!(!cat.has_index("users", "age", IndexKind::Equality));
    }

    #[test]
    fn register_is_idempotent() {
        let store = Arc::new(MemStore::new());
        let cat = IndexCatalog::new(store);
        cat.register(desc("users", "city", IndexKind::Equality)).unwrap();
        cat.register(desc("users", "city", IndexKind::Equality)).unwrap();
        assert_eq!(cat.indexes_for_table("users").len(), 1);
    }

    #[test]
    fn reload_recovers_descriptors_from_store() {
        let store = Arc::new(MemStore::new());
        let cat = IndexCatalog::new(store.clone());
        cat.register(desc("users", "city", IndexKind::Equality)).unwrap();
        let cat2 = IndexCatalog::new(store);
        cat2.load_all().unwrap();
        assert!(cat2.has_index("users", "city", IndexKind::Equality));
    }
}
