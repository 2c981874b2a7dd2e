//! Public entry point: wires the store, the index subsystems, the write
//! path and the AQL front door into one handle (`spec.md` §1, §9).
//! Grounded on `core/database.rs`'s `Database` facade, generalized from a
//! single inverted index to the catalog-driven multi-model index set.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value as JsonValue;

use crate::aql::executor::Executor;
use crate::aql::parser::AqlParser;
use crate::aql::translator::Translator;
use crate::catalog::{IndexCatalog, IndexDescriptor, IndexKind, IndexParams, SpatialParams, VectorParams};
use crate::core::cancel::ExecutionContext;
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::registry::{Metric, Registry};
use crate::core::types::Entity;
use crate::index::graph::{Edge, GraphIndex};
use crate::index::secondary::SecondaryIndexEngine;
use crate::index::spatial::{SpatialConfig, SpatialIndex};
use crate::index::vector::VectorIndex;
use crate::store::memstore::MemStore;
use crate::store::KvStore;
use crate::write::WritePath;

/// `Themis`: the single public handle for the engine. One instance per
/// opened store; clone the `Arc`s it hands out (`secondary()`, `catalog()`)
/// rather than constructing a second `Themis` over the same store.
pub struct Themis {
    store: Arc<dyn KvStore>,
    catalog: Arc<IndexCatalog>,
    secondary: Arc<SecondaryIndexEngine>,
    registry: Registry,
    config: Config,
    write: RwLock<WritePath>,
    spatial: RwLock<HashMap<String, Arc<SpatialIndex>>>,
    vector: RwLock<HashMap<(String, String), Arc<VectorIndex>>>,
    graph: RwLock<Option<Arc<GraphIndex>>>,
    parser: AqlParser,
    translator: Translator,
}

impl Themis {
    /// Opens an in-process, `MemStore`-backed instance. The real deployment
    /// path is `Themis::open`, which plugs in whatever `KvStore` the caller
    /// built around the production LSM engine.
    pub fn in_memory() -> Result<Self> {
        Themis::open(Arc::new(MemStore::new()), Config::default(), Registry::default())
    }

    pub fn open(store: Arc<dyn KvStore>, config: Config, registry: Registry) -> Result<Self> {
        registry.validate()?;
        let catalog = Arc::new(IndexCatalog::new(store.clone()));
        catalog.load_all()?;
        let secondary = Arc::new(SecondaryIndexEngine::new(store.clone(), catalog.clone(), registry.clone()));
        let write = WritePath::new(store.clone(), catalog.clone(), secondary.clone());
        Ok(Themis {
            store,
            catalog,
            secondary,
            registry,
            config,
            write: RwLock::new(write),
            spatial: RwLock::new(HashMap::new()),
            vector: RwLock::new(HashMap::new()),
            graph: RwLock::new(None),
            parser: AqlParser::new(),
            translator: Translator::new(),
        })
    }

    pub fn catalog(&self) -> Arc<IndexCatalog> {
        self.catalog.clone()
    }

    pub fn secondary(&self) -> Arc<SecondaryIndexEngine> {
        self.secondary.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ---- index lifecycle (`spec.md` §4.3) --------------------------------

    pub fn create_equality_index(&self, table: &str, column: &str, unique: bool) -> Result<()> {
        self.secondary.create_equality_index(table, column, unique)
    }

    pub fn create_range_index(&self, table: &str, column: &str) -> Result<()> {
        self.secondary.create_range_index(table, column)
    }

    pub fn create_sparse_index(&self, table: &str, column: &str) -> Result<()> {
        self.secondary.create_sparse_index(table, column)
    }

    pub fn create_ttl_index(&self, table: &str, column: &str, ttl_seconds: i64) -> Result<()> {
        self.secondary.create_ttl_index(table, column, ttl_seconds)
    }

    pub fn create_fulltext_index(&self, table: &str, column: &str, analyzer: Option<&str>) -> Result<()> {
        self.secondary.create_fulltext_index(table, column, analyzer)
    }

    pub fn create_composite_index(&self, table: &str, columns: &[&str], unique: bool) -> Result<()> {
        self.secondary.create_composite_index(table, columns, unique)
    }

    /// Registers a spatial index on `table.column` and plugs it into both
    /// the write path (fan-out on `put`) and the read path (`query`).
    pub fn create_spatial_index(&self, table: &str, column: &str, config: SpatialConfig) -> Result<()> {
        let use_3d = config.use_3d;
        let fanout = config.fanout;
        let index = Arc::new(SpatialIndex::new(self.store.clone(), self.registry.clone()));
        index.create(table, config)?;
        self.catalog.register(IndexDescriptor {
            table: table.to_string(),
            columns: vec![column.to_string()],
            kind: IndexKind::Spatial,
            unique: false,
            params: IndexParams { spatial: Some(SpatialParams { fanout, use_3d }), ..Default::default() },
        })?;
        self.spatial.write().insert(table.to_string(), index.clone());
        self.write.write().register_spatial(table, index);
        Ok(())
    }

    /// Registers a vector index on `table.column` (`spec.md` §4.6).
    #[allow(clippy::too_many_arguments)]
    pub fn create_vector_index(
        &self,
        table: &str,
        column: &str,
        dim: usize,
        metric: Metric,
        m: usize,
        ef_construction: usize,
        ef_search: usize,
    ) -> Result<()> {
        let index = Arc::new(VectorIndex::new(self.store.clone(), self.registry.clone()));
        index.init(dim, metric, m, ef_construction, ef_search);
        self.catalog.register(IndexDescriptor {
            table: table.to_string(),
            columns: vec![column.to_string()],
            kind: IndexKind::VectorANN,
            unique: false,
            params: IndexParams { vector: Some(VectorParams { dim, metric, m, ef_construction, ef_search }), ..Default::default() },
        })?;
        self.vector.write().insert((table.to_string(), column.to_string()), index.clone());
        self.write.write().register_vector(table, column, index);
        Ok(())
    }

    /// Enables graph traversal (`spec.md` §4.5). A single adjacency index
    /// spans all vertex/edge tables; call once per store.
    pub fn enable_graph(&self) -> Result<()> {
        let mut slot = self.graph.write();
        if slot.is_none() {
            let index = Arc::new(GraphIndex::new(self.store.clone()));
            self.write.write().graph = Some(index.clone());
            *slot = Some(index);
        }
        Ok(())
    }

    pub fn add_edge(&self, edge: Edge) -> Result<()> {
        let slot = self.graph.read();
        match slot.as_ref() {
            Some(g) => g.add_edge(&edge),
            None => Err(crate::core::error::Error::validation("graph traversal is not enabled; call enable_graph() first")),
        }
    }

    pub fn remove_edge(&self, edge_id: &str) -> Result<()> {
        let slot = self.graph.read();
        match slot.as_ref() {
            Some(g) => g.remove_edge(edge_id),
            None => Err(crate::core::error::Error::validation("graph traversal is not enabled; call enable_graph() first")),
        }
    }

    // ---- write path (`spec.md` §4.11) ------------------------------------

    pub fn put(&self, table: &str, entity: &Entity) -> Result<()> {
        self.write.read().put(table, entity)
    }

    pub fn put_atomic(&self, table: &str, entity: &Entity) -> Result<()> {
        self.write.read().put_atomic(table, entity)
    }

    pub fn delete(&self, table: &str, pk: &str) -> Result<()> {
        self.write.read().delete(table, pk)
    }

    // ---- AQL query path (`spec.md` §4.7-§4.10) ---------------------------

    /// Parses, translates, optimizes and executes an AQL query string
    /// against a background (non-cancellable, no-deadline) context.
    pub fn query(&self, aql: &str) -> Result<Vec<JsonValue>> {
        self.query_with_context(aql, &ExecutionContext::default())
    }

    pub fn query_with_context(&self, aql: &str, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        ctx.check()?;
        let ast = self.parser.parse(aql)?;
        let plan = self.translator.translate(&ast)?;
        self.executor().execute(&plan, ctx)
    }

    /// Builds a fresh, read-only `Executor` snapshotting the currently
    /// registered spatial/vector/graph indexes. Cheap: every field is an
    /// `Arc` clone or a small map copy, and `Executor` holds no state across
    /// calls, so one can be built per query without contention on writers.
    fn executor(&self) -> Executor {
        Executor::new(
            self.store.clone(),
            self.secondary.clone(),
            self.spatial.read().clone(),
            self.vector.read().clone(),
            self.graph.read().clone(),
            self.registry.clone(),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Value;

    fn seed_users(db: &Themis) {
        db.create_equality_index("users", "city", false).unwrap();
        db.put("users", &Entity::new("users", "u1").with_field("city", Value::Str("Berlin".into())).with_field("age", Value::I64(30))).unwrap();
        db.put("users", &Entity::new("users", "u2").with_field("city", Value::Str("Paris".into())).with_field("age", Value::I64(25))).unwrap();
    }

    #[test]
    fn roundtrips_put_and_query_through_aql() {
        let db = Themis::in_memory().unwrap();
        seed_users(&db);
        let rows = db.query("FOR u IN users FILTER u.city == \"Berlin\" RETURN u").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["_key"], JsonValue::String("u1".into()));
    }

    #[test]
    fn delete_removes_entity_from_subsequent_queries() {
        let db = Themis::in_memory().unwrap();
        seed_users(&db);
        db.delete("users", "u1").unwrap();
        let rows = db.query("FOR u IN users FILTER u.city == \"Berlin\" RETURN u").unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn with_clause_binds_a_cte_before_the_main_for() {
        let db = Themis::in_memory().unwrap();
        seed_users(&db);
        db.put("users", &Entity::new("users", "u3").with_field("city", Value::Str("Berlin".into())).with_field("age", Value::I64(40))).unwrap();
        let rows = db
            .query("WITH adults AS (FOR u IN users FILTER u.age >= 30 RETURN u) FOR a IN adults FILTER a.city == \"Berlin\" RETURN a")
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["age"].as_i64().unwrap() >= 30));
    }

    #[test]
    fn graph_operations_require_enable_graph_first() {
        let db = Themis::in_memory().unwrap();
        let err = db.add_edge(Edge { id: "e1".into(), from: "a".into(), to: "b".into(), properties: vec![] });
        assert!(err.is_err());
        db.enable_graph().unwrap();
        db.add_edge(Edge { id: "e1".into(), from: "a".into(), to: "b".into(), properties: vec![] }).unwrap();
    }
}
