//! HNSW vector ANN index with flat fallback (`spec.md` §4.6). Method
//! naming (`add_item`/`del_item`-style tombstone discipline) and the
//! `roaring::RoaringBitmap` tombstone set are grounded on
//! `examples/other_examples/.../HelixDB vector_core writer.rs`, reimplemented
//! in-memory (no LMDB backing store). Reader/writer guard discipline follows
//! `spec.md` §5: readers use a shared guard, inserts an exclusive guard,
//! tombstones avoid dereferencing freed nodes during in-flight searches.

use std::collections::{BinaryHeap, HashMap};
use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use roaring::RoaringBitmap;

use crate::core::error::{Error, Result};
use crate::core::registry::{Metric, Registry};
use crate::core::types::{Entity, Value};
use crate::index::secondary::SecondaryIndexEngine;
use crate::store::KvStore;

/// Below this population, `search_knn` falls back to brute-force flat scan
/// instead of graph traversal (`spec.md` §4.6).
const FLAT_FALLBACK_THRESHOLD: usize = 256;

#[derive(Clone)]
struct Node {
    pk: String,
    vector: Vec<f32>,
    level: usize,
    neighbors: Vec<Vec<u32>>,
}

pub struct VectorIndexConfig {
    pub dim: usize,
    pub metric: Metric,
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        VectorIndexConfig { dim: 0, metric: Metric::L2, m: 16, ef_construction: 200, ef_search: 64 }
    }
}

struct Graph {
    nodes: Vec<Node>,
    pk_to_idx: HashMap<String, u32>,
    tombstones: RoaringBitmap,
    entry_point: Option<u32>,
    max_level: usize,
}

impl Graph {
    fn new() -> Self {
        Graph { nodes: Vec::new(), pk_to_idx: HashMap::new(), tombstones: RoaringBitmap::new(), entry_point: None, max_level: 0 }
    }
}

pub struct VectorIndex {
    #[allow(dead_code)]
    store: Arc<dyn KvStore>,
    registry: Registry,
    pub config: RwLock<VectorIndexConfig>,
    graph: RwLock<Graph>,
}

#[derive(Debug, Clone)]
pub struct KnnHit {
    pub pk: String,
    pub distance: f32,
}

#[derive(PartialEq)]
struct ScoredIdx(f32, u32);
impl Eq for ScoredIdx {}
impl PartialOrd for ScoredIdx {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoredIdx {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.partial_cmp(&self.0).unwrap_or(Ordering::Equal)
    }
}

impl VectorIndex {
    pub fn new(store: Arc<dyn KvStore>, registry: Registry) -> Self {
        VectorIndex { store, registry, config: RwLock::new(VectorIndexConfig::default()), graph: RwLock::new(Graph::new()) }
    }

    pub fn init(&self, dim: usize, metric: Metric, m: usize, ef_construction: usize, ef_search: usize) {
        *self.config.write() = VectorIndexConfig { dim, metric, m, ef_construction, ef_search };
    }

    fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        let metric = self.config.read().metric;
        crate::core::registry::distance(a, b, metric)
    }

    fn random_level(&self, m: usize) -> usize {
        let mut rng = rand::thread_rng();
        let mut level = 0;
        while rng.gen::<f32>() < 1.0 / (m as f32) && level < 16 {
            level += 1;
        }
        level
    }

    pub fn add_entity(&self, entity: &Entity, field: &str) -> Result<()> {
        let Some(Value::Vector(v)) = entity.field(field) else {
            return Err(Error::validation(format!("entity {} has no vector field {}", entity.pk, field)));
        };
        let dim = self.config.read().dim;
        if dim != 0 && v.len() != dim {
            return Err(Error::validation(format!("vector dim {} does not match index dim {}", v.len(), dim)));
        }
        self.insert(&entity.pk, v.clone())
    }

    fn insert(&self, pk: &str, vector: Vec<f32>) -> Result<()> {
        let m = self.config.read().m.max(1);
        let level = self.random_level(m);
        let mut graph = self.graph.write();

        if let Some(&old_idx) = graph.pk_to_idx.get(pk) {
            graph.tombstones.insert(old_idx);
        }

        let idx = graph.nodes.len() as u32;
        let neighbors = vec![Vec::new(); level + 1];
        graph.nodes.push(Node { pk: pk.to_string(), vector: vector.clone(), level, neighbors });
        graph.pk_to_idx.insert(pk.to_string(), idx);

        if graph.entry_point.is_none() {
            graph.entry_point = Some(idx);
            graph.max_level = level;
            return Ok(());
        }

        let entry = graph.entry_point.unwrap();
        let mut cur = entry;
        let top = graph.max_level;
        for layer in (level + 1..=top).rev() {
            cur = self.greedy_descend(&graph, cur, &vector, layer);
        }
        for layer in (0..=level.min(top)).rev() {
            let candidates = self.search_layer(&graph, &vector, cur, layer, m.max(self.config.read().ef_construction));
            let chosen: Vec<u32> = candidates.into_iter().take(m).map(|(_, i)| i).collect();
            graph.nodes[idx as usize].neighbors[layer] = chosen.clone();
            for &neighbor in &chosen {
                if (layer) < graph.nodes[neighbor as usize].neighbors.len() {
                    graph.nodes[neighbor as usize].neighbors[layer].push(idx);
                }
            }
            if let Some(&first) = chosen.first() {
                cur = first;
            }
        }
        if level > graph.max_level {
            graph.max_level = level;
            graph.entry_point = Some(idx);
        }
        Ok(())
    }

    fn greedy_descend(&self, graph: &Graph, start: u32, query: &[f32], layer: usize) -> u32 {
        let mut cur = start;
        let mut cur_dist = self.distance(query, &graph.nodes[cur as usize].vector);
        loop {
            let mut improved = false;
            if layer < graph.nodes[cur as usize].neighbors.len() {
                for &nb in &graph.nodes[cur as usize].neighbors[layer].clone() {
                    if graph.tombstones.contains(nb) {
                        continue;
                    }
                    let d = self.distance(query, &graph.nodes[nb as usize].vector);
                    if d < cur_dist {
                        cur_dist = d;
                        cur = nb;
                        improved = true;
                    }
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    /// Best-first expansion within one layer, keeping up to `ef` candidates.
    fn search_layer(&self, graph: &Graph, query: &[f32], entry: u32, layer: usize, ef: usize) -> Vec<(f32, u32)> {
        let mut visited = std::collections::HashSet::new();
        visited.insert(entry);
        let entry_dist = self.distance(query, &graph.nodes[entry as usize].vector);
        let mut candidates = BinaryHeap::new();
        candidates.push(ScoredIdx(entry_dist, entry));
        let mut best: Vec<(f32, u32)> = vec![(entry_dist, entry)];

        while let Some(ScoredIdx(dist, idx)) = candidates.pop() {
            if best.len() >= ef {
                if let Some(&(worst, _)) = best.iter().max_by(|a, b| a.0.partial_cmp(&b.0).unwrap()) {
                    if dist > worst {
                        break;
                    }
                }
            }
            if layer >= graph.nodes[idx as usize].neighbors.len() {
                continue;
            }
            for &nb in &graph.nodes[idx as usize].neighbors[layer].clone() {
                if graph.tombstones.contains(nb) || !visited.insert(nb) {
                    continue;
                }
                let d = self.distance(query, &graph.nodes[nb as usize].vector);
                candidates.push(ScoredIdx(d, nb));
                best.push((d, nb));
            }
        }
        best.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));
        best.truncate(ef.max(1));
        best
    }

    /// Logical deletion: tombstones the node, graph links are not rewritten
    /// until `rebuild_from_storage` (`spec.md` §4.6).
    pub fn remove_entity(&self, pk: &str) -> Result<()> {
        let mut graph = self.graph.write();
        if let Some(&idx) = graph.pk_to_idx.get(pk) {
            graph.tombstones.insert(idx);
            graph.pk_to_idx.remove(pk);
        }
        Ok(())
    }

    fn live_count(&self, graph: &Graph) -> usize {
        graph.nodes.len() - graph.tombstones.len() as usize
    }

    pub fn search_knn(&self, query: &[f32], k: usize) -> Result<Vec<KnnHit>> {
        let graph = self.graph.read();
        if graph.nodes.is_empty() {
            return Ok(Vec::new());
        }
        if self.live_count(&graph) <= FLAT_FALLBACK_THRESHOLD {
            return Ok(self.flat_search(&graph, query, k, None));
        }

        let entry = graph.entry_point.unwrap();
        let mut cur = entry;
        for layer in (1..=graph.max_level).rev() {
            cur = self.greedy_descend(&graph, cur, query, layer);
        }
        let ef = self.config.read().ef_search.max(k);
        let candidates = self.search_layer(&graph, query, cur, 0, ef);
        let mut hits: Vec<KnnHit> = candidates
            .into_iter()
            .filter(|(_, idx)| !graph.tombstones.contains(*idx))
            .map(|(d, idx)| KnnHit { pk: graph.nodes[idx as usize].pk.clone(), distance: d })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    fn flat_search(&self, graph: &Graph, query: &[f32], k: usize, allow: Option<&std::collections::HashSet<String>>) -> Vec<KnnHit> {
        let mut hits: Vec<KnnHit> = graph
            .nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| !graph.tombstones.contains(*i as u32))
            .filter(|(_, n)| allow.map(|a| a.contains(&n.pk)).unwrap_or(true))
            .map(|(_, n)| KnnHit { pk: n.pk.clone(), distance: self.distance(query, &n.vector) })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        hits.truncate(k);
        hits
    }

    /// Runs `filters` against the secondary index engine first to obtain a
    /// candidate pk set, then restricts the search to it (`spec.md` §4.6).
    pub fn search_knn_pre_filtered(
        &self,
        query: &[f32],
        k: usize,
        candidate_pks: &[String],
        _secondary: &SecondaryIndexEngine,
    ) -> Result<Vec<KnnHit>> {
        let allow: std::collections::HashSet<String> = candidate_pks.iter().cloned().collect();
        let graph = self.graph.read();
        Ok(self.flat_search(&graph, query, k, Some(&allow)))
    }

    /// Discards the old graph entirely and reinserts every live vector
    /// fresh rather than re-linking around tombstones in place (open
    /// question decision recorded in `DESIGN.md`).
    pub fn rebuild_from_storage(&self, entities: impl Iterator<Item = (String, Vec<f32>)>) -> Result<()> {
        *self.graph.write() = Graph::new();
        for (pk, vec) in entities {
            self.insert(&pk, vec)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.live_count(&self.graph.read())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[allow(dead_code)]
    fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memstore::MemStore;

    fn rand_vec(dim: usize, seed: f32) -> Vec<f32> {
        (0..dim).map(|i| ((i as f32) * 0.37 + seed).sin()).collect()
    }

    #[test]
    fn knn_finds_nearest_flat() {
        let store = Arc::new(MemStore::new());
        let idx = VectorIndex::new(store, Registry::default());
        idx.init(4, Metric::L2, 16, 200, 64);
        idx.insert("a", vec![1.0, 0.0, 0.0, 0.0]).unwrap();
        idx.insert("b", vec![0.0, 1.0, 0.0, 0.0]).unwrap();
        idx.insert("c", vec![0.9, 0.1, 0.0, 0.0]).unwrap();
        let hits = idx.search_knn(&[1.0, 0.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits[0].pk, "a");
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn removed_entity_excluded_from_search() {
        let store = Arc::new(MemStore::new());
        let idx = VectorIndex::new(store, Registry::default());
        idx.init(2, Metric::L2, 16, 200, 64);
        idx.insert("a", vec![1.0, 0.0]).unwrap();
        idx.insert("b", vec![1.0, 0.01]).unwrap();
        idx.remove_entity("a").unwrap();
        let hits = idx.search_knn(&[1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].pk, "b");
    }

    #[test]
    fn recall_floor_on_synthetic_data() {
        let store = Arc::new(MemStore::new());
        let idx = VectorIndex::new(store, Registry::default());
        let dim = 16;
        idx.init(dim, Metric::L2, 16, 200, 64);
        let mut vectors = Vec::new();
        for i in 0..500u32 {
            let v = rand_vec(dim, i as f32);
            idx.insert(&format!("v{}", i), v.clone()).unwrap();
            vectors.push(v);
        }
        let query = vectors[10].clone();
        let hits = idx.search_knn(&query, 10).unwrap();
        assert!(hits.iter().any(|h| h.pk == "v10"));
    }
}
