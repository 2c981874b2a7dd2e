//! Graph adjacency index: BFS, shortest path, temporal recursive path
//! (`spec.md` §4.5). No direct source file implements graph adjacency, so
//! the container follows the same `HashMap`-keyed indexing idiom as
//! `index/inverted.rs`'s `TermDictionary`, generalized to vertex adjacency
//! lists.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::error::Result;
use crate::core::types::Value;
use crate::keyschema;
use crate::store::KvStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub properties: Vec<(String, Value)>,
}

impl Edge {
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// Traversal direction for `bfs_directed`/`shortest_path_directed`
/// (`spec.md` §4.7 grammar: `OUTBOUND`/`INBOUND`/`ANY`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalDirection {
    Outbound,
    Inbound,
    Any,
}

pub struct GraphIndex {
    store: Arc<dyn KvStore>,
}

impl GraphIndex {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        GraphIndex { store }
    }

    /// Writes the edge record and both adjacency entries so
    /// `eout:u:e -> v` always has a matching `ein:v:e -> u` (`spec.md` §3
    /// invariant 4).
    pub fn add_edge(&self, edge: &Edge) -> Result<()> {
        let mut batch = self.store.open_write_batch();
        let record = serde_json::to_vec(edge)?;
        batch.put(keyschema::edge_key(&edge.id).as_bytes(), &record);
        batch.put(keyschema::eout_key(&edge.from, &edge.id).as_bytes(), edge.to.as_bytes());
        batch.put(keyschema::ein_key(&edge.to, &edge.id).as_bytes(), edge.from.as_bytes());
        batch.commit()?;
        Ok(())
    }

    pub fn remove_edge(&self, edge_id: &str) -> Result<()> {
        let Some(raw) = self.store.get(keyschema::edge_key(edge_id).as_bytes())? else {
            return Ok(());
        };
        let edge: Edge = serde_json::from_slice(&raw)?;
        let mut batch = self.store.open_write_batch();
        batch.delete(keyschema::edge_key(edge_id).as_bytes());
        batch.delete(keyschema::eout_key(&edge.from, edge_id).as_bytes());
        batch.delete(keyschema::ein_key(&edge.to, edge_id).as_bytes());
        batch.commit()?;
        Ok(())
    }

    fn edge(&self, edge_id: &str) -> Result<Option<Edge>> {
        match self.store.get(keyschema::edge_key(edge_id).as_bytes())? {
            Some(v) => Ok(Some(serde_json::from_slice(&v)?)),
            None => Ok(None),
        }
    }

    fn out_edges(&self, from: &str) -> Result<Vec<(String, String)>> {
        let prefix = keyschema::eout_prefix(from);
        let mut out = Vec::new();
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, v| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if let Some(edge_id) = parts.last() {
                out.push((edge_id.clone(), String::from_utf8_lossy(v).into_owned()));
            }
            true
        })?;
        Ok(out)
    }

    fn in_edges(&self, to: &str) -> Result<Vec<(String, String)>> {
        let prefix = keyschema::ein_prefix(to);
        let mut out = Vec::new();
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, v| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if let Some(edge_id) = parts.last() {
                out.push((edge_id.clone(), String::from_utf8_lossy(v).into_owned()));
            }
            true
        })?;
        Ok(out)
    }

    fn neighbors(&self, v: &str, direction: TraversalDirection) -> Result<Vec<(String, String)>> {
        match direction {
            TraversalDirection::Outbound => self.out_edges(v),
            TraversalDirection::Inbound => self.in_edges(v),
            TraversalDirection::Any => {
                let mut both = self.out_edges(v)?;
                both.extend(self.in_edges(v)?);
                Ok(both)
            }
        }
    }

    /// Breadth-first visit order up to `max_depth` edges from `start`
    /// (`spec.md` §4.5).
    pub fn bfs(&self, start: &str, max_depth: usize) -> Result<Vec<String>> {
        self.bfs_directed(start, max_depth, TraversalDirection::Outbound)
    }

    /// Direction-aware BFS (`spec.md` §4.7: `OUTBOUND`/`INBOUND`/`ANY`).
    pub fn bfs_directed(&self, start: &str, max_depth: usize, direction: TraversalDirection) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));
        visited.insert(start.to_string());
        while let Some((v, depth)) = queue.pop_front() {
            order.push(v.clone());
            if depth >= max_depth {
                continue;
            }
            for (_, to) in self.neighbors(&v, direction)? {
                if visited.insert(to.clone()) {
                    queue.push_back((to, depth + 1));
                }
            }
        }
        Ok(order)
    }

    /// One shortest path (by edge count) from `start` to `end`, or `None`
    /// if unreachable within `max_depth` (`spec.md` §4.5).
    pub fn shortest_path(&self, start: &str, end: &str, max_depth: usize) -> Result<Option<Vec<String>>> {
        self.shortest_path_directed(start, end, max_depth, TraversalDirection::Outbound)
    }

    /// Direction-aware shortest path.
    pub fn shortest_path_directed(
        &self,
        start: &str,
        end: &str,
        max_depth: usize,
        direction: TraversalDirection,
    ) -> Result<Option<Vec<String>>> {
        let mut visited = HashSet::new();
        let mut parent: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        queue.push_back((start.to_string(), 0));
        visited.insert(start.to_string());
        if start == end {
            return Ok(Some(vec![start.to_string()]));
        }
        while let Some((v, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            for (_, to) in self.neighbors(&v, direction)? {
                if visited.insert(to.clone()) {
                    parent.insert(to.clone(), v.clone());
                    if to == end {
                        let mut path = vec![to.clone()];
                        let mut cur = to;
                        while let Some(p) = parent.get(&cur) {
                            path.push(p.clone());
                            cur = p.clone();
                            if cur == start {
                                break;
                            }
                        }
                        path.reverse();
                        return Ok(Some(path));
                    }
                    queue.push_back((to, depth + 1));
                }
            }
        }
        Ok(None)
    }

    /// All simple paths start→end, bounded by depth and cycle-free,
    /// optionally windowed by `valid_from`/`valid_to` edge properties and
    /// filtered by `edge_type` (`spec.md` §4.5).
    #[allow(clippy::too_many_arguments)]
    pub fn recursive_path_query(
        &self,
        start: &str,
        end: Option<&str>,
        edge_type: Option<&str>,
        max_depth: usize,
        valid_from: Option<i64>,
        valid_to: Option<i64>,
    ) -> Result<Vec<Vec<String>>> {
        let mut results = Vec::new();
        let mut visiting = HashSet::new();
        visiting.insert(start.to_string());
        self.dfs_paths(
            start,
            end,
            edge_type,
            max_depth,
            valid_from,
            valid_to,
            &mut vec![start.to_string()],
            &mut visiting,
            &mut results,
        )?;
        Ok(results)
    }

    #[allow(clippy::too_many_arguments)]
    fn dfs_paths(
        &self,
        current: &str,
        end: Option<&str>,
        edge_type: Option<&str>,
        remaining_depth: usize,
        valid_from: Option<i64>,
        valid_to: Option<i64>,
        path: &mut Vec<String>,
        visiting: &mut HashSet<String>,
        results: &mut Vec<Vec<String>>,
    ) -> Result<()> {
        if let Some(end) = end {
            if current == end {
                results.push(path.clone());
            }
        } else if path.len() > 1 {
            results.push(path.clone());
        }
        if remaining_depth == 0 {
            return Ok(());
        }
        for (edge_id, to) in self.out_edges(current)? {
            if visiting.contains(&to) {
                continue;
            }
            let Some(edge) = self.edge(&edge_id)? else { continue };
            if let Some(et) = edge_type {
                if edge.property("edge_type").and_then(|v| v.as_str()).map(|s| s != et).unwrap_or(true) {
                    continue;
                }
            }
            if !edge_time_window_ok(&edge, valid_from, valid_to) {
                continue;
            }
            path.push(to.clone());
            visiting.insert(to.clone());
            self.dfs_paths(&to, end, edge_type, remaining_depth - 1, valid_from, valid_to, path, visiting, results)?;
            visiting.remove(&to);
            path.pop();
        }
        Ok(())
    }
}

fn edge_time_window_ok(edge: &Edge, valid_from: Option<i64>, valid_to: Option<i64>) -> bool {
    let Some(query_from) = valid_from else { return true };
    let edge_from = edge.property("valid_from").and_then(|v| v.as_f64()).unwrap_or(f64::NEG_INFINITY) as i64;
    let edge_to = edge.property("valid_to").and_then(|v| v.as_f64()).unwrap_or(i64::MAX as f64) as i64;
    match valid_to {
        // Point-in-time query: the edge must be valid at the instant `query_from`.
        None => edge_from <= query_from && edge_to >= query_from,
        // Window query: edge and query intervals must overlap.
        Some(query_to) => edge_from <= query_to && edge_to >= query_from,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memstore::MemStore;

    fn idx() -> GraphIndex {
        GraphIndex::new(Arc::new(MemStore::new()))
    }

    fn edge(id: &str, from: &str, to: &str) -> Edge {
        Edge { id: id.to_string(), from: from.to_string(), to: to.to_string(), properties: vec![] }
    }

    #[test]
    fn shortest_path_follows_fewest_edges() {
        let g = idx();
        g.add_edge(&edge("e1", "Berlin", "Potsdam")).unwrap();
        g.add_edge(&edge("e2", "Potsdam", "Dresden")).unwrap();
        g.add_edge(&edge("e3", "Berlin", "Paris")).unwrap();
        let path = g.shortest_path("Berlin", "Dresden", 3).unwrap().unwrap();
        assert_eq!(path, vec!["Berlin", "Potsdam", "Dresden"]);
    }

    #[test]
    fn adjacency_is_symmetric() {
        let g = idx();
        g.add_edge(&edge("e1", "A", "B")).unwrap();
        let out: Vec<_> = g.out_edges("A").unwrap();
        assert_eq!(out.len(), 1);
        let has_in = g
            .store
            .get(keyschema::ein_key("B", "e1").as_bytes())
            .unwrap()
            .is_some();
        assert!(has_in);
    }

    #[test]
    fn temporal_recursive_path_respects_window() {
        let g = idx();
        let mut e1 = edge("e1", "A", "B");
        e1.properties.push(("valid_from".into(), Value::I64(1000)));
        e1.properties.push(("valid_to".into(), Value::I64(2000)));
        let mut e2 = edge("e2", "B", "C");
        e2.properties.push(("valid_from".into(), Value::I64(1500)));
        e2.properties.push(("valid_to".into(), Value::I64(3000)));
        let mut e3 = edge("e3", "A", "C");
        e3.properties.push(("valid_from".into(), Value::I64(2500)));
        e3.properties.push(("valid_to".into(), Value::I64(4000)));
        g.add_edge(&e1).unwrap();
        g.add_edge(&e2).unwrap();
        g.add_edge(&e3).unwrap();

        let found = g.recursive_path_query("A", Some("C"), None, 3, Some(1600), None).unwrap();
        assert_eq!(found, vec![vec!["A".to_string(), "B".to_string(), "C".to_string()]]);

        let none = g.recursive_path_query("A", Some("C"), None, 3, Some(500), Some(500)).unwrap();
        assert!(none.is_empty());
    }
}
