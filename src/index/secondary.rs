//! Secondary Index Engine (`spec.md` §4.3): maintains every non-spatial,
//! non-graph, non-vector index and mediates every entity put/delete so
//! indexes stay in sync with the primary store. Grounded on
//! `original_source/include/index/secondary_index.h`'s public contract,
//! `index/inverted.rs`/`index/posting.rs`'s posting-list shape for the
//! fulltext path, and `core/transaction.rs`'s read-modify-write-batch
//! discipline.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::{IndexCatalog, IndexDescriptor, IndexKind, IndexParams};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::registry::Registry;
use crate::core::types::{Entity, Value};
use crate::keyschema;
use crate::store::{Batch, KvStore};

#[derive(Debug, Clone, Copy)]
pub struct Bound<'a> {
    pub value: Option<&'a str>,
    pub inclusive: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Posting {
    tf: u32,
    doc_len: u32,
    positions: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct FulltextAgg {
    doc_count: u64,
    total_len: u64,
}

impl FulltextAgg {
    fn avg_doc_len(&self) -> f64 {
        if self.doc_count == 0 {
            0.0
        } else {
            self.total_len as f64 / self.doc_count as f64
        }
    }
}

pub struct SecondaryIndexEngine {
    store: Arc<dyn KvStore>,
    catalog: Arc<IndexCatalog>,
    registry: Registry,
    pub bm25_k1: f64,
    pub bm25_b: f64,
}

impl SecondaryIndexEngine {
    pub fn new(store: Arc<dyn KvStore>, catalog: Arc<IndexCatalog>, registry: Registry) -> Self {
        SecondaryIndexEngine { store, catalog, registry, bm25_k1: 1.2, bm25_b: 0.75 }
    }

    // ---- index lifecycle ----------------------------------------------

    fn create_index(&self, table: &str, columns: &[&str], kind: IndexKind, unique: bool, params: IndexParams) -> Result<()> {
        let desc = IndexDescriptor {
            table: table.to_string(),
            columns: columns.iter().map(|s| s.to_string()).collect(),
            kind,
            unique,
            params,
        };
        self.catalog.register(desc)
    }

    pub fn create_equality_index(&self, table: &str, column: &str, unique: bool) -> Result<()> {
        self.create_index(table, &[column], IndexKind::Equality, unique, IndexParams::default())
    }

    pub fn create_range_index(&self, table: &str, column: &str) -> Result<()> {
        self.create_index(table, &[column], IndexKind::RangeOrdered, false, IndexParams::default())
    }

    pub fn create_sparse_index(&self, table: &str, column: &str) -> Result<()> {
        self.create_index(table, &[column], IndexKind::Sparse, false, IndexParams::default())
    }

    pub fn create_ttl_index(&self, table: &str, column: &str, ttl_seconds: i64) -> Result<()> {
        let mut params = IndexParams::default();
        params.ttl_seconds = Some(ttl_seconds);
        self.create_index(table, &[column], IndexKind::TTL, false, params)
    }

    pub fn create_fulltext_index(&self, table: &str, column: &str, analyzer: Option<&str>) -> Result<()> {
        let mut params = IndexParams::default();
        params.fulltext_analyzer = analyzer.map(|s| s.to_string());
        self.create_index(table, &[column], IndexKind::Fulltext, false, params)
    }

    pub fn create_composite_index(&self, table: &str, columns: &[&str], unique: bool) -> Result<()> {
        self.create_index(table, columns, IndexKind::Composite, unique, IndexParams::default())
    }

    pub fn drop_index(&self, table: &str, columns: &[&str], kind: IndexKind) -> Result<()> {
        let cols: Vec<String> = columns.iter().map(|s| s.to_string()).collect();
        let entry_prefix = self.entries_prefix(table, columns, kind);
        let mut keys = Vec::new();
        self.store.scan_prefix(entry_prefix.as_bytes(), &mut |k, _| {
            keys.push(k.to_vec());
            true
        })?;
        let mut batch = self.store.open_write_batch();
        for k in &keys {
            batch.delete(k);
        }
        batch.commit()?;
        if matches!(kind, IndexKind::Fulltext) {
            self.store.delete(keyschema::ftagg_key(table, columns[0]).as_bytes())?;
        }
        self.catalog.drop_index(table, &cols, kind)
    }

    pub fn has_index(&self, table: &str, column: &str, kind: IndexKind) -> bool {
        self.catalog.has_index(table, column, kind)
    }

    fn entries_prefix(&self, table: &str, columns: &[&str], kind: IndexKind) -> String {
        match kind {
            IndexKind::Equality => keyschema::idx_prefix(table, columns[0]),
            IndexKind::RangeOrdered => keyschema::ridx_prefix(table, columns[0]),
            IndexKind::Sparse => keyschema::sidx_prefix(table, columns[0]),
            IndexKind::TTL => keyschema::ttlidx_prefix(table, columns[0]),
            IndexKind::Fulltext => {
                // no single-token prefix; fulltext has its own drop path below
                format!("ftidx:{}:{}:", table, columns[0])
            }
            IndexKind::Composite => {
                let joined = columns.join("+");
                format!("idx:{}:{}:", table, joined)
            }
            IndexKind::Spatial | IndexKind::Graph | IndexKind::VectorANN => String::new(),
        }
    }

    // ---- write path -----------------------------------------------------

    /// `put(table, entity)`: opens its own batch, writes, commits.
    pub fn put(&self, table: &str, entity: &Entity) -> Result<()> {
        let mut batch = self.store.open_write_batch();
        self.put_with_batch(table, entity, batch.as_mut())?;
        batch.commit().map_err(|e| Error::new(ErrorKind::StoreError, e.to_string()))
    }

    /// Atomic variant used by the write path when the caller wants spatial
    /// / vector hooks enlisted in the same commit (`spec.md` §4.11).
    pub fn put_with_batch(&self, table: &str, entity: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let pk = entity.pk.clone();
        let prev_key = keyschema::entity_key(table, &pk);
        let prev_blob = self.store.get(prev_key.as_bytes())?;
        let prev_entity: Option<Entity> = prev_blob.as_deref().and_then(|b| bincode::deserialize(b).ok());

        for desc in self.catalog.indexes_for_table(table) {
            match desc.kind {
                IndexKind::Equality => self.diff_equality(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::RangeOrdered => self.diff_range(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::Sparse => self.diff_sparse(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::TTL => self.diff_ttl(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::Composite => self.diff_composite(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::Fulltext => self.diff_fulltext(&desc, prev_entity.as_ref(), entity, batch)?,
                IndexKind::Spatial | IndexKind::Graph | IndexKind::VectorANN => {}
            }
        }

        let blob = bincode::serialize(entity)?;
        batch.put(prev_key.as_bytes(), &blob);
        Ok(())
    }

    pub fn erase(&self, table: &str, pk: &str) -> Result<()> {
        let mut batch = self.store.open_write_batch();
        self.erase_with_batch(table, pk, batch.as_mut())?;
        batch.commit().map_err(|e| Error::new(ErrorKind::StoreError, e.to_string()))
    }

    pub fn erase_with_batch(&self, table: &str, pk: &str, batch: &mut dyn Batch) -> Result<()> {
        let key = keyschema::entity_key(table, pk);
        let Some(blob) = self.store.get(key.as_bytes())? else {
            return Ok(());
        };
        let entity: Entity = bincode::deserialize(&blob)?;
        let empty = Entity::new(table, pk);
        for desc in self.catalog.indexes_for_table(table) {
            match desc.kind {
                IndexKind::Equality => self.diff_equality(&desc, Some(&entity), &empty, batch)?,
                IndexKind::RangeOrdered => self.diff_range(&desc, Some(&entity), &empty, batch)?,
                IndexKind::Sparse => self.diff_sparse(&desc, Some(&entity), &empty, batch)?,
                IndexKind::TTL => self.diff_ttl(&desc, Some(&entity), &empty, batch)?,
                IndexKind::Composite => self.diff_composite(&desc, Some(&entity), &empty, batch)?,
                IndexKind::Fulltext => self.diff_fulltext(&desc, Some(&entity), &empty, batch)?,
                IndexKind::Spatial | IndexKind::Graph | IndexKind::VectorANN => {}
            }
        }
        batch.delete(key.as_bytes());
        Ok(())
    }

    fn field_str(entity: &Entity, column: &str) -> Option<String> {
        entity.field_path(column).map(|v| v.encode_sortable())
    }

    fn diff_equality(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let column = desc.column();
        let old_v = prev.and_then(|e| Self::field_str(e, column));
        let new_v = Self::field_str(cur, column);
        if old_v == new_v {
            return Ok(());
        }
        if let Some(old_v) = &old_v {
            batch.delete(keyschema::idx_key(&desc.table, column, old_v, &cur.pk).as_bytes());
        }
        if let Some(new_v) = &new_v {
            if desc.unique {
                self.check_unique(&desc.table, column, new_v, &cur.pk)?;
            }
            batch.put(keyschema::idx_key(&desc.table, column, new_v, &cur.pk).as_bytes(), b"");
        }
        Ok(())
    }

    fn check_unique(&self, table: &str, column: &str, value: &str, pk: &str) -> Result<()> {
        let prefix = keyschema::idx_key(table, column, value, "");
        let mut conflict = false;
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, _| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if let Some(existing_pk) = parts.last() {
                if existing_pk != pk {
                    conflict = true;
                }
            }
            !conflict
        })?;
        if conflict {
            return Err(Error::unique_violation(format!("{}.{} = {} already indexed", table, column, value)));
        }
        Ok(())
    }

    fn diff_range(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let column = desc.column();
        let old_v = prev.and_then(|e| Self::field_str(e, column));
        let new_v = Self::field_str(cur, column);
        if old_v == new_v {
            return Ok(());
        }
        if let Some(old_v) = &old_v {
            batch.delete(keyschema::ridx_key(&desc.table, column, old_v, &cur.pk).as_bytes());
        }
        if let Some(new_v) = &new_v {
            batch.put(keyschema::ridx_key(&desc.table, column, new_v, &cur.pk).as_bytes(), b"");
        }
        Ok(())
    }

    fn diff_sparse(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let column = desc.column();
        let old_val = prev.and_then(|e| e.field_path(column));
        let new_val = cur.field_path(column);
        let old_v = old_val.filter(|v| !v.is_null_or_empty()).map(|v| v.encode_sortable());
        let new_v = new_val.filter(|v| !v.is_null_or_empty()).map(|v| v.encode_sortable());
        if old_v == new_v {
            return Ok(());
        }
        if let Some(old_v) = &old_v {
            batch.delete(keyschema::sidx_key(&desc.table, column, old_v, &cur.pk).as_bytes());
        }
        if let Some(new_v) = &new_v {
            batch.put(keyschema::sidx_key(&desc.table, column, new_v, &cur.pk).as_bytes(), b"");
        }
        Ok(())
    }

    fn diff_ttl(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let column = desc.column();
        let old_ts = prev.and_then(|e| e.field_path(column)).and_then(|v| v.as_f64()).map(|f| f as i64);
        let new_ts = cur.field_path(column).and_then(|v| v.as_f64()).map(|f| f as i64);
        if old_ts == new_ts {
            return Ok(());
        }
        if let Some(old_ts) = old_ts {
            batch.delete(keyschema::ttlidx_key(&desc.table, column, old_ts, &cur.pk).as_bytes());
        }
        if let Some(new_ts) = new_ts {
            batch.put(keyschema::ttlidx_key(&desc.table, column, new_ts, &cur.pk).as_bytes(), b"");
        }
        Ok(())
    }

    fn diff_composite(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let cols: Vec<&str> = desc.columns.iter().map(|s| s.as_str()).collect();
        let old_vals: Option<Vec<String>> = prev.map(|e| cols.iter().map(|c| Self::field_str(e, c).unwrap_or_default()).collect());
        let new_vals: Vec<String> = cols.iter().map(|c| Self::field_str(cur, c).unwrap_or_default()).collect();
        if old_vals.as_ref() == Some(&new_vals) {
            return Ok(());
        }
        if let Some(old_vals) = &old_vals {
            let refs: Vec<&str> = old_vals.iter().map(|s| s.as_str()).collect();
            batch.delete(keyschema::composite_idx_key(&desc.table, &cols, &refs, &cur.pk).as_bytes());
        }
        let refs: Vec<&str> = new_vals.iter().map(|s| s.as_str()).collect();
        if desc.unique {
            self.check_unique_composite(&desc.table, &cols, &refs, &cur.pk)?;
        }
        batch.put(keyschema::composite_idx_key(&desc.table, &cols, &refs, &cur.pk).as_bytes(), b"");
        Ok(())
    }

    fn check_unique_composite(&self, table: &str, columns: &[&str], values: &[&str], pk: &str) -> Result<()> {
        let prefix = keyschema::composite_idx_key(table, columns, values, "");
        let mut conflict = false;
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, _| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if let Some(existing_pk) = parts.last() {
                if existing_pk != pk {
                    conflict = true;
                }
            }
            !conflict
        })?;
        if conflict {
            return Err(Error::unique_violation(format!(
                "{}.{:?} = {:?} already indexed",
                table, columns, values
            )));
        }
        Ok(())
    }

    fn tokenize(&self, desc: &IndexDescriptor, text: &str) -> Vec<String> {
        match &desc.params.fulltext_analyzer {
            Some(_) | None => self.registry.fulltext_analyzer.analyze(text),
        }
    }

    fn token_multiset(&self, desc: &IndexDescriptor, entity: &Entity) -> HashMap<String, Vec<u32>> {
        let column = desc.column();
        let mut map: HashMap<String, Vec<u32>> = HashMap::new();
        if let Some(Value::Str(text)) = entity.field(column) {
            for (pos, tok) in self.tokenize(desc, text).into_iter().enumerate() {
                map.entry(tok).or_default().push(pos as u32);
            }
        }
        map
    }

    fn diff_fulltext(&self, desc: &IndexDescriptor, prev: Option<&Entity>, cur: &Entity, batch: &mut dyn Batch) -> Result<()> {
        let column = desc.column();
        let old_tokens = prev.map(|e| self.token_multiset(desc, e)).unwrap_or_default();
        let new_tokens = self.token_multiset(desc, cur);
        if old_tokens.is_empty() && new_tokens.is_empty() {
            return Ok(());
        }

        let old_len: u32 = old_tokens.values().map(|p| p.len() as u32).sum();
        let new_len: u32 = new_tokens.values().map(|p| p.len() as u32).sum();

        for (token, _) in &old_tokens {
            if !new_tokens.contains_key(token) {
                batch.delete(keyschema::ftidx_key(&desc.table, column, token, &cur.pk).as_bytes());
            }
        }
        for (token, positions) in &new_tokens {
            let posting = Posting { tf: positions.len() as u32, doc_len: new_len, positions: positions.clone() };
            let val = serde_json::to_vec(&posting)?;
            batch.put(keyschema::ftidx_key(&desc.table, column, token, &cur.pk).as_bytes(), &val);
        }

        let agg_key = keyschema::ftagg_key(&desc.table, column);
        let mut agg: FulltextAgg = self
            .store
            .get(agg_key.as_bytes())?
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();
        let had_doc = !old_tokens.is_empty();
        let has_doc = !new_tokens.is_empty();
        match (had_doc, has_doc) {
            (false, true) => {
                agg.doc_count += 1;
                agg.total_len += new_len as u64;
            }
            (true, false) => {
                agg.doc_count = agg.doc_count.saturating_sub(1);
                agg.total_len = agg.total_len.saturating_sub(old_len as u64);
            }
            (true, true) => {
                agg.total_len = agg.total_len.saturating_sub(old_len as u64) + new_len as u64;
            }
            (false, false) => {}
        }
        batch.put(agg_key.as_bytes(), &serde_json::to_vec(&agg)?);
        Ok(())
    }

    // ---- scans -----------------------------------------------------------

    pub fn scan_keys_equal(&self, table: &str, column: &str, value: &str, limit: Option<usize>) -> Result<Vec<String>> {
        let prefix = keyschema::idx_key(table, column, value, "");
        let mut out = Vec::new();
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, _| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if let Some(pk) = parts.last() {
                out.push(pk.clone());
            }
            limit.map(|l| out.len() < l).unwrap_or(true)
        })?;
        Ok(out)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn scan_keys_range(
        &self,
        table: &str,
        column: &str,
        lower: Bound,
        upper: Bound,
        limit: Option<usize>,
        reversed: bool,
    ) -> Result<Vec<(String, String)>> {
        let prefix = keyschema::ridx_prefix(table, column);
        let lo = match lower.value {
            Some(v) => keyschema::ridx_value_prefix(table, column, v),
            None => prefix.clone(),
        };
        let hi = match upper.value {
            Some(v) => format!("{}\u{10ffff}", keyschema::ridx_value_prefix(table, column, v)),
            None => format!("{}\u{10ffff}", prefix),
        };
        let mut out = Vec::new();
        self.store.scan_range(lo.as_bytes(), hi.as_bytes(), reversed, &mut |k, _| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if parts.len() < 4 {
                return true;
            }
            let value = parts[2].clone();
            let pk = parts[3].clone();
            if let Some(lv) = lower.value {
                if value.as_str() < lv || (value.as_str() == lv && !lower.inclusive) {
                    return true;
                }
            }
            if let Some(uv) = upper.value {
                if value.as_str() > uv || (value.as_str() == uv && !upper.inclusive) {
                    return true;
                }
            }
            out.push((value, pk));
            limit.map(|l| out.len() < l).unwrap_or(true)
        })?;
        Ok(out)
    }

    /// Cursor-paged variant: starts strictly after `(anchor_value, anchor_pk)`
    /// in the scan direction (`spec.md` §4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn scan_keys_range_anchored(
        &self,
        table: &str,
        column: &str,
        lower: Bound,
        upper: Bound,
        anchor: Option<(&str, &str)>,
        limit: Option<usize>,
        reversed: bool,
    ) -> Result<Vec<(String, String)>> {
        let rows = self.scan_keys_range(table, column, lower, upper, None, reversed)?;
        let start = match anchor {
            Some((av, apk)) => rows
                .iter()
                .position(|(v, pk)| {
                    if reversed {
                        (v.as_str(), pk.as_str()) < (av, apk)
                    } else {
                        (v.as_str(), pk.as_str()) > (av, apk)
                    }
                })
                .unwrap_or(rows.len()),
            None => 0,
        };
        let mut out: Vec<(String, String)> = rows[start..].to_vec();
        if let Some(l) = limit {
            out.truncate(l);
        }
        Ok(out)
    }

    pub fn scan_fulltext(&self, table: &str, column: &str, query: &str, limit: Option<usize>) -> Result<Vec<String>> {
        Ok(self
            .scan_fulltext_with_scores(table, column, query, limit)?
            .into_iter()
            .map(|(pk, _)| pk)
            .collect())
    }

    /// BM25 AND-semantics over all query tokens, sorted score descending
    /// (`spec.md` §4.3). A quoted phrase enforces position adjacency.
    pub fn scan_fulltext_with_scores(&self, table: &str, column: &str, query: &str, limit: Option<usize>) -> Result<Vec<(String, f64)>> {
        let phrase = query.trim().starts_with('"') && query.trim().ends_with('"');
        let clean = query.trim().trim_matches('"');
        let analyzer = &self.registry.fulltext_analyzer;
        let tokens = analyzer.analyze(clean);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let agg_key = keyschema::ftagg_key(table, column);
        let agg: FulltextAgg = self
            .store
            .get(agg_key.as_bytes())?
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();

        let mut per_token: Vec<HashMap<String, Posting>> = Vec::new();
        for tok in &tokens {
            let prefix = keyschema::ftidx_prefix(table, column, tok);
            let mut postings = HashMap::new();
            self.store.scan_prefix(prefix.as_bytes(), &mut |k, v| {
                let parts = keyschema::split_key(&String::from_utf8_lossy(k));
                if let Some(pk) = parts.last() {
                    if let Ok(p) = serde_json::from_slice::<Posting>(v) {
                        postings.insert(pk.clone(), p);
                    }
                }
                true
            })?;
            per_token.push(postings);
        }

        // AND semantics: candidate docs must appear under every token.
        let mut candidates: Vec<String> = per_token[0].keys().cloned().collect();
        for postings in &per_token[1..] {
            candidates.retain(|pk| postings.contains_key(pk));
        }

        if phrase && tokens.len() > 1 {
            candidates.retain(|pk| {
                let first = &per_token[0][pk];
                first.positions.iter().any(|&start| {
                    (1..tokens.len()).all(|i| per_token[i][pk].positions.contains(&(start + i as u32)))
                })
            });
        }

        let n = agg.doc_count.max(1) as f64;
        let avg_len = agg.avg_doc_len().max(1.0);
        let mut scored: Vec<(String, f64)> = candidates
            .into_iter()
            .map(|pk| {
                let score: f64 = per_token
                    .iter()
                    .map(|postings| {
                        let p = &postings[&pk];
                        bm25_term_score(n, postings.len() as f64, p.tf as f64, p.doc_len as f64, avg_len, self.bm25_k1, self.bm25_b)
                    })
                    .sum();
                (pk, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(l) = limit {
            scored.truncate(l);
        }
        Ok(scored)
    }

    /// Probes up to `max_probe` entries; `capped` is true if the probe
    /// saturated without exhausting the true count (`spec.md` §4.3).
    pub fn estimate_count_equal(&self, table: &str, column: &str, value: &str, max_probe: usize) -> Result<(usize, bool)> {
        let prefix = keyschema::idx_key(table, column, value, "");
        let mut count = 0usize;
        let mut capped = false;
        self.store.scan_prefix(prefix.as_bytes(), &mut |_, _| {
            count += 1;
            if count >= max_probe {
                capped = true;
                false
            } else {
                true
            }
        })?;
        Ok((count, capped))
    }

    /// Background TTL purge: erases `(expire <= now)` entries up to
    /// `budget` per invocation (`spec.md` §4.3).
    pub fn ttl_cleanup(&self, table: &str, column: &str, now: i64, budget: usize) -> Result<usize> {
        let prefix = keyschema::ttlidx_prefix(table, column);
        let mut expired: Vec<(i64, String)> = Vec::new();
        self.store.scan_prefix(prefix.as_bytes(), &mut |k, _| {
            let parts = keyschema::split_key(&String::from_utf8_lossy(k));
            if parts.len() >= 4 {
                if let Ok(ts) = parts[2].parse::<i64>() {
                    if ts <= now {
                        expired.push((ts, parts[3].clone()));
                    }
                }
            }
            expired.len() < budget
        })?;
        let mut erased = 0;
        for (_, pk) in expired {
            self.erase(table, &pk)?;
            erased += 1;
        }
        Ok(erased)
    }

    /// Rescans the primary prefix of `table` and regenerates entries for
    /// one index, deleting stale entries first (`spec.md` §4.3). `progress`
    /// may return `false` to abort.
    pub fn rebuild(&self, table: &str, columns: &[&str], kind: IndexKind, mut progress: impl FnMut(u64) -> bool) -> Result<u64> {
        self.drop_index(table, columns, kind)?;
        let desc = self
            .catalog
            .get(table, &columns.iter().map(|s| s.to_string()).collect::<Vec<_>>(), kind)
            .ok_or_else(|| Error::not_found(format!("no descriptor for {}.{:?}", table, columns)))?;
        self.create_index(table, columns, kind, desc.unique, desc.params)?;

        let table_prefix = format!("{}:", keyschema::encode_component(table));
        let mut processed: u64 = 0;
        let mut aborted = false;
        let mut batch = self.store.open_write_batch();
        self.store.scan_prefix(table_prefix.as_bytes(), &mut |_, v| {
            if let Ok(entity) = bincode::deserialize::<Entity>(v) {
                let _ = match kind {
                    IndexKind::Equality => self.diff_equality(&desc, None, &entity, batch.as_mut()),
                    IndexKind::RangeOrdered => self.diff_range(&desc, None, &entity, batch.as_mut()),
                    IndexKind::Sparse => self.diff_sparse(&desc, None, &entity, batch.as_mut()),
                    IndexKind::TTL => self.diff_ttl(&desc, None, &entity, batch.as_mut()),
                    IndexKind::Composite => self.diff_composite(&desc, None, &entity, batch.as_mut()),
                    IndexKind::Fulltext => self.diff_fulltext(&desc, None, &entity, batch.as_mut()),
                    IndexKind::Spatial | IndexKind::Graph | IndexKind::VectorANN => Ok(()),
                };
                processed += 1;
            }
            if !progress(processed) {
                aborted = true;
                false
            } else {
                true
            }
        })?;
        batch.commit().map_err(|e| Error::new(ErrorKind::StoreError, e.to_string()))?;
        if aborted {
            return Err(Error::cancelled());
        }
        Ok(processed)
    }
}

fn bm25_term_score(n: f64, df: f64, tf: f64, doc_len: f64, avg_len: f64, k1: f64, b: f64) -> f64 {
    let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
    let norm = tf * (k1 + 1.0) / (tf + k1 * (1.0 - b + b * doc_len / avg_len));
    idf * norm
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memstore::MemStore;

    fn engine() -> SecondaryIndexEngine {
        let store = Arc::new(MemStore::new());
        let catalog = Arc::new(IndexCatalog::new(store.clone()));
        SecondaryIndexEngine::new(store, catalog, Registry::default())
    }

    fn user(pk: &str, city: &str, age: i64) -> Entity {
        Entity::new("users", pk).with_field("city", Value::Str(city.to_string())).with_field("age", Value::I64(age))
    }

    #[test]
    fn equality_index_scan_matches_put() {
        let eng = engine();
        eng.create_equality_index("users", "city", false).unwrap();
        eng.put("users", &user("u1", "Berlin", 25)).unwrap();
        eng.put("users", &user("u2", "Berlin", 30)).unwrap();
        eng.put("users", &user("u3", "Munich", 40)).unwrap();
        let mut got = eng.scan_keys_equal("users", "city", &Value::Str("Berlin".into()).encode_sortable(), None).unwrap();
        got.sort();
        assert_eq!(got, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[test]
    fn unique_violation_rejects_duplicate() {
        let eng = engine();
        eng.create_equality_index("users", "city", true).unwrap();
        eng.put("users", &user("u1", "Berlin", 25)).unwrap();
        let mut e2 = user("u2", "Berlin", 1);
        e2.pk = "u2".into();
        let err = eng.put("users", &e2);
        assert!(err.is_err());
    }

    #[test]
    fn erase_removes_index_entries() {
        let eng = engine();
        eng.create_equality_index("users", "city", false).unwrap();
        eng.put("users", &user("u1", "Berlin", 25)).unwrap();
        eng.erase("users", "u1").unwrap();
        let got = eng.scan_keys_equal("users", "city", &Value::Str("Berlin".into()).encode_sortable(), None).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn fulltext_and_semantics_and_bm25_ranking() {
        let eng = engine();
        eng.create_fulltext_index("articles", "content", None).unwrap();
        let articles = [
            ("art1", "Machine learning and deep neural networks"),
            ("art2", "Deep learning for computer vision"),
            ("art3", "Neural network optimization techniques"),
            ("art4", "The quick brown fox jumps"),
        ];
        for (pk, text) in articles {
            eng.put("articles", &Entity::new("articles", pk).with_field("content", Value::Str(text.to_string()))).unwrap();
        }
        let results = eng.scan_fulltext_with_scores("articles", "content", "deep learning", None).unwrap();
        let pks: Vec<&str> = results.iter().map(|(pk, _)| pk.as_str()).collect();
        assert!(pks.contains(&"art1"));
        assert!(pks.contains(&"art2"));
        assert!(!pks.contains(&"art3"));
        assert!(!pks.contains(&"art4"));
    }

    #[test]
    fn sparse_index_skips_null_values() {
        let eng = engine();
        eng.create_sparse_index("users", "nickname").unwrap();
        let e = Entity::new("users", "u1").with_field("nickname", Value::Null);
        eng.put("users", &e).unwrap();
        let count = eng.estimate_count_equal("users", "nickname", "", 10).unwrap();
        assert_eq!(count.0, 0);
    }
}
