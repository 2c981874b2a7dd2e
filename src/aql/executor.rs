//! Execution Engine (`spec.md` §4.10): turns a `Plan` into result rows.
//! Dispatches on plan family, materializes entities in parallel batches once
//! a candidate set crosses `Config::materialize_parallel_threshold`, and
//! checks `ExecutionContext` at every suspension point enumerated in
//! `spec.md` §5. Grounded on `src/query/executor.rs`'s stateless, index-first
//! evaluation style and `src/parallel/mod.rs`'s batch-parallel fan-out.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rayon::prelude::*;
use serde_json::Value as JsonValue;

use crate::aql::ast::{AggregateFn, BinOp, Expression, GraphDirection, Literal, SortDirection, UnOp};
use crate::aql::optimizer::{self, VectorGeoPlanChoice, VectorGeoPlanInputs};
use crate::aql::plan::{CmpOp, CollectSpec, ConjunctiveQuery, ContentGeoQuery, DisjunctiveQuery, JoinQuery, Plan, TraversalQuery, VectorGeoQuery};
use crate::catalog::IndexKind;
use crate::core::cancel::ExecutionContext;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::registry::{distance as vector_distance, Metric, Registry};
use crate::core::types::{Entity, Value};
use crate::index::graph::{GraphIndex, TraversalDirection};
use crate::index::secondary::{Bound, SecondaryIndexEngine};
use crate::index::spatial::SpatialIndex;
use crate::index::vector::VectorIndex;
use crate::keyschema;
use crate::store::KvStore;

/// Converts a literal AST expression into the same sortable encoding the
/// secondary index keys use, so the optimizer and executor probe/scan with
/// exactly what was written at index-maintenance time. Non-literal
/// expressions (subqueries, field access used as a value) can't be
/// estimated or probed this way and return `None`.
pub fn literal_sortable(expr: &Expression) -> Option<String> {
    let value = match expr {
        Expression::Literal(Literal::Null) => Value::Null,
        Expression::Literal(Literal::Bool(b)) => Value::Bool(*b),
        Expression::Literal(Literal::Int(i)) => Value::I64(*i),
        Expression::Literal(Literal::Float(f)) => Value::F64(*f),
        Expression::Literal(Literal::Str(s)) => Value::Str(s.clone()),
        _ => return None,
    };
    Some(value.encode_sortable())
}

/// Executes AQL plans against the index subsystems and primary store. One
/// instance is shared read-only across concurrent queries.
pub struct Executor {
    store: Arc<dyn KvStore>,
    secondary: Arc<SecondaryIndexEngine>,
    spatial: HashMap<String, Arc<SpatialIndex>>,
    vector: HashMap<(String, String), Arc<VectorIndex>>,
    graph: Option<Arc<GraphIndex>>,
    #[allow(dead_code)]
    registry: Registry,
    config: Config,
}

impl Executor {
    pub fn new(
        store: Arc<dyn KvStore>,
        secondary: Arc<SecondaryIndexEngine>,
        spatial: HashMap<String, Arc<SpatialIndex>>,
        vector: HashMap<(String, String), Arc<VectorIndex>>,
        graph: Option<Arc<GraphIndex>>,
        registry: Registry,
        config: Config,
    ) -> Self {
        Executor { store, secondary, spatial, vector, graph, registry, config }
    }

    pub fn execute(&self, plan: &Plan, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        ctx.check()?;
        match plan {
            Plan::Conjunctive(cq) => self.execute_conjunctive(cq, ctx),
            Plan::Disjunctive(dq) => self.execute_disjunctive(dq, ctx),
            Plan::Join(jq) => self.execute_join(jq, ctx),
            Plan::Traversal(tq) => self.execute_traversal(tq, ctx),
            Plan::VectorGeo(vq) => self.execute_vector_geo(vq, ctx),
            Plan::ContentGeo(cgq) => self.execute_content_geo(cgq, ctx),
            Plan::WithCte { ctes, main } => self.execute_with_cte(ctes, main, ctx),
        }
    }

    /// `WITH name AS (subquery) ...` (`spec.md` §4.17): each CTE runs once,
    /// uncorrelated, and its rows are held as a virtual table keyed by
    /// binding name. When the main plan's source is one of those names
    /// (the common case — a conjunctive/disjunctive FOR over the CTE), its
    /// predicates are evaluated directly against the materialized rows
    /// rather than routed through the physical store, since a CTE has no
    /// registered secondary index. Any other plan shape that names a CTE
    /// falls through to ordinary execution against the physical store.
    fn execute_with_cte(&self, ctes: &[(String, Box<Plan>)], main: &Plan, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let mut tables: HashMap<&str, Vec<JsonValue>> = HashMap::new();
        for (name, plan) in ctes {
            ctx.check()?;
            tables.insert(name.as_str(), self.execute(plan, ctx)?);
        }
        match main {
            Plan::Conjunctive(cq) if tables.contains_key(cq.table.as_str()) => {
                self.execute_conjunctive_over_rows(cq, &tables[cq.table.as_str()], ctx)
            }
            Plan::Disjunctive(dq) if tables.contains_key(dq.table.as_str()) => {
                let rows = &tables[dq.table.as_str()];
                let mut merged: Vec<JsonValue> = Vec::new();
                let mut seen = HashSet::new();
                for block in &dq.blocks {
                    ctx.check()?;
                    for row in self.filter_rows(block, rows)? {
                        if seen.insert(row.to_string()) {
                            merged.push(row);
                        }
                    }
                }
                self.finish_rows_from_json(merged, &dq.var, dq.blocks.first().and_then(|b| b.order_by.as_ref()), dq.limit, dq.distinct, dq.returns.as_ref(), ctx)
            }
            other => self.execute(other, ctx),
        }
    }

    /// Applies a `ConjunctiveQuery`'s eq/range/post_filter predicates to
    /// already-materialized rows (no fulltext: a CTE carries no fulltext
    /// index, so a FULLTEXT predicate over one is a plan error).
    fn execute_conjunctive_over_rows(&self, cq: &ConjunctiveQuery, rows: &[JsonValue], ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        if cq.fulltext.is_some() {
            return Err(Error::plan("FULLTEXT predicates are not supported over a WITH-bound CTE"));
        }
        let entities = self.filter_rows(cq, rows)?;
        self.finish_rows_from_json(entities, &cq.var, cq.order_by.as_ref(), cq.limit, cq.distinct, cq.returns.as_ref(), ctx)
    }

    fn filter_rows(&self, cq: &ConjunctiveQuery, rows: &[JsonValue]) -> Result<Vec<JsonValue>> {
        // No `ctx.check()` per row: CTE rows are already materialized and bounded
        // by the pre-pass's own cancellation checks.
        let empty_env = HashMap::new();
        let mut out = Vec::new();
        for row in rows {
            let field = |column: &str| row.as_object().and_then(|m| m.get(column)).cloned().unwrap_or(JsonValue::Null);
            let eq_ok = cq.eq.iter().all(|p| compare_json(&field(&p.column), &eval(&p.value, &empty_env)) == std::cmp::Ordering::Equal);
            let range_ok = cq.range.iter().all(|p| {
                let cmp = compare_json(&field(&p.column), &eval(&p.value, &empty_env));
                match p.op {
                    CmpOp::Eq => cmp == std::cmp::Ordering::Equal,
                    CmpOp::Lt => cmp == std::cmp::Ordering::Less,
                    CmpOp::Lte => cmp != std::cmp::Ordering::Greater,
                    CmpOp::Gt => cmp == std::cmp::Ordering::Greater,
                    CmpOp::Gte => cmp != std::cmp::Ordering::Less,
                }
            });
            if !eq_ok || !range_ok {
                continue;
            }
            let env = env_for(&cq.var, row.clone());
            if cq.post_filter.iter().all(|f| json_truthy(&eval(f, &env))) {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    /// `finish_rows`'s counterpart for rows that are already `JsonValue`
    /// objects rather than `Entity`s (a CTE's output), sorting/limiting/
    /// projecting the same way.
    #[allow(clippy::too_many_arguments)]
    fn finish_rows_from_json(
        &self,
        mut rows: Vec<JsonValue>,
        var: &str,
        order_by: Option<&crate::aql::plan::OrderBy>,
        limit: Option<(Option<u64>, u64)>,
        distinct: bool,
        returns: Option<&Expression>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<JsonValue>> {
        if let Some(ob) = order_by {
            rows.sort_by(|a, b| {
                let cmp = compare_json(
                    &a.as_object().and_then(|m| m.get(&ob.column)).cloned().unwrap_or(JsonValue::Null),
                    &b.as_object().and_then(|m| m.get(&ob.column)).cloned().unwrap_or(JsonValue::Null),
                );
                if matches!(ob.direction, SortDirection::Desc) { cmp.reverse() } else { cmp }
            });
        }
        if let Some((offset, count)) = limit {
            let off = offset.unwrap_or(0) as usize;
            rows = rows.into_iter().skip(off).take(count as usize).collect();
        }
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            ctx.check()?;
            out.push(match returns {
                Some(expr) => eval(expr, &env_for(var, row)),
                None => row,
            });
        }
        if distinct {
            dedup_json_rows(&mut out);
        }
        Ok(out)
    }

    // ---- conjunctive / disjunctive --------------------------------------

    fn execute_conjunctive(&self, cq: &ConjunctiveQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let mut keys = self.execute_and_keys(cq, ctx)?;
        keys.sort();
        keys.dedup();
        let mut entities = self.materialize(&cq.table, &keys, ctx)?;
        if !cq.post_filter.is_empty() {
            entities.retain(|e| {
                let env = env_for(&cq.var, entity_to_json(e));
                cq.post_filter.iter().all(|f| json_truthy(&eval(f, &env)))
            });
        }
        self.finish_rows(entities, &cq.var, cq.order_by.as_ref(), cq.limit, cq.distinct, cq.returns.as_ref(), ctx)
    }

    fn execute_disjunctive(&self, dq: &DisjunctiveQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let mut merged: HashMap<String, Entity> = HashMap::new();
        for block in &dq.blocks {
            ctx.check()?;
            let keys = self.execute_and_keys(block, ctx)?;
            let entities = self.materialize(&dq.table, &keys, ctx)?;
            for e in entities {
                let env = env_for(&block.var, entity_to_json(&e));
                if block.post_filter.iter().all(|f| json_truthy(&eval(f, &env))) {
                    merged.entry(e.pk.clone()).or_insert(e);
                }
            }
        }
        let entities: Vec<Entity> = merged.into_values().collect();
        let order_by = dq.blocks.first().and_then(|b| b.order_by.as_ref());
        self.finish_rows(entities, &dq.var, order_by, dq.limit, dq.distinct, dq.returns.as_ref(), ctx)
    }

    /// `execute_and_keys` (`spec.md` §4.10): fulltext-first when a fulltext
    /// predicate is present, range-aware when a range predicate or ORDER BY
    /// exists, otherwise per-equality-predicate intersection ordered by the
    /// optimizer with early exit once any set empties out.
    fn execute_and_keys(&self, cq: &ConjunctiveQuery, ctx: &ExecutionContext) -> Result<Vec<String>> {
        ctx.check()?;
        if let Some(ft) = &cq.fulltext {
            let query_str = literal_str(&ft.query).unwrap_or_default();
            let mut keys = self.secondary.scan_fulltext(&cq.table, &ft.column, &query_str, None)?;
            keys.sort();
            if !cq.eq.is_empty() || !cq.range.is_empty() {
                let other = self.range_aware_keys(cq, ctx)?;
                keys = intersect_sorted(&keys, &other);
            }
            return Ok(keys);
        }

        if !cq.range.is_empty() || cq.order_by.is_some() {
            return self.range_aware_keys(cq, ctx);
        }

        if cq.eq.is_empty() {
            return self.full_scan_keys(&cq.table, ctx);
        }

        let order = optimizer::choose_order_for_and_query(&self.secondary, cq, 10_000)?;
        let mut result: Option<Vec<String>> = None;
        for idx in order {
            ctx.check()?;
            let pred = &cq.eq[idx];
            let value = literal_sortable(&pred.value).unwrap_or_default();
            let mut keys = self.secondary.scan_keys_equal(&cq.table, &pred.column, &value, None)?;
            keys.sort();
            let next = match result {
                None => keys,
                Some(prev) => intersect_sorted(&prev, &keys),
            };
            let empty = next.is_empty();
            result = Some(next);
            if empty {
                break;
            }
        }
        Ok(result.unwrap_or_default())
    }

    /// Intersects every equality predicate's key set with every range
    /// predicate's (grouped by column, `scan_keys_range` bound), then feeds
    /// that membership set through `scan_keys_range_anchored` on the ORDER BY
    /// column when one is present so results come back pre-sorted.
    fn range_aware_keys(&self, cq: &ConjunctiveQuery, ctx: &ExecutionContext) -> Result<Vec<String>> {
        ctx.check()?;
        let mut sets: Vec<Vec<String>> = Vec::new();
        for pred in &cq.eq {
            let value = literal_sortable(&pred.value).unwrap_or_default();
            let mut keys = self.secondary.scan_keys_equal(&cq.table, &pred.column, &value, None)?;
            keys.sort();
            sets.push(keys);
        }

        let mut by_column: HashMap<String, (Option<(String, bool)>, Option<(String, bool)>)> = HashMap::new();
        for pred in &cq.range {
            let value = literal_sortable(&pred.value).unwrap_or_default();
            let entry = by_column.entry(pred.column.clone()).or_default();
            match pred.op {
                CmpOp::Gt => entry.0 = Some((value, false)),
                CmpOp::Gte => entry.0 = Some((value, true)),
                CmpOp::Lt => entry.1 = Some((value, false)),
                CmpOp::Lte => entry.1 = Some((value, true)),
                CmpOp::Eq => {}
            }
        }
        for (column, (lo, hi)) in &by_column {
            let lower = Bound { value: lo.as_ref().map(|(v, _)| v.as_str()), inclusive: lo.as_ref().map(|(_, i)| *i).unwrap_or(true) };
            let upper = Bound { value: hi.as_ref().map(|(v, _)| v.as_str()), inclusive: hi.as_ref().map(|(_, i)| *i).unwrap_or(true) };
            let rows = self.secondary.scan_keys_range(&cq.table, column, lower, upper, None, false)?;
            let mut keys: Vec<String> = rows.into_iter().map(|(_, pk)| pk).collect();
            keys.sort();
            sets.push(keys);
        }

        let membership: Option<Vec<String>> = if sets.is_empty() {
            None
        } else {
            let mut iter = sets.into_iter();
            let first = iter.next().unwrap_or_default();
            Some(iter.fold(first, |acc, s| intersect_sorted(&acc, &s)))
        };

        let Some(ob) = &cq.order_by else {
            return Ok(membership.unwrap_or_default());
        };

        let reversed = matches!(ob.direction, SortDirection::Desc);
        let no_bound = Bound { value: None, inclusive: true };
        let rows = self.secondary.scan_keys_range(&cq.table, &ob.column, no_bound, no_bound, None, reversed)?;
        let mut keys: Vec<String> = rows.into_iter().map(|(_, pk)| pk).collect();
        if let Some(mem) = &membership {
            let mem_set: HashSet<&String> = mem.iter().collect();
            keys.retain(|pk| mem_set.contains(pk));
        }
        Ok(keys)
    }

    fn full_scan_keys(&self, table: &str, ctx: &ExecutionContext) -> Result<Vec<String>> {
        ctx.check()?;
        let prefix = format!("{}:", keyschema::encode_component(table));
        let mut keys = Vec::new();
        let mut check_err: Option<Error> = None;
        self.store.scan_prefix(prefix.as_bytes(), &mut |_, v| {
            if ctx.check().is_err() {
                check_err = Some(Error::cancelled());
                return false;
            }
            if let Ok(entity) = bincode::deserialize::<Entity>(v) {
                keys.push(entity.pk);
            }
            true
        })?;
        if let Some(e) = check_err {
            return Err(e);
        }
        Ok(keys)
    }

    fn full_scan_entities(&self, table: &str, ctx: &ExecutionContext) -> Result<Vec<Entity>> {
        ctx.check()?;
        let prefix = format!("{}:", keyschema::encode_component(table));
        let mut entities = Vec::new();
        self.store.scan_prefix(prefix.as_bytes(), &mut |_, v| {
            if let Ok(entity) = bincode::deserialize::<Entity>(v) {
                entities.push(entity);
            }
            true
        })?;
        Ok(entities)
    }

    /// Entity materialization (`spec.md` §4.10): above
    /// `materialize_parallel_threshold` keys, loads them in
    /// `materialize_batch_size` chunks in parallel; below it, sequentially.
    fn materialize(&self, table: &str, pks: &[String], ctx: &ExecutionContext) -> Result<Vec<Entity>> {
        ctx.check()?;
        if pks.len() >= self.config.materialize_parallel_threshold {
            let chunks: Vec<&[String]> = pks.chunks(self.config.materialize_batch_size.max(1)).collect();
            let results: Vec<Result<Vec<Entity>>> = chunks
                .into_par_iter()
                .map(|chunk| chunk.iter().filter_map(|pk| self.fetch_entity(table, pk).transpose()).collect())
                .collect();
            let mut out = Vec::with_capacity(pks.len());
            for r in results {
                out.extend(r?);
            }
            Ok(out)
        } else {
            let mut out = Vec::with_capacity(pks.len());
            for pk in pks {
                ctx.check()?;
                if let Some(e) = self.fetch_entity(table, pk)? {
                    out.push(e);
                }
            }
            Ok(out)
        }
    }

    fn fetch_entity(&self, table: &str, pk: &str) -> Result<Option<Entity>> {
        let key = keyschema::entity_key(table, pk);
        match self.store.get(key.as_bytes())? {
            Some(blob) => Ok(Some(bincode::deserialize(&blob)?)),
            None => Ok(None),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish_rows(
        &self,
        mut entities: Vec<Entity>,
        var: &str,
        order_by: Option<&crate::aql::plan::OrderBy>,
        limit: Option<(Option<u64>, u64)>,
        distinct: bool,
        returns: Option<&Expression>,
        ctx: &ExecutionContext,
    ) -> Result<Vec<JsonValue>> {
        if let Some(ob) = order_by {
            entities.sort_by(|a, b| {
                let cmp = compare_opt_value(&a.field_path(&ob.column), &b.field_path(&ob.column));
                if matches!(ob.direction, SortDirection::Desc) { cmp.reverse() } else { cmp }
            });
        }
        if let Some((offset, count)) = limit {
            let off = offset.unwrap_or(0) as usize;
            entities = entities.into_iter().skip(off).take(count as usize).collect();
        }
        let mut rows = Vec::with_capacity(entities.len());
        for e in &entities {
            ctx.check()?;
            let env = env_for(var, entity_to_json(e));
            rows.push(match returns {
                Some(expr) => eval(expr, &env),
                None => entity_to_json(e),
            });
        }
        if distinct {
            dedup_json_rows(&mut rows);
        }
        Ok(rows)
    }

    // ---- join / let / collect --------------------------------------------

    fn execute_join(&self, jq: &JoinQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let mut extents: Vec<Vec<Entity>> = Vec::with_capacity(jq.fors.len());
        for f in &jq.fors {
            ctx.check()?;
            extents.push(self.full_scan_entities(&f.collection, ctx)?);
        }

        let mut frames: Vec<HashMap<String, JsonValue>> = Vec::new();
        self.join_rec(jq, &extents, 0, HashMap::new(), ctx, &mut frames)?;

        for frame in frames.iter_mut() {
            for (var, expr) in &jq.lets {
                let v = eval(expr, frame);
                frame.insert(var.clone(), v);
            }
        }
        frames.retain(|frame| jq.filters.iter().all(|f| json_truthy(&eval(f, frame))));

        let mut frames = match &jq.collect {
            Some(collect) => self.apply_collect(collect, &frames),
            None => frames,
        };

        if !jq.sort.is_empty() {
            frames.sort_by(|a, b| {
                for (expr, dir) in &jq.sort {
                    let ord = compare_json(&eval(expr, a), &eval(expr, b));
                    let ord = if matches!(dir, SortDirection::Desc) { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        if let Some((offset, count)) = jq.limit {
            let off = offset.unwrap_or(0) as usize;
            frames = frames.into_iter().skip(off).take(count as usize).collect();
        }

        let mut rows: Vec<JsonValue> = frames.iter().map(|f| eval(&jq.returns, f)).collect();
        if jq.distinct {
            dedup_json_rows(&mut rows);
        }
        Ok(rows)
    }

    /// Nested-loop join: binds one FOR variable per recursion level,
    /// applying any filter whose variables are all bound so far as soon as
    /// possible rather than waiting for the full cross product
    /// (`spec.md` §4.10, "JOIN").
    fn join_rec(
        &self,
        jq: &JoinQuery,
        extents: &[Vec<Entity>],
        depth: usize,
        env: HashMap<String, JsonValue>,
        ctx: &ExecutionContext,
        out: &mut Vec<HashMap<String, JsonValue>>,
    ) -> Result<()> {
        ctx.check()?;
        if depth == jq.fors.len() {
            out.push(env);
            return Ok(());
        }
        let var = &jq.fors[depth].var;
        let bound_vars: HashSet<&str> = jq.fors[..=depth].iter().map(|f| f.var.as_str()).collect();
        for entity in &extents[depth] {
            ctx.check()?;
            let mut child_env = env.clone();
            child_env.insert(var.clone(), entity_to_json(entity));
            let ready = jq.filters.iter().filter(|f| {
                let mut vars = HashSet::new();
                expr_vars(f, &mut vars);
                !vars.is_empty() && vars.iter().all(|v| bound_vars.contains(v.as_str()))
            });
            let passes = ready.clone().all(|f| json_truthy(&eval(f, &child_env)));
            if passes {
                self.join_rec(jq, extents, depth + 1, child_env, ctx, out)?;
            }
        }
        Ok(())
    }

    fn apply_collect(&self, collect: &CollectSpec, frames: &[HashMap<String, JsonValue>]) -> Vec<HashMap<String, JsonValue>> {
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (HashMap<String, JsonValue>, Vec<HashMap<String, JsonValue>>)> = HashMap::new();
        for frame in frames {
            let key_vals: Vec<JsonValue> = collect.groups.iter().map(|(_, e)| eval(e, frame)).collect();
            let key_str = serde_json::to_string(&key_vals).unwrap_or_default();
            if !groups.contains_key(&key_str) {
                order.push(key_str.clone());
                let mut bindings = HashMap::new();
                for (var, e) in &collect.groups {
                    bindings.insert(var.clone(), eval(e, frame));
                }
                groups.insert(key_str.clone(), (bindings, Vec::new()));
            }
            groups.get_mut(&key_str).unwrap().1.push(frame.clone());
        }
        order
            .into_iter()
            .filter_map(|key| groups.remove(&key))
            .map(|(mut bindings, members)| {
                for (var, agg_fn, expr) in &collect.aggregates {
                    let values: Vec<JsonValue> = members.iter().map(|m| eval(expr, m)).collect();
                    bindings.insert(var.clone(), apply_aggregate(*agg_fn, &values));
                }
                bindings
            })
            .collect()
    }

    // ---- graph traversal ---------------------------------------------------

    fn execute_traversal(&self, tq: &TraversalQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let graph = self.graph.as_ref().ok_or_else(|| Error::plan("no graph index registered"))?;
        let empty_env = HashMap::new();
        let start = eval(&tq.start, &empty_env)
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::plan("traversal start must evaluate to a vertex id string"))?;
        let direction = match tq.direction {
            GraphDirection::Outbound => TraversalDirection::Outbound,
            GraphDirection::Inbound => TraversalDirection::Inbound,
            GraphDirection::Any => TraversalDirection::Any,
        };

        let vertices: Vec<String> = if tq.shortest_path {
            let end = tq
                .end_vertex
                .as_ref()
                .map(|e| eval(e, &empty_env))
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .ok_or_else(|| Error::plan("SHORTEST_PATH TO requires an end vertex"))?;
            graph
                .shortest_path_directed(&start, &end, tq.max_depth as usize, direction)?
                .unwrap_or_default()
        } else {
            let all = graph.bfs_directed(&start, tq.max_depth as usize, direction)?;
            let min_depth = tq.min_depth as usize;
            if min_depth > 0 && min_depth <= all.len() { all[min_depth..].to_vec() } else { all }
        };

        let mut rows = Vec::new();
        for v in vertices {
            ctx.check()?;
            let mut env = HashMap::new();
            env.insert(tq.vertex_var.clone(), JsonValue::String(v));
            if tq.filters.iter().all(|f| json_truthy(&eval(f, &env))) {
                rows.push(eval(&tq.returns, &env));
            }
        }
        Ok(rows)
    }

    // ---- vector-geo hybrid --------------------------------------------------

    fn execute_vector_geo(&self, vq: &VectorGeoQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let empty_env = HashMap::new();
        let query_vec = json_to_vector(&eval(&vq.query_vector, &empty_env))
            .ok_or_else(|| Error::plan("SIMILARITY query must evaluate to a numeric array"))?;

        let vector_idx = self.vector.get(&(vq.table.clone(), vq.vector_field.clone()));
        let spatial_idx = self.spatial.get(&vq.table);
        let bbox = match &vq.spatial_bbox {
            Some(e) => json_to_mbr(&eval(e, &empty_env)),
            None => None,
        };

        let world = crate::geo::geometry::MBR::new(-180.0, -90.0, 180.0, 90.0);
        let bbox_ratio = bbox.map(|b| (b.area() / world.area().max(1e-9)).clamp(0.0, 1.0)).unwrap_or(1.0);
        let spatial_entries = match spatial_idx {
            Some(_) => self.spatial_entries_estimate(&vq.table)?,
            None => 0,
        };

        let prefilter = self.equality_prefilter(&vq.table, &vq.var, &vq.extra_filters)?;

        let choice = optimizer::choose_vector_geo_plan(VectorGeoPlanInputs {
            has_vector_index: vector_idx.is_some(),
            has_spatial_index: spatial_idx.is_some() && bbox.is_some(),
            bbox_ratio,
            prefilter_size: prefilter.as_ref().map(|p| p.len()),
            spatial_index_entries: spatial_entries,
            k: vq.k as usize,
            vector_dim: query_vec.len(),
            overfetch: self.config.vector_first_overfetch as usize,
        });

        let k = vq.k as usize;
        let pks: Vec<String> = match choice.plan {
            VectorGeoPlanChoice::VectorThenSpatial => {
                let vidx = vector_idx.ok_or_else(|| Error::plan("no vector index registered for hybrid query"))?;
                let overfetch = self.config.vector_first_overfetch.max(1) as usize;
                let hits = match &prefilter {
                    Some(candidates) => vidx.search_knn_pre_filtered(&query_vec, k * overfetch, candidates, &self.secondary)?,
                    None => vidx.search_knn(&query_vec, k * overfetch)?,
                };
                let mut out = Vec::new();
                for h in hits {
                    ctx.check()?;
                    if out.len() >= k {
                        break;
                    }
                    if let Some(entity) = self.fetch_entity(&vq.table, &h.pk)? {
                        if self.passes_geo_and_extra(&entity, vq, &bbox)? {
                            out.push(h.pk);
                        }
                    }
                }
                out
            }
            VectorGeoPlanChoice::SpatialThenVector => {
                let sidx = spatial_idx.ok_or_else(|| Error::plan("no spatial index registered for hybrid query"))?;
                let bbox = bbox.ok_or_else(|| Error::plan("spatial-first plan requires a bounding box filter"))?;
                let hits = sidx.search_intersects(&vq.table, &bbox)?;
                let mut scored: Vec<(String, f32)> = Vec::new();
                for h in hits {
                    ctx.check()?;
                    if let Some(entity) = self.fetch_entity(&vq.table, &h.pk)? {
                        if self.passes_extra(&entity, &vq.var, &vq.extra_filters) {
                            if let Some(v) = entity.field(&vq.vector_field).and_then(Value::as_vector) {
                                scored.push((h.pk.clone(), vector_distance(&query_vec, v, Metric::L2)));
                            }
                        }
                    }
                }
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(k);
                scored.into_iter().map(|(pk, _)| pk).collect()
            }
            VectorGeoPlanChoice::BruteForce => {
                let mut scored: Vec<(String, f32)> = Vec::new();
                for e in self.full_scan_entities(&vq.table, ctx)? {
                    ctx.check()?;
                    if self.passes_geo_and_extra(&e, vq, &bbox)? {
                        if let Some(v) = e.field(&vq.vector_field).and_then(Value::as_vector) {
                            scored.push((e.pk.clone(), vector_distance(&query_vec, v, Metric::L2)));
                        }
                    }
                }
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(k);
                scored.into_iter().map(|(pk, _)| pk).collect()
            }
        };

        let entities = self.materialize(&vq.table, &pks, ctx)?;
        let mut rows = Vec::with_capacity(entities.len());
        for e in &entities {
            let env = env_for(&vq.var, entity_to_json(e));
            rows.push(eval(&vq.returns, &env));
        }
        Ok(rows)
    }

    /// Looks for an `extra_filters` predicate of the shape `var.column == literal`
    /// where `column` carries an equality index, and if found, resolves it to
    /// the candidate primary keys up front. Feeds both the optimizer's
    /// prefilter-size discount and `VectorIndex::search_knn_pre_filtered`
    /// (`spec.md` §4.9): the first equality predicate that resolves to an
    /// index wins, matching `choose_order_for_and_query`'s single-pass style.
    fn equality_prefilter(&self, table: &str, var: &str, filters: &[Expression]) -> Result<Option<Vec<String>>> {
        for f in filters {
            let Expression::BinaryOp { op: BinOp::Eq, lhs, rhs } = f else { continue };
            let (field_expr, value_expr) = match (lhs.field_path(), rhs.field_path()) {
                (Some((root, path)), _) if root == var && path.len() == 1 => (path, rhs.as_ref()),
                (_, Some((root, path))) if root == var && path.len() == 1 => (path, lhs.as_ref()),
                _ => continue,
            };
            let column = &field_expr[0];
            if !self.secondary.has_index(table, column, IndexKind::Equality) {
                continue;
            }
            let Some(value) = literal_sortable(value_expr) else { continue };
            let pks = self.secondary.scan_keys_equal(table, column, &value, None)?;
            return Ok(Some(pks));
        }
        Ok(None)
    }

    fn passes_extra(&self, entity: &Entity, var: &str, filters: &[Expression]) -> bool {
        let env = env_for(var, entity_to_json(entity));
        filters.iter().all(|f| json_truthy(&eval(f, &env)))
    }

    fn passes_geo_and_extra(&self, entity: &Entity, vq: &VectorGeoQuery, bbox: &Option<crate::geo::geometry::MBR>) -> Result<bool> {
        if !self.passes_extra(entity, &vq.var, &vq.extra_filters) {
            return Ok(false);
        }
        if let Some(field) = &vq.spatial_field {
            let Some(sidecar) = entity_sidecar(entity, field) else { return Ok(false) };
            if let Some(b) = bbox {
                if !sidecar.mbr.intersects(b) {
                    return Ok(false);
                }
            }
            if let (Some(center_expr), Some(radius_expr)) = (&vq.dwithin_center, &vq.dwithin_radius_m) {
                let empty_env = HashMap::new();
                let center = json_to_point(&eval(center_expr, &empty_env));
                let radius = eval(radius_expr, &empty_env).as_f64();
                if let (Some((cx, cy)), Some(radius)) = (center, radius) {
                    let d = crate::geo::geometry::haversine_distance_m(cy, cx, sidecar.centroid.y, sidecar.centroid.x);
                    if d > radius {
                        return Ok(false);
                    }
                }
            }
        }
        Ok(true)
    }

    fn spatial_entries_estimate(&self, table: &str) -> Result<usize> {
        let prefix = keyschema::spatial_prefix(table);
        let mut count = 0usize;
        self.store.scan_prefix(prefix.as_bytes(), &mut |_, v| {
            if let Ok(entries) = serde_json::from_slice::<Vec<JsonValue>>(v) {
                count += entries.len();
            }
            true
        })?;
        Ok(count)
    }

    // ---- content-geo (PROXIMITY) hybrid ------------------------------------

    fn execute_content_geo(&self, cgq: &ContentGeoQuery, ctx: &ExecutionContext) -> Result<Vec<JsonValue>> {
        let empty_env = HashMap::new();
        let query_str = literal_str(&cgq.fulltext_query).unwrap_or_default();
        let center = json_to_point(&eval(&cgq.center, &empty_env)).ok_or_else(|| Error::plan("PROXIMITY center must evaluate to a point"))?;

        let hits = self.secondary.scan_fulltext_with_scores(&cgq.table, &cgq.text_field, &query_str, None)?;
        let bbox = match &cgq.spatial_bbox {
            Some(e) => json_to_mbr(&eval(e, &empty_env)),
            None => None,
        };

        let mut scored: Vec<(Entity, f64, f64)> = Vec::new();
        for (pk, score) in hits {
            ctx.check()?;
            let Some(entity) = self.fetch_entity(&cgq.table, &pk)? else { continue };
            if !self.passes_extra(&entity, &cgq.var, &cgq.extra_filters) {
                continue;
            }
            let Some(sidecar) = entity_sidecar(&entity, &cgq.geo_field) else { continue };
            if let Some(b) = &bbox {
                if !sidecar.mbr.intersects(b) {
                    continue;
                }
            }
            let dist = crate::geo::geometry::haversine_distance_m(center.1, center.0, sidecar.centroid.y, sidecar.centroid.x);
            scored.push((entity, dist, score));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal)));
        scored.truncate(cgq.k as usize);

        let mut rows = Vec::with_capacity(scored.len());
        for (entity, _, _) in &scored {
            let env = env_for(&cgq.var, entity_to_json(entity));
            rows.push(eval(&cgq.returns, &env));
        }
        Ok(rows)
    }
}

// ---- shared helpers --------------------------------------------------------

fn intersect_sorted(a: &[String], b: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(a[i].clone());
                i += 1;
                j += 1;
            }
        }
    }
    out
}

fn literal_str(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Literal(Literal::Str(s)) => Some(s.clone()),
        _ => eval(expr, &HashMap::new()).as_str().map(|s| s.to_string()),
    }
}

fn env_for(var: &str, value: JsonValue) -> HashMap<String, JsonValue> {
    let mut env = HashMap::new();
    env.insert(var.to_string(), value);
    env
}

pub fn entity_to_json(entity: &Entity) -> JsonValue {
    let mut map = serde_json::Map::with_capacity(entity.fields.len() + 1);
    map.insert("_key".to_string(), JsonValue::String(entity.pk.clone()));
    for (name, value) in &entity.fields {
        map.insert(name.clone(), value_to_json(value));
    }
    JsonValue::Object(map)
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::I64(i) => JsonValue::from(*i),
        Value::F64(f) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        Value::Str(s) => JsonValue::String(s.clone()),
        Value::Bytes(b) => JsonValue::String(crate::geo::to_wkt(&crate::geo::parse_ewkb(b).unwrap_or(crate::geo::Geometry::Point(crate::geo::Coordinate::new(0.0, 0.0))))),
        Value::Vector(v) => JsonValue::Array(v.iter().map(|f| serde_json::Number::from_f64(*f as f64).map(JsonValue::Number).unwrap_or(JsonValue::Null)).collect()),
        Value::Json(j) => j.clone(),
    }
}

fn entity_sidecar(entity: &Entity, field: &str) -> Option<crate::geo::geometry::Sidecar> {
    match entity.field(field) {
        Some(Value::Str(wkt_or_geojson)) => crate::geo::parse_wkt(wkt_or_geojson)
            .or_else(|_| crate::geo::parse_geojson(wkt_or_geojson))
            .ok()
            .map(|g| g.sidecar()),
        Some(Value::Bytes(b)) => crate::geo::parse_ewkb(b).ok().map(|g| g.sidecar()),
        _ => None,
    }
}

fn json_to_vector(v: &JsonValue) -> Option<Vec<f32>> {
    match v {
        JsonValue::Array(items) => Some(items.iter().filter_map(|x| x.as_f64()).map(|f| f as f32).collect()),
        _ => None,
    }
}

fn json_to_point(v: &JsonValue) -> Option<(f64, f64)> {
    match v {
        JsonValue::Array(items) if items.len() >= 2 => Some((items[0].as_f64()?, items[1].as_f64()?)),
        JsonValue::Object(map) => Some((map.get("x").and_then(|x| x.as_f64())?, map.get("y").and_then(|y| y.as_f64())?)),
        _ => None,
    }
}

fn json_to_mbr(v: &JsonValue) -> Option<crate::geo::geometry::MBR> {
    match v {
        JsonValue::Array(items) if items.len() >= 4 => Some(crate::geo::geometry::MBR::new(
            items[0].as_f64()?,
            items[1].as_f64()?,
            items[2].as_f64()?,
            items[3].as_f64()?,
        )),
        _ => None,
    }
}

fn json_truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(a) => !a.is_empty(),
        JsonValue::Object(o) => !o.is_empty(),
    }
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn compare_opt_value(a: &Option<Value>, b: &Option<Value>) -> std::cmp::Ordering {
    match (a, b) {
        (Some(x), Some(y)) => match (value_as_f64(x), value_as_f64(y)) {
            (Some(fx), Some(fy)) => fx.partial_cmp(&fy).unwrap_or(std::cmp::Ordering::Equal),
            _ => x.encode_sortable().cmp(&y.encode_sortable()),
        },
        (Some(_), None) => std::cmp::Ordering::Greater,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (None, None) => std::cmp::Ordering::Equal,
    }
}

fn compare_json(a: &JsonValue, b: &JsonValue) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => json_to_sort_string(a).cmp(&json_to_sort_string(b)),
    }
}

fn json_to_sort_string(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn dedup_json_rows(rows: &mut Vec<JsonValue>) {
    let mut seen = HashSet::new();
    rows.retain(|r| seen.insert(r.to_string()));
}

fn expr_vars(e: &Expression, out: &mut HashSet<String>) {
    match e {
        Expression::Variable(v) => {
            out.insert(v.clone());
        }
        Expression::FieldAccess { base, .. } => expr_vars(base, out),
        Expression::BinaryOp { lhs, rhs, .. } => {
            expr_vars(lhs, out);
            expr_vars(rhs, out);
        }
        Expression::UnaryOp { expr, .. } => expr_vars(expr, out),
        Expression::FunctionCall { args, .. } => args.iter().for_each(|a| expr_vars(a, out)),
        Expression::SimilarityCall { field, query, k } => {
            expr_vars(field, out);
            expr_vars(query, out);
            if let Some(k) = k {
                expr_vars(k, out);
            }
        }
        Expression::ProximityCall { field, center } => {
            expr_vars(field, out);
            expr_vars(center, out);
        }
        Expression::FulltextCall { field, query, k } => {
            expr_vars(field, out);
            expr_vars(query, out);
            if let Some(k) = k {
                expr_vars(k, out);
            }
        }
        Expression::ArrayLit(items) => items.iter().for_each(|i| expr_vars(i, out)),
        Expression::ObjectLit(fields) => fields.iter().for_each(|(_, v)| expr_vars(v, out)),
        Expression::Literal(_) | Expression::Subquery(_) => {}
    }
}

fn apply_aggregate(f: AggregateFn, values: &[JsonValue]) -> JsonValue {
    match f {
        AggregateFn::Count => JsonValue::from(values.len() as i64),
        AggregateFn::Sum => JsonValue::from(values.iter().filter_map(|v| v.as_f64()).sum::<f64>()),
        AggregateFn::Avg => {
            let nums: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();
            if nums.is_empty() {
                JsonValue::Null
            } else {
                JsonValue::from(nums.iter().sum::<f64>() / nums.len() as f64)
            }
        }
        AggregateFn::Min => values.iter().filter_map(|v| v.as_f64()).fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x)))).map(JsonValue::from).unwrap_or(JsonValue::Null),
        AggregateFn::Max => values.iter().filter_map(|v| v.as_f64()).fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x)))).map(JsonValue::from).unwrap_or(JsonValue::Null),
        AggregateFn::CollectIntoArray => JsonValue::Array(values.to_vec()),
    }
}

/// Expression evaluator (`spec.md` §4.10): arithmetic, string/spatial
/// builtins, undefined variables and div-by-zero both fold to `null` rather
/// than erroring, matching AQL's permissive semantics.
pub fn eval(expr: &Expression, env: &HashMap<String, JsonValue>) -> JsonValue {
    match expr {
        Expression::Literal(Literal::Null) => JsonValue::Null,
        Expression::Literal(Literal::Bool(b)) => JsonValue::Bool(*b),
        Expression::Literal(Literal::Int(i)) => JsonValue::from(*i),
        Expression::Literal(Literal::Float(f)) => serde_json::Number::from_f64(*f).map(JsonValue::Number).unwrap_or(JsonValue::Null),
        Expression::Literal(Literal::Str(s)) => JsonValue::String(s.clone()),
        Expression::Variable(v) => env.get(v).cloned().unwrap_or(JsonValue::Null),
        Expression::FieldAccess { base, path } => {
            let mut cur = eval(base, env);
            for seg in path {
                cur = match cur {
                    JsonValue::Object(ref map) => map.get(seg).cloned().unwrap_or(JsonValue::Null),
                    _ => JsonValue::Null,
                };
            }
            cur
        }
        Expression::UnaryOp { op, expr } => {
            let v = eval(expr, env);
            match op {
                UnOp::Not => JsonValue::Bool(!json_truthy(&v)),
                UnOp::Neg => v.as_f64().map(|f| json_number(-f)).unwrap_or(JsonValue::Null),
            }
        }
        Expression::BinaryOp { op, lhs, rhs } => eval_binop(*op, lhs, rhs, env),
        Expression::ArrayLit(items) => JsonValue::Array(items.iter().map(|i| eval(i, env)).collect()),
        Expression::ObjectLit(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (k, v) in fields {
                map.insert(k.clone(), eval(v, env));
            }
            JsonValue::Object(map)
        }
        Expression::FunctionCall { name, args } => eval_builtin(name, args, env),
        Expression::SimilarityCall { .. } | Expression::ProximityCall { .. } | Expression::FulltextCall { .. } => JsonValue::Null,
        Expression::Subquery(_) => JsonValue::Null,
    }
}

fn json_number(f: f64) -> JsonValue {
    serde_json::Number::from_f64(f).map(JsonValue::Number).unwrap_or(JsonValue::Null)
}

fn eval_binop(op: BinOp, lhs: &Expression, rhs: &Expression, env: &HashMap<String, JsonValue>) -> JsonValue {
    let l = eval(lhs, env);
    match op {
        BinOp::And => {
            if !json_truthy(&l) {
                return JsonValue::Bool(false);
            }
            JsonValue::Bool(json_truthy(&eval(rhs, env)))
        }
        BinOp::Or => {
            if json_truthy(&l) {
                return JsonValue::Bool(true);
            }
            JsonValue::Bool(json_truthy(&eval(rhs, env)))
        }
        BinOp::Xor => JsonValue::Bool(json_truthy(&l) != json_truthy(&eval(rhs, env))),
        _ => {
            let r = eval(rhs, env);
            match op {
                BinOp::Eq => JsonValue::Bool(json_eq(&l, &r)),
                BinOp::Neq => JsonValue::Bool(!json_eq(&l, &r)),
                BinOp::Lt => JsonValue::Bool(compare_json(&l, &r) == std::cmp::Ordering::Less),
                BinOp::Lte => JsonValue::Bool(compare_json(&l, &r) != std::cmp::Ordering::Greater),
                BinOp::Gt => JsonValue::Bool(compare_json(&l, &r) == std::cmp::Ordering::Greater),
                BinOp::Gte => JsonValue::Bool(compare_json(&l, &r) != std::cmp::Ordering::Less),
                BinOp::In => JsonValue::Bool(match &r {
                    JsonValue::Array(items) => items.iter().any(|i| json_eq(i, &l)),
                    _ => false,
                }),
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => match (l.as_f64(), r.as_f64()) {
                    (Some(a), Some(b)) => match op {
                        BinOp::Add => json_number(a + b),
                        BinOp::Sub => json_number(a - b),
                        BinOp::Mul => json_number(a * b),
                        BinOp::Div => {
                            if b == 0.0 {
                                JsonValue::Null
                            } else {
                                json_number(a / b)
                            }
                        }
                        BinOp::Mod => {
                            if b == 0.0 {
                                JsonValue::Null
                            } else {
                                json_number(a % b)
                            }
                        }
                        _ => unreachable!(),
                    },
                    _ => JsonValue::Null,
                },
                BinOp::And | BinOp::Or | BinOp::Xor => unreachable!(),
            }
        }
    }
}

fn json_eq(a: &JsonValue, b: &JsonValue) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Builtin function dispatch: arithmetic/string helpers plus the `ST_*`
/// spatial family (`spec.md` §4.10).
fn eval_builtin(name: &str, args: &[Expression], env: &HashMap<String, JsonValue>) -> JsonValue {
    let upper = name.to_ascii_uppercase();
    let vals: Vec<JsonValue> = args.iter().map(|a| eval(a, env)).collect();
    match upper.as_str() {
        "LENGTH" => match vals.first() {
            Some(JsonValue::String(s)) => JsonValue::from(s.chars().count() as i64),
            Some(JsonValue::Array(a)) => JsonValue::from(a.len() as i64),
            Some(JsonValue::Object(o)) => JsonValue::from(o.len() as i64),
            _ => JsonValue::Null,
        },
        "CONCAT" => JsonValue::String(vals.iter().map(json_as_display_string).collect::<Vec<_>>().join("")),
        "SUBSTRING" => match vals.first().and_then(|v| v.as_str()) {
            Some(s) => {
                let start = vals.get(1).and_then(|v| v.as_i64()).unwrap_or(0).max(0) as usize;
                let len = vals.get(2).and_then(|v| v.as_i64()).map(|n| n.max(0) as usize);
                let chars: Vec<char> = s.chars().collect();
                let end = len.map(|l| (start + l).min(chars.len())).unwrap_or(chars.len());
                if start >= chars.len() {
                    JsonValue::String(String::new())
                } else {
                    JsonValue::String(chars[start..end.max(start)].iter().collect())
                }
            }
            None => JsonValue::Null,
        },
        "UPPER" => vals.first().and_then(|v| v.as_str()).map(|s| JsonValue::String(s.to_uppercase())).unwrap_or(JsonValue::Null),
        "LOWER" => vals.first().and_then(|v| v.as_str()).map(|s| JsonValue::String(s.to_lowercase())).unwrap_or(JsonValue::Null),
        "ABS" => vals.first().and_then(|v| v.as_f64()).map(|f| json_number(f.abs())).unwrap_or(JsonValue::Null),
        "CEIL" => vals.first().and_then(|v| v.as_f64()).map(|f| json_number(f.ceil())).unwrap_or(JsonValue::Null),
        "FLOOR" => vals.first().and_then(|v| v.as_f64()).map(|f| json_number(f.floor())).unwrap_or(JsonValue::Null),
        "ROUND" => vals.first().and_then(|v| v.as_f64()).map(|f| json_number(f.round())).unwrap_or(JsonValue::Null),
        "MIN" => vals.iter().filter_map(|v| v.as_f64()).fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.min(x)))).map(json_number).unwrap_or(JsonValue::Null),
        "MAX" => vals.iter().filter_map(|v| v.as_f64()).fold(None, |acc: Option<f64>, x| Some(acc.map_or(x, |a| a.max(x)))).map(json_number).unwrap_or(JsonValue::Null),
        _ if upper.starts_with("ST_") => eval_spatial_builtin(&upper, &vals),
        _ => JsonValue::Null,
    }
}

fn json_as_display_string(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

fn eval_spatial_builtin(name: &str, vals: &[JsonValue]) -> JsonValue {
    use crate::geo::geometry::{Coordinate, Geometry, MBR};
    let geom_arg = |v: &JsonValue| -> Option<Geometry> {
        match v {
            JsonValue::String(s) => crate::geo::parse_wkt(s).or_else(|_| crate::geo::parse_geojson(s)).ok(),
            _ => None,
        }
    };
    match name {
        "ST_POINT" => {
            let x = vals.first().and_then(|v| v.as_f64()).unwrap_or(0.0);
            let y = vals.get(1).and_then(|v| v.as_f64()).unwrap_or(0.0);
            JsonValue::String(crate::geo::to_wkt(&Geometry::Point(Coordinate::new(x, y))))
        }
        "ST_GEOMFROMTEXT" => vals.first().and_then(|v| v.as_str()).map(JsonValue::from).unwrap_or(JsonValue::Null),
        "ST_GEOMFROMGEOJSON" => vals
            .first()
            .and_then(|v| v.as_str())
            .and_then(|s| crate::geo::parse_geojson(s).ok())
            .map(|g| JsonValue::String(crate::geo::to_wkt(&g)))
            .unwrap_or(JsonValue::Null),
        "ST_ASTEXT" => vals.first().and_then(geom_arg).map(|g| JsonValue::String(crate::geo::to_wkt(&g))).unwrap_or(JsonValue::Null),
        "ST_ASGEOJSON" => vals.first().and_then(geom_arg).map(|g| JsonValue::String(crate::geo::to_geojson(&g))).unwrap_or(JsonValue::Null),
        "ST_DISTANCE" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => {
                let (ca, cb) = (a.centroid(), b.centroid());
                json_number(crate::geo::geometry::haversine_distance_m(ca.y, ca.x, cb.y, cb.x))
            }
            _ => JsonValue::Null,
        },
        "ST_3DDISTANCE" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => {
                let (ca, cb) = (a.centroid(), b.centroid());
                json_number(crate::geo::geometry::euclidean_3d(ca.x, ca.y, ca.z.unwrap_or(0.0), cb.x, cb.y, cb.z.unwrap_or(0.0)))
            }
            _ => JsonValue::Null,
        },
        "ST_INTERSECTS" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => JsonValue::Bool(a.mbr().intersects(&b.mbr())),
            _ => JsonValue::Null,
        },
        "ST_WITHIN" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => JsonValue::Bool(b.mbr().contains_mbr(&a.mbr())),
            _ => JsonValue::Null,
        },
        "ST_CONTAINS" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => JsonValue::Bool(a.mbr().contains_mbr(&b.mbr())),
            _ => JsonValue::Null,
        },
        "ST_DWITHIN" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg), vals.get(2).and_then(|v| v.as_f64())) {
            (Some(a), Some(b), Some(radius)) => {
                let (ca, cb) = (a.centroid(), b.centroid());
                JsonValue::Bool(crate::geo::geometry::haversine_distance_m(ca.y, ca.x, cb.y, cb.x) <= radius)
            }
            _ => JsonValue::Null,
        },
        "ST_HASZ" => vals.first().and_then(geom_arg).map(|g| JsonValue::Bool(g.has_z())).unwrap_or(JsonValue::Null),
        "ST_Z" => vals.first().and_then(geom_arg).and_then(|g| g.centroid().z).map(json_number).unwrap_or(JsonValue::Null),
        "ST_ZMIN" => vals.first().and_then(geom_arg).and_then(|g| g.mbr().z_min).map(json_number).unwrap_or(JsonValue::Null),
        "ST_ZMAX" => vals.first().and_then(geom_arg).and_then(|g| g.mbr().z_max).map(json_number).unwrap_or(JsonValue::Null),
        "ST_ZBETWEEN" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(|v| v.as_f64()), vals.get(2).and_then(|v| v.as_f64())) {
            (Some(g), Some(lo), Some(hi)) => {
                let mbr = g.mbr();
                JsonValue::Bool(mbr.z_min.map(|z| z >= lo).unwrap_or(false) && mbr.z_max.map(|z| z <= hi).unwrap_or(false))
            }
            _ => JsonValue::Null,
        },
        "ST_FORCE2D" => vals.first().and_then(geom_arg).map(|g| JsonValue::String(crate::geo::to_wkt(&g.force_2d()))).unwrap_or(JsonValue::Null),
        "ST_BUFFER" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(|v| v.as_f64())) {
            (Some(g), Some(d)) => {
                let b = g.buffer_bbox(d);
                JsonValue::Array(vec![json_number(b.minx), json_number(b.miny), json_number(b.maxx), json_number(b.maxy)])
            }
            _ => JsonValue::Null,
        },
        "ST_UNION" => match (vals.first().and_then(geom_arg), vals.get(1).and_then(geom_arg)) {
            (Some(a), Some(b)) => {
                let u: MBR = a.mbr().union(&b.mbr());
                JsonValue::Array(vec![json_number(u.minx), json_number(u.miny), json_number(u.maxx), json_number(u.maxy)])
            }
            _ => JsonValue::Null,
        },
        _ => JsonValue::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aql::ast::Literal as L;
    use crate::core::registry::Registry;
    use crate::store::memstore::MemStore;
    use crate::catalog::IndexCatalog;
    use crate::write::WritePath;

    fn setup() -> (Executor, Arc<SecondaryIndexEngine>) {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let catalog = Arc::new(IndexCatalog::new(store.clone()));
        let secondary = Arc::new(SecondaryIndexEngine::new(store.clone(), catalog.clone(), Registry::default()));
        secondary.create_equality_index("users", "city", false).unwrap();
        secondary.create_range_index("users", "age").unwrap();
        let wp = WritePath::new(store.clone(), catalog, secondary.clone());
        for (pk, city, age) in [("u1", "Berlin", 25i64), ("u2", "Berlin", 30), ("u3", "Munich", 40)] {
            let e = Entity::new("users", pk).with_field("city", Value::Str(city.into())).with_field("age", Value::I64(age));
            wp.put("users", &e).unwrap();
        }
        let executor = Executor::new(store, secondary.clone(), HashMap::new(), HashMap::new(), None, Registry::default(), Config::default());
        (executor, secondary)
    }

    #[test]
    fn literal_sortable_matches_value_encoding() {
        assert_eq!(literal_sortable(&Expression::Literal(L::Str("Berlin".into()))), Some(Value::Str("Berlin".into()).encode_sortable()));
        assert_eq!(literal_sortable(&Expression::Variable("x".into())), None);
    }

    #[test]
    fn conjunctive_equality_plan_returns_matching_rows() {
        let (executor, _secondary) = setup();
        let cq = ConjunctiveQuery {
            table: "users".into(),
            var: "u".into(),
            eq: vec![crate::aql::plan::EqPredicate { column: "city".into(), value: Expression::Literal(L::Str("Berlin".into())) }],
            ..Default::default()
        };
        let ctx = ExecutionContext::default();
        let rows = executor.execute(&Plan::Conjunctive(cq), &ctx).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn range_predicate_filters_by_age() {
        let (executor, _secondary) = setup();
        let cq = ConjunctiveQuery {
            table: "users".into(),
            var: "u".into(),
            range: vec![crate::aql::plan::RangePredicate { column: "age".into(), op: CmpOp::Gt, value: Expression::Literal(L::Int(28)) }],
            ..Default::default()
        };
        let ctx = ExecutionContext::default();
        let rows = executor.execute(&Plan::Conjunctive(cq), &ctx).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn with_cte_plan_filters_materialized_rows_by_name() {
        let (executor, _secondary) = setup();
        let cte = ConjunctiveQuery { table: "users".into(), var: "u".into(), ..Default::default() };
        let main = ConjunctiveQuery {
            table: "recent".into(),
            var: "r".into(),
            eq: vec![crate::aql::plan::EqPredicate { column: "city".into(), value: Expression::Literal(L::Str("Berlin".into())) }],
            ..Default::default()
        };
        let plan = Plan::WithCte {
            ctes: vec![("recent".to_string(), Box::new(Plan::Conjunctive(cte)))],
            main: Box::new(Plan::Conjunctive(main)),
        };
        let ctx = ExecutionContext::default();
        let rows = executor.execute(&plan, &ctx).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["city"] == "Berlin"));
    }

    #[test]
    fn eval_arithmetic_and_string_builtins() {
        let env = HashMap::new();
        let call = Expression::FunctionCall { name: "UPPER".into(), args: vec![Expression::Literal(L::Str("abc".into()))] };
        assert_eq!(eval(&call, &env), JsonValue::String("ABC".into()));
        let div = Expression::BinaryOp { op: BinOp::Div, lhs: Box::new(Expression::Literal(L::Int(4))), rhs: Box::new(Expression::Literal(L::Int(0))) };
        assert_eq!(eval(&div, &env), JsonValue::Null);
    }

    #[test]
    fn eval_field_access_on_bound_variable() {
        let mut env = HashMap::new();
        env.insert("u".to_string(), serde_json::json!({"age": 30}));
        let expr = Expression::FieldAccess { base: Box::new(Expression::Variable("u".into())), path: vec!["age".into()] };
        assert_eq!(eval(&expr, &env), JsonValue::from(30));
    }

    #[test]
    fn vector_geo_prefilter_resolves_equality_extra_filter_to_candidate_pks() {
        let store: Arc<dyn KvStore> = Arc::new(MemStore::new());
        let catalog = Arc::new(IndexCatalog::new(store.clone()));
        let secondary = Arc::new(SecondaryIndexEngine::new(store.clone(), catalog.clone(), Registry::default()));
        secondary.create_equality_index("docs", "city", false).unwrap();
        let wp = WritePath::new(store.clone(), catalog, secondary.clone());
        let vidx = Arc::new(VectorIndex::new(store.clone(), Registry::default()));
        vidx.init(2, Metric::L2, 16, 200, 64);
        for (pk, city, vec) in [("d1", "Berlin", vec![0.0f32, 0.0]), ("d2", "Berlin", vec![1.0, 1.0]), ("d3", "Munich", vec![0.1, 0.1])] {
            let e = Entity::new("docs", pk).with_field("city", Value::Str(city.into())).with_field("vec", Value::Vector(vec));
            wp.put("docs", &e).unwrap();
            vidx.add_entity(&e, "vec").unwrap();
        }
        let mut vector_map = HashMap::new();
        vector_map.insert(("docs".to_string(), "vec".to_string()), vidx);
        let executor = Executor::new(store, secondary.clone(), HashMap::new(), vector_map, None, Registry::default(), Config::default());

        let vq = VectorGeoQuery {
            table: "docs".into(),
            var: "d".into(),
            vector_field: "vec".into(),
            query_vector: Expression::ArrayLit(vec![Expression::Literal(L::Float(0.0)), Expression::Literal(L::Float(0.0))]),
            k: 5,
            sort_direction: SortDirection::Asc,
            spatial_field: None,
            spatial_bbox: None,
            dwithin_center: None,
            dwithin_radius_m: None,
            extra_filters: vec![Expression::BinaryOp {
                op: BinOp::Eq,
                lhs: Box::new(Expression::FieldAccess { base: Box::new(Expression::Variable("d".into())), path: vec!["city".into()] }),
                rhs: Box::new(Expression::Literal(L::Str("Berlin".into()))),
            }],
            returns: Expression::Variable("d".into()),
        };
        let prefilter = executor.equality_prefilter("docs", "d", &vq.extra_filters).unwrap();
        let mut pks = prefilter.expect("equality extra_filter should resolve to an indexed candidate set");
        pks.sort();
        assert_eq!(pks, vec!["d1".to_string(), "d2".to_string()]);

        let ctx = ExecutionContext::default();
        let rows = executor.execute(&Plan::VectorGeo(vq), &ctx).unwrap();
        assert_eq!(rows.len(), 2);
        for r in &rows {
            assert!(r["city"] == "Berlin");
        }
    }

    #[test]
    fn cancellation_is_observed_mid_scan() {
        let (executor, _secondary) = setup();
        let cq = ConjunctiveQuery { table: "users".into(), var: "u".into(), ..Default::default() };
        let ctx = ExecutionContext::default();
        ctx.token.cancel();
        let err = executor.execute(&Plan::Conjunctive(cq), &ctx);
        assert!(err.is_err());
    }
}
