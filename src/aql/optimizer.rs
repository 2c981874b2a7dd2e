//! Cost-based query optimizer (`spec.md` §4.9): predicate ordering for
//! conjunctive queries, and plan selection for the vector-geo hybrid.

use std::sync::Arc;

use crate::aql::plan::ConjunctiveQuery;
use crate::core::error::Result;
use crate::index::secondary::SecondaryIndexEngine;

/// `choose_order_for_and_query`: orders equality predicates ascending by
/// `estimate_count_equal`, capped estimates treated as `max_probe`, ties
/// broken by column name.
pub fn choose_order_for_and_query(secondary: &Arc<SecondaryIndexEngine>, cq: &ConjunctiveQuery, max_probe: usize) -> Result<Vec<usize>> {
    let mut scored: Vec<(usize, usize)> = Vec::with_capacity(cq.eq.len());
    for (i, pred) in cq.eq.iter().enumerate() {
        let value = match crate::aql::executor::literal_sortable(&pred.value) {
            Some(v) => v,
            None => String::new(),
        };
        let (count, capped) = secondary.estimate_count_equal(&cq.table, &pred.column, &value, max_probe)?;
        scored.push((i, if capped { max_probe } else { count }));
    }
    scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| cq.eq[a.0].column.cmp(&cq.eq[b.0].column)));
    Ok(scored.into_iter().map(|(i, _)| i).collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorGeoPlanChoice {
    VectorThenSpatial,
    SpatialThenVector,
    BruteForce,
}

#[derive(Debug, Clone, Copy)]
pub struct VectorGeoPlanInputs {
    pub has_vector_index: bool,
    pub has_spatial_index: bool,
    pub bbox_ratio: f64,
    pub prefilter_size: Option<usize>,
    pub spatial_index_entries: usize,
    pub k: usize,
    pub vector_dim: usize,
    pub overfetch: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct VectorGeoPlanChoiceResult {
    pub plan: VectorGeoPlanChoice,
    pub cost_vector_first: f64,
    pub cost_spatial_first: f64,
}

/// Cost model from `spec.md` §4.9: a prefilter of size `P` applies a
/// bounded discount to both costs; missing indexes fall back to the
/// remaining viable plan, or `BruteForce` if neither is available.
pub fn choose_vector_geo_plan(inputs: VectorGeoPlanInputs) -> VectorGeoPlanChoiceResult {
    let discount = match inputs.prefilter_size {
        Some(p) if p > 0 => 1.0 / (1.0 + (p as f64).ln()),
        _ => 1.0,
    };

    let post_filter_cost = inputs.bbox_ratio.max(0.0001) * 1000.0;
    let cost_vector_first = (inputs.overfetch as f64 * inputs.k as f64 * inputs.vector_dim as f64 + post_filter_cost) * discount;

    let candidate_count = (inputs.bbox_ratio.max(0.0001) * inputs.spatial_index_entries as f64).max(1.0);
    let cost_spatial_first =
        (inputs.bbox_ratio * inputs.spatial_index_entries as f64 + inputs.k as f64 * inputs.vector_dim as f64 * candidate_count) * discount;

    let plan = match (inputs.has_vector_index, inputs.has_spatial_index) {
        (true, true) => {
            if cost_vector_first <= cost_spatial_first {
                VectorGeoPlanChoice::VectorThenSpatial
            } else {
                VectorGeoPlanChoice::SpatialThenVector
            }
        }
        (true, false) => VectorGeoPlanChoice::VectorThenSpatial,
        (false, true) => VectorGeoPlanChoice::SpatialThenVector,
        (false, false) => VectorGeoPlanChoice::BruteForce,
    };

    VectorGeoPlanChoiceResult { plan, cost_vector_first, cost_spatial_first }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_bbox_prefers_vector_first() {
        let r = choose_vector_geo_plan(VectorGeoPlanInputs {
            has_vector_index: true,
            has_spatial_index: true,
            bbox_ratio: 0.9,
            prefilter_size: None,
            spatial_index_entries: 100_000,
            k: 10,
            vector_dim: 128,
            overfetch: 6,
        });
        assert_eq!(r.plan, VectorGeoPlanChoice::VectorThenSpatial);
    }

    #[test]
    fn small_bbox_prefers_spatial_first() {
        let r = choose_vector_geo_plan(VectorGeoPlanInputs {
            has_vector_index: true,
            has_spatial_index: true,
            bbox_ratio: 0.0005,
            prefilter_size: None,
            spatial_index_entries: 100_000,
            k: 10,
            vector_dim: 128,
            overfetch: 6,
        });
        assert_eq!(r.plan, VectorGeoPlanChoice::SpatialThenVector);
    }

    #[test]
    fn missing_spatial_index_falls_back_to_vector_first() {
        let r = choose_vector_geo_plan(VectorGeoPlanInputs {
            has_vector_index: true,
            has_spatial_index: false,
            bbox_ratio: 0.1,
            prefilter_size: None,
            spatial_index_entries: 0,
            k: 10,
            vector_dim: 128,
            overfetch: 6,
        });
        assert_eq!(r.plan, VectorGeoPlanChoice::VectorThenSpatial);
    }
}
