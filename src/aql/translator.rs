//! AQL Translator (`spec.md` §4.8): lowers a parsed `Query` into one of six
//! plan shapes. Mirrors `query::planner`'s "classify then build" structure,
//! generalized from a single-collection FTS plan to AQL's richer family of
//! shapes.

use crate::aql::ast::{AggregateFn, BinOp, Clause, Expression, GraphDirection, Literal, Query, SortDirection, UnOp};
use crate::aql::plan::{
    CmpOp, CollectSpec, ConjunctiveQuery, ContentGeoQuery, DisjunctiveQuery, EqPredicate, FulltextPredicate, JoinFor,
    JoinQuery, OrderBy, Plan, RangePredicate, TraversalQuery, VectorGeoQuery,
};
use crate::core::error::{Error, Result};

pub struct Translator;

impl Default for Translator {
    fn default() -> Self {
        Translator
    }
}

fn first_for(query: &Query) -> Option<(&str, &Expression)> {
    query.clauses.iter().find_map(|c| if let Clause::For { var, collection } = c { Some((var.as_str(), collection)) } else { None })
}

fn collection_name(expr: &Expression) -> Option<String> {
    match expr {
        Expression::Variable(name) => Some(name.clone()),
        Expression::Literal(Literal::Str(s)) => Some(s.clone()),
        _ => None,
    }
}

/// Resolves `LET x = <expr>` aliases so `SORT x`/`FILTER x` see through
/// the binding (`spec.md` §4.8 rule: "aliases are resolved by scanning LETs").
fn resolve_alias<'a>(query: &'a Query, expr: &'a Expression) -> &'a Expression {
    if let Expression::Variable(name) = expr {
        if let Some((_, bound)) = query.lets().into_iter().find(|(v, _)| *v == name) {
            return bound;
        }
    }
    expr
}

fn is_call(expr: &Expression, name: &str) -> bool {
    matches!(expr, Expression::FunctionCall { name: n, .. } if n.eq_ignore_ascii_case(name))
}

fn call_args(expr: &Expression) -> Option<&[Expression]> {
    if let Expression::FunctionCall { args, .. } = expr {
        Some(args)
    } else {
        None
    }
}

impl Translator {
    pub fn new() -> Self {
        Translator
    }

    pub fn translate(&self, query: &Query) -> Result<Plan> {
        if let Some(bindings) = query.with_bindings() {
            let mut ctes = Vec::with_capacity(bindings.len());
            for (name, subquery) in bindings {
                ctes.push((name.clone(), Box::new(self.translate(subquery)?)));
            }
            let rest = Query { clauses: query.clauses.iter().filter(|c| !matches!(c, Clause::With { .. })).cloned().collect() };
            let main = Box::new(self.translate(&rest)?);
            return Ok(Plan::WithCte { ctes, main });
        }

        if let Some(Clause::GraphTraversal { .. }) = query.clauses.iter().find(|c| matches!(c, Clause::GraphTraversal { .. })) {
            return Ok(Plan::Traversal(self.build_traversal(query)?));
        }

        if let Some(plan) = self.try_vector_geo(query)? {
            return Ok(Plan::VectorGeo(plan));
        }
        if let Some(plan) = self.try_content_geo(query)? {
            return Ok(Plan::ContentGeo(plan));
        }

        let fors: Vec<(&str, &Expression)> =
            query.clauses.iter().filter_map(|c| if let Clause::For { var, collection } = c { Some((var.as_str(), collection)) } else { None }).collect();

        if fors.len() > 1 || query.clauses.iter().any(|c| matches!(c, Clause::Collect { .. })) {
            return Ok(Plan::Join(self.build_join(query, &fors)?));
        }

        let (var, coll) = first_for(query).ok_or_else(|| Error::translate("query has no FOR clause"))?;
        let table = collection_name(coll).ok_or_else(|| Error::translate("FOR collection must be a name"))?;

        let filters: Vec<Expression> = query.filters().into_iter().cloned().collect();
        let combined = and_all(&filters);

        if let Some(e) = &combined {
            if e.contains_or() {
                let blocks = to_dnf(e)?;
                let mut cqs = Vec::new();
                for conjuncts in blocks {
                    cqs.push(self.conjuncts_to_query(&table, var, &conjuncts, query)?);
                }
                let (distinct, returns) = query.returns().map(|(d, e)| (d, Some(e.clone()))).unwrap_or((false, None));
                return Ok(Plan::Disjunctive(DisjunctiveQuery { table, var: var.to_string(), blocks: cqs, limit: query.limit(), returns, distinct }));
            }
        }

        let conjuncts = combined.map(flatten_and).unwrap_or_default();
        Ok(Plan::Conjunctive(self.conjuncts_to_query(&table, var, &conjuncts, query)?))
    }

    fn conjuncts_to_query(&self, table: &str, var: &str, conjuncts: &[Expression], query: &Query) -> Result<ConjunctiveQuery> {
        let mut cq = ConjunctiveQuery { table: table.to_string(), var: var.to_string(), ..Default::default() };
        for c in conjuncts {
            classify_predicate(var, c, &mut cq)?;
        }
        if let Some(sort) = query.sort() {
            if let Some((expr, dir)) = sort.first() {
                if let Some((root, mut path)) = expr.field_path() {
                    if root == var && !path.is_empty() {
                        cq.order_by = Some(OrderBy { column: path.remove(0), direction: *dir });
                    }
                }
            }
        }
        cq.limit = query.limit();
        let (distinct, returns) = query.returns().map(|(d, e)| (d, Some(e.clone()))).unwrap_or((false, None));
        cq.distinct = distinct;
        cq.returns = returns;
        Ok(cq)
    }

    fn try_vector_geo(&self, query: &Query) -> Result<Option<VectorGeoQuery>> {
        let Some(sort) = query.sort() else { return Ok(None) };
        let Some((sort_expr, direction)) = sort.first() else { return Ok(None) };
        let resolved = resolve_alias(query, sort_expr);
        let Expression::SimilarityCall { field, query: qvec, k } = resolved else { return Ok(None) };
        let Some((var, mut path)) = field.field_path() else {
            return Err(Error::translate("SIMILARITY field must be a field access on the FOR variable"));
        };
        let (_, coll) = first_for(query).ok_or_else(|| Error::translate("query has no FOR clause"))?;
        let table = collection_name(coll).ok_or_else(|| Error::translate("FOR collection must be a name"))?;
        let vector_field = if path.is_empty() { String::new() } else { path.remove(0) };

        let k = k
            .as_ref()
            .and_then(|e| literal_u64(e))
            .or_else(|| query.limit().map(|(_, count)| count))
            .unwrap_or(10);

        let mut spatial_field = None;
        let mut spatial_bbox = None;
        let mut dwithin_center = None;
        let mut dwithin_radius_m = None;
        let mut extra_filters = Vec::new();
        for f in query.filters() {
            if is_call(f, "ST_Within") {
                let args = call_args(f).unwrap();
                if let Some((_, mut p)) = args[0].field_path() {
                    spatial_field = Some(if p.is_empty() { String::new() } else { p.remove(0) });
                }
                spatial_bbox = Some(args[1].clone());
            } else if is_call(f, "ST_DWithin") {
                let args = call_args(f).unwrap();
                if let Some((_, mut p)) = args[0].field_path() {
                    spatial_field = Some(if p.is_empty() { String::new() } else { p.remove(0) });
                }
                dwithin_center = Some(args[1].clone());
                dwithin_radius_m = Some(args[2].clone());
            } else {
                extra_filters.push(f.clone());
            }
        }

        Ok(Some(VectorGeoQuery {
            table,
            var,
            vector_field,
            query_vector: (**qvec).clone(),
            k,
            sort_direction: *direction,
            spatial_field,
            spatial_bbox,
            dwithin_center,
            dwithin_radius_m,
            extra_filters,
            returns: query.returns().map(|(_, e)| e.clone()).unwrap_or(Expression::Variable(var)),
        }))
    }

    fn try_content_geo(&self, query: &Query) -> Result<Option<ContentGeoQuery>> {
        let Some(sort) = query.sort() else { return Ok(None) };
        let Some((sort_expr, _)) = sort.first() else { return Ok(None) };
        let resolved = resolve_alias(query, sort_expr);
        let Expression::ProximityCall { field, center } = resolved else { return Ok(None) };
        let Some((var, mut geo_path)) = field.field_path() else {
            return Err(Error::translate("PROXIMITY field must be a field access on the FOR variable"));
        };
        let (_, coll) = first_for(query).ok_or_else(|| Error::translate("query has no FOR clause"))?;
        let table = collection_name(coll).ok_or_else(|| Error::translate("FOR collection must be a name"))?;
        let geo_field = if geo_path.is_empty() { String::new() } else { geo_path.remove(0) };

        let mut text_field = None;
        let mut fulltext_query = None;
        let mut k = None;
        let mut spatial_bbox = None;
        let mut extra_filters = Vec::new();
        for f in query.filters() {
            if let Expression::FulltextCall { field, query: q, k: fk } = f {
                let (_, mut p) = field.field_path().ok_or_else(|| Error::translate("FULLTEXT field must be a field access"))?;
                text_field = Some(if p.is_empty() { String::new() } else { p.remove(0) });
                fulltext_query = Some((**q).clone());
                k = fk.as_ref().and_then(|e| literal_u64(e));
            } else if is_call(f, "ST_Within") {
                let args = call_args(f).unwrap();
                spatial_bbox = Some(args[1].clone());
            } else {
                extra_filters.push(f.clone());
            }
        }
        let Some(text_field) = text_field else { return Ok(None) };
        let Some(fulltext_query) = fulltext_query else { return Ok(None) };
        let k = k.or_else(|| query.limit().map(|(_, c)| c)).unwrap_or(10);

        Ok(Some(ContentGeoQuery {
            table,
            var,
            text_field,
            fulltext_query,
            geo_field,
            center: (**center).clone(),
            k,
            spatial_bbox,
            extra_filters,
            returns: query.returns().map(|(_, e)| e.clone()).unwrap_or(Expression::Variable("d".into())),
        }))
    }

    fn build_traversal(&self, query: &Query) -> Result<TraversalQuery> {
        let Clause::GraphTraversal {
            vertex_var,
            edge_var,
            path_var,
            min_depth,
            max_depth,
            direction,
            start,
            graph_name,
            shortest_path,
            end_vertex,
        } = query.clauses.iter().find(|c| matches!(c, Clause::GraphTraversal { .. })).unwrap()
        else {
            unreachable!()
        };
        Ok(TraversalQuery {
            vertex_var: vertex_var.clone(),
            edge_var: edge_var.clone(),
            path_var: path_var.clone(),
            min_depth: *min_depth,
            max_depth: *max_depth,
            direction: *direction,
            start: start.clone(),
            graph_name: graph_name.clone(),
            shortest_path: *shortest_path,
            end_vertex: end_vertex.clone(),
            filters: query.filters().into_iter().cloned().collect(),
            returns: query.returns().map(|(_, e)| e.clone()).unwrap_or(Expression::Variable(vertex_var.clone())),
        })
    }

    fn build_join(&self, query: &Query, fors: &[(&str, &Expression)]) -> Result<JoinQuery> {
        let mut jfors = Vec::new();
        for (var, coll) in fors {
            let name = collection_name(coll).ok_or_else(|| Error::translate("FOR collection must be a name"))?;
            jfors.push(JoinFor { var: var.to_string(), collection: name });
        }
        let collect = query.clauses.iter().find_map(|c| {
            if let Clause::Collect { groups, aggregates } = c {
                Some(CollectSpec { groups: groups.clone(), aggregates: aggregates.clone() })
            } else {
                None
            }
        });
        let (distinct, returns) = query.returns().map(|(d, e)| (d, e.clone())).unwrap_or((false, Expression::Variable(jfors[0].var.clone())));
        Ok(JoinQuery {
            fors: jfors,
            lets: query.lets().into_iter().map(|(v, e)| (v.to_string(), e.clone())).collect(),
            filters: query.filters().into_iter().cloned().collect(),
            collect,
            sort: query.sort().cloned().unwrap_or_default(),
            limit: query.limit(),
            distinct,
            returns,
        })
    }
}

fn literal_u64(e: &Expression) -> Option<u64> {
    match e {
        Expression::Literal(Literal::Int(i)) => Some(*i as u64),
        Expression::Literal(Literal::Float(f)) => Some(*f as u64),
        _ => None,
    }
}

fn and_all(exprs: &[Expression]) -> Option<Expression> {
    let mut it = exprs.iter().cloned();
    let first = it.next()?;
    Some(it.fold(first, |acc, e| Expression::BinaryOp { op: BinOp::And, lhs: Box::new(acc), rhs: Box::new(e) }))
}

fn flatten_and(e: Expression) -> Vec<Expression> {
    match e {
        Expression::BinaryOp { op: BinOp::And, lhs, rhs } => {
            let mut out = flatten_and(*lhs);
            out.extend(flatten_and(*rhs));
            out
        }
        other => vec![other],
    }
}

/// Converts an AND/OR/XOR predicate tree to DNF, returning one `Vec<Expression>`
/// (conjunction) per disjunct. XOR is lowered as `(A AND NOT B) OR (NOT A AND B)`
/// (`DESIGN.md` open-question decision). Errors if merging two AND-branches would
/// combine two FULLTEXT predicates in one conjunct (`spec.md` §4.8 rule 2).
fn to_dnf(e: &Expression) -> Result<Vec<Vec<Expression>>> {
    match e {
        Expression::BinaryOp { op: BinOp::Or, lhs, rhs } => {
            let mut l = to_dnf(lhs)?;
            l.extend(to_dnf(rhs)?);
            Ok(l)
        }
        Expression::BinaryOp { op: BinOp::Xor, lhs, rhs } => {
            let not_rhs = Expression::UnaryOp { op: UnOp::Not, expr: rhs.clone() };
            let not_lhs = Expression::UnaryOp { op: UnOp::Not, expr: lhs.clone() };
            let left = Expression::BinaryOp { op: BinOp::And, lhs: lhs.clone(), rhs: Box::new(not_rhs) };
            let right = Expression::BinaryOp { op: BinOp::And, lhs: Box::new(not_lhs), rhs: rhs.clone() };
            let mut l = to_dnf(&left)?;
            l.extend(to_dnf(&right)?);
            Ok(l)
        }
        Expression::BinaryOp { op: BinOp::And, lhs, rhs } => {
            let left = to_dnf(lhs)?;
            let right = to_dnf(rhs)?;
            let mut out = Vec::with_capacity(left.len() * right.len());
            for l in &left {
                for r in &right {
                    let l_has_fulltext = l.iter().any(contains_fulltext);
                    let r_has_fulltext = r.iter().any(contains_fulltext);
                    if l_has_fulltext && r_has_fulltext {
                        return Err(Error::translate("combining two FULLTEXT predicates with AND in one disjunct is not allowed"));
                    }
                    let mut merged = l.clone();
                    merged.extend(r.clone());
                    out.push(merged);
                }
            }
            Ok(out)
        }
        other => Ok(vec![vec![other.clone()]]),
    }
}

fn contains_fulltext(e: &Expression) -> bool {
    matches!(e, Expression::FulltextCall { .. })
}

/// Classifies one AND-conjunct into the `ConjunctiveQuery`'s eq/range/
/// fulltext/post_filter buckets (`spec.md` §4.8 rule 3: unresolvable NOT
/// subtrees are left as post-filters).
fn classify_predicate(var: &str, e: &Expression, cq: &mut ConjunctiveQuery) -> Result<()> {
    match e {
        Expression::UnaryOp { op: UnOp::Not, expr } => match negate_comparison(expr) {
            Some(negated) => classify_predicate(var, &negated, cq),
            None => {
                cq.post_filter.push(e.clone());
                Ok(())
            }
        },
        Expression::FulltextCall { field, query, k: _ } => {
            let (root, mut path) = field.field_path().ok_or_else(|| Error::translate("FULLTEXT field must be a field access"))?;
            if root != var {
                cq.post_filter.push(e.clone());
                return Ok(());
            }
            let column = if path.is_empty() { String::new() } else { path.remove(0) };
            if cq.fulltext.is_some() {
                return Err(Error::translate("multiple FULLTEXT predicates in one conjunct are not allowed"));
            }
            cq.fulltext = Some(FulltextPredicate { column, query: (**query).clone(), k: None });
            Ok(())
        }
        Expression::BinaryOp { op, lhs, rhs } => {
            let (field_expr, lit_expr, op) = if lhs.field_path().map(|(r, _)| r == var).unwrap_or(false) {
                (lhs.as_ref(), rhs.as_ref(), *op)
            } else if rhs.field_path().map(|(r, _)| r == var).unwrap_or(false) {
                (rhs.as_ref(), lhs.as_ref(), flip(*op))
            } else {
                cq.post_filter.push(e.clone());
                return Ok(());
            };
            let Some((_, mut path)) = field_expr.field_path() else {
                cq.post_filter.push(e.clone());
                return Ok(());
            };
            let column = if path.is_empty() { String::new() } else { path.remove(0) };
            match op {
                BinOp::Eq => cq.eq.push(EqPredicate { column, value: lit_expr.clone() }),
                BinOp::Lt => cq.range.push(RangePredicate { column, op: CmpOp::Lt, value: lit_expr.clone() }),
                BinOp::Lte => cq.range.push(RangePredicate { column, op: CmpOp::Lte, value: lit_expr.clone() }),
                BinOp::Gt => cq.range.push(RangePredicate { column, op: CmpOp::Gt, value: lit_expr.clone() }),
                BinOp::Gte => cq.range.push(RangePredicate { column, op: CmpOp::Gte, value: lit_expr.clone() }),
                _ => cq.post_filter.push(e.clone()),
            }
            Ok(())
        }
        _ => {
            cq.post_filter.push(e.clone());
            Ok(())
        }
    }
}

/// Negates a `NOT (comparison)` subtree via De Morgan / operator negation
/// when the comparison operator has a direct inverse (`spec.md` §4.8 rule:
/// "rewritten using De Morgan / operator negation when possible"). `Eq`/`Neq`/
/// `In` have no single-operator inverse expressible as an eq/range predicate,
/// so those return `None` and the caller defers to a post-filter.
fn negate_comparison(e: &Expression) -> Option<Expression> {
    match e {
        Expression::UnaryOp { op: UnOp::Not, expr } => Some((**expr).clone()),
        Expression::BinaryOp { op: op @ (BinOp::Lt | BinOp::Lte | BinOp::Gt | BinOp::Gte), lhs, rhs } => {
            let inverse = match op {
                BinOp::Lt => BinOp::Gte,
                BinOp::Lte => BinOp::Gt,
                BinOp::Gt => BinOp::Lte,
                BinOp::Gte => BinOp::Lt,
                _ => unreachable!(),
            };
            Some(Expression::BinaryOp { op: inverse, lhs: lhs.clone(), rhs: rhs.clone() })
        }
        _ => None,
    }
}

fn flip(op: BinOp) -> BinOp {
    match op {
        BinOp::Lt => BinOp::Gt,
        BinOp::Lte => BinOp::Gte,
        BinOp::Gt => BinOp::Lt,
        BinOp::Gte => BinOp::Lte,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aql::parser::AqlParser;

    fn translate(src: &str) -> Plan {
        let ast = AqlParser::new().parse(src).unwrap();
        Translator::new().translate(&ast).unwrap()
    }

    #[test]
    fn conjunctive_and_query_classifies_eq() {
        let plan = translate(r#"FOR u IN users FILTER u.city == "Berlin" AND u.age == 30 RETURN u"#);
        match plan {
            Plan::Conjunctive(cq) => {
                assert_eq!(cq.eq.len(), 2);
                assert!(cq.eq.iter().any(|p| p.column == "city"));
            }
            other => panic!("expected conjunctive, got {:?}", other),
        }
    }

    #[test]
    fn or_query_becomes_disjunctive_with_two_blocks() {
        let plan = translate(r#"FOR u IN users FILTER u.city == "Berlin" OR u.age == 30 RETURN u"#);
        match plan {
            Plan::Disjunctive(dq) => assert_eq!(dq.blocks.len(), 2),
            other => panic!("expected disjunctive, got {:?}", other),
        }
    }

    #[test]
    fn not_comparison_is_negated_into_range_predicate() {
        let plan = translate(r#"FOR u IN users FILTER NOT (u.age < 18) RETURN u"#);
        match plan {
            Plan::Conjunctive(cq) => {
                assert!(cq.post_filter.is_empty());
                assert_eq!(cq.range.len(), 1);
                assert_eq!(cq.range[0].op, CmpOp::Gte);
            }
            other => panic!("expected conjunctive, got {:?}", other),
        }
    }

    #[test]
    fn not_equality_has_no_inverse_and_defers_to_post_filter() {
        let plan = translate(r#"FOR u IN users FILTER NOT (u.city == "Berlin") RETURN u"#);
        match plan {
            Plan::Conjunctive(cq) => {
                assert!(cq.eq.is_empty());
                assert_eq!(cq.post_filter.len(), 1);
            }
            other => panic!("expected conjunctive, got {:?}", other),
        }
    }

    #[test]
    fn dual_fulltext_and_in_one_conjunct_is_rejected() {
        let ast = AqlParser::new()
            .parse(r#"FOR d IN articles FILTER FULLTEXT(d.a, "x") AND FULLTEXT(d.b, "y") RETURN d"#)
            .unwrap();
        let err = Translator::new().translate(&ast);
        assert!(err.is_err());
    }

    #[test]
    fn vector_geo_sort_produces_hybrid_plan() {
        let plan = translate(
            r#"FOR d IN images FILTER ST_Within(d.location, [13.4,52.5,13.5,52.6]) SORT SIMILARITY(d.embedding, Q) DESC LIMIT 10 RETURN d"#,
        );
        match plan {
            Plan::VectorGeo(q) => {
                assert_eq!(q.vector_field, "embedding");
                assert_eq!(q.k, 10);
                assert!(q.spatial_bbox.is_some());
            }
            other => panic!("expected vector-geo hybrid, got {:?}", other),
        }
    }

    #[test]
    fn with_clause_produces_with_cte_plan_wrapping_main() {
        let plan = translate(
            r#"WITH recent AS (FOR u IN users FILTER u.age > 18 RETURN u) FOR r IN recent FILTER r.city == "Berlin" RETURN r"#,
        );
        match plan {
            Plan::WithCte { ctes, main } => {
                assert_eq!(ctes.len(), 1);
                assert_eq!(ctes[0].0, "recent");
                assert!(matches!(*ctes[0].1, Plan::Conjunctive(_)));
                match *main {
                    Plan::Conjunctive(cq) => {
                        assert_eq!(cq.table, "recent");
                        assert_eq!(cq.eq.len(), 1);
                    }
                    other => panic!("expected conjunctive main plan, got {:?}", other),
                }
            }
            other => panic!("expected WithCte plan, got {:?}", other),
        }
    }

    #[test]
    fn traversal_with_shortest_path_sets_flag() {
        let plan = translate(r#"FOR v IN 1..3 OUTBOUND "Berlin" GRAPH "cities" SHORTEST_PATH TO "Dresden" RETURN v"#);
        match plan {
            Plan::Traversal(t) => assert!(t.shortest_path),
            other => panic!("expected traversal, got {:?}", other),
        }
    }
}
