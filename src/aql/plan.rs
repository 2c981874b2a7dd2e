//! Plan shapes the translator lowers an `aql::ast::Query` into
//! (`spec.md` §4.8). One variant per plan family; the executor dispatches
//! on `Plan` rather than re-inspecting the AST.

use crate::aql::ast::{AggregateFn, Expression, GraphDirection, SortDirection};

#[derive(Debug, Clone, PartialEq)]
pub enum CmpOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone)]
pub struct EqPredicate {
    pub column: String,
    pub value: Expression,
}

#[derive(Debug, Clone)]
pub struct RangePredicate {
    pub column: String,
    pub op: CmpOp,
    pub value: Expression,
}

#[derive(Debug, Clone)]
pub struct FulltextPredicate {
    pub column: String,
    pub query: Expression,
    pub k: Option<Expression>,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub column: String,
    pub direction: SortDirection,
}

/// A single conjunctive block: AND of equality/range/fulltext predicates,
/// plus whatever residual expression the index path cannot prove and must
/// be evaluated as a post-filter (`spec.md` §4.8 rule 3).
#[derive(Debug, Clone, Default)]
pub struct ConjunctiveQuery {
    pub table: String,
    pub var: String,
    pub eq: Vec<EqPredicate>,
    pub range: Vec<RangePredicate>,
    pub fulltext: Option<FulltextPredicate>,
    pub order_by: Option<OrderBy>,
    pub post_filter: Vec<Expression>,
    pub limit: Option<(Option<u64>, u64)>,
    pub returns: Option<Expression>,
    pub distinct: bool,
}

#[derive(Debug, Clone)]
pub struct DisjunctiveQuery {
    pub table: String,
    pub var: String,
    pub blocks: Vec<ConjunctiveQuery>,
    pub limit: Option<(Option<u64>, u64)>,
    pub returns: Option<Expression>,
    pub distinct: bool,
}

#[derive(Debug, Clone)]
pub struct JoinFor {
    pub var: String,
    pub collection: String,
}

#[derive(Debug, Clone)]
pub struct JoinQuery {
    pub fors: Vec<JoinFor>,
    pub lets: Vec<(String, Expression)>,
    pub filters: Vec<Expression>,
    pub collect: Option<CollectSpec>,
    pub sort: Vec<(Expression, SortDirection)>,
    pub limit: Option<(Option<u64>, u64)>,
    pub distinct: bool,
    pub returns: Expression,
}

#[derive(Debug, Clone)]
pub struct CollectSpec {
    pub groups: Vec<(String, Expression)>,
    pub aggregates: Vec<(String, AggregateFn, Expression)>,
}

#[derive(Debug, Clone)]
pub struct TraversalQuery {
    pub vertex_var: String,
    pub edge_var: Option<String>,
    pub path_var: Option<String>,
    pub min_depth: u32,
    pub max_depth: u32,
    pub direction: GraphDirection,
    pub start: Expression,
    pub graph_name: String,
    pub shortest_path: bool,
    pub end_vertex: Option<Expression>,
    pub filters: Vec<Expression>,
    pub returns: Expression,
}

#[derive(Debug, Clone)]
pub struct VectorGeoQuery {
    pub table: String,
    pub var: String,
    pub vector_field: String,
    pub query_vector: Expression,
    pub k: u64,
    pub sort_direction: SortDirection,
    pub spatial_field: Option<String>,
    pub spatial_bbox: Option<Expression>,
    pub dwithin_center: Option<Expression>,
    pub dwithin_radius_m: Option<Expression>,
    pub extra_filters: Vec<Expression>,
    pub returns: Expression,
}

#[derive(Debug, Clone)]
pub struct ContentGeoQuery {
    pub table: String,
    pub var: String,
    pub text_field: String,
    pub fulltext_query: Expression,
    pub geo_field: String,
    pub center: Expression,
    pub k: u64,
    pub spatial_bbox: Option<Expression>,
    pub extra_filters: Vec<Expression>,
    pub returns: Expression,
}

#[derive(Debug, Clone)]
pub enum Plan {
    Conjunctive(ConjunctiveQuery),
    Disjunctive(DisjunctiveQuery),
    Join(JoinQuery),
    Traversal(TraversalQuery),
    VectorGeo(VectorGeoQuery),
    ContentGeo(ContentGeoQuery),
    /// `WITH name AS (subquery), ...` bound ahead of the dependent FOR
    /// (`spec.md` §4.17): each CTE is planned and executed once as an
    /// uncorrelated pre-pass, then the main plan runs against those
    /// materialized rows wherever it names one of the CTEs as its source.
    WithCte { ctes: Vec<(String, Box<Plan>)>, main: Box<Plan> },
}
