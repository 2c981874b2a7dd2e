//! AQL abstract syntax tree (`spec.md` §4.7). Replaces the source's deep
//! AST class hierarchy with a tagged sum type and visitor-style matching
//! (`spec.md` §9), generalizing `query::ast`'s builder-pattern idiom from a
//! string-query DSL to AQL, per
//! `original_source/include/query/query_engine.h`'s node catalogue
//! (`ForNode`, `FilterNode`, `LetNode`, `CollectNode`, `SortNode`,
//! `LimitNode`, `ReturnNode`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

/// Expression tree. `SimilarityCall`/`ProximityCall` are split out from
/// generic `FunctionCall` because the translator must recognize them
/// syntactically to detect the hybrid plan shapes (`spec.md` §4.8 families
/// 5/6), even though they could also be represented as ordinary calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Literal(Literal),
    Variable(String),
    FieldAccess { base: Box<Expression>, path: Vec<String> },
    BinaryOp { op: BinOp, lhs: Box<Expression>, rhs: Box<Expression> },
    UnaryOp { op: UnOp, expr: Box<Expression> },
    FunctionCall { name: String, args: Vec<Expression> },
    SimilarityCall { field: Box<Expression>, query: Box<Expression>, k: Option<Box<Expression>> },
    ProximityCall { field: Box<Expression>, center: Box<Expression> },
    FulltextCall { field: Box<Expression>, query: Box<Expression>, k: Option<Box<Expression>> },
    ArrayLit(Vec<Expression>),
    ObjectLit(Vec<(String, Expression)>),
    Subquery(Box<Query>),
}

impl Expression {
    pub fn field_path(&self) -> Option<(String, Vec<String>)> {
        match self {
            Expression::Variable(v) => Some((v.clone(), Vec::new())),
            Expression::FieldAccess { base, path } => {
                let (root, mut prefix) = base.field_path()?;
                prefix.extend(path.clone());
                Some((root, prefix))
            }
            _ => None,
        }
    }

    pub fn contains_or(&self) -> bool {
        match self {
            Expression::BinaryOp { op: BinOp::Or, .. } => true,
            Expression::BinaryOp { op: BinOp::Xor, .. } => true,
            Expression::BinaryOp { op: BinOp::And, lhs, rhs } => lhs.contains_or() || rhs.contains_or(),
            Expression::UnaryOp { expr, .. } => expr.contains_or(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GraphDirection {
    Outbound,
    Inbound,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFn {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    CollectIntoArray,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    For { var: String, collection: Expression },
    GraphTraversal {
        vertex_var: String,
        edge_var: Option<String>,
        path_var: Option<String>,
        min_depth: u32,
        max_depth: u32,
        direction: GraphDirection,
        start: Expression,
        graph_name: String,
        shortest_path: bool,
        end_vertex: Option<Expression>,
    },
    Filter(Expression),
    Let { var: String, expr: Expression },
    Collect { groups: Vec<(String, Expression)>, aggregates: Vec<(String, AggregateFn, Expression)> },
    Sort(Vec<(Expression, SortDirection)>),
    Limit { offset: Option<u64>, count: u64 },
    Return { distinct: bool, expr: Expression },
    With { bindings: Vec<(String, Query)> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub clauses: Vec<Clause>,
}

impl Query {
    pub fn for_clauses(&self) -> Vec<&Clause> {
        self.clauses
            .iter()
            .filter(|c| matches!(c, Clause::For { .. } | Clause::GraphTraversal { .. }))
            .collect()
    }

    pub fn filters(&self) -> Vec<&Expression> {
        self.clauses
            .iter()
            .filter_map(|c| if let Clause::Filter(e) = c { Some(e) } else { None })
            .collect()
    }

    pub fn sort(&self) -> Option<&Vec<(Expression, SortDirection)>> {
        self.clauses.iter().find_map(|c| if let Clause::Sort(s) = c { Some(s) } else { None })
    }

    pub fn limit(&self) -> Option<(Option<u64>, u64)> {
        self.clauses.iter().find_map(|c| if let Clause::Limit { offset, count } = c { Some((*offset, *count)) } else { None })
    }

    pub fn returns(&self) -> Option<(bool, &Expression)> {
        self.clauses.iter().find_map(|c| if let Clause::Return { distinct, expr } = c { Some((*distinct, expr)) } else { None })
    }

    pub fn lets(&self) -> Vec<(&str, &Expression)> {
        self.clauses
            .iter()
            .filter_map(|c| if let Clause::Let { var, expr } = c { Some((var.as_str(), expr)) } else { None })
            .collect()
    }

    pub fn with_bindings(&self) -> Option<&Vec<(String, Query)>> {
        self.clauses.iter().find_map(|c| if let Clause::With { bindings } = c { Some(bindings) } else { None })
    }
}
