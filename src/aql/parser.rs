//! AQL tokenizer and recursive-descent parser (`spec.md` §4.7). A hand
//! tokens-then-precedence-climbing parser rather than `nom` combinators:
//! AQL's context-sensitive clauses (`FOR v, e, p IN min..max OUTBOUND start
//! GRAPH name`) read more directly as a token-stream parser than as
//! combinator grammar, but the public `AqlParser` struct mirrors
//! `query/parser.rs`'s `QueryParser` shape — a configurable struct with a
//! single `parse(&self, input: &str)` entry point, same error-carrying
//! discipline via `core::error::Error`.

use crate::aql::ast::*;
use crate::core::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Number(f64, bool /* is_float */),
    Str(String),
    Symbol(char),
    DotDot,
    Eof,
}

#[derive(Debug, Clone)]
struct Spanned {
    tok: Tok,
    line: u32,
    col: u32,
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    src: &'a str,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { chars: src.char_indices().peekable(), src, line: 1, col: 1 }
    }

    fn bump(&mut self) -> Option<char> {
        let (_, c) = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn tokenize(mut self) -> Result<Vec<Spanned>> {
        let mut out = Vec::new();
        loop {
            self.skip_trivia();
            let (line, col) = (self.line, self.col);
            let Some(c) = self.peek_char() else {
                out.push(Spanned { tok: Tok::Eof, line, col });
                break;
            };
            let tok = if c.is_alphabetic() || c == '_' {
                self.lex_ident()
            } else if c.is_ascii_digit() {
                self.lex_number()?
            } else if c == '"' || c == '\'' {
                self.lex_string(c)?
            } else if c == '.' {
                self.bump();
                if self.peek_char() == Some('.') {
                    self.bump();
                    Tok::DotDot
                } else {
                    Tok::Symbol('.')
                }
            } else {
                self.lex_symbol()?
            };
            out.push(Spanned { tok, line, col });
        }
        Ok(out)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    let mut it = self.chars.clone();
                    it.next();
                    if matches!(it.peek(), Some((_, '/'))) {
                        while let Some(c) = self.peek_char() {
                            if c == '\n' {
                                break;
                            }
                            self.bump();
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_ident(&mut self) -> Tok {
        let mut s = String::new();
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Tok::Ident(s)
    }

    fn lex_number(&mut self) -> Result<Tok> {
        let mut s = String::new();
        let mut is_float = false;
        while let Some(c) = self.peek_char() {
            if c.is_ascii_digit() {
                s.push(c);
                self.bump();
            } else if c == '.' {
                let mut it = self.chars.clone();
                it.next();
                if matches!(it.peek(), Some((_, '.'))) {
                    break; // `..` range operator, not a decimal point
                }
                is_float = true;
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let n: f64 = s.parse().map_err(|_| Error::parse(format!("bad number literal `{}`", s)))?;
        Ok(Tok::Number(n, is_float))
    }

    fn lex_string(&mut self, quote: char) -> Result<Tok> {
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(Error::parse("unterminated escape in string literal")),
                },
                Some(c) if c == quote => break,
                Some(c) => s.push(c),
                None => return Err(Error::parse("unterminated string literal")),
            }
        }
        Ok(Tok::Str(s))
    }

    fn lex_symbol(&mut self) -> Result<Tok> {
        let c = self.bump().unwrap();
        match c {
            '=' if self.peek_char() == Some('=') => {
                self.bump();
                Ok(Tok::Ident("==".into()))
            }
            '!' if self.peek_char() == Some('=') => {
                self.bump();
                Ok(Tok::Ident("!=".into()))
            }
            '<' if self.peek_char() == Some('=') => {
                self.bump();
                Ok(Tok::Ident("<=".into()))
            }
            '>' if self.peek_char() == Some('=') => {
                self.bump();
                Ok(Tok::Ident(">=".into()))
            }
            '<' | '>' | '+' | '-' | '*' | '/' | '%' | '(' | ')' | '[' | ']' | '{' | '}' | ',' | ':' | '=' => {
                Ok(Tok::Symbol(c))
            }
            other => Err(Error::parse(format!("unexpected character '{}'", other))),
        }
    }
}

pub struct AqlParser;

impl Default for AqlParser {
    fn default() -> Self {
        AqlParser
    }
}

struct Parser {
    toks: Vec<Spanned>,
    pos: usize,
}

fn kw(tok: &Tok, word: &str) -> bool {
    matches!(tok, Tok::Ident(s) if s.eq_ignore_ascii_case(word))
}

impl Parser {
    fn peek(&self) -> &Tok {
        &self.toks[self.pos].tok
    }

    fn peek_at(&self, off: usize) -> &Tok {
        self.toks.get(self.pos + off).map(|s| &s.tok).unwrap_or(&Tok::Eof)
    }

    fn advance(&mut self) -> Tok {
        let t = self.toks[self.pos].tok.clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn err_here(&self, msg: impl Into<String>) -> Error {
        let s = &self.toks[self.pos];
        Error::parse(format!("{} at line {}, col {} (found {:?})", msg.into(), s.line, s.col, s.tok))
    }

    fn eat_kw(&mut self, word: &str) -> bool {
        if kw(self.peek(), word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, word: &str) -> Result<()> {
        if self.eat_kw(word) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected keyword `{}`", word)))
        }
    }

    fn eat_symbol(&mut self, c: char) -> bool {
        if matches!(self.peek(), Tok::Symbol(s) if *s == c) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, c: char) -> Result<()> {
        if self.eat_symbol(c) {
            Ok(())
        } else {
            Err(self.err_here(format!("expected `{}`", c)))
        }
    }

    fn ident(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Ident(s) => Ok(s),
            other => Err(self.err_here(format!("expected identifier, found {:?}", other))),
        }
    }

    fn string_lit(&mut self) -> Result<String> {
        match self.advance() {
            Tok::Str(s) => Ok(s),
            other => Err(self.err_here(format!("expected string literal, found {:?}", other))),
        }
    }

    // ---- top level --------------------------------------------------

    fn parse_query(&mut self) -> Result<Query> {
        let mut clauses = Vec::new();
        if kw(self.peek(), "WITH") {
            clauses.push(self.parse_with()?);
        }
        while !matches!(self.peek(), Tok::Eof) {
            clauses.push(self.parse_clause()?);
        }
        Ok(Query { clauses })
    }

    fn parse_with(&mut self) -> Result<Clause> {
        self.expect_kw("WITH")?;
        let mut bindings = Vec::new();
        loop {
            let name = self.ident()?;
            self.expect_kw("AS")?;
            self.expect_symbol('(')?;
            let sub = self.parse_query()?;
            self.expect_symbol(')')?;
            bindings.push((name, sub));
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Clause::With { bindings })
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        if kw(self.peek(), "FOR") {
            self.parse_for()
        } else if kw(self.peek(), "FILTER") {
            self.advance();
            Ok(Clause::Filter(self.parse_expr()?))
        } else if kw(self.peek(), "LET") {
            self.advance();
            let var = self.ident()?;
            self.expect_symbol('=')?;
            let expr = self.parse_expr()?;
            Ok(Clause::Let { var, expr })
        } else if kw(self.peek(), "COLLECT") {
            self.parse_collect()
        } else if kw(self.peek(), "SORT") {
            self.parse_sort()
        } else if kw(self.peek(), "LIMIT") {
            self.parse_limit()
        } else if kw(self.peek(), "RETURN") {
            self.parse_return()
        } else {
            Err(self.err_here("expected a clause keyword"))
        }
    }

    fn parse_for(&mut self) -> Result<Clause> {
        self.expect_kw("FOR")?;
        let first = self.ident()?;
        let mut second = None;
        let mut third = None;
        if self.eat_symbol(',') {
            second = Some(self.ident()?);
            if self.eat_symbol(',') {
                third = Some(self.ident()?);
            }
        }
        self.expect_kw("IN")?;

        // Graph traversal: `min..max {OUTBOUND|INBOUND|ANY} start GRAPH name`
        if matches!(self.peek(), Tok::Number(_, _)) && matches!(self.peek_at(1), Tok::DotDot) {
            let min_depth = self.number_u32()?;
            if !matches!(self.advance(), Tok::DotDot) {
                return Err(self.err_here("expected `..` in traversal depth range"));
            }
            let max_depth = self.number_u32()?;
            let direction = if self.eat_kw("OUTBOUND") {
                GraphDirection::Outbound
            } else if self.eat_kw("INBOUND") {
                GraphDirection::Inbound
            } else if self.eat_kw("ANY") {
                GraphDirection::Any
            } else {
                return Err(self.err_here("expected OUTBOUND/INBOUND/ANY"));
            };
            let start = self.parse_primary()?;
            self.expect_kw("GRAPH")?;
            let graph_name = self.string_lit().or_else(|_| self.ident())?;
            let mut shortest_path = false;
            let mut end_vertex = None;
            if self.eat_kw("SHORTEST_PATH") {
                self.expect_kw("TO")?;
                end_vertex = Some(self.parse_primary()?);
                shortest_path = true;
            }
            return Ok(Clause::GraphTraversal {
                vertex_var: first,
                edge_var: second,
                path_var: third,
                min_depth,
                max_depth,
                direction,
                start,
                graph_name,
                shortest_path,
                end_vertex,
            });
        }

        let collection = self.parse_expr()?;
        Ok(Clause::For { var: first, collection })
    }

    fn number_u32(&mut self) -> Result<u32> {
        match self.advance() {
            Tok::Number(n, _) => Ok(n as u32),
            other => Err(self.err_here(format!("expected a number, found {:?}", other))),
        }
    }

    fn parse_collect(&mut self) -> Result<Clause> {
        self.expect_kw("COLLECT")?;
        let mut groups = Vec::new();
        if !kw(self.peek(), "AGGREGATE") && !kw(self.peek(), "RETURN") && !matches!(self.peek(), Tok::Eof) {
            loop {
                let var = self.ident()?;
                self.expect_symbol('=')?;
                let expr = self.parse_expr()?;
                groups.push((var, expr));
                if !self.eat_symbol(',') {
                    break;
                }
            }
        }
        let mut aggregates = Vec::new();
        if self.eat_kw("AGGREGATE") {
            loop {
                let var = self.ident()?;
                self.expect_symbol('=')?;
                let func_name = self.ident()?;
                self.expect_symbol('(')?;
                let expr = if self.eat_symbol(')') { Expression::Literal(Literal::Null) } else {
                    let e = self.parse_expr()?;
                    self.expect_symbol(')')?;
                    e
                };
                let agg_fn = match func_name.to_uppercase().as_str() {
                    "SUM" => AggregateFn::Sum,
                    "AVG" => AggregateFn::Avg,
                    "COUNT" => AggregateFn::Count,
                    "MIN" => AggregateFn::Min,
                    "MAX" => AggregateFn::Max,
                    "COLLECT_INTO_ARRAY" => AggregateFn::CollectIntoArray,
                    other => return Err(self.err_here(format!("unknown aggregate function `{}`", other))),
                };
                aggregates.push((var, agg_fn, expr));
                if !self.eat_symbol(',') {
                    break;
                }
            }
        }
        Ok(Clause::Collect { groups, aggregates })
    }

    fn parse_sort(&mut self) -> Result<Clause> {
        self.expect_kw("SORT")?;
        let mut items = Vec::new();
        loop {
            let e = self.parse_expr()?;
            let dir = if self.eat_kw("DESC") {
                SortDirection::Desc
            } else {
                self.eat_kw("ASC");
                SortDirection::Asc
            };
            items.push((e, dir));
            if !self.eat_symbol(',') {
                break;
            }
        }
        Ok(Clause::Sort(items))
    }

    fn parse_limit(&mut self) -> Result<Clause> {
        self.expect_kw("LIMIT")?;
        let first = self.number_u32()? as u64;
        if self.eat_symbol(',') {
            let count = self.number_u32()? as u64;
            Ok(Clause::Limit { offset: Some(first), count })
        } else {
            Ok(Clause::Limit { offset: None, count: first })
        }
    }

    fn parse_return(&mut self) -> Result<Clause> {
        self.expect_kw("RETURN")?;
        let distinct = self.eat_kw("DISTINCT");
        let expr = self.parse_expr()?;
        Ok(Clause::Return { distinct, expr })
    }

    // ---- expressions: precedence climbing ----------------------------

    fn parse_expr(&mut self) -> Result<Expression> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_and()?;
        loop {
            if self.eat_kw("OR") {
                let rhs = self.parse_and()?;
                lhs = Expression::BinaryOp { op: BinOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else if self.eat_kw("XOR") {
                let rhs = self.parse_and()?;
                lhs = Expression::BinaryOp { op: BinOp::Xor, lhs: Box::new(lhs), rhs: Box::new(rhs) };
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_not()?;
        while self.eat_kw("AND") {
            let rhs = self.parse_not()?;
            lhs = Expression::BinaryOp { op: BinOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expression> {
        if self.eat_kw("NOT") {
            let inner = self.parse_not()?;
            return Ok(Expression::UnaryOp { op: UnOp::Not, expr: Box::new(inner) });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expression> {
        let lhs = self.parse_additive()?;
        let op = if kw(self.peek(), "==") {
            Some(BinOp::Eq)
        } else if kw(self.peek(), "!=") {
            Some(BinOp::Neq)
        } else if kw(self.peek(), "<=") {
            Some(BinOp::Lte)
        } else if kw(self.peek(), ">=") {
            Some(BinOp::Gte)
        } else if matches!(self.peek(), Tok::Symbol('<')) {
            Some(BinOp::Lt)
        } else if matches!(self.peek(), Tok::Symbol('>')) {
            Some(BinOp::Gt)
        } else if kw(self.peek(), "IN") {
            Some(BinOp::In)
        } else {
            None
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Expression::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) });
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol('+') {
                BinOp::Add
            } else if self.eat_symbol('-') {
                BinOp::Sub
            } else {
                break;
            };
            let rhs = self.parse_multiplicative()?;
            lhs = Expression::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol('*') {
                BinOp::Mul
            } else if self.eat_symbol('/') {
                BinOp::Div
            } else if self.eat_symbol('%') {
                BinOp::Mod
            } else {
                break;
            };
            let rhs = self.parse_unary()?;
            lhs = Expression::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expression> {
        if self.eat_symbol('-') {
            let inner = self.parse_unary()?;
            return Ok(Expression::UnaryOp { op: UnOp::Neg, expr: Box::new(inner) });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression> {
        let mut base = self.parse_primary()?;
        loop {
            if self.eat_symbol('.') {
                let field = self.ident()?;
                let mut path = vec![field];
                while self.eat_symbol('.') {
                    path.push(self.ident()?);
                }
                base = Expression::FieldAccess { base: Box::new(base), path };
            } else {
                break;
            }
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expression> {
        match self.peek().clone() {
            Tok::Number(n, is_float) => {
                self.advance();
                Ok(Expression::Literal(if is_float { Literal::Float(n) } else { Literal::Int(n as i64) }))
            }
            Tok::Str(s) => {
                self.advance();
                Ok(Expression::Literal(Literal::Str(s)))
            }
            Tok::Symbol('(') => {
                self.advance();
                let e = self.parse_expr()?;
                self.expect_symbol(')')?;
                Ok(e)
            }
            Tok::Symbol('[') => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat_symbol(']') {
                    loop {
                        items.push(self.parse_expr()?);
                        if !self.eat_symbol(',') {
                            break;
                        }
                    }
                    self.expect_symbol(']')?;
                }
                Ok(Expression::ArrayLit(items))
            }
            Tok::Symbol('{') => {
                self.advance();
                let mut fields = Vec::new();
                if !self.eat_symbol('}') {
                    loop {
                        let key = match self.advance() {
                            Tok::Ident(s) => s,
                            Tok::Str(s) => s,
                            other => return Err(self.err_here(format!("expected object key, found {:?}", other))),
                        };
                        self.expect_symbol(':')?;
                        let val = self.parse_expr()?;
                        fields.push((key, val));
                        if !self.eat_symbol(',') {
                            break;
                        }
                    }
                    self.expect_symbol('}')?;
                }
                Ok(Expression::ObjectLit(fields))
            }
            Tok::Ident(name) => {
                if name.eq_ignore_ascii_case("true") {
                    self.advance();
                    return Ok(Expression::Literal(Literal::Bool(true)));
                }
                if name.eq_ignore_ascii_case("false") {
                    self.advance();
                    return Ok(Expression::Literal(Literal::Bool(false)));
                }
                if name.eq_ignore_ascii_case("null") {
                    self.advance();
                    return Ok(Expression::Literal(Literal::Null));
                }
                if matches!(self.peek_at(1), Tok::Symbol('(')) {
                    return self.parse_call(name);
                }
                self.advance();
                Ok(Expression::Variable(name))
            }
            other => Err(self.err_here(format!("unexpected token {:?}", other))),
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expression> {
        self.advance(); // the identifier
        self.expect_symbol('(')?;
        let mut args = Vec::new();
        if !self.eat_symbol(')') {
            loop {
                args.push(self.parse_expr()?);
                if !self.eat_symbol(',') {
                    break;
                }
            }
            self.expect_symbol(')')?;
        }
        match name.to_uppercase().as_str() {
            "SIMILARITY" if args.len() >= 2 => Ok(Expression::SimilarityCall {
                field: Box::new(args[0].clone()),
                query: Box::new(args[1].clone()),
                k: args.get(2).cloned().map(Box::new),
            }),
            "PROXIMITY" if args.len() >= 2 => {
                Ok(Expression::ProximityCall { field: Box::new(args[0].clone()), center: Box::new(args[1].clone()) })
            }
            "FULLTEXT" if args.len() >= 2 => Ok(Expression::FulltextCall {
                field: Box::new(args[0].clone()),
                query: Box::new(args[1].clone()),
                k: args.get(2).cloned().map(Box::new),
            }),
            _ => Ok(Expression::FunctionCall { name, args }),
        }
    }
}

impl AqlParser {
    pub fn new() -> Self {
        AqlParser
    }

    pub fn parse(&self, input: &str) -> Result<Query> {
        let toks = Lexer::new(input).tokenize()?;
        let mut parser = Parser { toks, pos: 0 };
        let q = parser.parse_query()?;
        if !matches!(parser.peek(), Tok::Eof) {
            return Err(parser.err_here("trailing input after query"));
        }
        Ok(q)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_conjunctive_query() {
        let q = AqlParser::new()
            .parse(r#"FOR doc IN users FILTER doc.city == "Berlin" AND doc.age == 30 RETURN doc"#)
            .unwrap();
        assert_eq!(q.clauses.len(), 3);
        assert!(matches!(q.clauses[0], Clause::For { .. }));
        assert!(matches!(q.clauses[1], Clause::Filter(_)));
    }

    #[test]
    fn parses_or_query() {
        let q = AqlParser::new()
            .parse(r#"FOR u IN users FILTER u.city == "Berlin" OR u.age == 30 RETURN u"#)
            .unwrap();
        let filter = q.filters()[0];
        assert!(filter.contains_or());
    }

    #[test]
    fn parses_fulltext_and_year_filter() {
        let q = AqlParser::new()
            .parse(r#"FOR doc IN articles FILTER FULLTEXT(doc.content, "deep learning") AND doc.year == 2024 RETURN doc"#)
            .unwrap();
        assert_eq!(q.filters().len(), 1);
    }

    #[test]
    fn parses_vector_geo_hybrid() {
        let q = AqlParser::new()
            .parse(
                r#"FOR d IN images FILTER ST_Within(d.location, [13.4,52.5,13.5,52.6]) SORT SIMILARITY(d.embedding, Q) DESC LIMIT 10 RETURN d"#,
            )
            .unwrap();
        assert!(q.sort().is_some());
    }

    #[test]
    fn parses_shortest_path_traversal() {
        let q = AqlParser::new()
            .parse(r#"FOR v IN 1..3 OUTBOUND "Berlin" GRAPH "cities" SHORTEST_PATH TO "Dresden" RETURN v"#)
            .unwrap();
        assert!(matches!(q.clauses[0], Clause::GraphTraversal { shortest_path: true, .. }));
    }

    #[test]
    fn parses_cursor_style_limit_and_sort() {
        let q = AqlParser::new().parse(r#"FOR u IN bench_users SORT u.age ASC LIMIT 0, 51 RETURN u"#).unwrap();
        assert_eq!(q.limit(), Some((Some(0), 51)));
    }
}
