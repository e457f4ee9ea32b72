// src/query/parser.rs

//! Recursive-descent parser producing the query AST.
//!
//! The grammar is XPath 1.0 plus the `if (c) then a else b` conditional.
//! Dialect restrictions are applied afterwards by [`check_basic`].

use crate::query::QueryError;
use crate::query::functions;
use crate::query::lexer::{Token, tokenize};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    Arith(ArithOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Union(Box<Expr>, Box<Expr>),
    Path(LocationPath),
    /// Primary expression with predicates and trailing steps, e.g. `(//a)[1]/@href`
    Filter {
        primary: Box<Expr>,
        predicates: Vec<Expr>,
        steps: Vec<Step>,
    },
    Literal(String),
    Number(f64),
    Call(String, Vec<Expr>),
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LocationPath {
    pub absolute: bool,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

impl Step {
    fn new(axis: Axis, test: NodeTest) -> Self {
        Self {
            axis,
            test,
            predicates: Vec::new(),
        }
    }

    fn descendant_or_self() -> Self {
        Self::new(Axis::DescendantOrSelf, NodeTest::Node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
    SelfAxis,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Axis::Child,
            "descendant" => Axis::Descendant,
            "descendant-or-self" => Axis::DescendantOrSelf,
            "parent" => Axis::Parent,
            "ancestor" => Axis::Ancestor,
            "ancestor-or-self" => Axis::AncestorOrSelf,
            "following-sibling" => Axis::FollowingSibling,
            "preceding-sibling" => Axis::PrecedingSibling,
            "following" => Axis::Following,
            "preceding" => Axis::Preceding,
            "attribute" => Axis::Attribute,
            "self" => Axis::SelfAxis,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum NodeTest {
    /// Lowercased element or attribute name
    Name(String),
    Wildcard,
    Text,
    Node,
    Comment,
}

const NODE_TYPES: [&str; 3] = ["text", "node", "comment"];

/// Parse a query string into an expression tree.
pub(crate) fn parse(input: &str) -> Result<Expr, QueryError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(QueryError::syntax(0, "empty query"));
    }

    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expr()?;
    if let Some(token) = parser.peek() {
        return Err(QueryError::syntax(
            parser.pos,
            format!("unexpected trailing token {token:?}"),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), QueryError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn expect_name(&mut self, name: &str) -> Result<(), QueryError> {
        if self.peek_name(name) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected '{name}'")))
        }
    }

    fn error(&self, message: impl Into<String>) -> QueryError {
        let found = match self.peek() {
            Some(token) => format!("{token:?}"),
            None => "end of query".to_string(),
        };
        QueryError::syntax(self.pos, format!("{}, found {found}", message.into()))
    }

    fn parse_expr(&mut self) -> Result<Expr, QueryError> {
        if self.peek_name("if") && self.peek_at(1) == Some(&Token::LParen) {
            return self.parse_if();
        }
        self.parse_or()
    }

    fn parse_if(&mut self) -> Result<Expr, QueryError> {
        self.expect_name("if")?;
        self.expect(&Token::LParen)?;
        let condition = self.parse_expr()?;
        self.expect(&Token::RParen)?;
        self.expect_name("then")?;
        let then = self.parse_expr()?;
        self.expect_name("else")?;
        let otherwise = self.parse_expr()?;
        Ok(Expr::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_and()?;
        while self.peek_name("or") {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_equality()?;
        while self.peek_name("and") {
            self.advance();
            let right = self.parse_equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => CompareOp::Eq,
                Some(Token::NotEq) => CompareOp::NotEq,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_relational()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_relational(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => CompareOp::Lt,
                Some(Token::Le) => CompareOp::Le,
                Some(Token::Gt) => CompareOp::Gt,
                Some(Token::Ge) => CompareOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_additive()?;
            left = Expr::Compare(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => ArithOp::Add,
                Some(Token::Minus) => ArithOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => ArithOp::Mul,
                Some(Token::Name(n)) if n == "div" => ArithOp::Div,
                Some(Token::Name(n)) if n == "mod" => ArithOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::Arith(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, QueryError> {
        if self.eat(&Token::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.parse_union()
    }

    fn parse_union(&mut self) -> Result<Expr, QueryError> {
        let mut left = self.parse_path_expr()?;
        while self.eat(&Token::Pipe) {
            let right = self.parse_path_expr()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path_expr(&mut self) -> Result<Expr, QueryError> {
        match self.peek() {
            Some(Token::Slash | Token::DoubleSlash) => self.parse_location_path(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star) => {
                self.parse_location_path()
            }
            Some(Token::Name(name)) => {
                let is_call = self.peek_at(1) == Some(&Token::LParen)
                    && !NODE_TYPES.contains(&name.as_str());
                if is_call {
                    self.parse_filter_expr()
                } else {
                    self.parse_location_path()
                }
            }
            Some(Token::LParen | Token::Literal(_) | Token::Number(_)) => {
                self.parse_filter_expr()
            }
            _ => Err(self.error("expected expression")),
        }
    }

    fn parse_filter_expr(&mut self) -> Result<Expr, QueryError> {
        let primary = self.parse_primary()?;
        let predicates = self.parse_predicates()?;

        let mut steps = Vec::new();
        match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                steps = self.parse_relative_path()?;
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                steps.push(Step::descendant_or_self());
                steps.extend(self.parse_relative_path()?);
            }
            _ => {}
        }

        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter {
            primary: Box::new(primary),
            predicates,
            steps,
        })
    }

    fn parse_primary(&mut self) -> Result<Expr, QueryError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.error("expected primary expression"));
        };
        match token {
            Token::LParen => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Literal(value) => {
                self.advance();
                Ok(Expr::Literal(value))
            }
            Token::Number(value) => {
                self.advance();
                Ok(Expr::Number(value))
            }
            Token::Name(name) => {
                self.advance();
                self.expect(&Token::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Token::RParen) {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.eat(&Token::RParen) {
                            break;
                        }
                        self.expect(&Token::Comma)?;
                    }
                }
                Ok(Expr::Call(name, args))
            }
            _ => Err(self.error("expected primary expression")),
        }
    }

    fn parse_location_path(&mut self) -> Result<Expr, QueryError> {
        let path = match self.peek() {
            Some(Token::Slash) => {
                self.advance();
                let steps = if self.can_start_step() {
                    self.parse_relative_path()?
                } else {
                    Vec::new()
                };
                LocationPath {
                    absolute: true,
                    steps,
                }
            }
            Some(Token::DoubleSlash) => {
                self.advance();
                let mut steps = vec![Step::descendant_or_self()];
                steps.extend(self.parse_relative_path()?);
                LocationPath {
                    absolute: true,
                    steps,
                }
            }
            _ => LocationPath {
                absolute: false,
                steps: self.parse_relative_path()?,
            },
        };
        Ok(Expr::Path(path))
    }

    fn can_start_step(&self) -> bool {
        matches!(
            self.peek(),
            Some(Token::Dot | Token::DotDot | Token::At | Token::Star | Token::Name(_))
        )
    }

    fn parse_relative_path(&mut self) -> Result<Vec<Step>, QueryError> {
        let mut steps = vec![self.parse_step()?];
        loop {
            match self.peek() {
                Some(Token::Slash) => {
                    self.advance();
                    steps.push(self.parse_step()?);
                }
                Some(Token::DoubleSlash) => {
                    self.advance();
                    steps.push(Step::descendant_or_self());
                    steps.push(self.parse_step()?);
                }
                _ => return Ok(steps),
            }
        }
    }

    fn parse_step(&mut self) -> Result<Step, QueryError> {
        if self.eat(&Token::Dot) {
            return Ok(Step::new(Axis::SelfAxis, NodeTest::Node));
        }
        if self.eat(&Token::DotDot) {
            return Ok(Step::new(Axis::Parent, NodeTest::Node));
        }

        let explicit_axis = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Name(name)), Some(Token::ColonColon)) => Some(name.clone()),
            _ => None,
        };
        let axis = if self.eat(&Token::At) {
            Axis::Attribute
        } else if let Some(name) = explicit_axis {
            let axis = Axis::from_name(&name)
                .ok_or_else(|| self.error(format!("unknown axis '{name}'")))?;
            self.pos += 2;
            axis
        } else {
            Axis::Child
        };

        let test = match self.peek().cloned() {
            Some(Token::Star) => {
                self.advance();
                NodeTest::Wildcard
            }
            Some(Token::Name(name)) if self.peek_at(1) == Some(&Token::LParen) => {
                let test = match name.as_str() {
                    "text" => NodeTest::Text,
                    "node" => NodeTest::Node,
                    "comment" => NodeTest::Comment,
                    _ => return Err(self.error(format!("'{name}()' is not a node test"))),
                };
                self.pos += 1;
                self.expect(&Token::LParen)?;
                self.expect(&Token::RParen)?;
                test
            }
            Some(Token::Name(name)) => {
                self.advance();
                NodeTest::Name(name.to_lowercase())
            }
            _ => return Err(self.error("expected node test")),
        };

        let predicates = self.parse_predicates()?;
        Ok(Step {
            axis,
            test,
            predicates,
        })
    }

    fn parse_predicates(&mut self) -> Result<Vec<Expr>, QueryError> {
        let mut predicates = Vec::new();
        while self.eat(&Token::LBracket) {
            predicates.push(self.parse_expr()?);
            self.expect(&Token::RBracket)?;
        }
        Ok(predicates)
    }
}

/// Reject anything outside the basic dialect.
///
/// The basic dialect selects nodes: the query must be a location path or a
/// union of them, steps use the abbreviated axes, and predicates are limited
/// to positions, existence tests and comparisons.
pub(crate) fn check_basic(expr: &Expr) -> Result<(), QueryError> {
    match expr {
        Expr::Path(path) => check_basic_path(path),
        Expr::Union(left, right) => {
            check_basic(left)?;
            check_basic(right)
        }
        other => Err(QueryError::unsupported_basic(describe(other))),
    }
}

fn check_basic_path(path: &LocationPath) -> Result<(), QueryError> {
    for step in &path.steps {
        if !matches!(
            step.axis,
            Axis::Child | Axis::DescendantOrSelf | Axis::SelfAxis | Axis::Parent | Axis::Attribute
        ) {
            return Err(QueryError::unsupported_basic(format!("{:?} axis", step.axis)));
        }
        for predicate in &step.predicates {
            check_basic_predicate(predicate)?;
        }
    }
    Ok(())
}

fn check_basic_predicate(expr: &Expr) -> Result<(), QueryError> {
    match expr {
        Expr::Number(_) | Expr::Literal(_) => Ok(()),
        Expr::Path(path) => check_basic_path(path),
        Expr::Compare(_, left, right) | Expr::And(left, right) | Expr::Or(left, right) => {
            check_basic_predicate(left)?;
            check_basic_predicate(right)
        }
        Expr::Arith(ArithOp::Add | ArithOp::Sub, left, right) => {
            check_basic_predicate(left)?;
            check_basic_predicate(right)
        }
        Expr::Call(name, args) if (name == "last" || name == "position") && args.is_empty() => {
            Ok(())
        }
        Expr::Call(name, args) if name == "not" && args.len() == 1 => {
            check_basic_predicate(&args[0])
        }
        other => Err(QueryError::unsupported_basic(describe(other))),
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Call(name, _) => format!("function {name}()"),
        Expr::If { .. } => "conditional expression".to_string(),
        Expr::Filter { .. } => "filter expression".to_string(),
        Expr::Literal(_) => "string literal result".to_string(),
        Expr::Number(_) => "numeric result".to_string(),
        Expr::Arith(..) | Expr::Neg(_) => "arithmetic".to_string(),
        Expr::Compare(..) | Expr::And(..) | Expr::Or(..) => "boolean result".to_string(),
        Expr::Path(_) | Expr::Union(..) => "path".to_string(),
    }
}

/// Verify function names and arities throughout the tree.
pub(crate) fn check_functions(expr: &Expr) -> Result<(), QueryError> {
    match expr {
        Expr::Or(l, r)
        | Expr::And(l, r)
        | Expr::Compare(_, l, r)
        | Expr::Arith(_, l, r)
        | Expr::Union(l, r) => {
            check_functions(l)?;
            check_functions(r)
        }
        Expr::Neg(inner) => check_functions(inner),
        Expr::Path(path) => check_steps(&path.steps),
        Expr::Filter {
            primary,
            predicates,
            steps,
        } => {
            check_functions(primary)?;
            predicates.iter().try_for_each(check_functions)?;
            check_steps(steps)
        }
        Expr::Literal(_) | Expr::Number(_) => Ok(()),
        Expr::Call(name, args) => {
            functions::check_call(name, args)?;
            args.iter().try_for_each(check_functions)
        }
        Expr::If {
            condition,
            then,
            otherwise,
        } => {
            check_functions(condition)?;
            check_functions(then)?;
            check_functions(otherwise)
        }
    }
}

fn check_steps(steps: &[Step]) -> Result<(), QueryError> {
    steps
        .iter()
        .flat_map(|step| step.predicates.iter())
        .try_for_each(check_functions)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_steps(expr: &Expr) -> &[Step] {
        match expr {
            Expr::Path(path) => &path.steps,
            other => panic!("expected path, got {other:?}"),
        }
    }

    #[test]
    fn test_double_slash_expands() {
        let expr = parse("//h1/text()").unwrap();
        let steps = path_steps(&expr);
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].axis, Axis::DescendantOrSelf);
        assert_eq!(steps[1].test, NodeTest::Name("h1".into()));
        assert_eq!(steps[2].test, NodeTest::Text);
    }

    #[test]
    fn test_names_are_lowercased() {
        let expr = parse("//DIV/@Class").unwrap();
        let steps = path_steps(&expr);
        assert_eq!(steps[1].test, NodeTest::Name("div".into()));
        assert_eq!(steps[2].axis, Axis::Attribute);
        assert_eq!(steps[2].test, NodeTest::Name("class".into()));
    }

    #[test]
    fn test_operator_names_after_operands() {
        let expr = parse("count(//a) div 2").unwrap();
        assert!(matches!(expr, Expr::Arith(ArithOp::Div, _, _)));

        // `div` in step position is an element name
        let expr = parse("//div").unwrap();
        assert_eq!(path_steps(&expr)[1].test, NodeTest::Name("div".into()));
    }

    #[test]
    fn test_star_is_wildcard_or_multiply() {
        let expr = parse("//*").unwrap();
        assert_eq!(path_steps(&expr)[1].test, NodeTest::Wildcard);

        let expr = parse("2 * 3").unwrap();
        assert!(matches!(expr, Expr::Arith(ArithOp::Mul, _, _)));
    }

    #[test]
    fn test_filter_expression() {
        let expr = parse("(//a)[1]/@href").unwrap();
        match expr {
            Expr::Filter {
                predicates, steps, ..
            } => {
                assert_eq!(predicates.len(), 1);
                assert_eq!(steps.len(), 1);
            }
            other => panic!("expected filter, got {other:?}"),
        }
    }

    #[test]
    fn test_if_expression() {
        let expr = parse("if (count(//li) > 2) then 'many' else 'few'").unwrap();
        assert!(matches!(expr, Expr::If { .. }));
    }

    #[test]
    fn test_explicit_axes() {
        let expr = parse("//li/following-sibling::li[1]").unwrap();
        assert_eq!(path_steps(&expr)[2].axis, Axis::FollowingSibling);
        assert!(parse("//li/sideways::li").is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("//a[").is_err());
        assert!(parse("//a]").is_err());
        assert!(parse("concat('a',").is_err());
        assert!(parse("//foo()").is_err());
    }

    #[test]
    fn test_basic_dialect_accepts_paths() {
        for query in [
            "//h1/text()",
            "//ul/li[2]",
            "//ul/li[last()]",
            "//a[@href]/@href",
            "//div[@class='item' and @id]/span",
            "//tr[position() < 3]/td",
            "//li[not(@hidden)]",
            "//h1 | //h2",
            "/html/body/..",
        ] {
            let expr = parse(query).unwrap();
            assert!(check_basic(&expr).is_ok(), "rejected {query}");
        }
    }

    #[test]
    fn test_basic_dialect_rejects_extended_constructs() {
        for query in [
            "count(//li)",
            "//a[contains(@href, 'x')]",
            "string-join(//li, ',')",
            "if (//a) then 'y' else 'n'",
            "(//a)[1]",
            "//li/following-sibling::li",
            "'literal'",
        ] {
            let expr = parse(query).unwrap();
            assert!(check_basic(&expr).is_err(), "accepted {query}");
        }
    }

    #[test]
    fn test_function_checks() {
        assert!(check_functions(&parse("concat('a', 'b', 'c')").unwrap()).is_ok());
        assert!(check_functions(&parse("frobnicate(1)").unwrap()).is_err());
        assert!(check_functions(&parse("substring('abc')").unwrap()).is_err());
        assert!(check_functions(&parse("//a[count()]").unwrap()).is_err());
    }
}
