// src/query/eval.rs

//! Tree-walking evaluator for compiled queries.
//!
//! Node-sets are kept in document order without duplicates. Inside a step,
//! predicate positions follow the axis direction, so reverse axes count
//! nearest-first.

use std::collections::HashSet;
use std::iter;

use ego_tree::{NodeId, NodeRef};
use scraper::Node;

use crate::query::functions;
use crate::query::parser::{ArithOp, Axis, CompareOp, Expr, LocationPath, NodeTest, Step};
use crate::query::{Document, QueryError};

/// A member of a node-set.
#[derive(Clone, Copy)]
pub(crate) enum Item<'a> {
    Node(NodeRef<'a, Node>),
    Attr {
        owner: NodeRef<'a, Node>,
        index: usize,
        name: &'a str,
        value: &'a str,
    },
}

/// Result of evaluating an expression.
pub(crate) enum Value<'a> {
    Nodes(Vec<Item<'a>>),
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Clone, Copy)]
pub(crate) struct Context<'a> {
    pub item: Item<'a>,
    pub position: usize,
    pub size: usize,
}

pub(crate) struct Evaluator<'a> {
    doc: &'a Document,
}

impl<'a> Evaluator<'a> {
    pub fn new(doc: &'a Document) -> Self {
        Self { doc }
    }

    /// Evaluate with the document node as context.
    pub fn eval_root(&self, expr: &Expr) -> Result<Value<'a>, QueryError> {
        let ctx = Context {
            item: Item::Node(self.doc.root()),
            position: 1,
            size: 1,
        };
        self.eval(expr, &ctx)
    }

    pub fn eval(&self, expr: &Expr, ctx: &Context<'a>) -> Result<Value<'a>, QueryError> {
        Ok(match expr {
            Expr::Or(left, right) => {
                Value::Bool(self.eval_bool(left, ctx)? || self.eval_bool(right, ctx)?)
            }
            Expr::And(left, right) => {
                Value::Bool(self.eval_bool(left, ctx)? && self.eval_bool(right, ctx)?)
            }
            Expr::Compare(op, left, right) => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                Value::Bool(self.compare(*op, &left, &right))
            }
            Expr::Arith(op, left, right) => {
                let a = self.eval_number(left, ctx)?;
                let b = self.eval_number(right, ctx)?;
                Value::Num(match op {
                    ArithOp::Add => a + b,
                    ArithOp::Sub => a - b,
                    ArithOp::Mul => a * b,
                    ArithOp::Div => a / b,
                    ArithOp::Mod => a % b,
                })
            }
            Expr::Neg(inner) => Value::Num(-self.eval_number(inner, ctx)?),
            Expr::Union(left, right) => {
                let mut items = self.eval_nodes(left, ctx, "union operand")?;
                items.extend(self.eval_nodes(right, ctx, "union operand")?);
                Value::Nodes(self.sort_unique(items))
            }
            Expr::Path(path) => Value::Nodes(self.eval_path(path, ctx)?),
            Expr::Filter {
                primary,
                predicates,
                steps,
            } => {
                let items = self.eval_nodes(primary, ctx, "filtered expression")?;
                let items = self.filter(self.sort_unique(items), predicates)?;
                Value::Nodes(self.apply_steps(items, steps)?)
            }
            Expr::Literal(text) => Value::Str(text.clone()),
            Expr::Number(n) => Value::Num(*n),
            Expr::Call(name, args) => functions::call(self, name, args, ctx)?,
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if self.eval_bool(condition, ctx)? {
                    self.eval(then, ctx)?
                } else {
                    self.eval(otherwise, ctx)?
                }
            }
        })
    }

    fn eval_bool(&self, expr: &Expr, ctx: &Context<'a>) -> Result<bool, QueryError> {
        Ok(self.to_bool(&self.eval(expr, ctx)?))
    }

    fn eval_number(&self, expr: &Expr, ctx: &Context<'a>) -> Result<f64, QueryError> {
        Ok(self.to_number(&self.eval(expr, ctx)?))
    }

    pub fn eval_nodes(
        &self,
        expr: &Expr,
        ctx: &Context<'a>,
        what: &str,
    ) -> Result<Vec<Item<'a>>, QueryError> {
        match self.eval(expr, ctx)? {
            Value::Nodes(items) => Ok(items),
            _ => Err(QueryError::evaluation(format!("{what} must be a node-set"))),
        }
    }

    fn eval_path(
        &self,
        path: &LocationPath,
        ctx: &Context<'a>,
    ) -> Result<Vec<Item<'a>>, QueryError> {
        let start = if path.absolute {
            Item::Node(self.doc.root())
        } else {
            ctx.item
        };
        self.apply_steps(vec![start], &path.steps)
    }

    fn apply_steps(
        &self,
        mut items: Vec<Item<'a>>,
        steps: &[Step],
    ) -> Result<Vec<Item<'a>>, QueryError> {
        for step in steps {
            let mut next = Vec::new();
            for item in &items {
                let candidates: Vec<Item<'a>> = self
                    .axis(*item, step.axis)
                    .into_iter()
                    .filter(|candidate| matches_test(candidate, step.axis, &step.test))
                    .collect();
                next.extend(self.filter(candidates, &step.predicates)?);
            }
            items = self.sort_unique(next);
        }
        Ok(items)
    }

    /// Apply predicates in turn, numbering items by their current order.
    fn filter(
        &self,
        mut items: Vec<Item<'a>>,
        predicates: &[Expr],
    ) -> Result<Vec<Item<'a>>, QueryError> {
        for predicate in predicates {
            let size = items.len();
            let mut kept = Vec::with_capacity(size);
            for (index, item) in items.into_iter().enumerate() {
                let ctx = Context {
                    item,
                    position: index + 1,
                    size,
                };
                let holds = match self.eval(predicate, &ctx)? {
                    Value::Num(n) => n == ctx.position as f64,
                    other => self.to_bool(&other),
                };
                if holds {
                    kept.push(item);
                }
            }
            items = kept;
        }
        Ok(items)
    }

    fn axis(&self, item: Item<'a>, axis: Axis) -> Vec<Item<'a>> {
        let node = match item {
            Item::Node(node) => node,
            Item::Attr { owner, .. } => {
                return match axis {
                    Axis::SelfAxis => vec![item],
                    Axis::Parent => vec![Item::Node(owner)],
                    Axis::Ancestor => iter::once(owner)
                        .chain(owner.ancestors())
                        .map(Item::Node)
                        .collect(),
                    Axis::AncestorOrSelf => iter::once(item)
                        .chain(iter::once(owner).chain(owner.ancestors()).map(Item::Node))
                        .collect(),
                    _ => Vec::new(),
                };
            }
        };

        let nodes: Vec<NodeRef<'a, Node>> = match axis {
            Axis::Child => node.children().collect(),
            Axis::Descendant => node.descendants().skip(1).collect(),
            Axis::DescendantOrSelf => node.descendants().collect(),
            Axis::Parent => node.parent().into_iter().collect(),
            Axis::Ancestor => node.ancestors().collect(),
            Axis::AncestorOrSelf => iter::once(node).chain(node.ancestors()).collect(),
            Axis::FollowingSibling => node.next_siblings().collect(),
            Axis::PrecedingSibling => node.prev_siblings().collect(),
            Axis::Following => iter::once(node)
                .chain(node.ancestors())
                .flat_map(|n| n.next_siblings())
                .flat_map(|n| n.descendants())
                .collect(),
            Axis::Preceding => {
                let here = self.doc.position(node.id());
                let ancestors: HashSet<NodeId> = node.ancestors().map(|a| a.id()).collect();
                let mut preceding: Vec<_> = self
                    .doc
                    .root()
                    .descendants()
                    .filter(|n| self.doc.position(n.id()) < here && !ancestors.contains(&n.id()))
                    .collect();
                preceding.reverse();
                preceding
            }
            Axis::SelfAxis => vec![node],
            Axis::Attribute => return attributes(node),
        };
        nodes.into_iter().map(Item::Node).collect()
    }

    pub fn sort_unique(&self, mut items: Vec<Item<'a>>) -> Vec<Item<'a>> {
        items.sort_by_key(|item| self.order_key(item));
        items.dedup_by_key(|item| self.order_key(item));
        items
    }

    fn order_key(&self, item: &Item<'a>) -> (usize, usize) {
        match item {
            Item::Node(node) => (self.doc.position(node.id()), 0),
            Item::Attr { owner, index, .. } => (self.doc.position(owner.id()), index + 1),
        }
    }

    /// Concatenated text of a node, or an attribute's value.
    pub fn string_value(&self, item: &Item<'a>) -> String {
        match item {
            Item::Attr { value, .. } => value.to_string(),
            Item::Node(node) => match node.value() {
                Node::Text(text) => String::from(&**text),
                Node::Comment(comment) => String::from(&**comment),
                Node::Element(_) | Node::Document | Node::Fragment => node
                    .descendants()
                    .filter_map(|d| d.value().as_text())
                    .map(|text| &**text)
                    .collect(),
                _ => String::new(),
            },
        }
    }

    pub fn item_name(&self, item: &Item<'a>) -> String {
        match item {
            Item::Attr { name, .. } => name.to_string(),
            Item::Node(node) => node
                .value()
                .as_element()
                .map(|el| el.name().to_string())
                .unwrap_or_default(),
        }
    }

    pub fn to_string(&self, value: &Value<'a>) -> String {
        match value {
            Value::Nodes(items) => items
                .first()
                .map(|item| self.string_value(item))
                .unwrap_or_default(),
            Value::Str(text) => text.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    pub fn to_number(&self, value: &Value<'a>) -> f64 {
        match value {
            Value::Nodes(_) => parse_number(&self.to_string(value)),
            Value::Str(text) => parse_number(text),
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
        }
    }

    pub fn to_bool(&self, value: &Value<'a>) -> bool {
        match value {
            Value::Nodes(items) => !items.is_empty(),
            Value::Str(text) => !text.is_empty(),
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Bool(b) => *b,
        }
    }

    fn compare(&self, op: CompareOp, left: &Value<'a>, right: &Value<'a>) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => {
                let right_strings: Vec<Value<'a>> = b
                    .iter()
                    .map(|item| Value::Str(self.string_value(item)))
                    .collect();
                a.iter().any(|item| {
                    let own = Value::Str(self.string_value(item));
                    right_strings
                        .iter()
                        .any(|other| self.compare_scalars(op, &own, other))
                })
            }
            (Value::Nodes(items), other) => self.compare_nodes(op, items, other, false),
            (other, Value::Nodes(items)) => self.compare_nodes(op, items, other, true),
            (a, b) => self.compare_scalars(op, a, b),
        }
    }

    /// Node-set against a scalar: true if any member satisfies the comparison.
    fn compare_nodes(
        &self,
        op: CompareOp,
        items: &[Item<'a>],
        other: &Value<'a>,
        swapped: bool,
    ) -> bool {
        let ordered = |own: &Value<'a>| {
            if swapped {
                self.compare_scalars(op, other, own)
            } else {
                self.compare_scalars(op, own, other)
            }
        };

        if let Value::Bool(_) = other {
            return ordered(&Value::Bool(!items.is_empty()));
        }
        items.iter().any(|item| {
            let text = self.string_value(item);
            let own = match other {
                Value::Num(_) => Value::Num(parse_number(&text)),
                _ => Value::Str(text),
            };
            ordered(&own)
        })
    }

    fn compare_scalars(&self, op: CompareOp, a: &Value<'a>, b: &Value<'a>) -> bool {
        match op {
            CompareOp::Eq | CompareOp::NotEq => {
                let is_bool = |v: &Value<'a>| matches!(v, Value::Bool(_));
                let is_num = |v: &Value<'a>| matches!(v, Value::Num(_));
                let equal = if is_bool(a) || is_bool(b) {
                    self.to_bool(a) == self.to_bool(b)
                } else if is_num(a) || is_num(b) {
                    self.to_number(a) == self.to_number(b)
                } else {
                    self.to_string(a) == self.to_string(b)
                };
                (op == CompareOp::Eq) == equal
            }
            CompareOp::Lt => self.to_number(a) < self.to_number(b),
            CompareOp::Le => self.to_number(a) <= self.to_number(b),
            CompareOp::Gt => self.to_number(a) > self.to_number(b),
            CompareOp::Ge => self.to_number(a) >= self.to_number(b),
        }
    }
}

fn attributes<'a>(node: NodeRef<'a, Node>) -> Vec<Item<'a>> {
    match node.value() {
        Node::Element(element) => element
            .attrs()
            .enumerate()
            .map(|(index, (name, value))| Item::Attr {
                owner: node,
                index,
                name,
                value,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn matches_test(item: &Item<'_>, axis: Axis, test: &NodeTest) -> bool {
    match item {
        Item::Attr { name, .. } => match test {
            NodeTest::Node => true,
            NodeTest::Wildcard => axis == Axis::Attribute,
            NodeTest::Name(expected) => axis == Axis::Attribute && name.eq_ignore_ascii_case(expected),
            NodeTest::Text | NodeTest::Comment => false,
        },
        Item::Node(node) => match (test, node.value()) {
            (NodeTest::Node, _) => true,
            (NodeTest::Wildcard, Node::Element(_)) => true,
            (NodeTest::Name(expected), Node::Element(element)) => {
                element.name().eq_ignore_ascii_case(expected)
            }
            (NodeTest::Text, Node::Text(_)) => true,
            (NodeTest::Comment, Node::Comment(_)) => true,
            _ => false,
        },
    }
}

/// String to number conversion: optional minus, digits, at most one dot.
pub(crate) fn parse_number(text: &str) -> f64 {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let valid = digits.chars().any(|c| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
        && digits.matches('.').count() <= 1;
    if valid {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Integers print without a fractional part.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}
