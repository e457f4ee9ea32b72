// src/query/mod.rs

//! Path-query evaluation over parsed HTML.
//!
//! Queries are XPath-style expressions evaluated against a [`Document`].
//! The caller picks the [`Dialect`] explicitly:
//!
//! - [`Dialect::Basic`]: node selection only (paths, unions, position and
//!   attribute predicates).
//! - [`Dialect::Extended`]: full expression language with string, numeric
//!   and sequence functions, comparisons and `if … then … else`.
//!
//! Every outcome is normalized to an ordered list of strings: node-sets in
//! document order, scalars as a single value.

mod document;
mod eval;
mod functions;
mod lexer;
mod parser;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use document::Document;

use crate::utils::normalize_whitespace;
use eval::{Evaluator, Value};
use parser::Expr;

/// Query compile and evaluation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("{construct} is not supported by the {dialect} dialect")]
    Unsupported { dialect: Dialect, construct: String },

    #[error("unknown function {0}()")]
    UnknownFunction(String),

    #[error("{function}() takes {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    #[error("invalid regular expression '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("evaluation failed: {0}")]
    Evaluation(String),
}

impl QueryError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    pub(crate) fn unsupported_basic(construct: impl Into<String>) -> Self {
        Self::Unsupported {
            dialect: Dialect::Basic,
            construct: construct.into(),
        }
    }

    pub(crate) fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation(message.into())
    }
}

/// Query language variant, chosen by the caller and never inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Basic,
    Extended,
}

impl Dialect {
    /// The evaluator implementing this dialect.
    pub fn evaluator(self) -> &'static dyn QueryEvaluator {
        match self {
            Dialect::Basic => &BasicEvaluator,
            Dialect::Extended => &ExtendedEvaluator,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::Basic => "basic",
            Dialect::Extended => "extended",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Dialect::Basic),
            "extended" => Ok(Dialect::Extended),
            other => Err(format!("unknown dialect '{other}' (expected basic or extended)")),
        }
    }
}

/// A query checked against one dialect, ready to run on any document.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    source: String,
    dialect: Dialect,
    expr: Expr,
}

impl CompiledQuery {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Run the query and normalize the outcome to strings.
    ///
    /// Every matched node yields one value, possibly empty. An empty result
    /// is not an error.
    pub fn evaluate(&self, document: &Document) -> Result<Vec<String>, QueryError> {
        let evaluator = Evaluator::new(document);
        let value = evaluator.eval_root(&self.expr)?;

        Ok(match value {
            Value::Nodes(items) => items
                .iter()
                .map(|item| normalize_whitespace(&evaluator.string_value(item)))
                .collect(),
            scalar => vec![evaluator.to_string(&scalar)],
        })
    }
}

/// One query language implementation.
pub trait QueryEvaluator: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Parse and validate a query for this dialect.
    fn compile(&self, query: &str) -> Result<CompiledQuery, QueryError>;

    /// Compile and run a query in one go.
    fn evaluate(&self, document: &Document, query: &str) -> Result<Vec<String>, QueryError> {
        self.compile(query)?.evaluate(document)
    }
}

/// Node-selecting dialect.
pub struct BasicEvaluator;

impl QueryEvaluator for BasicEvaluator {
    fn dialect(&self) -> Dialect {
        Dialect::Basic
    }

    fn compile(&self, query: &str) -> Result<CompiledQuery, QueryError> {
        let expr = parser::parse(query)?;
        parser::check_basic(&expr)?;
        parser::check_functions(&expr)?;
        Ok(CompiledQuery {
            source: query.to_string(),
            dialect: Dialect::Basic,
            expr,
        })
    }
}

/// Full expression dialect.
pub struct ExtendedEvaluator;

impl QueryEvaluator for ExtendedEvaluator {
    fn dialect(&self) -> Dialect {
        Dialect::Extended
    }

    fn compile(&self, query: &str) -> Result<CompiledQuery, QueryError> {
        let expr = parser::parse(query)?;
        parser::check_functions(&expr)?;
        Ok(CompiledQuery {
            source: query.to_string(),
            dialect: Dialect::Extended,
            expr,
        })
    }
}

/// Compile a query for the given dialect.
pub fn compile(query: &str, dialect: Dialect) -> Result<CompiledQuery, QueryError> {
    dialect.evaluator().compile(query)
}

/// Evaluate a query against a document with the given dialect.
pub fn evaluate(
    document: &Document,
    query: &str,
    dialect: Dialect,
) -> Result<Vec<String>, QueryError> {
    dialect.evaluator().evaluate(document, query)
}
