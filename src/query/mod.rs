//! Backend-neutral filter model.
//!
//! A [`Filter`] is produced by [`parse_query`] from the JSON clause format
//! and compiled by each engine into its native predicate. The in-memory
//! engine evaluates it directly with [`matches`].

mod eval;
mod parser;

pub use eval::{compare_for_sort, lookup, matches};
pub use parser::{parse_query, parse_query_str, validate_field, MAX_DEPTH};

use serde_json::Value;

/// Comparison operator of a leaf clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
}

impl Operator {
    /// Parse an operator token.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "=" | "==" => Some(Operator::Eq),
            "!=" | "<>" => Some(Operator::Ne),
            ">" => Some(Operator::Gt),
            ">=" => Some(Operator::Gte),
            "<" => Some(Operator::Lt),
            "<=" => Some(Operator::Lte),
            "in" => Some(Operator::In),
            "!in" | "nin" => Some(Operator::NotIn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::In => "in",
            Operator::NotIn => "!in",
        }
    }

    /// Ordering comparison, subject to type bracketing.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte
        )
    }

    /// Operand must be an array.
    pub fn is_membership(&self) -> bool {
        matches!(self, Operator::In | Operator::NotIn)
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single `(field, operator, value)` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub value: Value,
}

/// Parsed filter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Condition(Condition),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn condition(field: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Filter::Condition(Condition {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    /// Every leaf of the tree, depth first.
    pub fn conditions(&self) -> Vec<&Condition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a Condition>) {
        match self {
            Filter::Condition(c) => out.push(c),
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}
