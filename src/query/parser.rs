//! Clause parser.
//!
//! Input is a JSON array whose elements are comparison tuples
//! `[field, op, value]`, nested arrays (parenthesised groups) or the
//! connector tokens `"and"` / `"or"`. Adjacent elements are AND-ed and AND
//! binds tighter than OR, so `[a, "or", b, c]` reads as `a OR (b AND c)`.

use serde_json::Value;

use super::{Condition, Filter, Operator};
use crate::interfaces::{Result, StorageError};

/// Deepest group nesting accepted.
pub const MAX_DEPTH: usize = 16;

/// Longest field path accepted.
const MAX_FIELD_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Connector {
    And,
    Or,
}

impl Connector {
    fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "and" | "&&" => Some(Connector::And),
            "or" | "||" => Some(Connector::Or),
            _ => None,
        }
    }
}

/// Parse a clause expression given as JSON text.
pub fn parse_query_str(input: &str) -> Result<Filter> {
    let value: Value = serde_json::from_str(input)
        .map_err(|e| StorageError::validation(format!("query is not valid JSON: {}", e)))?;
    parse_query(&value)
}

/// Parse a clause expression into a filter tree.
pub fn parse_query(input: &Value) -> Result<Filter> {
    let items = input
        .as_array()
        .ok_or_else(|| StorageError::validation("query must be an array of clauses"))?;

    if items.is_empty() {
        return Err(StorageError::validation("query has no clauses"));
    }

    // A bare tuple at the top level is a one-clause query.
    if is_tuple(items) {
        return parse_tuple(items).map(Filter::Condition);
    }

    parse_sequence(items, 0)
}

/// An array whose first element is a non-connector string.
fn is_tuple(items: &[Value]) -> bool {
    match items.first() {
        Some(Value::String(s)) => Connector::from_token(s).is_none(),
        _ => false,
    }
}

fn parse_sequence(items: &[Value], depth: usize) -> Result<Filter> {
    if depth > MAX_DEPTH {
        return Err(StorageError::validation(format!(
            "query nesting deeper than {}",
            MAX_DEPTH
        )));
    }
    if items.is_empty() {
        return Err(StorageError::validation("empty clause group"));
    }

    let mut groups: Vec<Vec<Filter>> = Vec::new();
    let mut current: Vec<Filter> = Vec::new();
    let mut pending: Option<Connector> = None;

    for (position, item) in items.iter().enumerate() {
        match item {
            Value::String(token) => {
                let connector = Connector::from_token(token).ok_or_else(|| {
                    StorageError::validation(format!(
                        "unexpected token '{}' at position {}",
                        token, position
                    ))
                })?;
                if current.is_empty() || pending.is_some() {
                    return Err(StorageError::validation(format!(
                        "connector '{}' at position {} has no left operand",
                        token, position
                    )));
                }
                if connector == Connector::Or {
                    groups.push(std::mem::take(&mut current));
                }
                pending = Some(connector);
            }
            Value::Array(inner) => {
                let operand = if is_tuple(inner) {
                    Filter::Condition(parse_tuple(inner)?)
                } else {
                    parse_sequence(inner, depth + 1)?
                };
                current.push(operand);
                pending = None;
            }
            other => {
                return Err(StorageError::validation(format!(
                    "clause at position {} must be an array or connector, got {}",
                    position, other
                )));
            }
        }
    }

    if pending.is_some() {
        return Err(StorageError::validation("query ends with a connector"));
    }
    groups.push(current);

    let mut ors: Vec<Filter> = groups.into_iter().map(collapse_and).collect();
    Ok(if ors.len() == 1 {
        ors.remove(0)
    } else {
        Filter::Or(ors)
    })
}

fn collapse_and(mut group: Vec<Filter>) -> Filter {
    if group.len() == 1 {
        group.remove(0)
    } else {
        Filter::And(group)
    }
}

fn parse_tuple(items: &[Value]) -> Result<Condition> {
    if items.len() != 3 {
        return Err(StorageError::validation(format!(
            "clause must have 3 elements [field, operator, value], got {}",
            items.len()
        )));
    }

    let field = items[0]
        .as_str()
        .ok_or_else(|| StorageError::validation("clause field must be a string"))?;
    validate_field(field)?;

    let op_token = items[1]
        .as_str()
        .ok_or_else(|| StorageError::validation("clause operator must be a string"))?;
    let op = Operator::from_token(op_token)
        .ok_or_else(|| StorageError::validation(format!("unknown operator '{}'", op_token)))?;

    let value = items[2].clone();
    if op.is_range() && !(value.is_number() || value.is_string()) {
        return Err(StorageError::validation(format!(
            "operator '{}' needs a number or string, got {}",
            op, value
        )));
    }
    if op.is_membership() && !value.is_array() {
        return Err(StorageError::validation(format!(
            "operator '{}' needs an array, got {}",
            op, value
        )));
    }

    Ok(Condition {
        field: field.to_string(),
        op,
        value,
    })
}

/// Check a field path: identifier segments joined by `.`.
pub fn validate_field(field: &str) -> Result<()> {
    let invalid = || StorageError::validation(format!("invalid field name '{}'", field));

    if field.is_empty() || field.len() > MAX_FIELD_LEN {
        return Err(invalid());
    }
    for segment in field.split('.') {
        let mut chars = segment.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return Err(invalid()),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(invalid());
        }
    }
    Ok(())
}
