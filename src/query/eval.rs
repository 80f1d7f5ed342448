//! In-process filter evaluation.
//!
//! Mirrors what the database engines do with a compiled filter: equality
//! also matches array elements, `null` equality matches missing fields,
//! range comparisons only match values of the operand's JSON type, and
//! numbers compare by value regardless of integer or float encoding.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Condition, Filter, Operator};
use crate::model::Document;

/// Resolve a dotted path inside a document. Paths do not traverse arrays.
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Whether `doc` satisfies `filter`.
pub fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::Condition(c) => matches_condition(c, doc),
        Filter::And(children) => children.iter().all(|f| matches(f, doc)),
        Filter::Or(children) => children.iter().any(|f| matches(f, doc)),
    }
}

fn matches_condition(condition: &Condition, doc: &Document) -> bool {
    let field = lookup(doc, &condition.field);
    let operand = &condition.value;

    match condition.op {
        Operator::Eq => matches_eq(field, operand),
        Operator::Ne => !matches_eq(field, operand),
        Operator::In => matches_in(field, operand),
        Operator::NotIn => !matches_in(field, operand),
        Operator::Gt => matches_range(field, operand, |o| o == Ordering::Greater),
        Operator::Gte => matches_range(field, operand, |o| o != Ordering::Less),
        Operator::Lt => matches_range(field, operand, |o| o == Ordering::Less),
        Operator::Lte => matches_range(field, operand, |o| o != Ordering::Greater),
    }
}

fn matches_eq(field: Option<&Value>, operand: &Value) -> bool {
    match field {
        None => operand.is_null(),
        Some(value) if json_eq(value, operand) => true,
        Some(Value::Array(items)) => items.iter().any(|item| json_eq(item, operand)),
        Some(_) => false,
    }
}

fn matches_in(field: Option<&Value>, operand: &Value) -> bool {
    operand
        .as_array()
        .map(|candidates| candidates.iter().any(|c| matches_eq(field, c)))
        .unwrap_or(false)
}

fn matches_range(field: Option<&Value>, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let compare = |value: &Value| same_type_cmp(value, operand).map(&accept).unwrap_or(false);
    match field {
        None => false,
        Some(Value::Array(items)) => items.iter().any(|item| compare(item)),
        Some(value) => compare(value),
    }
}

/// Compare two scalars of the same JSON type; `None` across types.
fn same_type_cmp(value: &Value, operand: &Value) -> Option<Ordering> {
    match (value, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

/// Structural equality with numbers compared by value.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map(|y| json_eq(x, y)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Rank of a JSON type in sort order; missing sorts with null.
fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Ascending order of two field values for sorting.
pub fn compare_for_sort(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .zip(y.as_f64())
            .and_then(|(x, y)| x.partial_cmp(&y))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
        _ => Ordering::Equal,
    }
}
