//! Compile a [`Filter`] into a MongoDB query document.

use mongodb::bson::{doc, Bson, Document as BsonDocument};
use serde_json::Value;

use super::{to_bson, MONGO_ID};
use crate::interfaces::Result;
use crate::model::ID_FIELD;
use crate::query::{Condition, Filter, Operator};

/// Stored field name for a filter path.
pub fn field_name(field: &str) -> &str {
    if field == ID_FIELD {
        MONGO_ID
    } else {
        field
    }
}

/// A query no document satisfies.
fn match_nothing() -> BsonDocument {
    doc! { "_id": { "$exists": false } }
}

/// Compile a filter tree.
pub fn compile(filter: &Filter) -> Result<BsonDocument> {
    Ok(match filter {
        Filter::Condition(c) => compile_condition(c)?,
        Filter::And(children) if children.is_empty() => BsonDocument::new(),
        Filter::Or(children) if children.is_empty() => match_nothing(),
        Filter::And(children) => doc! { "$and": compile_all(children)? },
        Filter::Or(children) => doc! { "$or": compile_all(children)? },
    })
}

fn compile_all(children: &[Filter]) -> Result<Vec<Bson>> {
    children
        .iter()
        .map(|child| compile(child).map(Bson::Document))
        .collect()
}

fn compile_condition(condition: &Condition) -> Result<BsonDocument> {
    let field = field_name(&condition.field);
    let operand = &condition.value;

    if condition.op.is_range() && !matches!(operand, Value::Number(_) | Value::String(_)) {
        return Ok(match_nothing());
    }

    let op = match condition.op {
        Operator::Eq => "$eq",
        Operator::Ne => "$ne",
        Operator::Gt => "$gt",
        Operator::Gte => "$gte",
        Operator::Lt => "$lt",
        Operator::Lte => "$lte",
        Operator::In => "$in",
        Operator::NotIn => "$nin",
    };
    let mut predicate = BsonDocument::new();
    predicate.insert(op, to_bson(operand)?);

    let mut compiled = BsonDocument::new();
    compiled.insert(field, predicate);
    Ok(compiled)
}

/// Restrict a query to the documents `account` owns.
pub fn scoped(account: Option<&str>, query: BsonDocument) -> BsonDocument {
    match account {
        None => query,
        Some(account) if query.is_empty() => doc! { "accountId": account },
        Some(account) => doc! { "$and": [{ "accountId": account }, query] },
    }
}

/// Sort document: the requested field, then `_id`.
pub fn sort_document(sort_field: &str, descending: bool) -> BsonDocument {
    let direction = if descending { -1 } else { 1 };
    let field = field_name(sort_field);
    let mut sort = BsonDocument::new();
    sort.insert(field, direction);
    if field != MONGO_ID {
        sort.insert(MONGO_ID, direction);
    }
    sort
}
