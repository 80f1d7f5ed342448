//! Compile a [`Filter`] into a JSONB predicate.
//!
//! Documents are stored whole in the `data` column, so every field path is
//! read with `#>`. The generated SQL reproduces the document-store matching
//! rules: equality also matches array elements, `null` equality matches a
//! missing field, and range comparisons only match values of the operand's
//! JSON type. Strings compare bytewise under the "C" collation, whatever
//! the database default is.

use sea_query::{Condition as SqlCondition, Expr, Order, SimpleExpr};
use serde_json::Value;

use crate::model::ID_FIELD;
use crate::query::{Condition, Filter, Operator};

/// `("data" #> '{a,b}')` for a dotted field path.
///
/// Field names are validated to `[A-Za-z_][A-Za-z0-9_]*` segments before
/// they reach this point.
pub fn field_path(field: &str) -> String {
    format!(r#"("data" #> '{{{}}}')"#, field.replace('.', ","))
}

/// Compile a filter tree.
pub fn compile(filter: &Filter) -> SqlCondition {
    match filter {
        Filter::Condition(c) => SqlCondition::all().add(compile_condition(c)),
        Filter::And(children) if children.is_empty() => {
            SqlCondition::all().add(Expr::cust("TRUE"))
        }
        Filter::Or(children) if children.is_empty() => {
            SqlCondition::all().add(Expr::cust("FALSE"))
        }
        Filter::And(children) => children
            .iter()
            .fold(SqlCondition::all(), |acc, child| acc.add(compile(child))),
        Filter::Or(children) => children
            .iter()
            .fold(SqlCondition::any(), |acc, child| acc.add(compile(child))),
    }
}

fn compile_condition(condition: &Condition) -> SimpleExpr {
    let path = field_path(&condition.field);
    let operand = &condition.value;

    match condition.op {
        Operator::Eq => eq_expr(&path, operand),
        Operator::Ne => negate(eq_expr(&path, operand)),
        Operator::In => in_expr(&path, operand),
        Operator::NotIn => negate(in_expr(&path, operand)),
        Operator::Gt => range_expr(&path, ">", operand),
        Operator::Gte => range_expr(&path, ">=", operand),
        Operator::Lt => range_expr(&path, "<", operand),
        Operator::Lte => range_expr(&path, "<=", operand),
    }
}

/// Equality against the `n`th bound value.
///
/// Array elements are compared whole: containment would let `{"k": 1}`
/// match an element `{"k": 1, "x": 2}`.
fn eq_sql(path: &str, n: usize) -> String {
    format!(
        "({p} = ${n} OR CASE WHEN jsonb_typeof({p}) = 'array' \
         THEN EXISTS (SELECT 1 FROM jsonb_array_elements({p}) AS e(v) WHERE e.v = ${n}) \
         ELSE false END)",
        p = path,
        n = n
    )
}

fn eq_null_sql(path: &str) -> String {
    format!(
        "({p} IS NULL OR {p} = 'null'::jsonb OR (jsonb_typeof({p}) = 'array' AND {p} @> '[null]'::jsonb))",
        p = path
    )
}

fn eq_expr(path: &str, operand: &Value) -> SimpleExpr {
    if operand.is_null() {
        Expr::cust(eq_null_sql(path))
    } else {
        Expr::cust_with_values(eq_sql(path, 1), [operand.clone()])
    }
}

fn in_expr(path: &str, operand: &Value) -> SimpleExpr {
    let candidates = match operand.as_array() {
        Some(candidates) if !candidates.is_empty() => candidates,
        _ => return Expr::cust("FALSE"),
    };

    let mut terms = Vec::with_capacity(candidates.len());
    let mut values = Vec::new();
    for candidate in candidates {
        if candidate.is_null() {
            terms.push(eq_null_sql(path));
        } else {
            values.push(candidate.clone());
            terms.push(eq_sql(path, values.len()));
        }
    }
    Expr::cust_with_values(format!("({})", terms.join(" OR ")), values)
}

fn negate(expr: SimpleExpr) -> SimpleExpr {
    Expr::cust_with_exprs("(NOT COALESCE($1, false))", [expr])
}

fn range_expr(path: &str, op: &str, operand: &Value) -> SimpleExpr {
    let (json_type, compare): (&str, fn(&str, &str) -> String) = match operand {
        Value::Number(_) => ("number", |v: &str, op: &str| format!("{} {} $1", v, op)),
        Value::String(_) => ("string", |v: &str, op: &str| {
            format!(r#"({} #>> '{{}}') COLLATE "C" {} ($1 #>> '{{}}')"#, v, op)
        }),
        _ => return Expr::cust("FALSE"),
    };
    Expr::cust_with_values(
        format!(
            "((jsonb_typeof({p}) = '{t}' AND {scalar}) OR CASE WHEN jsonb_typeof({p}) = 'array' \
             THEN EXISTS (SELECT 1 FROM jsonb_array_elements({p}) AS e(v) \
             WHERE jsonb_typeof(e.v) = '{t}' AND {element}) ELSE false END)",
            p = path,
            t = json_type,
            scalar = compare(path, op),
            element = compare("e.v", op),
        ),
        [operand.clone()],
    )
}

/// Sort expressions for a listing: the requested field, then the identifier.
///
/// Values group by JSON type first (missing and null, numbers, strings,
/// objects, arrays, booleans), then compare within their type: numbers by
/// value and strings bytewise. Missing fields sort first ascending and last
/// descending. Identifiers compare bytewise.
pub fn order_exprs(sort_field: &str, descending: bool) -> Vec<(SimpleExpr, Order)> {
    let order = if descending { Order::Desc } else { Order::Asc };
    let id = Expr::cust(r#""id" COLLATE "C""#);
    if sort_field == ID_FIELD {
        return vec![(id, order)];
    }

    let p = field_path(sort_field);
    let rank = format!(
        "CASE jsonb_typeof({p}) WHEN 'number' THEN 1 WHEN 'string' THEN 2 \
         WHEN 'object' THEN 3 WHEN 'array' THEN 4 WHEN 'boolean' THEN 5 ELSE 0 END",
        p = p
    );
    let number = format!("CASE WHEN jsonb_typeof({p}) = 'number' THEN ({p})::numeric END", p = p);
    let string = format!(
        r#"(CASE WHEN jsonb_typeof({p}) = 'string' THEN ({p} #>> '{{}}') END) COLLATE "C""#,
        p = p
    );
    let other = format!(
        "CASE WHEN jsonb_typeof({p}) IN ('object', 'array', 'boolean') THEN {p} END",
        p = p
    );

    [rank, number, string, other]
        .into_iter()
        .map(|sql| (Expr::cust(sql), order.clone()))
        .chain(std::iter::once((id, order.clone())))
        .collect()
}
