//! SQL construction for entity queries.

use serde_json::Value;
use shelf_core::{Direction, Filter, Operator, RemoteQuery};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

/// Build the SELECT for a remote query.
///
/// Filters compare `data -> field` as JSONB. A missing field never
/// matches, and range operators only match values of the filter's JSON
/// type. Results are ordered by the requested fields, then by key, with
/// numeric ids compared by value.
pub fn select_query(query: &RemoteQuery) -> QueryBuilder<'static, Postgres> {
    let mut builder =
        QueryBuilder::new("SELECT kind, key_name, data FROM entities WHERE kind = ");
    builder.push_bind(query.kind.clone());

    for filter in &query.filters {
        builder.push(" AND (");
        push_filter(&mut builder, filter);
        builder.push(")");
    }

    builder.push(" ORDER BY ");
    for order in &query.orders {
        builder.push("data -> ");
        builder.push_bind(order.field.clone());
        builder.push(match order.direction {
            Direction::Ascending => " ASC NULLS FIRST, ",
            Direction::Descending => " DESC NULLS LAST, ",
        });
    }
    builder.push(KEY_ORDER);

    builder
}

/// Numeric ids first, by value, then names in byte order.
const KEY_ORDER: &str = "key_name LIKE 'name:%', \
     CASE WHEN key_name LIKE 'id:%' THEN substr(key_name, 4)::bigint END, \
     key_name COLLATE \"C\"";

fn push_filter(builder: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    match filter.op {
        Operator::In | Operator::NotIn if !filter.value.is_array() => {
            builder.push("FALSE");
        }
        Operator::In => {
            push_field(builder, &filter.field);
            builder.push(" = ANY(ARRAY(SELECT jsonb_array_elements(");
            builder.push_bind(Json(filter.value.clone()));
            builder.push(")))");
        }
        Operator::NotIn => {
            push_field(builder, &filter.field);
            builder.push(" IS NOT NULL AND ");
            push_field(builder, &filter.field);
            builder.push(" <> ALL(ARRAY(SELECT jsonb_array_elements(");
            builder.push_bind(Json(filter.value.clone()));
            builder.push(")))");
        }
        Operator::Eq | Operator::Ne => {
            push_field(builder, &filter.field);
            builder.push(sql_operator(filter.op));
            builder.push_bind(Json(filter.value.clone()));
        }
        Operator::Lt | Operator::Le | Operator::Gt | Operator::Ge => {
            builder.push("jsonb_typeof(");
            push_field(builder, &filter.field);
            builder.push(") = ");
            builder.push_bind(json_type(&filter.value));
            builder.push(" AND ");
            push_field(builder, &filter.field);
            builder.push(sql_operator(filter.op));
            builder.push_bind(Json(filter.value.clone()));
        }
    }
}

fn push_field(builder: &mut QueryBuilder<'static, Postgres>, field: &str) {
    builder.push("data -> ");
    builder.push_bind(field.to_string());
}

fn sql_operator(op: Operator) -> &'static str {
    match op {
        Operator::Eq => " = ",
        Operator::Ne => " <> ",
        Operator::Lt => " < ",
        Operator::Le => " <= ",
        Operator::Gt => " > ",
        Operator::Ge => " >= ",
        Operator::In | Operator::NotIn => " = ",
    }
}

/// Name of a value's type as reported by `jsonb_typeof`.
fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
