//! Builds parameterized SELECT, COUNT, INSERT, UPDATE and DELETE statements.
//!
//! Conditions translate one to one:
//!
//! - `= null` / `!= null` become `IS NULL` / `IS NOT NULL`
//! - `=`, `!=`, `in`, `not in` compare the column's text form with the loose
//!   key text of the operand, so `1` and `"1"` address the same row
//! - `in ()` is `FALSE`, `not in ()` is `TRUE`
//! - `like` becomes `ILIKE` on the column's text form
//! - range operators compare natively, casting the parameter to the column
//!   type when it is known
//!
//! Rows are read back through an explicit column list: types without a native
//! decoder (numeric, time, interval, arrays, inet, ...) are selected as
//! `::text`, so writing a fetched record back never loses a value.

use std::collections::HashMap;

use serde_json::Value;

use super::params::SqlParam;
use crate::model::{Attributes, LooseKey};
use crate::repository::{Operator, Order, Pagination, Query, QueryTransform, Where, WhereValue};

/// Quote an identifier for PostgreSQL
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// `schema.table` or `table`, each part quoted
pub(crate) fn qualified_table(name: &str) -> String {
    name.split('.').map(quoted).collect::<Vec<_>>().join(".")
}

/// SQL text plus its positional parameters
#[derive(Debug, Default)]
pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl QueryBuf {
    fn push_param(&mut self, param: SqlParam) -> usize {
        self.params.push(param);
        self.params.len()
    }
}

/// Column name to PostgreSQL type name (`udt_name`)
pub type ColumnTypes = HashMap<String, String>;

/// Types read back without a text cast
const NATIVE_TYPES: &[&str] = &[
    "int2", "int4", "int8", "float4", "float8", "bool", "uuid", "timestamptz", "timestamp",
    "date", "text", "varchar", "bpchar", "name", "json", "jsonb",
];

pub(crate) fn decodes_natively(udt_name: &str) -> bool {
    NATIVE_TYPES.contains(&udt_name)
}

/// Column list for SELECT and RETURNING; `*` when types are unknown
fn projection(columns: &ColumnTypes) -> String {
    if columns.is_empty() {
        return "*".to_string();
    }
    let mut names: Vec<&String> = columns.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| {
            let column = quoted(name);
            match columns.get(name) {
                Some(ty) if !decodes_natively(ty) => format!("{}::text AS {}", column, column),
                _ => column,
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

struct Builder<'a> {
    buf: QueryBuf,
    columns: &'a ColumnTypes,
}

impl<'a> Builder<'a> {
    fn new(columns: &'a ColumnTypes) -> Self {
        Self {
            buf: QueryBuf::default(),
            columns,
        }
    }

    /// Placeholder for a value written to `column`; nulls are inlined
    fn value(&mut self, column: &str, value: &Value) -> String {
        match SqlParam::from_json(value) {
            SqlParam::Null => "NULL".to_string(),
            param => {
                let n = self.buf.push_param(param);
                match self.columns.get(column) {
                    Some(ty) => format!("${}::{}", n, ty),
                    None => format!("${}", n),
                }
            }
        }
    }

    fn text(&mut self, text: String) -> String {
        format!("${}", self.buf.push_param(SqlParam::Text(text)))
    }

    fn condition(&mut self, condition: &Where) -> String {
        let column = quoted(&condition.key);
        let value = &condition.value;
        match condition.operator {
            Operator::Equal if value.is_null() => format!("{} IS NULL", column),
            Operator::NotEqual if value.is_null() => format!("{} IS NOT NULL", column),
            Operator::Equal => match loose_text(value) {
                Some(text) => format!("{}::text = {}", column, self.text(text)),
                None => "FALSE".to_string(),
            },
            Operator::NotEqual => match loose_text(value) {
                Some(text) => format!("{}::text <> {}", column, self.text(text)),
                None => "FALSE".to_string(),
            },
            Operator::In | Operator::NotIn => {
                let texts: Vec<String> = match value {
                    WhereValue::List(items) => items.iter().filter_map(loose_text).collect(),
                    other => loose_text(other).into_iter().collect(),
                };
                let negated = condition.operator == Operator::NotIn;
                if texts.is_empty() {
                    return if negated { "TRUE" } else { "FALSE" }.to_string();
                }
                let placeholders: Vec<String> = texts.into_iter().map(|t| self.text(t)).collect();
                format!(
                    "{}::text {}IN ({})",
                    column,
                    if negated { "NOT " } else { "" },
                    placeholders.join(", ")
                )
            }
            Operator::Like => match value {
                WhereValue::String(pattern) => {
                    format!("{}::text ILIKE {}", column, self.text(pattern.clone()))
                }
                other => match loose_text(other) {
                    Some(text) => format!("{}::text ILIKE {}", column, self.text(text)),
                    None => "FALSE".to_string(),
                },
            },
            Operator::LessThan
            | Operator::LessThanOrEqual
            | Operator::GreaterThan
            | Operator::GreaterThanOrEqual => self.range(condition),
        }
    }

    fn range(&mut self, condition: &Where) -> String {
        let symbol = match condition.operator {
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            _ => ">=",
        };
        let column = quoted(&condition.key);
        match &condition.value {
            WhereValue::Null | WhereValue::List(_) => "FALSE".to_string(),
            WhereValue::String(s) if !self.columns.contains_key(&condition.key) => {
                format!("{}::text {} {}", column, symbol, self.text(s.clone()))
            }
            value => {
                let placeholder = self.value(&condition.key, &value.to_json());
                format!("{} {} {}", column, symbol, placeholder)
            }
        }
    }

    fn transform(&mut self, transform: &QueryTransform) -> String {
        match transform {
            QueryTransform::Search { text, columns } => {
                if columns.is_empty() {
                    return "TRUE".to_string();
                }
                let placeholder = self.text(format!("%{}%", escape_like(text)));
                let parts: Vec<String> = columns
                    .iter()
                    .map(|c| format!("{}::text ILIKE {}", quoted(c), placeholder))
                    .collect();
                format!("({})", parts.join(" OR "))
            }
            QueryTransform::AnyOf(group) => {
                if group.is_empty() {
                    return "FALSE".to_string();
                }
                let parts: Vec<String> = group.iter().map(|w| self.condition(w)).collect();
                format!("({})", parts.join(" OR "))
            }
        }
    }

    fn where_clause(&mut self, query: &Query) -> String {
        let mut parts: Vec<String> = query.wheres.iter().map(|w| self.condition(w)).collect();
        parts.extend(query.modifiers.iter().map(|t| self.transform(t)));
        if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        }
    }
}

fn loose_text(value: &WhereValue) -> Option<String> {
    LooseKey::from_value(&value.to_json()).map(|k| k.to_string())
}

/// Escape `%`, `_` and `\` so free text matches literally inside `ILIKE`
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

fn order_clause(orders: &[Order]) -> String {
    if orders.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = orders
        .iter()
        .map(|o| format!("{} {}", quoted(&o.key), o.direction.as_sql()))
        .collect();
    format!(" ORDER BY {}", parts.join(", "))
}

/// SELECT with conditions, orders and an optional window
pub fn select(
    table: &str,
    columns: &ColumnTypes,
    query: &Query,
    pagination: Option<Pagination>,
) -> QueryBuf {
    let mut builder = Builder::new(columns);
    let where_clause = builder.where_clause(query);
    let window = pagination
        .map(|p| format!(" LIMIT {} OFFSET {}", p.limit, p.offset))
        .unwrap_or_default();
    builder.buf.sql = format!(
        "SELECT {} FROM {}{}{}{}",
        projection(columns),
        qualified_table(table),
        where_clause,
        order_clause(&query.orders),
        window
    );
    builder.buf
}

/// SELECT COUNT(*) with conditions
pub fn count(table: &str, columns: &ColumnTypes, query: &Query) -> QueryBuf {
    let mut builder = Builder::new(columns);
    let where_clause = builder.where_clause(query);
    builder.buf.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(table), where_clause);
    builder.buf
}

/// INSERT ... RETURNING; an empty record inserts defaults
pub fn insert(table: &str, columns: &ColumnTypes, attributes: &Attributes) -> QueryBuf {
    let mut builder = Builder::new(columns);
    if attributes.is_empty() {
        builder.buf.sql = format!(
            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
            qualified_table(table),
            projection(columns)
        );
        return builder.buf;
    }
    let names: Vec<String> = attributes.keys().map(|k| quoted(k)).collect();
    let values: Vec<String> = attributes.iter().map(|(k, v)| builder.value(k, v)).collect();
    builder.buf.sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
        qualified_table(table),
        names.join(", "),
        values.join(", "),
        projection(columns)
    );
    builder.buf
}

/// UPDATE ... WHERE primary key ... RETURNING
///
/// With nothing to set, selects the row instead so absence is still reported.
pub fn update(
    table: &str,
    columns: &ColumnTypes,
    primary_key: &str,
    key: &Value,
    attributes: &Attributes,
) -> QueryBuf {
    let mut builder = Builder::new(columns);
    let assignments: Vec<String> = attributes
        .iter()
        .filter(|(k, _)| k.as_str() != primary_key)
        .map(|(k, v)| format!("{} = {}", quoted(k), builder.value(k, v)))
        .collect();
    let key_text = LooseKey::from_value(key).map(|k| k.to_string()).unwrap_or_default();
    let key_placeholder = builder.text(key_text);
    builder.buf.sql = if assignments.is_empty() {
        format!(
            "SELECT {} FROM {} WHERE {}::text = {}",
            projection(columns),
            qualified_table(table),
            quoted(primary_key),
            key_placeholder
        )
    } else {
        format!(
            "UPDATE {} SET {} WHERE {}::text = {} RETURNING {}",
            qualified_table(table),
            assignments.join(", "),
            quoted(primary_key),
            key_placeholder,
            projection(columns)
        )
    };
    builder.buf
}

/// DELETE with conditions
pub fn delete(table: &str, columns: &ColumnTypes, query: &Query) -> QueryBuf {
    let mut builder = Builder::new(columns);
    let where_clause = builder.where_clause(query);
    builder.buf.sql = format!("DELETE FROM {}{}", qualified_table(table), where_clause);
    builder.buf
}
