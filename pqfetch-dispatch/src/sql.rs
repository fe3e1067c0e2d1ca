//! Statement text for write-backs and pass-through calls.
//!
//! Every value that originates outside the store is embedded through
//! [`quote_literal`]. Routine names are taken as given.

use std::fmt::Write as _;

use serde_json::{Map, Value};

use crate::transport::FetchResponse;

/// Quotes `value` as a SQL string literal.
///
/// Single quotes are doubled. When the value contains a backslash the
/// backslashes are doubled as well and the literal is emitted in the `E'...'`
/// form, so the result is valid regardless of `standard_conforming_strings`.
pub fn quote_literal(value: &str) -> String {
    let has_backslash = value.contains('\\');
    let mut out = String::with_capacity(value.len() + 3);
    if has_backslash {
        out.push('E');
    }
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Ordered list of statements submitted as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementBatch {
    statements: Vec<String>,
}

impl StatementBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, statement: String) {
        self.statements.push(statement);
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Statements joined into a single simple-query string.
    pub fn to_sql(&self) -> String {
        self.statements.join("\n")
    }
}

impl IntoIterator for StatementBatch {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.statements.into_iter()
    }
}

pub fn create_response(identifier: &str, response: &FetchResponse) -> String {
    format!(
        "SELECT CreateResponse({}::uuid, {}, {}, {}::jsonb, {}::jsonb);",
        quote_literal(identifier),
        response.status,
        quote_literal(&response.status_text),
        quote_literal(&headers_json(&response.headers)),
        json_body_literal(&response.body),
    )
}

pub fn mark_failed(identifier: &str, message: &str) -> String {
    format!(
        "UPDATE http.request SET state = 3, error = {} WHERE id = {};",
        quote_literal(message),
        quote_literal(identifier),
    )
}

pub fn call_routine(routine: &str, identifier: &str) -> String {
    format!("SELECT {routine}({});", quote_literal(identifier))
}

/// Serializes response headers as a JSON object. Repeated names are joined
/// with `", "` under the first spelling seen.
pub fn headers_json(headers: &[(String, String)]) -> String {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Some((_, Value::String(joined))) =
            map.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            joined.push_str(", ");
            joined.push_str(value);
            continue;
        }
        map.insert(name.clone(), Value::String(value.clone()));
    }
    Value::Object(map).to_string()
}

/// Literal for a `::jsonb` body argument. Valid JSON is kept as-is, an empty
/// body is `NULL` and any other text is wrapped as a JSON string.
pub fn json_body_literal(body: &str) -> String {
    if body.trim().is_empty() {
        return "NULL".to_owned();
    }
    if serde_json::from_str::<Value>(body).is_ok() {
        quote_literal(body)
    } else {
        quote_literal(&Value::String(body.to_owned()).to_string())
    }
}

pub fn passthrough_get(path: &str, headers: &Value, params: &Value) -> String {
    let mut sql = String::from("SELECT row_to_json(r)::text FROM http.get(");
    let _ = write!(
        sql,
        "{}, {}::jsonb, {}::jsonb) AS r;",
        quote_literal(path),
        quote_literal(&headers.to_string()),
        quote_literal(&params.to_string()),
    );
    sql
}

/// `body` of `None` is passed as SQL `null`.
pub fn passthrough_post(path: &str, headers: &Value, params: &Value, body: Option<&str>) -> String {
    let body = match body {
        Some(text) if !text.trim().is_empty() => format!("{}::jsonb", quote_literal(text)),
        _ => "null".to_owned(),
    };
    let mut sql = String::from("SELECT row_to_json(r)::text FROM http.post(");
    let _ = write!(
        sql,
        "{}, {}::jsonb, {}::jsonb, {}) AS r;",
        quote_literal(path),
        quote_literal(&headers.to_string()),
        quote_literal(&params.to_string()),
        body,
    );
    sql
}
