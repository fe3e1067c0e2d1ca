use axum::http::{header, HeaderMap};
use serde_json::{Map, Value};

use crate::error::ApiError;

/// Request headers as a JSON object. Repeated headers are joined with `", "`.
pub fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .collect::<Vec<_>>()
            .join(", ");
        map.insert(name.as_str().to_owned(), Value::String(joined));
    }
    Value::Object(map)
}

/// Query parameters as a JSON object; a repeated name keeps its last value.
pub fn params_to_json(params: &[(String, String)]) -> Value {
    let mut map = Map::new();
    for (name, value) in params {
        map.insert(name.clone(), Value::String(value.clone()));
    }
    Value::Object(map)
}

pub fn param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

pub fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("application/json"))
}

/// Decodes an `application/x-www-form-urlencoded` body into a JSON object.
pub fn form_to_json(body: &[u8]) -> Value {
    let map = url::form_urlencoded::parse(body)
        .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
        .collect::<Map<_, _>>();
    Value::Object(map)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResultFormat {
    #[default]
    Array,
    Object,
    Null,
}

/// How store rows are turned into the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResultShape {
    pub format: ResultFormat,
    /// Wrap the value as `{"result": ...}`.
    pub wrap: bool,
}

impl ResultShape {
    /// Reads `result_object` and `result_format` from the query string.
    pub fn from_params(params: &[(String, String)]) -> Result<Self, ApiError> {
        let wrap = match param(params, "result_object") {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(ApiError::bad_request(format!("Invalid result_object: {other}")))
            }
        };
        let format = match param(params, "result_format") {
            None | Some("array") => ResultFormat::Array,
            Some("object") => ResultFormat::Object,
            Some("null") => ResultFormat::Null,
            Some(other) => {
                return Err(ApiError::bad_request(format!("Invalid result_format: {other}")))
            }
        };
        Ok(Self { format, wrap })
    }

    pub fn apply(self, rows: Vec<Value>) -> Value {
        let value = match self.format {
            ResultFormat::Array => Value::Array(rows),
            ResultFormat::Object => rows.into_iter().next().unwrap_or(Value::Null),
            ResultFormat::Null if rows.is_empty() => Value::Null,
            ResultFormat::Null => Value::Array(rows),
        };
        if self.wrap {
            let mut object = Map::new();
            object.insert("result".to_owned(), value);
            Value::Object(object)
        } else {
            value
        }
    }
}
