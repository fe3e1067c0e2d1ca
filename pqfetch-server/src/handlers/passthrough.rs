//! Forwards `GET`/`POST` requests under `/api` to the store's `http.get` and
//! `http.post` functions and shapes the returned rows.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, OriginalUri, Query},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use pqfetch_dispatch::sql;
use serde_json::Value;

use crate::error::ApiError;
use crate::handlers::utils::{
    form_to_json, headers_to_json, is_json_content, params_to_json, ResultShape,
};
use crate::state::AppState;

pub const ALLOWED_METHODS: &str = "GET, POST, OPTIONS";

pub async fn passthrough(
    Extension(state): Extension<Arc<AppState>>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    Query(params): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    if method == Method::OPTIONS {
        return Ok(with_allow(StatusCode::NO_CONTENT));
    }
    if method != Method::GET && method != Method::POST {
        return Ok(with_allow(StatusCode::METHOD_NOT_ALLOWED));
    }

    let path = uri.path();
    let shape = ResultShape::from_params(&params)?;
    let headers_json = headers_to_json(&headers);
    let params_json = params_to_json(&params);

    let statement = if method == Method::GET {
        sql::passthrough_get(path, &headers_json, &params_json)
    } else {
        let body = post_body(&headers, &body)?;
        sql::passthrough_post(path, &headers_json, &params_json, body.as_deref())
    };

    tracing::debug!(method = %method, path, "forwarding request to store");
    let rows = state.store().fetch_json_rows(&statement).await?;

    Ok(Json(shape.apply(rows)).into_response())
}

/// JSON bodies are forwarded as sent; anything else is decoded as a form.
fn post_body(headers: &HeaderMap, body: &[u8]) -> Result<Option<String>, ApiError> {
    if is_json_content(headers) {
        let text = std::str::from_utf8(body)
            .map_err(|_| ApiError::bad_request("Request body is not valid UTF-8"))?;
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Value>(text)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))?;
        Ok(Some(text.to_owned()))
    } else {
        Ok(Some(form_to_json(body).to_string()))
    }
}

fn with_allow(status: StatusCode) -> Response {
    let mut response = status.into_response();
    response
        .headers_mut()
        .insert(header::ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    response
}
