use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use pqfetch_dispatch::{async_trait, StatementBatch, StoreError, StoreExecutor};
use pqfetch_server::build_router;
use pqfetch_server::state::AppState;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::util::ServiceExt;

/// Store fake that records every query and answers with canned rows.
#[derive(Default)]
struct CannedStore {
    rows: Vec<Value>,
    fail: bool,
    queries: Mutex<Vec<String>>,
}

impl CannedStore {
    fn with_rows(rows: Vec<Value>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoreExecutor for CannedStore {
    async fn execute(&self, _batch: StatementBatch) -> Result<(), StoreError> {
        Ok(())
    }

    async fn fetch_json_rows(&self, sql: &str) -> Result<Vec<Value>, StoreError> {
        self.queries.lock().unwrap().push(sql.to_owned());
        if self.fail {
            return Err(StoreError::Rejected("function http.get does not exist".into()));
        }
        Ok(self.rows.clone())
    }
}

fn router(store: Arc<CannedStore>) -> Router {
    build_router(Arc::new(AppState::new(store, None, None)))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Value) {
    let response = app.oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    };
    (status, headers, value)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn get_forwards_path_headers_and_params() {
    let store = Arc::new(CannedStore::with_rows(vec![json!({"id": 1}), json!({"id": 2})]));
    let request = Request::builder()
        .uri("/api/v1/items?page=2&q=o%27neil")
        .header("x-trace", "abc")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([{"id": 1}, {"id": 2}]));

    assert_eq!(
        store.queries(),
        [r#"SELECT row_to_json(r)::text FROM http.get('/api/v1/items', '{"x-trace":"abc"}'::jsonb, '{"page":"2","q":"o''neil"}'::jsonb) AS r;"#]
    );
}

#[tokio::test]
async fn post_json_body_is_forwarded_verbatim() {
    let store = Arc::new(CannedStore::with_rows(vec![json!({"ok": true})]));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/submit?result_format=object&result_object=true")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"name":"it's"}"#))
        .unwrap();

    let (status, _, body) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"result": {"ok": true}}));

    let queries = store.queries();
    assert_eq!(queries.len(), 1);
    assert!(queries[0].starts_with("SELECT row_to_json(r)::text FROM http.post('/api/v1/submit', "));
    assert!(queries[0].ends_with(r#"'{"name":"it''s"}'::jsonb) AS r;"#), "{}", queries[0]);
}

#[tokio::test]
async fn post_form_body_becomes_json_object() {
    let store = Arc::new(CannedStore::default());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/form")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("a=1&b=two+words"))
        .unwrap();

    let (status, _, body) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
    assert!(store.queries()[0].ends_with(r#"'{"a":"1","b":"two words"}'::jsonb) AS r;"#));
}

#[tokio::test]
async fn empty_json_body_is_null() {
    let store = Arc::new(CannedStore::default());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/empty?result_format=null")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::Null);
    assert!(store.queries()[0].ends_with("'{}'::jsonb, null) AS r;"));
}

#[tokio::test]
async fn invalid_shape_parameters_are_rejected_before_querying() {
    let store = Arc::new(CannedStore::default());

    let (status, _, body) = send(router(store.clone()), get("/api/x?result_object=maybe")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid result_object: maybe"}));

    let (status, _, body) = send(router(store.clone()), get("/api/x?result_format=csv")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "Invalid result_format: csv"}));

    assert!(store.queries().is_empty());
}

#[tokio::test]
async fn invalid_json_body_is_a_bad_request() {
    let store = Arc::new(CannedStore::default());
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/x")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{oops"))
        .unwrap();

    let (status, _, _) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(store.queries().is_empty());
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let store = Arc::new(CannedStore::default());

    for method in [Method::PUT, Method::DELETE, Method::PATCH] {
        let request = Request::builder()
            .method(method)
            .uri("/api/x")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(router(store.clone()), request).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(headers[header::ALLOW], "GET, POST, OPTIONS");
    }

    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/x")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(router(store.clone()), request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers[header::ALLOW], "GET, POST, OPTIONS");

    assert!(store.queries().is_empty());
}

#[tokio::test]
async fn store_errors_are_server_errors() {
    let store = Arc::new(CannedStore {
        fail: true,
        ..CannedStore::default()
    });
    let (status, _, body) = send(router(store), get("/api/x")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("http.get"));
}

#[tokio::test]
async fn health_and_readiness() {
    let store = Arc::new(CannedStore::default());

    let (status, _, _) = send(router(store.clone()), get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    // fetching disabled: nothing to wait for
    let (status, _, body) = send(router(store.clone()), get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], json!(true));

    let (tx, rx) = watch::channel(false);
    let app = build_router(Arc::new(AppState::new(store.clone(), None, Some(rx))));
    let (status, _, body) = send(app.clone(), get("/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], json!(false));

    tx.send(true).unwrap();
    let (status, _, _) = send(app, get("/ready")).await;
    assert_eq!(status, StatusCode::OK);
}
