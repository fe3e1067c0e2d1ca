//! Outbound HTTP transport for the dispatcher.
//!
//! [`HttpTransport`] performs each job's call with a shared reqwest
//! [`Client`]. Every HTTP status counts as a response; only failing to get
//! one is reported as a [`TransportError`].

use std::error::Error as _;

use pqfetch_config::HttpClientConfig;
use pqfetch_dispatch::{async_trait, FetchRequest, FetchResponse, Transport, TransportError};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum HttpTransportError {
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &HttpClientConfig) -> Result<Self, HttpTransportError> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout())
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let method = parse_method(&request.method)?;
        let headers = build_headers(&request.headers)?;

        debug!(method = %method, url = %request.url, "sending request");

        let mut builder = self.client.request(method, request.url.clone()).headers(headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let err = classify(&e);
            warn!(url = %request.url, error = %err, "request failed");
            err
        })?;

        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_owned(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else {
                TransportError::MalformedResponse(e.to_string())
            }
        })?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_owned(),
            headers,
            body,
        })
    }
}

fn parse_method(method: &str) -> Result<Method, TransportError> {
    Method::from_bytes(method.as_bytes())
        .map_err(|_| TransportError::InvalidRequest(format!("invalid method: {method}")))
}

/// Builds the header map in order, keeping repeated names.
fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value).map_err(|_| {
            TransportError::InvalidRequest(format!("invalid value for header {name}"))
        })?;
        map.append(name, value);
    }
    Ok(map)
}

fn classify(err: &reqwest::Error) -> TransportError {
    let message = error_chain(err);
    if err.is_timeout() {
        TransportError::Timeout(message)
    } else if err.is_connect() {
        TransportError::Connect(message)
    } else if err.is_builder() {
        TransportError::InvalidRequest(message)
    } else if err.is_decode() || err.is_body() {
        TransportError::MalformedResponse(message)
    } else {
        TransportError::Other(message)
    }
}

/// reqwest's display hides the underlying cause; include the chain.
fn error_chain(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use pqfetch_config::Config;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(url: &str) -> FetchRequest {
        FetchRequest {
            method: "GET".to_owned(),
            url: url.parse().unwrap(),
            headers: vec![("Content-Type".to_owned(), "application/json".to_owned())],
            body: None,
        }
    }

    fn transport() -> HttpTransport {
        HttpTransport::new(&Config::default().http_client).expect("client")
    }

    #[test]
    fn headers_keep_duplicates() {
        let map = build_headers(&[
            ("Accept".to_owned(), "text/plain".to_owned()),
            ("X-Tag".to_owned(), "a".to_owned()),
            ("x-tag".to_owned(), "b".to_owned()),
        ])
        .unwrap();
        assert_eq!(map.get_all("x-tag").iter().count(), 2);
        assert_eq!(map.get("accept").unwrap(), "text/plain");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let err = build_headers(&[("Bad Name".to_owned(), "x".to_owned())]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));

        let err = build_headers(&[("X-Ok".to_owned(), "line\nbreak".to_owned())]).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRequest(_)));
    }

    #[test]
    fn method_tokens() {
        assert_eq!(parse_method("PATCH").unwrap(), Method::PATCH);
        assert!(parse_method("GE T").is_err());
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = transport()
            .fetch(request(&format!("http://{addr}/x")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn reads_status_headers_and_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let head = String::from_utf8_lossy(&buf[..n]).to_string();

            let body = r#"{"created":true}"#;
            let reply = format!(
                "HTTP/1.1 201 Created\r\nContent-Type: application/json\r\nX-Trace: t1\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(reply.as_bytes()).await.unwrap();
            head
        });

        let mut req = request(&format!("http://{addr}/items"));
        req.method = "POST".to_owned();
        req.headers.push(("Authorization".to_owned(), "Bearer abc".to_owned()));
        req.body = Some(r#"{"n":1}"#.to_owned());

        let response = transport().fetch(req).await.expect("response");
        assert_eq!(response.status, 201);
        assert_eq!(response.status_text, "Created");
        assert_eq!(response.body, r#"{"created":true}"#);
        assert!(response
            .headers
            .iter()
            .any(|(n, v)| n == "x-trace" && v == "t1"));

        let head = server.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("post /items http/1.1"));
        assert!(head.contains("authorization: bearer abc"));
        assert!(head.contains("content-type: application/json"));
    }

    #[tokio::test]
    async fn unregistered_status_has_no_reason_phrase() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let _ = socket.read(&mut buf).await.unwrap();
            let reply = "HTTP/1.1 299 Mostly Fine\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";
            socket.write_all(reply.as_bytes()).await.unwrap();
        });

        let response = transport()
            .fetch(request(&format!("http://{addr}/x")))
            .await
            .expect("response");
        assert_eq!(response.status, 299);
        // the wire reason phrase is not exposed by the client
        assert_eq!(response.status_text, "");
        assert_eq!(response.body, "");
    }
}
