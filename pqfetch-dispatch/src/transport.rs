//! Outbound call seam.

use async_trait::async_trait;
use url::Url;

use crate::error::TransportError;
use crate::job::JobPayload;

pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Fully built outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl FetchRequest {
    /// Copies every header in order and adds `Content-Type:
    /// application/json` when the job did not set one.
    pub fn from_job(job: &JobPayload) -> Self {
        let mut headers = job.headers.clone();
        if job.header("content-type").is_none() {
            headers.push(("Content-Type".to_owned(), DEFAULT_CONTENT_TYPE.to_owned()));
        }

        Self {
            method: job.method.clone(),
            url: job.resource.clone(),
            headers,
            body: job.content.clone(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status line, headers and body of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl FetchResponse {
    pub fn new(status: u16, status_text: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Performs one outbound call. Any HTTP status is a response; only failures
/// to obtain one (connect, timeout, protocol) are errors.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(json: &str) -> JobPayload {
        JobPayload::parse(json).unwrap()
    }

    #[test]
    fn defaults_content_type() {
        let request = FetchRequest::from_job(&job(
            r#"{"id":"a","method":"GET","resource":"http://svc/x","headers":{"X-Trace":"1"}}"#,
        ));
        assert_eq!(request.method, "GET");
        assert_eq!(request.url.as_str(), "http://svc/x");
        assert_eq!(
            request.headers,
            vec![
                ("X-Trace".to_owned(), "1".to_owned()),
                ("Content-Type".to_owned(), DEFAULT_CONTENT_TYPE.to_owned()),
            ]
        );
        assert_eq!(request.body, None);
    }

    #[test]
    fn keeps_explicit_content_type_and_authorization() {
        let request = FetchRequest::from_job(&job(
            r#"{"id":"a","method":"POST","resource":"http://svc/x",
                "headers":{"content-type":"text/plain","Authorization":"Basic dTpw"},
                "content":"hello"}"#,
        ));
        assert_eq!(request.headers.len(), 2);
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
        assert_eq!(request.header("authorization"), Some("Basic dTpw"));
        assert_eq!(request.body.as_deref(), Some("hello"));
    }
}
