//! Job records decoded from store notifications.

use std::fmt;
use std::time::Instant;

use serde::Deserialize;
use serde_json::{Map, Value};
use url::Url;

use crate::error::DispatchError;
use crate::queue::Ticket;

/// Identity of a record inside one dispatcher. Store identifiers may repeat,
/// so records are keyed by admission order instead.
pub type JobKey = u64;

/// Wire shape of the `http` channel payload.
#[derive(Debug, Deserialize)]
struct NotificationPayload {
    id: Option<String>,
    method: Option<String>,
    resource: Option<String>,
    #[serde(default)]
    headers: Option<Map<String, Value>>,
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    done: Option<String>,
    #[serde(default)]
    fail: Option<String>,
}

/// Validated description of one outbound call and its write-back routines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPayload {
    /// Store correlation key. Untrusted text; always quoted before use in SQL.
    pub identifier: String,
    pub method: String,
    pub resource: Url,
    /// Request headers in the order the store listed them.
    pub headers: Vec<(String, String)>,
    pub content: Option<String>,
    pub on_success: Option<String>,
    pub on_failure: Option<String>,
}

impl JobPayload {
    /// Decodes and validates a notification payload.
    ///
    /// Fails fast on anything that would prevent a well-formed outbound call:
    /// invalid JSON, a missing or empty `id`, `method` or `resource`, a method
    /// that is not an HTTP token, or a resource that is not an absolute
    /// http(s) URL.
    pub fn parse(data: &str) -> Result<Self, DispatchError> {
        let raw: NotificationPayload = serde_json::from_str(data)
            .map_err(|e| DispatchError::malformed(format!("invalid json: {e}")))?;

        let identifier = required(raw.id, "id")?;
        let method = required(raw.method, "method")?;
        if !is_token(&method) {
            return Err(DispatchError::malformed(format!(
                "invalid method: {method}"
            )));
        }

        let resource = required(raw.resource, "resource")?;
        let resource = Url::parse(&resource)
            .map_err(|e| DispatchError::malformed(format!("invalid resource {resource}: {e}")))?;
        if !matches!(resource.scheme(), "http" | "https") {
            return Err(DispatchError::malformed(format!(
                "unsupported resource scheme: {}",
                resource.scheme()
            )));
        }

        let headers = raw
            .headers
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| header_value(value).map(|v| (name, v)))
            .collect();

        let content = match raw.content {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        };

        Ok(Self {
            identifier,
            method,
            resource,
            headers,
            content,
            on_success: routine(raw.done),
            on_failure: routine(raw.fail),
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, DispatchError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(DispatchError::malformed(format!("field `{field}` is empty"))),
        None => Err(DispatchError::malformed(format!("missing field `{field}`"))),
    }
}

fn routine(name: Option<String>) -> Option<String> {
    name.filter(|n| !n.trim().is_empty())
}

fn header_value(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

/// RFC 9110 `token` check used for method names.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^'
                        | b'_' | b'`' | b'|' | b'~'
                )
        })
}

/// Lifecycle of a record inside the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Admitted, waiting for a free slot.
    Queued,
    /// Handed to the transport; the call is in flight.
    Dispatched,
    /// Outcome known, write-back batch submitted.
    AwaitingWriteBack,
    /// Write-back finished (or failed) and the slot was released.
    Terminated,
    /// Torn down before it was ever dispatched.
    Closed,
}

impl JobState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Closed)
    }

    /// True while the record holds an in-flight slot.
    #[inline]
    pub const fn holds_slot(self) -> bool {
        matches!(self, Self::Dispatched | Self::AwaitingWriteBack)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Dispatched => "dispatched",
            Self::AwaitingWriteBack => "awaiting_write_back",
            Self::Terminated => "terminated",
            Self::Closed => "closed",
        })
    }
}

/// In-memory unit of work owned by the dispatcher from admission to teardown.
#[derive(Debug)]
pub struct JobRecord {
    key: JobKey,
    payload: JobPayload,
    dispatch_allowed: bool,
    state: JobState,
    ticket: Option<Ticket>,
    admitted_at: Instant,
}

impl JobRecord {
    pub fn new(key: JobKey, payload: JobPayload) -> Self {
        Self {
            key,
            payload,
            dispatch_allowed: true,
            state: JobState::Queued,
            ticket: None,
            admitted_at: Instant::now(),
        }
    }

    #[inline]
    pub fn key(&self) -> JobKey {
        self.key
    }

    #[inline]
    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    #[inline]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[inline]
    pub fn dispatch_allowed(&self) -> bool {
        self.dispatch_allowed
    }

    #[inline]
    pub fn ticket(&self) -> Option<Ticket> {
        self.ticket
    }

    pub(crate) fn set_ticket(&mut self, ticket: Ticket) {
        self.ticket = Some(ticket);
    }

    pub(crate) fn take_ticket(&mut self) -> Option<Ticket> {
        self.ticket.take()
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.admitted_at.elapsed()
    }

    /// `Queued → Dispatched`. Declines (returns false) if the record was
    /// already dispatched or explicitly disallowed.
    pub fn begin_dispatch(&mut self) -> bool {
        if !self.dispatch_allowed || self.state != JobState::Queued {
            return false;
        }
        self.dispatch_allowed = false;
        self.state = JobState::Dispatched;
        true
    }

    /// `Dispatched → AwaitingWriteBack`. Declines for any other state, which
    /// keeps a second call result from producing a second write-back.
    pub fn begin_write_back(&mut self) -> bool {
        if self.state != JobState::Dispatched {
            return false;
        }
        self.state = JobState::AwaitingWriteBack;
        true
    }

    /// `AwaitingWriteBack → Terminated`.
    pub fn terminate(&mut self) -> bool {
        if self.state != JobState::AwaitingWriteBack {
            return false;
        }
        self.state = JobState::Terminated;
        true
    }

    /// Marks the record non-dispatchable. A record that never left the queue
    /// moves to `Closed`; an in-flight one keeps running to its outcome.
    pub fn close(&mut self) {
        self.dispatch_allowed = false;
        if self.state == JobState::Queued {
            self.state = JobState::Closed;
        }
    }
}
