//! Bounded dispatch of database-notified HTTP jobs.
//!
//! The store announces pending requests with `NOTIFY http, '<json>'`. This
//! crate turns each notification into a job, runs at most `ceiling` outbound
//! calls at once and writes every outcome back into the store.
//!
//! # Architecture
//!
//! - [`NotificationListener`] - keeps the `LISTEN` subscription alive and
//!   forwards payloads
//! - [`Dispatcher`] - single task owning the [`DispatchQueue`] and every
//!   [`JobRecord`]; driven by [`DispatchEvent`]s
//! - [`CompletionWriter`] - builds the write-back [`StatementBatch`]
//! - [`Transport`] / [`StoreExecutor`] - seams for the outbound call and the
//!   store
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pqfetch_dispatch::{async_trait, Dispatcher, DispatcherConfig, FetchRequest,
//!     FetchResponse, PgStore, Transport, TransportError};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Transport for Echo {
//!     async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
//!         Ok(FetchResponse::new(200, "OK", request.body.unwrap_or_default()))
//!     }
//! }
//!
//! # async fn demo(pool: sqlx::PgPool) {
//! let (dispatcher, handle) =
//!     Dispatcher::new(DispatcherConfig::default(), Arc::new(Echo), Arc::new(PgStore::new(pool)));
//! tokio::spawn(dispatcher.run());
//! handle
//!     .notify(r#"{"id":"11111111-1111-1111-1111-111111111111","method":"GET","resource":"http://svc/x"}"#)
//!     .unwrap();
//! # }
//! ```

mod dispatcher;
mod error;
mod job;
mod listener;
mod outcome;
mod queue;
pub mod sql;
mod store;
mod transport;
mod writer;

pub use dispatcher::{
    DispatchEvent, Dispatcher, DispatcherConfig, DispatcherHandle, DispatcherStats,
    DEFAULT_CEILING, DEFAULT_HEARTBEAT,
};
pub use error::{DispatchError, StoreError, TransportError};
pub use job::{JobKey, JobPayload, JobRecord, JobState};
pub use listener::{
    ListenerConfig, Notice, NotificationListener, PgSubscriptionSource, Subscription,
    SubscriptionSource, DEFAULT_CHECK_INTERVAL, MIN_CHECK_INTERVAL,
};
pub use outcome::Outcome;
pub use queue::{DispatchQueue, Ticket};
pub use sql::{quote_literal, StatementBatch};
pub use store::{PgStore, StoreExecutor};
pub use transport::{FetchRequest, FetchResponse, Transport, DEFAULT_CONTENT_TYPE};
pub use writer::CompletionWriter;

pub use async_trait::async_trait;
