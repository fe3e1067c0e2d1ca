//! Handler lifecycle.
//!
//! A single [`Dispatcher`] task owns the queue, the record table and the
//! in-flight counter. Outbound calls and write-backs run on spawned tasks and
//! report back through [`DispatchEvent`]s, so every state change happens on
//! the dispatcher task in the order events arrive.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::error::{DispatchError, StoreError, TransportError};
use crate::job::{JobKey, JobPayload, JobRecord};
use crate::outcome::Outcome;
use crate::queue::DispatchQueue;
use crate::store::StoreExecutor;
use crate::transport::{FetchRequest, FetchResponse, Transport};
use crate::writer::CompletionWriter;

pub const DEFAULT_CEILING: usize = 5;
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);

/// Messages accepted by the dispatcher task.
#[derive(Debug)]
pub enum DispatchEvent {
    /// Raw payload received on the notification channel.
    Notified(String),
    CallFinished {
        key: JobKey,
        result: Result<FetchResponse, TransportError>,
    },
    WriteBackFinished {
        key: JobKey,
        result: Result<(), StoreError>,
    },
    Close(JobKey),
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Queue owner; the notification channel the jobs arrive on.
    pub channel: String,
    pub ceiling: usize,
    /// Interval of the periodic re-drain.
    pub heartbeat: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            channel: "http".to_owned(),
            ceiling: DEFAULT_CEILING,
            heartbeat: DEFAULT_HEARTBEAT,
        }
    }
}

/// Snapshot published after every event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatcherStats {
    pub queued: usize,
    pub in_flight: usize,
    pub ceiling: usize,
    pub peak_in_flight: usize,
    /// Jobs whose call produced a response.
    pub completed: u64,
    /// Jobs whose call failed.
    pub failed: u64,
    pub write_back_errors: u64,
    pub malformed: u64,
    pub running: bool,
}

/// Cloneable front end of a running dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    events: mpsc::UnboundedSender<DispatchEvent>,
    stats: watch::Receiver<DispatcherStats>,
}

impl DispatcherHandle {
    pub fn notify(&self, payload: impl Into<String>) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Notified(payload.into()))
    }

    pub fn close(&self, key: JobKey) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Close(key))
    }

    /// Stops admission and lets in-flight jobs finish their write-back.
    pub fn shutdown(&self) -> Result<(), DispatchError> {
        self.send(DispatchEvent::Shutdown)
    }

    pub fn stats(&self) -> DispatcherStats {
        self.stats.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DispatcherStats> {
        self.stats.clone()
    }

    fn send(&self, event: DispatchEvent) -> Result<(), DispatchError> {
        self.events.send(event).map_err(|_| DispatchError::Closed)
    }

    /// Handle whose events are read directly by the caller instead of a
    /// running dispatcher.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (_, stats) = watch::channel(DispatcherStats::default());
        (Self { events, stats }, rx)
    }
}

pub struct Dispatcher<T, S> {
    transport: Arc<T>,
    store: Arc<S>,
    writer: CompletionWriter,
    channel: String,
    heartbeat: Duration,
    queue: DispatchQueue<String, JobKey>,
    records: HashMap<JobKey, JobRecord>,
    next_key: JobKey,
    events_tx: mpsc::UnboundedSender<DispatchEvent>,
    events_rx: mpsc::UnboundedReceiver<DispatchEvent>,
    stats_tx: watch::Sender<DispatcherStats>,
    stats: DispatcherStats,
    accepting: bool,
}

impl<T, S> Dispatcher<T, S>
where
    T: Transport,
    S: StoreExecutor,
{
    pub fn new(config: DispatcherConfig, transport: Arc<T>, store: Arc<S>) -> (Self, DispatcherHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let queue = DispatchQueue::new(config.ceiling);
        let stats = DispatcherStats {
            ceiling: queue.ceiling(),
            running: true,
            ..DispatcherStats::default()
        };
        let (stats_tx, stats_rx) = watch::channel(stats.clone());

        let handle = DispatcherHandle {
            events: events_tx.clone(),
            stats: stats_rx,
        };
        let dispatcher = Self {
            transport,
            store,
            writer: CompletionWriter,
            channel: config.channel,
            heartbeat: config.heartbeat.max(Duration::from_millis(1)),
            queue,
            records: HashMap::new(),
            next_key: 1,
            events_tx,
            events_rx,
            stats_tx,
            stats,
            accepting: true,
        };
        (dispatcher, handle)
    }

    /// Runs the event loop until shutdown completes.
    pub async fn run(mut self) {
        tracing::info!(
            channel = %self.channel,
            ceiling = self.queue.ceiling(),
            "dispatcher started"
        );

        let mut heartbeat = tokio::time::interval(self.heartbeat);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = heartbeat.tick() => self.drain(),
            }

            if !self.accepting && self.records.is_empty() {
                break;
            }
            self.publish();
        }

        self.stats.running = false;
        self.publish();
        tracing::info!(
            completed = self.stats.completed,
            failed = self.stats.failed,
            "dispatcher stopped"
        );
    }

    fn handle_event(&mut self, event: DispatchEvent) {
        match event {
            DispatchEvent::Notified(payload) => self.admit(payload),
            DispatchEvent::CallFinished { key, result } => self.call_finished(key, result),
            DispatchEvent::WriteBackFinished { key, result } => self.write_back_finished(key, result),
            DispatchEvent::Close(key) => self.close(key),
            DispatchEvent::Shutdown => self.begin_shutdown(),
        }
    }

    fn admit(&mut self, payload: String) {
        if !self.accepting {
            tracing::debug!("dispatcher shutting down, notification dropped");
            return;
        }

        let job = match JobPayload::parse(&payload) {
            Ok(job) => job,
            Err(err) => {
                self.stats.malformed += 1;
                tracing::warn!(error = %err, payload = %payload, "discarding notification");
                return;
            }
        };

        let key = self.next_key;
        self.next_key += 1;

        let mut record = JobRecord::new(key, job);
        let ticket = self.queue.admit(self.channel.clone(), key);
        record.set_ticket(ticket);
        tracing::debug!(
            key,
            job_id = %record.payload().identifier,
            ticket = ticket.value(),
            "job admitted"
        );
        self.records.insert(key, record);

        self.drain();
    }

    /// Dispatches queued records front to back while slots are free.
    fn drain(&mut self) {
        let Self {
            queue,
            records,
            transport,
            events_tx,
            channel,
            ..
        } = self;

        queue.drain(channel, |key| {
            let Some(record) = records.get_mut(key) else {
                return false;
            };
            if !record.begin_dispatch() {
                return false;
            }
            spawn_call(record, Arc::clone(transport), events_tx.clone());
            true
        });

        self.stats.peak_in_flight = self.stats.peak_in_flight.max(self.queue.in_flight());
    }

    fn call_finished(&mut self, key: JobKey, result: Result<FetchResponse, TransportError>) {
        let Some(record) = self.records.get_mut(&key) else {
            tracing::warn!(key, "call result for unknown job ignored");
            return;
        };
        if !record.begin_write_back() {
            tracing::warn!(key, state = %record.state(), "duplicate call result ignored");
            return;
        }

        let outcome = Outcome::from(result);
        let job = record.payload();
        match &outcome {
            Outcome::Success(response) => {
                self.stats.completed += 1;
                tracing::info!(
                    key,
                    job_id = %job.identifier,
                    status = response.status,
                    elapsed_ms = record.elapsed().as_millis() as u64,
                    "fetch completed"
                );
            }
            Outcome::Failure { message } => {
                self.stats.failed += 1;
                tracing::warn!(
                    key,
                    job_id = %job.identifier,
                    resource = %job.resource,
                    error = %message,
                    "fetch failed"
                );
            }
        }

        let batch = self.writer.write(job, &outcome);
        let store = Arc::clone(&self.store);
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::spawn(async move { store.execute(batch).await }).await {
                Ok(result) => result,
                Err(err) => Err(StoreError::Rejected(format!("write-back task aborted: {err}"))),
            };
            let _ = events.send(DispatchEvent::WriteBackFinished { key, result });
        });
    }

    fn write_back_finished(&mut self, key: JobKey, result: Result<(), StoreError>) {
        if let Err(err) = &result {
            self.stats.write_back_errors += 1;
            let job_id = self
                .records
                .get(&key)
                .map(|r| r.payload().identifier.as_str())
                .unwrap_or_default();
            tracing::error!(key, job_id = %job_id, error = %err, "write-back failed");
        }
        self.teardown(key);
    }

    /// Removes the record, frees its slot and re-drains.
    fn teardown(&mut self, key: JobKey) {
        let Some(mut record) = self.records.remove(&key) else {
            tracing::warn!(key, "teardown of unknown job ignored");
            return;
        };
        if let Some(ticket) = record.take_ticket() {
            self.queue.remove(&self.channel, ticket);
        }
        if record.state().holds_slot() {
            self.queue.release();
        }
        record.terminate();
        tracing::debug!(key, state = %record.state(), "job torn down");

        self.drain();
    }

    fn close(&mut self, key: JobKey) {
        let Some(record) = self.records.get_mut(&key) else {
            return;
        };
        record.close();
        if let Some(ticket) = record.take_ticket() {
            self.queue.remove(&self.channel, ticket);
        }
        if record.state().is_terminal() {
            self.records.remove(&key);
            tracing::debug!(key, "queued job closed");
        }
    }

    fn begin_shutdown(&mut self) {
        if !self.accepting {
            return;
        }
        self.accepting = false;

        let queued = self.queue.take_all(&self.channel);
        for key in &queued {
            if let Some(mut record) = self.records.remove(key) {
                record.close();
            }
        }
        tracing::info!(
            discarded = queued.len(),
            in_flight = self.queue.in_flight(),
            "dispatcher shutting down"
        );
    }

    fn publish(&mut self) {
        self.stats.queued = self.queue.total_len();
        self.stats.in_flight = self.queue.in_flight();
        self.stats.ceiling = self.queue.ceiling();
        self.stats_tx.send_replace(self.stats.clone());
    }
}

fn spawn_call<T: Transport>(
    record: &JobRecord,
    transport: Arc<T>,
    events: mpsc::UnboundedSender<DispatchEvent>,
) {
    let key = record.key();
    let request = FetchRequest::from_job(record.payload());
    tracing::info!(
        key,
        job_id = %record.payload().identifier,
        method = %request.method,
        resource = %request.url,
        "dispatching fetch"
    );

    tokio::spawn(async move {
        let result = match tokio::spawn(async move { transport.fetch(request).await }).await {
            Ok(result) => result,
            Err(err) => Err(TransportError::Other(format!("outbound call aborted: {err}"))),
        };
        let _ = events.send(DispatchEvent::CallFinished { key, result });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::StatementBatch;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Pending;

    #[async_trait]
    impl Transport for Pending {
        async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, TransportError> {
            std::future::pending().await
        }
    }

    struct NullStore;

    #[async_trait]
    impl StoreExecutor for NullStore {
        async fn execute(&self, _batch: StatementBatch) -> Result<(), StoreError> {
            Ok(())
        }

        async fn fetch_json_rows(&self, _sql: &str) -> Result<Vec<Value>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn dispatcher(ceiling: usize) -> Dispatcher<Pending, NullStore> {
        let config = DispatcherConfig {
            ceiling,
            ..DispatcherConfig::default()
        };
        Dispatcher::new(config, Arc::new(Pending), Arc::new(NullStore)).0
    }

    const JOB: &str = r#"{"id":"a","method":"GET","resource":"http://svc/x"}"#;

    #[tokio::test]
    async fn duplicate_results_are_ignored() {
        let mut d = dispatcher(1);
        d.handle_event(DispatchEvent::Notified(JOB.to_owned()));
        assert_eq!(d.queue.in_flight(), 1);

        for _ in 0..2 {
            d.handle_event(DispatchEvent::CallFinished {
                key: 1,
                result: Ok(FetchResponse::new(200, "OK", "{}")),
            });
        }
        assert_eq!(d.stats.completed, 1);

        for _ in 0..2 {
            d.handle_event(DispatchEvent::WriteBackFinished { key: 1, result: Ok(()) });
        }
        assert_eq!(d.queue.in_flight(), 0);
        assert!(d.records.is_empty());
    }

    #[tokio::test]
    async fn results_for_unknown_jobs_do_not_release_slots() {
        let mut d = dispatcher(2);
        d.handle_event(DispatchEvent::Notified(JOB.to_owned()));
        d.handle_event(DispatchEvent::CallFinished {
            key: 42,
            result: Err(TransportError::Other("late".into())),
        });
        d.handle_event(DispatchEvent::WriteBackFinished { key: 42, result: Ok(()) });
        assert_eq!(d.queue.in_flight(), 1);
        assert_eq!(d.stats.failed, 0);
    }

    #[tokio::test]
    async fn shutdown_discards_queued_records() {
        let mut d = dispatcher(1);
        d.handle_event(DispatchEvent::Notified(JOB.to_owned()));
        d.handle_event(DispatchEvent::Notified(JOB.to_owned()));
        assert_eq!(d.queue.total_len(), 1);

        d.handle_event(DispatchEvent::Shutdown);
        assert_eq!(d.queue.total_len(), 0);
        assert_eq!(d.records.len(), 1, "in-flight job is kept");

        d.handle_event(DispatchEvent::Notified(JOB.to_owned()));
        assert_eq!(d.records.len(), 1, "no admission after shutdown");
    }
}
