use std::sync::Arc;

use pqfetch_dispatch::{DispatcherHandle, DispatcherStats, StoreExecutor};
use tokio::sync::watch;

/// Shared application state passed to every route handler.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn StoreExecutor>,
    dispatcher: Option<DispatcherHandle>,
    listener_status: Option<watch::Receiver<bool>>,
}

impl AppState {
    /// `dispatcher` and `listener_status` are `None` when fetching is disabled.
    pub fn new(
        store: Arc<dyn StoreExecutor>,
        dispatcher: Option<DispatcherHandle>,
        listener_status: Option<watch::Receiver<bool>>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            listener_status,
        }
    }

    pub fn store(&self) -> &dyn StoreExecutor {
        self.store.as_ref()
    }

    pub fn dispatcher_stats(&self) -> Option<DispatcherStats> {
        self.dispatcher.as_ref().map(DispatcherHandle::stats)
    }

    /// Ready once the notification channel is subscribed. Always ready when
    /// fetching is disabled.
    pub fn is_ready(&self) -> bool {
        self.listener_status
            .as_ref()
            .map_or(true, |status| *status.borrow())
    }
}
