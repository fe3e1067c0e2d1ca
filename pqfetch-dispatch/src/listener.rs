//! Notification listener.
//!
//! Holds one `LISTEN` subscription, forwards every payload to the dispatcher
//! and periodically verifies the subscription is still registered on the
//! server, re-subscribing when it is not.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgListener, PgPool};
use tokio::sync::watch;

use crate::dispatcher::DispatcherHandle;
use crate::error::DispatchError;

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(300);
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub channel: String,
    /// Raised to [`MIN_CHECK_INTERVAL`] when shorter.
    pub check_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            channel: "http".to_owned(),
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

/// A notification as delivered on the subscribed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub channel: String,
    pub process_id: u32,
    pub payload: String,
}

/// One open `LISTEN` connection.
#[async_trait]
pub trait Subscription: Send {
    async fn listen(&mut self, channel: &str) -> Result<(), sqlx::Error>;

    /// Channels the server reports as registered for this session.
    async fn listening_channels(&mut self) -> Result<Vec<String>, sqlx::Error>;

    /// `Ok(None)` means the connection dropped; the next call reconnects.
    async fn recv(&mut self) -> Result<Option<Notice>, sqlx::Error>;

    async fn close(&mut self) -> Result<(), sqlx::Error>;
}

/// Opens new [`Subscription`]s.
#[async_trait]
pub trait SubscriptionSource: Send + Sync + 'static {
    type Subscription: Subscription;

    async fn connect(&self) -> Result<Self::Subscription, sqlx::Error>;
}

#[async_trait]
impl Subscription for PgListener {
    async fn listen(&mut self, channel: &str) -> Result<(), sqlx::Error> {
        PgListener::listen(self, channel).await
    }

    async fn listening_channels(&mut self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT pg_listening_channels()")
            .fetch_all(&mut *self)
            .await
    }

    async fn recv(&mut self) -> Result<Option<Notice>, sqlx::Error> {
        Ok(self.try_recv().await?.map(|notification| Notice {
            channel: notification.channel().to_owned(),
            process_id: notification.process_id(),
            payload: notification.payload().to_owned(),
        }))
    }

    async fn close(&mut self) -> Result<(), sqlx::Error> {
        self.unlisten_all().await
    }
}

/// Dedicated listener connections taken from the pool's connect options.
pub struct PgSubscriptionSource {
    pool: PgPool,
}

impl PgSubscriptionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionSource for PgSubscriptionSource {
    type Subscription = PgListener;

    async fn connect(&self) -> Result<PgListener, sqlx::Error> {
        PgListener::connect_with(&self.pool).await
    }
}

pub struct NotificationListener<S: SubscriptionSource = PgSubscriptionSource> {
    source: S,
    config: ListenerConfig,
    dispatcher: DispatcherHandle,
    subscribed: watch::Sender<bool>,
    subscription: Option<S::Subscription>,
}

impl NotificationListener<PgSubscriptionSource> {
    /// Returns the listener and a receiver reporting whether the channel is
    /// currently subscribed.
    pub fn new(
        pool: PgPool,
        config: ListenerConfig,
        dispatcher: DispatcherHandle,
    ) -> (Self, watch::Receiver<bool>) {
        Self::with_source(PgSubscriptionSource::new(pool), config, dispatcher)
    }
}

impl<S: SubscriptionSource> NotificationListener<S> {
    pub fn with_source(
        source: S,
        config: ListenerConfig,
        dispatcher: DispatcherHandle,
    ) -> (Self, watch::Receiver<bool>) {
        let (subscribed, status) = watch::channel(false);
        let listener = Self {
            source,
            config,
            dispatcher,
            subscribed,
            subscription: None,
        };
        (listener, status)
    }

    /// Runs until `shutdown` turns true or its sender is dropped.
    ///
    /// The first liveness check fires immediately and performs the initial
    /// subscription.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.check_interval.max(MIN_CHECK_INTERVAL);
        let mut check = tokio::time::interval(period);
        check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = check.tick() => self.check_subscription().await,
                received = next_notice(&mut self.subscription) => match received {
                    Ok(Some(notice)) => {
                        if let Err(DispatchError::Closed) = self.forward(notice) {
                            tracing::info!("dispatcher closed, listener stopping");
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::warn!(
                            channel = %self.config.channel,
                            "listener connection lost, reconnecting"
                        );
                        self.set_subscribed(false);
                        // the check query reconnects and re-issues LISTEN
                        self.check_subscription().await;
                    }
                    Err(err) => {
                        tracing::error!(
                            channel = %self.config.channel,
                            error = %err,
                            "listener failed, will resubscribe on next check"
                        );
                        self.subscription = None;
                        self.set_subscribed(false);
                    }
                },
            }
        }

        if let Some(mut subscription) = self.subscription.take() {
            if let Err(err) = subscription.close().await {
                tracing::debug!(error = %err, "error while closing listener");
            }
        }
        self.set_subscribed(false);
        tracing::info!(channel = %self.config.channel, "notification listener stopped");
    }

    fn forward(&self, notice: Notice) -> Result<(), DispatchError> {
        tracing::trace!(
            channel = %notice.channel,
            pid = notice.process_id,
            "notification received"
        );
        self.dispatcher.notify(notice.payload)
    }

    /// Verifies the channel is registered; subscribes when it is not.
    async fn check_subscription(&mut self) {
        let channel = self.config.channel.clone();
        let Some(subscription) = self.subscription.as_mut() else {
            self.subscribe().await;
            return;
        };

        match subscription.listening_channels().await {
            Ok(channels) if channels.iter().any(|c| *c == channel) => {
                tracing::debug!(channel = %channel, "listener subscription verified");
                self.set_subscribed(true);
            }
            Ok(_) => {
                tracing::warn!(channel = %channel, "channel not subscribed, listening again");
                match subscription.listen(&channel).await {
                    Ok(()) => self.set_subscribed(true),
                    Err(err) => {
                        tracing::error!(channel = %channel, error = %err, "listen failed");
                        self.subscription = None;
                        self.set_subscribed(false);
                    }
                }
            }
            Err(err) => {
                tracing::warn!(channel = %channel, error = %err, "subscription check failed, resubscribing");
                self.subscription = None;
                self.subscribe().await;
            }
        }
    }

    async fn subscribe(&mut self) {
        match self.open().await {
            Ok(subscription) => {
                tracing::info!(channel = %self.config.channel, "listening for notifications");
                self.subscription = Some(subscription);
                self.set_subscribed(true);
            }
            Err(err) => {
                tracing::error!(
                    channel = %self.config.channel,
                    error = %err,
                    "failed to subscribe, retrying on next check"
                );
                self.set_subscribed(false);
            }
        }
    }

    async fn open(&self) -> Result<S::Subscription, sqlx::Error> {
        let mut subscription = self.source.connect().await?;
        subscription.listen(&self.config.channel).await?;
        Ok(subscription)
    }

    fn set_subscribed(&self, value: bool) {
        self.subscribed.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }
}

/// Pending forever while there is no subscription.
async fn next_notice<T: Subscription>(
    subscription: &mut Option<T>,
) -> Result<Option<Notice>, sqlx::Error> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
