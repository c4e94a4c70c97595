//! Per-webhook consumer that drives queued items to Discord.
//!
//! Failed posts are retried with exponential backoff and rate limits are
//! respected. Unsent messages stay queued and are picked up again after a
//! process restart.
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::app::feed_item::{Envelope, FeedItem};
use crate::dhook::{Client, HookError, Webhook};
use crate::feed::parser::{FeedEntry, ParsedFeed};
use crate::infra::queue::{DurableQueue, QueueError};
use crate::infra::store::Store;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("messenger {0} already running")]
    AlreadyRunning(String),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    pub queue_size: u64,
    pub error_count: i64,
}

pub struct Messenger {
    branding_disabled: bool,
    err_count: AtomicI64,
    name: String,
    queue: Arc<DurableQueue>,
    store: Arc<Store>,
    webhook: Webhook,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    running: bool,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Messenger {
    pub fn new(
        client: &Client,
        queue: Arc<DurableQueue>,
        name: &str,
        url: &str,
        store: Arc<Store>,
        branding_disabled: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            branding_disabled,
            err_count: AtomicI64::new(0),
            name: name.to_string(),
            queue,
            store,
            webhook: client.new_webhook(url),
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues a new message for delivery to the webhook.
    pub fn add_message(
        &self,
        feed_name: &str,
        feed: &ParsedFeed,
        entry: &FeedEntry,
        is_updated: bool,
        now: DateTime<Utc>,
    ) -> Result<(), MessengerError> {
        let item = FeedItem::new(feed_name, feed, entry, is_updated);
        let envelope = Envelope::new(item, now);
        self.queue.put(&envelope.to_bytes()?)?;
        Ok(())
    }

    /// Starts the consumer task. Fails when it is already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), MessengerError> {
        let mut inner = self.inner.lock().await;
        if inner.running {
            return Err(MessengerError::AlreadyRunning(self.name.clone()));
        }
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().run(rx));
        inner.running = true;
        inner.shutdown_tx = Some(tx);
        inner.handle = Some(handle);
        Ok(())
    }

    /// Gracefully shuts the messenger down. Reports whether a shutdown was
    /// actually conducted.
    pub async fn shutdown(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.running {
            return false;
        }
        if let Some(tx) = inner.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = inner.handle.take() {
            let _ = handle.await;
        }
        inner.running = false;
        true
    }

    pub fn status(&self) -> Status {
        Status {
            queue_size: self.queue.size().unwrap_or(0),
            error_count: self.err_count.load(Ordering::Relaxed),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            messenger = %self.name,
            queued = self.queue.size().unwrap_or(0),
            "Started"
        );
        'recv: loop {
            let bytes = match self.queue.get_with_cancel(&shutdown).await {
                Ok(v) => v,
                Err(QueueError::Canceled) => {
                    debug!(messenger = %self.name, "canceled");
                    break;
                }
                Err(e) => {
                    error!(messenger = %self.name, error = %e, "Failed to read from queue");
                    continue;
                }
            };
            let envelope = match Envelope::from_bytes(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    error!(
                        messenger = %self.name,
                        error = %e,
                        "Failed to decode message. Discarding"
                    );
                    continue;
                }
            };
            let message = envelope.item.to_discord_message(self.branding_disabled);
            if let Err(e) = message.validate() {
                error!(
                    messenger = %self.name,
                    error = %e,
                    title = %envelope.item.title,
                    "Discord message not valid. Discarding"
                );
                continue;
            }
            let mut attempt: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    // Popped but unsent: hand the entry back so it is not
                    // lost across the restart.
                    if let Err(e) = self.queue.put_front(&bytes) {
                        error!(
                            messenger = %self.name,
                            error = %e,
                            "Failed to return message to queue on shutdown"
                        );
                    }
                    break 'recv;
                }
                attempt += 1;
                match self.webhook.execute(&message).await {
                    Ok(()) => break,
                    Err(HookError::Http {
                        status: 400,
                        message: m,
                    }) => {
                        self.err_count.fetch_add(1, Ordering::Relaxed);
                        error!(
                            messenger = %self.name,
                            error = %m,
                            title = %envelope.item.title,
                            "Bad request. Discarding"
                        );
                        continue 'recv;
                    }
                    Err(HookError::TooManyRequests { retry_after, .. }) => {
                        error!(
                            messenger = %self.name,
                            retry_after = ?retry_after,
                            "API rate limit exceeded"
                        );
                        self.sleep_or_shutdown(retry_after, &mut shutdown).await;
                    }
                    Err(e) => {
                        self.err_count.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = self.store.update_webhook_stats(&self.name, |ws| {
                            ws.error_count += 1;
                            Ok(())
                        }) {
                            error!(
                                messenger = %self.name,
                                error = %e,
                                "Failed to update webhook stats"
                            );
                        }
                        let wait = backoff_with_jitter(attempt);
                        error!(
                            messenger = %self.name,
                            error = %e,
                            attempt,
                            wait = ?wait,
                            "Failed to send to webhook. Retrying"
                        );
                        self.sleep_or_shutdown(wait, &mut shutdown).await;
                    }
                }
            }
            if let Err(e) = self.store.update_webhook_stats(&self.name, |ws| {
                ws.sent_count += 1;
                ws.sent_last = Some(Utc::now());
                Ok(())
            }) {
                error!(messenger = %self.name, error = %e, "Failed to update webhook stats");
            }
            info!(
                messenger = %self.name,
                feed = %envelope.item.feed_name,
                title = %envelope.item.title,
                queued = self.queue.size().unwrap_or(0),
                "Posted item"
            );
        }
        info!(messenger = %self.name, "Stopped");
    }

    /// Sleeps for the given duration but wakes early on shutdown; the
    /// retry loop re-checks the signal at its top.
    async fn sleep_or_shutdown(&self, wait: Duration, shutdown: &mut watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = shutdown.changed() => {}
        }
    }
}

const BACKOFF_BASE_MS: f64 = 100.0;
const BACKOFF_MAX_MS: f64 = 30_000.0;

/// Exponential backoff with full jitter, capped at 30 seconds.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let exponential = 2f64.powi(attempt.min(31) as i32) * BACKOFF_BASE_MS;
    let delay = exponential.min(BACKOFF_MAX_MS);
    let ms = (rand::thread_rng().gen::<f64>() * delay).floor() as u64;
    Duration::from_millis(ms)
}
