//! Fetches items from feeds and forwards them to webhook messengers.
//!
//! Runs one pass over all enabled feeds per tick, fanning out one task per
//! feed and waiting for all of them before sleeping on the ticker.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::app::feed_item::FeedItem;
use crate::app::messenger::{Messenger, MessengerError, Status};
use crate::dhook::{Client, HookError};
use crate::domain::model::{Config, ConfigFeed, ConfigWebhook, ItemState};
use crate::feed::parser::{self, ParsedFeed};
use crate::infra::queue::{DurableQueue, QueueError};
use crate::infra::store::{Store, StoreError};
use crate::ports::clock::Clock;

pub const CULL_LIMIT: usize = 1000;

#[derive(Debug, Error)]
pub enum DispatcherError {
    #[error("dispatcher already running")]
    AlreadyRunning,
    #[error("aborted by user")]
    UserAborted,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("no items found in feed")]
    NoItems,
    #[error("fetch feed: {0}")]
    Fetch(#[from] reqwest::Error),
    #[error(transparent)]
    Parse(#[from] parser::ParseError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Messenger(#[from] MessengerError),
    #[error(transparent)]
    Hook(#[from] HookError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopping,
}

pub struct Dispatcher {
    cfg: Config,
    client: Client,
    clock: Arc<dyn Clock>,
    http: reqwest::Client,
    messengers: std::sync::Mutex<HashMap<String, Arc<Messenger>>>,
    store: Arc<Store>,
    inner: Mutex<Inner>,
}

struct Inner {
    state: RunState,
    quit_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<Store>,
        cfg: Config,
        clock: Arc<dyn Clock>,
        http: reqwest::Client,
        client: Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            client,
            clock,
            http,
            messengers: std::sync::Mutex::new(HashMap::new()),
            store,
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                quit_tx: None,
                handle: None,
            }),
        })
    }

    /// Starts the messengers and the feed processing loop. Fails when the
    /// dispatcher is already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), DispatcherError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RunState::Idle {
            return Err(DispatcherError::AlreadyRunning);
        }
        let mut messengers = HashMap::new();
        for h in &self.cfg.webhooks {
            let queue = DurableQueue::new(self.store.db(), &h.name)?;
            let ms = Messenger::new(
                &self.client,
                queue,
                &h.name,
                &h.url,
                self.store.clone(),
                self.cfg.app.branding_disabled,
            );
            ms.start().await?;
            messengers.insert(h.name.clone(), ms);
        }
        *self.messengers.lock().expect("messenger map lock") = messengers;

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().run(rx));
        inner.state = RunState::Running;
        inner.quit_tx = Some(tx);
        inner.handle = Some(handle);
        Ok(())
    }

    /// Conducts a graceful shutdown: stops the loop, then closes all
    /// messengers in parallel. Reports whether a shutdown was conducted.
    pub async fn close(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != RunState::Running {
            return false;
        }
        inner.state = RunState::Stopping;
        if let Some(tx) = inner.quit_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = inner.handle.take() {
            let _ = handle.await;
        }
        info!("Dispatcher stopped");
        let messengers: Vec<Arc<Messenger>> = self
            .messengers
            .lock()
            .expect("messenger map lock")
            .values()
            .cloned()
            .collect();
        futures::future::join_all(messengers.iter().map(|m| m.shutdown())).await;
        inner.state = RunState::Idle;
        info!("Graceful shutdown completed");
        true
    }

    pub async fn restart(self: &Arc<Self>) -> Result<(), DispatcherError> {
        self.close().await;
        self.start().await
    }

    /// The current status of a messenger.
    pub fn messenger_status(&self, webhook_name: &str) -> Result<Status, DispatcherError> {
        let messengers = self.messengers.lock().expect("messenger map lock");
        messengers
            .get(webhook_name)
            .map(|m| m.status())
            .ok_or_else(|| DispatcherError::NotFound(format!("webhook '{webhook_name}'")))
    }

    async fn run(self: Arc<Self>, mut quit: watch::Receiver<bool>) {
        let feeds = self.cfg.enabled_feeds();
        let ticker = Duration::from_secs(self.cfg.app.ticker);
        info!(
            feeds = feeds.len(),
            webhooks = self.cfg.webhooks.len(),
            "Started"
        );
        loop {
            let mut workers = JoinSet::new();
            for cf in feeds.clone() {
                let this = self.clone();
                let quit = quit.clone();
                workers.spawn(async move {
                    match this.process_feed(&cf, &quit).await {
                        Ok(()) => {}
                        Err(DispatcherError::UserAborted) => debug!("user aborted"),
                        Err(e) => {
                            error!(feed = %cf.name, error = %e, "Failed to process feed");
                        }
                    }
                });
            }
            while workers.join_next().await.is_some() {}
            info!(feeds = feeds.len(), "Finished processing feeds");
            tokio::select! {
                _ = quit.changed() => break,
                _ = tokio::time::sleep(ticker) => {}
            }
        }
        debug!("Dispatcher loop stopped");
    }

    /// Checks a feed for new items and hands them over to the subscribed
    /// messengers.
    async fn process_feed(&self, cf: &ConfigFeed, quit: &watch::Receiver<bool>) -> Result<(), DispatcherError> {
        let feed = self.fetch_feed(&cf.url).await?;
        let hooks = self.subscribed_messengers(cf)?;
        let oldest = self.cfg.app.oldest;
        for entry in &feed.entries {
            if entry.content.is_empty() && entry.description.is_empty() {
                continue;
            }
            if *quit.borrow() {
                return Err(DispatcherError::UserAborted);
            }
            if oldest > 0 {
                if let Some(published) = entry.published {
                    if published < self.clock.now() - TimeDelta::seconds(oldest) {
                        continue;
                    }
                }
            }
            let state = match self.store.get_item_state(&cf.name, entry) {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        title = %entry.title,
                        error = %e,
                        "Failed to read item state from DB. Assuming item is new"
                    );
                    ItemState::New
                }
            };
            if state == ItemState::Processed {
                continue;
            }
            let now = self.clock.now();
            for hook in &hooks {
                if let Err(e) = hook.add_message(
                    &cf.name,
                    &feed,
                    entry,
                    state == ItemState::Updated,
                    now,
                ) {
                    error!(
                        feed = %cf.name,
                        hook = %hook.name(),
                        error = %e,
                        "Failed to add item to webhook queue"
                    );
                    if let Err(e) = self.store.update_feed_stats(&cf.name, |fs| {
                        fs.error_count += 1;
                        Ok(())
                    }) {
                        error!(feed = %cf.name, error = %e, "failed to update feed stats");
                    }
                    continue;
                }
            }
            self.store.record_item(&cf.name, entry, now)?;
            if let Err(e) = self.store.update_feed_stats(&cf.name, |fs| {
                fs.received_count += 1;
                fs.received_last = Some(now);
                Ok(())
            }) {
                error!(feed = %cf.name, error = %e, "failed to update feed stats");
            }
            info!(feed = %cf.name, title = %entry.title, "Received item");
        }
        self.store.cull_items(&cf.name, CULL_LIMIT)?;
        Ok(())
    }

    fn subscribed_messengers(
        &self,
        cf: &ConfigFeed,
    ) -> Result<Vec<Arc<Messenger>>, DispatcherError> {
        let messengers = self.messengers.lock().expect("messenger map lock");
        cf.webhooks
            .iter()
            .map(|name| {
                messengers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| DispatcherError::NotFound(format!("webhook '{name}'")))
            })
            .collect()
    }

    async fn fetch_feed(&self, url: &str) -> Result<ParsedFeed, DispatcherError> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let bytes = resp.bytes().await?;
        Ok(parser::parse(&bytes)?)
    }

    /// Posts the most recent item of a feed directly to its webhooks,
    /// bypassing the queues. Used for operator replay.
    pub async fn post_latest_feed_item(&self, feed_name: &str) -> Result<(), DispatcherError> {
        let cf = self
            .cfg
            .feed(feed_name)
            .ok_or_else(|| DispatcherError::NotFound(format!("feed '{feed_name}'")))?;
        let hooks: Vec<ConfigWebhook> = cf
            .webhooks
            .iter()
            .filter_map(|n| self.cfg.webhook(n).cloned())
            .collect();
        if hooks.is_empty() {
            return Err(DispatcherError::NotFound(format!(
                "webhooks for feed '{feed_name}'"
            )));
        }
        let feed = self.fetch_feed(&cf.url).await?;
        let latest = feed
            .entries
            .iter()
            .filter(|e| e.published.is_some())
            .max_by_key(|e| e.published)
            .ok_or(DispatcherError::NoItems)?;
        let item = FeedItem::new(&cf.name, &feed, latest, false);
        let message = item.to_discord_message(self.cfg.app.branding_disabled);
        message.validate()?;
        let client = Client::new(self.http.clone(), self.clock.clone());
        for hook in &hooks {
            let wh = client.new_webhook(&hook.url);
            wh.execute(&message).await?;
        }
        Ok(())
    }
}
