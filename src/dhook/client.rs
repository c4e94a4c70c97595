//! Shared client used by all webhooks.
//!
//! Sharing matters for the global rate limit: every webhook created from
//! one client draws from the same request budget.
use std::sync::Arc;

use tokio::sync::Mutex;

use super::limiter::SlidingWindow;
use super::webhook::Webhook;
use crate::ports::clock::Clock;

#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    limiter_global: Arc<Mutex<SlidingWindow>>,
    clock: Arc<dyn Clock>,
}

impl Client {
    pub fn new(http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            limiter_global: Arc::new(Mutex::new(SlidingWindow::global())),
            clock,
        }
    }

    /// Creates a webhook bound to this client's HTTP connection pool and
    /// global limiter.
    pub fn new_webhook(&self, url: &str) -> Webhook {
        Webhook::new(
            self.http.clone(),
            self.limiter_global.clone(),
            self.clock.clone(),
            url,
        )
    }
}
