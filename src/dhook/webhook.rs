//! A single Discord webhook with all rate limit gates applied in series.
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::cooldown::Cooldown;
use super::limiter::SlidingWindow;
use super::limiter_api::ApiLimiter;
use super::message::Message;
use super::HookError;
use crate::ports::clock::Clock;

const RETRY_AFTER_DEFAULT: Duration = Duration::from_secs(60);

/// Subset of the body Discord sends with a 429.
#[derive(Debug, Deserialize, Default)]
struct TooManyRequestsBody {
    #[serde(default)]
    global: bool,
}

pub struct Webhook {
    http: reqwest::Client,
    url: String,
    clock: Arc<dyn Clock>,
    limiter_global: Arc<Mutex<SlidingWindow>>,
    limiter_webhook: Mutex<SlidingWindow>,
    limiter_api: Mutex<ApiLimiter>,
    cooldown: Mutex<Cooldown>,
    // Discord's per-webhook limit makes concurrent posts fragile, so
    // executes on the same webhook are serialized.
    exec_lock: Mutex<()>,
}

impl Webhook {
    pub(super) fn new(
        http: reqwest::Client,
        limiter_global: Arc<Mutex<SlidingWindow>>,
        clock: Arc<dyn Clock>,
        url: &str,
    ) -> Self {
        Self {
            http,
            url: url.to_string(),
            clock,
            limiter_global,
            limiter_webhook: Mutex::new(SlidingWindow::webhook()),
            limiter_api: Mutex::new(ApiLimiter::default()),
            cooldown: Mutex::new(Cooldown::default()),
            exec_lock: Mutex::new(()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Validates and posts a message.
    ///
    /// Waits for the global, per-webhook and API rate limits before the
    /// request goes out. A still-active post-429 cooldown short-circuits
    /// with `TooManyRequests` without making a request.
    pub async fn execute(&self, message: &Message) -> Result<(), HookError> {
        message.validate()?;
        let _guard = self.exec_lock.lock().await;

        if let Some(retry_after) = self.cooldown.lock().await.retry_after(self.clock.now()) {
            return Err(HookError::TooManyRequests {
                retry_after,
                global: false,
            });
        }

        self.wait_window(&self.limiter_global).await;
        self.wait_api().await;
        self.wait_window(&self.limiter_webhook).await;

        let body = serde_json::to_vec(message)?;
        debug!(url = %self.url, "webhook request");
        let resp = self
            .http
            .post(format!("{}?wait=true", self.url))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        let headers = resp.headers().clone();
        {
            let mut api = self.limiter_api.lock().await;
            if let Err(e) = api.update_from_headers(&headers, self.clock.now()) {
                warn!(error = %e, "Failed to update API limiter from headers");
            }
        }
        {
            let now = self.clock.now();
            self.limiter_global.lock().await.record(now);
            self.limiter_webhook.lock().await.record(now);
        }
        debug!(url = %self.url, status = %status, "webhook response");

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = headers
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| {
                    warn!("Failed to parse Retry-After header. Assuming default");
                    RETRY_AFTER_DEFAULT
                });
            let parsed: TooManyRequestsBody = resp.json().await.unwrap_or_default();
            self.cooldown.lock().await.set(
                self.clock.now() + TimeDelta::from_std(retry_after).unwrap_or(TimeDelta::zero()),
            );
            return Err(HookError::TooManyRequests {
                retry_after,
                global: parsed.global,
            });
        }
        if status.as_u16() >= 400 {
            warn!(url = %self.url, status = %status, "webhook error response");
            return Err(HookError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            });
        }
        Ok(())
    }

    async fn wait_window(&self, limiter: &Mutex<SlidingWindow>) {
        loop {
            let wait = {
                let mut l = limiter.lock().await;
                let (remaining, reset) = l.calc(self.clock.now());
                if remaining > 0 {
                    None
                } else {
                    Some((l.name(), reset))
                }
            };
            match wait {
                None => return,
                Some((name, reset)) => {
                    warn!(
                        limiter = name,
                        wait = ?reset,
                        "Rate limit exhausted. Waiting for reset"
                    );
                    tokio::time::sleep(reset).await;
                }
            }
        }
    }

    async fn wait_api(&self) {
        loop {
            let wait = {
                let api = self.limiter_api.lock().await;
                let now = self.clock.now();
                if api.limit_exceeded(now) {
                    Some(api.retry_after(now))
                } else {
                    None
                }
            };
            match wait {
                None => return,
                Some(d) => {
                    warn!(wait = ?d, "API rate limit exhausted. Waiting for reset");
                    tokio::time::sleep(d).await;
                }
            }
        }
    }
}
