//! Convenience client for the operator service, used by the CLI.
use serde_json::json;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 2233;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{message}")]
    Remote { status: u16, message: String },
}

pub struct RemoteClient {
    http: reqwest::Client,
    port: u16,
}

impl RemoteClient {
    pub fn new(port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            port,
        }
    }

    pub async fn check_config(&self) -> Result<(), RemoteError> {
        self.post("check-config", None).await.map(|_| ())
    }

    pub async fn send_ping(&self, webhook_name: &str) -> Result<(), RemoteError> {
        self.post("ping", Some(webhook_name)).await.map(|_| ())
    }

    pub async fn post_latest_feed_item(&self, feed_name: &str) -> Result<(), RemoteError> {
        self.post("post-latest", Some(feed_name)).await.map(|_| ())
    }

    pub async fn restart(&self) -> Result<(), RemoteError> {
        self.post("restart", None).await.map(|_| ())
    }

    pub async fn statistics(&self) -> Result<String, RemoteError> {
        let resp = self.http.get(self.url("stats")).send().await?;
        Self::into_text(resp).await
    }

    async fn post(&self, path: &str, name: Option<&str>) -> Result<String, RemoteError> {
        let mut req = self.http.post(self.url(path));
        if let Some(name) = name {
            req = req.json(&json!({ "name": name }));
        }
        let resp = req.send().await?;
        Self::into_text(resp).await
    }

    async fn into_text(resp: reqwest::Response) -> Result<String, RemoteError> {
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Remote {
                status: status.as_u16(),
                message: text,
            });
        }
        Ok(text)
    }

    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}/{path}", self.port)
    }
}
