//! Operator service exposed on localhost.
//!
//! The daemon serves these endpoints for the companion CLI: config
//! re-validation, webhook ping, manual replay, statistics and restart.
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use crate::app::dispatcher::Dispatcher;
use crate::dhook::{Client, Message};
use crate::domain::model::Config;
use crate::infra::config::ConfigLoader;
use crate::infra::store::Store;
use crate::remote::table::ConsoleTable;

pub const PING_CONTENT: &str = "Ping from feedrelay";

pub struct RemoteService {
    cfg: Config,
    config_path: PathBuf,
    client: Client,
    dispatcher: Arc<Dispatcher>,
    store: Arc<Store>,
}

#[derive(Debug, Deserialize)]
pub struct NameArg {
    pub name: String,
}

impl RemoteService {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        store: Arc<Store>,
        cfg: Config,
        config_path: PathBuf,
        client: Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            config_path,
            client,
            dispatcher,
            store,
        })
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/check-config", post(check_config))
            .route("/ping", post(send_ping))
            .route("/post-latest", post(post_latest))
            .route("/stats", get(statistics))
            .route("/restart", post(restart))
            .with_state(self)
    }

    fn statistics_text(&self) -> Result<String, String> {
        let mut out = String::new();

        let mut feeds_table = ConsoleTable::new("Feeds");
        feeds_table.add_row(
            ["Name", "Enabled", "Webhooks", "Received", "Last", "Errors"]
                .map(String::from)
                .to_vec(),
        );
        let mut feeds = self.cfg.feeds.clone();
        feeds.sort_by(|a, b| a.name.cmp(&b.name));
        for cf in &feeds {
            let stats = self
                .store
                .get_feed_stats(&cf.name)
                .map_err(|e| e.to_string())?;
            feeds_table.add_row(vec![
                stats.name.clone(),
                (!cf.disabled).to_string(),
                cf.webhooks.join(","),
                stats.received_count.to_string(),
                stats
                    .received_last
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                stats.error_count.to_string(),
            ]);
        }
        out.push_str(&feeds_table.render());
        out.push('\n');

        let mut hooks_table = ConsoleTable::new("Webhooks");
        hooks_table.add_row(
            ["Name", "Queued", "Sent", "Last", "Errors"]
                .map(String::from)
                .to_vec(),
        );
        let mut webhooks = self.cfg.webhooks.clone();
        webhooks.sort_by(|a, b| a.name.cmp(&b.name));
        for cw in &webhooks {
            let stats = self
                .store
                .get_webhook_stats(&cw.name)
                .map_err(|e| e.to_string())?;
            let status = match self.dispatcher.messenger_status(&cw.name) {
                Ok(s) => s,
                Err(e) => {
                    error!(webhook = %cw.name, error = %e, "Failed to fetch messenger status");
                    Default::default()
                }
            };
            hooks_table.add_row(vec![
                stats.name.clone(),
                status.queue_size.to_string(),
                stats.sent_count.to_string(),
                stats
                    .sent_last
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                status.error_count.to_string(),
            ]);
        }
        out.push_str(&hooks_table.render());
        Ok(out)
    }
}

type HandlerError = (StatusCode, String);

fn internal(e: impl ToString) -> HandlerError {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn check_config(
    State(svc): State<Arc<RemoteService>>,
) -> Result<&'static str, HandlerError> {
    ConfigLoader::load(&svc.config_path).map_err(internal)?;
    Ok("ok")
}

async fn send_ping(
    State(svc): State<Arc<RemoteService>>,
    Json(args): Json<NameArg>,
) -> Result<&'static str, HandlerError> {
    let hook = svc
        .cfg
        .webhook(&args.name)
        .ok_or_else(|| internal(format!("no webhook found with the name '{}'", args.name)))?;
    let wh = svc.client.new_webhook(&hook.url);
    let message = Message {
        content: PING_CONTENT.to_string(),
        ..Default::default()
    };
    wh.execute(&message).await.map_err(internal)?;
    Ok("ok")
}

async fn post_latest(
    State(svc): State<Arc<RemoteService>>,
    Json(args): Json<NameArg>,
) -> Result<&'static str, HandlerError> {
    svc.dispatcher
        .post_latest_feed_item(&args.name)
        .await
        .map_err(internal)?;
    Ok("ok")
}

async fn statistics(State(svc): State<Arc<RemoteService>>) -> Result<String, HandlerError> {
    svc.statistics_text().map_err(internal)
}

async fn restart(State(svc): State<Arc<RemoteService>>) -> Result<&'static str, HandlerError> {
    svc.dispatcher.restart().await.map_err(internal)?;
    Ok("ok")
}
