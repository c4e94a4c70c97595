//! Shared helpers for integration tests: a fake feed origin and a fake
//! Discord webhook endpoint, both served on ephemeral localhost ports.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;

use feedrelay::ports::clock::Clock;

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Serves the current contents of `body` as the feed document.
pub async fn start_feed_server(body: Arc<Mutex<String>>) -> String {
    let app = Router::new().route(
        "/feed",
        get(move || {
            let body = body.clone();
            async move { body.lock().unwrap().clone() }
        }),
    );
    let addr = serve(app).await;
    format!("http://{addr}/feed")
}

#[derive(Default)]
pub struct HookState {
    /// Bodies of all requests received, in order.
    pub posts: Mutex<Vec<serde_json::Value>>,
    /// Scripted responses, consumed front to back; when exhausted every
    /// request gets a 204.
    pub script: Mutex<VecDeque<(u16, Vec<(&'static str, String)>)>>,
}

impl HookState {
    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn embed_titles(&self) -> Vec<String> {
        self.posts
            .lock()
            .unwrap()
            .iter()
            .filter_map(|p| p["embeds"][0]["title"].as_str().map(String::from))
            .collect()
    }
}

async fn hook_handler(State(state): State<Arc<HookState>>, body: String) -> impl axum::response::IntoResponse {
    let value: serde_json::Value = serde_json::from_str(&body).unwrap_or_default();
    state.posts.lock().unwrap().push(value);
    let scripted = state.script.lock().unwrap().pop_front();
    match scripted {
        None => (StatusCode::NO_CONTENT, HeaderMap::new()),
        Some((status, headers)) => {
            let mut map = HeaderMap::new();
            for (k, v) in headers {
                map.insert(k, HeaderValue::from_str(&v).unwrap());
            }
            (StatusCode::from_u16(status).unwrap(), map)
        }
    }
}

/// Starts a fake webhook endpoint. Returns its URL and the request log.
pub async fn start_hook_server(state: Arc<HookState>) -> String {
    let app = Router::new()
        .route("/hook", post(hook_handler))
        .with_state(state);
    let addr = serve(app).await;
    format!("http://{addr}/hook")
}

async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A single-entry atom feed document.
pub fn atom_feed(guid: &str, title: &str, body: &str, published: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Test Feed</title>
  <link href="https://example.org/"/>
  <updated>{published}</updated>
  <id>urn:feed</id>
  <entry>
    <title>{title}</title>
    <link href="https://example.org/items/1"/>
    <id>{guid}</id>
    <published>{published}</published>
    <updated>{published}</updated>
    <summary>{body}</summary>
  </entry>
</feed>"#
    )
}
