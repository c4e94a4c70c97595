//! Client for posting messages to Discord webhooks.
//!
//! Respects the global and per-webhook rate limits, the limits reported by
//! the API through `X-RateLimit-*` headers, and backs off after a 429.
pub mod client;
pub mod cooldown;
pub mod limiter;
pub mod limiter_api;
pub mod message;
pub mod webhook;

pub use client::Client;
pub use message::{Embed, EmbedAuthor, EmbedField, EmbedFooter, EmbedImage, EmbedThumbnail, Message};
pub use webhook::Webhook;

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("invalid message: {0}")]
    InvalidMessage(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("too many requests, retry after {retry_after:?}")]
    TooManyRequests { retry_after: Duration, global: bool },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}
