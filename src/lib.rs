//! Feedrelay forwards RSS and Atom feeds to Discord webhooks.
//!
//! The dispatcher polls feeds on a ticker, diffs items against the store
//! and enqueues new or updated items into durable per-webhook queues. One
//! messenger per webhook drains its queue and posts to Discord under the
//! applicable rate limits. A localhost operator service provides config
//! checks, ping, manual replay, statistics and restart.
pub mod app;
pub mod dhook;
pub mod domain;
pub mod feed;
pub mod infra;
pub mod ports;
pub mod remote;
