//! Core domain types: configuration, processed-item state and statistics
//! records as they are persisted in the store.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::hashing::sha256_hex;
use crate::feed::parser::FeedEntry;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: ConfigApp,
    pub feeds: Vec<ConfigFeed>,
    pub webhooks: Vec<ConfigWebhook>,
}

impl Config {
    /// Returns the configured feeds that are not disabled.
    pub fn enabled_feeds(&self) -> Vec<ConfigFeed> {
        self.feeds.iter().filter(|f| !f.disabled).cloned().collect()
    }

    pub fn feed(&self, name: &str) -> Option<&ConfigFeed> {
        self.feeds.iter().find(|f| f.name == name)
    }

    pub fn webhook(&self, name: &str) -> Option<&ConfigWebhook> {
        self.webhooks.iter().find(|w| w.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigApp {
    pub branding_disabled: bool,
    pub log_level: String,
    /// Items older than this many seconds are skipped. 0 disables the filter.
    pub oldest: i64,
    /// Seconds between feed passes.
    pub ticker: u64,
    /// HTTP timeout in seconds, applied to feed fetches and webhook posts.
    pub timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ConfigFeed {
    pub name: String,
    pub url: String,
    pub webhooks: Vec<String>,
    pub disabled: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigWebhook {
    pub name: String,
    pub url: String,
}

/// State of a feed item relative to what the store has recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    New,
    Updated,
    Processed,
}

/// A processed feed item, persisted per feed and keyed by its unique id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItem {
    pub id: String,
    pub published: DateTime<Utc>,
}

impl ProcessedItem {
    /// Builds the record for a feed entry. Entries without a parsed
    /// publication time are recorded with the current time so culling
    /// still has something to sort on.
    pub fn from_entry(entry: &FeedEntry, now: DateTime<Utc>) -> Self {
        Self {
            id: entry.unique_id(),
            published: entry.published.unwrap_or(now),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl FeedEntry {
    /// Unique id of an entry: the GUID when present, otherwise a hash over
    /// title, description and content.
    pub fn unique_id(&self) -> String {
        if !self.guid.is_empty() {
            return self.guid.clone();
        }
        let mut s = String::new();
        s.push_str(&self.title);
        s.push_str(&self.description);
        s.push_str(&self.content);
        sha256_hex(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedStats {
    pub name: String,
    #[serde(default)]
    pub received_count: i64,
    #[serde(default)]
    pub received_last: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_count: i64,
}

impl FeedStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            received_count: 0,
            received_last: None,
            error_count: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookStats {
    pub name: String,
    #[serde(default)]
    pub sent_count: i64,
    #[serde(default)]
    pub sent_last: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_count: i64,
}

impl WebhookStats {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent_count: 0,
            sent_last: None,
            error_count: 0,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry() -> FeedEntry {
        FeedEntry {
            guid: String::new(),
            title: "title".to_string(),
            description: "description".to_string(),
            content: "content".to_string(),
            link: String::new(),
            image_url: String::new(),
            published: None,
        }
    }

    #[test]
    fn unique_id_prefers_guid() {
        let mut e = entry();
        e.guid = "abc1".to_string();
        assert_eq!(e.unique_id(), "abc1");
    }

    #[test]
    fn unique_id_hashes_when_guid_empty() {
        let e = entry();
        assert_eq!(e.unique_id(), sha256_hex("titledescriptioncontent"));
    }

    #[test]
    fn processed_item_round_trips() {
        let pi = ProcessedItem {
            id: "abc".to_string(),
            published: Utc.with_ymd_and_hms(2024, 8, 22, 11, 0, 0).unwrap(),
        };
        let bytes = pi.to_bytes().unwrap();
        assert_eq!(ProcessedItem::from_bytes(&bytes).unwrap(), pi);
    }

    #[test]
    fn stats_round_trip() {
        let mut fs = FeedStats::new("feed1");
        fs.received_count = 3;
        fs.received_last = Some(Utc.with_ymd_and_hms(2024, 8, 22, 12, 0, 0).unwrap());
        let bytes = fs.to_bytes().unwrap();
        assert_eq!(FeedStats::from_bytes(&bytes).unwrap(), fs);

        let ws = WebhookStats::new("hook1");
        let bytes = ws.to_bytes().unwrap();
        assert_eq!(WebhookStats::from_bytes(&bytes).unwrap(), ws);
    }

    #[test]
    fn stats_decode_tolerates_missing_fields() {
        // Records written before error counting existed decode to zero.
        let old = br#"{"name":"feed1","received_count":2}"#;
        let fs = FeedStats::from_bytes(old).unwrap();
        assert_eq!(fs.error_count, 0);
        assert_eq!(fs.received_count, 2);
    }

    #[test]
    fn missing_published_falls_back_to_now() {
        let now = Utc.with_ymd_and_hms(2024, 8, 22, 12, 0, 0).unwrap();
        let pi = ProcessedItem::from_entry(&entry(), now);
        assert_eq!(pi.published, now);
    }
}
