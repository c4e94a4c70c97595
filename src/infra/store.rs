//! Persistent state backed by a single-file redb database.
//!
//! Table layout: one `feeds/<name>` table per configured feed holding
//! processed items keyed by item id, plus `stats/feeds` and
//! `stats/webhooks` for counters. Webhook queues live in their own
//! `queue-<name>` tables managed by [`crate::infra::queue`].
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{
    Database, ReadableTable, ReadableTableMetadata, TableDefinition, TableError, TableHandle,
};
use thiserror::Error;
use tracing::info;

use crate::domain::model::{Config, FeedStats, ItemState, ProcessedItem, WebhookStats};
use crate::feed::parser::FeedEntry;

const FEED_TABLE_PREFIX: &str = "feeds/";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] redb::Error),
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

pub struct Store {
    db: Arc<Database>,
    cfg: Config,
}

impl Store {
    const STATS_FEEDS: TableDefinition<'_, &str, &[u8]> = TableDefinition::new("stats/feeds");
    const STATS_WEBHOOKS: TableDefinition<'_, &str, &[u8]> =
        TableDefinition::new("stats/webhooks");

    pub fn new(db: Arc<Database>, cfg: Config) -> Self {
        Self { db, cfg }
    }

    pub fn db(&self) -> Arc<Database> {
        self.db.clone()
    }

    /// Creates all required tables and deletes tables of feeds that are no
    /// longer configured. Idempotent.
    pub fn init(&self) -> Result<(), StoreError> {
        let configured: Vec<String> = self.cfg.feeds.iter().map(|f| f.name.clone()).collect();

        let obsolete: Vec<String> = {
            let read = self.db.begin_read()?;
            let tables = read.list_tables()?;
            let result: Vec<String> = tables
                .filter_map(|t| {
                    let name = t.name().to_string();
                    let feed = name.strip_prefix(FEED_TABLE_PREFIX)?;
                    if configured.iter().any(|f| f == feed) {
                        None
                    } else {
                        Some(name)
                    }
                })
                .collect();
            result
        };

        let write = self.db.begin_write()?;
        for feed in &configured {
            let name = feed_table_name(feed);
            let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
            write.open_table(def)?;
        }
        for name in &obsolete {
            let def: TableDefinition<&str, &[u8]> = TableDefinition::new(name);
            if write.delete_table(def)? {
                info!(table = %name, "Deleted obsolete table for feed");
            }
        }
        write.open_table(Self::STATS_FEEDS)?;
        write.open_table(Self::STATS_WEBHOOKS)?;
        write.commit()?;
        Ok(())
    }

    /// Reports whether an entry is new, updated or already processed.
    ///
    /// An entry without a publication timestamp that is already recorded is
    /// reported as processed, since an update cannot be distinguished. The
    /// same applies when the stored record no longer decodes.
    pub fn get_item_state(&self, feed: &str, entry: &FeedEntry) -> Result<ItemState, StoreError> {
        let name = feed_table_name(feed);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let read = self.db.begin_read()?;
        let table = match read.open_table(def) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(ItemState::New),
            Err(e) => return Err(e.into()),
        };
        let id = entry.unique_id();
        let Some(guard) = table.get(id.as_str())? else {
            return Ok(ItemState::New);
        };
        let stored = match ProcessedItem::from_bytes(guard.value()) {
            Ok(s) => s,
            Err(e) => {
                if entry.published.is_none() {
                    return Ok(ItemState::Processed);
                }
                return Err(e.into());
            }
        };
        Ok(match entry.published {
            None => ItemState::Processed,
            Some(p) if p == stored.published => ItemState::Processed,
            Some(_) => ItemState::Updated,
        })
    }

    pub fn record_item(
        &self,
        feed: &str,
        entry: &FeedEntry,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let name = feed_table_name(feed);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let item = ProcessedItem::from_entry(entry, now);
        let value = item.to_bytes()?;
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(def)?;
            table.insert(item.id.as_str(), value.as_slice())?;
        }
        write.commit()?;
        Ok(())
    }

    /// Deletes the oldest items of a feed when there are more than `limit`.
    /// Newest by publication time survive; ties resolve by key order.
    pub fn cull_items(&self, feed: &str, limit: usize) -> Result<(), StoreError> {
        let name = feed_table_name(feed);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(def)?;
            let mut items = Vec::new();
            for row in table.iter()? {
                let (k, v) = row?;
                let item = ProcessedItem::from_bytes(v.value())?;
                items.push((k.value().to_string(), item.published));
            }
            if items.len() > limit {
                items.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                for (key, _) in items.split_off(limit) {
                    table.remove(key.as_str())?;
                }
            }
        }
        write.commit()?;
        Ok(())
    }

    pub fn list_items(&self, feed: &str) -> Result<Vec<ProcessedItem>, StoreError> {
        let name = feed_table_name(feed);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let read = self.db.begin_read()?;
        let table = match read.open_table(def) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut items = Vec::new();
        for row in table.iter()? {
            let (_, v) = row?;
            items.push(ProcessedItem::from_bytes(v.value())?);
        }
        Ok(items)
    }

    pub fn item_count(&self, feed: &str) -> Result<u64, StoreError> {
        let name = feed_table_name(feed);
        let def: TableDefinition<&str, &[u8]> = TableDefinition::new(&name);
        let read = self.db.begin_read()?;
        let table = match read.open_table(def) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        Ok(table.len()?)
    }

    /// Empties all feed item tables. Mainly used by tests.
    pub fn clear_feeds(&self) -> Result<(), StoreError> {
        let names: Vec<String> = {
            let read = self.db.begin_read()?;
            let tables = read.list_tables()?;
            let result: Vec<String> = tables
                .map(|t| t.name().to_string())
                .filter(|n| n.starts_with(FEED_TABLE_PREFIX))
                .collect();
            result
        };
        let write = self.db.begin_write()?;
        for name in &names {
            let def: TableDefinition<&str, &[u8]> = TableDefinition::new(name);
            let mut table = write.open_table(def)?;
            let keys: Vec<String> = table
                .iter()?
                .map(|row| row.map(|(k, _)| k.value().to_string()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                table.remove(key.as_str())?;
            }
        }
        write.commit()?;
        Ok(())
    }

    /// Read-modify-write of a feed's statistics in a single transaction.
    /// An error from `mutate` aborts the write.
    pub fn update_feed_stats<F>(&self, name: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut FeedStats) -> Result<(), StoreError>,
    {
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(Self::STATS_FEEDS)?;
            let mut stats = match table.get(name)? {
                Some(guard) => FeedStats::from_bytes(guard.value())?,
                None => FeedStats::new(name),
            };
            mutate(&mut stats)?;
            let value = stats.to_bytes()?;
            table.insert(name, value.as_slice())?;
        }
        write.commit()?;
        Ok(())
    }

    /// Returns the stats for a feed, or a zero value carrying the name when
    /// nothing has been recorded yet.
    pub fn get_feed_stats(&self, name: &str) -> Result<FeedStats, StoreError> {
        let read = self.db.begin_read()?;
        let table = match read.open_table(Self::STATS_FEEDS) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(FeedStats::new(name)),
            Err(e) => return Err(e.into()),
        };
        match table.get(name)? {
            Some(guard) => Ok(FeedStats::from_bytes(guard.value())?),
            None => Ok(FeedStats::new(name)),
        }
    }

    pub fn update_webhook_stats<F>(&self, name: &str, mutate: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut WebhookStats) -> Result<(), StoreError>,
    {
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(Self::STATS_WEBHOOKS)?;
            let mut stats = match table.get(name)? {
                Some(guard) => WebhookStats::from_bytes(guard.value())?,
                None => WebhookStats::new(name),
            };
            mutate(&mut stats)?;
            let value = stats.to_bytes()?;
            table.insert(name, value.as_slice())?;
        }
        write.commit()?;
        Ok(())
    }

    pub fn get_webhook_stats(&self, name: &str) -> Result<WebhookStats, StoreError> {
        let read = self.db.begin_read()?;
        let table = match read.open_table(Self::STATS_WEBHOOKS) {
            Ok(t) => t,
            Err(TableError::TableDoesNotExist(_)) => return Ok(WebhookStats::new(name)),
            Err(e) => return Err(e.into()),
        };
        match table.get(name)? {
            Some(guard) => Ok(WebhookStats::from_bytes(guard.value())?),
            None => Ok(WebhookStats::new(name)),
        }
    }
}

fn feed_table_name(feed: &str) -> String {
    format!("{FEED_TABLE_PREFIX}{feed}")
}
