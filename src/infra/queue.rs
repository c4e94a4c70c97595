//! Persistent FIFO queue, one redb table per webhook.
//!
//! Keys are monotonic sequence numbers issued from a shared `queue-seq`
//! table inside the same write transaction as the insert, so an entry is
//! either fully visible or not at all. Consumers block on a [`Notify`]
//! and re-check the table after every wake.
use std::sync::Arc;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use thiserror::Error;
use tokio::sync::{watch, Notify};

/// Leaves room below the first sequence number so entries can be returned
/// to the head of the queue without colliding.
const SEQ_START: u64 = 1 << 32;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("canceled")]
    Canceled,
}

pub struct DurableQueue {
    db: Arc<Database>,
    name: String,
    table_name: String,
    notify: Notify,
}

impl DurableQueue {
    const SEQ: TableDefinition<'_, &str, u64> = TableDefinition::new("queue-seq");

    /// Opens the queue with the given name, creating its table when needed.
    /// A queue that already exists in the database is re-used.
    pub fn new(db: Arc<Database>, name: &str) -> Result<Arc<Self>, QueueError> {
        let q = Self {
            db,
            name: name.to_string(),
            table_name: format!("queue-{name}"),
            notify: Notify::new(),
        };
        let write = q.db.begin_write()?;
        write.open_table(q.def())?;
        write.open_table(Self::SEQ)?;
        write.commit()?;
        Ok(Arc::new(q))
    }

    fn def(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.table_name)
    }

    /// Appends an entry and wakes one waiting consumer.
    pub fn put(&self, value: &[u8]) -> Result<(), QueueError> {
        let write = self.db.begin_write()?;
        {
            let mut seq_table = write.open_table(Self::SEQ)?;
            let seq = seq_table
                .get(self.name.as_str())?
                .map(|g| g.value())
                .unwrap_or(SEQ_START);
            seq_table.insert(self.name.as_str(), seq + 1)?;
            let mut table = write.open_table(self.def())?;
            table.insert(seq, value)?;
        }
        write.commit()?;
        self.notify.notify_one();
        Ok(())
    }

    /// Inserts an entry in front of the current head. Used to hand a popped
    /// but unsent entry back to the queue on shutdown.
    pub fn put_front(&self, value: &[u8]) -> Result<(), QueueError> {
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(self.def())?;
            let key = match table.first()? {
                Some((k, _)) => k.value().saturating_sub(1),
                // Empty queue: take a regular sequence number so the next
                // put cannot collide with this entry.
                None => {
                    let mut seq_table = write.open_table(Self::SEQ)?;
                    let seq = seq_table
                        .get(self.name.as_str())?
                        .map(|g| g.value())
                        .unwrap_or(SEQ_START);
                    seq_table.insert(self.name.as_str(), seq + 1)?;
                    seq
                }
            };
            table.insert(key, value)?;
        }
        write.commit()?;
        self.notify.notify_one();
        Ok(())
    }

    /// Removes and returns the entry with the lowest key, or `None` when
    /// the queue is empty.
    pub fn get_nowait(&self) -> Result<Option<Vec<u8>>, QueueError> {
        let write = self.db.begin_write()?;
        let value = {
            let mut table = write.open_table(self.def())?;
            let first = table.first()?;
            let kv = first.map(|(k, v)| (k.value(), v.value().to_vec()));
            match kv {
                None => None,
                Some((key, value)) => {
                    table.remove(&key)?;
                    Some(value)
                }
            }
        };
        write.commit()?;
        Ok(value)
    }

    /// Returns the next entry, waiting while the queue is empty.
    pub async fn get(&self) -> Result<Vec<u8>, QueueError> {
        loop {
            // Arm the waiter before checking, so a put between the check
            // and the wait is not lost.
            let notified = self.notify.notified();
            if let Some(v) = self.get_nowait()? {
                return Ok(v);
            }
            notified.await;
        }
    }

    /// Like [`get`](Self::get) but returns `Canceled` when the given signal
    /// fires, even if the queue stays empty.
    pub async fn get_with_cancel(
        &self,
        cancel: &watch::Receiver<bool>,
    ) -> Result<Vec<u8>, QueueError> {
        let mut cancel = cancel.clone();
        if *cancel.borrow() {
            return Err(QueueError::Canceled);
        }
        loop {
            let notified = self.notify.notified();
            if let Some(v) = self.get_nowait()? {
                return Ok(v);
            }
            tokio::select! {
                _ = notified => {}
                _ = cancel.changed() => return Err(QueueError::Canceled),
            }
        }
    }

    pub fn size(&self) -> Result<u64, QueueError> {
        let read = self.db.begin_read()?;
        let table = read.open_table(self.def())?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.size()? == 0)
    }

    /// Deletes all entries from the queue.
    pub fn clear(&self) -> Result<(), QueueError> {
        let write = self.db.begin_write()?;
        {
            let mut table = write.open_table(self.def())?;
            let keys: Vec<u64> = table
                .iter()?
                .map(|row| row.map(|(k, _)| k.value()))
                .collect::<Result<_, _>>()?;
            for key in keys {
                table.remove(&key)?;
            }
        }
        write.commit()?;
        Ok(())
    }
}
