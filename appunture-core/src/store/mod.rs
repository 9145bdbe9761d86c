//! Durable storage seams for the sync queues.
//!
//! The queues only ever talk to storage through [`QueueStore`] and
//! [`MetaStore`]; clients pick the backend. Two backends live here:
//! - [`FileQueueStore`] / [`FileMetaStore`]: one JSON file per record
//! - [`MemoryQueueStore`] / [`MemoryMetaStore`]: process memory, with a switch
//!   that makes every write fail

mod file;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

use crate::models::OperationId;
use crate::queue::QueueRecord;

pub use file::{FileMetaStore, FileQueueStore};
pub use memory::{MemoryMetaStore, MemoryQueueStore};

/// Errors raised by storage backends.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage is unavailable")]
    Unavailable,
}

/// Durable storage for one queue, keyed by record id.
#[async_trait]
pub trait QueueStore<T: QueueRecord>: Send + Sync {
    /// Loads every stored record, in any order.
    async fn load_all(&self) -> Result<Vec<T>, StoreError>;

    /// Inserts or replaces a record.
    async fn save(&self, record: &T) -> Result<(), StoreError>;

    /// Removes a record. Removing an unknown id is not an error.
    async fn remove(&self, id: OperationId) -> Result<(), StoreError>;
}

/// Durable storage for sync metadata.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
    async fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError>;
}
