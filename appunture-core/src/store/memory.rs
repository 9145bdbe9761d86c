use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{MetaStore, QueueStore, StoreError};
use crate::models::OperationId;
use crate::queue::QueueRecord;

/// In-memory queue storage.
///
/// Clones share the same records, so a test can keep a handle and "restart"
/// by opening a new queue over it.
pub struct MemoryQueueStore<T> {
    records: Arc<Mutex<HashMap<OperationId, T>>>,
    unavailable: Arc<AtomicBool>,
}

impl<T: QueueRecord> MemoryQueueStore<T> {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// When set, every write fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: OperationId) -> Option<T> {
        self.lock().get(&id).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<OperationId, T>> {
        // A poisoned lock only means a test thread panicked mid-write.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl<T: QueueRecord> Default for MemoryQueueStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MemoryQueueStore<T> {
    fn clone(&self) -> Self {
        Self {
            records: Arc::clone(&self.records),
            unavailable: Arc::clone(&self.unavailable),
        }
    }
}

#[async_trait]
impl<T: QueueRecord> QueueStore<T> for MemoryQueueStore<T> {
    async fn load_all(&self) -> Result<Vec<T>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }

    async fn save(&self, record: &T) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().insert(record.id(), record.clone());
        Ok(())
    }

    async fn remove(&self, id: OperationId) -> Result<(), StoreError> {
        self.check_available()?;
        self.lock().remove(&id);
        Ok(())
    }
}

/// In-memory sync metadata.
#[derive(Clone, Default)]
pub struct MemoryMetaStore {
    last_sync: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(*self
            .last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    async fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        *self
            .last_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
        Ok(())
    }
}
