use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tokio::fs;

use super::{MetaStore, QueueStore, StoreError};
use crate::models::OperationId;
use crate::queue::QueueRecord;

const RECORD_EXTENSION: &str = "json";
const LAST_SYNC_FILE: &str = "last_sync";

/// Queue storage with one JSON file per record.
///
/// Writes go through a temporary file and a rename so a crash never leaves a
/// half-written record behind.
pub struct FileQueueStore<T> {
    dir: PathBuf,
    _record: PhantomData<fn() -> T>,
}

impl<T> FileQueueStore<T> {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            _record: PhantomData,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file that holds a record.
    pub fn path(&self, id: OperationId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, RECORD_EXTENSION))
    }
}

impl<T> Clone for FileQueueStore<T> {
    fn clone(&self) -> Self {
        Self::new(self.dir.clone())
    }
}

#[async_trait]
impl<T> QueueStore<T> for FileQueueStore<T>
where
    T: QueueRecord + Serialize + DeserializeOwned,
{
    async fn load_all(&self) -> Result<Vec<T>, StoreError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.dir, e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| io_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }

            let bytes = fs::read(&path).await.map_err(|e| io_error(&path, e))?;
            match serde_json::from_slice::<T>(&bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Skipping unreadable queue record {}: {}", path.display(), e);
                }
            }
        }

        Ok(records)
    }

    async fn save(&self, record: &T) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let bytes = serde_json::to_vec_pretty(record)?;
        let path = self.path(record.id());
        write_atomic(&path, &bytes).await
    }

    async fn remove(&self, id: OperationId) -> Result<(), StoreError> {
        let path = self.path(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}

/// Sync metadata stored as small text files in a directory.
#[derive(Clone, Debug)]
pub struct FileMetaStore {
    dir: PathBuf,
}

impl FileMetaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn last_sync_path(&self) -> PathBuf {
        self.dir.join(LAST_SYNC_FILE)
    }
}

#[async_trait]
impl MetaStore for FileMetaStore {
    async fn load_last_sync(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let path = self.last_sync_path();
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        match DateTime::parse_from_rfc3339(contents.trim()) {
            Ok(at) => Ok(Some(at.with_timezone(&Utc))),
            Err(e) => {
                tracing::warn!("Ignoring malformed last sync in {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    async fn save_last_sync(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;
        write_atomic(&self.last_sync_path(), at.to_rfc3339().as_bytes()).await
    }
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error(&tmp, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, e))
}

fn io_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}
