//! File metadata records kept in a JSON document collection.
//!
//! The whole collection lives in memory behind an async mutex and is
//! rewritten atomically after every mutation, so the on-disk document always
//! matches what readers observe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::atomic::AtomicFile;

/// Metadata describing one uploaded blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub storage_name: String,
    pub original_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
}

impl FileRecord {
    /// Checks the required fields before a record is accepted.
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.storage_name.trim().is_empty() {
            return Err(RecordError::Invalid("storageName is required"));
        }
        if self.storage_name.contains(['/', '\\']) || self.storage_name == ".." {
            return Err(RecordError::Invalid("storageName must be a single segment"));
        }
        if self.original_name.is_empty() {
            return Err(RecordError::Invalid("originalName is required"));
        }
        if self.mime_type.trim().is_empty() {
            return Err(RecordError::Invalid("mimeType is required"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid record: {0}")]
    Invalid(&'static str),
    #[error("duplicate storage name: {0}")]
    DuplicateStorageName(String),
    #[error("record collection io: {0}")]
    Io(#[from] io::Error),
    #[error("record collection is corrupt: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct Collection {
    records: Vec<FileRecord>,
}

/// Document collection of [`FileRecord`]s in insertion order.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: Mutex<Vec<FileRecord>>,
}

impl RecordStore {
    /// Loads the collection at `path`, starting empty when the file is absent.
    pub async fn open(path: PathBuf) -> Result<Self, RecordError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }

        let records = match fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Collection>(&bytes)?.records,
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(RecordError::Io(err)),
        };
        info!(path = ?path, count = records.len(), "record collection loaded");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn insert(&self, record: FileRecord) -> Result<(), RecordError> {
        record.validate()?;
        let mut records = self.records.lock().await;
        if records
            .iter()
            .any(|existing| existing.storage_name == record.storage_name)
        {
            return Err(RecordError::DuplicateStorageName(record.storage_name));
        }

        records.push(record);
        if let Err(err) = persist(&self.path, &records).await {
            records.pop();
            return Err(err);
        }
        debug!(count = records.len(), "record inserted");
        Ok(())
    }

    /// Returns the oldest record carrying `original_name`.
    pub async fn find_by_original_name(&self, original_name: &str) -> Option<FileRecord> {
        let records = self.records.lock().await;
        records
            .iter()
            .find(|record| record.original_name == original_name)
            .cloned()
    }

    /// Removes the record with `storage_name`, returning it if it existed.
    pub async fn remove(&self, storage_name: &str) -> Result<Option<FileRecord>, RecordError> {
        let mut records = self.records.lock().await;
        let Some(index) = records
            .iter()
            .position(|record| record.storage_name == storage_name)
        else {
            return Ok(None);
        };

        let removed = records.remove(index);
        if let Err(err) = persist(&self.path, &records).await {
            records.insert(index, removed);
            return Err(err);
        }
        Ok(Some(removed))
    }

    pub async fn snapshot(&self) -> Vec<FileRecord> {
        self.records.lock().await.clone()
    }
}

async fn persist(path: &Path, records: &[FileRecord]) -> Result<(), RecordError> {
    let document = serde_json::to_vec_pretty(&CollectionRef { records })?;
    AtomicFile::new(path)
        .await?
        .write_all_and_finalize(&document)
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct CollectionRef<'a> {
    records: &'a [FileRecord],
}
