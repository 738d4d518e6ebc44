//! Blob storage on the local filesystem.

use chrono::Utc;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::ErrorKind;
use tracing::debug;

use crate::atomic::AtomicFile;

/// Flat directory of blobs keyed by generated storage names.
#[derive(Clone, Debug)]
pub struct BlobStore {
    root: PathBuf,
    #[cfg(test)]
    fail_deletes: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

/// A stored blob as seen by a directory scan.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub storage_name: String,
    pub modified: Option<SystemTime>,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            #[cfg(test)]
            fail_deletes: Default::default(),
        }
    }

    /// Makes every later `delete` fail once the blob has been found.
    #[cfg(test)]
    pub fn fail_deletes(&self) {
        self.fail_deletes
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Persists `bytes` under `<micros>-<sanitized name>` and returns that name.
    ///
    /// The name is claimed with an exclusive create before the contents are
    /// renamed over it, so concurrent stores never share a name.
    pub async fn store(&self, bytes: &[u8], suggested_name: &str) -> Result<String, StorageError> {
        let suffix = sanitize_name(suggested_name);
        let mut stamp = Utc::now().timestamp_micros();
        let (storage_name, target) = loop {
            let candidate = format!("{stamp}-{suffix}");
            let target = self.resolve(&candidate)?;
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&target)
                .await
            {
                Ok(_) => break (candidate, target),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(err) => return Err(StorageError::Io(err)),
            }
        };

        let written = match AtomicFile::new(&target).await {
            Ok(atomic) => atomic.write_all_and_finalize(bytes).await,
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            if let Err(cleanup_err) = fs::remove_file(&target).await {
                debug!(storage_name, error = %cleanup_err, "failed to release reserved name");
            }
            return Err(StorageError::Io(err));
        }
        debug!(storage_name, size = bytes.len(), "blob stored");
        Ok(storage_name)
    }

    pub async fn exists(&self, storage_name: &str) -> Result<bool, StorageError> {
        let target = self.resolve(storage_name)?;
        match fs::symlink_metadata(&target).await {
            Ok(metadata) => Ok(metadata.is_file()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Opens a blob for streaming, returning the handle and its byte length.
    pub async fn open(&self, storage_name: &str) -> Result<(File, u64), StorageError> {
        let target = self.checked_file(storage_name).await?;
        let file = File::open(&target).await?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    pub async fn delete(&self, storage_name: &str) -> Result<(), StorageError> {
        let target = self.checked_file(storage_name).await?;
        #[cfg(test)]
        if self.fail_deletes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::Io(io::Error::other("blob removal refused")));
        }
        fs::remove_file(target).await?;
        Ok(())
    }

    /// Lists stored blobs, skipping in-flight temp files.
    pub async fn list(&self) -> Result<Vec<BlobEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.root).await?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let Some(metadata) = skip_vanished(entry.metadata().await)? else {
                continue;
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(BlobEntry {
                storage_name: name,
                modified: metadata.modified().ok(),
            });
        }

        entries.sort_by(|a, b| a.storage_name.cmp(&b.storage_name));
        Ok(entries)
    }

    fn resolve(&self, storage_name: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(storage_name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if !storage_name.contains(['/', '\\']) => {
                Ok(self.root.join(segment))
            }
            _ => Err(StorageError::InvalidName),
        }
    }

    async fn checked_file(&self, storage_name: &str) -> Result<PathBuf, StorageError> {
        let target = self.resolve(storage_name)?;
        match fs::symlink_metadata(&target).await {
            Ok(metadata) if metadata.file_type().is_symlink() => Err(StorageError::InvalidName),
            Ok(metadata) if !metadata.is_file() => {
                Err(StorageError::NotFound(storage_name.to_string()))
            }
            Ok(_) => Ok(target),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(storage_name.to_string()))
            }
            Err(err) => Err(StorageError::Io(err)),
        }
    }
}

/// Maps `NotFound` to `None` for entries removed after the directory was read.
fn skip_vanished<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Reduces a client filename to a safe single path segment.
fn sanitize_name(name: &str) -> String {
    let last = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = last
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("invalid storage name")]
    InvalidName,
    #[error("blob not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}
