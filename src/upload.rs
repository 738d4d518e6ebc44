//! Multipart upload validation, blob storage and record creation.

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{ALLOWED_MIME_TYPES, DEFAULT_MAX_UPLOAD_SIZE, DEFAULT_UPLOADER};
use crate::error::{PageError, ServiceError};
use crate::page::{HomePage, Notice, Panel};
use crate::records::{FileRecord, RecordError, RecordStore};
use crate::storage::BlobStore;

const FILE_FIELD: &str = "file";
const UPLOADER_FIELD: &str = "uploader";
/// Byte cap for the free-text uploader field.
const MAX_UPLOADER_LEN: usize = 256;

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_size: u64,
    pub allowed_types: &'static [&'static str],
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_UPLOAD_SIZE,
            allowed_types: ALLOWED_MIME_TYPES,
        }
    }
}

impl UploadPolicy {
    pub fn check_mime_type(&self, mime_type: &str) -> Result<(), ServiceError> {
        if self.allowed_types.contains(&mime_type) {
            Ok(())
        } else {
            Err(ServiceError::UnsupportedMediaType(mime_type.to_string()))
        }
    }

    pub fn check_size(&self, size: u64) -> Result<(), ServiceError> {
        if size > self.max_size {
            Err(ServiceError::PayloadTooLarge {
                limit: self.max_size,
            })
        } else {
            Ok(())
        }
    }
}

/// A validated file pulled out of a multipart body.
#[derive(Debug)]
pub struct IncomingFile {
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    pub uploader: Option<String>,
}

/// Reads the `file` and `uploader` fields, validating the file as it streams in.
pub async fn read_upload(
    mut multipart: Multipart,
    policy: &UploadPolicy,
) -> Result<IncomingFile, ServiceError> {
    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut uploader: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ServiceError::InvalidMultipart(err.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            FILE_FIELD => {
                let Some(original_name) = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                else {
                    continue;
                };
                if file.is_some() {
                    return Err(ServiceError::InvalidMultipart(
                        "only one file may be uploaded".into(),
                    ));
                }
                let mime_type = declared_mime_type(&field, &original_name);
                policy.check_mime_type(&mime_type)?;
                let data = read_limited(field, policy).await?;
                file = Some((original_name, mime_type, data));
            }
            UPLOADER_FIELD => {
                let value = read_uploader(field).await?;
                let value = value.trim();
                if !value.is_empty() {
                    uploader = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let (original_name, mime_type, data) = file.ok_or(ServiceError::NoFileProvided)?;
    Ok(IncomingFile {
        original_name,
        mime_type,
        data,
        uploader,
    })
}

fn declared_mime_type(field: &Field<'_>, original_name: &str) -> String {
    match field.content_type() {
        Some(value) if !value.trim().is_empty() => value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
        _ => mime_guess::from_path(original_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

async fn read_limited(
    mut field: Field<'_>,
    policy: &UploadPolicy,
) -> Result<Vec<u8>, ServiceError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ServiceError::InvalidMultipart(err.body_text()))?
    {
        policy.check_size((data.len() + chunk.len()) as u64)?;
        data.extend_from_slice(&chunk);
    }
    Ok(data)
}

async fn read_uploader(mut field: Field<'_>) -> Result<String, ServiceError> {
    let mut data = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ServiceError::InvalidMultipart(err.body_text()))?
    {
        if data.len() + chunk.len() > MAX_UPLOADER_LEN {
            return Err(ServiceError::InvalidMultipart(format!(
                "uploader must be at most {MAX_UPLOADER_LEN} bytes"
            )));
        }
        data.extend_from_slice(&chunk);
    }
    String::from_utf8(data)
        .map_err(|_| ServiceError::InvalidMultipart("uploader is not valid UTF-8".into()))
}

/// Stores the blob, then records it; removes the blob again if the record cannot be saved.
pub async fn accept_upload(
    blobs: &BlobStore,
    records: &RecordStore,
    incoming: IncomingFile,
) -> Result<FileRecord, ServiceError> {
    let storage_name = blobs
        .store(&incoming.data, &incoming.original_name)
        .await?;

    let record = FileRecord {
        storage_name,
        original_name: incoming.original_name,
        size_bytes: incoming.data.len() as u64,
        mime_type: incoming.mime_type,
        uploaded_at: Utc::now(),
        uploader: Some(
            incoming
                .uploader
                .unwrap_or_else(|| DEFAULT_UPLOADER.to_string()),
        ),
    };

    save_record(blobs, records, record.clone()).await?;

    info!(
        storage_name = record.storage_name,
        original_name = record.original_name,
        size = record.size_bytes,
        mime_type = record.mime_type,
        "upload stored"
    );
    Ok(record)
}

/// Inserts the record, releasing its blob if the insert fails.
///
/// A duplicate storage name means another record already owns the blob, so
/// the blob is left in place.
async fn save_record(
    blobs: &BlobStore,
    records: &RecordStore,
    record: FileRecord,
) -> Result<(), ServiceError> {
    let storage_name = record.storage_name.clone();
    let Err(err) = records.insert(record).await else {
        return Ok(());
    };

    if matches!(err, RecordError::DuplicateStorageName(_)) {
        warn!(storage_name, "storage name already recorded, keeping blob");
    } else if let Err(cleanup_err) = blobs.delete(&storage_name).await {
        warn!(
            storage_name,
            error = %cleanup_err,
            "lost resource: blob orphaned after metadata save failed"
        );
    }
    Err(ServiceError::Database(err))
}

/// Handles `POST /upload`.
pub async fn upload_file(
    Extension(blobs): Extension<Arc<BlobStore>>,
    Extension(records): Extension<Arc<RecordStore>>,
    Extension(policy): Extension<Arc<UploadPolicy>>,
    multipart: Multipart,
) -> Result<impl IntoResponse, PageError> {
    let incoming = read_upload(multipart, &policy)
        .await
        .map_err(|err| err.in_panel(Panel::Upload))?;
    let record = accept_upload(&blobs, &records, incoming)
        .await
        .map_err(|err| err.in_panel(Panel::Upload))?;

    let page = HomePage::default()
        .with_notice(Panel::Upload, Notice::success("File uploaded successfully!"))
        .with_file(record);
    Ok((StatusCode::CREATED, page))
}
