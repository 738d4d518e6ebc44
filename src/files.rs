//! Homepage, download and delete handlers keyed by original filename.

use axum::body::Body as AxumBody;
use axum::extract::{Extension, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use httpdate::fmt_http_date;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::SystemTime;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

use crate::error::{PageError, ServiceError};
use crate::page::{HomePage, Notice, Panel};
use crate::records::{FileRecord, RecordStore};
use crate::storage::BlobStore;

#[derive(Deserialize)]
pub(crate) struct OriginalNameQuery {
    originalname: Option<String>,
}

impl OriginalNameQuery {
    fn required(self) -> Result<String, ServiceError> {
        self.originalname
            .filter(|name| !name.is_empty())
            .ok_or(ServiceError::MissingParameter("originalname"))
    }
}

/// Renders the empty upload form.
pub async fn index() -> HomePage {
    HomePage::default()
}

/// Looks up the record for `original_name` and confirms its blob is present.
async fn locate(
    blobs: &BlobStore,
    records: &RecordStore,
    original_name: &str,
) -> Result<FileRecord, ServiceError> {
    let record = records
        .find_by_original_name(original_name)
        .await
        .ok_or_else(|| ServiceError::RecordNotFound(original_name.to_string()))?;

    if !blobs.exists(&record.storage_name).await? {
        warn!(
            storage_name = record.storage_name,
            original_name, "dangling record: blob is missing"
        );
        return Err(ServiceError::BlobNotFound(record.storage_name));
    }
    Ok(record)
}

/// Streams a stored file back under its original name.
pub async fn download_file(
    Query(query): Query<OriginalNameQuery>,
    Extension(blobs): Extension<Arc<BlobStore>>,
    Extension(records): Extension<Arc<RecordStore>>,
) -> Result<Response, PageError> {
    let fail = |err: ServiceError| err.in_panel(Panel::Download);
    let original_name = query.required().map_err(fail)?;
    let record = locate(&blobs, &records, &original_name)
        .await
        .map_err(fail)?;

    let (file, file_size) = blobs.open(&record.storage_name).await.map_err(|err| {
        error!(storage_name = record.storage_name, error = %err, "failed to open blob");
        fail(ServiceError::Stream(err.to_string()))
    })?;
    if file_size != record.size_bytes {
        warn!(
            storage_name = record.storage_name,
            recorded = record.size_bytes,
            actual = file_size,
            "blob size differs from record"
        );
    }

    let headers = download_headers(&record, file_size)
        .map_err(|err| fail(ServiceError::Stream(err)))?;
    info!(original_name, size = file_size, "download file");
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

fn download_headers(record: &FileRecord, file_size: u64) -> Result<HeaderMap, String> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&record.mime_type).map_err(|_| "invalid MIME type".to_string())?,
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&record.original_name))
            .map_err(|_| "invalid filename".to_string())?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file_size));
    let uploaded_at: SystemTime = record.uploaded_at.into();
    if let Ok(value) = HeaderValue::from_str(&fmt_http_date(uploaded_at)) {
        headers.insert(header::LAST_MODIFIED, value);
    }
    Ok(headers)
}

/// Builds an attachment disposition with an ASCII fallback and an RFC 5987 name.
fn content_disposition(original_name: &str) -> String {
    let fallback: String = original_name
        .chars()
        .map(|ch| {
            if (ch.is_ascii_graphic() && ch != '"' && ch != '\\') || ch == ' ' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    let encoded = utf8_percent_encode(original_name, NON_ALPHANUMERIC);
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}

/// Removes a stored file: the record first, then its blob.
pub async fn delete_file(
    Query(query): Query<OriginalNameQuery>,
    Extension(blobs): Extension<Arc<BlobStore>>,
    Extension(records): Extension<Arc<RecordStore>>,
) -> Result<HomePage, PageError> {
    let fail = |err: ServiceError| err.in_panel(Panel::Delete);
    let original_name = query.required().map_err(fail)?;
    let record = locate(&blobs, &records, &original_name)
        .await
        .map_err(fail)?;

    if records
        .remove(&record.storage_name)
        .await
        .map_err(|err| fail(err.into()))?
        .is_none()
    {
        return Err(fail(ServiceError::RecordNotFound(original_name)));
    }

    if let Err(err) = blobs.delete(&record.storage_name).await {
        warn!(
            storage_name = record.storage_name,
            error = %err,
            "lost resource: blob orphaned after its record was deleted"
        );
        return Err(fail(err.into()));
    }

    info!(
        original_name,
        storage_name = record.storage_name,
        "delete file"
    );
    Ok(HomePage::default().with_notice(
        Panel::Delete,
        Notice::success("File deleted successfully."),
    ))
}
