//! Request-level error taxonomy and its HTML rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use crate::page::{HomePage, Notice, Panel};
use crate::records::RecordError;
use crate::storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Unsupported file type. Only JPEG, PNG, and PDF are allowed.")]
    UnsupportedMediaType(String),
    #[error("File too large. The maximum size is {limit} bytes.")]
    PayloadTooLarge { limit: u64 },
    #[error("No file uploaded.")]
    NoFileProvided,
    #[error("Invalid upload: {0}")]
    InvalidMultipart(String),
    #[error("{0} is required")]
    MissingParameter(&'static str),
    #[error("File not found")]
    RecordNotFound(String),
    #[error("File not found on the server")]
    BlobNotFound(String),
    #[error("File storage error.")]
    Storage(#[from] StorageError),
    #[error("Failed to save file metadata.")]
    Database(#[from] RecordError),
    #[error("Error sending file")]
    Stream(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::UnsupportedMediaType(_)
            | ServiceError::PayloadTooLarge { .. }
            | ServiceError::NoFileProvided
            | ServiceError::InvalidMultipart(_)
            | ServiceError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            ServiceError::RecordNotFound(_) | ServiceError::BlobNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ServiceError::Storage(_) | ServiceError::Database(_) | ServiceError::Stream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Attaches the homepage panel the message should be shown in.
    pub fn in_panel(self, panel: Panel) -> PageError {
        PageError { panel, error: self }
    }
}

/// A [`ServiceError`] rendered into one panel of the homepage.
#[derive(Debug)]
pub struct PageError {
    pub panel: Panel,
    pub error: ServiceError,
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            error!(panel = ?self.panel, error = ?self.error, "request failed");
        } else {
            warn!(panel = ?self.panel, error = %self.error, "request rejected");
        }

        let page = HomePage::default()
            .with_notice(self.panel, Notice::error(self.error.to_string()));
        (status, page).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(
            ServiceError::UnsupportedMediaType("text/plain".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::PayloadTooLarge { limit: 1 }.status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::MissingParameter("originalname").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::RecordNotFound("a".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::BlobNotFound("a".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::from(StorageError::Io(io::Error::other("disk full"))).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::from(RecordError::Invalid("x")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn page_error_renders_status() {
        let response = ServiceError::NoFileProvided
            .in_panel(Panel::Upload)
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_failures_use_neutral_message() {
        let err = ServiceError::from(StorageError::NotFound("1-a.png".into()));
        assert_eq!(err.to_string(), "File storage error.");
    }
}
