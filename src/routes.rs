//! Route table and shared middleware stack.

use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::Request;
use axum::routing::{get, post};
use axum::{Router, middleware};
use std::sync::Arc;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::http::{add_security_headers, client_ip};
use crate::records::RecordStore;
use crate::storage::BlobStore;
use crate::upload::UploadPolicy;
use crate::{files, upload};

/// Builds the application router around explicitly constructed stores.
pub fn build_router(
    blobs: Arc<BlobStore>,
    records: Arc<RecordStore>,
    policy: Arc<UploadPolicy>,
) -> Router {
    Router::new()
        .route("/", get(files::index))
        .route(
            "/upload",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/download", get(files::download_file))
        .route("/delete", get(files::delete_file))
        .layer(middleware::from_fn(add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip = client_ip(request),
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(blobs))
        .layer(Extension(records))
        .layer(Extension(policy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background::audit_orphans;
    use axum::body::Body;
    use axum::http::{Response, StatusCode, header};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "filebox-test-boundary";

    struct Harness {
        _temp: TempDir,
        blobs: Arc<BlobStore>,
        records: Arc<RecordStore>,
        router: Router,
    }

    async fn harness() -> Harness {
        let temp = tempfile::tempdir().expect("tempdir");
        let blobs = Arc::new(BlobStore::new(temp.path().join("uploads")));
        blobs.ensure_root().await.expect("create upload root");
        let records = Arc::new(
            RecordStore::open(temp.path().join("records.json"))
                .await
                .expect("open records"),
        );
        let router = build_router(
            blobs.clone(),
            records.clone(),
            Arc::new(UploadPolicy::default()),
        );
        Harness {
            _temp: temp,
            blobs,
            records,
            router,
        }
    }

    struct Part<'a> {
        name: &'a str,
        file_name: Option<&'a str>,
        content_type: Option<&'a str>,
        data: &'a [u8],
    }

    fn file_part<'a>(file_name: &'a str, content_type: &'a str, data: &'a [u8]) -> Part<'a> {
        Part {
            name: "file",
            file_name: Some(file_name),
            content_type: Some(content_type),
            data,
        }
    }

    fn multipart_request(parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            let mut disposition = format!("Content-Disposition: form-data; name=\"{}\"", part.name);
            if let Some(file_name) = part.file_name {
                disposition.push_str(&format!("; filename=\"{file_name}\""));
            }
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(b"\r\n");
            if let Some(content_type) = part.content_type {
                body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
            }
            body.extend_from_slice(b"\r\n");
            body.extend_from_slice(part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("build upload request")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("build get request")
    }

    async fn send(router: &Router, request: Request<Body>) -> Response<Body> {
        router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible")
    }

    async fn body_bytes(response: Response<Body>) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    async fn body_text(response: Response<Body>) -> String {
        String::from_utf8(body_bytes(response).await).expect("utf8 body")
    }

    #[tokio::test]
    async fn index_renders_form() {
        let h = harness().await;
        let response = send(&h.router, get_request("/")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::X_FRAME_OPTIONS).map(|v| v.as_bytes()),
            Some(&b"DENY"[..])
        );
        let html = body_text(response).await;
        assert!(html.contains("enctype=\"multipart/form-data\""));
    }

    #[tokio::test]
    async fn jpeg_upload_records_exact_size() {
        let h = harness().await;
        let data = vec![0xFF_u8; 4096];
        let response = send(
            &h.router,
            multipart_request(&[file_part("photo.jpg", "image/jpeg", &data)]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(body_text(response).await.contains("File uploaded successfully!"));

        let record = h
            .records
            .find_by_original_name("photo.jpg")
            .await
            .expect("record created");
        assert_eq!(record.size_bytes, data.len() as u64);
        assert_eq!(record.mime_type, "image/jpeg");
        assert_eq!(record.uploader.as_deref(), Some("Anonymous"));
    }

    #[tokio::test]
    async fn uploader_field_is_recorded() {
        let h = harness().await;
        let response = send(
            &h.router,
            multipart_request(&[
                Part {
                    name: "uploader",
                    file_name: None,
                    content_type: None,
                    data: b"  alice  ",
                },
                file_part("doc.pdf", "application/pdf", b"%PDF-1.4"),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let record = h
            .records
            .find_by_original_name("doc.pdf")
            .await
            .expect("record created");
        assert_eq!(record.uploader.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn oversized_uploader_is_rejected() {
        let h = harness().await;
        let uploader = vec![b'a'; 64 * 1024];
        let response = send(
            &h.router,
            multipart_request(&[
                Part {
                    name: "uploader",
                    file_name: None,
                    content_type: None,
                    data: &uploader,
                },
                file_part("doc.pdf", "application/pdf", b"%PDF-1.4"),
            ]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("uploader must be at most 256 bytes"));
        assert!(h.records.snapshot().await.is_empty());
        assert!(h.blobs.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn text_upload_is_rejected_without_side_effects() {
        let h = harness().await;
        let response = send(
            &h.router,
            multipart_request(&[file_part("notes.txt", "text/plain", b"hello")]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("Unsupported file type"));
        assert!(h.records.snapshot().await.is_empty());
        assert!(h.blobs.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn missing_content_type_falls_back_to_extension() {
        let h = harness().await;
        let response = send(
            &h.router,
            multipart_request(&[Part {
                name: "file",
                file_name: Some("shot.png"),
                content_type: None,
                data: b"png",
            }]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let record = h
            .records
            .find_by_original_name("shot.png")
            .await
            .expect("record created");
        assert_eq!(record.mime_type, "image/png");
    }

    #[tokio::test]
    async fn six_mebibyte_upload_is_too_large() {
        let h = harness().await;
        let data = vec![0_u8; 6 * 1024 * 1024];
        let response = send(
            &h.router,
            multipart_request(&[file_part("big.png", "image/png", &data)]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("File too large"));
        assert!(h.records.snapshot().await.is_empty());
        assert!(h.blobs.list().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn upload_without_file_is_rejected() {
        let h = harness().await;
        let response = send(
            &h.router,
            multipart_request(&[Part {
                name: "uploader",
                file_name: None,
                content_type: None,
                data: b"bob",
            }]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("No file uploaded."));
    }

    #[tokio::test]
    async fn round_trip_download_is_byte_identical() {
        let h = harness().await;
        let data: Vec<u8> = (0..=255_u8).cycle().take(10_000).collect();
        let response = send(
            &h.router,
            multipart_request(&[file_part("scan.pdf", "application/pdf", &data)]),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = send(&h.router, get_request("/download?originalname=scan.pdf")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers().clone();
        assert_eq!(
            headers.get(header::CONTENT_LENGTH).map(|v| v.as_bytes()),
            Some(data.len().to_string().as_bytes())
        );
        assert_eq!(
            headers.get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"application/pdf"[..])
        );
        let disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .expect("content disposition");
        assert!(disposition.starts_with("attachment; filename=\"scan.pdf\""));
        assert_eq!(body_bytes(response).await, data);
    }

    #[tokio::test]
    async fn delete_removes_blob_and_record() {
        let h = harness().await;
        send(
            &h.router,
            multipart_request(&[file_part("gone.png", "image/png", b"bytes")]),
        )
        .await;
        let storage_name = h
            .records
            .find_by_original_name("gone.png")
            .await
            .expect("record created")
            .storage_name;

        let response = send(&h.router, get_request("/delete?originalname=gone.png")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("File deleted successfully."));
        assert!(!h.blobs.exists(&storage_name).await.expect("exists"));

        let response = send(&h.router, get_request("/download?originalname=gone.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("File not found"));
    }

    #[tokio::test]
    async fn failed_blob_removal_leaves_reported_orphan() {
        let h = harness().await;
        send(
            &h.router,
            multipart_request(&[file_part("stuck.png", "image/png", b"stuck")]),
        )
        .await;
        let storage_name = h
            .records
            .find_by_original_name("stuck.png")
            .await
            .expect("record created")
            .storage_name;
        h.blobs.fail_deletes();

        let response = send(&h.router, get_request("/delete?originalname=stuck.png")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("File storage error."));
        assert!(h.records.find_by_original_name("stuck.png").await.is_none());
        assert!(h.blobs.exists(&storage_name).await.expect("exists"));

        let report = audit_orphans(&h.blobs, &h.records, Duration::ZERO)
            .await
            .expect("audit");
        assert_eq!(report.orphan_blobs, vec![storage_name]);
        assert!(report.dangling_records.is_empty());
    }

    #[tokio::test]
    async fn unknown_name_is_not_found_without_side_effects() {
        let h = harness().await;
        send(
            &h.router,
            multipart_request(&[file_part("keep.png", "image/png", b"keep")]),
        )
        .await;

        let response = send(&h.router, get_request("/download?originalname=nope.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&h.router, get_request("/delete?originalname=nope.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        assert_eq!(h.records.snapshot().await.len(), 1);
        assert_eq!(h.blobs.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn delete_without_parameter_is_bad_request() {
        let h = harness().await;
        let response = send(&h.router, get_request("/delete")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_text(response).await.contains("originalname is required"));
    }

    #[tokio::test]
    async fn missing_blob_is_reported_as_not_found() {
        let h = harness().await;
        send(
            &h.router,
            multipart_request(&[file_part("lost.png", "image/png", b"lost")]),
        )
        .await;
        let record = h
            .records
            .find_by_original_name("lost.png")
            .await
            .expect("record created");
        h.blobs
            .delete(&record.storage_name)
            .await
            .expect("remove blob behind the record");

        let response = send(&h.router, get_request("/download?originalname=lost.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("File not found on the server"));

        let response = send(&h.router, get_request("/delete?originalname=lost.png")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(h.records.find_by_original_name("lost.png").await.is_some());
    }

    #[tokio::test]
    async fn duplicate_names_coexist_and_resolve_to_oldest() {
        let h = harness().await;
        for data in [&b"first"[..], &b"second"[..]] {
            let response = send(
                &h.router,
                multipart_request(&[file_part("same.png", "image/png", data)]),
            )
            .await;
            assert_eq!(response.status(), StatusCode::CREATED);
        }

        let snapshot = h.records.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_ne!(snapshot[0].storage_name, snapshot[1].storage_name);

        for _ in 0..2 {
            let response = send(&h.router, get_request("/download?originalname=same.png")).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_bytes(response).await, b"first");
        }
    }

    #[tokio::test]
    async fn url_encoded_name_is_looked_up_decoded() {
        let h = harness().await;
        send(
            &h.router,
            multipart_request(&[file_part("my photo.jpg", "image/jpeg", b"jpeg")]),
        )
        .await;
        let response = send(
            &h.router,
            get_request("/download?originalname=my%20photo.jpg"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"jpeg");
    }
}
