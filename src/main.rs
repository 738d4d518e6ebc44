//! filebox server binary.
//!
//! Accepts JPEG, PNG and PDF uploads, stores the bytes on local disk and keeps
//! one metadata record per file in a JSON document collection. Files are
//! downloaded or deleted by their original filename.

mod atomic;
mod background;
mod config;
mod error;
mod files;
mod http;
mod logging;
mod page;
mod records;
mod routes;
mod storage;
mod upload;

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::info;

use crate::background::spawn_background_tasks;
use crate::config::{ALLOWED_MIME_TYPES, Args};
use crate::http::build_cors_layer;
use crate::records::RecordStore;
use crate::routes::build_router;
use crate::storage::BlobStore;
use crate::upload::UploadPolicy;

/// Starts the server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let blobs = Arc::new(BlobStore::new(PathBuf::from(&args.upload_dir)));
    blobs.ensure_root().await?;
    let records = Arc::new(
        RecordStore::open(PathBuf::from(&args.records_path))
            .await
            .map_err(|err| std::io::Error::other(err.to_string()))?,
    );
    let policy = Arc::new(UploadPolicy {
        max_size: args.max_upload_size,
        allowed_types: ALLOWED_MIME_TYPES,
    });
    info!(
        upload_dir = ?blobs.root_path(),
        records = ?records.path(),
        max_upload_size = policy.max_size,
        "storage ready"
    );

    let mut app = build_router(blobs.clone(), records.clone(), policy);
    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let listener = TcpListener::bind(addr).await?;
    info!("Starting HTTP server at {}", addr);

    spawn_background_tasks(
        blobs,
        records,
        Duration::from_secs(args.orphan_audit_secs),
    );
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
}
