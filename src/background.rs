//! Periodic audit that reports blobs and records which lost their counterpart.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

use crate::config::ORPHAN_GRACE_SECS;
use crate::records::RecordStore;
use crate::storage::{BlobStore, StorageError};

#[derive(Debug, Default, PartialEq, Eq)]
pub struct OrphanReport {
    /// Blobs without a record.
    pub orphan_blobs: Vec<String>,
    /// Records whose blob is missing.
    pub dangling_records: Vec<String>,
}

/// Compares the blob directory with the record collection. Nothing is deleted.
///
/// Blobs younger than `grace` are skipped so uploads that have not yet written
/// their record are not reported.
pub async fn audit_orphans(
    blobs: &BlobStore,
    records: &RecordStore,
    grace: Duration,
) -> Result<OrphanReport, StorageError> {
    let stored = blobs.list().await?;
    let known = records.snapshot().await;
    let now = SystemTime::now();

    let stored_names: HashSet<&str> = stored
        .iter()
        .map(|entry| entry.storage_name.as_str())
        .collect();
    let recorded_names: HashSet<&str> = known
        .iter()
        .map(|record| record.storage_name.as_str())
        .collect();

    let mut report = OrphanReport::default();
    for entry in &stored {
        if recorded_names.contains(entry.storage_name.as_str()) {
            continue;
        }
        let settled = entry
            .modified
            .and_then(|modified| now.duration_since(modified).ok())
            .is_none_or(|age| age >= grace);
        if settled {
            warn!(
                storage_name = entry.storage_name,
                "lost resource: blob has no record"
            );
            report.orphan_blobs.push(entry.storage_name.clone());
        }
    }
    for record in &known {
        if !stored_names.contains(record.storage_name.as_str()) {
            warn!(
                storage_name = record.storage_name,
                original_name = record.original_name,
                "lost resource: record has no blob"
            );
            report.dangling_records.push(record.storage_name.clone());
        }
    }

    debug!(
        orphan_blobs = report.orphan_blobs.len(),
        dangling_records = report.dangling_records.len(),
        "orphan audit finished"
    );
    Ok(report)
}

/// Starts the orphan audit loop; an interval of zero disables it.
pub fn spawn_background_tasks(
    blobs: Arc<BlobStore>,
    records: Arc<RecordStore>,
    audit_interval: Duration,
) {
    if audit_interval.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(audit_interval);
        loop {
            interval.tick().await;
            if let Err(err) = audit_orphans(
                &blobs,
                &records,
                Duration::from_secs(ORPHAN_GRACE_SECS),
            )
            .await
            {
                warn!(error = %err, "orphan audit failed");
            }
        }
    });
}
