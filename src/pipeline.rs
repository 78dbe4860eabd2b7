//! Synchronization pipeline.
//!
//! Consumes the walker's record stream, diffs it against the previous run's
//! manifest, uploads changed files under a bounded permit pool, batch-deletes
//! remote keys with no local counterpart, and persists the new manifest.
//! Per-file failures are logged and counted, never fatal.

use crate::backend::{Backend, BackendError, PutRequest};
use crate::classify::Classifier;
use crate::config::SyncConfig;
use crate::manifest::{Manifest, ManifestEntry, MANIFEST_KEY};
use crate::types::{AccessTier, FileRecord};
use crate::walker;
use anyhow::Result;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Backend bulk-delete limit (S3 DeleteObjects caps at 1000 keys).
const DELETE_BATCH: usize = 1000;

/// Run-scoped counters. Advisory only: they feed the run-end summary and
/// never affect control flow.
#[derive(Debug, Default)]
pub struct SyncStats {
    seen: AtomicU64,
    skipped: AtomicU64,
    uploaded: AtomicU64,
    errored: AtomicU64,
    deleted: AtomicU64,
}

impl SyncStats {
    pub fn snapshot(&self) -> SyncSummary {
        SyncSummary {
            seen: self.seen.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            uploaded: self.uploaded.load(Ordering::Relaxed),
            errored: self.errored.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
        }
    }
}

/// Final counts for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub seen: u64,
    pub skipped: u64,
    pub uploaded: u64,
    pub errored: u64,
    pub deleted: u64,
}

/// Run one full synchronization pass.
///
/// Returns `Ok` even when individual uploads or deletes failed; failures are
/// surfaced through logs and the summary counters. Callers treat only
/// pre-work errors (config, backend construction) as fatal.
pub async fn run_sync(config: SyncConfig, backend: Arc<dyn Backend>) -> Result<SyncSummary> {
    let stats = Arc::new(SyncStats::default());

    let old_manifest = Arc::new(load_manifest(&backend).await);

    // An empty manifest means no reliable prior state: every existing remote
    // object is presumptively stale, so empty the bucket before uploading.
    if old_manifest.is_empty() {
        wipe_bucket(&backend, config.limits.delete_concurrency, &stats).await;
    }

    let uploaded = upload_stage(&config, &backend, &old_manifest, &stats).await;

    // Keys the upload stage never claimed have no local counterpart.
    let stale = old_manifest.drain_keys();
    if !stale.is_empty() {
        info!("removing {} leftover remote objects", stale.len());
        delete_batches(&backend, stale, config.limits.delete_concurrency, &stats).await;
    }

    persist_manifest(&backend, &uploaded).await;

    let summary = stats.snapshot();
    info!(
        "sync complete: {} seen, {} skipped, {} uploaded, {} deleted, {} errors",
        summary.seen, summary.skipped, summary.uploaded, summary.deleted, summary.errored
    );
    Ok(summary)
}

/// Fetch and parse the persisted manifest. Any failure (missing object,
/// transport error, unparseable body) degrades to an empty manifest.
async fn load_manifest(backend: &Arc<dyn Backend>) -> Manifest {
    match backend.get(MANIFEST_KEY).await {
        Ok(bytes) => Manifest::load(&bytes),
        Err(BackendError::NotFound(_)) => {
            info!("no persisted manifest found, treating as first run");
            Manifest::new()
        }
        Err(err) => {
            warn!("failed to fetch manifest, uploading all files: {err}");
            Manifest::new()
        }
    }
}

/// Drain the walker stream, uploading records that the manifest does not
/// already account for. Returns the records that were uploaded or skipped;
/// those become the new manifest.
async fn upload_stage(
    config: &SyncConfig,
    backend: &Arc<dyn Backend>,
    old_manifest: &Arc<Manifest>,
    stats: &Arc<SyncStats>,
) -> Vec<FileRecord> {
    let uploaded: Arc<Mutex<Vec<FileRecord>>> = Arc::new(Mutex::new(Vec::new()));
    let upload_permits = Arc::new(Semaphore::new(config.limits.upload_concurrency));

    let mut rx = walker::walk(
        config.root.clone(),
        Classifier::new(config.policy.clone()),
        config.limits.list_concurrency,
    );

    let mut tasks = JoinSet::new();
    while let Some(record) = rx.recv().await {
        let backend = backend.clone();
        let old_manifest = old_manifest.clone();
        let stats = stats.clone();
        let uploaded = uploaded.clone();
        let upload_permits = upload_permits.clone();

        tasks.spawn(async move {
            process_record(record, &backend, &old_manifest, &stats, &uploaded, &upload_permits)
                .await;
        });
    }
    while tasks.join_next().await.is_some() {}

    Arc::try_unwrap(uploaded)
        .map(|m| m.into_inner().expect("uploaded lock poisoned"))
        .unwrap_or_default()
}

async fn process_record(
    record: FileRecord,
    backend: &Arc<dyn Backend>,
    old_manifest: &Manifest,
    stats: &SyncStats,
    uploaded: &Mutex<Vec<FileRecord>>,
    upload_permits: &Semaphore,
) {
    stats.seen.fetch_add(1, Ordering::Relaxed);

    // Claim the key so it cannot surface as a stale-deletion candidate.
    // The claim must happen whether or not the upload is skipped.
    if let Some(previous) = old_manifest.claim(&record.key) {
        if is_unchanged(&record, &previous) {
            info!("skipping upload of {}: content unchanged", record.key);
            uploaded
                .lock()
                .expect("uploaded lock poisoned")
                .push(record);
            stats.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }

    let _permit = upload_permits
        .acquire()
        .await
        .expect("upload semaphore closed");

    match put_record(backend, &record).await {
        Ok(()) => {
            info!("uploaded {}", record.key);
            uploaded
                .lock()
                .expect("uploaded lock poisoned")
                .push(record);
            stats.uploaded.fetch_add(1, Ordering::Relaxed);
        }
        Err(err) => {
            // The record stays out of the new manifest so the next run
            // retries it.
            error!("failed to upload {}: {err}", record.key);
            stats.errored.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Skip only when the previous run saw identical bytes and an identical
/// cache policy. An empty fingerprint (hash failure) never matches.
fn is_unchanged(record: &FileRecord, previous: &ManifestEntry) -> bool {
    !record.fingerprint.is_empty()
        && record.fingerprint == previous.fingerprint
        && record.cache_control == previous.cache_control
}

async fn put_record(backend: &Arc<dyn Backend>, record: &FileRecord) -> Result<(), BackendError> {
    let body = Bytes::from(tokio::fs::read(&record.source).await?);
    backend
        .put(PutRequest {
            key: record.key.clone(),
            body,
            content_type: record.content_type.clone(),
            cache_control: record.cache_control.clone(),
            access: record.access,
        })
        .await
}

/// Delete keys in bulk batches under a bounded permit pool. A failed batch
/// is logged and counted; the remaining batches still run.
async fn delete_batches(
    backend: &Arc<dyn Backend>,
    keys: Vec<String>,
    delete_concurrency: usize,
    stats: &Arc<SyncStats>,
) {
    let permits = Arc::new(Semaphore::new(delete_concurrency));
    let mut tasks = JoinSet::new();

    for batch in keys.chunks(DELETE_BATCH) {
        let batch = batch.to_vec();
        let backend = backend.clone();
        let permits = permits.clone();
        let stats = stats.clone();

        tasks.spawn(async move {
            let _permit = permits.acquire().await.expect("delete semaphore closed");
            match backend.delete_many(&batch).await {
                Ok(()) => {
                    stats
                        .deleted
                        .fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
                Err(BackendError::PartialDelete { failed, total }) => {
                    warn!("bulk delete left {failed} of {total} keys undeleted");
                    stats
                        .deleted
                        .fetch_add((total - failed) as u64, Ordering::Relaxed);
                    stats.errored.fetch_add(failed as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    warn!("bulk delete of {} keys failed: {err}", batch.len());
                    stats.errored.fetch_add(batch.len() as u64, Ordering::Relaxed);
                }
            }
        });
    }
    while tasks.join_next().await.is_some() {}
}

/// First-run cleanup: list and delete every existing object before any
/// upload, since an empty manifest gives no reconciliation signal.
async fn wipe_bucket(
    backend: &Arc<dyn Backend>,
    delete_concurrency: usize,
    stats: &Arc<SyncStats>,
) {
    info!("no prior manifest: emptying bucket before sync");
    match backend.list_all().await {
        Ok(keys) if keys.is_empty() => {}
        Ok(keys) => {
            info!("deleting {} existing objects", keys.len());
            delete_batches(backend, keys, delete_concurrency, stats).await;
        }
        Err(err) => warn!("bucket wipe listing failed: {err}"),
    }
}

/// Persist the new manifest, attempted even when earlier stages logged
/// errors. Its own failure only costs transfer efficiency next run.
async fn persist_manifest(backend: &Arc<dyn Backend>, records: &[FileRecord]) {
    let manifest = Manifest::from_records(records);
    let bytes = match manifest.save() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("failed to serialize manifest: {err}");
            return;
        }
    };

    let result = backend
        .put(PutRequest {
            key: MANIFEST_KEY.to_string(),
            body: Bytes::from(bytes),
            content_type: "application/json".to_string(),
            cache_control: "no-store".to_string(),
            access: AccessTier::Private,
        })
        .await;

    match result {
        Ok(()) => info!("persisted manifest with {} entries", manifest.len()),
        Err(err) => warn!("failed to persist manifest: {err}"),
    }
}
