//! Incremental sync of a local directory tree to an object-storage bucket.
//!
//! One-shot batch job: walk the tree in parallel, diff against the manifest
//! persisted by the previous run, upload only changed files, delete remote
//! keys that no longer exist locally, persist the new manifest.

pub mod backend;
pub mod classify;
pub mod config;
pub mod content_type;
pub mod manifest;
pub mod pipeline;
pub mod types;
pub mod walker;

pub use backend::{Backend, BackendError, ObjectStoreBackend, PutRequest};
pub use classify::{Classifier, FilePolicy, ObjectRule};
pub use config::{Cli, Limits, SyncConfig};
pub use manifest::{Manifest, ManifestEntry, MANIFEST_KEY};
pub use pipeline::{run_sync, SyncSummary};
pub use types::{AccessTier, FileKind, FileRecord};
