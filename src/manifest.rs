//! Incremental manifest: the persisted record of destination-key ->
//! last-known {fingerprint, cache-control}, used to diff local state
//! against remote state across runs.
//!
//! Concurrency-safe for point lookups and removals from many upload tasks.
//! The lock is held only for map operations, never across I/O.

use crate::types::FileRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::warn;

/// Reserved key the serialized manifest is persisted under. Written with a
/// private tier after the sync completes; never treated as site content.
pub const MANIFEST_KEY: &str = ".incremental";

/// Last known remote state of one destination key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub fingerprint: String,
    pub cache_control: String,
}

/// Destination-key -> [`ManifestEntry`] mapping behind a reader/writer lock.
#[derive(Debug, Default)]
pub struct Manifest {
    entries: RwLock<HashMap<String, ManifestEntry>>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deserialize a persisted manifest. A parse failure means there is no
    /// reliable prior state, so it yields an empty manifest (first-run
    /// semantics) rather than failing the run.
    pub fn load(bytes: &[u8]) -> Self {
        match serde_json::from_slice::<HashMap<String, ManifestEntry>>(bytes) {
            Ok(entries) => Self {
                entries: RwLock::new(entries),
            },
            Err(err) => {
                warn!("failed to parse persisted manifest, treating as first run: {err}");
                Self::new()
            }
        }
    }

    /// Build a fresh manifest from the records that were actually uploaded
    /// or confirmed skipped this run, keyed by their final destination keys.
    pub fn from_records(records: &[FileRecord]) -> Self {
        let entries = records
            .iter()
            .map(|r| {
                (
                    r.key.clone(),
                    ManifestEntry {
                        fingerprint: r.fingerprint.clone(),
                        cache_control: r.cache_control.clone(),
                    },
                )
            })
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Look up and remove a key in one atomic step.
    ///
    /// Returning `Some` marks the key as accounted for: whatever survives in
    /// the manifest after every record has claimed its key is exactly the set
    /// of remote keys with no corresponding local file.
    pub fn claim(&self, key: &str) -> Option<ManifestEntry> {
        self.entries.write().expect("manifest lock poisoned").remove(key)
    }

    pub fn insert(&self, key: String, entry: ManifestEntry) {
        self.entries
            .write()
            .expect("manifest lock poisoned")
            .insert(key, entry);
    }

    pub fn get(&self, key: &str) -> Option<ManifestEntry> {
        self.entries
            .read()
            .expect("manifest lock poisoned")
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("manifest lock poisoned").len()
    }

    /// A manifest of size zero is the first-run signal: there is no prior
    /// state to reconcile against.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every remaining key, leaving the manifest empty. Called once
    /// after reconciliation to collect stale-deletion candidates.
    pub fn drain_keys(&self) -> Vec<String> {
        self.entries
            .write()
            .expect("manifest lock poisoned")
            .drain()
            .map(|(key, _)| key)
            .collect()
    }

    /// Serialize for persistence.
    pub fn save(&self) -> anyhow::Result<Vec<u8>> {
        let entries = self.entries.read().expect("manifest lock poisoned");
        Ok(serde_json::to_vec(&*entries)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccessTier, FileKind};
    use std::path::PathBuf;

    fn record(key: &str, fingerprint: &str, cache_control: &str) -> FileRecord {
        FileRecord {
            source: PathBuf::from(format!("/site/{}", key)),
            key: key.to_string(),
            access: AccessTier::Public,
            cache_control: cache_control.to_string(),
            content_type: "text/html".to_string(),
            fingerprint: fingerprint.to_string(),
            kind: FileKind::Html,
        }
    }

    #[test]
    fn test_load_roundtrip() {
        let manifest = Manifest::from_records(&[
            record("a.html", "f1", "max-age=600"),
            record("b.html", "f2", "max-age=600"),
        ]);

        let bytes = manifest.save().unwrap();
        let restored = Manifest::load(&bytes);

        assert_eq!(restored.len(), 2);
        assert_eq!(
            restored.get("a.html"),
            Some(ManifestEntry {
                fingerprint: "f1".to_string(),
                cache_control: "max-age=600".to_string(),
            })
        );
    }

    #[test]
    fn test_load_garbage_is_empty() {
        let manifest = Manifest::load(b"not json at all");
        assert!(manifest.is_empty());

        let manifest = Manifest::load(b"");
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_claim_removes() {
        let manifest = Manifest::from_records(&[record("a.html", "f1", "max-age=600")]);

        let entry = manifest.claim("a.html").unwrap();
        assert_eq!(entry.fingerprint, "f1");

        // Second claim finds nothing: the key is accounted for.
        assert!(manifest.claim("a.html").is_none());
        assert!(manifest.is_empty());
    }

    #[test]
    fn test_claim_unknown_key() {
        let manifest = Manifest::new();
        assert!(manifest.claim("missing.html").is_none());
    }

    #[test]
    fn test_drain_keys() {
        let manifest = Manifest::from_records(&[
            record("stale1.js", "f1", "max-age=600"),
            record("stale2.js", "f2", "max-age=600"),
        ]);

        let mut keys = manifest.drain_keys();
        keys.sort();
        assert_eq!(keys, vec!["stale1.js", "stale2.js"]);
        assert!(manifest.is_empty());
    }
}
