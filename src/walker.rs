//! Parallel tree walker.
//!
//! Recursively fans out one task per subdirectory, bounded by a shared
//! semaphore that caps concurrent directory listings. Every task owns a
//! clone of the output channel's sender, so the stream closes exactly when
//! the last subtree has been fully processed. Emission order is unspecified.

use crate::classify::Classifier;
use crate::manifest::MANIFEST_KEY;
use crate::types::FileRecord;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};
use xxhash_rust::xxh3::Xxh3;

/// Channel size for walker -> pipeline records.
const WALKER_CHANNEL_SIZE: usize = 1024;

/// Read chunk size for content hashing.
const HASH_BUF_SIZE: usize = 64 * 1024;

struct WalkContext {
    root: PathBuf,
    classifier: Classifier,
    list_permits: Semaphore,
}

/// Walk `root`, emitting a [`FileRecord`] per discovered (non-excluded)
/// regular file. `list_concurrency` caps concurrent directory listings,
/// independently of any upload ceiling.
pub fn walk(root: PathBuf, classifier: Classifier, list_concurrency: usize) -> mpsc::Receiver<FileRecord> {
    let (tx, rx) = mpsc::channel(WALKER_CHANNEL_SIZE);
    let ctx = Arc::new(WalkContext {
        root: root.clone(),
        classifier,
        list_permits: Semaphore::new(list_concurrency),
    });
    tokio::spawn(walk_dir(ctx, root, tx));
    rx
}

/// One directory's traversal task. Subdirectories are handed to fresh tasks;
/// files are processed inline. Boxed because the future recurses.
fn walk_dir(
    ctx: Arc<WalkContext>,
    dir: PathBuf,
    tx: mpsc::Sender<FileRecord>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let entries = read_entries(&ctx, &dir).await;

        for (path, is_dir) in entries {
            let candidate = path.to_string_lossy().to_string();
            if ctx.classifier.is_excluded(&candidate) {
                debug!("excluded {candidate}");
                continue;
            }

            if is_dir {
                tokio::spawn(walk_dir(ctx.clone(), path, tx.clone()));
            } else {
                process_file(&ctx, path, &tx).await;
            }
        }
    })
}

/// List a directory while holding a listing permit. Read failures are
/// non-fatal: the subtree is treated as empty and the run continues.
async fn read_entries(ctx: &WalkContext, dir: &Path) -> Vec<(PathBuf, bool)> {
    let _permit = ctx
        .list_permits
        .acquire()
        .await
        .expect("listing semaphore closed");

    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(err) => {
            warn!("failed to read directory {}: {err}", dir.display());
            return Vec::new();
        }
    };

    let mut entries = Vec::new();
    loop {
        match reader.next_entry().await {
            Ok(Some(entry)) => match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() => entries.push((entry.path(), true)),
                Ok(file_type) if file_type.is_file() => entries.push((entry.path(), false)),
                // Symlinks and special files are not synced.
                Ok(_) => {}
                Err(err) => warn!("failed to stat {}: {err}", entry.path().display()),
            },
            Ok(None) => break,
            Err(err) => {
                warn!("failed to read directory {}: {err}", dir.display());
                break;
            }
        }
    }
    entries
}

async fn process_file(ctx: &WalkContext, path: PathBuf, tx: &mpsc::Sender<FileRecord>) {
    let key = destination_key(&ctx.root, &path);
    if key == MANIFEST_KEY {
        // The persisted manifest is never ordinary site content.
        return;
    }

    // A hash failure still emits the record: the empty fingerprint never
    // matches a prior one, so the file uploads as changed.
    let fingerprint = match hash_file(&path).await {
        Ok(digest) => digest,
        Err(err) => {
            debug!("failed to hash {}: {err}", path.display());
            String::new()
        }
    };

    let record = ctx.classifier.classify(&path, key, fingerprint);
    let (primary, duplicate) = ctx.classifier.plan_keys(record);

    if tx.send(primary).await.is_err() {
        return;
    }
    if let Some(duplicate) = duplicate {
        let _ = tx.send(duplicate).await;
    }
}

/// Root-relative, forward-slash destination key for a file.
fn destination_key(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// xxh3-128 digest of a file's content, hex-encoded.
async fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:032x}", hasher.digest128()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::FilePolicy;
    use glob::Pattern;
    use std::collections::HashMap;
    use std::fs;
    use tempfile::TempDir;

    async fn collect(root: PathBuf, policy: FilePolicy) -> HashMap<String, FileRecord> {
        let mut rx = walk(root, Classifier::new(policy), 4);
        let mut records = HashMap::new();
        while let Some(record) = rx.recv().await {
            records.insert(record.key.clone(), record);
        }
        records
    }

    #[tokio::test]
    async fn test_walk_nested_tree() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("index.html"), "<html>").unwrap();
        fs::create_dir_all(tmp.path().join("assets/img")).unwrap();
        fs::write(tmp.path().join("assets/app.css"), "body{}").unwrap();
        fs::write(tmp.path().join("assets/img/logo.png"), "png").unwrap();

        let records = collect(tmp.path().to_path_buf(), FilePolicy::default()).await;

        let mut keys: Vec<_> = records.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["assets/app.css", "assets/img/logo.png", "index.html"]);

        // Keys are root-relative, never absolute
        for key in records.keys() {
            assert!(!key.starts_with('/'), "key {key} contains root prefix");
        }
    }

    #[tokio::test]
    async fn test_walk_hashes_content() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("a.txt"), "same content").unwrap();
        fs::write(tmp.path().join("b.txt"), "same content").unwrap();
        fs::write(tmp.path().join("c.txt"), "different").unwrap();

        let records = collect(tmp.path().to_path_buf(), FilePolicy::default()).await;

        let a = &records["a.txt"].fingerprint;
        let b = &records["b.txt"].fingerprint;
        let c = &records["c.txt"].fingerprint;
        assert!(!a.is_empty());
        assert_eq!(a, b);
        assert_ne!(a, c);
        // 128-bit digest, hex-encoded
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_walk_applies_exclusions() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("keep.html"), "x").unwrap();
        fs::write(tmp.path().join("skip.tmp"), "x").unwrap();
        fs::create_dir(tmp.path().join("node_modules")).unwrap();
        fs::write(tmp.path().join("node_modules/dep.js"), "x").unwrap();

        let policy = FilePolicy {
            exclude: vec![
                Pattern::new("*.tmp").unwrap(),
                Pattern::new("*/node_modules").unwrap(),
            ],
            ..FilePolicy::default()
        };
        let records = collect(tmp.path().to_path_buf(), policy).await;

        let keys: Vec<_> = records.keys().cloned().collect();
        assert_eq!(keys, vec!["keep.html"]);
    }

    #[tokio::test]
    async fn test_walk_skips_manifest_key() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".incremental"), "{}").unwrap();
        fs::write(tmp.path().join("page.html"), "x").unwrap();

        let records = collect(tmp.path().to_path_buf(), FilePolicy::default()).await;

        assert!(!records.contains_key(MANIFEST_KEY));
        assert!(records.contains_key("page.html"));
    }

    #[tokio::test]
    async fn test_walk_emits_duplicate_records() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("about.html"), "<html>").unwrap();

        let policy = FilePolicy {
            duplicate_html_without_extension: true,
            ..FilePolicy::default()
        };
        let records = collect(tmp.path().to_path_buf(), policy).await;

        assert!(records.contains_key("about.html"));
        assert!(records.contains_key("about/index.html"));
        assert_eq!(
            records["about.html"].fingerprint,
            records["about/index.html"].fingerprint
        );
    }

    #[tokio::test]
    async fn test_walk_missing_root_yields_empty_stream() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");

        let records = collect(missing, FilePolicy::default()).await;
        assert!(records.is_empty());
    }
}
