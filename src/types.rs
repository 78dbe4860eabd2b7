//! Core record types shared across the walker, classifier, and pipeline.

use std::path::PathBuf;

/// Object visibility applied at upload time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessTier {
    Public,
    Private,
}

impl AccessTier {
    /// Parse an access tier the way the config surface does: "private"
    /// (case-insensitive) is private, anything else is public.
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("private") {
            AccessTier::Private
        } else {
            AccessTier::Public
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessTier::Public => "public",
            AccessTier::Private => "private",
        }
    }
}

impl std::str::FromStr for AccessTier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(AccessTier::parse(s))
    }
}

impl std::fmt::Display for AccessTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File category, determined by extension sniffing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Html,
    Image,
    Pdf,
    Other,
}

/// One discovered local file destined for the store.
///
/// Immutable once emitted by the walker. The classifier may emit a second
/// record per HTML file (duplicate-without-extension policy) sharing the
/// source path and fingerprint but carrying a distinct destination key.
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Filesystem path to read the body from.
    pub source: PathBuf,

    /// Destination key, forward-slash normalized, relative to the sync root.
    /// Never contains the root prefix.
    pub key: String,

    /// Visibility applied when the object is put.
    pub access: AccessTier,

    /// Cache-Control header value.
    pub cache_control: String,

    /// Content-Type header value.
    pub content_type: String,

    /// Hex-encoded 128-bit content digest; empty when hashing failed.
    /// An empty fingerprint never matches a manifest entry, so the file
    /// is always treated as changed.
    pub fingerprint: String,

    /// Category from extension sniffing.
    pub kind: FileKind,
}
