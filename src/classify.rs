//! Classifier / rule engine.
//!
//! Pure mapping from a file path to its routing metadata: content type,
//! cache-control, access tier, destination key, and any extension-stripping
//! or HTML-duplication the policy asks for. No state, no I/O.

use crate::content_type;
use crate::types::{AccessTier, FileKind, FileRecord};
use glob::Pattern;
use std::path::Path;

/// Extensions treated as images (image cache-control, detected content type).
const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "webp", "gif", "bmp", "tiff", "ico", "svg",
];

/// One override rule, matched against the root-relative destination key.
/// Empty (None) fields leave the classifier defaults untouched.
#[derive(Debug, Clone)]
pub struct ObjectRule {
    pub pattern: Pattern,
    pub access: Option<AccessTier>,
    pub cache_control: Option<String>,
}

/// Run-wide classification policy: defaults, override rules, exclusions,
/// and destination-key transforms.
#[derive(Debug, Clone)]
pub struct FilePolicy {
    pub default_access: AccessTier,
    pub default_cache_control: String,
    pub html_cache_control: String,
    pub image_cache_control: String,
    pub pdf_cache_control: String,
    pub exclude: Vec<Pattern>,
    pub rules: Vec<ObjectRule>,
    pub strip_html_extension: bool,
    pub duplicate_html_without_extension: bool,
}

impl Default for FilePolicy {
    fn default() -> Self {
        Self {
            default_access: AccessTier::Public,
            default_cache_control: "max-age=2592000".to_string(),
            html_cache_control: "max-age=600".to_string(),
            image_cache_control: "max-age=864000".to_string(),
            pdf_cache_control: "max-age=2592000".to_string(),
            exclude: Vec::new(),
            rules: Vec::new(),
            strip_html_extension: false,
            duplicate_html_without_extension: false,
        }
    }
}

/// Classifier built once per run from a [`FilePolicy`].
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: FilePolicy,
}

impl Classifier {
    pub fn new(policy: FilePolicy) -> Self {
        Self { policy }
    }

    /// Whether any exclusion glob matches the candidate path.
    /// Excluded files are never hashed and never emitted.
    pub fn is_excluded(&self, candidate: &str) -> bool {
        self.policy.exclude.iter().any(|p| p.matches(candidate))
    }

    /// Build the record for one regular file.
    ///
    /// `key` is the root-relative, forward-slash destination key. The
    /// fingerprint is computed by the caller (empty when hashing failed).
    pub fn classify(&self, source: &Path, key: String, fingerprint: String) -> FileRecord {
        let kind = sniff_kind(&key);

        let (content_type, cache_control) = match kind {
            FileKind::Html => ("text/html", self.policy.html_cache_control.clone()),
            FileKind::Pdf => ("application/pdf", self.policy.pdf_cache_control.clone()),
            FileKind::Image => (
                content_type::detect(source),
                self.policy.image_cache_control.clone(),
            ),
            FileKind::Other => (
                content_type::detect(source),
                self.policy.default_cache_control.clone(),
            ),
        };

        let mut record = FileRecord {
            source: source.to_path_buf(),
            key,
            access: self.policy.default_access,
            cache_control,
            content_type: content_type.to_string(),
            fingerprint,
            kind,
        };

        self.apply_rules(&mut record);
        record
    }

    /// Apply the first matching override rule. First match wins; later rules
    /// are never consulted. None fields are no-ops.
    fn apply_rules(&self, record: &mut FileRecord) {
        for rule in &self.policy.rules {
            if rule.pattern.matches(&record.key) {
                if let Some(access) = rule.access {
                    record.access = access;
                }
                if let Some(cache_control) = &rule.cache_control {
                    record.cache_control = cache_control.clone();
                }
                return;
            }
        }
    }

    /// Apply the destination-key transforms and return the record(s) to emit.
    ///
    /// With stripping enabled, an HTML key loses its `.html` suffix. With
    /// duplication enabled, a non-`index.html` HTML file gets a second record
    /// at `<key minus .html>/index.html` sharing source and fingerprint.
    /// Duplication is suppressed whenever stripping is active; the two
    /// policies interact here and nowhere else.
    pub fn plan_keys(&self, mut record: FileRecord) -> (FileRecord, Option<FileRecord>) {
        if record.kind != FileKind::Html {
            return (record, None);
        }

        if self.policy.strip_html_extension {
            if let Some(stripped) = record.key.strip_suffix(".html") {
                record.key = stripped.to_string();
            }
            return (record, None);
        }

        if self.policy.duplicate_html_without_extension && !is_index_html(&record.key) {
            if let Some(base) = record.key.strip_suffix(".html") {
                let mut duplicate = record.clone();
                duplicate.key = format!("{}/index.html", base);
                return (record, Some(duplicate));
            }
        }

        (record, None)
    }
}

fn is_index_html(key: &str) -> bool {
    key.rsplit('/').next() == Some("index.html")
}

fn sniff_kind(key: &str) -> FileKind {
    let ext = match Path::new(key).extension().and_then(|e| e.to_str()) {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return FileKind::Other,
    };

    match ext.as_str() {
        "html" => FileKind::Html,
        "pdf" => FileKind::Pdf,
        _ if IMAGE_EXTENSIONS.contains(&ext.as_str()) => FileKind::Image,
        _ => FileKind::Other,
    }
}
