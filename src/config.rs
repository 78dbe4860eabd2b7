//! Configuration surface.
//!
//! Every option is a CLI flag with an environment-variable fallback, so the
//! binary drops into CI pipelines without wrapper scripts.

use crate::classify::{FilePolicy, ObjectRule};
use crate::types::AccessTier;
use anyhow::{Context, Result};
use clap::Parser;
use glob::Pattern;
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "sitesync", version, about = "Incremental directory-to-bucket sync")]
pub struct Cli {
    /// Local directory tree to synchronize
    #[arg(long, env = "FOLDER")]
    pub folder: PathBuf,

    /// Destination bucket
    #[arg(long, env = "BUCKET")]
    pub bucket: String,

    /// Default access tier: public or private
    #[arg(long, env = "ACL", default_value = "public")]
    pub acl: String,

    #[arg(long, env = "DEFAULT_CACHE_CONTROL", default_value = "max-age=2592000")]
    pub default_cache_control: String,

    #[arg(long, env = "HTML_CACHE_CONTROL", default_value = "max-age=600")]
    pub html_cache_control: String,

    #[arg(long, env = "IMAGE_CACHE_CONTROL", default_value = "max-age=864000")]
    pub image_cache_control: String,

    #[arg(long, env = "PDF_CACHE_CONTROL", default_value = "max-age=2592000")]
    pub pdf_cache_control: String,

    /// Exclusion globs, newline-separated when set via the environment
    #[arg(long, env = "EXCLUDE", value_delimiter = '\n')]
    pub exclude: Vec<String>,

    /// JSON array of override rules:
    /// [{"pattern": "docs/*", "acl": "private", "cache_control": "no-store"}]
    #[arg(long, env = "OBJECT_RULES")]
    pub object_rules: Option<String>,

    /// Upload HTML files without their .html suffix
    #[arg(long, env = "REMOVE_HTML_EXTENSION")]
    pub remove_html_extension: bool,

    /// Also upload each page.html as page/index.html
    #[arg(long, env = "DUPLICATE_HTML_WITH_NO_EXTENSION")]
    pub duplicate_html_with_no_extension: bool,

    /// Concurrent directory listings
    #[arg(long, env = "LIST_CONCURRENCY", default_value_t = 20)]
    pub list_concurrency: usize,

    /// Concurrent uploads
    #[arg(long, env = "UPLOAD_CONCURRENCY", default_value_t = 30)]
    pub upload_concurrency: usize,

    /// Concurrent delete batches
    #[arg(long, env = "DELETE_CONCURRENCY", default_value_t = 10)]
    pub delete_concurrency: usize,
}

/// Concurrency ceilings. The three pools bound independent resources
/// (filesystem listings, upload fan-out, delete batches) and stay
/// independently tunable.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub list_concurrency: usize,
    pub upload_concurrency: usize,
    pub delete_concurrency: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            list_concurrency: 20,
            upload_concurrency: 30,
            delete_concurrency: 10,
        }
    }
}

/// Fully parsed per-run configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub root: PathBuf,
    pub bucket: String,
    pub policy: FilePolicy,
    pub limits: Limits,
}

/// Wire shape of one override rule. Empty strings mean "keep the default".
#[derive(Debug, Deserialize)]
struct RuleSpec {
    pattern: String,
    #[serde(default)]
    acl: String,
    #[serde(default, alias = "cache-control")]
    cache_control: String,
}

impl Cli {
    /// Compile globs and rules into a [`SyncConfig`]. Any failure here is
    /// fatal: the run aborts before touching the filesystem or the bucket.
    pub fn into_config(self) -> Result<SyncConfig> {
        let exclude = self
            .exclude
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| Pattern::new(s).with_context(|| format!("invalid exclude glob {s:?}")))
            .collect::<Result<Vec<_>>>()?;

        let rules = match self.object_rules.as_deref() {
            Some(json) if !json.trim().is_empty() => parse_rules(json)?,
            _ => Vec::new(),
        };

        let policy = FilePolicy {
            default_access: AccessTier::parse(&self.acl),
            default_cache_control: self.default_cache_control,
            html_cache_control: self.html_cache_control,
            image_cache_control: self.image_cache_control,
            pdf_cache_control: self.pdf_cache_control,
            exclude,
            rules,
            strip_html_extension: self.remove_html_extension,
            duplicate_html_without_extension: self.duplicate_html_with_no_extension,
        };

        Ok(SyncConfig {
            root: self.folder,
            bucket: self.bucket,
            policy,
            limits: Limits {
                list_concurrency: self.list_concurrency,
                upload_concurrency: self.upload_concurrency,
                delete_concurrency: self.delete_concurrency,
            },
        })
    }
}

fn parse_rules(json: &str) -> Result<Vec<ObjectRule>> {
    let specs: Vec<RuleSpec> =
        serde_json::from_str(json).context("failed to parse object rules JSON")?;

    specs
        .into_iter()
        .map(|spec| {
            let pattern = Pattern::new(&spec.pattern)
                .with_context(|| format!("invalid rule glob {:?}", spec.pattern))?;
            Ok(ObjectRule {
                pattern,
                access: if spec.acl.is_empty() {
                    None
                } else {
                    Some(AccessTier::parse(&spec.acl))
                },
                cache_control: if spec.cache_control.is_empty() {
                    None
                } else {
                    Some(spec.cache_control)
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli::parse_from(["sitesync", "--folder", "/site", "--bucket", "my-bucket"])
    }

    #[test]
    fn test_defaults() {
        let config = base_cli().into_config().unwrap();
        assert_eq!(config.root, PathBuf::from("/site"));
        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.policy.default_access, AccessTier::Public);
        assert_eq!(config.policy.default_cache_control, "max-age=2592000");
        assert_eq!(config.policy.html_cache_control, "max-age=600");
        assert!(!config.policy.strip_html_extension);
        assert_eq!(config.limits.list_concurrency, 20);
        assert_eq!(config.limits.upload_concurrency, 30);
        assert_eq!(config.limits.delete_concurrency, 10);
    }

    #[test]
    fn test_parse_rules() {
        let mut cli = base_cli();
        cli.object_rules = Some(
            r#"[
                {"pattern": "secret/*", "acl": "private", "cache_control": "no-store"},
                {"pattern": "assets/*", "cache_control": "max-age=31536000"}
            ]"#
            .to_string(),
        );

        let config = cli.into_config().unwrap();
        assert_eq!(config.policy.rules.len(), 2);
        assert_eq!(config.policy.rules[0].access, Some(AccessTier::Private));
        assert_eq!(
            config.policy.rules[0].cache_control.as_deref(),
            Some("no-store")
        );
        // Missing acl field leaves the default untouched
        assert_eq!(config.policy.rules[1].access, None);
    }

    #[test]
    fn test_invalid_rules_json_is_fatal() {
        let mut cli = base_cli();
        cli.object_rules = Some("not json".to_string());
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_invalid_exclude_glob_is_fatal() {
        let mut cli = base_cli();
        cli.exclude = vec!["[invalid".to_string()];
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn test_exclude_blank_lines_dropped() {
        let mut cli = base_cli();
        cli.exclude = vec!["*.tmp".to_string(), "  ".to_string(), String::new()];
        let config = cli.into_config().unwrap();
        assert_eq!(config.policy.exclude.len(), 1);
    }
}
