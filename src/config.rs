//! Run configuration.
//!
//! Handles loading, validating, and merging `frontdex.toml`. Stock defaults are
//! overridden by an optional `frontdex.toml` in the content root; the file is
//! sparse and only needs the keys it changes.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! collections = ["events", "news", "posts"]  # Subdirectories indexed into <name>.json
//! category_collection = "posts"              # Also gets <name>-categories.json
//!
//! [scan]
//! image_fields = ["coverImage", "image", "thumbnail", "hero", "banner", "featuredImage"]
//! pattern = "**/*.md"                        # Which files count as content
//!
//! [upload]
//! api_base = "https://api.cloudflare.com/client/v4"
//! timeout_secs = 60                          # Per upload attempt
//! ```
//!
//! Unknown keys are rejected to catch typos early.
//!
//! ## Credentials
//!
//! Cloudflare credentials never live in the config file. They are read from
//! `CLOUDFLARE_ACCOUNT_ID` and `CLOUDFLARE_API_TOKEN`, which may come from a
//! `.env` file. They are only required when images are uploaded.

use crate::references::DEFAULT_IMAGE_FIELDS;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Name of the config file looked up in the content root.
pub const CONFIG_FILENAME: &str = "frontdex.toml";

pub const ACCOUNT_ID_VAR: &str = "CLOUDFLARE_ACCOUNT_ID";
pub const API_TOKEN_VAR: &str = "CLOUDFLARE_API_TOKEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
    #[error("Missing Cloudflare credentials: set {}", .0.join(" and "))]
    MissingCredentials(Vec<&'static str>),
}

/// Configuration loaded from `frontdex.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Content subdirectories to index, in output order.
    pub collections: Vec<String>,
    /// Collection that also gets a category histogram.
    pub category_collection: String,
    /// Reference scanning and file discovery.
    pub scan: ScanConfig,
    /// Image hosting.
    pub upload: UploadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collections: ["events", "news", "posts"]
                .into_iter()
                .map(String::from)
                .collect(),
            category_collection: "posts".to_string(),
            scan: ScanConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Config {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collections.is_empty() {
            return Err(ConfigError::Validation(
                "collections must not be empty".into(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.collections {
            if name.trim().is_empty() || name.contains(['/', '\\']) {
                return Err(ConfigError::Validation(format!(
                    "collection name '{name}' must be a plain directory name"
                )));
            }
            if !seen.insert(name) {
                return Err(ConfigError::Validation(format!(
                    "collection '{name}' is listed twice"
                )));
            }
        }
        if !self.collections.contains(&self.category_collection) {
            return Err(ConfigError::Validation(format!(
                "category_collection '{}' is not one of collections",
                self.category_collection
            )));
        }
        if self.scan.image_fields.is_empty() {
            return Err(ConfigError::Validation(
                "scan.image_fields must not be empty".into(),
            ));
        }
        for field in &self.scan.image_fields {
            if field.trim().is_empty() || field.contains(|c: char| c == ':' || c.is_whitespace()) {
                return Err(ConfigError::Validation(format!(
                    "scan.image_fields entry '{field}' must be a bare field name"
                )));
            }
        }
        if self.upload.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "upload.timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// Reference scanning and discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanConfig {
    /// Front-matter fields whose values are image paths (case-insensitive).
    pub image_fields: Vec<String>,
    /// Glob matched against file paths relative to the directory being walked.
    pub pattern: String,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            image_fields: DEFAULT_IMAGE_FIELDS.iter().map(|s| s.to_string()).collect(),
            pattern: crate::discover::DEFAULT_PATTERN.to_string(),
        }
    }
}

/// Cloudflare Images settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// API root; the account and `images/v1` path are appended.
    pub api_base: String,
    /// Give up on a single upload after this many seconds.
    pub timeout_secs: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.cloudflare.com/client/v4".to_string(),
            timeout_secs: 60,
        }
    }
}

impl UploadConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Cloudflare account credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub account_id: String,
    pub api_token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    /// Read credentials from the process environment (after loading `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read credentials through `lookup`; empty values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let read = |name| lookup(name).filter(|v| !v.trim().is_empty());
        let account_id = read(ACCOUNT_ID_VAR);
        let api_token = read(API_TOKEN_VAR);
        match (account_id, api_token) {
            (Some(account_id), Some(api_token)) => Ok(Self {
                account_id,
                api_token,
            }),
            (account_id, api_token) => {
                let mut missing = Vec::new();
                if account_id.is_none() {
                    missing.push(ACCOUNT_ID_VAR);
                }
                if api_token.is_none() {
                    missing.push(API_TOKEN_VAR);
                }
                Err(ConfigError::MissingCredentials(missing))
            }
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Config::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely, so an
///   overlay `collections` list replaces the default list.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `frontdex.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Config, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: Config = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config for a content root: stock defaults plus `frontdex.toml`.
pub fn load_config(root: &Path) -> Result<Config, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(root)?)
}

/// Returns a fully-commented stock `frontdex.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# frontdex configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.
#
# Place this file in the content root as frontdex.toml.

# Content subdirectories to index. Each produces <name>.json in the
# content root, even when it holds no files.
collections = ["events", "news", "posts"]

# The collection whose `category` arrays are tallied into
# <name>-categories.json. Must be one of `collections`.
category_collection = "posts"

# ---------------------------------------------------------------------------
# Scanning
# ---------------------------------------------------------------------------
[scan]
# Front-matter fields holding image paths (matched case-insensitively).
image_fields = ["coverImage", "image", "thumbnail", "hero", "banner", "featuredImage"]

# Which files are content, as a glob relative to the directory walked.
pattern = "**/*.md"

# ---------------------------------------------------------------------------
# Image hosting (Cloudflare Images)
# ---------------------------------------------------------------------------
# Credentials come from the environment (or a .env file):
#   CLOUDFLARE_ACCOUNT_ID, CLOUDFLARE_API_TOKEN
[upload]
api_base = "https://api.cloudflare.com/client/v4"

# Abandon a single upload after this many seconds.
timeout_secs = 60
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.collections, ["events", "news", "posts"]);
        assert_eq!(config.category_collection, "posts");
        assert_eq!(config.scan.image_fields.len(), 6);
        assert!(config.scan.image_fields.contains(&"featuredImage".to_string()));
        assert_eq!(config.scan.pattern, "**/*.md");
        assert_eq!(config.upload.timeout(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[upload]
timeout_secs = 5
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.upload.timeout_secs, 5);
        assert_eq!(config.upload.api_base, UploadConfig::default().api_base);
        assert_eq!(config.collections, Config::default().collections);
    }

    #[test]
    fn stock_config_matches_defaults() {
        let parsed: Config = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILENAME),
            r#"
collections = ["blog", "pages"]
category_collection = "blog"

[scan]
image_fields = ["cover"]
"#,
        )
        .unwrap();

        let config = load_config(tmp.path()).unwrap();
        assert_eq!(config.collections, ["blog", "pages"]);
        assert_eq!(config.category_collection, "blog");
        assert_eq!(config.scan.image_fields, ["cover"]);
        // Untouched keys keep defaults
        assert_eq!(config.scan.pattern, "**/*.md");
        assert_eq!(config.upload.timeout_secs, 60);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(CONFIG_FILENAME), "collections = [").unwrap();
        assert!(matches!(
            load_config(tmp.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn unknown_key_rejected() {
        let result: Result<Config, _> = toml::from_str("colections = []");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_section_key_rejected() {
        let result: Result<Config, _> = toml::from_str("[upload]\ntimeout = 3");
        assert!(result.is_err());
    }

    // =========================================================================
    // Validation
    // =========================================================================

    fn with(f: impl FnOnce(&mut Config)) -> Result<(), ConfigError> {
        let mut config = Config::default();
        f(&mut config);
        config.validate()
    }

    #[test]
    fn category_collection_must_be_listed() {
        let err = with(|c| c.category_collection = "blog".into()).unwrap_err();
        assert!(err.to_string().contains("blog"));
    }

    #[test]
    fn empty_collections_rejected() {
        assert!(with(|c| c.collections.clear()).is_err());
    }

    #[test]
    fn duplicate_collection_rejected() {
        assert!(with(|c| c.collections.push("news".into())).is_err());
    }

    #[test]
    fn nested_collection_name_rejected() {
        assert!(with(|c| c.collections.push("a/b".into())).is_err());
    }

    #[test]
    fn empty_image_fields_rejected() {
        assert!(with(|c| c.scan.image_fields.clear()).is_err());
    }

    #[test]
    fn blank_image_field_rejected() {
        let err = with(|c| c.scan.image_fields.push(String::new())).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(with(|c| c.scan.image_fields = vec!["  ".into()]).is_err());
        assert!(with(|c| c.scan.image_fields.push("cover image".into())).is_err());
        assert!(with(|c| c.scan.image_fields.push("cover:".into())).is_err());
    }

    #[test]
    fn zero_timeout_rejected() {
        assert!(with(|c| c.upload.timeout_secs = 0).is_err());
    }

    // =========================================================================
    // TOML merging
    // =========================================================================

    #[test]
    fn merge_toml_scalar_override() {
        let base: toml::Value = toml::from_str("a = 1\nb = 2").unwrap();
        let overlay: toml::Value = toml::from_str("b = 3").unwrap();
        let merged = merge_toml(base, overlay);
        assert_eq!(merged["a"].as_integer(), Some(1));
        assert_eq!(merged["b"].as_integer(), Some(3));
    }

    #[test]
    fn merge_toml_arrays_replace() {
        let merged = merge_toml(
            stock_defaults_value(),
            toml::from_str(r#"collections = ["posts"]"#).unwrap(),
        );
        let config: Config = merged.try_into().unwrap();
        assert_eq!(config.collections, ["posts"]);
    }

    #[test]
    fn merge_toml_nested_tables() {
        let merged = merge_toml(
            stock_defaults_value(),
            toml::from_str("[upload]\ntimeout_secs = 9").unwrap(),
        );
        let config: Config = merged.try_into().unwrap();
        assert_eq!(config.upload.timeout_secs, 9);
        assert_eq!(config.upload.api_base, UploadConfig::default().api_base);
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn credentials_present() {
        let creds =
            Credentials::from_lookup(env(&[(ACCOUNT_ID_VAR, "acct"), (API_TOKEN_VAR, "tok")]))
                .unwrap();
        assert_eq!(creds.account_id, "acct");
        assert_eq!(creds.api_token, "tok");
        assert!(!format!("{creds:?}").contains("tok\""));
    }

    #[test]
    fn credentials_missing_lists_variables() {
        let err = Credentials::from_lookup(env(&[(ACCOUNT_ID_VAR, "acct")])).unwrap_err();
        match err {
            ConfigError::MissingCredentials(missing) => assert_eq!(missing, [API_TOKEN_VAR]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn credentials_empty_counts_as_missing() {
        let err =
            Credentials::from_lookup(env(&[(ACCOUNT_ID_VAR, " "), (API_TOKEN_VAR, "")]))
                .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing Cloudflare credentials: set CLOUDFLARE_ACCOUNT_ID and CLOUDFLARE_API_TOKEN"
        );
    }
}
