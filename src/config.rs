//! Configuration.
//!
//! Two independent files are read:
//!
//! - **Tool settings** (`metawiki.toml`, next to where the tool runs): where
//!   the content lives, where the bundle is written, and how the live session
//!   and logging behave. Stock defaults are overridden by whatever the user
//!   file sets; unknown keys are rejected to catch typos early.
//! - **Wiki config** (`_config.json`, in the content root): the site-level
//!   settings that travel with the content and end up in the bundle.
//!
//! ## Settings File
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! content_root = "content"
//!
//! [bundle]
//! path = "public/content.json"   # Where `generate` writes the bundle
//!
//! [watch]
//! sync_bundle = true             # Rewrite the bundle after every live rescan
//!
//! [log]
//! filter = "info"                # tracing filter, overridden by RUST_LOG
//! ```
//!
//! ## Wiki Config
//!
//! ```json
//! { "title": "Physics Notes", "fontTheme": "serif", "fontSize": 16 }
//! ```
//!
//! A missing `_config.json` means defaults. An unreadable or malformed one
//! also means defaults, plus a [`ScanWarning`] so the problem is visible
//! without breaking the scan. Keys the engine doesn't know are kept and
//! written back out with the bundle.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::naming::CONFIG_FILE;
use crate::types::ScanWarning;

/// Settings file name looked up in the working directory.
pub const SETTINGS_FILE: &str = "metawiki.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

// =============================================================================
// Tool settings
// =============================================================================

/// Tool settings loaded from `metawiki.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Path to the content root directory.
    pub content_root: String,
    pub bundle: BundleSettings,
    pub watch: WatchSettings,
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            content_root: "content".to_string(),
            bundle: BundleSettings::default(),
            watch: WatchSettings::default(),
            log: LogSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BundleSettings {
    /// Output path of the generated bundle.
    pub path: String,
}

impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            path: "public/content.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    /// Persist the bundle after every scan published by a live session.
    pub sync_bundle: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self { sync_bundle: true }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSettings {
    /// Default `tracing` filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.content_root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "content_root must not be empty".into(),
            ));
        }
        if self.bundle.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "bundle.path must not be empty".into(),
            ));
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::Validation("log.filter must not be empty".into()));
        }
        Ok(())
    }
}

/// Stock defaults as a `toml::Value::Table`, the base layer for merging.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    toml::Value::try_from(Settings::default())
        .map_err(|e| ConfigError::Validation(format!("stock settings do not serialize: {e}")))
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
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

/// Load a settings file as a raw TOML value. `Ok(None)` if it doesn't exist.
pub fn load_raw_settings(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(toml::from_str(&content)?))
}

/// Merge an optional overlay onto the base, then deserialize and validate.
pub fn resolve_settings(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let settings: Settings = merged.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Load settings from `path`, falling back to stock defaults when absent.
pub fn load_settings(path: &Path) -> Result<Settings, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_settings(path)?;
    resolve_settings(base, overlay)
}

/// A fully-commented stock `metawiki.toml`, printed by `gen-config`.
pub fn stock_settings_toml() -> &'static str {
    r##"# MetaWiki Settings
# =================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults. Unknown keys cause an error.

# Directory holding the Markdown documents, `_meta.json` order manifests
# and the site-level `_config.json`. The --source flag overrides it.
content_root = "content"

# ---------------------------------------------------------------------------
# Generated bundle: { "config": ..., "nodes": [...] }
# ---------------------------------------------------------------------------
[bundle]
# Output path for `metawiki generate` (the --output flag overrides it).
path = "public/content.json"

# ---------------------------------------------------------------------------
# Live session (`metawiki watch`)
# ---------------------------------------------------------------------------
[watch]
# Rewrite the bundle after every rescan so static consumers stay current.
# Unchanged bundles are never rewritten.
sync_bundle = true

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[log]
# tracing filter directive used when RUST_LOG is not set,
# e.g. "info", "debug", "metawiki=debug,notify=warn".
filter = "info"
"##
}

// =============================================================================
// Wiki config (_config.json)
// =============================================================================

fn default_title() -> String {
    "MetaWiki".to_string()
}

/// Site-level settings stored in the content root's `_config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WikiConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<FontSize>,
    /// Keys not modelled above, kept verbatim.
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Default for WikiConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            font_theme: None,
            font_size: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Font size as written by the settings UI: a number of pixels or a CSS length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FontSize {
    Pixels(serde_json::Number),
    Css(String),
}

/// Parse `_config.json` text.
pub fn parse_wiki_config(text: &str) -> Result<WikiConfig, serde_json::Error> {
    serde_json::from_str(text)
}

/// Load the wiki config from `root`.
///
/// Never fails: problems come back as a warning next to the default config.
pub fn load_wiki_config(root: &Path) -> (WikiConfig, Option<ScanWarning>) {
    let text = match fs::read_to_string(root.join(CONFIG_FILE)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return (WikiConfig::default(), None),
        Err(e) => {
            let warning = ScanWarning::new(CONFIG_FILE, format!("unreadable: {e}"));
            return (WikiConfig::default(), Some(warning));
        }
    };
    match parse_wiki_config(&text) {
        Ok(config) => (config, None),
        Err(e) => {
            let warning = ScanWarning::new(CONFIG_FILE, format!("invalid wiki config: {e}"));
            (WikiConfig::default(), Some(warning))
        }
    }
}
