//! Generated bundle: `{ config, nodes }` for static consumers.
//!
//! Rendering is deterministic. Nodes come out in id order, maps are ordered,
//! and nothing time-dependent is added, so an unchanged content root renders
//! to identical bytes. [`write_bundle`] compares SHA-256 fingerprints and
//! leaves the file alone when nothing changed, which keeps the file's mtime
//! stable and stops a watched root from rescanning its own output.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::WikiConfig;
use crate::scan::{self, Scan, ScanError};
use crate::types::Index;

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("IO error writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Scan(#[from] ScanError),
}

#[derive(Debug, Serialize)]
pub struct Bundle<'a> {
    pub config: &'a WikiConfig,
    pub nodes: &'a Index,
}

impl<'a> Bundle<'a> {
    pub fn new(config: &'a WikiConfig, nodes: &'a Index) -> Self {
        Self { config, nodes }
    }

    /// Pretty JSON with a trailing newline.
    pub fn render(&self) -> Result<String, BundleError> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { fingerprint: String },
    Unchanged { fingerprint: String },
}

impl WriteOutcome {
    pub fn fingerprint(&self) -> &str {
        match self {
            WriteOutcome::Written { fingerprint } | WriteOutcome::Unchanged { fingerprint } => {
                fingerprint
            }
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, WriteOutcome::Written { .. })
    }
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write the bundle for `index` to `path` unless the file already holds the same bytes.
pub fn write_bundle(
    path: &Path,
    config: &WikiConfig,
    index: &Index,
) -> Result<WriteOutcome, BundleError> {
    let rendered = Bundle::new(config, index).render()?;
    let digest = fingerprint(rendered.as_bytes());

    if let Ok(existing) = fs::read(path)
        && fingerprint(&existing) == digest
    {
        debug!(path = %path.display(), "bundle unchanged");
        return Ok(WriteOutcome::Unchanged { fingerprint: digest });
    }

    let io_err = |source| BundleError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(io_err)?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
    fs::write(&tmp, rendered.as_bytes()).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;

    info!(path = %path.display(), nodes = index.len(), "bundle written");
    Ok(WriteOutcome::Written { fingerprint: digest })
}

/// Batch generator: scan `root` once and write its bundle to `output`.
pub fn generate(root: &Path, output: &Path) -> Result<(Scan, WriteOutcome), BundleError> {
    let scan = scan::scan(root)?;
    let outcome = write_bundle(output, &scan.config, &scan.index)?;
    Ok((scan, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use tempfile::TempDir;

    #[test]
    fn bundle_shape() {
        let tmp = setup_fixtures();
        let scan = scan::scan(tmp.path()).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&Bundle::new(&scan.config, &scan.index).render().unwrap())
                .unwrap();

        assert_eq!(json["config"]["title"], "Physics Notes");
        assert_eq!(json["config"]["fontTheme"], "serif");
        let nodes = json["nodes"].as_array().unwrap();
        assert_eq!(nodes.len(), 5);
        assert_eq!(nodes[0]["id"], "Meta");
        assert_eq!(nodes[0]["parentId"], serde_json::Value::Null);
        assert_eq!(nodes[4]["id"], "Physics/Schrodinger");
        assert_eq!(nodes[4]["slug"], "physics-se");
        assert_eq!(nodes[4]["sortIndex"], 1);
    }

    #[test]
    fn two_runs_produce_identical_bytes() {
        let tmp = setup_fixtures();
        let out = TempDir::new().unwrap();
        let first_path = out.path().join("a/content.json");
        let second_path = out.path().join("b/content.json");

        generate(tmp.path(), &first_path).unwrap();
        generate(tmp.path(), &second_path).unwrap();
        assert_eq!(
            fs::read(&first_path).unwrap(),
            fs::read(&second_path).unwrap()
        );
    }

    #[test]
    fn unchanged_bundle_is_not_rewritten() {
        let tmp = setup_fixtures();
        let out = TempDir::new().unwrap();
        let path = out.path().join("content.json");

        let (_, first) = generate(tmp.path(), &path).unwrap();
        assert!(first.was_written());
        let (_, second) = generate(tmp.path(), &path).unwrap();
        assert_eq!(
            second,
            WriteOutcome::Unchanged {
                fingerprint: first.fingerprint().to_string()
            }
        );
    }

    #[test]
    fn content_change_rewrites_bundle() {
        let tmp = setup_fixtures();
        let out = TempDir::new().unwrap();
        let path = out.path().join("content.json");
        let (_, first) = generate(tmp.path(), &path).unwrap();

        fs::write(tmp.path().join("Meta/About.md"), "Rewritten.\n").unwrap();
        let (_, second) = generate(tmp.path(), &path).unwrap();
        assert!(second.was_written());
        assert_ne!(first.fingerprint(), second.fingerprint());
        assert!(fs::read_to_string(&path).unwrap().contains("Rewritten."));
    }

    #[test]
    fn generate_fails_on_missing_root() {
        let out = TempDir::new().unwrap();
        let result = generate(&out.path().join("missing"), &out.path().join("c.json"));
        assert!(matches!(result, Err(BundleError::Scan(_))));
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fp = fingerprint(b"");
        assert_eq!(
            fp,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
