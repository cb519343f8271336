//! Index build: walk the content root into a flat [`Index`].
//!
//! ## Directory Structure
//!
//! ```text
//! content/                       # Content root
//! ├── _config.json               # Wiki config (optional)
//! ├── _meta.json                 # Order of top-level entries (optional)
//! ├── Physics/                   # Folder node "Physics"
//! │   ├── _meta.json             # ["Quantum", "Schrodinger"]
//! │   ├── Quantum.md             # Document "Physics/Quantum"
//! │   └── Schrodinger.md         # Document "Physics/Schrodinger"
//! ├── Meta/
//! │   └── About.md
//! ├── .drafts/                   # Hidden: skipped
//! └── node_modules/              # Skipped
//! ```
//!
//! Every directory becomes a folder node and every `*.md` file a document
//! node. Ancestors of a document that are missing from the walk are
//! synthesized as folders so the hierarchy is always closed.
//!
//! ## Ordering
//!
//! Each node's `sort_index` is its position in the parent directory's
//! `_meta.json`, or [`SORT_SENTINEL`] when not listed. Scanning never writes
//! manifests.
//!
//! ## Failure Handling
//!
//! Only an unreadable content root fails the scan. Everything else (an
//! unreadable file, malformed front matter, a broken manifest or config,
//! a document colliding with a folder id) is logged, recorded as a
//! [`ScanWarning`] and skipped or defaulted.

use rayon::prelude::*;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::{self, WikiConfig};
use crate::frontmatter;
use crate::manifest;
use crate::naming;
use crate::types::{Document, Folder, Index, Node, RESERVED_KEYS, SORT_SENTINEL, ScanWarning};

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("cannot read content root {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of one scan of a content root.
#[derive(Debug, Clone)]
pub struct Scan {
    pub index: Index,
    pub config: WikiConfig,
    pub warnings: Vec<ScanWarning>,
}

/// Scan `root` into a fresh index.
pub fn scan(root: &Path) -> Result<Scan, ScanError> {
    let started = Instant::now();
    if let Err(source) = fs::read_dir(root) {
        error!(root = %root.display(), error = %source, "content root unreadable");
        return Err(ScanError::RootUnreadable {
            path: root.to_path_buf(),
            source,
        });
    }

    let mut warnings = Vec::new();
    let listing = walk(root, &mut warnings);

    let parsed: Vec<Result<(Document, Vec<ScanWarning>), ScanWarning>> = listing
        .documents
        .par_iter()
        .map(|rel| read_document(root, rel))
        .collect();

    let mut index = Index::new();
    for dir in &listing.dirs {
        // Walk output is sorted and unique, so folder inserts cannot collide.
        let _ = index.insert(Node::Folder(folder_node(dir)));
    }
    for result in parsed {
        match result {
            Ok((doc, doc_warnings)) => {
                warnings.extend(doc_warnings);
                if let Err(node) = index.insert(Node::Document(doc)) {
                    let path = node.as_document().map(|d| d.file_path.clone()).unwrap_or_default();
                    warnings.push(ScanWarning::new(
                        path,
                        format!("id '{}' is already taken by a folder; document skipped", node.id()),
                    ));
                }
            }
            Err(warning) => warnings.push(warning),
        }
    }
    synthesize_ancestors(&mut index);
    assign_sort_indices(root, &mut index, &mut warnings);

    let (config, config_warning) = config::load_wiki_config(root);
    warnings.extend(config_warning);

    for warning in &warnings {
        warn!(path = %warning.path, "{}", warning.message);
    }
    info!(
        root = %root.display(),
        folders = index.folder_count(),
        documents = index.document_count(),
        warnings = warnings.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "scan complete"
    );

    Ok(Scan {
        index,
        config,
        warnings,
    })
}

/// Relative paths found by the walk, `/`-separated.
#[derive(Debug, Default)]
struct Listing {
    dirs: Vec<String>,
    documents: Vec<String>,
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    naming::is_hidden(&name)
        || (entry.file_type().is_dir() && naming::IGNORED_DIRS.contains(&name.as_ref()))
}

fn walk(root: &Path, warnings: &mut Vec<ScanWarning>) -> Listing {
    let mut listing = Listing::default();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_skipped(e));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .and_then(|p| relative(root, p))
                    .unwrap_or_default();
                warnings.push(ScanWarning::new(path, format!("skipped: {e}")));
                continue;
            }
        };
        let Some(rel) = relative(root, entry.path()) else {
            warnings.push(ScanWarning::new(
                entry.path().to_string_lossy(),
                "skipped: path is not valid UTF-8",
            ));
            continue;
        };

        if entry.file_type().is_dir() {
            listing.dirs.push(rel);
        } else if entry.file_type().is_file() && naming::is_document_name(naming::leaf_of(&rel)) {
            listing.documents.push(rel);
        }
    }
    debug!(
        dirs = listing.dirs.len(),
        documents = listing.documents.len(),
        "walk complete"
    );
    listing
}

/// `path` relative to `root` with `/` separators, if it is valid UTF-8.
fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = rel.iter().map(|c| c.to_str()).collect();
    Some(parts?.join("/"))
}

fn folder_node(id: &str) -> Folder {
    let leaf = naming::leaf_of(id);
    Folder {
        id: id.to_string(),
        parent_id: naming::parent_of(id).map(String::from),
        title: leaf.to_string(),
        sort_index: SORT_SENTINEL,
        file_name: leaf.to_string(),
        category: naming::top_segment(id).to_string(),
    }
}

/// Read and parse one document. An `Err` means the file was skipped.
fn read_document(root: &Path, rel: &str) -> Result<(Document, Vec<ScanWarning>), ScanWarning> {
    let text = fs::read_to_string(root.join(rel))
        .map_err(|e| ScanWarning::new(rel, format!("unreadable, skipped: {e}")))?;
    let mut warnings = Vec::new();

    let parsed = match frontmatter::parse(&text) {
        Ok(parsed) => parsed,
        Err(e) => {
            warnings.push(ScanWarning::new(rel, format!("malformed front matter: {e}")));
            let body = match frontmatter::split(&text) {
                Ok(Some((_, body))) => body.to_string(),
                _ => text.clone(),
            };
            frontmatter::Document {
                data: Mapping::new(),
                body,
            }
        }
    };
    let mut data = parsed.data;
    frontmatter::normalize_dates(&mut data);

    let file_name = naming::leaf_of(rel).to_string();
    let base = naming::base_name(&file_name, false).to_string();
    let parent_id = naming::parent_of(rel).map(String::from);
    let id = naming::join_id(parent_id.as_deref(), &base);

    let title = text_field(&data, "title").unwrap_or_else(|| base.clone());
    let category = text_field(&data, "category")
        .unwrap_or_else(|| naming::top_segment(&id).to_string());
    let tags = match data.get("tags") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(items)) => items.iter().filter_map(frontmatter::scalar_to_string).collect(),
        Some(other) => match frontmatter::scalar_to_string(other) {
            Some(tag) => vec![tag],
            None => {
                warnings.push(ScanWarning::new(rel, "tags must be a list or a string; ignored"));
                Vec::new()
            }
        },
    };

    let mut extra = BTreeMap::new();
    for (key, value) in &data {
        let Some(key) = key.as_str() else { continue };
        if RESERVED_KEYS.contains(&key) {
            continue;
        }
        match serde_json::to_value(value) {
            Ok(json) => {
                extra.insert(key.to_string(), json);
            }
            Err(e) => warnings.push(ScanWarning::new(
                rel,
                format!("front matter key '{key}' dropped: {e}"),
            )),
        }
    }

    let doc = Document {
        id,
        parent_id,
        title,
        sort_index: SORT_SENTINEL,
        file_name,
        file_path: rel.to_string(),
        slug: text_field(&data, "slug"),
        tags,
        category,
        date: text_field(&data, "date"),
        content: parsed.body,
        extra,
    };
    Ok((doc, warnings))
}

/// A non-empty scalar front matter value as text.
fn text_field(data: &Mapping, key: &str) -> Option<String> {
    data.get(key)
        .and_then(frontmatter::scalar_to_string)
        .filter(|s| !s.trim().is_empty())
}

/// Insert folder nodes for every ancestor id that is missing from the index.
fn synthesize_ancestors(index: &mut Index) {
    let missing: BTreeSet<String> = index
        .iter()
        .flat_map(|node| ancestors(node.id()))
        .filter(|id| !index.contains(id))
        .map(String::from)
        .collect();
    for id in missing {
        debug!(id = %id, "implicit folder");
        let _ = index.insert(Node::Folder(folder_node(&id)));
    }
}

/// Proper ancestors of an id, nearest last (`a/b/c` → `a`, `a/b`).
fn ancestors(id: &str) -> impl Iterator<Item = &str> {
    id.match_indices('/').map(move |(i, _)| &id[..i])
}

/// Resolve every node's sort index from its parent directory's manifest.
fn assign_sort_indices(root: &Path, index: &mut Index, warnings: &mut Vec<ScanWarning>) {
    let mut groups: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for node in index.iter() {
        groups
            .entry(node.parent_id().unwrap_or_default().to_string())
            .or_default()
            .push((node.id().to_string(), node.base_name().to_string()));
    }

    for (dir, members) in groups {
        let names = read_manifest(root, &dir, warnings);
        let positions = manifest::positions(&names);
        for (id, base) in members {
            let sort_index = positions.get(base.as_str()).copied().unwrap_or(SORT_SENTINEL);
            if let Some(node) = index.get_mut(&id) {
                node.set_sort_index(sort_index);
            }
        }
    }
}

fn read_manifest(root: &Path, dir: &str, warnings: &mut Vec<ScanWarning>) -> Vec<String> {
    let rel = manifest::manifest_path(dir);
    let text = match fs::read_to_string(root.join(&rel)) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            warnings.push(ScanWarning::new(rel, format!("unreadable manifest ignored: {e}")));
            return Vec::new();
        }
    };
    let parsed = manifest::parse_manifest(&text);
    warnings.extend(
        parsed
            .problems
            .into_iter()
            .map(|problem| ScanWarning::new(rel.clone(), problem)),
    );
    parsed.names
}

/// Convenience for consumers that only want node ids in index order.
pub fn ids(index: &Index) -> Vec<&str> {
    index.ids().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use serde_json::Value as JsonValue;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    // =========================================================================
    // Fixture scenario
    // =========================================================================

    #[test]
    fn fixture_ids() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(
            ids(&scan.index),
            vec!["Meta", "Meta/About", "Physics", "Physics/Quantum", "Physics/Schrodinger"]
        );
        assert!(scan.warnings.is_empty(), "{:?}", scan.warnings);
    }

    #[test]
    fn manifest_overrides_alphabetical_order() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(find_node(&scan.index, "Physics/Quantum").sort_index(), 0);
        assert_eq!(find_node(&scan.index, "Physics/Schrodinger").sort_index(), 1);
        assert_child_order(&scan.index, Some("Physics"), &["Quantum", "Schrodinger"]);
    }

    #[test]
    fn unlisted_entries_get_sentinel() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(find_node(&scan.index, "Meta/About").sort_index(), SORT_SENTINEL);
        assert_eq!(find_node(&scan.index, "Physics").sort_index(), SORT_SENTINEL);
    }

    #[test]
    fn front_matter_fields_populate_document() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        let doc = find_document(&scan.index, "Physics/Schrodinger");
        assert_eq!(doc.title, "Schrödinger Equation");
        assert_eq!(doc.slug.as_deref(), Some("physics-se"));
        assert_eq!(doc.tags, vec!["quantum", "waves"]);
        assert_eq!(doc.date.as_deref(), Some("2024-03-01"));
        assert_eq!(doc.file_name, "Schrodinger.md");
        assert_eq!(doc.file_path, "Physics/Schrodinger.md");
        assert_eq!(doc.category, "Physics");
        assert!(doc.content.starts_with("The wave equation"));
    }

    #[test]
    fn title_falls_back_to_file_name() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        let doc = find_document(&scan.index, "Physics/Quantum");
        assert_eq!(doc.title, "Quantum");
        assert_eq!(doc.slug, None);
        assert!(doc.tags.is_empty());
    }

    #[test]
    fn folder_nodes_derived_from_directories() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        let Node::Folder(folder) = find_node(&scan.index, "Physics") else {
            panic!("Physics should be a folder");
        };
        assert_eq!(folder.parent_id, None);
        assert_eq!(folder.title, "Physics");
        assert_eq!(folder.category, "Physics");
    }

    #[test]
    fn wiki_config_loaded() {
        let tmp = setup_fixtures();
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(scan.config.title, "Physics Notes");
        assert_eq!(scan.config.font_theme.as_deref(), Some("serif"));
    }

    // =========================================================================
    // Recoverable problems
    // =========================================================================

    #[test]
    fn malformed_front_matter_keeps_document() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Broken.md", "---\ntitle: [oops\n---\nStill here");
        let scan = scan(tmp.path()).unwrap();
        let doc = find_document(&scan.index, "Broken");
        assert_eq!(doc.title, "Broken");
        assert_eq!(doc.content, "Still here");
        assert_eq!(scan.warnings.len(), 1);
        assert!(scan.warnings[0].message.contains("malformed front matter"));
    }

    #[test]
    fn unterminated_front_matter_keeps_whole_text() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Open.md", "---\ntitle: x\nno end");
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(find_document(&scan.index, "Open").content, "---\ntitle: x\nno end");
    }

    #[test]
    fn corrupt_manifest_means_sentinel_order() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Notes/B.md", "");
        write(tmp.path(), "Notes/a.md", "");
        write(tmp.path(), "Notes/_meta.json", "{ broken");
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(find_node(&scan.index, "Notes/B").sort_index(), SORT_SENTINEL);
        assert_eq!(scan.warnings[0].path, "Notes/_meta.json");
        // Case-insensitive title tie-break
        assert_child_order(&scan.index, Some("Notes"), &["a", "B"]);
    }

    #[test]
    fn hidden_entries_and_node_modules_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Visible.md", "");
        write(tmp.path(), ".hidden.md", "");
        write(tmp.path(), ".drafts/Secret.md", "");
        write(tmp.path(), "node_modules/pkg/README.md", "");
        write(tmp.path(), "notes.txt", "");
        let scan = scan(tmp.path()).unwrap();
        assert_eq!(ids(&scan.index), vec!["Visible"]);
    }

    #[test]
    fn document_colliding_with_folder_is_skipped() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Physics.md", "");
        write(tmp.path(), "Physics/Quantum.md", "");
        let scan = scan(tmp.path()).unwrap();
        assert!(find_node(&scan.index, "Physics").is_folder());
        assert_eq!(scan.warnings.len(), 1);
        assert_eq!(scan.warnings[0].path, "Physics.md");
    }

    #[test]
    fn unreadable_root_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope");
        assert!(matches!(
            scan(&missing),
            Err(ScanError::RootUnreadable { .. })
        ));
    }

    // =========================================================================
    // Front matter normalization
    // =========================================================================

    #[test]
    fn timestamps_become_dates_and_extras_carry_through() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            "Log.md",
            "---\ntitle: 42\ndate: 2024-03-01T23:30:00-05:00\nauthor: Ada\nid: spoofed\n---\n",
        );
        let scan = scan(tmp.path()).unwrap();
        let doc = find_document(&scan.index, "Log");
        assert_eq!(doc.title, "42");
        assert_eq!(doc.date.as_deref(), Some("2024-03-02"));
        assert_eq!(doc.extra.get("author"), Some(&JsonValue::String("Ada".into())));
        assert_eq!(doc.extra.get("id"), None);
        assert_eq!(doc.id, "Log");
    }

    #[test]
    fn single_string_tag_and_empty_title() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), "Tagged.md", "---\ntitle: ''\ntags: physics\n---\n");
        let scan = scan(tmp.path()).unwrap();
        let doc = find_document(&scan.index, "Tagged");
        assert_eq!(doc.title, "Tagged");
        assert_eq!(doc.tags, vec!["physics"]);
        assert_eq!(doc.category, "Tagged");
    }

    #[test]
    fn missing_ancestors_are_synthesized() {
        let mut index = Index::new();
        index
            .insert(Node::Folder(folder_node("a/b/c")))
            .unwrap();
        synthesize_ancestors(&mut index);
        assert_eq!(ids(&index), vec!["a", "a/b", "a/b/c"]);
        assert_eq!(find_node(&index, "a/b").parent_id(), Some("a"));
    }

    #[test]
    fn ancestors_listed_outermost_first() {
        assert_eq!(ancestors("a/b/c").collect::<Vec<_>>(), vec!["a", "a/b"]);
        assert_eq!(ancestors("top").count(), 0);
    }
}
