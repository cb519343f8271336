//! Order manifests.
//!
//! Each directory may hold a `_meta.json`: a JSON array of base names (file
//! names without `.md`) declaring sibling order. It is the durable source of
//! truth for order; `sort_index` on a node is only ever derived from it.
//!
//! ```json
//! ["Quantum", "Schrodinger"]
//! ```
//!
//! Reading is forgiving. A missing file, invalid JSON or a non-array all read
//! as an empty order; non-string entries are dropped and duplicates keep their
//! first position.
//!
//! Writing always replaces the whole array. Every read-modify-write goes
//! through [`ManifestStore::update`], which holds an async lock per directory
//! so two operations on the same directory can never interleave between the
//! read and the write.

use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::host::HostFs;
use crate::naming::{self, MANIFEST_FILE};
use crate::types::{Direction, Placement};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    Json(#[from] serde_json::Error),
}

/// Root-relative path of the manifest for directory `dir` (`""` is the root).
pub fn manifest_path(dir: &str) -> String {
    naming::join_id(Some(dir), MANIFEST_FILE)
}

/// Outcome of parsing manifest text: the usable names plus anything dropped.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedManifest {
    pub names: Vec<String>,
    pub problems: Vec<String>,
}

/// Parse manifest text. Never fails; problems are reported alongside.
pub fn parse_manifest(text: &str) -> ParsedManifest {
    let mut parsed = ParsedManifest::default();
    let items = match serde_json::from_str::<JsonValue>(text) {
        Ok(JsonValue::Array(items)) => items,
        Ok(_) => {
            parsed.problems.push("manifest is not a JSON array".to_string());
            return parsed;
        }
        Err(e) => {
            parsed.problems.push(format!("invalid manifest JSON: {e}"));
            return parsed;
        }
    };

    let mut seen = HashSet::new();
    for item in items {
        match item {
            JsonValue::String(name) => {
                if seen.insert(name.clone()) {
                    parsed.names.push(name);
                } else {
                    parsed.problems.push(format!("duplicate entry '{name}' ignored"));
                }
            }
            other => parsed
                .problems
                .push(format!("non-string entry {other} ignored")),
        }
    }
    parsed
}

/// Map each listed name to its position.
pub fn positions(names: &[String]) -> HashMap<&str, u32> {
    names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i as u32))
        .collect()
}

/// Append `name` unless already listed. Returns whether the list changed.
pub fn append_name(names: &mut Vec<String>, name: &str) -> bool {
    if names.iter().any(|n| n == name) {
        return false;
    }
    names.push(name.to_string());
    true
}

/// Remove every occurrence of `name`. Returns whether the list changed.
pub fn remove_name(names: &mut Vec<String>, name: &str) -> bool {
    let before = names.len();
    names.retain(|n| n != name);
    names.len() != before
}

/// Replace `old` with `new` at the same position.
///
/// Does nothing when `old` isn't listed. A stray `new` elsewhere in the list
/// is dropped so the result never holds duplicates.
pub fn replace_name(names: &mut Vec<String>, old: &str, new: &str) -> bool {
    let Some(pos) = names.iter().position(|n| n == old) else {
        return false;
    };
    if old == new {
        return false;
    }
    names[pos] = new.to_string();
    let mut index = 0;
    names.retain(|n| {
        let keep = n != new || index == pos;
        index += 1;
        keep
    });
    true
}

/// Place `name` directly before or after `anchor`, appending when `anchor` is
/// not listed. Any existing occurrence of `name` moves.
pub fn insert_relative(
    names: &mut Vec<String>,
    name: &str,
    anchor: &str,
    placement: Placement,
) -> bool {
    let before = names.clone();
    names.retain(|n| n != name);
    match names.iter().position(|n| n == anchor) {
        Some(pos) => {
            let at = match placement {
                Placement::Before => pos,
                Placement::After => pos + 1,
            };
            names.insert(at, name.to_string());
        }
        None => names.push(name.to_string()),
    }
    *names != before
}

/// Move `name` one step among the `visible` siblings.
///
/// `visible` is the display order of the siblings the caller can see.
/// Any of them missing from `names` are appended first, so the list becomes
/// a complete order. Entries that aren't visible (stale names, or entries
/// written after `visible` was taken) are stepped over and keep their
/// positions. Returns whether `name` moved.
pub fn step_name(
    names: &mut Vec<String>,
    visible: &[String],
    name: &str,
    direction: Direction,
) -> bool {
    for sibling in visible {
        append_name(names, sibling);
    }
    let Some(pos) = names.iter().position(|n| n == name) else {
        return false;
    };
    let is_visible = |n: &String| visible.contains(n);
    let neighbour = match direction {
        Direction::Up => names[..pos].iter().rposition(is_visible),
        Direction::Down => names[pos + 1..]
            .iter()
            .position(is_visible)
            .map(|i| pos + 1 + i),
    };
    match neighbour {
        Some(other) => {
            names.swap(pos, other);
            true
        }
        None => false,
    }
}

/// A complete order for `siblings`: listed names that still exist keep their
/// positions, unlisted siblings follow in the order given.
pub fn repaired_names(names: &[String], siblings: &[String]) -> Vec<String> {
    let mut repaired: Vec<String> = names
        .iter()
        .filter(|n| siblings.contains(n))
        .cloned()
        .collect();
    for sibling in siblings {
        append_name(&mut repaired, sibling);
    }
    repaired
}

/// A manifest as found on disk.
struct Loaded {
    names: Vec<String>,
    /// Present and parsed without problems.
    intact: bool,
}

/// Per-directory async locks, created on first use.
#[derive(Debug, Default)]
struct DirLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DirLocks {
    async fn lock(&self, dir: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(dir.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

/// Reads and writes order manifests through the host file interface.
pub struct ManifestStore {
    fs: Arc<dyn HostFs>,
    locks: DirLocks,
}

impl ManifestStore {
    pub fn new(fs: Arc<dyn HostFs>) -> Self {
        Self {
            fs,
            locks: DirLocks::default(),
        }
    }

    /// Current order for `dir`. Missing or broken manifests read as empty.
    pub async fn read(&self, dir: &str) -> Vec<String> {
        self.load(dir).await.names
    }

    async fn load(&self, dir: &str) -> Loaded {
        let path = manifest_path(dir);
        let broken = Loaded {
            names: Vec::new(),
            intact: false,
        };
        let text = match self.fs.read_file(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return broken,
            Err(e) => {
                warn!(path = %path, error = %e, "unreadable manifest treated as empty");
                return broken;
            }
        };
        let parsed = parse_manifest(&text);
        for problem in &parsed.problems {
            warn!(path = %path, "{problem}");
        }
        Loaded {
            intact: parsed.problems.is_empty(),
            names: parsed.names,
        }
    }

    /// Replace the whole order for `dir`.
    pub async fn write(&self, dir: &str, names: &[String]) -> Result<(), ManifestError> {
        let _guard = self.locks.lock(dir).await;
        self.write_unlocked(dir, names).await
    }

    async fn write_unlocked(&self, dir: &str, names: &[String]) -> Result<(), ManifestError> {
        let path = manifest_path(dir);
        let text = serde_json::to_string_pretty(names)?;
        self.fs
            .write_file(&path, &text)
            .await
            .map_err(|source| ManifestError::Write {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path, entries = names.len(), "manifest written");
        Ok(())
    }

    /// Read-modify-write `dir`'s manifest under its lock.
    ///
    /// `edit` returns whether it changed anything; unchanged lists are not
    /// written back. Returns the resulting order.
    pub async fn update<F>(&self, dir: &str, edit: F) -> Result<Vec<String>, ManifestError>
    where
        F: FnOnce(&mut Vec<String>) -> bool + Send,
    {
        let _guard = self.locks.lock(dir).await;
        let mut names = self.read(dir).await;
        if edit(&mut names) {
            self.write_unlocked(dir, &names).await?;
        }
        Ok(names)
    }

    /// Rewrite `dir`'s manifest as a complete order for `siblings` (display
    /// order) when it is missing, broken, or out of step with them.
    ///
    /// Returns the new order when something was written.
    pub async fn repair(
        &self,
        dir: &str,
        siblings: &[String],
    ) -> Result<Option<Vec<String>>, ManifestError> {
        let _guard = self.locks.lock(dir).await;
        let loaded = self.load(dir).await;
        let repaired = repaired_names(&loaded.names, siblings);
        if loaded.intact && repaired == loaded.names {
            return Ok(None);
        }
        self.write_unlocked(dir, &repaired).await?;
        info!(path = %manifest_path(dir), entries = repaired.len(), "manifest repaired");
        Ok(Some(repaired))
    }

    pub async fn append(&self, dir: &str, name: &str) -> Result<Vec<String>, ManifestError> {
        self.update(dir, |names| append_name(names, name)).await
    }

    pub async fn remove(&self, dir: &str, name: &str) -> Result<Vec<String>, ManifestError> {
        self.update(dir, |names| remove_name(names, name)).await
    }

    pub async fn replace_in_place(
        &self,
        dir: &str,
        old: &str,
        new: &str,
    ) -> Result<Vec<String>, ManifestError> {
        self.update(dir, |names| replace_name(names, old, new)).await
    }

    pub async fn insert_relative(
        &self,
        dir: &str,
        name: &str,
        anchor: &str,
        placement: Placement,
    ) -> Result<Vec<String>, ManifestError> {
        self.update(dir, |names| insert_relative(names, name, anchor, placement))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalFs;
    use tempfile::TempDir;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> (TempDir, Arc<ManifestStore>) {
        let tmp = TempDir::new().unwrap();
        let fs: Arc<dyn HostFs> = Arc::new(LocalFs::new(tmp.path()));
        (tmp, Arc::new(ManifestStore::new(fs)))
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    #[test]
    fn parse_valid_array() {
        let parsed = parse_manifest(r#"["Quantum", "Schrodinger"]"#);
        assert_eq!(parsed.names, names(&["Quantum", "Schrodinger"]));
        assert!(parsed.problems.is_empty());
    }

    #[test]
    fn parse_non_array_is_empty_with_problem() {
        let parsed = parse_manifest(r#"{"order": ["a"]}"#);
        assert!(parsed.names.is_empty());
        assert_eq!(parsed.problems.len(), 1);
    }

    #[test]
    fn parse_garbage_is_empty_with_problem() {
        let parsed = parse_manifest("[\"a\",");
        assert!(parsed.names.is_empty());
        assert!(parsed.problems[0].contains("invalid manifest JSON"));
    }

    #[test]
    fn parse_drops_non_strings_and_duplicates() {
        let parsed = parse_manifest(r#"["b", 3, "a", "b", null]"#);
        assert_eq!(parsed.names, names(&["b", "a"]));
        assert_eq!(parsed.problems.len(), 3);
    }

    #[test]
    fn manifest_paths() {
        assert_eq!(manifest_path(""), "_meta.json");
        assert_eq!(manifest_path("Physics/Waves"), "Physics/Waves/_meta.json");
    }

    // =========================================================================
    // List operations
    // =========================================================================

    #[test]
    fn append_is_idempotent() {
        let mut list = names(&["a"]);
        assert!(append_name(&mut list, "b"));
        assert!(!append_name(&mut list, "b"));
        assert_eq!(list, names(&["a", "b"]));
    }

    #[test]
    fn remove_reports_change() {
        let mut list = names(&["a", "b"]);
        assert!(remove_name(&mut list, "a"));
        assert!(!remove_name(&mut list, "zzz"));
        assert_eq!(list, names(&["b"]));
    }

    #[test]
    fn replace_keeps_position() {
        let mut list = names(&["a", "b", "c"]);
        assert!(replace_name(&mut list, "b", "beta"));
        assert_eq!(list, names(&["a", "beta", "c"]));
    }

    #[test]
    fn replace_missing_is_noop() {
        let mut list = names(&["a"]);
        assert!(!replace_name(&mut list, "b", "beta"));
        assert_eq!(list, names(&["a"]));
    }

    #[test]
    fn replace_drops_stray_duplicate_of_new_name() {
        let mut list = names(&["new", "a", "old"]);
        assert!(replace_name(&mut list, "old", "new"));
        assert_eq!(list, names(&["a", "new"]));
    }

    #[test]
    fn insert_before_and_after_anchor() {
        let mut list = names(&["a", "b", "c"]);
        assert!(insert_relative(&mut list, "x", "b", Placement::Before));
        assert_eq!(list, names(&["a", "x", "b", "c"]));
        assert!(insert_relative(&mut list, "x", "c", Placement::After));
        assert_eq!(list, names(&["a", "b", "c", "x"]));
    }

    #[test]
    fn insert_relative_falls_back_to_append() {
        let mut list = names(&["a"]);
        assert!(insert_relative(&mut list, "x", "missing", Placement::Before));
        assert_eq!(list, names(&["a", "x"]));
    }

    #[test]
    fn insert_relative_same_position_is_unchanged() {
        let mut list = names(&["a", "x", "b"]);
        assert!(!insert_relative(&mut list, "x", "b", Placement::Before));
    }

    #[test]
    fn step_swaps_with_visible_neighbour() {
        let visible = names(&["Quantum", "Schrodinger", "Zeta"]);
        let mut list = visible.clone();
        assert!(step_name(&mut list, &visible, "Zeta", Direction::Up));
        assert_eq!(list, names(&["Quantum", "Zeta", "Schrodinger"]));
        // A second step works on the list as written, not on the stale view.
        assert!(step_name(&mut list, &visible, "Quantum", Direction::Down));
        assert_eq!(list, names(&["Zeta", "Quantum", "Schrodinger"]));
    }

    #[test]
    fn step_skips_entries_that_are_not_visible() {
        let visible = names(&["a", "b"]);
        let mut list = names(&["a", "gone", "b"]);
        assert!(step_name(&mut list, &visible, "b", Direction::Up));
        assert_eq!(list, names(&["b", "gone", "a"]));
    }

    #[test]
    fn step_completes_the_list_with_unlisted_siblings() {
        let visible = names(&["Meta", "Physics"]);
        let mut list = Vec::new();
        assert!(step_name(&mut list, &visible, "Meta", Direction::Down));
        assert_eq!(list, names(&["Physics", "Meta"]));
    }

    #[test]
    fn step_at_edge_reports_no_move() {
        let visible = names(&["a", "b"]);
        let mut list = visible.clone();
        assert!(!step_name(&mut list, &visible, "a", Direction::Up));
        assert!(!step_name(&mut list, &visible, "b", Direction::Down));
        assert_eq!(list, visible);
    }

    #[test]
    fn repaired_keeps_listed_order_and_appends_the_rest() {
        let listed = names(&["Schrodinger", "gone", "Quantum"]);
        let siblings = names(&["Quantum", "Schrodinger", "Waves"]);
        assert_eq!(
            repaired_names(&listed, &siblings),
            names(&["Schrodinger", "Quantum", "Waves"])
        );
    }

    // =========================================================================
    // Store
    // =========================================================================

    #[tokio::test]
    async fn repair_rewrites_missing_and_corrupt_manifests() {
        let (tmp, store) = store();
        std::fs::create_dir(tmp.path().join("Physics")).unwrap();
        let siblings = names(&["Quantum", "Schrodinger"]);

        let written = store.repair("Physics", &siblings).await.unwrap();
        assert_eq!(written, Some(siblings.clone()));
        assert_eq!(store.read("Physics").await, siblings);

        std::fs::write(tmp.path().join("Physics/_meta.json"), "{\"oops\": 1}").unwrap();
        let written = store.repair("Physics", &siblings).await.unwrap();
        assert_eq!(written, Some(siblings.clone()));
        assert_eq!(store.read("Physics").await, siblings);
    }

    #[tokio::test]
    async fn repair_leaves_complete_manifest_alone() {
        let (tmp, store) = store();
        store.write("", &names(&["Physics", "Meta"])).await.unwrap();
        let before = std::fs::read_to_string(tmp.path().join("_meta.json")).unwrap();

        let written = store.repair("", &names(&["Meta", "Physics"])).await.unwrap();
        assert_eq!(written, None);
        let after = std::fs::read_to_string(tmp.path().join("_meta.json")).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn repair_completes_partial_manifest() {
        let (_tmp, store) = store();
        store.write("", &names(&["Physics", "Ghost"])).await.unwrap();
        let written = store.repair("", &names(&["Meta", "Physics"])).await.unwrap();
        assert_eq!(written, Some(names(&["Physics", "Meta"])));
    }

    #[tokio::test]
    async fn missing_and_corrupt_manifests_read_empty() {
        let (tmp, store) = store();
        assert!(store.read("Physics").await.is_empty());

        std::fs::create_dir(tmp.path().join("Physics")).unwrap();
        std::fs::write(tmp.path().join("Physics/_meta.json"), "not json").unwrap();
        assert!(store.read("Physics").await.is_empty());
    }

    #[tokio::test]
    async fn write_is_pretty_json_array() {
        let (tmp, store) = store();
        store.write("", &names(&["Physics", "Meta"])).await.unwrap();
        let text = std::fs::read_to_string(tmp.path().join("_meta.json")).unwrap();
        assert_eq!(text, "[\n  \"Physics\",\n  \"Meta\"\n]");
    }

    #[tokio::test]
    async fn unchanged_update_does_not_create_file() {
        let (tmp, store) = store();
        store.remove("", "ghost").await.unwrap();
        assert!(!tmp.path().join("_meta.json").exists());
    }

    #[tokio::test]
    async fn helpers_round_trip_through_disk() {
        let (_tmp, store) = store();
        store.append("Physics", "Quantum").await.unwrap();
        store.append("Physics", "Waves").await.unwrap();
        store
            .insert_relative("Physics", "Optics", "Waves", Placement::Before)
            .await
            .unwrap();
        store
            .replace_in_place("Physics", "Quantum", "QM")
            .await
            .unwrap();
        store.remove("Physics", "Waves").await.unwrap();
        assert_eq!(store.read("Physics").await, names(&["QM", "Optics"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_to_one_directory_are_not_lost() {
        let (_tmp, store) = store();
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.append("Physics", &format!("doc-{i:02}")).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut listed = store.read("Physics").await;
        assert_eq!(listed.len(), 50);
        listed.sort();
        assert_eq!(listed.first().map(String::as_str), Some("doc-00"));
        assert_eq!(listed.last().map(String::as_str), Some("doc-49"));
    }
}
