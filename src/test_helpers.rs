//! Shared test utilities for the metawiki test suite.
//!
//! Provides fixture setup, lookup helpers that panic with the list of what
//! *was* there, and small builders for hand-made indexes.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! let scan = scan(tmp.path()).unwrap();
//!
//! let doc = find_document(&scan.index, "Physics/Schrodinger");
//! assert_eq!(doc.slug.as_deref(), Some("physics-se"));
//!
//! assert_child_order(&scan.index, Some("Physics"), &["Quantum", "Schrodinger"]);
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

use crate::manifest::{manifest_path, parse_manifest};
use crate::naming;
use crate::tree::sorted_children;
use crate::types::{Document, Folder, Index, Node};

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/content/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Read a file below `root` as text. Panics if missing.
pub fn read(root: &Path, rel: &str) -> String {
    std::fs::read_to_string(root.join(rel))
        .unwrap_or_else(|e| panic!("failed to read '{rel}': {e}"))
}

/// Names listed in `dir`'s order manifest, empty if there is none.
pub fn read_manifest(root: &Path, dir: &str) -> Vec<String> {
    match std::fs::read_to_string(root.join(manifest_path(dir))) {
        Ok(text) => parse_manifest(&text).names,
        Err(_) => Vec::new(),
    }
}

// =========================================================================
// Index lookups, panic with a clear message on miss
// =========================================================================

/// Find any node by id. Panics if not found.
pub fn find_node<'a>(index: &'a Index, id: &str) -> &'a Node {
    index.get(id).unwrap_or_else(|| {
        let ids: Vec<&str> = index.ids().collect();
        panic!("node '{id}' not found. Available: {ids:?}")
    })
}

/// Find a document by id. Panics if missing or a folder.
pub fn find_document<'a>(index: &'a Index, id: &str) -> &'a Document {
    match find_node(index, id) {
        Node::Document(doc) => doc,
        Node::Folder(_) => panic!("'{id}' is a folder, expected a document"),
    }
}

/// Assert the display order of `parent`'s children by leaf name.
pub fn assert_child_order(index: &Index, parent: Option<&str>, expected: &[&str]) {
    let actual: Vec<&str> = sorted_children(index, parent)
        .into_iter()
        .map(|n| naming::leaf_of(n.id()))
        .collect();
    assert_eq!(actual, expected, "children of {parent:?}");
}

// =========================================================================
// Builders
// =========================================================================

pub fn index_of(nodes: Vec<Node>) -> Index {
    let mut index = Index::new();
    for node in nodes {
        if let Err(node) = index.insert(node) {
            panic!("duplicate id '{}'", node.id());
        }
    }
    index
}

/// A folder at `id` with the given sort index.
pub fn folder_at(id: &str, sort_index: u32) -> Node {
    Node::Folder(Folder {
        id: id.to_string(),
        parent_id: naming::parent_of(id).map(String::from),
        title: naming::leaf_of(id).to_string(),
        sort_index,
        file_name: naming::leaf_of(id).to_string(),
        category: naming::top_segment(id).to_string(),
    })
}

/// A document at `id` with the given sort index and an empty body.
pub fn document_at(id: &str, sort_index: u32) -> Node {
    let leaf = naming::leaf_of(id);
    let file_name = naming::document_file_name(leaf);
    Node::Document(Document {
        id: id.to_string(),
        parent_id: naming::parent_of(id).map(String::from),
        title: leaf.to_string(),
        sort_index,
        file_path: naming::join_id(naming::parent_of(id), &file_name),
        file_name,
        slug: None,
        tags: Vec::new(),
        category: naming::top_segment(id).to_string(),
        date: None,
        content: String::new(),
        extra: BTreeMap::new(),
    })
}
