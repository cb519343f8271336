//! Shared types: the node model, the flat index, and mutation vocabulary.
//!
//! A [`Node`] is either a [`Folder`] or a [`Document`]. Both are owned by the
//! flat [`Index`], keyed by id. Nothing in here links nodes to each other;
//! hierarchy is derived on demand by [`crate::tree`].
//!
//! Nodes serialize to the flat record shape static consumers read from the
//! bundle (`id`, `parentId`, `isFolder`, `title`, `sortIndex`, ...), with any
//! extra front matter keys of a document flattened alongside.

use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::naming;

/// Sort index given to entries missing from their directory's manifest.
pub const SORT_SENTINEL: u32 = 9999;

/// A directory in the content root, explicit or implied by a document path.
#[derive(Debug, Clone, PartialEq)]
pub struct Folder {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub sort_index: u32,
    /// Directory name on disk.
    pub file_name: String,
    /// Top path segment of the folder's id.
    pub category: String,
}

/// A Markdown document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub parent_id: Option<String>,
    pub title: String,
    pub sort_index: u32,
    /// File name on disk, extension included.
    pub file_name: String,
    /// Path relative to the content root, `/`-separated.
    pub file_path: String,
    pub slug: Option<String>,
    pub tags: Vec<String>,
    /// Front matter `category`, else the top segment of the id.
    pub category: String,
    pub date: Option<String>,
    /// Raw Markdown body (front matter removed).
    pub content: String,
    /// Remaining front matter keys, carried through unchanged.
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Folder(Folder),
    Document(Document),
}

/// Discriminator used when creating entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    Document,
}

impl Node {
    pub fn id(&self) -> &str {
        match self {
            Node::Folder(f) => &f.id,
            Node::Document(d) => &d.id,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            Node::Folder(f) => f.parent_id.as_deref(),
            Node::Document(d) => d.parent_id.as_deref(),
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Node::Folder(f) => &f.title,
            Node::Document(d) => &d.title,
        }
    }

    pub fn sort_index(&self) -> u32 {
        match self {
            Node::Folder(f) => f.sort_index,
            Node::Document(d) => d.sort_index,
        }
    }

    pub(crate) fn set_sort_index(&mut self, index: u32) {
        match self {
            Node::Folder(f) => f.sort_index = index,
            Node::Document(d) => d.sort_index = index,
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Node::Folder(f) => &f.file_name,
            Node::Document(d) => &d.file_name,
        }
    }

    /// Manifest entry for this node: file name without the document extension.
    pub fn base_name(&self) -> &str {
        naming::base_name(self.file_name(), self.is_folder())
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, Node::Folder(_))
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Node::Document(d) => Some(d),
            Node::Folder(_) => None,
        }
    }
}

/// Flat wire shape of a node.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeRecord<'a> {
    id: &'a str,
    parent_id: Option<&'a str>,
    is_folder: bool,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    slug: Option<&'a str>,
    sort_index: u32,
    file_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<&'a str>,
    category: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    date: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(flatten)]
    extra: Option<&'a BTreeMap<String, JsonValue>>,
}

impl Serialize for Node {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let record = match self {
            Node::Folder(f) => NodeRecord {
                id: &f.id,
                parent_id: f.parent_id.as_deref(),
                is_folder: true,
                title: &f.title,
                slug: None,
                sort_index: f.sort_index,
                file_name: &f.file_name,
                file_path: None,
                category: &f.category,
                tags: None,
                date: None,
                content: None,
                extra: None,
            },
            Node::Document(d) => NodeRecord {
                id: &d.id,
                parent_id: d.parent_id.as_deref(),
                is_folder: false,
                title: &d.title,
                slug: d.slug.as_deref(),
                sort_index: d.sort_index,
                file_name: &d.file_name,
                file_path: Some(&d.file_path),
                category: &d.category,
                tags: Some(&d.tags),
                date: d.date.as_deref(),
                content: Some(&d.content),
                extra: Some(&d.extra),
            },
        };
        record.serialize(serializer)
    }
}

/// Front matter keys that never pass through into `extra`.
pub const RESERVED_KEYS: &[&str] = &[
    "id",
    "parentId",
    "isFolder",
    "title",
    "slug",
    "sortIndex",
    "fileName",
    "filePath",
    "category",
    "tags",
    "date",
    "content",
    "children",
];

/// The flat set of nodes for one content root, keyed by id.
///
/// Keying by id makes duplicates unrepresentable and gives every consumer the
/// same deterministic iteration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Index {
    nodes: BTreeMap<String, Node>,
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a node. Returns the node back if its id is already taken.
    pub fn insert(&mut self, node: Node) -> Result<(), Node> {
        if self.nodes.contains_key(node.id()) {
            return Err(node);
        }
        self.nodes.insert(node.id().to_string(), node);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    /// Direct children of `parent` (`None` = top level), in id order.
    ///
    /// A node whose parent id does not resolve to a folder counts as top level.
    pub fn children_of(&self, parent: Option<&str>) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| self.effective_parent(n) == parent)
            .collect()
    }

    /// The node's parent id if it resolves to a folder in this index.
    pub fn effective_parent<'a>(&self, node: &'a Node) -> Option<&'a str> {
        node.parent_id()
            .filter(|p| matches!(self.nodes.get(*p), Some(Node::Folder(_))))
    }

    pub fn folder_count(&self) -> usize {
        self.nodes.values().filter(|n| n.is_folder()).count()
    }

    pub fn document_count(&self) -> usize {
        self.nodes.len() - self.folder_count()
    }
}

impl Serialize for Index {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.nodes.values())
    }
}

/// A non-fatal problem found while scanning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanWarning {
    /// Path relative to the content root.
    pub path: String,
    pub message: String,
}

impl ScanWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Direction for single-step reordering among siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Direction {
    Up,
    Down,
}

/// Where an item lands relative to an anchor in a manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Before,
    After,
}

/// Drop intent produced by the tree UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DropPosition {
    Before,
    After,
    Inside,
}

impl DropPosition {
    /// Infer the drop intent from the pointer's vertical position over a target row.
    ///
    /// `ratio` is measured from the top of the row (0.0) to its bottom (1.0).
    /// Folders split into thirds-ish bands (`< 0.25` before, `> 0.75` after,
    /// inside otherwise); documents split in half.
    pub fn infer(ratio: f64, target_is_folder: bool) -> Self {
        let ratio = if ratio.is_nan() { 0.5 } else { ratio.clamp(0.0, 1.0) };
        if target_is_folder {
            if ratio < 0.25 {
                DropPosition::Before
            } else if ratio > 0.75 {
                DropPosition::After
            } else {
                DropPosition::Inside
            }
        } else if ratio < 0.5 {
            DropPosition::Before
        } else {
            DropPosition::After
        }
    }

    pub fn placement(self) -> Option<Placement> {
        match self {
            DropPosition::Before => Some(Placement::Before),
            DropPosition::After => Some(Placement::After),
            DropPosition::Inside => None,
        }
    }
}

/// Destination of a move: the content root or an existing node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Root,
    Node(String),
}

impl MoveTarget {
    /// Spelling of the root target at text boundaries (CLI, IPC).
    pub const ROOT: &'static str = ":root";

    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() || raw == Self::ROOT {
            MoveTarget::Root
        } else {
            MoveTarget::Node(raw.to_string())
        }
    }

    /// Resolve a drop onto this target. The root affordance always means inside.
    pub fn drop_position(&self, ratio: f64, target_is_folder: bool) -> DropPosition {
        match self {
            MoveTarget::Root => DropPosition::Inside,
            MoveTarget::Node(_) => DropPosition::infer(ratio, target_is_folder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str) -> Node {
        Node::Folder(Folder {
            id: id.to_string(),
            parent_id: naming::parent_of(id).map(String::from),
            title: naming::leaf_of(id).to_string(),
            sort_index: SORT_SENTINEL,
            file_name: naming::leaf_of(id).to_string(),
            category: naming::top_segment(id).to_string(),
        })
    }

    fn document(id: &str) -> Node {
        let leaf = naming::leaf_of(id);
        Node::Document(Document {
            id: id.to_string(),
            parent_id: naming::parent_of(id).map(String::from),
            title: leaf.to_string(),
            sort_index: SORT_SENTINEL,
            file_name: format!("{leaf}.md"),
            file_path: format!("{id}.md"),
            slug: None,
            tags: vec![],
            category: naming::top_segment(id).to_string(),
            date: None,
            content: String::new(),
            extra: BTreeMap::new(),
        })
    }

    #[test]
    fn index_rejects_duplicate_ids() {
        let mut index = Index::new();
        index.insert(folder("Physics")).unwrap();
        assert!(index.insert(document("Physics")).is_err());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn unresolvable_parent_counts_as_top_level() {
        let mut index = Index::new();
        index.insert(document("Ghost/Orphan")).unwrap();
        index.insert(folder("Meta")).unwrap();
        let top: Vec<&str> = index.children_of(None).iter().map(|n| n.id()).collect();
        assert_eq!(top, vec!["Ghost/Orphan", "Meta"]);
    }

    #[test]
    fn base_name_strips_document_extension() {
        assert_eq!(document("Physics/Quantum").base_name(), "Quantum");
        assert_eq!(folder("Physics").base_name(), "Physics");
    }

    #[test]
    fn folder_record_shape() {
        let json = serde_json::to_value(folder("Physics/Waves")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "id": "Physics/Waves",
                "parentId": "Physics",
                "isFolder": true,
                "title": "Waves",
                "sortIndex": 9999,
                "fileName": "Waves",
                "category": "Physics",
            })
        );
    }

    #[test]
    fn document_record_flattens_extra_keys() {
        let Node::Document(mut doc) = document("Meta") else {
            unreachable!()
        };
        doc.extra
            .insert("author".to_string(), JsonValue::String("Ada".to_string()));
        let json = serde_json::to_value(Node::Document(doc)).unwrap();
        assert_eq!(json["parentId"], JsonValue::Null);
        assert_eq!(json["isFolder"], JsonValue::Bool(false));
        assert_eq!(json["filePath"], "Meta.md");
        assert_eq!(json["author"], "Ada");
        assert!(json.get("slug").is_none());
    }

    #[test]
    fn drop_inference_on_folders() {
        assert_eq!(DropPosition::infer(0.1, true), DropPosition::Before);
        assert_eq!(DropPosition::infer(0.25, true), DropPosition::Inside);
        assert_eq!(DropPosition::infer(0.5, true), DropPosition::Inside);
        assert_eq!(DropPosition::infer(0.75, true), DropPosition::Inside);
        assert_eq!(DropPosition::infer(0.9, true), DropPosition::After);
    }

    #[test]
    fn drop_inference_on_documents() {
        assert_eq!(DropPosition::infer(0.0, false), DropPosition::Before);
        assert_eq!(DropPosition::infer(0.49, false), DropPosition::Before);
        assert_eq!(DropPosition::infer(0.5, false), DropPosition::After);
        assert_eq!(DropPosition::infer(1.0, false), DropPosition::After);
    }

    #[test]
    fn drop_inference_clamps_out_of_range() {
        assert_eq!(DropPosition::infer(-3.0, true), DropPosition::Before);
        assert_eq!(DropPosition::infer(7.0, false), DropPosition::After);
        assert_eq!(DropPosition::infer(f64::NAN, true), DropPosition::Inside);
    }

    #[test]
    fn root_target_always_drops_inside() {
        let root = MoveTarget::parse(MoveTarget::ROOT);
        assert_eq!(root, MoveTarget::Root);
        assert_eq!(root.drop_position(0.0, false), DropPosition::Inside);
        assert_eq!(
            MoveTarget::parse("Physics").drop_position(0.0, true),
            DropPosition::Before
        );
    }
}
