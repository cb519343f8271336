//! Mutation engine: create, delete, rename, reorder and move.
//!
//! Every operation follows the same shape:
//!
//! 1. resolve the affected nodes against the current published snapshot
//! 2. change the disk through [`HostFs`]
//! 3. update the affected order manifest(s) through [`ManifestStore`]
//! 4. request a rescan from the [`Dispatcher`]
//!
//! Step 4 happens whether or not the operation succeeded, since a partially
//! applied change (say, a rename that went through before its manifest write
//! failed) is reconciled by the next scan rather than rolled back. The
//! returned [`Applied::ticket`] lets callers wait for that scan.
//!
//! The engine never edits the index itself. Until the rescan lands, nodes
//! below a renamed, moved or deleted entry still carry their old ids in the
//! snapshot; operations addressing them fail with
//! [`MutationError::StaleNode`] instead of acting on paths that no longer
//! exist.

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use serde_yaml::Value;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::WikiConfig;
use crate::dispatch::{Dispatcher, ScanTicket, Snapshot};
use crate::frontmatter::{self, FrontmatterError};
use crate::host::HostFs;
use crate::manifest::{self, ManifestError, ManifestStore};
use crate::naming::{self, CONFIG_FILE};
use crate::tree;
use crate::types::{Direction, DropPosition, MoveTarget, Node, NodeKind, Placement};

/// Category written into documents created at the top level.
pub const DEFAULT_CATEGORY: &str = "General";

#[derive(Error, Debug)]
pub enum MutationError {
    #[error("name must not be empty")]
    EmptyName,
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("no index has been published yet")]
    NotIndexed,
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("'{0}' already exists")]
    AlreadyExists(String),
    #[error("'{0}' is not a folder")]
    InvalidParent(String),
    #[error("'{0}' is not a document")]
    NotADocument(String),
    #[error("invalid move: {0}")]
    InvalidMove(String),
    #[error("'{0}' changed on disk and the index has not caught up yet; retry after the next scan")]
    StaleNode(String),
    #[error("{op} failed for '{path}': {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("front matter error in '{path}': {source}")]
    Frontmatter {
        path: String,
        #[source]
        source: FrontmatterError,
    },
    #[error("failed to serialize wiki config: {0}")]
    Config(#[from] serde_json::Error),
}

/// A successful mutation plus the scan ticket that will reflect it.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied<T> {
    pub value: T,
    pub ticket: ScanTicket,
}

/// Structured outcome for UI and IPC consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl OpReport {
    pub fn success(message: impl Into<String>, id: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            id,
        }
    }

    pub fn failure(error: &MutationError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            id: None,
        }
    }
}

#[derive(Debug)]
struct StaleEntry {
    id: String,
    until: ScanTicket,
}

fn io_error(op: &'static str, path: &str) -> impl FnOnce(io::Error) -> MutationError {
    let path = path.to_string();
    move |source| MutationError::Io { op, path, source }
}

/// Root-relative path of a node on disk.
fn disk_path(node: &Node) -> &str {
    match node {
        Node::Document(doc) => &doc.file_path,
        Node::Folder(folder) => &folder.id,
    }
}

/// Directory holding a node's manifest entry (`""` for the root).
fn manifest_dir(node: &Node) -> &str {
    node.parent_id().unwrap_or_default()
}

pub struct MutationEngine {
    fs: Arc<dyn HostFs>,
    manifests: ManifestStore,
    dispatcher: Dispatcher,
    stale: Mutex<Vec<StaleEntry>>,
}

impl MutationEngine {
    pub fn new(fs: Arc<dyn HostFs>, dispatcher: Dispatcher) -> Self {
        Self {
            manifests: ManifestStore::new(Arc::clone(&fs)),
            fs,
            dispatcher,
            stale: Mutex::new(Vec::new()),
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Create a document or folder called `name` under `parent_id` (`None` = root).
    /// Returns the new id.
    pub async fn create(
        &self,
        name: &str,
        parent_id: Option<&str>,
        kind: NodeKind,
    ) -> Result<Applied<String>, MutationError> {
        let result = self.create_node(name, parent_id, kind).await;
        self.finish("create", result)
    }

    /// Delete a node; folders are removed with everything below them.
    pub async fn delete(&self, id: &str) -> Result<Applied<String>, MutationError> {
        let result = self.delete_node(id).await;
        self.finish("delete", result)
    }

    /// Rename a node in place, keeping its manifest position. Returns the new id.
    pub async fn rename(&self, id: &str, new_name: &str) -> Result<Applied<String>, MutationError> {
        let result = self.rename_node(id, new_name).await;
        self.finish("rename", result)
    }

    /// Swap a node with its neighbour among its siblings. `false` when already at the edge.
    pub async fn reorder(
        &self,
        id: &str,
        direction: Direction,
    ) -> Result<Applied<bool>, MutationError> {
        let result = self.reorder_node(id, direction).await;
        self.finish("reorder", result)
    }

    /// Move a node relative to `target`. Returns the node's id after the move.
    pub async fn move_node(
        &self,
        id: &str,
        target: &MoveTarget,
        position: DropPosition,
    ) -> Result<Applied<String>, MutationError> {
        let result = self.relocate(id, target, position).await;
        self.finish("move", result)
    }

    /// Rewrite every missing, broken or incomplete order manifest as the
    /// sibling order the current index displays. Returns the manifest paths
    /// that were written.
    pub async fn repair_manifests(&self) -> Result<Applied<Vec<String>>, MutationError> {
        let result = self.repair_all().await;
        self.finish("repair", result)
    }

    /// Current text of a document, front matter included, read from disk.
    pub async fn read_source(&self, id: &str) -> Result<String, MutationError> {
        let snapshot = self.snapshot()?;
        let path = self.document_path(&snapshot, id)?;
        self.fs
            .read_file(&path)
            .await
            .map_err(io_error("read", &path))
    }

    /// Replace a document's full text.
    pub async fn write_source(&self, id: &str, text: &str) -> Result<Applied<()>, MutationError> {
        let result = async {
            let snapshot = self.snapshot()?;
            let path = self.document_path(&snapshot, id)?;
            self.fs
                .write_file(&path, text)
                .await
                .map_err(io_error("write", &path))
        }
        .await;
        self.finish("save", result)
    }

    /// Persist the wiki config to `_config.json`.
    pub async fn save_config(&self, config: &WikiConfig) -> Result<Applied<()>, MutationError> {
        let result = async {
            let text = serde_json::to_string_pretty(config)?;
            self.fs
                .write_file(CONFIG_FILE, &text)
                .await
                .map_err(io_error("write", CONFIG_FILE))
        }
        .await;
        self.finish("save-config", result)
    }

    // =========================================================================
    // Bookkeeping
    // =========================================================================

    fn finish<T>(
        &self,
        op: &'static str,
        result: Result<T, MutationError>,
    ) -> Result<Applied<T>, MutationError> {
        let ticket = self.dispatcher.request_scan();
        match &result {
            Ok(_) => info!(op, ticket = ticket.get(), "mutation applied"),
            Err(error) => warn!(op, %error, "mutation failed"),
        }
        result.map(|value| Applied { value, ticket })
    }

    fn snapshot(&self) -> Result<Arc<Snapshot>, MutationError> {
        self.dispatcher.current().ok_or(MutationError::NotIndexed)
    }

    /// Fail if `id` lies in a subtree whose on-disk location changed after
    /// the current snapshot was taken.
    fn ensure_fresh(&self, id: &str) -> Result<(), MutationError> {
        let covered = self.dispatcher.covered();
        let mut stale = self.stale.lock();
        stale.retain(|entry| entry.until.get() > covered);
        if stale
            .iter()
            .any(|entry| naming::is_same_or_descendant(id, &entry.id))
        {
            return Err(MutationError::StaleNode(id.to_string()));
        }
        Ok(())
    }

    /// Record that `id` and its subtree moved on disk; cleared by the next scan.
    fn mark_stale(&self, id: &str) {
        let until = self.dispatcher.request_scan();
        debug!(id, until = until.get(), "subtree stale until rescan");
        self.stale.lock().push(StaleEntry {
            id: id.to_string(),
            until,
        });
    }

    fn lookup<'s>(&self, snapshot: &'s Snapshot, id: &str) -> Result<&'s Node, MutationError> {
        self.ensure_fresh(id)?;
        snapshot
            .index
            .get(id)
            .ok_or_else(|| MutationError::NotFound(id.to_string()))
    }

    fn document_path(&self, snapshot: &Snapshot, id: &str) -> Result<String, MutationError> {
        match self.lookup(snapshot, id)? {
            Node::Document(doc) => Ok(doc.file_path.clone()),
            Node::Folder(_) => Err(MutationError::NotADocument(id.to_string())),
        }
    }

    // =========================================================================
    // Implementations
    // =========================================================================

    async fn create_node(
        &self,
        name: &str,
        parent_id: Option<&str>,
        kind: NodeKind,
    ) -> Result<String, MutationError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MutationError::EmptyName);
        }
        let (base, file_name) = match kind {
            NodeKind::Document => {
                let base = naming::base_name(name, false).to_string();
                let file_name = naming::document_file_name(&base);
                (base, file_name)
            }
            NodeKind::Folder => (name.to_string(), name.to_string()),
        };
        naming::validate_entry_name(&file_name).map_err(MutationError::InvalidName)?;

        let snapshot = self.snapshot()?;
        let parent_id = parent_id.filter(|p| !p.is_empty());
        if let Some(parent) = parent_id {
            for segment in parent.split('/') {
                naming::validate_entry_name(segment).map_err(MutationError::InvalidName)?;
            }
            self.ensure_fresh(parent)?;
            if let Some(node) = snapshot.index.get(parent)
                && !node.is_folder()
            {
                return Err(MutationError::InvalidParent(parent.to_string()));
            }
        }

        let id = naming::join_id(parent_id, &base);
        if snapshot.index.contains(&id) {
            return Err(MutationError::AlreadyExists(id));
        }
        let path = naming::join_id(parent_id, &file_name);

        match kind {
            NodeKind::Document => {
                let category = parent_id.map(naming::top_segment).unwrap_or(DEFAULT_CATEGORY);
                let mut doc = frontmatter::Document::default();
                doc.set("title", base.as_str());
                doc.set("slug", naming::slugify(&base));
                doc.set("date", Utc::now().format("%Y-%m-%d").to_string());
                doc.set("tags", Value::Sequence(Vec::new()));
                doc.set("category", category);
                let text = frontmatter::stringify(&doc.data, "\n").map_err(|source| {
                    MutationError::Frontmatter {
                        path: path.clone(),
                        source,
                    }
                })?;
                self.fs.create_file(&path, &text).await.map_err(|e| {
                    if e.kind() == io::ErrorKind::AlreadyExists {
                        MutationError::AlreadyExists(id.clone())
                    } else {
                        io_error("create", &path)(e)
                    }
                })?;
            }
            NodeKind::Folder => {
                self.fs
                    .create_dir(&path)
                    .await
                    .map_err(io_error("create", &path))?;
            }
        }

        self.manifests
            .append(parent_id.unwrap_or_default(), &base)
            .await?;
        Ok(id)
    }

    async fn delete_node(&self, id: &str) -> Result<String, MutationError> {
        let snapshot = self.snapshot()?;
        let node = self.lookup(&snapshot, id)?;
        let path = disk_path(node);

        self.fs
            .delete_file(path)
            .await
            .map_err(io_error("delete", path))?;
        self.mark_stale(id);
        self.manifests
            .remove(manifest_dir(node), node.base_name())
            .await?;
        Ok(id.to_string())
    }

    async fn rename_node(&self, id: &str, new_name: &str) -> Result<String, MutationError> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(MutationError::EmptyName);
        }
        let snapshot = self.snapshot()?;
        let node = self.lookup(&snapshot, id)?;

        let (base, file_name) = if node.is_folder() {
            (new_name.to_string(), new_name.to_string())
        } else {
            let base = naming::base_name(new_name, false).to_string();
            let file_name = naming::document_file_name(&base);
            (base, file_name)
        };
        naming::validate_entry_name(&file_name).map_err(MutationError::InvalidName)?;
        if file_name == node.file_name() {
            debug!(id, "rename to the current name ignored");
            return Ok(id.to_string());
        }

        let parent = node.parent_id();
        let new_id = naming::join_id(parent, &base);
        if new_id != id && snapshot.index.contains(&new_id) {
            return Err(MutationError::AlreadyExists(new_id));
        }

        let old_path = disk_path(node);
        if let Node::Document(_) = node
            && let Err(error) = self.retitle(old_path, &base).await
        {
            warn!(path = old_path, %error, "front matter not updated during rename");
        }

        let new_path = naming::join_id(parent, &file_name);
        self.fs
            .rename_path(old_path, &new_path)
            .await
            .map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists {
                    MutationError::AlreadyExists(new_id.clone())
                } else {
                    io_error("rename", old_path)(e)
                }
            })?;
        self.mark_stale(id);
        self.manifests
            .replace_in_place(manifest_dir(node), node.base_name(), &base)
            .await?;
        Ok(new_id)
    }

    /// Rewrite a document's `title` and `slug` for its new name.
    async fn retitle(&self, path: &str, base: &str) -> Result<(), MutationError> {
        let text = self
            .fs
            .read_file(path)
            .await
            .map_err(io_error("read", path))?;
        let frontmatter_error = |source| MutationError::Frontmatter {
            path: path.to_string(),
            source,
        };
        let mut doc = frontmatter::parse(&text).map_err(frontmatter_error)?;
        doc.set("title", base);
        doc.set("slug", naming::loose_slug(base));
        let text = frontmatter::stringify(&doc.data, &doc.body).map_err(frontmatter_error)?;
        self.fs
            .write_file(path, &text)
            .await
            .map_err(io_error("write", path))
    }

    async fn reorder_node(&self, id: &str, direction: Direction) -> Result<bool, MutationError> {
        let snapshot = self.snapshot()?;
        let node = self.lookup(&snapshot, id)?;

        // The step is taken on the manifest read under the directory lock, so
        // an earlier unscanned write to the same directory is built upon.
        let visible: Vec<String> =
            tree::sorted_children(&snapshot.index, snapshot.index.effective_parent(node))
                .iter()
                .map(|n| n.base_name().to_string())
                .collect();
        let base = node.base_name();
        let mut moved = false;
        self.manifests
            .update(manifest_dir(node), |names| {
                moved = manifest::step_name(names, &visible, base, direction);
                moved
            })
            .await?;
        if !moved {
            debug!(id, ?direction, "already at the edge");
        }
        Ok(moved)
    }

    async fn repair_all(&self) -> Result<Vec<String>, MutationError> {
        let snapshot = self.snapshot()?;
        let folders = snapshot
            .index
            .iter()
            .filter(|n| n.is_folder())
            .map(|n| Some(n.id()));

        let mut repaired = Vec::new();
        for parent in std::iter::once(None).chain(folders) {
            if let Some(id) = parent
                && self.ensure_fresh(id).is_err()
            {
                continue;
            }
            let siblings: Vec<String> = tree::sorted_children(&snapshot.index, parent)
                .iter()
                .map(|n| n.base_name().to_string())
                .collect();
            if siblings.is_empty() {
                continue;
            }
            let dir = parent.unwrap_or_default();
            if self.manifests.repair(dir, &siblings).await?.is_some() {
                repaired.push(manifest::manifest_path(dir));
            }
        }
        Ok(repaired)
    }

    async fn relocate(
        &self,
        id: &str,
        target: &MoveTarget,
        position: DropPosition,
    ) -> Result<String, MutationError> {
        let snapshot = self.snapshot()?;
        let node = self.lookup(&snapshot, id)?;

        let (dest_parent, anchor): (Option<&str>, Option<(&str, Placement)>) = match target {
            MoveTarget::Root => (None, None),
            MoveTarget::Node(target_id) => {
                if target_id == id {
                    return Err(MutationError::InvalidMove(format!(
                        "cannot move '{id}' onto itself"
                    )));
                }
                if naming::is_descendant(target_id, id) {
                    return Err(MutationError::InvalidMove(format!(
                        "cannot move '{id}' into its own descendant '{target_id}'"
                    )));
                }
                let target_node = self.lookup(&snapshot, target_id)?;
                match position.placement() {
                    None if !target_node.is_folder() => {
                        return Err(MutationError::InvalidMove(format!(
                            "cannot drop inside document '{target_id}'"
                        )));
                    }
                    None => (Some(target_node.id()), None),
                    Some(placement) => (
                        target_node.parent_id(),
                        Some((target_node.base_name(), placement)),
                    ),
                }
            }
        };

        let base = node.base_name();
        let source_parent = node.parent_id();
        let source_dir = manifest_dir(node);

        if dest_parent == source_parent {
            match anchor {
                Some((anchor, placement)) => {
                    self.manifests
                        .insert_relative(source_dir, base, anchor, placement)
                        .await?;
                }
                None => {
                    self.manifests
                        .update(source_dir, |names| {
                            let before = names.clone();
                            manifest::remove_name(names, base);
                            names.push(base.to_string());
                            *names != before
                        })
                        .await?;
                }
            }
            return Ok(id.to_string());
        }

        let new_id = naming::join_id(dest_parent, base);
        if snapshot.index.contains(&new_id) {
            return Err(MutationError::AlreadyExists(new_id));
        }
        let from = disk_path(node);
        let to = naming::join_id(dest_parent, node.file_name());
        self.fs.rename_path(from, &to).await.map_err(|e| {
            if e.kind() == io::ErrorKind::AlreadyExists {
                MutationError::AlreadyExists(new_id.clone())
            } else {
                io_error("move", from)(e)
            }
        })?;
        self.mark_stale(id);

        self.manifests.remove(source_dir, base).await?;
        let dest_dir = dest_parent.unwrap_or_default();
        match anchor {
            Some((anchor, placement)) => {
                self.manifests
                    .insert_relative(dest_dir, base, anchor, placement)
                    .await?;
            }
            None => {
                self.manifests.append(dest_dir, base).await?;
            }
        }
        Ok(new_id)
    }
}
