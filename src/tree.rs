//! Tree construction over a flat [`Index`].
//!
//! The index stays flat and owns every node. A [`Tree`] is a disposable view
//! on top of it: an arena of entries that borrow their node and refer to
//! their children by [`Handle`]. Building one never mutates the index, so
//! building twice yields the same structure.
//!
//! Siblings are ordered by [`compare_siblings`]:
//!
//! 1. `sort_index` ascending
//! 2. folders before documents
//! 3. title, case-insensitively
//! 4. id, so that the order is total

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;

use crate::types::{Index, Node};

/// Position of an entry in a [`Tree`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

#[derive(Debug)]
struct Entry<'a> {
    node: &'a Node,
    depth: usize,
    children: Vec<Handle>,
}

/// Parent-to-children view of an index.
#[derive(Debug)]
pub struct Tree<'a> {
    entries: Vec<Entry<'a>>,
    roots: Vec<Handle>,
    by_id: HashMap<&'a str, Handle>,
}

/// Total order among siblings.
pub fn compare_siblings(a: &Node, b: &Node) -> Ordering {
    a.sort_index()
        .cmp(&b.sort_index())
        .then_with(|| b.is_folder().cmp(&a.is_folder()))
        .then_with(|| a.title().to_lowercase().cmp(&b.title().to_lowercase()))
        .then_with(|| a.id().cmp(b.id()))
}

/// Children of `parent` (`None` = top level) in display order.
pub fn sorted_children<'a>(index: &'a Index, parent: Option<&str>) -> Vec<&'a Node> {
    let mut children = index.children_of(parent);
    children.sort_by(|a, b| compare_siblings(a, b));
    children
}

/// Build the tree view of `index`.
pub fn build(index: &Index) -> Tree<'_> {
    let mut by_id = HashMap::with_capacity(index.len());
    let mut entries: Vec<Entry<'_>> = index
        .iter()
        .enumerate()
        .map(|(i, node)| {
            by_id.insert(node.id(), Handle(i));
            Entry {
                node,
                depth: 0,
                children: Vec::new(),
            }
        })
        .collect();

    let mut roots = Vec::new();
    for i in 0..entries.len() {
        let parent = index
            .effective_parent(entries[i].node)
            .and_then(|p| by_id.get(p).copied());
        match parent {
            Some(Handle(p)) => entries[p].children.push(Handle(i)),
            None => roots.push(Handle(i)),
        }
    }

    let sort = |handles: &mut Vec<Handle>, entries: &[Entry<'_>]| {
        handles.sort_by(|a, b| compare_siblings(entries[a.0].node, entries[b.0].node));
    };
    sort(&mut roots, &entries);
    for i in 0..entries.len() {
        let mut children = std::mem::take(&mut entries[i].children);
        sort(&mut children, &entries);
        entries[i].children = children;
    }

    // Depths, top-down from the roots.
    let mut stack: Vec<(Handle, usize)> = roots.iter().map(|h| (*h, 0)).collect();
    while let Some((Handle(i), depth)) = stack.pop() {
        entries[i].depth = depth;
        stack.extend(entries[i].children.iter().map(|h| (*h, depth + 1)));
    }

    Tree {
        entries,
        roots,
        by_id,
    }
}

impl<'a> Tree<'a> {
    pub fn roots(&self) -> &[Handle] {
        &self.roots
    }

    pub fn node(&self, handle: Handle) -> &'a Node {
        self.entries[handle.0].node
    }

    pub fn children(&self, handle: Handle) -> &[Handle] {
        &self.entries[handle.0].children
    }

    pub fn depth(&self, handle: Handle) -> usize {
        self.entries[handle.0].depth
    }

    pub fn find(&self, id: &str) -> Option<Handle> {
        self.by_id.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every node in display order (pre-order), with its depth.
    pub fn walk(&self) -> Vec<(usize, &'a Node)> {
        let mut out = Vec::with_capacity(self.entries.len());
        let mut stack: Vec<Handle> = self.roots.iter().rev().copied().collect();
        while let Some(handle) = stack.pop() {
            out.push((self.depth(handle), self.node(handle)));
            stack.extend(self.children(handle).iter().rev().copied());
        }
        out
    }

    /// Nested, serializable rendition of the tree.
    pub fn nested(&self) -> Vec<NestedNode<'a>> {
        self.roots.iter().map(|h| self.nest(*h)).collect()
    }

    fn nest(&self, handle: Handle) -> NestedNode<'a> {
        let node = self.node(handle);
        NestedNode {
            node,
            children: node
                .is_folder()
                .then(|| self.children(handle).iter().map(|h| self.nest(*h)).collect()),
        }
    }
}

/// A node with its children inlined, for consumers that want a nested document.
#[derive(Debug, Serialize)]
pub struct NestedNode<'a> {
    #[serde(flatten)]
    pub node: &'a Node,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<NestedNode<'a>>>,
}
