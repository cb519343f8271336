//! # MetaWiki
//!
//! Indexes a directory of Markdown documents into an ordered, editable wiki
//! tree. The filesystem is the data source: directories become folders,
//! `*.md` files become documents, YAML front matter supplies metadata, and a
//! small `_meta.json` per directory declares sibling order.
//!
//! # Architecture: One Index, Three Writers
//!
//! The index can change for three reasons, and all of them funnel into the
//! same place:
//!
//! ```text
//! batch generator   ─┐
//! filesystem watcher ─┼──► Dispatcher::request_scan ──► scan ──► published Snapshot
//! mutation engine   ─┘        (single flight)                        │
//!                                                                     ▼
//!                                                    listeners, bundle sync, UI
//! ```
//!
//! Nothing edits the index in place. The mutation engine changes the disk and
//! the order manifests, then asks for a rescan and hands the caller a ticket
//! to wait on. Whatever is on disk after the scan *is* the index.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`scan`] | Walks the content root into a flat [`types::Index`] |
//! | [`tree`] | Arena-based parent → children view with the sibling order |
//! | [`manifest`] | `_meta.json` order manifests behind per-directory locks |
//! | [`mutation`] | create / delete / rename / reorder / move |
//! | [`dispatch`] | Single-flight scan scheduler and snapshot publication |
//! | [`watch`] | Filesystem watcher feeding the dispatcher |
//! | [`wiki`] | A live session: file layer, dispatcher, engine, watcher, bundle sync |
//! | [`bundle`] | Deterministic `{ config, nodes }` JSON for static consumers |
//! | [`host`] | The file operations everything above is written against |
//! | [`frontmatter`] | YAML front matter split / parse / stringify |
//! | [`config`] | `metawiki.toml` tool settings and the `_config.json` wiki config |
//! | [`types`] | `Node`, `Index` and the mutation vocabulary |
//! | [`naming`] | Ids, base names, slugs and entry-name validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Manifests Own Order
//!
//! Sibling order lives in `_meta.json`, never in file names. A node's
//! `sort_index` is its position in the manifest, or a large sentinel when it
//! is not listed, so unlisted entries fall back to folders-first, then title.
//! Every read-modify-write of a manifest runs under that directory's async
//! lock; two concurrent creates in one folder both land.
//!
//! ## Rescan Instead of Patching
//!
//! Renaming or moving a folder changes the id of everything below it. Rather
//! than rewriting those ids in memory, the engine marks the old subtree stale
//! until the rescan it requested is published, and refuses to act on stale
//! ids in the meantime.

pub mod bundle;
pub mod config;
pub mod dispatch;
pub mod frontmatter;
pub mod host;
pub mod manifest;
pub mod mutation;
pub mod naming;
pub mod output;
pub mod scan;
pub mod tree;
pub mod types;
pub mod watch;
pub mod wiki;

#[cfg(test)]
pub(crate) mod test_helpers;
