//! Filesystem watcher feeding the dispatcher.
//!
//! Watches the content root recursively and turns every relevant event into
//! a [`Dispatcher::request_scan`] call. Coalescing is the dispatcher's job;
//! the watcher only filters. Dropping the [`ContentWatcher`] stops it.
//!
//! Ignored:
//! - access events (reads never change the index)
//! - paths with a hidden segment below the root (`.git/`, editor swap files,
//!   the temp files atomic writes go through)
//! - `node_modules/`
//! - explicitly excluded paths, such as a bundle written inside the root

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::naming;

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("failed to watch {path}: {source}")]
    Notify {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// A live recursive watch on one content root.
pub struct ContentWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

/// Decides which event paths matter for a given root.
#[derive(Debug, Clone)]
struct EventFilter {
    roots: Vec<PathBuf>,
    excluded: Vec<PathBuf>,
}

impl EventFilter {
    fn new(root: &Path, excluded: Vec<PathBuf>) -> Self {
        let mut roots = vec![root.to_path_buf()];
        if let Ok(canonical) = root.canonicalize()
            && canonical != root
        {
            roots.push(canonical);
        }
        let excluded = excluded
            .into_iter()
            .flat_map(|p| {
                let canonical = p.canonicalize().ok();
                std::iter::once(p).chain(canonical)
            })
            .collect();
        Self { roots, excluded }
    }

    fn is_relevant_path(&self, path: &Path) -> bool {
        if self.excluded.iter().any(|ex| path == ex) {
            return false;
        }
        let Some(rel) = self.roots.iter().find_map(|root| path.strip_prefix(root).ok()) else {
            // Outside the root as we know it (e.g. the root itself moved): rescan.
            return true;
        };
        !rel.iter().any(|segment| {
            let segment = segment.to_string_lossy();
            naming::is_hidden(&segment) || naming::IGNORED_DIRS.contains(&segment.as_ref())
        })
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if matches!(event.kind, EventKind::Access(_)) {
            return false;
        }
        event.paths.is_empty() || event.paths.iter().any(|p| self.is_relevant_path(p))
    }
}

impl ContentWatcher {
    /// Start watching `root`, requesting a scan from `dispatcher` on every
    /// relevant change. Paths in `excluded` never trigger a scan.
    pub fn start(
        root: &Path,
        dispatcher: Dispatcher,
        excluded: Vec<PathBuf>,
    ) -> Result<Self, WatchError> {
        let filter = EventFilter::new(root, excluded);
        let mut watcher = recommended_watcher(move |event_result: notify::Result<Event>| {
            match event_result {
                Ok(event) if filter.is_relevant(&event) => {
                    debug!(kind = ?event.kind, paths = ?event.paths, "content changed");
                    dispatcher.request_scan();
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(%error, "watch error; rescanning");
                    dispatcher.request_scan();
                }
            }
        })
        .map_err(|source| WatchError::Notify {
            path: root.to_path_buf(),
            source,
        })?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|source| WatchError::Notify {
                path: root.to_path_buf(),
                source,
            })?;
        info!(root = %root.display(), "watching content root");

        Ok(Self {
            root: root.to_path_buf(),
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for ContentWatcher {
    fn drop(&mut self) {
        debug!(root = %self.root.display(), "watcher stopped");
    }
}
