//! A live wiki session over one content root.
//!
//! [`Wiki`] ties the pieces together the way an editor host uses them: a
//! [`LocalFs`] pointed at the root, the [`Dispatcher`] that owns the index,
//! the [`MutationEngine`] that edits the disk, an optional [`ContentWatcher`],
//! and an optional background task that keeps a bundle file in sync with
//! every published index.
//!
//! Switching roots tears the watcher down first, re-points the file layer and
//! the dispatcher, then starts watching the new root. Scans of the old root
//! that are still running are discarded by the dispatcher.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bundle::{self, BundleError};
use crate::dispatch::{DispatchError, Dispatcher, Snapshot};
use crate::host::{HostFs, LocalFs};
use crate::mutation::{Applied, MutationEngine};
use crate::watch::{ContentWatcher, WatchError};

#[derive(Error, Debug)]
pub enum WikiError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Bundle(#[from] BundleError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct WikiOptions {
    /// Rescan on filesystem changes.
    pub watch: bool,
    /// Rewrite this bundle after every published index.
    pub bundle_path: Option<PathBuf>,
}

pub struct Wiki {
    fs: Arc<LocalFs>,
    dispatcher: Dispatcher,
    engine: MutationEngine,
    options: WikiOptions,
    watcher: Mutex<Option<ContentWatcher>>,
    bundle_sync: Option<JoinHandle<()>>,
}

impl Wiki {
    /// Build a session for `root` without scanning it yet. Must be called
    /// inside a tokio runtime.
    pub fn new(root: impl Into<PathBuf>, mut options: WikiOptions) -> Result<Self, WikiError> {
        if let Some(path) = options.bundle_path.take() {
            options.bundle_path = Some(std::path::absolute(path)?);
        }
        let fs = Arc::new(LocalFs::new(root));
        let dispatcher = Dispatcher::new()?;
        let host: Arc<dyn HostFs> = Arc::clone(&fs) as Arc<dyn HostFs>;
        let engine = MutationEngine::new(host, dispatcher.clone());
        let bundle_sync = options
            .bundle_path
            .clone()
            .map(|path| spawn_bundle_sync(&dispatcher, path));

        Ok(Self {
            fs,
            dispatcher,
            engine,
            options,
            watcher: Mutex::new(None),
            bundle_sync,
        })
    }

    /// Build a session and wait for the first index of `root`.
    pub async fn open(root: impl Into<PathBuf>, options: WikiOptions) -> Result<Self, WikiError> {
        let wiki = Self::new(root, options)?;
        wiki.initialize().await?;
        Ok(wiki)
    }

    /// Scan the configured root (and start watching it, if enabled).
    pub async fn initialize(&self) -> Result<Arc<Snapshot>, WikiError> {
        self.switch_root(self.fs.root()).await
    }

    /// Tear down the current root and start over on `root`.
    ///
    /// When a watcher for `root` cannot be started, the session stays on its
    /// current root.
    pub async fn switch_root(&self, root: impl Into<PathBuf>) -> Result<Arc<Snapshot>, WikiError> {
        let root = root.into();

        // Watch before the first scan so nothing between the two is missed.
        let watcher = if self.options.watch {
            let excluded = self.options.bundle_path.iter().cloned().collect();
            Some(ContentWatcher::start(&root, self.dispatcher.clone(), excluded)?)
        } else {
            None
        };
        if let Some(old) = std::mem::replace(&mut *self.watcher.lock(), watcher) {
            debug!(root = %old.root().display(), "stopped watcher for previous root");
        }

        let ticket = self
            .dispatcher
            .set_root_with(&root, || self.fs.set_root(&root))
            .await;
        let snapshot = self.dispatcher.wait_for(ticket).await?;
        info!(
            root = %root.display(),
            nodes = snapshot.index.len(),
            "wiki ready"
        );
        Ok(snapshot)
    }

    pub fn root(&self) -> PathBuf {
        self.fs.root()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn engine(&self) -> &MutationEngine {
        &self.engine
    }

    pub fn is_watching(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// The current `{ nodes, config }`, if an index has been published.
    pub fn content(&self) -> Option<Arc<Snapshot>> {
        self.dispatcher.current()
    }

    /// Wait for the index that reflects an applied mutation.
    pub async fn settle<T>(&self, applied: &Applied<T>) -> Result<Arc<Snapshot>, WikiError> {
        Ok(self.dispatcher.wait_for(applied.ticket).await?)
    }

    /// Rescan now and wait for the result.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, WikiError> {
        Ok(self.dispatcher.refresh().await?)
    }
}

impl Drop for Wiki {
    fn drop(&mut self) {
        if let Some(task) = self.bundle_sync.take() {
            task.abort();
        }
    }
}

/// Persist every newly published snapshot to `path`.
fn spawn_bundle_sync(dispatcher: &Dispatcher, path: PathBuf) -> JoinHandle<()> {
    let mut status = dispatcher.subscribe();
    tokio::spawn(async move {
        let mut last_revision = None;
        while status.changed().await.is_ok() {
            let Some(snapshot) = status.borrow_and_update().snapshot.clone() else {
                continue;
            };
            if last_revision == Some(snapshot.revision) {
                continue;
            }
            last_revision = Some(snapshot.revision);

            let target = path.clone();
            let written = tokio::task::spawn_blocking(move || {
                bundle::write_bundle(&target, &snapshot.config, &snapshot.index)
            })
            .await;
            match written {
                Ok(Ok(outcome)) => debug!(
                    path = %path.display(),
                    written = outcome.was_written(),
                    "bundle synced"
                ),
                Ok(Err(error)) => warn!(path = %path.display(), %error, "bundle sync failed"),
                Err(error) => warn!(%error, "bundle sync task failed"),
            }
        }
    })
}
