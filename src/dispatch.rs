//! Single-flight scan scheduling and index publication.
//!
//! The dispatcher owns the authoritative index. Anything that wants a fresh
//! one (the filesystem watcher, the mutation engine, a CLI command) calls
//! [`Dispatcher::request_scan`], which never blocks and never starts a second
//! scan while one is running:
//!
//! ```text
//! request ──► idle?    ── yes ──► start scan
//!                      ── no  ──► mark pending (once, however many requests)
//! scan done ──► publish snapshot ──► pending? ── yes ──► scan again
//!                                             ── no  ──► idle
//! ```
//!
//! Every request returns a [`ScanTicket`]. A published [`Snapshot`] covers
//! every ticket issued before its scan started, so
//! [`Dispatcher::wait_for`] is how a caller waits for "an index that reflects
//! my change".
//!
//! Switching roots bumps a generation counter. A scan that started against
//! the previous root still finishes, but its result is dropped at publish
//! time instead of replacing the new root's index.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::{debug, error, info};

use crate::config::WikiConfig;
use crate::scan::{self, Scan, ScanError};
use crate::types::{Index, ScanWarning};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("scan failed: {0}")]
    ScanFailed(String),
    #[error("dispatcher closed")]
    Closed,
}

/// The scan function the dispatcher runs on a blocking thread.
pub type ScanFn = Arc<dyn Fn(&Path) -> Result<Scan, ScanError> + Send + Sync>;

/// Callback fired after every published scan.
pub type Listener = Arc<dyn Fn(&Snapshot) + Send + Sync>;

/// Identifies a scan request. Tickets increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanTicket(u64);

impl ScanTicket {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// One published index with the config it was scanned with.
#[derive(Debug)]
pub struct Snapshot {
    /// Increases with every publication, across roots.
    pub revision: u64,
    /// Every ticket up to and including this one is reflected.
    pub covers: ScanTicket,
    pub root: PathBuf,
    pub index: Index,
    pub config: WikiConfig,
    pub warnings: Vec<ScanWarning>,
}

/// Observable dispatcher state, broadcast over a `watch` channel.
#[derive(Debug, Clone, Default)]
pub struct Status {
    /// Highest ticket reflected by a published snapshot of the current root.
    pub covered: u64,
    /// Highest ticket whose scan finished, successfully or not.
    pub settled: u64,
    pub snapshot: Option<Arc<Snapshot>>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    root: Option<PathBuf>,
    generation: u64,
    requested: u64,
    running: bool,
    pending: bool,
}

struct Inner {
    runtime: Handle,
    scan_fn: ScanFn,
    state: Mutex<State>,
    publish_gate: AsyncMutex<()>,
    status: watch::Sender<Status>,
    listeners: Mutex<Vec<Listener>>,
    scans_started: AtomicU64,
    revision: AtomicU64,
}

/// Cheaply cloneable handle to the scan scheduler.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// A dispatcher running the real scanner. Must be called inside a tokio runtime.
    pub fn new() -> Result<Self, DispatchError> {
        Self::with_scan_fn(Arc::new(scan::scan))
    }

    pub fn with_scan_fn(scan_fn: ScanFn) -> Result<Self, DispatchError> {
        let (status, _) = watch::channel(Status::default());
        Ok(Self {
            inner: Arc::new(Inner {
                runtime: Handle::try_current()?,
                scan_fn,
                state: Mutex::new(State::default()),
                publish_gate: AsyncMutex::new(()),
                status,
                listeners: Mutex::new(Vec::new()),
                scans_started: AtomicU64::new(0),
                revision: AtomicU64::new(0),
            }),
        })
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.inner.state.lock().root.clone()
    }

    /// Point the dispatcher at a new content root and request its first scan.
    ///
    /// The current snapshot is dropped immediately; results of scans still
    /// running against the previous root are discarded when they finish.
    pub async fn set_root(&self, root: impl Into<PathBuf>) -> ScanTicket {
        self.set_root_with(root, || {}).await
    }

    /// [`set_root`](Self::set_root), running `repoint` after the old snapshot
    /// is dropped and before the new root's first scan is scheduled. Callers
    /// re-point their own file layer there, so no published snapshot ever
    /// pairs with the wrong root.
    pub async fn set_root_with(
        &self,
        root: impl Into<PathBuf>,
        repoint: impl FnOnce(),
    ) -> ScanTicket {
        let root = root.into();
        {
            let _gate = self.inner.publish_gate.lock().await;
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.root = Some(root.clone());
            self.inner.status.send_modify(|status| {
                status.covered = 0;
                status.settled = 0;
                status.snapshot = None;
                status.last_error = None;
            });
            info!(root = %root.display(), generation = state.generation, "content root set");
        }
        repoint();
        self.request_scan()
    }

    /// Ask for a rescan. Never blocks; at most one scan runs at a time and
    /// any number of requests during a scan collapse into one follow-up scan.
    pub fn request_scan(&self) -> ScanTicket {
        let mut state = self.inner.state.lock();
        state.requested += 1;
        let ticket = ScanTicket(state.requested);
        if state.running {
            state.pending = true;
            debug!(ticket = ticket.0, "scan already running; follow-up queued");
        } else {
            state.running = true;
            debug!(ticket = ticket.0, "scan scheduled");
            self.inner.runtime.spawn(run_scans(Arc::clone(&self.inner)));
        }
        ticket
    }

    /// Wait until `ticket` is settled and return the snapshot covering it.
    pub async fn wait_for(&self, ticket: ScanTicket) -> Result<Arc<Snapshot>, DispatchError> {
        let mut rx = self.inner.status.subscribe();
        let status = rx
            .wait_for(|status| status.settled >= ticket.0)
            .await
            .map_err(|_| DispatchError::Closed)?;
        if status.covered >= ticket.0
            && let Some(snapshot) = &status.snapshot
        {
            return Ok(Arc::clone(snapshot));
        }
        Err(DispatchError::ScanFailed(
            status
                .last_error
                .clone()
                .unwrap_or_else(|| "scan did not complete".to_string()),
        ))
    }

    /// Request a scan and wait for its result.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, DispatchError> {
        let ticket = self.request_scan();
        self.wait_for(ticket).await
    }

    /// The most recently published snapshot for the current root.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        self.inner.status.borrow().snapshot.clone()
    }

    /// Highest ticket the current snapshot reflects.
    pub fn covered(&self) -> u64 {
        self.inner.status.borrow().covered
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.inner.status.subscribe()
    }

    /// Register a callback fired with every published snapshot.
    pub fn on_index_updated<F>(&self, listener: F)
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        self.inner.listeners.lock().push(Arc::new(listener));
    }

    /// Number of scans started so far.
    pub fn scans_started(&self) -> u64 {
        self.inner.scans_started.load(Ordering::SeqCst)
    }
}

async fn run_scans(inner: Arc<Inner>) {
    loop {
        let (root, generation, covers) = {
            let mut state = inner.state.lock();
            state.pending = false;
            match &state.root {
                Some(root) => (root.clone(), state.generation, state.requested),
                None => {
                    state.running = false;
                    let requested = state.requested;
                    drop(state);
                    inner.status.send_modify(|status| {
                        status.settled = status.settled.max(requested);
                        status.last_error = Some("no content root configured".to_string());
                    });
                    return;
                }
            }
        };

        inner.scans_started.fetch_add(1, Ordering::SeqCst);
        let scan_fn = Arc::clone(&inner.scan_fn);
        let scan_root = root.clone();
        let result = match tokio::task::spawn_blocking(move || scan_fn(&scan_root)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("scan task failed: {e}")),
        };
        inner.publish(generation, ScanTicket(covers), root, result).await;

        let mut state = inner.state.lock();
        if !state.pending {
            state.running = false;
            return;
        }
    }
}

impl Inner {
    async fn publish(
        &self,
        generation: u64,
        covers: ScanTicket,
        root: PathBuf,
        result: Result<Scan, String>,
    ) {
        let _gate = self.publish_gate.lock().await;
        if self.state.lock().generation != generation {
            debug!(root = %root.display(), "discarding scan of a previous content root");
            return;
        }

        match result {
            Ok(scan) => {
                let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
                let snapshot = Arc::new(Snapshot {
                    revision,
                    covers,
                    root,
                    index: scan.index,
                    config: scan.config,
                    warnings: scan.warnings,
                });
                self.status.send_modify(|status| {
                    status.covered = status.covered.max(covers.0);
                    status.settled = status.settled.max(covers.0);
                    status.snapshot = Some(Arc::clone(&snapshot));
                    status.last_error = None;
                });
                info!(
                    revision,
                    nodes = snapshot.index.len(),
                    covers = covers.0,
                    "index published"
                );
                let listeners = self.listeners.lock().clone();
                for listener in listeners {
                    listener(&snapshot);
                }
            }
            Err(message) => {
                error!(root = %root.display(), error = %message, "scan failed; keeping previous index");
                self.status.send_modify(|status| {
                    status.settled = status.settled.max(covers.0);
                    status.last_error = Some(message);
                });
            }
        }
    }
}
