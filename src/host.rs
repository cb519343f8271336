//! Host file operations.
//!
//! The mutation engine and the manifest store never touch `std::fs` directly.
//! They go through [`HostFs`], whose paths are `/`-separated and relative to
//! the content root, so the same engine can sit on a local directory, a
//! sandboxed desktop shell or an in-memory test double.
//!
//! [`LocalFs`] is the implementation over a real directory:
//!
//! | Operation      | Semantics                                                     |
//! |----------------|---------------------------------------------------------------|
//! | `read_file`    | whole file as UTF-8                                           |
//! | `write_file`   | create or replace; parents created; atomic via a temp file    |
//! | `create_file`  | parents created; fails with `AlreadyExists` if present        |
//! | `delete_file`  | file or directory, recursively; a missing path is fine        |
//! | `create_dir`   | recursive and idempotent                                      |
//! | `rename_path`  | never overwrites; fails with `AlreadyExists`                  |
//!
//! The temp file used by `write_file` is dot-prefixed, so a scan or the
//! watcher running concurrently never picks it up.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// File operations the engine needs from its host, relative to the content root.
#[async_trait]
pub trait HostFs: Send + Sync {
    async fn read_file(&self, path: &str) -> io::Result<String>;
    async fn write_file(&self, path: &str, content: &str) -> io::Result<()>;
    async fn create_file(&self, path: &str, content: &str) -> io::Result<()>;
    async fn delete_file(&self, path: &str) -> io::Result<()>;
    async fn create_dir(&self, path: &str) -> io::Result<()>;
    async fn rename_path(&self, from: &str, to: &str) -> io::Result<()>;
}

/// [`HostFs`] over a local directory.
#[derive(Debug)]
pub struct LocalFs {
    root: RwLock<PathBuf>,
}

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

impl LocalFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: RwLock::new(root.into()),
        }
    }

    pub fn root(&self) -> PathBuf {
        self.root.read().clone()
    }

    /// Re-point every subsequent operation at a different content root.
    pub fn set_root(&self, root: impl Into<PathBuf>) {
        *self.root.write() = root.into();
    }

    /// Resolve a root-relative path, refusing anything that could escape the root.
    pub fn resolve(&self, rel: &str) -> io::Result<PathBuf> {
        let mut out = self.root();
        for component in Path::new(rel).components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path '{rel}' escapes the content root"),
                    ));
                }
            }
        }
        Ok(out)
    }
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

async fn exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// True when two paths differ only by letter case (a case-only rename).
fn same_path_ignoring_case(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

/// True when both paths name the same file on disk, as they do for a
/// case-only rename on a case-insensitive filesystem.
#[cfg(unix)]
async fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (fs::symlink_metadata(a).await?, fs::symlink_metadata(b).await?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
async fn same_file(a: &Path, b: &Path) -> io::Result<bool> {
    let (a, b) = (fs::canonicalize(a).await?, fs::canonicalize(b).await?);
    Ok(a == b)
}

#[async_trait]
impl HostFs for LocalFs {
    async fn read_file(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(self.resolve(path)?).await
    }

    async fn write_file(&self, path: &str, content: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        ensure_parent(&target).await?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "cannot write to the content root")
            })?;
        let temp = target.with_file_name(format!(
            ".{file_name}.{}-{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));

        fs::write(&temp, content).await?;
        if let Err(e) = fs::rename(&temp, &target).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e);
        }
        Ok(())
    }

    async fn create_file(&self, path: &str, content: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        ensure_parent(&target).await?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await
    }

    async fn delete_file(&self, path: &str) -> io::Result<()> {
        let target = self.resolve(path)?;
        let result = match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&target).await,
            Ok(_) => fs::remove_file(&target).await,
            Err(e) => Err(e),
        };
        match result {
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path, "delete of missing path ignored");
                Ok(())
            }
            other => other,
        }
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path)?).await
    }

    async fn rename_path(&self, from: &str, to: &str) -> io::Result<()> {
        let source = self.resolve(from)?;
        let dest = self.resolve(to)?;
        if exists(&dest).await?
            && !(same_path_ignoring_case(&source, &dest) && same_file(&source, &dest).await?)
        {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("'{to}' already exists"),
            ));
        }
        fs::rename(&source, &dest).await
    }
}
