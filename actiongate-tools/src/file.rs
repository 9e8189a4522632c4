//! Local workspace filesystem.
//!
//! Every path goes through [`WorkspaceGuard::resolve`] before the disk is
//! touched. Writes to the same path are serialized with a per-path async lock.

use actiongate_core::error::WorkspaceError;
use actiongate_core::ports::WorkspaceFs;
use actiongate_core::types::{DirEntry, WriteOutcome};
use actiongate_core::workspace::WorkspaceGuard;
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};

/// [`WorkspaceFs`] backed by `tokio::fs` under a fixed root.
pub struct LocalWorkspace {
    guard: WorkspaceGuard,
    locks: LockMap,
}

impl LocalWorkspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            guard: WorkspaceGuard::new(root),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn guard(&self) -> &WorkspaceGuard {
        &self.guard
    }

    /// Take the write lock for `path`. The map entry is dropped with its last holder.
    async fn lock_path(&self, path: &Path) -> PathLock<'_> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        let held = lock.lock_owned().await;
        PathLock {
            locks: &self.locks,
            path: path.to_path_buf(),
            held: Some(held),
        }
    }

    /// Resolve `path`, refusing the workspace root itself.
    fn resolve_entry(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        let resolved = self.guard.resolve(path)?;
        if resolved == self.guard.root() {
            return Err(WorkspaceError::InvalidPath {
                path: path.to_string(),
                reason: "refers to the workspace root".into(),
            });
        }
        Ok(resolved)
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), WorkspaceError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        Ok(())
    }

    fn entry(&self, path: &Path, is_directory: bool) -> DirEntry {
        DirEntry {
            path: self.guard.relative(path),
            is_directory,
        }
    }

    fn walk(&self, dir: &Path) -> Vec<DirEntry> {
        let walker = ignore::WalkBuilder::new(dir)
            .hidden(false)
            .git_ignore(true)
            .require_git(false)
            .filter_entry(|e| e.file_name() != ".git")
            .build();

        let mut entries = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    if path == dir {
                        continue;
                    }
                    let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
                    entries.push(self.entry(path, is_dir));
                }
                Err(e) => warn!("Error walking directory: {}", e),
            }
        }
        entries
    }
}

type LockMap = Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>;

/// A held per-path write lock.
struct PathLock<'a> {
    locks: &'a LockMap,
    path: PathBuf,
    held: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for PathLock<'_> {
    fn drop(&mut self) {
        // Release under the map lock so no waiter can clone the entry in between.
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.held.take());
        if locks
            .get(&self.path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.path);
        }
    }
}

fn io_error(path: &Path, e: std::io::Error) -> WorkspaceError {
    if e.kind() == ErrorKind::NotFound {
        WorkspaceError::NotFound {
            path: path.to_path_buf(),
        }
    } else {
        WorkspaceError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl WorkspaceFs for LocalWorkspace {
    fn root(&self) -> &Path {
        self.guard.root()
    }

    async fn read_file(&self, path: &str) -> Result<String, WorkspaceError> {
        let resolved = self.guard.resolve(path)?;
        debug!(path = %resolved.display(), "Reading file");
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| io_error(&resolved, e))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<WriteOutcome, WorkspaceError> {
        let resolved = self.resolve_entry(path)?;
        let _held = self.lock_path(&resolved).await;

        if resolved.is_dir() {
            return Err(WorkspaceError::InvalidPath {
                path: path.to_string(),
                reason: "is a directory".into(),
            });
        }
        self.ensure_parent(&resolved).await?;

        let existed = resolved.exists();
        debug!(path = %resolved.display(), bytes = content.len(), existed, "Writing file");
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| io_error(&resolved, e))?;

        Ok(if existed {
            WriteOutcome::Updated
        } else {
            WriteOutcome::Created
        })
    }

    async fn create_entry(&self, path: &str, is_directory: bool) -> Result<(), WorkspaceError> {
        let resolved = self.resolve_entry(path)?;
        let _held = self.lock_path(&resolved).await;

        if is_directory {
            debug!(path = %resolved.display(), "Creating directory");
            return tokio::fs::create_dir_all(&resolved)
                .await
                .map_err(|e| io_error(&resolved, e));
        }

        self.ensure_parent(&resolved).await?;
        debug!(path = %resolved.display(), "Creating empty file");
        // Never truncate an existing file.
        tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&resolved)
            .await
            .map(|_| ())
            .map_err(|e| io_error(&resolved, e))
    }

    async fn delete_entry(&self, path: &str) -> Result<(), WorkspaceError> {
        let resolved = self.resolve_entry(path)?;
        let _held = self.lock_path(&resolved).await;

        let metadata = tokio::fs::symlink_metadata(&resolved)
            .await
            .map_err(|e| io_error(&resolved, e))?;
        debug!(path = %resolved.display(), dir = metadata.is_dir(), "Deleting entry");
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&resolved).await
        } else {
            tokio::fs::remove_file(&resolved).await
        };
        removed.map_err(|e| io_error(&resolved, e))
    }

    async fn rename_entry(&self, from: &str, to: &str) -> Result<(), WorkspaceError> {
        let source = self.resolve_entry(from)?;
        let target = self.resolve_entry(to)?;
        let _held = self.lock_path(&source).await;

        if !source.exists() {
            return Err(WorkspaceError::NotFound { path: source });
        }
        self.ensure_parent(&target).await?;
        debug!(from = %source.display(), to = %target.display(), "Renaming entry");
        tokio::fs::rename(&source, &target)
            .await
            .map_err(|e| io_error(&source, e))
    }

    async fn list_directory(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<Vec<DirEntry>, WorkspaceError> {
        let dir = self.guard.resolve(path)?;
        if !dir.is_dir() {
            return Err(if dir.exists() {
                WorkspaceError::InvalidPath {
                    path: path.to_string(),
                    reason: "not a directory".into(),
                }
            } else {
                WorkspaceError::NotFound { path: dir }
            });
        }

        let mut entries = if recursive {
            self.walk(&dir)
        } else {
            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| io_error(&dir, e))?;
            while let Some(entry) = read_dir.next_entry().await.map_err(|e| io_error(&dir, e))? {
                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .map_err(|e| io_error(&entry.path(), e))?;
                entries.push(self.entry(&entry.path(), is_dir));
            }
            entries
        };

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        debug!(path = %dir.display(), recursive, count = entries.len(), "Listed directory");
        Ok(entries)
    }
}
