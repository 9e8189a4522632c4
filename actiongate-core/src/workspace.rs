//! Workspace guard.
//!
//! Two layers: [`is_contained`] is the pure, string-only check every engine
//! dispatch calls first; [`WorkspaceGuard::resolve`] maps a candidate path onto
//! the real root and additionally rejects `..` escapes, foreign absolute paths,
//! and symlinks that lead out of the tree.

use crate::error::WorkspaceError;
use std::path::{Component, Path, PathBuf};

/// Returns `false` for absolute drive-letter paths (`C:\`, `c:/`) and UNC
/// paths (`\\server\share`). Every other string passes, `..` included.
pub fn is_contained(path: &str) -> bool {
    let bytes = path.as_bytes();
    if bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'\\' || bytes[2] == b'/')
    {
        return false;
    }
    !path.starts_with("\\\\")
}

/// Symlink hops followed before giving up, as in `SYMLOOP_MAX` on Linux.
const MAX_LINK_HOPS: usize = 40;

/// Push one component, treating `..` as a step up from what is already resolved.
fn push_component(current: &mut PathBuf, component: Component<'_>) {
    match component {
        Component::CurDir => {}
        Component::ParentDir => {
            current.pop();
        }
        other => current.push(other),
    }
}

/// Resolves model-supplied paths against a fixed workspace root.
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    /// Create a guard rooted at `root`. The root is canonicalized when it exists
    /// so that symlinked temp dirs (e.g. `/var` -> `/private/var`) compare correctly.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` to an absolute location inside the root.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, WorkspaceError> {
        if !is_contained(path) {
            return Err(WorkspaceError::OutsideWorkspace {
                path: path.to_string(),
                reason: "absolute drive or UNC path".into(),
            });
        }
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::InvalidPath {
                path: path.to_string(),
                reason: "empty path".into(),
            });
        }

        let candidate = Path::new(trimmed);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(self.escape(path));
                    }
                }
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }

        if !normalized.starts_with(&self.root) {
            return Err(self.escape(path));
        }

        self.follow_links(&normalized, path, 0)?;
        Ok(normalized)
    }

    /// Render an absolute path as a `/`-separated path relative to the root.
    pub fn relative(&self, absolute: &Path) -> String {
        let rel = absolute.strip_prefix(&self.root).unwrap_or(absolute);
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    /// Walk `path` one component at a time, following every symlink on the way,
    /// and require the place it finally lands to be inside the root. Dangling
    /// links are followed lexically, so a write through one cannot leave the tree.
    fn follow_links(&self, path: &Path, original: &str, hops: usize) -> Result<(), WorkspaceError> {
        let mut current = PathBuf::new();
        let mut components = path.components();
        while let Some(component) = components.next() {
            push_component(&mut current, component);
            let metadata = match std::fs::symlink_metadata(&current) {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    for rest in components.by_ref() {
                        push_component(&mut current, rest);
                    }
                    break;
                }
                Err(e) => {
                    return Err(WorkspaceError::Io {
                        path: current,
                        message: e.to_string(),
                    });
                }
            };
            if !metadata.file_type().is_symlink() {
                continue;
            }
            if hops >= MAX_LINK_HOPS {
                return Err(WorkspaceError::OutsideWorkspace {
                    path: original.to_string(),
                    reason: "too many levels of symbolic links".into(),
                });
            }
            let link = std::fs::read_link(&current).map_err(|e| WorkspaceError::Io {
                path: current.clone(),
                message: e.to_string(),
            })?;
            current.pop();
            let target = current.join(link).join(components.as_path());
            return self.follow_links(&target, original, hops + 1);
        }

        if current.starts_with(&self.root) {
            Ok(())
        } else {
            Err(WorkspaceError::OutsideWorkspace {
                path: original.to_string(),
                reason: "resolves through a link outside the workspace".into(),
            })
        }
    }

    fn escape(&self, path: &str) -> WorkspaceError {
        WorkspaceError::OutsideWorkspace {
            path: path.to_string(),
            reason: format!("escapes workspace root {}", self.root.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_contained_rejects_drive_and_unc() {
        assert!(!is_contained("C:\\Windows\\system32"));
        assert!(!is_contained("c:/temp/x"));
        assert!(!is_contained("\\\\server\\share\\file"));
    }

    #[test]
    fn test_is_contained_accepts_relative() {
        assert!(is_contained("src/a.txt"));
        assert!(is_contained("../sibling"));
        assert!(is_contained("C:relative"));
        assert!(is_contained("/etc/passwd"));
        assert!(is_contained("\\single"));
        assert!(is_contained("."));
    }

    #[test]
    fn test_resolve_inside() {
        let dir = TempDir::new().unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        let resolved = guard.resolve("src/./a.txt").unwrap();
        assert_eq!(resolved, guard.root().join("src").join("a.txt"));
        assert_eq!(guard.relative(&resolved), "src/a.txt");
        assert_eq!(guard.resolve(".").unwrap(), guard.root());
        assert_eq!(guard.relative(guard.root()), ".");
    }

    #[test]
    fn test_resolve_parent_inside_is_fine() {
        let dir = TempDir::new().unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        let resolved = guard.resolve("src/../b.txt").unwrap();
        assert_eq!(resolved, guard.root().join("b.txt"));
    }

    #[test]
    fn test_resolve_rejects_escape() {
        let dir = TempDir::new().unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        let err = guard.resolve("../outside.txt").unwrap_err();
        assert!(err.is_guard_rejection());
        let err = guard.resolve("a/../../../x").unwrap_err();
        assert!(err.is_guard_rejection());
    }

    #[test]
    fn test_resolve_rejects_foreign_absolute() {
        let dir = TempDir::new().unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        assert!(guard.resolve("/etc/passwd").unwrap_err().is_guard_rejection());
        assert!(guard.resolve("D:\\data").unwrap_err().is_guard_rejection());

        let inside = guard.root().join("ok.txt");
        assert_eq!(guard.resolve(inside.to_str().unwrap()).unwrap(), inside);
    }

    #[test]
    fn test_resolve_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        let err = guard.resolve("   ").unwrap_err();
        assert!(matches!(err, WorkspaceError::InvalidPath { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        let err = guard.resolve("link/secret.txt").unwrap_err();
        assert!(err.is_guard_rejection());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_dangling_symlink_escape() {
        let outside = TempDir::new().unwrap();
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path().join("pwned.txt"), dir.path().join("link.txt"))
            .unwrap();
        std::os::unix::fs::symlink("../../escaped", dir.path().join("up")).unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        assert!(guard.resolve("link.txt").unwrap_err().is_guard_rejection());
        assert!(guard.resolve("up/deeper/file").unwrap_err().is_guard_rejection());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_follows_links_that_stay_inside() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink("real", dir.path().join("alias")).unwrap();
        std::os::unix::fs::symlink("real/missing.txt", dir.path().join("pending")).unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        assert_eq!(
            guard.resolve("alias/a.txt").unwrap(),
            guard.root().join("alias").join("a.txt")
        );
        assert!(guard.resolve("pending").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlink_loop() {
        let dir = TempDir::new().unwrap();
        std::os::unix::fs::symlink("b", dir.path().join("a")).unwrap();
        std::os::unix::fs::symlink("a", dir.path().join("b")).unwrap();
        let guard = WorkspaceGuard::new(dir.path());
        assert!(guard.resolve("a/file").unwrap_err().is_guard_rejection());
    }
}
