//! Per-owner sandbox storage.
//!
//! Every filesystem access made on behalf of a user goes through
//! [`PathSandbox::resolve`]. The relative path is untrusted on every call, so
//! resolved paths are never cached.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

static OWNER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("owner pattern is a valid regex"));

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Invalid owner identifier: {0:?}")]
    InvalidIdentifier(String),

    #[error("Path traversal attempt detected: {0:?}")]
    PathTraversal(String),

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A path that has been validated against an owner's sandbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxPath {
    /// Canonical sandbox root of the owner.
    pub root: PathBuf,
    /// Canonical absolute target, equal to or below `root`.
    pub absolute: PathBuf,
}

impl SandboxPath {
    /// Target relative to the sandbox root (empty for the root itself).
    pub fn relative(&self) -> &Path {
        self.absolute
            .strip_prefix(&self.root)
            .unwrap_or_else(|_| Path::new(""))
    }

    pub fn is_root(&self) -> bool {
        self.absolute == self.root
    }
}

#[derive(Debug, Clone)]
pub struct PathSandbox {
    storage_root: PathBuf,
}

impl PathSandbox {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Check an owner identifier against the allow-list (letters, digits,
    /// underscore, hyphen). Never touches the filesystem.
    pub fn validate_owner(owner: &str) -> Result<(), PathError> {
        if OWNER_PATTERN.is_match(owner) {
            Ok(())
        } else {
            Err(PathError::InvalidIdentifier(owner.to_string()))
        }
    }

    /// Canonical sandbox root for `owner`, created on first use.
    pub fn sandbox_root(&self, owner: &str) -> Result<PathBuf, PathError> {
        Self::validate_owner(owner)?;

        let root = self.storage_root.join(owner);
        std::fs::create_dir_all(&root)?;

        let canonical_storage = self.storage_root.canonicalize()?;
        let canonical_root = root.canonicalize()?;

        // The owner directory itself may be a symlink planted by someone with
        // host access; it still has to live inside the storage root.
        if !canonical_root.starts_with(&canonical_storage) || canonical_root == canonical_storage
        {
            warn!(owner, "Sandbox root escapes storage root");
            return Err(PathError::PathTraversal(owner.to_string()));
        }

        Ok(canonical_root)
    }

    /// Resolve `relative` inside the owner's sandbox.
    ///
    /// - `owner` must match the identifier allow-list
    /// - any `..` segment is rejected outright
    /// - leading separators are ignored, so `/` names the sandbox root
    /// - symlinks are resolved and the result must stay below the root
    /// - a dangling symlink anywhere in the missing tail is rejected
    /// - the target does not need to exist yet (for writes)
    pub fn resolve(&self, owner: &str, relative: &str) -> Result<SandboxPath, PathError> {
        Self::validate_owner(owner)?;

        if relative.contains('\0') {
            return Err(PathError::PathTraversal(relative.to_string()));
        }

        let trimmed = Path::new(relative.trim_start_matches(['/', '\\']));
        for component in trimmed.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    warn!(owner, path = relative, "Rejected traversal attempt");
                    return Err(PathError::PathTraversal(relative.to_string()));
                }
            }
        }

        let root = self.sandbox_root(owner)?;
        let absolute = canonicalize_lenient(&root.join(trimmed)).map_err(|e| match e {
            LenientError::DanglingLink(link) => {
                warn!(owner, path = relative, link = %link.display(), "Rejected dangling symlink");
                PathError::PathTraversal(relative.to_string())
            }
            LenientError::Io(e) => PathError::Io(e),
        })?;

        if !absolute.starts_with(&root) {
            warn!(owner, path = relative, "Resolved path escapes sandbox root");
            return Err(PathError::PathTraversal(relative.to_string()));
        }

        debug!(owner, path = relative, resolved = %absolute.display(), "Resolved sandbox path");
        Ok(SandboxPath { root, absolute })
    }

    pub fn resolve_secure_path(&self, owner: &str, relative: &str) -> Result<PathBuf, PathError> {
        self.resolve(owner, relative).map(|path| path.absolute)
    }

    /// Recursively delete the owner's sandbox on the blocking pool. Returns
    /// `false` when there was nothing to delete.
    pub async fn remove_sandbox(&self, owner: &str) -> Result<bool, PathError> {
        Self::validate_owner(owner)?;

        let root = self.storage_root.join(owner);
        match tokio::fs::remove_dir_all(&root).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

enum LenientError {
    /// A missing component is a symlink whose target does not exist; writing
    /// through it would create the target wherever it points.
    DanglingLink(PathBuf),
    Io(io::Error),
}

/// Canonicalize the deepest existing ancestor of `path` and re-append the
/// missing tail. The tail is known to be free of `..` components.
fn canonicalize_lenient(path: &Path) -> Result<PathBuf, LenientError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match existing.canonicalize() {
            Ok(mut canonical) => {
                for part in tail.iter().rev() {
                    canonical.push(part);
                }
                return Ok(canonical);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if existing
                    .symlink_metadata()
                    .is_ok_and(|meta| meta.file_type().is_symlink())
                {
                    return Err(LenientError::DanglingLink(existing));
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent.to_path_buf();
                    }
                    _ => return Err(LenientError::Io(e)),
                }
            }
            Err(e) => return Err(LenientError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox() -> (TempDir, PathSandbox) {
        let dir = TempDir::new().unwrap();
        let paths = PathSandbox::new(dir.path());
        (dir, paths)
    }

    #[test]
    fn test_rejects_parent_segments_anywhere() {
        let (_dir, paths) = sandbox();

        for relative in [
            "..",
            "../etc/passwd",
            "src/../../alice",
            "src/..",
            "/../bob",
            "a/b/../c",
        ] {
            match paths.resolve("bob", relative) {
                Err(PathError::PathTraversal(_)) => {}
                other => panic!("expected traversal error for {relative:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_owner_touches_nothing() {
        let (dir, paths) = sandbox();

        for owner in ["", "bob/../alice", "bob smith", "bob.", "..", "bob\n", "ålice"] {
            match paths.resolve(owner, "README.md") {
                Err(PathError::InvalidIdentifier(_)) => {}
                other => panic!("expected invalid identifier for {owner:?}, got {other:?}"),
            }
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_root_is_created_lazily_and_idempotently() {
        let (dir, paths) = sandbox();

        let first = paths.resolve_secure_path("bob_1", "/").unwrap();
        let second = paths.resolve_secure_path("bob_1", "").unwrap();

        assert_eq!(first, second);
        assert!(dir.path().join("bob_1").is_dir());
        assert_eq!(first, dir.path().join("bob_1").canonicalize().unwrap());
    }

    #[test]
    fn test_resolves_missing_targets_inside_root() {
        let (_dir, paths) = sandbox();

        let resolved = paths.resolve("bob", "src/lib/new.rs").unwrap();

        assert!(resolved.absolute.starts_with(&resolved.root));
        assert_eq!(resolved.relative(), Path::new("src/lib/new.rs"));
        assert!(!resolved.is_root());
    }

    #[test]
    fn test_leading_separator_is_relative_to_root() {
        let (_dir, paths) = sandbox();

        let resolved = paths.resolve("bob", "/etc/passwd").unwrap();
        assert_eq!(resolved.relative(), Path::new("etc/passwd"));
    }

    #[test]
    fn test_owner_prefix_is_not_enough() {
        let (dir, paths) = sandbox();
        std::fs::create_dir_all(dir.path().join("bob-evil")).unwrap();

        let resolved = paths.resolve("bob", "x").unwrap();
        assert!(!resolved
            .absolute
            .starts_with(dir.path().join("bob-evil").canonicalize().unwrap()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() {
        let (dir, paths) = sandbox();
        let outside = TempDir::new().unwrap();

        let root = paths.sandbox_root("bob").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("escape")).unwrap();

        match paths.resolve("bob", "escape/secret.txt") {
            Err(PathError::PathTraversal(_)) => {}
            other => panic!("expected traversal error, got {other:?}"),
        }
        drop(dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_rejected() {
        let (_dir, paths) = sandbox();
        let outside = TempDir::new().unwrap();

        let root = paths.sandbox_root("bob").unwrap();
        std::os::unix::fs::symlink(outside.path().join("pwned.txt"), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("gone"), root.join("dir-link")).unwrap();

        for relative in ["link", "/link", "dir-link/nested/file.txt"] {
            match paths.resolve("bob", relative) {
                Err(PathError::PathTraversal(_)) => {}
                other => panic!("expected traversal error for {relative:?}, got {other:?}"),
            }
        }
        assert!(!outside.path().join("pwned.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_root_resolves_to_target() {
        let (_dir, paths) = sandbox();

        let root = paths.sandbox_root("bob").unwrap();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::os::unix::fs::symlink(root.join("src"), root.join("alias")).unwrap();

        let resolved = paths.resolve("bob", "alias/new.rs").unwrap();
        assert_eq!(resolved.relative(), Path::new("src/new.rs"));
    }

    #[tokio::test]
    async fn test_remove_sandbox() {
        let (dir, paths) = sandbox();
        let root = paths.sandbox_root("bob").unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("node_modules/pkg/index.js"), "hi").unwrap();

        assert!(paths.remove_sandbox("bob").await.unwrap());
        assert!(!dir.path().join("bob").exists());
        assert!(!paths.remove_sandbox("bob").await.unwrap());
    }
}
