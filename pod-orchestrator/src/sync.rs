//! Workspace persistence.
//!
//! A paused workspace lives only in the remote store under
//! `<owner>/<workspace>`. Both directions are exact mirrors: files missing on
//! the source side are deleted on the destination side. Ephemeral build
//! directories are skipped on backup; restore copies everything.

use crate::paths::{PathError, PathSandbox};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

/// Directories never uploaded on backup
pub const EXCLUDED_DIRS: &[&str] = &["node_modules", "dist", ".git", "build"];

pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync is not configured: {0}")]
    Configuration(String),

    #[error("Sync tool not found on PATH: {0}")]
    ToolMissing(String),

    #[error("Invalid sync key: {0:?}")]
    InvalidKey(String),

    #[error("Sync failed: {0}")]
    Failed(String),

    #[error("Sync timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Sync I/O error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    /// Errors raised before any data moved. These abort the caller whatever
    /// the failure policy says.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Configuration(_)
                | SyncError::ToolMissing(_)
                | SyncError::InvalidKey(_)
                | SyncError::Path(_)
        )
    }
}

/// What a pause or resume does when a sync fails mid-transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFailurePolicy {
    /// Stop the transition and leave the workspace as it was
    #[default]
    Abort,
    /// Log the failure and carry on with the transition
    Proceed,
}

impl FromStr for SyncFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(SyncFailurePolicy::Abort),
            "proceed" => Ok(SyncFailurePolicy::Proceed),
            other => Err(format!("unknown sync failure policy: {}", other)),
        }
    }
}

#[async_trait]
pub trait Synchronizer: Send + Sync {
    /// Mirror the owner's sandbox root to the remote key `<owner>/<workspace>`.
    async fn backup(&self, owner: &str, workspace: &str) -> Result<(), SyncError>;

    /// Mirror the remote key `<owner>/<workspace>` into the owner's sandbox root.
    async fn restore(&self, owner: &str, workspace: &str) -> Result<(), SyncError>;
}

/// Check both key segments before building any remote path from them.
fn validate_key(owner: &str, workspace: &str) -> Result<(), SyncError> {
    PathSandbox::validate_owner(owner)?;

    if workspace.is_empty()
        || workspace == "."
        || workspace == ".."
        || workspace
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(SyncError::InvalidKey(workspace.to_string()));
    }
    Ok(())
}

/// Mirrors through the AWS CLI (`aws s3 sync`).
pub struct S3CliSynchronizer {
    bucket: Option<String>,
    paths: PathSandbox,
    timeout: Duration,
    program: String,
}

impl S3CliSynchronizer {
    pub fn new(bucket: Option<String>, paths: PathSandbox, timeout: Duration) -> Self {
        Self {
            bucket: bucket.filter(|b| !b.trim().is_empty()),
            paths,
            timeout,
            program: "aws".to_string(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn preflight(&self) -> Result<&str, SyncError> {
        let bucket = self.bucket.as_deref().ok_or_else(|| {
            SyncError::Configuration("S3_BUCKET_NAME is not set".to_string())
        })?;

        which::which(&self.program).map_err(|_| SyncError::ToolMissing(self.program.clone()))?;

        Ok(bucket)
    }

    fn remote_uri(bucket: &str, owner: &str, workspace: &str) -> String {
        format!("s3://{}/{}/{}", bucket, owner, workspace)
    }

    async fn run(&self, args: Vec<String>) -> Result<(), SyncError> {
        debug!("Running {} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => SyncError::ToolMissing(self.program.clone()),
            _ => SyncError::Io(e),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SyncError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// Arguments for one `aws s3 sync` invocation.
pub fn s3_sync_args(source: &str, destination: &str, excludes: &[&str]) -> Vec<String> {
    let mut args = vec![
        "s3".to_string(),
        "sync".to_string(),
        source.to_string(),
        destination.to_string(),
        "--delete".to_string(),
    ];
    for dir in excludes {
        args.push("--exclude".to_string());
        args.push(format!("{}/*", dir));
        args.push("--exclude".to_string());
        args.push(format!("*/{}/*", dir));
    }
    args
}

#[async_trait]
impl Synchronizer for S3CliSynchronizer {
    #[instrument(skip(self))]
    async fn backup(&self, owner: &str, workspace: &str) -> Result<(), SyncError> {
        let bucket = self.preflight()?;
        validate_key(owner, workspace)?;

        let local = self.paths.sandbox_root(owner)?;
        let remote = Self::remote_uri(bucket, owner, workspace);

        info!("Syncing sandbox of {} to {}", owner, remote);
        self.run(s3_sync_args(
            &local.display().to_string(),
            &remote,
            EXCLUDED_DIRS,
        ))
        .await?;
        info!("Backup of {}/{} completed", owner, workspace);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn restore(&self, owner: &str, workspace: &str) -> Result<(), SyncError> {
        let bucket = self.preflight()?;
        validate_key(owner, workspace)?;

        let local = self.paths.sandbox_root(owner)?;
        let remote = Self::remote_uri(bucket, owner, workspace);

        info!("Syncing {} into sandbox of {}", remote, owner);
        self.run(s3_sync_args(&remote, &local.display().to_string(), &[]))
            .await?;
        info!("Restore of {}/{} completed", owner, workspace);
        Ok(())
    }
}

/// Mirrors into `<mirror_root>/<owner>/<workspace>` on a local or mounted
/// filesystem.
pub struct LocalMirrorSynchronizer {
    mirror_root: Option<PathBuf>,
    paths: PathSandbox,
}

impl LocalMirrorSynchronizer {
    pub fn new(mirror_root: Option<PathBuf>, paths: PathSandbox) -> Self {
        Self { mirror_root, paths }
    }

    fn mirror_dir(&self, owner: &str, workspace: &str) -> Result<PathBuf, SyncError> {
        let root = self.mirror_root.as_ref().ok_or_else(|| {
            SyncError::Configuration("SYNC_MIRROR_ROOT is not set".to_string())
        })?;
        validate_key(owner, workspace)?;
        Ok(root.join(owner).join(workspace))
    }

    async fn mirror(
        source: PathBuf,
        destination: PathBuf,
        excludes: &'static [&'static str],
    ) -> Result<(), SyncError> {
        tokio::task::spawn_blocking(move || mirror_tree(&source, &destination, excludes))
            .await
            .map_err(|e| SyncError::Failed(format!("mirror task failed: {}", e)))?
            .map_err(|e| SyncError::Failed(e.to_string()))
    }
}

#[async_trait]
impl Synchronizer for LocalMirrorSynchronizer {
    #[instrument(skip(self))]
    async fn backup(&self, owner: &str, workspace: &str) -> Result<(), SyncError> {
        let remote = self.mirror_dir(owner, workspace)?;
        let local = self.paths.sandbox_root(owner)?;

        info!("Mirroring sandbox of {} to {}", owner, remote.display());
        Self::mirror(local, remote, EXCLUDED_DIRS).await
    }

    #[instrument(skip(self))]
    async fn restore(&self, owner: &str, workspace: &str) -> Result<(), SyncError> {
        let remote = self.mirror_dir(owner, workspace)?;
        let local = self.paths.sandbox_root(owner)?;

        if !remote.is_dir() {
            warn!("No backup found at {}, restoring empty workspace", remote.display());
        }
        info!("Mirroring {} into sandbox of {}", remote.display(), owner);
        Self::mirror(remote, local, &[]).await
    }
}

fn is_excluded(entry: &walkdir::DirEntry, excludes: &[&str]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| excludes.contains(&name))
            .unwrap_or(false)
}

/// Make `destination` an exact copy of `source`, ignoring excluded
/// directories on both sides. A missing `source` mirrors as empty.
/// Symlinks are not followed or copied.
pub fn mirror_tree(source: &Path, destination: &Path, excludes: &[&str]) -> io::Result<()> {
    std::fs::create_dir_all(destination)?;

    // Prune first so a file replacing a directory (or the reverse) has room.
    let mut stale = WalkDir::new(destination).min_depth(1).into_iter();
    while let Some(entry) = stale.next() {
        let entry = entry?;
        let is_dir = entry.file_type().is_dir();

        if is_excluded(&entry, excludes) {
            stale.skip_current_dir();
            continue;
        }

        let relative = match entry.path().strip_prefix(destination) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let keep = match std::fs::symlink_metadata(source.join(relative)) {
            Ok(meta) => meta.file_type().is_dir() == is_dir,
            Err(_) => false,
        };
        if keep {
            continue;
        }

        if is_dir {
            stale.skip_current_dir();
            std::fs::remove_dir_all(entry.path())?;
        } else {
            std::fs::remove_file(entry.path())?;
        }
    }

    if !source.is_dir() {
        return Ok(());
    }

    let fresh = WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !is_excluded(e, excludes));

    for entry in fresh {
        let entry = entry?;
        let relative = match entry.path().strip_prefix(source) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            std::fs::copy(entry.path(), &target)?;
        } else {
            debug!("Skipping non-regular entry {}", entry.path().display());
        }
    }

    Ok(())
}
