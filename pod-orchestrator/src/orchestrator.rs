use crate::container::{ContainerSettings, ContainerSpec};
use crate::engine::ContainerEngine;
use crate::error::{OrchestratorError, Result};
use crate::paths::{PathError, PathSandbox, SandboxPath};
use crate::registry::{ContainerHandle, OwnerLocks, OwnerRegistry};
use crate::sync::{SyncError, SyncFailurePolicy, Synchronizer};
use crate::workspace::{validate_workspace_name, Workspace, WorkspaceStatus, WorkspaceStore};
use sqlx::SqlitePool;
use std::io;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, instrument, warn};

/// Result of a successful status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Paused,
    Resumed,
    Deleted,
}

impl Transition {
    pub fn message(&self) -> &'static str {
        match self {
            Transition::Paused => "Workspace paused",
            Transition::Resumed => "Workspace resumed",
            Transition::Deleted => "Workspace deleted",
        }
    }
}

/// Owns every user's container and the workspace lifecycle.
///
/// Each owner has at most one live container at a time, tracked in the
/// [`OwnerRegistry`]. Create, pause, resume and delete for one owner are
/// serialized; different owners never wait on each other.
pub struct WorkspaceOrchestrator {
    store: WorkspaceStore,
    engine: Arc<dyn ContainerEngine>,
    sync: Arc<dyn Synchronizer>,
    paths: PathSandbox,
    registry: Arc<OwnerRegistry>,
    owner_locks: OwnerLocks,
    settings: ContainerSettings,
    sync_policy: SyncFailurePolicy,
}

impl WorkspaceOrchestrator {
    pub fn new(
        pool: SqlitePool,
        engine: Arc<dyn ContainerEngine>,
        sync: Arc<dyn Synchronizer>,
        paths: PathSandbox,
        settings: ContainerSettings,
    ) -> Self {
        Self {
            store: WorkspaceStore::new(pool),
            engine,
            sync,
            paths,
            registry: Arc::new(OwnerRegistry::new()),
            owner_locks: OwnerLocks::new(),
            settings,
            sync_policy: SyncFailurePolicy::default(),
        }
    }

    pub fn with_sync_policy(mut self, policy: SyncFailurePolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn store(&self) -> &WorkspaceStore {
        &self.store
    }

    pub fn engine(&self) -> &Arc<dyn ContainerEngine> {
        &self.engine
    }

    pub fn paths(&self) -> &PathSandbox {
        &self.paths
    }

    pub fn registry(&self) -> &Arc<OwnerRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &ContainerSettings {
        &self.settings
    }

    /// Live container of the owner, if any.
    pub fn find_container(&self, owner: &str) -> Option<ContainerHandle> {
        self.registry.get(owner)
    }

    /// Launch the owner's container. Fails with `DuplicateWorkspace` while
    /// another container for the owner is live or being created.
    #[instrument(skip(self))]
    pub async fn create_workspace(&self, owner: &str) -> Result<String> {
        PathSandbox::validate_owner(owner)?;

        let reservation = self
            .registry
            .reserve(owner)
            .ok_or_else(|| OrchestratorError::DuplicateWorkspace(owner.to_string()))?;

        let root = self.paths.sandbox_root(owner)?;
        let spec = ContainerSpec::for_owner(owner, &root, &self.settings);

        let container_id = self.engine.launch(&spec).await.map_err(|e| {
            error!("Failed to launch container for {}: {}", owner, e);
            OrchestratorError::CreateFailed(e.to_string())
        })?;

        reservation.commit(ContainerHandle {
            owner: owner.to_string(),
            container_id: container_id.clone(),
            container_name: spec.name,
        });

        info!("Workspace container {} is running for {}", container_id, owner);
        Ok(container_id)
    }

    /// Stop and remove the owner's container. No container is not an error.
    #[instrument(skip(self))]
    pub async fn close_workspace(&self, owner: &str) -> Result<()> {
        let Some(handle) = self.registry.get(owner) else {
            info!("No running workspace for {}", owner);
            return Ok(());
        };

        // Keep the entry on failure so a retry can find the container again
        self.engine.stop_and_remove(&handle.container_id).await?;
        self.registry.remove(owner);

        info!("Closed workspace container {} for {}", handle.container_name, owner);
        Ok(())
    }

    /// One directory level of the owner's sandbox, sorted by name. Entries
    /// are relative to the sandbox root; directories end with `/`.
    pub async fn list_workspace_files(&self, owner: &str, relative: &str) -> Result<Vec<String>> {
        let resolved = self.paths.resolve(owner, relative)?;

        match tokio::fs::metadata(&resolved.absolute).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(OrchestratorError::FileNotFound(relative.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(OrchestratorError::FileNotFound(relative.to_string()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut dir = tokio::fs::read_dir(&resolved.absolute).await?;

        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    // Its id could never be resolved again
                    warn!("Skipping non UTF-8 entry {:?} under {:?} for {}", raw, relative, owner);
                    continue;
                }
            };
            let is_dir = entry.file_type().await?.is_dir();
            entries.push(entry_id(resolved.relative(), &name, is_dir));
        }
        entries.sort();

        debug!("Listed {} entries under {:?} for {}", entries.len(), relative, owner);
        Ok(entries)
    }

    pub async fn read_file(&self, owner: &str, relative: &str) -> Result<String> {
        let resolved = self.paths.resolve(owner, relative)?;

        // Directories, binary files and missing files all read as absent
        match tokio::fs::read_to_string(&resolved.absolute).await {
            Ok(content) => Ok(content),
            Err(e) => {
                debug!("Read of {:?} for {} failed: {}", relative, owner, e);
                Err(OrchestratorError::FileNotFound(relative.to_string()))
            }
        }
    }

    /// Write `content` to a file in the sandbox, creating parent directories.
    pub async fn write_file(&self, owner: &str, relative: &str, content: &str) -> Result<()> {
        let resolved = self.paths.resolve(owner, relative)?;
        ensure_writable(&resolved, relative).await?;

        if let Some(parent) = resolved.absolute.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut file = open_for_write(&resolved.absolute).await.map_err(|e| {
            if is_symlink_loop(&e) {
                warn!("Refused to write through symlink {:?} for {}", relative, owner);
                OrchestratorError::Path(PathError::PathTraversal(relative.to_string()))
            } else {
                e.into()
            }
        })?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;

        debug!("Wrote {} bytes to {:?} for {}", content.len(), relative, owner);
        Ok(())
    }

    /// Create a named workspace: start the owner's container and record it as
    /// ACTIVE. The container is closed again if the record cannot be stored.
    #[instrument(skip(self))]
    pub async fn create_named_workspace(&self, owner: &str, name: &str) -> Result<Workspace> {
        PathSandbox::validate_owner(owner)?;
        let name = validate_workspace_name(name)?;
        let _guard = self.owner_locks.lock(owner).await;

        if self.store.find_active_by_name(owner, &name).await?.is_some() {
            return Err(OrchestratorError::DuplicateName(name));
        }

        self.create_workspace(owner).await?;

        match self.store.insert(owner, &name).await {
            Ok(workspace) => {
                info!("Created workspace {} ({}) for {}", workspace.name, workspace.id, owner);
                Ok(workspace)
            }
            Err(e) => {
                warn!("Failed to record workspace {} for {}: {}", name, owner, e);
                if let Err(close_err) = self.close_workspace(owner).await {
                    error!("Failed to close container for {} after insert failure: {}", owner, close_err);
                }
                Err(e)
            }
        }
    }

    pub async fn list_workspaces(&self, owner: &str) -> Result<Vec<Workspace>> {
        self.store.list_for_owner(owner).await
    }

    /// Move a workspace to `target`.
    ///
    /// | from     | to       | effect                                       |
    /// |----------|----------|----------------------------------------------|
    /// | ACTIVE   | INACTIVE | backup, close container, delete sandbox      |
    /// | INACTIVE | ACTIVE   | restore, start container                     |
    /// | any      | DELETED  | close container, delete sandbox, soft delete |
    ///
    /// Anything else is an `InvalidTransition`. Missing or deleted records
    /// are `NotFound` whatever the target.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        owner: &str,
        id: &str,
        target: WorkspaceStatus,
    ) -> Result<Transition> {
        PathSandbox::validate_owner(owner)?;
        let _guard = self.owner_locks.lock(owner).await;

        let workspace = self.store.get_for_owner(owner, id).await?;

        match (workspace.status, target) {
            (_, WorkspaceStatus::Deleted) => self.delete(&workspace).await,
            (WorkspaceStatus::Active, WorkspaceStatus::Inactive) => self.pause(&workspace).await,
            (WorkspaceStatus::Inactive, WorkspaceStatus::Active) => self.resume(&workspace).await,
            (from, to) => Err(OrchestratorError::InvalidTransition { from, to }),
        }
    }

    async fn pause(&self, workspace: &Workspace) -> Result<Transition> {
        let owner = workspace.owner.as_str();

        if let Err(e) = self.sync.backup(owner, &workspace.name).await {
            self.handle_sync_failure("backup", owner, e)?;
        }

        // Stop the container before its bind mount disappears
        self.close_workspace(owner).await?;
        self.paths.remove_sandbox(owner).await?;
        self.store
            .set_status(&workspace.id, WorkspaceStatus::Inactive)
            .await?;

        info!("Paused workspace {} for {}", workspace.name, owner);
        Ok(Transition::Paused)
    }

    async fn resume(&self, workspace: &Workspace) -> Result<Transition> {
        let owner = workspace.owner.as_str();

        // Restoring now would overwrite the live workspace's files
        if self.registry.is_occupied(owner) {
            return Err(OrchestratorError::DuplicateWorkspace(owner.to_string()));
        }

        if let Err(e) = self.sync.restore(owner, &workspace.name).await {
            self.handle_sync_failure("restore", owner, e)?;
        }

        self.create_workspace(owner).await?;

        if let Err(e) = self
            .store
            .set_status(&workspace.id, WorkspaceStatus::Active)
            .await
        {
            if let Err(close_err) = self.close_workspace(owner).await {
                error!("Failed to close container for {} after status update failure: {}", owner, close_err);
            }
            return Err(e);
        }

        info!("Resumed workspace {} for {}", workspace.name, owner);
        Ok(Transition::Resumed)
    }

    async fn delete(&self, workspace: &Workspace) -> Result<Transition> {
        let owner = workspace.owner.as_str();

        // Tear down first: a failure leaves the record in place so the
        // delete can be retried.
        self.close_workspace(owner).await?;
        self.paths.remove_sandbox(owner).await?;
        self.store.soft_delete(&workspace.id).await?;

        info!("Deleted workspace {} for {}", workspace.name, owner);
        Ok(Transition::Deleted)
    }

    fn handle_sync_failure(&self, operation: &str, owner: &str, err: SyncError) -> Result<()> {
        if err.is_fatal() || self.sync_policy == SyncFailurePolicy::Abort {
            error!("Sync {} for {} failed: {}", operation, owner, err);
            return Err(err.into());
        }
        warn!("Sync {} for {} failed, continuing: {}", operation, owner, err);
        Ok(())
    }

    /// Adopt managed containers that survived a restart. Returns how many
    /// owners were registered.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<usize> {
        let containers = self.engine.list_managed().await?;
        let mut adopted = 0;

        for container in containers {
            let owner = match container.owner.as_deref() {
                Some(owner) if PathSandbox::validate_owner(owner).is_ok() => owner.to_string(),
                _ => {
                    warn!("Ignoring managed container {} without a valid owner label", container.name);
                    continue;
                }
            };

            if !container.running {
                info!("Removing stopped container {} for {}", container.name, owner);
                if let Err(e) = self.engine.stop_and_remove(&container.id).await {
                    warn!("Failed to remove stopped container {}: {}", container.name, e);
                }
                continue;
            }

            let handle = ContainerHandle {
                owner: owner.clone(),
                container_id: container.id,
                container_name: container.name,
            };
            if self.registry.adopt(handle) {
                adopted += 1;
            } else {
                warn!("Owner {} already has a registered container, skipping", owner);
            }
        }

        info!("Reconciled {} running workspace containers", adopted);
        Ok(adopted)
    }
}

/// Open for writing without following a symlink in the final component.
async fn open_for_write(path: &Path) -> io::Result<tokio::fs::File> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.custom_flags(libc::O_NOFOLLOW);
    options.open(path).await
}

fn is_symlink_loop(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ELOOP)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

async fn ensure_writable(resolved: &SandboxPath, relative: &str) -> Result<()> {
    if resolved.is_root() {
        return Err(OrchestratorError::InvalidInput(
            "Cannot write to the workspace root".to_string(),
        ));
    }
    match tokio::fs::metadata(&resolved.absolute).await {
        Ok(meta) if meta.is_dir() => Err(OrchestratorError::InvalidInput(format!(
            "{} is a directory",
            relative
        ))),
        _ => Ok(()),
    }
}

fn entry_id(parent: &Path, name: &str, is_dir: bool) -> String {
    let mut id = parent
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .chain(std::iter::once(name.to_string()))
        .collect::<Vec<_>>()
        .join("/");
    if is_dir {
        id.push('/');
    }
    id
}
