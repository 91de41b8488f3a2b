//! Workspace orchestration business logic
//!
//! This crate owns per-user sandbox storage, the container lifecycle, workspace
//! persistence and the interactive terminal bridge. It is consumed by the
//! pod-api HTTP service but does not depend on any web framework.

pub mod container;
pub mod db;
pub mod docker;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod paths;
pub mod registry;
pub mod sync;
pub mod terminal;
pub mod tree;
pub mod workspace;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use container::{ContainerSettings, ContainerSpec, ResourceCaps};
pub use docker::DockerEngine;
pub use engine::{ContainerEngine, EngineError, ManagedContainer, ShellSession};
pub use error::{ErrorKind, OrchestratorError, Result};
pub use orchestrator::{Transition, WorkspaceOrchestrator};
pub use paths::{PathError, PathSandbox, SandboxPath};
pub use registry::{ContainerHandle, OwnerRegistry};
pub use sync::{
    LocalMirrorSynchronizer, S3CliSynchronizer, SyncError, SyncFailurePolicy, Synchronizer,
};
pub use terminal::{BridgeOutcome, CloseCode, TerminalBridge, TerminalFrame, TerminalSettings};
pub use tree::{build_tree, TreeNode};
pub use workspace::{Workspace, WorkspaceStatus, WorkspaceStore, WorkspaceSummary};
