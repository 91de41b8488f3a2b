use crate::engine::EngineError;
use crate::paths::PathError;
use crate::sync::SyncError;
use crate::workspace::WorkspaceStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Caller-facing classification of a failure.
///
/// The HTTP layer maps each kind to a status code; everything that is not a
/// caller mistake collapses into `Internal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Workspace not found: {0}")]
    NotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Owner {0} already has a running workspace")]
    DuplicateWorkspace(String),

    #[error("A workspace named {0} already exists")]
    DuplicateName(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: WorkspaceStatus,
        to: WorkspaceStatus,
    },

    #[error("Failed to create workspace container: {0}")]
    CreateFailed(String),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Container engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Persistence sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) | OrchestratorError::FileNotFound(_) => {
                ErrorKind::NotFound
            }
            OrchestratorError::InvalidInput(_) | OrchestratorError::InvalidTransition { .. } => {
                ErrorKind::Validation
            }
            OrchestratorError::DuplicateWorkspace(_) | OrchestratorError::DuplicateName(_) => {
                ErrorKind::Conflict
            }
            OrchestratorError::Path(PathError::InvalidIdentifier(_))
            | OrchestratorError::Path(PathError::PathTraversal(_)) => ErrorKind::Validation,
            _ => ErrorKind::Internal,
        }
    }
}
