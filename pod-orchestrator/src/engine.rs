//! Container engine seam.
//!
//! The orchestrator and the terminal bridge only talk to the engine through
//! [`ContainerEngine`]; the Docker implementation lives in [`crate::docker`].

use crate::container::ContainerSpec;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncWrite;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("Container not found: {0}")]
    ContainerNotFound(String),

    #[error("Container name already in use: {0}")]
    NameConflict(String),

    #[error("Exec session was detached unexpectedly")]
    Detached,

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Other(String),
}

/// A container found on the engine carrying the managed label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedContainer {
    pub id: String,
    pub name: String,
    pub owner: Option<String>,
    pub running: bool,
}

pub type ShellOutput = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;
pub type ShellInput = Pin<Box<dyn AsyncWrite + Send>>;

/// An attached interactive shell: output is the merged TTY stream, input is
/// the shell's stdin. Dropping or shutting down `input` signals end-of-input.
pub struct ShellSession {
    pub output: ShellOutput,
    pub input: ShellInput,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create and start a container, returning its id.
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    /// Stop and remove a container. Already stopped or removed is success.
    async fn stop_and_remove(&self, container_id: &str) -> Result<(), EngineError>;

    /// All containers carrying the managed label.
    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, EngineError>;

    /// Start an interactive TTY shell inside a running container.
    async fn open_shell(
        &self,
        container_id: &str,
        command: &[String],
        working_dir: &str,
    ) -> Result<ShellSession, EngineError>;
}
