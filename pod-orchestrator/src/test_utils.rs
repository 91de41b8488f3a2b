use crate::container::{ContainerSettings, ContainerSpec};
use crate::engine::{ContainerEngine, EngineError, ManagedContainer, ShellSession};
use crate::orchestrator::WorkspaceOrchestrator;
use crate::paths::PathSandbox;
use crate::sync::{LocalMirrorSynchronizer, Synchronizer};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

/// Helper to create an in-memory test database with migrations applied
pub async fn create_test_db() -> SqlitePool {
    let pool = SqlitePool::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    pool
}

/// Orchestrator over a [`FakeEngine`], storing sandboxes under
/// `<base>/storage` and backups under `<base>/mirror`.
pub async fn test_orchestrator(base: &Path) -> (Arc<WorkspaceOrchestrator>, Arc<FakeEngine>) {
    let engine = Arc::new(FakeEngine::new());
    let orchestrator =
        test_orchestrator_with(base, engine.clone(), Some(base.join("mirror"))).await;
    (orchestrator, engine)
}

pub async fn test_orchestrator_with(
    base: &Path,
    engine: Arc<FakeEngine>,
    mirror_root: Option<PathBuf>,
) -> Arc<WorkspaceOrchestrator> {
    let paths = PathSandbox::new(base.join("storage"));
    let sync = Arc::new(LocalMirrorSynchronizer::new(mirror_root, paths.clone()));

    Arc::new(test_orchestrator_with_sync(base, engine, sync).await)
}

/// Orchestrator over a caller-supplied [`Synchronizer`], left unwrapped so
/// the failure policy can still be set.
pub async fn test_orchestrator_with_sync(
    base: &Path,
    engine: Arc<FakeEngine>,
    sync: Arc<dyn Synchronizer>,
) -> WorkspaceOrchestrator {
    WorkspaceOrchestrator::new(
        create_test_db().await,
        engine,
        sync,
        PathSandbox::new(base.join("storage")),
        ContainerSettings::default(),
    )
}

#[derive(Default)]
struct FakeState {
    launches: Vec<ContainerSpec>,
    stopped: Vec<String>,
    shells: Vec<(String, Vec<String>)>,
    managed: Vec<ManagedContainer>,
    fail_launch: bool,
    fail_stop: bool,
    fail_shell: bool,
    shell_output: Vec<Bytes>,
    hold_output_open: bool,
    output_error: bool,
}

/// In-memory [`ContainerEngine`] recording every call.
#[derive(Default)]
pub struct FakeEngine {
    state: Mutex<FakeState>,
    stdin: Arc<Mutex<Vec<u8>>>,
    stdin_closed: Arc<AtomicBool>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().expect("fake engine state poisoned")
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.state().fail_launch = fail;
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.state().fail_stop = fail;
    }

    pub fn set_fail_shell(&self, fail: bool) {
        self.state().fail_shell = fail;
    }

    pub fn set_managed(&self, containers: Vec<ManagedContainer>) {
        self.state().managed = containers;
    }

    /// Chunks the next shell prints. With `hold_open` the output never ends
    /// on its own.
    pub fn set_shell_output(&self, chunks: &[&str], hold_open: bool) {
        let mut state = self.state();
        state.shell_output = chunks
            .iter()
            .map(|c| Bytes::copy_from_slice(c.as_bytes()))
            .collect();
        state.hold_output_open = hold_open;
    }

    /// Make the shell output stream fail after its scripted chunks.
    pub fn set_output_error(&self, fail: bool) {
        self.state().output_error = fail;
    }

    pub fn launches(&self) -> Vec<ContainerSpec> {
        self.state().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.state().launches.len()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    pub fn shell_count(&self) -> usize {
        self.state().shells.len()
    }

    pub fn shells(&self) -> Vec<(String, Vec<String>)> {
        self.state().shells.clone()
    }

    /// Everything written to shell stdin so far.
    pub fn stdin(&self) -> Vec<u8> {
        self.stdin.lock().expect("stdin poisoned").clone()
    }

    pub fn stdin_closed(&self) -> bool {
        self.stdin_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;

        let mut state = self.state();
        if state.fail_launch {
            return Err(EngineError::Other("image not found".to_string()));
        }
        state.launches.push(spec.clone());
        Ok(format!("container-{}", state.launches.len()))
    }

    async fn stop_and_remove(&self, container_id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.fail_stop {
            return Err(EngineError::Other("daemon unavailable".to_string()));
        }
        state.stopped.push(container_id.to_string());
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, EngineError> {
        Ok(self.state().managed.clone())
    }

    async fn open_shell(
        &self,
        container_id: &str,
        command: &[String],
        _working_dir: &str,
    ) -> Result<ShellSession, EngineError> {
        let mut state = self.state();
        state
            .shells
            .push((container_id.to_string(), command.to_vec()));

        if state.fail_shell {
            return Err(EngineError::ContainerNotFound(container_id.to_string()));
        }

        let chunks: Vec<Result<Bytes, EngineError>> =
            state.shell_output.iter().cloned().map(Ok).collect();
        let tail: Vec<Result<Bytes, EngineError>> = if state.output_error {
            vec![Err(EngineError::Other("connection reset".to_string()))]
        } else {
            Vec::new()
        };

        let output = stream::iter(chunks).chain(stream::iter(tail));
        let output = if state.hold_output_open {
            output.chain(stream::pending()).boxed()
        } else {
            output.boxed()
        };

        Ok(ShellSession {
            output,
            input: Box::pin(CaptureWriter {
                buf: Arc::clone(&self.stdin),
                closed: Arc::clone(&self.stdin_closed),
            }),
        })
    }
}

struct CaptureWriter {
    buf: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.buf
            .lock()
            .expect("stdin poisoned")
            .extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}
