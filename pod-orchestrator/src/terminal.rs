//! Interactive shell bridge between a client socket and a workspace container.
//!
//! The bridge is transport-agnostic: the HTTP layer adapts its WebSocket into
//! a byte stream and a [`TerminalFrame`] sink. Bytes pass through unchanged in
//! both directions.

use crate::engine::ShellSession;
use crate::orchestrator::WorkspaceOrchestrator;
use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// WebSocket close codes sent by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    GoingAway,
    InternalError,
    NotFound,
}

impl CloseCode {
    pub fn code(&self) -> u16 {
        match self {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::InternalError => 1011,
            CloseCode::NotFound => 4404,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseCode::Normal => "Shell exited",
            CloseCode::GoingAway => "Idle timeout",
            CloseCode::InternalError => "Internal error",
            CloseCode::NotFound => "No running workspace",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalFrame {
    Data(Bytes),
    Close(CloseCode),
}

/// Why a bridge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// The owner has no live container; nothing was started
    NoContainer,
    /// The shell could not be created or attached
    ShellUnavailable,
    /// The client went away; shell input was closed
    SocketClosed,
    /// The shell ended its output
    ShellExited,
    /// Reading from or writing to the shell failed
    EngineFailed,
    /// Writing to the client failed
    SocketFailed,
    /// No traffic in either direction for the idle timeout
    IdleTimeout,
}

impl BridgeOutcome {
    /// Close frame to send to the client, if the socket is still usable.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            BridgeOutcome::NoContainer => Some(CloseCode::NotFound),
            BridgeOutcome::ShellUnavailable | BridgeOutcome::EngineFailed => {
                Some(CloseCode::InternalError)
            }
            BridgeOutcome::ShellExited => Some(CloseCode::Normal),
            BridgeOutcome::IdleTimeout => Some(CloseCode::GoingAway),
            BridgeOutcome::SocketClosed | BridgeOutcome::SocketFailed => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TerminalSettings {
    /// Command started for each session
    pub shell: Vec<String>,
    /// `None` disables the idle timeout
    pub idle_timeout: Option<Duration>,
    pub working_dir: String,
}

impl Default for TerminalSettings {
    fn default() -> Self {
        Self {
            shell: vec!["sh".to_string()],
            idle_timeout: None,
            working_dir: "/workspace".to_string(),
        }
    }
}

pub struct TerminalBridge {
    orchestrator: Arc<WorkspaceOrchestrator>,
    settings: TerminalSettings,
}

impl TerminalBridge {
    pub fn new(orchestrator: Arc<WorkspaceOrchestrator>, settings: TerminalSettings) -> Self {
        Self {
            orchestrator,
            settings,
        }
    }

    pub fn settings(&self) -> &TerminalSettings {
        &self.settings
    }

    /// Attach a shell in the owner's container to a client connection and
    /// pump bytes until either side ends. The container keeps running.
    pub async fn connect<I, O>(&self, owner: &str, mut socket_in: I, mut socket_out: O) -> BridgeOutcome
    where
        I: Stream<Item = Bytes> + Unpin + Send,
        O: Sink<TerminalFrame> + Unpin + Send,
        O::Error: Display,
    {
        let Some(handle) = self.orchestrator.find_container(owner) else {
            warn!("Terminal requested for {} without a running workspace", owner);
            let outcome = BridgeOutcome::NoContainer;
            finish(&mut socket_out, outcome).await;
            return outcome;
        };

        let session = self
            .orchestrator
            .engine()
            .open_shell(
                &handle.container_id,
                &self.settings.shell,
                &self.settings.working_dir,
            )
            .await;

        let ShellSession {
            mut output,
            mut input,
        } = match session {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to open shell in {}: {}", handle.container_name, e);
                let outcome = BridgeOutcome::ShellUnavailable;
                finish(&mut socket_out, outcome).await;
                return outcome;
            }
        };

        info!("Terminal attached to {} for {}", handle.container_name, owner);
        let activity = Activity::new();

        let outcome = {
            let to_socket = async {
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(bytes) => {
                            activity.touch();
                            if let Err(e) = socket_out.send(TerminalFrame::Data(bytes)).await {
                                debug!("Terminal socket write failed: {}", e);
                                return BridgeOutcome::SocketFailed;
                            }
                        }
                        Err(e) => {
                            error!("Shell output failed in {}: {}", handle.container_name, e);
                            return BridgeOutcome::EngineFailed;
                        }
                    }
                }
                BridgeOutcome::ShellExited
            };

            let to_shell = async {
                while let Some(bytes) = socket_in.next().await {
                    activity.touch();
                    let written = match input.write_all(&bytes).await {
                        Ok(()) => input.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = written {
                        error!("Shell input failed in {}: {}", handle.container_name, e);
                        return BridgeOutcome::EngineFailed;
                    }
                }
                BridgeOutcome::SocketClosed
            };

            let idle = idle_watchdog(self.settings.idle_timeout, &activity);

            tokio::select! {
                outcome = to_socket => outcome,
                outcome = to_shell => outcome,
                outcome = idle => outcome,
            }
        };

        // End of input lets the shell exit; the container itself stays up.
        if let Err(e) = input.shutdown().await {
            debug!("Closing shell input failed: {}", e);
        }

        finish(&mut socket_out, outcome).await;
        info!("Terminal for {} ended: {:?}", owner, outcome);
        outcome
    }
}

async fn finish<O>(socket_out: &mut O, outcome: BridgeOutcome)
where
    O: Sink<TerminalFrame> + Unpin,
    O::Error: Display,
{
    if let Some(code) = outcome.close_code() {
        if let Err(e) = socket_out.send(TerminalFrame::Close(code)).await {
            debug!("Failed to send close frame {}: {}", code.code(), e);
        }
    }
}

/// Last time a byte crossed the bridge in either direction.
struct Activity {
    last: Mutex<Instant>,
}

impl Activity {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last.lock().unwrap_or_else(|p| p.into_inner()) = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.last.lock().unwrap_or_else(|p| p.into_inner())
    }
}

async fn idle_watchdog(timeout: Option<Duration>, activity: &Activity) -> BridgeOutcome {
    let Some(timeout) = timeout else {
        return std::future::pending().await;
    };

    loop {
        let deadline = activity.last() + timeout;
        tokio::time::sleep_until(deadline).await;
        if activity.last() + timeout <= Instant::now() {
            return BridgeOutcome::IdleTimeout;
        }
    }
}
