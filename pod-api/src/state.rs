use pod_orchestrator::{TerminalBridge, TerminalSettings, WorkspaceOrchestrator};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<WorkspaceOrchestrator>,
    pub bridge: Arc<TerminalBridge>,
}

impl AppState {
    pub fn new(orchestrator: Arc<WorkspaceOrchestrator>, terminal: TerminalSettings) -> Self {
        Self {
            bridge: Arc::new(TerminalBridge::new(Arc::clone(&orchestrator), terminal)),
            orchestrator,
        }
    }
}
