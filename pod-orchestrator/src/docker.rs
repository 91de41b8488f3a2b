//! Docker implementation of [`ContainerEngine`] via bollard.

use crate::container::{ContainerSpec, MANAGED_LABEL, OWNER_LABEL};
use crate::engine::{ContainerEngine, EngineError, ManagedContainer, ShellSession};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
        StartContainerOptions, StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::HostConfig,
    Docker,
};
use futures_util::StreamExt;
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Grace period before the engine kills a stopping container
const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;

pub struct DockerEngine {
    docker: Docker,
    stop_timeout_secs: i64,
}

impl DockerEngine {
    /// Connect to the local Docker daemon and verify it answers.
    pub async fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()?;

        docker.ping().await.map_err(|e| {
            error!("Failed to connect to Docker daemon: {}", e);
            EngineError::Docker(e)
        })?;

        info!("Connected to Docker daemon");
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker,
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }

    fn host_config(spec: &ContainerSpec) -> HostConfig {
        HostConfig {
            binds: Some(vec![spec.bind()]),
            memory: Some((spec.caps.memory_mb * 1024 * 1024) as i64),
            cpu_shares: Some(spec.caps.cpu_shares),
            cpu_quota: Some(spec.caps.cpu_quota),
            cpu_period: Some(spec.caps.cpu_period),
            pids_limit: Some(spec.caps.pids_limit),
            // No capabilities, no privilege escalation, no shared IPC namespace
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ipc_mode: Some("none".to_string()),
            privileged: Some(false),
            auto_remove: Some(true),
            network_mode: spec.network.clone(),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn launch(&self, spec: &ContainerSpec) -> Result<String, EngineError> {
        debug!(
            "Creating container {} for owner {} with image {}",
            spec.name, spec.owner, spec.image
        );

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(spec.exposed_port(), HashMap::new());

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            tty: Some(true),
            open_stdin: Some(true),
            working_dir: Some(spec.mount_target.clone()),
            labels: Some(spec.labels.clone()),
            exposed_ports: Some(exposed_ports),
            host_config: Some(Self::host_config(spec)),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 409, ..
                } => EngineError::NameConflict(spec.name.clone()),
                _ => {
                    error!("Failed to create container {}: {}", spec.name, e);
                    EngineError::Docker(e)
                }
            })?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            error!("Failed to start container {}: {}", response.id, e);
            // Never leave a created-but-dead container holding the name
            if let Err(cleanup) = self.stop_and_remove(&response.id).await {
                warn!("Failed to clean up container {}: {}", response.id, cleanup);
            }
            return Err(EngineError::Docker(e));
        }

        info!(
            "Started container {} ({}) for owner {}",
            spec.name, response.id, spec.owner
        );
        Ok(response.id)
    }

    async fn stop_and_remove(&self, container_id: &str) -> Result<(), EngineError> {
        debug!("Stopping container {}", container_id);

        let options = StopContainerOptions {
            t: self.stop_timeout_secs,
        };

        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => {}
            Err(BollardError::DockerResponseServerError {
                status_code: 304 | 404,
                ..
            }) => {
                debug!("Container {} already stopped", container_id);
            }
            Err(e) => {
                error!("Failed to stop container {}: {}", container_id, e);
                return Err(EngineError::Docker(e));
            }
        }

        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        // Auto-remove usually wins the race; 404 and 409 ("removal in
        // progress") both mean the container is going away.
        match self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            Ok(()) => {}
            Err(BollardError::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => {
                debug!("Container {} already removed", container_id);
            }
            Err(e) => {
                error!("Failed to remove container {}: {}", container_id, e);
                return Err(EngineError::Docker(e));
            }
        }

        info!("Stopped and removed container {}", container_id);
        Ok(())
    }

    async fn list_managed(&self) -> Result<Vec<ManagedContainer>, EngineError> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{}=true", MANAGED_LABEL)],
        );

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        Ok(containers
            .into_iter()
            .map(|c| ManagedContainer {
                id: c.id.unwrap_or_default(),
                name: c
                    .names
                    .unwrap_or_default()
                    .first()
                    .map(|n| n.trim_start_matches('/').to_string())
                    .unwrap_or_default(),
                owner: c
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(OWNER_LABEL))
                    .cloned(),
                running: c.state.as_deref() == Some("running"),
            })
            .collect())
    }

    async fn open_shell(
        &self,
        container_id: &str,
        command: &[String],
        working_dir: &str,
    ) -> Result<ShellSession, EngineError> {
        debug!("Opening shell {:?} in container {}", command, container_id);

        let exec_config = CreateExecOptions {
            cmd: Some(command.to_vec()),
            working_dir: Some(working_dir.to_string()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404, ..
                } => EngineError::ContainerNotFound(container_id.to_string()),
                _ => EngineError::Docker(e),
            })?;

        let start = StartExecOptions {
            detach: false,
            tty: true,
            output_capacity: None,
        };

        match self.docker.start_exec(&exec.id, Some(start)).await? {
            StartExecResults::Attached { output, input } => Ok(ShellSession {
                output: Box::pin(
                    output.map(|chunk| chunk.map(LogOutput::into_bytes).map_err(EngineError::from)),
                ),
                input,
            }),
            StartExecResults::Detached => Err(EngineError::Detached),
        }
    }
}
