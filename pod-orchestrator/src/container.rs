//! Container settings and the per-owner container specification.
//!
//! The label set produced here is consumed by the Traefik reverse proxy and
//! is a compatibility boundary: router and service names, rule syntax and the
//! management labels must not change without updating the proxy side.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Label marking containers managed by codepod.
pub const MANAGED_LABEL: &str = "codepod.managed";
/// Label carrying the owner identifier, used for startup reconciliation.
pub const OWNER_LABEL: &str = "codepod.owner";

/// Fixed per-sandbox resource caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCaps {
    /// Memory limit in megabytes
    pub memory_mb: u64,
    /// Relative CPU weight
    pub cpu_shares: i64,
    /// CPU quota in microseconds per `cpu_period` (100000 = 1 core)
    pub cpu_quota: i64,
    pub cpu_period: i64,
    /// Maximum number of processes inside the container
    pub pids_limit: i64,
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self {
            memory_mb: 512,
            cpu_shares: 256,
            cpu_quota: 50_000,
            cpu_period: 100_000,
            pids_limit: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    pub image: String,
    /// Long-running command keeping the container alive
    pub command: Vec<String>,
    /// Mount point of the sandbox root inside the container
    pub mount_target: String,
    /// Port of the user's dev server inside the container
    pub service_port: u16,
    /// Base domain; each owner is exposed as `<owner>.<domain>`
    pub domain: String,
    /// Traefik certificate resolver used for TLS
    pub cert_resolver: String,
    /// Docker network shared with the reverse proxy
    pub network: Option<String>,
    pub caps: ResourceCaps,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "user-node-workspace".to_string(),
            command: vec!["sh".to_string()],
            mount_target: "/workspace".to_string(),
            service_port: 3000,
            domain: "localhost".to_string(),
            cert_resolver: "letsencrypt".to_string(),
            network: None,
            caps: ResourceCaps::default(),
        }
    }
}

/// Everything the engine needs to launch one owner's container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub owner: String,
    pub image: String,
    pub command: Vec<String>,
    /// Host-side bind mount source (canonical sandbox root)
    pub host_root: String,
    pub mount_target: String,
    pub service_port: u16,
    pub network: Option<String>,
    pub labels: HashMap<String, String>,
    pub caps: ResourceCaps,
}

impl ContainerSpec {
    pub fn for_owner(owner: &str, host_root: &Path, settings: &ContainerSettings) -> Self {
        Self {
            name: container_name(owner),
            owner: owner.to_string(),
            image: settings.image.clone(),
            command: settings.command.clone(),
            host_root: host_root.display().to_string(),
            mount_target: settings.mount_target.clone(),
            service_port: settings.service_port,
            network: settings.network.clone(),
            labels: routing_labels(owner, settings),
            caps: settings.caps.clone(),
        }
    }

    pub fn bind(&self) -> String {
        format!("{}:{}", self.host_root, self.mount_target)
    }

    pub fn exposed_port(&self) -> String {
        format!("{}/tcp", self.service_port)
    }
}

pub fn container_name(owner: &str) -> String {
    format!("workspace-{}", owner)
}

/// Proxy routing and management labels for an owner's container.
pub fn routing_labels(owner: &str, settings: &ContainerSettings) -> HashMap<String, String> {
    let router = container_name(owner);
    let mut labels = HashMap::new();

    labels.insert("traefik.enable".to_string(), "true".to_string());
    labels.insert(
        format!("traefik.http.routers.{}.rule", router),
        format!("Host(`{}.{}`)", owner, settings.domain),
    );
    labels.insert(
        format!("traefik.http.routers.{}.entrypoints", router),
        "websecure".to_string(),
    );
    labels.insert(
        format!("traefik.http.routers.{}.tls", router),
        "true".to_string(),
    );
    labels.insert(
        format!("traefik.http.routers.{}.tls.certresolver", router),
        settings.cert_resolver.clone(),
    );
    labels.insert(
        format!("traefik.http.services.{}.loadbalancer.server.port", router),
        settings.service_port.to_string(),
    );
    if let Some(network) = &settings.network {
        labels.insert("traefik.docker.network".to_string(), network.clone());
    }

    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels.insert(OWNER_LABEL.to_string(), owner.to_string());

    labels
}
