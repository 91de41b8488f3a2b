use pod_orchestrator::{
    ContainerSettings, LocalMirrorSynchronizer, PathSandbox, ResourceCaps, S3CliSynchronizer,
    SyncFailurePolicy, Synchronizer, TerminalSettings,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncBackend {
    S3,
    Local,
}

impl FromStr for SyncBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" => Ok(SyncBackend::S3),
            "local" => Ok(SyncBackend::Local),
            other => Err(format!("unknown sync backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Parent directory of every owner's sandbox root
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_domain")]
    pub domain: String,

    #[serde(default = "default_cert_resolver")]
    pub cert_resolver: String,

    #[serde(default = "default_network")]
    pub network: Option<String>,

    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,

    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,

    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,

    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    #[serde(default = "default_service_port")]
    pub service_port: u16,

    #[serde(default = "default_shell")]
    pub shell: Vec<String>,

    #[serde(default = "default_sync_backend")]
    pub sync_backend: SyncBackend,

    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: Option<String>,

    #[serde(default = "default_sync_mirror_root")]
    pub sync_mirror_root: Option<PathBuf>,

    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,

    #[serde(default = "default_sync_failure_policy")]
    pub sync_failure_policy: SyncFailurePolicy,

    /// 0 disables the terminal idle timeout
    #[serde(default = "default_terminal_idle_timeout")]
    pub terminal_idle_timeout_secs: u64,

    /// Allowed CORS origin; permissive when unset
    #[serde(default = "default_frontend_url")]
    pub frontend_url: Option<String>,
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env_string(key)
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn default_bind_addr() -> String {
    env_string("POD_API_BIND").unwrap_or_else(|| "0.0.0.0:3121".to_string())
}

fn default_db_path() -> PathBuf {
    if let Some(path) = env_string("POD_API_DB_PATH") {
        return PathBuf::from(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home)
        .join(".codepod")
        .join("api")
        .join("codepod.db")
}

fn default_storage_root() -> PathBuf {
    env_string("BASE_WORKSPACE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/workspace-storage"))
}

fn default_image() -> String {
    env_string("WORKSPACE_IMAGE").unwrap_or_else(|| ContainerSettings::default().image)
}

fn default_domain() -> String {
    env_string("WORKSPACE_DOMAIN").unwrap_or_else(|| ContainerSettings::default().domain)
}

fn default_cert_resolver() -> String {
    env_string("WORKSPACE_CERT_RESOLVER")
        .unwrap_or_else(|| ContainerSettings::default().cert_resolver)
}

fn default_network() -> Option<String> {
    env_string("WORKSPACE_NETWORK")
}

fn default_memory_mb() -> u64 {
    env_parse("WORKSPACE_MEMORY_MB", ResourceCaps::default().memory_mb)
}

fn default_cpu_shares() -> i64 {
    env_parse("WORKSPACE_CPU_SHARES", ResourceCaps::default().cpu_shares)
}

fn default_cpu_quota() -> i64 {
    env_parse("WORKSPACE_CPU_QUOTA", ResourceCaps::default().cpu_quota)
}

fn default_pids_limit() -> i64 {
    env_parse("WORKSPACE_PIDS_LIMIT", ResourceCaps::default().pids_limit)
}

fn default_service_port() -> u16 {
    env_parse("WORKSPACE_SERVICE_PORT", 3000)
}

fn default_shell() -> Vec<String> {
    env_string("WORKSPACE_SHELL")
        .map(|s| parse_shell(&s))
        .filter(|argv| !argv.is_empty())
        .unwrap_or_else(|| vec!["sh".to_string()])
}

fn default_sync_backend() -> SyncBackend {
    env_parse("SYNC_BACKEND", SyncBackend::S3)
}

fn default_s3_bucket() -> Option<String> {
    env_string("S3_BUCKET_NAME")
}

fn default_sync_mirror_root() -> Option<PathBuf> {
    env_string("SYNC_MIRROR_ROOT").map(PathBuf::from)
}

fn default_sync_timeout() -> u64 {
    env_parse("SYNC_TIMEOUT_SECS", 300) // 5 minutes
}

fn default_sync_failure_policy() -> SyncFailurePolicy {
    env_parse("SYNC_FAILURE_POLICY", SyncFailurePolicy::Abort)
}

fn default_terminal_idle_timeout() -> u64 {
    env_parse("TERMINAL_IDLE_TIMEOUT_SECS", 0)
}

fn default_frontend_url() -> Option<String> {
    env_string("FRONTEND_URL")
}

/// Split a shell command line on whitespace (`bash -l` → `["bash", "-l"]`).
pub fn parse_shell(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            db_path: default_db_path(),
            storage_root: default_storage_root(),
            image: default_image(),
            domain: default_domain(),
            cert_resolver: default_cert_resolver(),
            network: default_network(),
            memory_mb: default_memory_mb(),
            cpu_shares: default_cpu_shares(),
            cpu_quota: default_cpu_quota(),
            pids_limit: default_pids_limit(),
            service_port: default_service_port(),
            shell: default_shell(),
            sync_backend: default_sync_backend(),
            s3_bucket: default_s3_bucket(),
            sync_mirror_root: default_sync_mirror_root(),
            sync_timeout_secs: default_sync_timeout(),
            sync_failure_policy: default_sync_failure_policy(),
            terminal_idle_timeout_secs: default_terminal_idle_timeout(),
            frontend_url: default_frontend_url(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn container_settings(&self) -> ContainerSettings {
        ContainerSettings {
            image: self.image.clone(),
            domain: self.domain.clone(),
            cert_resolver: self.cert_resolver.clone(),
            network: self.network.clone(),
            service_port: self.service_port,
            caps: ResourceCaps {
                memory_mb: self.memory_mb,
                cpu_shares: self.cpu_shares,
                cpu_quota: self.cpu_quota,
                pids_limit: self.pids_limit,
                ..ResourceCaps::default()
            },
            ..ContainerSettings::default()
        }
    }

    pub fn terminal_settings(&self) -> TerminalSettings {
        let container = self.container_settings();
        TerminalSettings {
            shell: self.shell.clone(),
            idle_timeout: match self.terminal_idle_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            working_dir: container.mount_target,
        }
    }

    pub fn path_sandbox(&self) -> PathSandbox {
        PathSandbox::new(&self.storage_root)
    }

    /// Build the configured synchronizer. Missing bucket or mirror root is
    /// reported on first use, not here.
    pub fn synchronizer(&self, paths: PathSandbox) -> Arc<dyn Synchronizer> {
        match self.sync_backend {
            SyncBackend::S3 => Arc::new(S3CliSynchronizer::new(
                self.s3_bucket.clone(),
                paths,
                Duration::from_secs(self.sync_timeout_secs),
            )),
            SyncBackend::Local => Arc::new(LocalMirrorSynchronizer::new(
                self.sync_mirror_root.clone(),
                paths,
            )),
        }
    }
}
