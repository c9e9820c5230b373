use serde::{Deserialize, Serialize};

/// Top-level dispatch server configuration, deserialized from `dispatch.toml`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub lease: LeaseConfig,
    pub paths: PathsConfig,
}

/// Network and TLS settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub command_port: u16,
    pub file_port: u16,
    pub metrics_port: u16,
    pub cert_dir: String,
    pub idle_read_timeout_secs: u64,
}

/// Relational store settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_path: String,
}

/// Lease timeout and reclaim settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaseConfig {
    pub lease_timeout_secs: u64,
    pub max_retries: u32,
    pub reclaim_interval_secs: u64,
}

/// Filesystem layout roots for task inputs and results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PathsConfig {
    pub tasks_dir: String,
    pub results_dir: String,
}
