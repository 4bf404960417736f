pub mod docker;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Security hardening applied to every algorithm and side-car container.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub cap_drop: Vec<String>,
    pub cap_add: Vec<String>,
    pub no_new_privileges: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cap_drop: vec!["ALL".to_string()],
            cap_add: vec![],
            no_new_privileges: true,
        }
    }
}

/// A single bind or volume mount attached to a container.
#[derive(Debug, Clone)]
pub struct Mount {
    /// Host path (bind mount) or volume name.
    pub source: String,
    pub target: String,
    pub read_only: bool,
    pub is_volume: bool,
}

/// Requests a slice of host devices be exposed inside the container, e.g. GPUs.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub driver: String,
    /// -1 requests all available devices.
    pub count: i64,
    pub capabilities: Vec<Vec<String>>,
}

/// All parameters needed to create a container.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub env_vars: Vec<String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    pub network: Option<String>,
    /// Docker restart policy name, e.g. `"always"`. `None` means the default (`"no"`).
    pub restart_policy: Option<String>,
    pub device_requests: Vec<DeviceRequest>,
    pub security: SecurityConfig,
}

/// High-level container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Stopped,
    Gone,
}

/// Lightweight container info returned by list operations.
#[derive(Debug, Clone, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub names: Vec<String>,
    pub image: String,
    pub state: String,
    pub status: String,
}

/// Label-based filter for listing containers.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilters {
    pub labels: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short engine identifier, e.g. `"docker"`, `"podman"`.
    fn engine_id(&self) -> &str;

    async fn ping(&self) -> Result<(), RuntimeError>;

    // Networks
    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError>;
    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> Result<(), RuntimeError>;
    async fn disconnect_network(
        &self,
        network: &str,
        container: &str,
        force: bool,
    ) -> Result<(), RuntimeError>;
    /// Removes the network. When `kill_containers` is set, members still attached
    /// are force-removed first.
    async fn remove_network(&self, name: &str, kill_containers: bool) -> Result<(), RuntimeError>;

    // Registries / images
    async fn login(&self, registry: &str, username: &str, password: &str)
        -> Result<(), RuntimeError>;
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
    async fn get_image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError>;
    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError>;

    // Containers
    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError>;
    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError>;
    async fn get_logs(&self, id: &str, tail: u32) -> Result<Vec<String>, RuntimeError>;

    // Volumes
    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError>;
}
