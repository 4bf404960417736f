//! C4: owns one algorithm container's lifecycle end to end.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::database::DatabaseBinding;
use crate::error::{NodeError, NodeResult};
use crate::network::NetworkManager;
use crate::runtime::{ContainerConfig, ContainerRuntime, ContainerState, DeviceRequest, Mount, RuntimeError};
use crate::vpn::VpnManager;

pub const LABEL_TYPE: &str = "fednode-type";
pub const LABEL_NODE: &str = "node";
pub const LABEL_RESULT_ID: &str = "result_id";

#[derive(Debug, Clone)]
pub struct TaskDescriptor {
    pub result_id: i64,
    pub task_id: i64,
    pub parent_id: Option<i64>,
    pub initiator_org: i64,
    pub initiator_user: i64,
    pub image: String,
    pub token: String,
    pub database_label: String,
    pub tmp_volume_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Active,
    Finished,
    Failed,
    Killed,
}

#[derive(Debug, Clone)]
pub struct RunRecord {
    pub result_id: i64,
    pub task_id: i64,
    pub parent_id: Option<i64>,
    pub state: RunState,
    pub vpn_ports: Vec<u16>,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Start-time failure classification consumed only by the orchestrator's
/// retry loop; never propagated past it.
#[derive(Debug)]
pub enum StartFailure {
    /// Unknown cause — the orchestrator retries up to 3 attempts total.
    Transient(String),
    /// Explicitly terminal — no retry.
    Permanent(String),
}

pub struct TaskRunner {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<NetworkManager>,
    node_name: String,
    tasks_dir: PathBuf,
    proxy_url: Option<String>,
    vpn: Option<Arc<VpnManager>>,
    gpu_requested: bool,
    algorithm_env: HashMap<String, String>,
    descriptor: TaskDescriptor,
    container_id: Mutex<Option<String>>,
    record: Mutex<RunRecord>,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<NetworkManager>,
        node_name: String,
        tasks_dir: PathBuf,
        proxy_url: Option<String>,
        vpn: Option<Arc<VpnManager>>,
        gpu_requested: bool,
        algorithm_env: HashMap<String, String>,
        descriptor: TaskDescriptor,
    ) -> Self {
        let record = RunRecord {
            result_id: descriptor.result_id,
            task_id: descriptor.task_id,
            parent_id: descriptor.parent_id,
            state: RunState::Starting,
            vpn_ports: Vec::new(),
            started_at: None,
            ended_at: None,
        };
        Self {
            runtime,
            network,
            node_name,
            tasks_dir,
            proxy_url,
            vpn,
            gpu_requested,
            algorithm_env,
            descriptor,
            container_id: Mutex::new(None),
            record: Mutex::new(record),
        }
    }

    pub fn result_id(&self) -> i64 {
        self.descriptor.result_id
    }

    pub fn container_name(&self) -> String {
        format!("fednode-{}-algo-{}", self.node_name, self.descriptor.result_id)
    }

    pub fn labels(&self) -> HashMap<String, String> {
        let mut labels = HashMap::new();
        labels.insert(LABEL_TYPE.to_string(), "algorithm".to_string());
        labels.insert(LABEL_NODE.to_string(), self.node_name.clone());
        labels.insert(LABEL_RESULT_ID.to_string(), self.descriptor.result_id.to_string());
        labels
    }

    pub async fn record(&self) -> RunRecord {
        self.record.lock().await.clone()
    }

    fn scratch_dir(&self) -> PathBuf {
        self.tasks_dir.join(self.descriptor.result_id.to_string())
    }

    /// Materializes input/scratch files, composes the container spec, and
    /// starts it. On success, internal state transitions to [`RunState::Active`].
    pub async fn start(&self, input: &[u8], database: &DatabaseBinding) -> Result<Vec<u16>, StartFailure> {
        let scratch = self.scratch_dir();
        std::fs::create_dir_all(&scratch)
            .map_err(|e| StartFailure::Permanent(format!("scratch dir creation failed: {e}")))?;
        std::fs::write(scratch.join("input"), input)
            .map_err(|e| StartFailure::Permanent(format!("failed to write input: {e}")))?;

        let vpn_ports = if let Some(vpn) = &self.vpn {
            vpn.request_ports(self.descriptor.result_id, 1)
                .await
                .map_err(|e| StartFailure::Transient(e.to_string()))?
        } else {
            Vec::new()
        };

        let mut env_vars: Vec<String> = vec![
            format!("TOKEN={}", self.descriptor.token),
            format!("DATABASE_URI={}", database.uri),
        ];
        for (k, v) in &self.algorithm_env {
            env_vars.push(format!("{k}={v}"));
        }
        if let Some(proxy) = &self.proxy_url {
            env_vars.push(format!("HTTP_PROXY={proxy}"));
            env_vars.push(format!("HTTPS_PROXY={proxy}"));
        }

        let mut mounts = vec![
            Mount {
                source: scratch.join("input").to_string_lossy().into_owned(),
                target: "/mnt/input".to_string(),
                read_only: true,
                is_volume: false,
            },
            Mount {
                source: scratch.join("output").to_string_lossy().into_owned(),
                target: "/mnt/output".to_string(),
                read_only: false,
                is_volume: false,
            },
            Mount {
                source: self.descriptor.tmp_volume_name.clone(),
                target: "/mnt/tmp".to_string(),
                read_only: false,
                is_volume: true,
            },
        ];
        // The database copy DatabaseBinder::prepare_for_run placed in the
        // scratch dir lives on the host at `database.uri`. DATABASE_URI above
        // points the algorithm at that same path, so it must be bind-mounted
        // in at an identical path inside the container.
        if database.is_file {
            mounts.push(Mount {
                source: database.uri.clone(),
                target: database.uri.clone(),
                read_only: false,
                is_volume: false,
            });
        }

        let device_requests = if self.gpu_requested {
            vec![DeviceRequest {
                driver: "nvidia".to_string(),
                count: -1,
                capabilities: vec![vec!["gpu".to_string()]],
            }]
        } else {
            vec![]
        };

        let config = ContainerConfig {
            name: self.container_name(),
            image: self.descriptor.image.clone(),
            env_vars,
            labels: self.labels(),
            mounts,
            network: Some(self.network.name().to_string()),
            restart_policy: None,
            device_requests,
            security: Default::default(),
        };

        if !self
            .runtime
            .image_exists(&self.descriptor.image)
            .await
            .map_err(|e| StartFailure::Transient(e.to_string()))?
        {
            self.runtime
                .pull_image(&self.descriptor.image)
                .await
                .map_err(|e| StartFailure::Transient(format!("pull failed: {e}")))?;
        }

        let id = match self.runtime.create_container(config).await {
            Ok(id) => id,
            Err(e) => return Err(StartFailure::Transient(e.to_string())),
        };

        if let Err(e) = self.runtime.start_container(&id).await {
            return Err(StartFailure::Transient(e.to_string()));
        }

        *self.container_id.lock().await = Some(id);
        {
            let mut record = self.record.lock().await;
            record.state = RunState::Active;
            record.vpn_ports = vpn_ports.clone();
            record.started_at = Some(chrono::Utc::now());
        }
        Ok(vpn_ports)
    }

    /// Returns `Ok(true)` if the container has exited, `Ok(false)` if still
    /// running. Returns [`RuntimeError::NotFound`] if the container has
    /// disappeared outside this runner's control.
    pub async fn is_finished(&self) -> Result<bool, RuntimeError> {
        let id = self.container_id.lock().await.clone();
        let Some(id) = id else { return Ok(false) };

        match self.runtime.container_state(&id).await? {
            ContainerState::Running => Ok(false),
            ContainerState::Stopped => Ok(true),
            ContainerState::Gone => Err(RuntimeError::NotFound(id)),
        }
    }

    /// Reads the agreed output file from the scratch area.
    pub fn get_results(&self) -> NodeResult<Vec<u8>> {
        let path = self.scratch_dir().join("output");
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(NodeError::Io(e)),
        }
    }

    pub async fn logs(&self) -> NodeResult<String> {
        let id = self.container_id.lock().await.clone();
        let Some(id) = id else { return Ok(String::new()) };
        let lines = self.runtime.get_logs(&id, 1000).await?;
        Ok(lines.join("\n"))
    }

    /// Stops and removes the container, releases VPN ports, and removes the
    /// scratch directory. Safe to call more than once.
    pub async fn cleanup(&self) -> NodeResult<()> {
        let id = self.container_id.lock().await.clone();
        if let Some(id) = id {
            let _ = self.runtime.stop_container(&id).await;
            self.runtime.remove_container(&id).await?;
        }
        if let Some(vpn) = &self.vpn {
            vpn.release_ports(self.descriptor.result_id).await?;
        }
        let _ = std::fs::remove_dir_all(self.scratch_dir());
        Ok(())
    }

    pub async fn mark_failed(&self) {
        let mut record = self.record.lock().await;
        record.state = RunState::Failed;
        record.ended_at = Some(chrono::Utc::now());
    }

    pub async fn mark_finished(&self) {
        let mut record = self.record.lock().await;
        record.state = RunState::Finished;
        record.ended_at = Some(chrono::Utc::now());
    }
}
