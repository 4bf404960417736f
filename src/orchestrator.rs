//! C7: top-level orchestrator. Admits tasks via the policy gate, composes the
//! network, proxy, VPN and database components per task, and maintains the
//! active/failed run registries that back the blocking FIFO harvest.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::config::NodeConfig;
use crate::database::DatabaseBinder;
use crate::kill::{KilledResult, ToBeKilled};
use crate::network::NetworkManager;
use crate::policy::{PolicyGate, TaskContext};
use crate::runtime::{ContainerFilters, ContainerRuntime};
use crate::task_runner::{StartFailure, TaskDescriptor, TaskRunner, LABEL_NODE, LABEL_RESULT_ID, LABEL_TYPE};
use crate::vpn::VpnManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Active,
    NotAllowed,
    Failed,
    Completed,
}

pub struct RunOutcome {
    pub status: TaskStatus,
    pub vpn_ports: Vec<u16>,
}

pub struct HarvestResult {
    pub result_id: i64,
    pub task_id: i64,
    pub logs: String,
    pub data: Vec<u8>,
    pub status: TaskStatus,
    pub parent_id: Option<i64>,
}

struct Registries {
    active: VecDeque<Arc<TaskRunner>>,
    finished: VecDeque<Arc<TaskRunner>>,
    failed: VecDeque<Arc<TaskRunner>>,
}

pub struct DockerManager {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<NetworkManager>,
    policy: PolicyGate,
    databases: DatabaseBinder,
    vpn: Option<Arc<VpnManager>>,
    node_name: String,
    tasks_dir: PathBuf,
    proxy_url: Option<String>,
    gpu_requested: bool,
    algorithm_env: HashMap<String, String>,
    registries: Mutex<Registries>,
}

impl DockerManager {
    pub fn new(
        config: &NodeConfig,
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<NetworkManager>,
        policy: PolicyGate,
        vpn: Option<Arc<VpnManager>>,
        tasks_dir: PathBuf,
        proxy_url: Option<String>,
        running_in_container: bool,
    ) -> Self {
        Self {
            runtime,
            network,
            policy,
            databases: DatabaseBinder::new(config, running_in_container),
            vpn,
            node_name: config.node_name.clone(),
            tasks_dir,
            proxy_url,
            gpu_requested: config.algorithm_device_requests.gpu,
            algorithm_env: config.algorithm_env.clone(),
            registries: Mutex::new(Registries {
                active: VecDeque::new(),
                finished: VecDeque::new(),
                failed: VecDeque::new(),
            }),
        }
    }

    /// Admits and starts one task. Never blocks past the bounded retry window
    /// (3 attempts, 1s apart) on transient start failures.
    pub async fn run(
        &self,
        result_id: i64,
        task_id: i64,
        parent_id: Option<i64>,
        initiator_org: i64,
        initiator_user: i64,
        image: &str,
        input: &[u8],
        tmp_volume_name: &str,
        token: &str,
        database_label: &str,
    ) -> RunOutcome {
        let ctx = TaskContext { parent_id, initiator_org, initiator_user };
        if !self.policy.admit(image, &ctx).await {
            return RunOutcome { status: TaskStatus::NotAllowed, vpn_ports: vec![] };
        }

        if self.has_running_duplicate(result_id).await {
            return RunOutcome { status: TaskStatus::Active, vpn_ports: vec![] };
        }

        let database = match self.databases.prepare_for_run(
            database_label,
            &self.tasks_dir.join(result_id.to_string()),
        ) {
            Ok(db) => db,
            Err(e) => {
                log::error!("database binding failed for result {}: {}", result_id, e);
                return RunOutcome { status: TaskStatus::Failed, vpn_ports: vec![] };
            }
        };

        let descriptor = TaskDescriptor {
            result_id,
            task_id,
            parent_id,
            initiator_org,
            initiator_user,
            image: image.to_string(),
            token: token.to_string(),
            database_label: database_label.to_string(),
            tmp_volume_name: tmp_volume_name.to_string(),
        };

        let runner = Arc::new(TaskRunner::new(
            self.runtime.clone(),
            self.network.clone(),
            self.node_name.clone(),
            self.tasks_dir.clone(),
            self.proxy_url.clone(),
            self.vpn.clone(),
            self.gpu_requested,
            self.algorithm_env.clone(),
            descriptor,
        ));

        let mut vpn_ports = Vec::new();
        let mut attempts = 0;
        let outcome_status = loop {
            attempts += 1;
            match runner.start(input, &database).await {
                Ok(ports) => {
                    vpn_ports = ports;
                    break TaskStatus::Active;
                }
                Err(StartFailure::Permanent(reason)) => {
                    log::error!("permanent start failure for result {}: {}", result_id, reason);
                    break TaskStatus::Failed;
                }
                Err(StartFailure::Transient(reason)) => {
                    log::warn!(
                        "transient start failure for result {} (attempt {}/3): {}",
                        result_id, attempts, reason
                    );
                    if attempts >= 3 {
                        break TaskStatus::Failed;
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        let mut regs = self.registries.lock().await;
        if outcome_status == TaskStatus::Active {
            regs.active.push_back(runner);
        } else {
            runner.mark_failed().await;
            regs.failed.push_back(runner);
        }
        RunOutcome { status: outcome_status, vpn_ports }
    }

    /// Queries the runtime (not the in-memory registry) so duplicate
    /// suppression survives a process restart.
    async fn has_running_duplicate(&self, result_id: i64) -> bool {
        let mut labels = HashMap::new();
        labels.insert(LABEL_TYPE.to_string(), "algorithm".to_string());
        labels.insert(LABEL_NODE.to_string(), self.node_name.clone());
        labels.insert(LABEL_RESULT_ID.to_string(), result_id.to_string());

        match self.runtime.list_containers(ContainerFilters { labels }).await {
            Ok(containers) => !containers.is_empty(),
            Err(e) => {
                log::warn!("duplicate check failed for {}: {}", result_id, e);
                false
            }
        }
    }

    /// Blocks until at least one run has finished or failed, then returns it.
    /// Polls once per second. FIFO across calls: the run that completed
    /// earliest is returned first.
    pub async fn get_result(&self) -> HarvestResult {
        loop {
            {
                let mut regs = self.registries.lock().await;
                let mut still_active = VecDeque::new();
                while let Some(runner) = regs.active.pop_front() {
                    match runner.is_finished().await {
                        Ok(true) => {
                            runner.mark_finished().await;
                            regs.finished.push_back(runner);
                        }
                        Ok(false) => still_active.push_back(runner),
                        Err(_) => {
                            runner.mark_failed().await;
                            regs.failed.push_back(runner);
                        }
                    }
                }
                regs.active = still_active;

                if let Some(runner) = regs.finished.pop_front() {
                    drop(regs);
                    return self.deliver(runner, TaskStatus::Completed).await;
                }
                if let Some(runner) = regs.failed.pop_front() {
                    drop(regs);
                    return self.deliver_failed(runner).await;
                }
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn deliver(&self, runner: Arc<TaskRunner>, status: TaskStatus) -> HarvestResult {
        let record = runner.record().await;
        let logs = runner.logs().await.unwrap_or_default();
        let data = runner.get_results().unwrap_or_default();
        if let Err(e) = runner.cleanup().await {
            log::warn!("cleanup failed for result {}: {}", record.result_id, e);
        }
        HarvestResult {
            result_id: record.result_id,
            task_id: record.task_id,
            logs,
            data,
            status,
            parent_id: record.parent_id,
        }
    }

    async fn deliver_failed(&self, runner: Arc<TaskRunner>) -> HarvestResult {
        let record = runner.record().await;
        if let Err(e) = runner.cleanup().await {
            log::warn!("cleanup failed for result {}: {}", record.result_id, e);
        }
        HarvestResult {
            result_id: record.result_id,
            task_id: record.task_id,
            logs: "Container failed".to_string(),
            data: Vec::new(),
            status: TaskStatus::Failed,
            parent_id: record.parent_id,
        }
    }

    /// Kills either a named subset (matching the node's own organization) or
    /// every active run when `kill_list` is `None`.
    pub async fn kill_tasks(&self, org_id: i64, kill_list: Option<Vec<ToBeKilled>>) -> Vec<KilledResult> {
        match kill_list {
            Some(list) => self.kill_selected(org_id, list).await,
            None => {
                log::warn!("no kill list provided, killing every active run on this node");
                self.cleanup_tasks().await
            }
        }
    }

    async fn kill_selected(&self, org_id: i64, kill_list: Vec<ToBeKilled>) -> Vec<KilledResult> {
        let mut killed = Vec::new();
        let mut regs = self.registries.lock().await;
        for entry in kill_list {
            if entry.organization_id != org_id {
                continue;
            }
            if let Some(pos) = regs.active.iter().position(|r| r.result_id() == entry.result_id) {
                let runner = regs.active.remove(pos).unwrap();
                let record = runner.record().await;
                if let Err(e) = runner.cleanup().await {
                    log::warn!("cleanup failed while killing result {}: {}", record.result_id, e);
                }
                killed.push(KilledResult {
                    result_id: record.result_id,
                    task_id: record.task_id,
                    parent_id: record.parent_id,
                });
            } else {
                log::warn!("result {} not found running on this node", entry.result_id);
            }
        }
        killed
    }

    /// Stops every active run and returns what was killed.
    async fn cleanup_tasks(&self) -> Vec<KilledResult> {
        let mut regs = self.registries.lock().await;
        let mut killed = Vec::new();
        while let Some(runner) = regs.active.pop_front() {
            let record = runner.record().await;
            if let Err(e) = runner.cleanup().await {
                log::warn!("cleanup failed while stopping result {}: {}", record.result_id, e);
            }
            killed.push(KilledResult {
                result_id: record.result_id,
                task_id: record.task_id,
                parent_id: record.parent_id,
            });
        }
        killed
    }

    /// Tears the node down: stops every active run, disconnects linked
    /// services, disconnects the node container last, deletes the network.
    pub async fn shutdown(&self, node_container: Option<&str>) {
        let _ = self.cleanup_tasks().await;
        if let Err(e) = self.network.teardown(node_container).await {
            log::error!("network teardown failed: {}", e);
        }
    }
}
