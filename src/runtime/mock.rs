//! In-memory mock implementation of `ContainerRuntime` for testing.
//!
//! Tracks all calls and fake container/network state so the orchestrator and
//! its components can be tested without a Docker daemon.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::{
    ContainerConfig, ContainerFilters, ContainerInfo, ContainerRuntime, ContainerState, Mount,
    RuntimeError,
};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    Ping,
    EnsureNetwork(String),
    ConnectNetwork { network: String, container: String },
    DisconnectNetwork { network: String, container: String },
    RemoveNetwork(String),
    Login(String),
    ImageExists(String),
    PullImage(String),
    GetImageDigest(String),
    RemoveImage(String),
    CreateContainer(String),
    StartContainer(String),
    StopContainer(String),
    RemoveContainer(String),
    ContainerState(String),
    ListContainers,
    GetLogs { id: String, tail: u32 },
    RemoveVolume(String),
}

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    image: String,
    labels: HashMap<String, String>,
    mounts: Vec<Mount>,
    running: bool,
}

#[derive(Debug)]
struct Inner {
    calls: Vec<RuntimeCall>,
    images: HashMap<String, Option<String>>,
    containers: HashMap<String, FakeContainer>,
    container_by_name: HashMap<String, String>,
    volumes: HashSet<String>,
    networks: HashSet<String>,
    next_id: u64,
    fail_pull: bool,
    fail_create: bool,
    fail_start: bool,
}

pub struct MockRuntime {
    inner: Mutex<Inner>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                calls: Vec::new(),
                images: HashMap::new(),
                containers: HashMap::new(),
                container_by_name: HashMap::new(),
                volumes: HashSet::new(),
                networks: HashSet::new(),
                next_id: 1,
                fail_pull: false,
                fail_create: false,
                fail_start: false,
            }),
        }
    }

    pub fn with_image(self, image: &str) -> Self {
        self.inner.lock().unwrap().images.insert(image.to_string(), None);
        self
    }

    pub fn with_image_digest(self, image: &str, digest: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .images
            .insert(image.to_string(), Some(digest.to_string()));
        self
    }

    pub fn fail_pull(self) -> Self {
        self.inner.lock().unwrap().fail_pull = true;
        self
    }

    pub fn fail_create(self) -> Self {
        self.inner.lock().unwrap().fail_create = true;
        self
    }

    pub fn fail_start(self) -> Self {
        self.inner.lock().unwrap().fail_start = true;
        self
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn was_called(&self, needle: &RuntimeCall) -> bool {
        self.inner.lock().unwrap().calls.iter().any(|c| c == needle)
    }

    pub fn call_count(&self, needle: &RuntimeCall) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == needle)
            .count()
    }

    pub fn container_count(&self) -> usize {
        self.inner.lock().unwrap().containers.len()
    }

    pub fn volume_exists(&self, name: &str) -> bool {
        self.inner.lock().unwrap().volumes.contains(name)
    }

    /// Returns the mounts the container registered under `name` was created
    /// with, for asserting on what a `TaskRunner::start` call wired up.
    pub fn mounts_for(&self, name: &str) -> Option<Vec<Mount>> {
        let inner = self.inner.lock().unwrap();
        let id = inner.container_by_name.get(name)?;
        inner.containers.get(id).map(|c| c.mounts.clone())
    }

    /// Directly register a running container with the given labels, bypassing
    /// `create_container` — used to simulate containers left over from a prior
    /// process, e.g. for duplicate-detection tests.
    pub fn seed_running_container(&self, name: &str, labels: HashMap<String, String>) -> String {
        let mut inner = self.inner.lock().unwrap();
        let id = format!("mock-container-{}", inner.next_id);
        inner.next_id += 1;
        inner.container_by_name.insert(name.to_string(), id.clone());
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                image: "seeded".to_string(),
                labels,
                mounts: Vec::new(),
                running: true,
            },
        );
        id
    }

    /// Marks a container as exited (used to simulate natural task completion).
    pub fn finish_container(&self, id: &str) {
        if let Some(c) = self.inner.lock().unwrap().containers.get_mut(id) {
            c.running = false;
        }
    }

    /// Removes a container out from under the runtime entirely (simulates
    /// external deletion, e.g. `docker rm -f` by an operator).
    pub fn vanish_container(&self, id: &str) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(c) = inner.containers.remove(id) {
            inner.container_by_name.remove(&c.name);
        }
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    fn engine_id(&self) -> &str {
        "mock"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.inner.lock().unwrap().calls.push(RuntimeCall::Ping);
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::EnsureNetwork(name.to_string()));
        inner.networks.insert(name.to_string());
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        _aliases: &[String],
    ) -> Result<(), RuntimeError> {
        self.inner.lock().unwrap().calls.push(RuntimeCall::ConnectNetwork {
            network: network.to_string(),
            container: container.to_string(),
        });
        Ok(())
    }

    async fn disconnect_network(
        &self,
        network: &str,
        container: &str,
        _force: bool,
    ) -> Result<(), RuntimeError> {
        self.inner.lock().unwrap().calls.push(RuntimeCall::DisconnectNetwork {
            network: network.to_string(),
            container: container.to_string(),
        });
        Ok(())
    }

    async fn remove_network(&self, name: &str, _kill_containers: bool) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::RemoveNetwork(name.to_string()));
        inner.networks.remove(name);
        Ok(())
    }

    async fn login(
        &self,
        registry: &str,
        _username: &str,
        _password: &str,
    ) -> Result<(), RuntimeError> {
        self.inner
            .lock()
            .unwrap()
            .calls
            .push(RuntimeCall::Login(registry.to_string()));
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::ImageExists(image.to_string()));
        Ok(inner.images.contains_key(image))
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::PullImage(image.to_string()));

        if inner.fail_pull {
            return Err(RuntimeError::Network(format!("mock: pull failed for {}", image)));
        }

        inner.images.entry(image.to_string()).or_insert(None);
        Ok(())
    }

    async fn get_image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::GetImageDigest(image.to_string()));
        Ok(inner.images.get(image).and_then(|d| d.clone()))
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::RemoveImage(image.to_string()));
        inner.images.remove(image);
        Ok(())
    }

    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::CreateContainer(config.name.clone()));

        if inner.fail_create {
            return Err(RuntimeError::Other("mock: create failed".to_string()));
        }

        // Duplicate container names are rejected, mirroring the real engine.
        if inner.container_by_name.contains_key(&config.name) {
            return Err(RuntimeError::Other(format!(
                "mock: container name {} already in use",
                config.name
            )));
        }

        let id = format!("mock-container-{}", inner.next_id);
        inner.next_id += 1;

        for m in &config.mounts {
            if m.is_volume {
                inner.volumes.insert(m.source.clone());
            }
        }

        inner.container_by_name.insert(config.name.clone(), id.clone());
        inner.containers.insert(
            id.clone(),
            FakeContainer {
                id: id.clone(),
                name: config.name,
                image: config.image,
                labels: config.labels,
                mounts: config.mounts,
                running: false,
            },
        );

        Ok(id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::StartContainer(id.to_string()));

        if inner.fail_start {
            return Err(RuntimeError::Other("mock: start failed".to_string()));
        }

        match inner.containers.get_mut(id) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::StopContainer(id.to_string()));
        if let Some(c) = inner.containers.get_mut(id) {
            c.running = false;
        }
        Ok(())
    }

    async fn remove_container(&self, id_or_name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .calls
            .push(RuntimeCall::RemoveContainer(id_or_name.to_string()));

        if let Some(c) = inner.containers.remove(id_or_name) {
            inner.container_by_name.remove(&c.name);
        } else if let Some(id) = inner.container_by_name.remove(id_or_name) {
            inner.containers.remove(&id);
        }
        Ok(())
    }

    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::ContainerState(id.to_string()));

        match inner.containers.get(id) {
            Some(c) if c.running => Ok(ContainerState::Running),
            Some(_) => Ok(ContainerState::Stopped),
            None => Ok(ContainerState::Gone),
        }
    }

    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::ListContainers);

        Ok(inner
            .containers
            .values()
            .filter(|c| {
                filters
                    .labels
                    .iter()
                    .all(|(k, v)| c.labels.get(k).is_some_and(|cv| v.is_empty() || cv == v))
            })
            .map(|c| ContainerInfo {
                id: c.id.clone(),
                names: vec![c.name.clone()],
                image: c.image.clone(),
                state: if c.running { "running".to_string() } else { "exited".to_string() },
                status: if c.running {
                    "Up 5 minutes".to_string()
                } else {
                    "Exited (0) 5 minutes ago".to_string()
                },
            })
            .collect())
    }

    async fn get_logs(&self, id: &str, tail: u32) -> Result<Vec<String>, RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::GetLogs { id: id.to_string(), tail });

        if inner.containers.contains_key(id) {
            Ok(vec!["mock log line 1".to_string(), "mock log line 2".to_string()])
        } else {
            Err(RuntimeError::NotFound(id.to_string()))
        }
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(RuntimeCall::RemoveVolume(name.to_string()));
        inner.volumes.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ping_is_recorded() {
        let rt = MockRuntime::new();
        rt.ping().await.unwrap();
        assert!(rt.was_called(&RuntimeCall::Ping));
    }

    #[tokio::test]
    async fn image_lifecycle() {
        let rt = MockRuntime::new();
        assert!(!rt.image_exists("test:latest").await.unwrap());
        rt.pull_image("test:latest").await.unwrap();
        assert!(rt.image_exists("test:latest").await.unwrap());
        rt.remove_image("test:latest").await.unwrap();
        assert!(!rt.image_exists("test:latest").await.unwrap());
    }

    #[tokio::test]
    async fn pull_failure_is_surfaced() {
        let rt = MockRuntime::new().fail_pull();
        let err = rt.pull_image("fail:latest").await.unwrap_err();
        assert!(matches!(err, RuntimeError::Network(_)));
    }

    #[tokio::test]
    async fn duplicate_container_name_rejected() {
        let rt = MockRuntime::new();
        let cfg = |name: &str| ContainerConfig {
            name: name.to_string(),
            image: "img:1".to_string(),
            env_vars: vec![],
            labels: HashMap::new(),
            mounts: vec![],
            network: None,
            restart_policy: None,
            device_requests: vec![],
            security: Default::default(),
        };
        rt.create_container(cfg("dup")).await.unwrap();
        assert!(rt.create_container(cfg("dup")).await.is_err());
    }

    #[tokio::test]
    async fn list_containers_filters_by_label() {
        let rt = MockRuntime::new();
        let mut labels = HashMap::new();
        labels.insert("result_id".to_string(), "7".to_string());
        rt.seed_running_container("algo-7", labels);

        let mut want = HashMap::new();
        want.insert("result_id".to_string(), "7".to_string());
        let found = rt
            .list_containers(ContainerFilters { labels: want })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let mut miss = HashMap::new();
        miss.insert("result_id".to_string(), "8".to_string());
        let not_found = rt
            .list_containers(ContainerFilters { labels: miss })
            .await
            .unwrap();
        assert!(not_found.is_empty());
    }

    #[tokio::test]
    async fn vanish_then_state_is_gone() {
        let rt = MockRuntime::new();
        let id = rt.seed_running_container("ghost", HashMap::new());
        assert_eq!(rt.container_state(&id).await.unwrap(), ContainerState::Running);
        rt.vanish_container(&id);
        assert_eq!(rt.container_state(&id).await.unwrap(), ContainerState::Gone);
    }
}
