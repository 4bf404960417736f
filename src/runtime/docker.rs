use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::query_parameters::{
    CreateContainerOptions, CreateImageOptions, ListContainersOptions, ListNetworksOptions,
    LogsOptions, RemoveContainerOptions, RemoveImageOptions, RemoveVolumeOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::service::{
    ContainerCreateBody, DeviceRequest as BollardDeviceRequest, EndpointSettings, HostConfig,
    Mount as BollardMount, MountTypeEnum, NetworkConnectRequest, NetworkCreateRequest,
    NetworkDisconnectRequest, RestartPolicy, RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::StreamExt;
use std::collections::HashMap;

use super::{
    ContainerConfig, ContainerFilters, ContainerInfo, ContainerRuntime, ContainerState,
    RuntimeError,
};

pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::Other(format!("Docker connection failed: {e}")))?;
        Ok(Self { docker })
    }
}

fn to_err(e: bollard::errors::Error) -> RuntimeError {
    match &e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(e.to_string()),
        _ => RuntimeError::Other(e.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn engine_id(&self) -> &str {
        "docker"
    }

    async fn ping(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(to_err)?;
        Ok(())
    }

    async fn ensure_network(&self, name: &str) -> Result<(), RuntimeError> {
        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions>)
            .await
            .map_err(to_err)?;

        let exists = networks
            .iter()
            .any(|n| n.name.as_deref().is_some_and(|n| n == name));

        if !exists {
            self.docker
                .create_network(NetworkCreateRequest {
                    name: name.to_string(),
                    driver: Some("bridge".to_string()),
                    ..Default::default()
                })
                .await
                .map_err(to_err)?;
            log::info!("created private network {}", name);
        }

        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        aliases: &[String],
    ) -> Result<(), RuntimeError> {
        let req = NetworkConnectRequest {
            container: container.to_string(),
            endpoint_config: Some(EndpointSettings {
                aliases: Some(aliases.to_vec()),
                ..Default::default()
            }),
        };
        match self.docker.connect_network(network, req).await {
            Ok(_) => {
                log::debug!("{} joined network {} as {:?}", container, network, aliases);
                Ok(())
            }
            // already connected is not an error: joining is idempotent
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 403, ..
            }) => Ok(()),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn disconnect_network(
        &self,
        network: &str,
        container: &str,
        force: bool,
    ) -> Result<(), RuntimeError> {
        let req = NetworkDisconnectRequest {
            container: container.to_string(),
            force: Some(force),
        };
        match self.docker.disconnect_network(network, req).await {
            Ok(_) => Ok(()),
            // not connected / not found is a no-op: disconnect is idempotent
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn remove_network(&self, name: &str, kill_containers: bool) -> Result<(), RuntimeError> {
        if kill_containers {
            let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
            filter_map.insert("network".to_string(), vec![name.to_string()]);
            let opts = ListContainersOptions {
                all: true,
                filters: Some(filter_map),
                ..Default::default()
            };
            if let Ok(containers) = self.docker.list_containers(Some(opts)).await {
                for c in containers {
                    if let Some(id) = c.id {
                        log::warn!("force-removing {} still attached to {}", id, name);
                        let _ = self.remove_container(&id).await;
                    }
                }
            }
        }
        match self.docker.remove_network(name).await {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn login(
        &self,
        registry: &str,
        username: &str,
        password: &str,
    ) -> Result<(), RuntimeError> {
        let credentials = bollard::auth::DockerCredentials {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            serveraddress: Some(registry.to_string()),
            ..Default::default()
        };
        self.docker.login(&credentials).await.map_err(to_err)?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self.docker.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(to_err(e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (repo, tag) = if let Some((r, t)) = image.rsplit_once(':') {
            (r, t)
        } else {
            (image, "latest")
        };

        let opts = CreateImageOptions {
            from_image: Some(repo.to_string()),
            tag: Some(tag.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(opts), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        log::debug!("pull {}: {}", image, status);
                    }
                }
                Err(e) => return Err(to_err(e)),
            }
        }

        Ok(())
    }

    async fn get_image_digest(&self, image: &str) -> Result<Option<String>, RuntimeError> {
        let inspect = self.docker.inspect_image(image).await.map_err(to_err)?;

        if let Some(repo_digests) = inspect.repo_digests {
            for digest_str in &repo_digests {
                if let Some(digest) = digest_str.split('@').nth(1) {
                    if digest.starts_with("sha256:") {
                        return Ok(Some(digest.to_string()));
                    }
                }
            }
        }

        Ok(None)
    }

    async fn remove_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_image(
                image,
                Some(RemoveImageOptions {
                    force: false,
                    noprune: false,
                    ..Default::default()
                }),
                None,
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn create_container(&self, config: ContainerConfig) -> Result<String, RuntimeError> {
        let mounts: Vec<BollardMount> = config
            .mounts
            .iter()
            .map(|m| BollardMount {
                target: Some(m.target.clone()),
                source: Some(m.source.clone()),
                typ: Some(if m.is_volume {
                    MountTypeEnum::VOLUME
                } else {
                    MountTypeEnum::BIND
                }),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let device_requests: Vec<BollardDeviceRequest> = config
            .device_requests
            .iter()
            .map(|d| BollardDeviceRequest {
                driver: Some(d.driver.clone()),
                count: Some(d.count as i32),
                capabilities: Some(vec![d.capabilities.clone()]),
                ..Default::default()
            })
            .collect();

        let restart_policy = config.restart_policy.as_deref().map(|name| RestartPolicy {
            name: Some(match name {
                "always" => RestartPolicyNameEnum::ALWAYS,
                "on-failure" => RestartPolicyNameEnum::ON_FAILURE,
                "unless-stopped" => RestartPolicyNameEnum::UNLESS_STOPPED,
                _ => RestartPolicyNameEnum::NO,
            }),
            maximum_retry_count: None,
        });

        let host_config = HostConfig {
            network_mode: config.network.clone(),
            cap_drop: Some(config.security.cap_drop.clone()),
            cap_add: Some(config.security.cap_add.clone()),
            security_opt: if config.security.no_new_privileges {
                Some(vec!["no-new-privileges:true".to_string()])
            } else {
                None
            },
            mounts: Some(mounts),
            device_requests: if device_requests.is_empty() {
                None
            } else {
                Some(device_requests)
            },
            restart_policy,
            auto_remove: Some(false),
            ..Default::default()
        };

        let body = ContainerCreateBody {
            image: Some(config.image.clone()),
            env: Some(config.env_vars.clone()),
            labels: Some(config.labels.clone()),
            host_config: Some(host_config),
            ..Default::default()
        };

        let opts = CreateContainerOptions {
            name: Some(config.name.clone()),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(opts), body)
            .await
            .map_err(to_err)?;

        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: Some(10),
                    signal: None,
                }),
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(to_err)?;
        Ok(())
    }

    async fn container_state(&self, id: &str) -> Result<ContainerState, RuntimeError> {
        let info = match self.docker.inspect_container(id, None).await {
            Ok(info) => info,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => return Ok(ContainerState::Gone),
            Err(e) => return Err(to_err(e)),
        };

        let running = info.state.and_then(|s| s.running).unwrap_or(false);

        Ok(if running {
            ContainerState::Running
        } else {
            ContainerState::Stopped
        })
    }

    async fn list_containers(
        &self,
        filters: ContainerFilters,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let mut filter_map: HashMap<String, Vec<String>> = HashMap::new();
        for (k, v) in &filters.labels {
            filter_map
                .entry("label".to_string())
                .or_default()
                .push(if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={v}")
                });
        }

        let opts = ListContainersOptions {
            all: true,
            filters: Some(filter_map),
            ..Default::default()
        };

        let containers = self
            .docker
            .list_containers(Some(opts))
            .await
            .map_err(to_err)?;

        Ok(containers
            .into_iter()
            .map(|c| ContainerInfo {
                id: c.id.unwrap_or_default(),
                names: c.names.unwrap_or_default(),
                image: c.image.unwrap_or_default(),
                state: c.state.map(|s| s.to_string()).unwrap_or_default(),
                status: c.status.unwrap_or_default(),
            })
            .collect())
    }

    async fn get_logs(&self, id: &str, tail: u32) -> Result<Vec<String>, RuntimeError> {
        let opts = LogsOptions {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(opts));
        let mut lines = Vec::new();

        while let Some(result) = stream.next().await {
            match result {
                Ok(output) => {
                    let line = match output {
                        LogOutput::StdOut { message } => {
                            String::from_utf8_lossy(&message).to_string()
                        }
                        LogOutput::StdErr { message } => {
                            String::from_utf8_lossy(&message).to_string()
                        }
                        _ => continue,
                    };
                    lines.push(line);
                }
                Err(e) => return Err(to_err(e)),
            }
        }

        Ok(lines)
    }

    async fn remove_volume(&self, name: &str) -> Result<(), RuntimeError> {
        match self
            .docker
            .remove_volume(name, None::<RemoveVolumeOptions>)
            .await
        {
            Ok(_) => {
                log::info!("removed volume {}", name);
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(()),
            Err(e) => Err(to_err(e)),
        }
    }
}
