//! C3: optional VPN side-car. When configured, exposes per-task forwarded
//! ports allocated by the central server and reachable by algorithm containers
//! through the private network.

use std::sync::Arc;

use crate::error::{NodeError, NodeResult};
use crate::network::NetworkManager;
use crate::runtime::{ContainerConfig, ContainerRuntime};
use crate::server_client::ServerClient;

const VPN_ALIAS: &str = "vpn-client";

pub struct VpnManager {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<NetworkManager>,
    server: Arc<dyn ServerClient>,
    container_name: String,
    image: String,
}

impl VpnManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<NetworkManager>,
        server: Arc<dyn ServerClient>,
        node_name: &str,
        image: String,
    ) -> Self {
        Self {
            runtime,
            network,
            server,
            container_name: format!("fednode-{}-vpn", node_name),
            image,
        }
    }

    pub async fn start(&self) -> NodeResult<()> {
        if !self.runtime.image_exists(&self.image).await? {
            self.runtime.pull_image(&self.image).await?;
        }
        let _ = self.runtime.remove_container(&self.container_name).await;

        let id = self
            .runtime
            .create_container(ContainerConfig {
                name: self.container_name.clone(),
                image: self.image.clone(),
                env_vars: vec![],
                labels: Default::default(),
                mounts: vec![],
                network: None,
                restart_policy: Some("always".to_string()),
                device_requests: vec![],
                security: Default::default(),
            })
            .await?;
        self.runtime.start_container(&id).await?;
        self.network.connect(&self.container_name, &[VPN_ALIAS.to_string()]).await?;
        log::info!("VPN side-car started");
        Ok(())
    }

    pub async fn request_ports(&self, result_id: i64, count: u16) -> NodeResult<Vec<u16>> {
        self.server
            .reserve_vpn_ports(result_id, count)
            .await
            .map_err(|e| NodeError::ServerCall(e.to_string()))
    }

    pub async fn release_ports(&self, result_id: i64) -> NodeResult<()> {
        if let Err(e) = self.server.release_vpn_ports(result_id).await {
            log::warn!("failed to release VPN ports for {}: {}", result_id, e);
        }
        Ok(())
    }

    pub async fn stop(&self) -> NodeResult<()> {
        self.runtime.stop_container(&self.container_name).await?;
        self.runtime.remove_container(&self.container_name).await?;
        Ok(())
    }
}
