pub mod config;
pub mod database;
pub mod error;
pub mod kill;
pub mod network;
pub mod orchestrator;
pub mod policy;
pub mod proxy;
pub mod registry_login;
pub mod runtime;
pub mod server_client;
pub(crate) mod util;
pub mod vpn;
pub mod task_runner;

use std::path::PathBuf;
use std::sync::Arc;

use config::NodeConfig;
use error::NodeResult;
use network::NetworkManager;
use orchestrator::DockerManager;
use policy::PolicyGate;
use proxy::EgressProxy;
use runtime::docker::DockerRuntime;
use runtime::ContainerRuntime;
use server_client::{ReqwestServerClient, ServerClient};
use vpn::VpnManager;

const BRIDGE_NETWORK_NAME: &str = "fednode-bridge";

/// Bootstraps the Docker execution core from a config file and a running
/// server connection, bringing up the private network, the egress proxy (when
/// whitelisted domains are configured) and the VPN side-car (when
/// `vpn_subnet` is set) before returning a ready-to-run [`DockerManager`].
///
/// CLI argument parsing, the server's task-distribution protocol, and
/// persistence of results are owned by the surrounding node process.
pub async fn bootstrap(
    config_path: &std::path::Path,
    server_base_url: String,
    server_token: String,
    tasks_dir: PathBuf,
    running_in_container: bool,
) -> NodeResult<DockerManager> {
    let config = NodeConfig::from_path(config_path)?;

    let docker = DockerRuntime::new()?;
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(docker);
    runtime.ping().await?;

    registry_login::login_to_registries(&runtime, &config.docker_registries).await;

    let network = Arc::new(NetworkManager::new(runtime.clone(), BRIDGE_NETWORK_NAME));
    network.ensure_created().await?;

    let server: Arc<dyn ServerClient> =
        Arc::new(ReqwestServerClient::new(server_base_url, server_token));

    let mut proxy_url = None;
    if !config.whitelist.domains.is_empty() || !config.whitelist.ips.is_empty() {
        let proxy = EgressProxy::new(
            runtime.clone(),
            network.clone(),
            &config.node_name,
            config.squid_image.clone(),
            tasks_dir.join("proxy-config"),
        );
        match proxy.start(&config.whitelist).await {
            Ok(()) => proxy_url = Some(proxy.address()),
            Err(e) => log::error!("failed to start egress proxy, algorithms will run without it: {}", e),
        }
    }

    let vpn = if config.vpn_subnet.is_some() {
        let mgr = Arc::new(VpnManager::new(
            runtime.clone(),
            network.clone(),
            server.clone(),
            &config.node_name,
            config.vpn_client_image.clone(),
        ));
        if let Err(e) = mgr.start().await {
            log::error!("failed to start VPN side-car: {}", e);
            None
        } else {
            Some(mgr)
        }
    } else {
        None
    };

    let policy = PolicyGate::new(&config, server.clone());
    std::fs::create_dir_all(&tasks_dir)?;

    Ok(DockerManager::new(
        &config,
        runtime,
        network,
        policy,
        vpn,
        tasks_dir,
        proxy_url,
        running_in_container,
    ))
}
