//! C2: materializes the content-filtering egress proxy container from the
//! configured domain/IP/port whitelist and joins it to the private network.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Whitelist;
use crate::network::NetworkManager;
use crate::runtime::{ContainerConfig, ContainerRuntime, RuntimeError};
use crate::util::atomic_write;

pub const PROXY_HOSTNAME: &str = "squid";
pub const PROXY_PORT: u16 = 3128;

pub struct EgressProxy {
    runtime: Arc<dyn ContainerRuntime>,
    network: Arc<NetworkManager>,
    container_name: String,
    image: String,
    config_dir: PathBuf,
}

impl EgressProxy {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        network: Arc<NetworkManager>,
        node_name: &str,
        image: String,
        config_dir: PathBuf,
    ) -> Self {
        Self {
            runtime,
            network,
            container_name: format!("fednode-{}-squid", node_name),
            image,
            config_dir,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}:{}", PROXY_HOSTNAME, PROXY_PORT)
    }

    fn render_config(whitelist: &Whitelist) -> String {
        let mut out = String::new();
        for domain in &whitelist.domains {
            out.push_str(&format!("acl whitelist dstdomain {}\n", domain));
        }
        for ip in &whitelist.ips {
            out.push_str(&format!("acl whitelist dst {}\n", ip));
        }
        for port in &whitelist.ports {
            out.push_str(&format!("acl safe_ports port {}\n", port));
        }
        out.push_str("http_access allow whitelist\n");
        out.push_str("http_access deny all\n");
        out
    }

    fn write_config_file(&self, whitelist: &Whitelist) -> Result<(), RuntimeError> {
        std::fs::create_dir_all(&self.config_dir)?;
        let path = self.config_dir.join("squid.conf");
        let rendered = Self::render_config(whitelist);
        atomic_write(&path, rendered.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// Renders the whitelist config, pulls the image if not already present,
    /// removes any stale container under the canonical name, starts a fresh
    /// one with `restart_policy=always`, and joins it to the private network
    /// under the fixed `squid` alias.
    pub async fn start(&self, whitelist: &Whitelist) -> Result<(), RuntimeError> {
        self.write_config_file(whitelist)?;

        if !self.runtime.image_exists(&self.image).await? {
            self.runtime.pull_image(&self.image).await?;
        }

        // best-effort: a prior process may have left a container behind
        let _ = self.runtime.remove_container(&self.container_name).await;

        let mut mounts = Vec::new();
        mounts.push(crate::runtime::Mount {
            source: self.config_dir.to_string_lossy().into_owned(),
            target: "/etc/squid/conf.d/".to_string(),
            read_only: false,
            is_volume: false,
        });

        let id = self
            .runtime
            .create_container(ContainerConfig {
                name: self.container_name.clone(),
                image: self.image.clone(),
                env_vars: vec![],
                labels: Default::default(),
                mounts,
                network: None,
                restart_policy: Some("always".to_string()),
                device_requests: vec![],
                security: Default::default(),
            })
            .await?;

        self.runtime.start_container(&id).await?;
        self.network
            .connect(&self.container_name, &[PROXY_HOSTNAME.to_string()])
            .await?;

        log::info!("egress proxy started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), RuntimeError> {
        self.runtime.stop_container(&self.container_name).await?;
        self.runtime.remove_container(&self.container_name).await?;
        log::info!("egress proxy stopped");
        Ok(())
    }
}
