//! Typed configuration surface for the Docker execution core.
//!
//! This module owns only the shape described by the configuration schema:
//! discovering the config file on disk, parsing CLI flags, and hot-reloading
//! are handled by the surrounding node process and are out of scope here.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::error::{NodeError, NodeResult};

/// One entry in the `databases` list. Accepts both the legacy mapping shape
/// (`{label: uri}`, via [`DatabaseEntry::Legacy`]) and the current sequence
/// shape during deserialization — see [`NodeConfig::databases_normalized`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DatabaseList {
    Sequence(Vec<DatabaseEntry>),
    Legacy(HashMap<String, String>),
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseEntry {
    pub label: String,
    pub uri: String,
    #[serde(default)]
    pub r#type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Policies {
    #[serde(default)]
    pub allowed_algorithms: StringOrList,
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default)]
    pub allowed_organizations: Vec<i64>,
}

/// A config field that may be given as a single string or a list of strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    #[default]
    Empty,
    One(String),
    Many(Vec<String>),
}

impl StringOrList {
    pub fn as_vec(&self) -> Vec<String> {
        match self {
            StringOrList::Empty => Vec::new(),
            StringOrList::One(s) => vec![s.clone()],
            StringOrList::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceRequestsConfig {
    #[serde(default)]
    pub gpu: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryCredential {
    pub registry: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Whitelist {
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub ips: Vec<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub algorithm_env: HashMap<String, String>,
    #[serde(default = "default_alpine")]
    pub alpine: String,
    #[serde(default)]
    pub allowed_images: StringOrList,
    #[serde(default)]
    pub policies: Policies,
    #[serde(default)]
    pub algorithm_device_requests: DeviceRequestsConfig,
    #[serde(default)]
    pub docker_registries: Vec<RegistryCredential>,
    #[serde(default)]
    pub databases: Option<DatabaseList>,
    #[serde(default)]
    pub whitelist: Whitelist,
    #[serde(default)]
    pub vpn_subnet: Option<String>,
    #[serde(default = "default_node_name")]
    pub node_name: String,
    #[serde(default = "default_squid_image")]
    pub squid_image: String,
    #[serde(default = "default_vpn_image")]
    pub vpn_client_image: String,
}

fn default_vpn_image() -> String {
    "harbor2.vantage6.ai/infrastructure/vpn-client".to_string()
}

fn default_alpine() -> String {
    "alpine:latest".to_string()
}

fn default_node_name() -> String {
    "node".to_string()
}

fn default_squid_image() -> String {
    "harbor2.vantage6.ai/infrastructure/squid".to_string()
}

impl NodeConfig {
    pub fn from_str(yaml: &str) -> NodeResult<Self> {
        let cfg: NodeConfig = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> NodeResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    fn validate(&self) -> NodeResult<()> {
        for pattern in self.policies.allowed_algorithms.as_vec() {
            regex::Regex::new(&pattern)
                .map_err(|e| NodeError::InvalidConfig(format!("bad allowed_algorithms regex {pattern}: {e}")))?;
        }
        for pattern in self.allowed_images.as_vec() {
            regex::Regex::new(&pattern)
                .map_err(|e| NodeError::InvalidConfig(format!("bad allowed_images regex {pattern}: {e}")))?;
        }
        Ok(())
    }

    /// Normalizes the `databases` field into `{label -> (uri, type)}` regardless
    /// of which on-disk shape (sequence or legacy mapping) was used. Logs (but
    /// does not fail) when `default` is absent, matching the source behavior.
    pub fn databases_normalized(&self) -> HashMap<String, (String, Option<String>)> {
        let mut out = HashMap::new();
        match &self.databases {
            Some(DatabaseList::Sequence(entries)) => {
                for e in entries {
                    out.insert(e.label.clone(), (e.uri.clone(), e.r#type.clone()));
                }
            }
            Some(DatabaseList::Legacy(map)) => {
                for (label, uri) in map {
                    out.insert(label.clone(), (uri.clone(), None));
                }
            }
            None => {}
        }
        if !out.contains_key("default") {
            log::error!("no 'default' database label configured");
        }
        out
    }
}
