//! C1: owns the node's private bridge network and tracks who has joined it.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::runtime::{ContainerRuntime, RuntimeError};

pub struct NetworkManager {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
    members: Mutex<HashSet<String>>,
}

impl NetworkManager {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, name: impl Into<String>) -> Self {
        Self {
            runtime,
            name: name.into(),
            members: Mutex::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn ensure_created(&self) -> Result<(), RuntimeError> {
        self.runtime.ensure_network(&self.name).await
    }

    /// Joins `container` to the private network. Idempotent: joining a
    /// container already tracked as a member is a no-op.
    pub async fn connect(&self, container: &str, aliases: &[String]) -> Result<(), RuntimeError> {
        let mut members = self.members.lock().await;
        if members.contains(container) {
            return Ok(());
        }
        self.runtime.connect_network(&self.name, container, aliases).await?;
        members.insert(container.to_string());
        Ok(())
    }

    /// Removes `container` from the private network. Idempotent.
    pub async fn disconnect(&self, container: &str) -> Result<(), RuntimeError> {
        let mut members = self.members.lock().await;
        if !members.contains(container) {
            return Ok(());
        }
        self.runtime.disconnect_network(&self.name, container, false).await?;
        members.remove(container);
        Ok(())
    }

    /// Disconnects every known member except `keep_last`, then disconnects
    /// `keep_last`, then deletes the network. `keep_last` is the node's own
    /// container: it joins first and must leave last.
    pub async fn teardown(&self, keep_last: Option<&str>) -> Result<(), RuntimeError> {
        let remaining: Vec<String> = {
            let members = self.members.lock().await;
            members
                .iter()
                .filter(|m| Some(m.as_str()) != keep_last)
                .cloned()
                .collect()
        };
        for member in remaining {
            self.disconnect(&member).await?;
        }
        if let Some(last) = keep_last {
            self.disconnect(last).await?;
        }
        self.runtime.remove_network(&self.name, true).await
    }
}
