//! C5: admission control for incoming tasks.
//!
//! Precedence, in order — each check that has a non-empty configuration is
//! ANDed with the others; none of them short-circuits past a later one:
//! 1. Subtasks (non-null `parent_id`) are always admitted — the parent task
//!    was already vetted.
//! 2. If `policies.allowed_algorithms` is non-empty, the image must match one
//!    of its regexes (OR'd).
//! 3. If `policies.allowed_users` or `policies.allowed_organizations` is
//!    non-empty, the server is asked whether the initiator may send tasks.
//! 4. Legacy `allowed_images`: always evaluated last, regardless of whether
//!    the checks above ran. If non-empty, the image must additionally match
//!    one of its regexes. If empty, this step admits by default (with a
//!    warning) — it never restricts on its own.

use regex::Regex;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::server_client::ServerClient;

/// Mirrors Python's `re.match`: the pattern must match starting at index 0,
/// but doesn't need to consume the whole string. Using `Regex::is_match`
/// (unanchored substring search) would let `registry\.example/algo` admit
/// `evil.com/registry.example/algo`.
fn matches_from_start(re: &Regex, image: &str) -> bool {
    re.find(image).is_some_and(|m| m.start() == 0)
}

#[derive(Debug, Clone)]
pub struct TaskContext {
    pub parent_id: Option<i64>,
    pub initiator_org: i64,
    pub initiator_user: i64,
}

pub struct PolicyGate {
    allowed_algorithms: Vec<Regex>,
    allowed_images: Vec<Regex>,
    allowed_users: Vec<i64>,
    allowed_organizations: Vec<i64>,
    server: Arc<dyn ServerClient>,
}

impl PolicyGate {
    /// Compiles the regex lists from `config`. Panics only if a regex already
    /// validated by [`NodeConfig::from_str`] somehow fails to compile here —
    /// construct `PolicyGate` from a config that has passed validation.
    pub fn new(config: &NodeConfig, server: Arc<dyn ServerClient>) -> Self {
        let compile = |patterns: Vec<String>| -> Vec<Regex> {
            patterns
                .into_iter()
                .filter_map(|p| Regex::new(&p).ok())
                .collect()
        };
        Self {
            allowed_algorithms: compile(config.policies.allowed_algorithms.as_vec()),
            allowed_images: compile(config.allowed_images.as_vec()),
            allowed_users: config.policies.allowed_users.clone(),
            allowed_organizations: config.policies.allowed_organizations.clone(),
            server,
        }
    }

    pub async fn admit(&self, image: &str, task: &TaskContext) -> bool {
        if task.parent_id.is_some() {
            return true;
        }

        if !self.allowed_algorithms.is_empty() {
            if !self.allowed_algorithms.iter().any(|re| matches_from_start(re, image)) {
                log::warn!("image {} does not match any allowed_algorithms pattern", image);
                return false;
            }
        }

        if !self.allowed_users.is_empty() || !self.allowed_organizations.is_empty() {
            let allowed = self
                .server
                .check_user_allowed_to_send_task(
                    &self.allowed_users,
                    &self.allowed_organizations,
                    task.initiator_org,
                    task.initiator_user,
                )
                .await
                .unwrap_or_else(|e| {
                    log::warn!("server admission check failed, rejecting task: {}", e);
                    false
                });
            if !allowed {
                return false;
            }
        }

        // Legacy fallback always runs last, independent of the checks above.
        if self.allowed_images.is_empty() {
            log::warn!("no allowed_images configured, admitting {} by default", image);
            return true;
        }
        self.allowed_images.iter().any(|re| matches_from_start(re, image))
    }
}
