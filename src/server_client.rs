//! Thin abstraction over the central server's HTTP API, as consumed by the
//! Docker execution core. The request/response schema, retry policy, and auth
//! refresh of the real client are owned elsewhere; this crate only needs the
//! two calls the Policy Gate and Task Runner make.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    UnexpectedStatus(u16),
}

#[async_trait]
pub trait ServerClient: Send + Sync {
    /// Asks the server whether `initiator_user`/`initiator_org` is allowed to
    /// send tasks, given the node's configured allow-lists.
    async fn check_user_allowed_to_send_task(
        &self,
        allowed_users: &[i64],
        allowed_orgs: &[i64],
        initiator_org: i64,
        initiator_user: i64,
    ) -> Result<bool, ServerClientError>;

    /// Reserves `count` forwarded ports for `result_id`, returning the
    /// allocated host ports.
    async fn reserve_vpn_ports(
        &self,
        result_id: i64,
        count: u16,
    ) -> Result<Vec<u16>, ServerClientError>;

    /// Releases a previously reserved VPN port forward for `result_id`.
    async fn release_vpn_ports(&self, result_id: i64) -> Result<(), ServerClientError>;
}

pub struct ReqwestServerClient {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl ReqwestServerClient {
    pub fn new(base_url: String, token: String) -> Self {
        Self {
            base_url,
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ServerClient for ReqwestServerClient {
    async fn check_user_allowed_to_send_task(
        &self,
        allowed_users: &[i64],
        allowed_orgs: &[i64],
        initiator_org: i64,
        initiator_user: i64,
    ) -> Result<bool, ServerClientError> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            allowed_users: &'a [i64],
            allowed_orgs: &'a [i64],
            initiator_org: i64,
            initiator_user: i64,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            allowed: bool,
        }

        let resp = self
            .client
            .post(format!("{}/task/check_allowed", self.base_url))
            .bearer_auth(&self.token)
            .json(&Body {
                allowed_users,
                allowed_orgs,
                initiator_org,
                initiator_user,
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ServerClientError::UnexpectedStatus(resp.status().as_u16()));
        }

        Ok(resp.json::<Resp>().await?.allowed)
    }

    async fn reserve_vpn_ports(
        &self,
        result_id: i64,
        count: u16,
    ) -> Result<Vec<u16>, ServerClientError> {
        #[derive(serde::Deserialize)]
        struct Resp {
            ports: Vec<u16>,
        }
        let resp = self
            .client
            .post(format!("{}/port", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("result_id", result_id.to_string()), ("count", count.to_string())])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ServerClientError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(resp.json::<Resp>().await?.ports)
    }

    async fn release_vpn_ports(&self, result_id: i64) -> Result<(), ServerClientError> {
        let resp = self
            .client
            .delete(format!("{}/port", self.base_url))
            .bearer_auth(&self.token)
            .query(&[("result_id", result_id)])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(ServerClientError::UnexpectedStatus(resp.status().as_u16()));
        }
        Ok(())
    }
}
