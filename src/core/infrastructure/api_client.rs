//! HTTP client of the Proxmox VE API, authenticated with an API token.

use crate::config::{PveConnectionConfig, RateLimitConfig};
use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::{
        guest_agent::{GuestExecRequest, GuestExecStarted, GuestExecStatus},
        node_list_item::NodeListItem,
        os_info::{OsInfo, OsInfoResponse},
        storage::{StorageContentItem, StorageListItem},
        vm::{VmConfig, VmListItem},
    },
    port::Hypervisor,
};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use reqwest::{Client, Method, StatusCode, header};
use serde::{Deserialize, de::DeserializeOwned};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Upper bound on a single HTTP request, connection included.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Every Proxmox API response wraps its payload in `{"data": ...}`.
#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// Builds the optional shared rate limiter for a client.
pub(crate) fn build_rate_limiter(
    config: Option<RateLimitConfig>,
) -> Option<Arc<DefaultDirectRateLimiter>> {
    config.and_then(|rl| {
        let rate = NonZeroU32::new(rl.requests_per_second)?;
        let burst = NonZeroU32::new(rl.burst_size).unwrap_or(rate);
        Some(Arc::new(DefaultDirectRateLimiter::direct(
            Quota::per_second(rate).allow_burst(burst),
        )))
    })
}

/// Client of the Proxmox VE API.
///
/// Adds the `PVEAPIToken` authorization header to each request, applies the
/// optional rate limit and unwraps the `data` envelope of responses.
#[derive(Debug, Clone)]
pub struct PveApiClient {
    http_client: Client,
    base_url: Url,
    authorization: String,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl PveApiClient {
    /// Creates a new `PveApiClient`.
    ///
    /// # Errors
    /// Returns `SyncError::Connection` if the HTTP client cannot be built and
    /// `SyncError::Validation` if the host does not form a valid URL.
    pub fn new(
        connection: &PveConnectionConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> SyncResult<Self> {
        let http_client = Client::builder()
            .danger_accept_invalid_certs(!connection.verify_ssl)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Connection(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: connection.base_url()?,
            authorization: connection.authorization(),
            rate_limiter: build_rate_limiter(rate_limit),
        })
    }

    /// Creates a client against an arbitrary base URL (ending in `/api2/json/`).
    pub fn with_base_url(base_url: Url, authorization: impl Into<String>) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url,
            authorization: authorization.into(),
            rate_limiter: None,
        }
    }

    /// Performs a GET request and unwraps the `data` envelope.
    pub async fn get<T>(&self, path: &str, query: &[(&str, String)]) -> SyncResult<T>
    where
        T: DeserializeOwned,
    {
        self.execute_request(Method::GET, path, query, None::<&()>)
            .await
    }

    /// Performs a POST request with a JSON body and unwraps the `data` envelope.
    pub async fn post<B, T>(&self, path: &str, body: &B) -> SyncResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        self.execute_request(Method::POST, path, &[], Some(body))
            .await
    }

    fn url(&self, path: &str, query: &[(&str, String)]) -> SyncResult<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::Connection(format!("Invalid request path '{path}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn execute_request<B, T>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> SyncResult<T>
    where
        B: serde::Serialize,
        T: DeserializeOwned,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }

        let url = self.url(path, query)?;
        debug!(%method, %url, "proxmox request");

        let mut req_builder = self
            .http_client
            .request(method, url)
            .header(header::AUTHORIZATION, &self.authorization)
            .header(header::ACCEPT, "application/json");

        if let Some(body) = body {
            req_builder = req_builder.json(body);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| SyncError::Connection(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(SyncError::Authentication(
                "Proxmox rejected the API token".to_string(),
            ));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(SyncError::Api {
                status: status.as_u16(),
                path: path.to_string(),
                message: error_text,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Connection(format!("Failed to read response: {}", e)))?;
        serde_json::from_str::<DataEnvelope<T>>(&text)
            .map(|envelope| envelope.data)
            .map_err(|e| SyncError::decode(path, e))
    }

    fn vm_path(node: &str, vmid: u32, rest: &str) -> String {
        format!("nodes/{node}/qemu/{vmid}/{rest}")
    }
}

/// Any failure of a guest-agent endpoint means the agent cannot serve us:
/// Proxmox answers 500/596 when it is disabled, not running or unsupported.
fn agent_unavailable(error: SyncError) -> SyncError {
    match error {
        SyncError::Api {
            status, message, ..
        } => SyncError::GuestAgentUnavailable(format!("{status}: {}", message.trim())),
        other => other,
    }
}

#[async_trait]
impl Hypervisor for PveApiClient {
    async fn list_nodes(&self) -> SyncResult<Vec<NodeListItem>> {
        self.get("nodes", &[]).await
    }

    async fn list_vm_summaries(&self, node: &str) -> SyncResult<Vec<VmListItem>> {
        self.get(&format!("nodes/{node}/qemu"), &[]).await
    }

    async fn get_vm_config(&self, node: &str, vmid: u32) -> SyncResult<VmConfig> {
        self.get(&Self::vm_path(node, vmid, "config"), &[]).await
    }

    async fn list_storages(&self, node: &str) -> SyncResult<Vec<StorageListItem>> {
        self.get(&format!("nodes/{node}/storage"), &[]).await
    }

    async fn list_storage_content(
        &self,
        node: &str,
        storage: &str,
    ) -> SyncResult<Vec<StorageContentItem>> {
        self.get(
            &format!("nodes/{node}/storage/{storage}/content"),
            &[("content", "images".to_string())],
        )
        .await
    }

    async fn submit_guest_command(
        &self,
        node: &str,
        vmid: u32,
        argv: Vec<String>,
    ) -> SyncResult<u64> {
        let started: GuestExecStarted = self
            .post(
                &Self::vm_path(node, vmid, "agent/exec"),
                &GuestExecRequest { command: argv },
            )
            .await
            .map_err(agent_unavailable)?;
        Ok(started.pid)
    }

    async fn poll_guest_command(
        &self,
        node: &str,
        vmid: u32,
        pid: u64,
    ) -> SyncResult<GuestExecStatus> {
        self.get(
            &Self::vm_path(node, vmid, "agent/exec-status"),
            &[("pid", pid.to_string())],
        )
        .await
        .map_err(agent_unavailable)
    }

    async fn get_guest_os_info(&self, node: &str, vmid: u32) -> SyncResult<OsInfo> {
        let response: OsInfoResponse = self
            .get(&Self::vm_path(node, vmid, "agent/get-osinfo"), &[])
            .await
            .map_err(agent_unavailable)?;
        Ok(response.result)
    }
}
