//! HTTP client of the NetBox REST API.

use super::api_client::{REQUEST_TIMEOUT, build_rate_limiter};
use crate::config::{NetboxConnectionConfig, RateLimitConfig};
use crate::core::domain::{
    error::{SyncError, SyncResult},
    model::netbox::EntityKind,
    port::{Criteria, Inventory},
};
use async_trait::async_trait;
use governor::DefaultDirectRateLimiter;
use reqwest::{Client, Method, StatusCode, header};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Paginated list envelope of NetBox.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    next: Option<String>,
    results: Vec<Value>,
}

/// Client of the NetBox REST API, authenticated with an API token.
#[derive(Debug, Clone)]
pub struct NetboxClient {
    http_client: Client,
    api_url: Url,
    authorization: String,
    rate_limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl NetboxClient {
    /// Creates a new `NetboxClient`.
    ///
    /// # Errors
    /// Returns `SyncError::Connection` if the HTTP client cannot be built.
    pub fn new(
        connection: &NetboxConnectionConfig,
        rate_limit: Option<RateLimitConfig>,
    ) -> SyncResult<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Connection(e.to_string()))?;
        Ok(Self {
            http_client,
            api_url: connection.api_url()?,
            authorization: format!("Token {}", connection.token),
            rate_limiter: build_rate_limiter(rate_limit),
        })
    }

    fn endpoint_url(&self, kind: EntityKind, id: Option<u64>) -> SyncResult<Url> {
        let path = match id {
            Some(id) => format!("{}{id}/", kind.endpoint()),
            None => kind.endpoint().to_string(),
        };
        self.api_url
            .join(&path)
            .map_err(|e| SyncError::Connection(format!("Invalid request path '{path}': {e}")))
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> SyncResult<reqwest::Response> {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
        debug!(%method, %url, "netbox request");

        let path = url.path().to_string();
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
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(SyncError::Authentication(format!(
                "NetBox rejected the API token ({status})"
            )));
        }
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(SyncError::Api {
                status: status.as_u16(),
                path,
                message: error_text,
            });
        }
        Ok(response)
    }

    async fn send_json(&self, method: Method, url: Url, body: Option<&Value>) -> SyncResult<Value> {
        let path = url.path().to_string();
        let response = self.send(method, url, body).await?;
        let text = response
            .text()
            .await
            .map_err(|e| SyncError::Connection(format!("Failed to read response: {}", e)))?;
        serde_json::from_str(&text).map_err(|e| SyncError::decode(path, e))
    }
}

#[async_trait]
impl Inventory for NetboxClient {
    async fn filter(&self, kind: EntityKind, criteria: &Criteria) -> SyncResult<Vec<Value>> {
        let mut url = self.endpoint_url(kind, None)?;
        url.query_pairs_mut()
            .extend_pairs(criteria.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .append_pair("limit", "0");

        let mut records = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let page: Page = serde_json::from_value(self.send_json(Method::GET, url, None).await?)
                .map_err(|e| SyncError::decode(kind.to_string(), e))?;
            records.extend(page.results);
            next = page
                .next
                .map(|raw| {
                    Url::parse(&raw)
                        .map_err(|e| SyncError::Connection(format!("Invalid next link '{raw}': {e}")))
                })
                .transpose()?;
        }
        Ok(records)
    }

    async fn create(&self, kind: EntityKind, fields: Value) -> SyncResult<Value> {
        let url = self.endpoint_url(kind, None)?;
        self.send_json(Method::POST, url, Some(&fields)).await
    }

    async fn update(&self, kind: EntityKind, id: u64, fields: Value) -> SyncResult<Value> {
        let url = self.endpoint_url(kind, Some(id))?;
        self.send_json(Method::PATCH, url, Some(&fields)).await
    }

    async fn delete(&self, kind: EntityKind, id: u64) -> SyncResult<()> {
        let url = self.endpoint_url(kind, Some(id))?;
        self.send(Method::DELETE, url, None).await?;
        Ok(())
    }
}
