//! HTTP client for the rewrite/route service

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::UpstreamServiceUnavailable;
use crate::protocol::{
    AnalyzeRequest, AnalyzeResponse, RewriteRequest, RewriteResponse, RouteRequest, RouteResponse,
};

pub const DEFAULT_REWRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_ROUTE_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct RewriteClient {
    client: Client,
    base_url: String,
    rewrite_timeout: Duration,
    route_timeout: Duration,
}

impl std::fmt::Debug for RewriteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteClient")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.base_url)
            .field("rewrite_timeout", &self.rewrite_timeout)
            .field("route_timeout", &self.route_timeout)
            .finish()
    }
}

impl RewriteClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rewrite_timeout: DEFAULT_REWRITE_TIMEOUT,
            route_timeout: DEFAULT_ROUTE_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, rewrite: Duration, route: Duration) -> Self {
        self.rewrite_timeout = rewrite;
        self.route_timeout = route;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /rewrite`
    pub async fn rewrite(
        &self,
        request: &RewriteRequest,
    ) -> Result<RewriteResponse, UpstreamServiceUnavailable> {
        self.post("/rewrite", request, self.rewrite_timeout).await
    }

    /// `POST /route`
    pub async fn route(
        &self,
        prompt: &str,
        confidence_threshold: f64,
    ) -> Result<RouteResponse, UpstreamServiceUnavailable> {
        let request = RouteRequest {
            prompt: prompt.to_string(),
            confidence_threshold,
        };
        self.post("/route", &request, self.route_timeout).await
    }

    /// `POST /analyze`
    pub async fn analyze(&self, prompt: &str) -> Result<AnalyzeResponse, UpstreamServiceUnavailable> {
        let request = AnalyzeRequest {
            prompt: prompt.to_string(),
        };
        self.post("/analyze", &request, self.route_timeout).await
    }

    /// `GET /health`; any failure reads as unhealthy
    pub async fn health(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Rewrite service health check failed: {}", e);
                false
            }
        }
    }

    async fn post<B, T>(
        &self,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<T, UpstreamServiceUnavailable>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} (timeout {:?})", url, timeout);

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UpstreamServiceUnavailable::new(format!("{} timed out after {:?}", path, timeout))
                } else {
                    UpstreamServiceUnavailable::new(format!("{} request failed: {}", path, e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(UpstreamServiceUnavailable::new(format!(
                "{} returned {}: {}",
                path, status, text
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamServiceUnavailable::new(format!("{} invalid response: {}", path, e)))
    }
}
