// ABOUTME: HTTP client for the backend inventory, health and log endpoints
// The InventoryClient trait is the seam the registry, monitor and log tails depend on

use crate::error::{ConsoleError, Result};
use crate::models::{Target, TargetId};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// `GET /targets`
    async fn fetch_targets(&self) -> Result<Vec<Target>>;

    /// `GET /health`; true when the backend answers with a success status
    async fn probe(&self) -> bool;

    /// `GET /targets/{id}/logs`
    async fn fetch_logs(&self, target_id: &TargetId) -> Result<String>;

    /// `GET /targets/{id}/logs/download`
    async fn download_logs(&self, target_id: &TargetId) -> Result<Vec<u8>>;
}

enum RequestFailure {
    Unauthorized,
    Status(StatusCode),
    Network(String),
}

impl RequestFailure {
    fn into_registry_error(self) -> ConsoleError {
        match self {
            RequestFailure::Unauthorized => ConsoleError::AuthExpired,
            RequestFailure::Status(status) => ConsoleError::RegistryFetchFailed(format!("HTTP {}", status)),
            RequestFailure::Network(reason) => ConsoleError::RegistryFetchFailed(reason),
        }
    }

    fn into_log_error(self, target_id: &TargetId) -> ConsoleError {
        let reason = match self {
            RequestFailure::Unauthorized => return ConsoleError::AuthExpired,
            RequestFailure::Status(status) => format!("HTTP {}", status),
            RequestFailure::Network(reason) => reason,
        };
        ConsoleError::LogFetchFailed {
            target: target_id.to_string(),
            reason,
        }
    }
}

pub struct HttpInventoryClient {
    http: reqwest::Client,
    base: Url,
}

impl HttpInventoryClient {
    /// Every request carries `timeout`; expiry counts as a failed fetch
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(server_url)
            .map_err(|e| ConsoleError::Config(format!("server url {}: {}", server_url, e)))?;
        if base.cannot_be_a_base() {
            return Err(ConsoleError::Config(format!("server url {} cannot be a base", server_url)));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsoleError::Config(e.to_string()))?;
        Ok(Self { http, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get(&self, url: Url) -> std::result::Result<reqwest::Response, RequestFailure> {
        debug!("GET {}", url);
        let response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| RequestFailure::Network(describe(&e)))?;

        match response.status() {
            StatusCode::UNAUTHORIZED => Err(RequestFailure::Unauthorized),
            status if status.is_success() => Ok(response),
            status => Err(RequestFailure::Status(status)),
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}

#[async_trait]
impl InventoryClient for HttpInventoryClient {
    async fn fetch_targets(&self) -> Result<Vec<Target>> {
        let response = self
            .get(self.endpoint(&["targets"]))
            .await
            .map_err(RequestFailure::into_registry_error)?;

        // An empty inventory may be encoded as `null`
        let targets: Option<Vec<Target>> = response
            .json()
            .await
            .map_err(|e| ConsoleError::RegistryFetchFailed(format!("invalid inventory payload: {}", e)))?;
        Ok(targets.unwrap_or_default())
    }

    async fn probe(&self) -> bool {
        match self.get(self.endpoint(&["health"])).await {
            Ok(_) => true,
            Err(RequestFailure::Unauthorized) => {
                // The process is alive even if our identity is not
                true
            }
            Err(RequestFailure::Status(status)) => {
                warn!("Health probe returned HTTP {}", status);
                false
            }
            Err(RequestFailure::Network(reason)) => {
                debug!("Health probe failed: {}", reason);
                false
            }
        }
    }

    async fn fetch_logs(&self, target_id: &TargetId) -> Result<String> {
        let response = self
            .get(self.endpoint(&["targets", target_id.as_str(), "logs"]))
            .await
            .map_err(|f| f.into_log_error(target_id))?;
        response.text().await.map_err(|e| ConsoleError::LogFetchFailed {
            target: target_id.to_string(),
            reason: describe(&e),
        })
    }

    async fn download_logs(&self, target_id: &TargetId) -> Result<Vec<u8>> {
        let response = self
            .get(self.endpoint(&["targets", target_id.as_str(), "logs", "download"]))
            .await
            .map_err(|f| f.into_log_error(target_id))?;

        let mut blob = Vec::new();
        let mut chunks = response.bytes_stream();
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(|e| ConsoleError::LogFetchFailed {
                target: target_id.to_string(),
                reason: describe(&e),
            })?;
            blob.extend_from_slice(&chunk);
        }
        debug!("Downloaded {} bytes of logs for {}", blob.len(), target_id);
        Ok(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_respect_base_path() {
        let client = HttpInventoryClient::new("http://localhost:8080", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint(&["targets"]).as_str(), "http://localhost:8080/targets");

        let client =
            HttpInventoryClient::new("https://ops.example.com/console/", Duration::from_secs(1)).unwrap();
        let id = TargetId::new("a/b").unwrap();
        assert_eq!(
            client.endpoint(&["targets", id.as_str(), "logs"]).as_str(),
            "https://ops.example.com/console/targets/a%2Fb/logs"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(HttpInventoryClient::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }
}
