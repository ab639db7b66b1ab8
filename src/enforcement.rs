//! Client for the WAF enforcement service
//!
//! The enforcement service is the component that actually blocks requests
//! when prevention mode is on. The dashboard only tells it about changes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::config::EnforcementConfig;

#[derive(Debug, Error)]
pub enum EnforcementError {
    #[error("enforcement request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("enforcement service rejected the update: {0}")]
    Status(String),
}

/// Something that can be told to turn blocking on or off
#[async_trait]
pub trait EnforcementSink: Send + Sync {
    async fn set_prevention(&self, enabled: bool) -> Result<(), EnforcementError>;
}

#[derive(Serialize)]
struct PreventionUpdate {
    enabled: bool,
}

pub struct HttpEnforcementClient {
    client: Client,
    endpoint: String,
}

impl HttpEnforcementClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("wafwatch/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client for the enforcement service")?;

        let endpoint = format!("{}/api/waf/prevention", base_url.trim_end_matches('/'));

        Ok(Self { client, endpoint })
    }

    /// Build a client from config; None when no enforcement URL is set
    pub fn from_config(config: &EnforcementConfig) -> Result<Option<Self>> {
        config
            .base_url
            .as_deref()
            .map(|url| Self::new(url, Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EnforcementSink for HttpEnforcementClient {
    async fn set_prevention(&self, enabled: bool) -> Result<(), EnforcementError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&PreventionUpdate { enabled })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnforcementError::Status(format!("{status}: {body}")));
        }

        debug!(endpoint = %self.endpoint, enabled, "enforcement service acknowledged prevention mode");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_is_built_from_base_url() {
        let client = HttpEnforcementClient::new("http://waf:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.endpoint(), "http://waf:8000/api/waf/prevention");
    }

    #[test]
    fn test_no_client_without_base_url() {
        let config = EnforcementConfig::default();
        assert!(HttpEnforcementClient::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_request_error() {
        // Port 9 (discard) on localhost is not expected to accept HTTP
        let client =
            HttpEnforcementClient::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            client.set_prevention(true).await,
            Err(EnforcementError::Request(_))
        ));
    }
}
