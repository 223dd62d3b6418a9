//! Home Assistant service calls

use std::time::Duration;

use async_trait::async_trait;

use super::ActionExecutor;
use crate::intent::Action;
use crate::{Error, Result};

/// Executes actions via the Home Assistant REST API
pub struct HomeAssistantClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    timeout: Duration,
}

impl HomeAssistantClient {
    /// Create a client
    ///
    /// # Errors
    ///
    /// Returns error if URL or access token is missing
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base_url = base_url.into();
        let token = token.into();
        if base_url.is_empty() {
            return Err(Error::Config("Home Assistant URL required".to_string()));
        }
        if token.is_empty() {
            return Err(Error::Config(
                "Home Assistant access token required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        })
    }

    fn service_url(&self, action: &Action) -> String {
        format!(
            "{}/api/services/{}/{}",
            self.base_url, action.domain, action.service
        )
    }
}

/// Service call body; `all` targets every entity in the domain
fn service_body(action: &Action) -> serde_json::Value {
    serde_json::json!({ "entity_id": action.target })
}

#[async_trait]
impl ActionExecutor for HomeAssistantClient {
    async fn execute(&self, action: &Action) -> Result<()> {
        if !action.is_well_formed() {
            return Err(Error::ActionExecution(format!(
                "{action}: domain and service must match [a-z0-9_]+"
            )));
        }

        tracing::info!(%action, "calling Home Assistant service");

        let response = self
            .client
            .post(self.service_url(action))
            .header("Authorization", format!("Bearer {}", self.token))
            .timeout(self.timeout)
            .json(&service_body(action))
            .send()
            .await
            .map_err(|e| Error::ActionExecution(format!("{action}: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%action, status = %status, "Home Assistant rejected service call");
            return Err(Error::ActionExecution(format!("{action}: {status} {body}")));
        }

        Ok(())
    }
}
