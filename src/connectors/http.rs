//! HTTP ERP connector
//!
//! Operations are posted as JSON to `{base_url}/operations/{operation}`
//! together with the caller's identity. 429 and 5xx responses and transport
//! failures are reported as retryable.

use super::{AuthContext, ErpConnector};
use crate::types::{AppError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub struct HttpErpConnector {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpErpConnector {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            name: name.into(),
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn status_error(status: StatusCode, body: &str) -> AppError {
    let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
    AppError::connector(format!("ERP returned {}: {}", status, body), retryable)
}

#[async_trait]
impl ErpConnector for HttpErpConnector {
    async fn invoke(
        &self,
        operation: &str,
        payload: serde_json::Value,
        auth: &AuthContext,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/operations/{}", self.base_url, operation);
        let body = json!({
            "payload": payload,
            "principal": auth.principal,
        });

        debug!(connector = %self.name, %operation, request_id = %auth.request_id, "invoking ERP operation");

        let response = self
            .authorize(self.client.post(&url))
            .header("X-Request-Id", auth.request_id.to_string())
            .header("X-User-Id", &auth.principal.user_id)
            .header("X-Org-Id", &auth.principal.org_id)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::connector(format!("request to {} failed: {}", url, e), true))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| AppError::connector(format!("invalid ERP response: {}", e), false))
    }

    async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| AppError::connector(format!("health probe failed: {}", e), true))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response.status(), "health probe"))
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
