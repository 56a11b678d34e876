//! ERP connectors
//!
//! Action, Scheduler and Compliance agents reach the ERP through
//! [`ErpConnector`]. Every invocation carries the authenticated principal;
//! connectors never act with ambient credentials.

pub mod http;

use crate::types::{AppError, Principal, Result};
use crate::utils::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub use http::HttpErpConnector;

/// Identity forwarded with every connector call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub principal: Principal,
    pub request_id: Uuid,
}

impl AuthContext {
    pub fn new(principal: Principal, request_id: Uuid) -> Self {
        Self {
            principal,
            request_id,
        }
    }
}

#[async_trait]
pub trait ErpConnector: Send + Sync {
    /// Invoke an ERP operation such as `employee.update` or `calendar.book`.
    async fn invoke(
        &self,
        operation: &str,
        payload: serde_json::Value,
        auth: &AuthContext,
    ) -> Result<serde_json::Value>;

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Retries retryable connector errors with bounded backoff.
pub struct RetryingConnector {
    inner: Arc<dyn ErpConnector>,
    policy: RetryPolicy,
}

impl RetryingConnector {
    pub fn new(inner: Arc<dyn ErpConnector>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl ErpConnector for RetryingConnector {
    async fn invoke(
        &self,
        operation: &str,
        payload: serde_json::Value,
        auth: &AuthContext,
    ) -> Result<serde_json::Value> {
        self.policy
            .run(
                || self.inner.invoke(operation, payload.clone(), auth),
                AppError::is_retryable,
            )
            .await
    }

    async fn health_check(&self) -> Result<()> {
        self.inner.health_check().await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
