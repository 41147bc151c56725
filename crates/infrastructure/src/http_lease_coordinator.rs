//! HTTP adapter speaking the Lease Manager wire contract.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_application::{LeaseCoordinator, LeaseGrant};
use lariat_core::{AppError, AppResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// Lease Manager client used by dispatchers and worker-side handles.
///
/// The request timeout must stay below half the lease TTL so a stuck call
/// cannot silently let the lease expire.
#[derive(Clone)]
pub struct HttpLeaseCoordinator {
    http_client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct LeaseRequest<'a> {
    resource: &'a str,
    holder: &'a str,
}

#[derive(Debug, Deserialize)]
struct LeaseGrantResponse {
    id: i64,
    expires_at: DateTime<Utc>,
    #[serde(default)]
    renewed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: String,
}

impl HttpLeaseCoordinator {
    /// Creates a coordinator against `base_url` with a bounded request
    /// timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    async fn grant_from_response(
        response: reqwest::Response,
        context: &str,
    ) -> AppResult<LeaseGrant> {
        let status = response.status();
        if status.is_success() {
            let body = response.json::<LeaseGrantResponse>().await.map_err(|error| {
                AppError::Internal(format!("failed to parse {context} response body: {error}"))
            })?;
            return Ok(LeaseGrant {
                lease_id: body.id,
                expires_at: body.expires_at,
                renewed_at: body.renewed_at,
            });
        }

        Err(Self::error_from_response(status, response, context).await)
    }

    async fn error_from_response(
        status: StatusCode,
        response: reqwest::Response,
        context: &str,
    ) -> AppError {
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| format!("status {}", status.as_u16()));

        match status {
            StatusCode::CONFLICT => AppError::Conflict(format!("{context} rejected: {message}")),
            StatusCode::NOT_FOUND => AppError::NotFound(format!("{context} rejected: {message}")),
            StatusCode::BAD_REQUEST => {
                AppError::Validation(format!("{context} rejected: {message}"))
            }
            _ => AppError::Internal(format!("{context} failed: {message}")),
        }
    }
}

#[async_trait]
impl LeaseCoordinator for HttpLeaseCoordinator {
    async fn acquire(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant> {
        let response = self
            .http_client
            .post(format!("{}/leases", self.base_url))
            .json(&LeaseRequest { resource, holder })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call lease acquire endpoint: {error}"))
            })?;

        Self::grant_from_response(response, "lease acquire").await
    }

    async fn renew(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant> {
        let response = self
            .http_client
            .put(format!("{}/leases/renew", self.base_url))
            .json(&LeaseRequest { resource, holder })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call lease renew endpoint: {error}"))
            })?;

        Self::grant_from_response(response, "lease renew").await
    }

    async fn release(&self, lease_id: i64) -> AppResult<()> {
        let response = self
            .http_client
            .delete(format!("{}/leases/{lease_id}", self.base_url))
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call lease release endpoint: {error}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(Self::error_from_response(status, response, "lease release").await)
    }
}
