use std::sync::Arc;

use async_trait::async_trait;
use lariat_core::{AppError, AppResult};
use lariat_domain::{Lease, LeaseStateFilter};

use crate::lease_ports::{LeaseCoordinator, LeaseGrant, LeaseRepository};

/// Lease Manager service owning the expiry rule.
///
/// Every expiry deadline is `now + TTL` on the repository's clock; client
/// clocks never participate.
#[derive(Clone)]
pub struct LeaseService {
    repository: Arc<dyn LeaseRepository>,
    lease_ttl_seconds: u32,
}

impl LeaseService {
    /// Creates a lease service over the authoritative repository.
    pub fn new(repository: Arc<dyn LeaseRepository>, lease_ttl_seconds: u32) -> AppResult<Self> {
        if lease_ttl_seconds == 0 {
            return Err(AppError::Validation(
                "lease_ttl_seconds must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            repository,
            lease_ttl_seconds,
        })
    }

    /// Returns the configured lease TTL in seconds.
    #[must_use]
    pub fn lease_ttl_seconds(&self) -> u32 {
        self.lease_ttl_seconds
    }

    /// Grants a lease on `resource` to `holder` unless one is active.
    pub async fn acquire(&self, resource: &str, holder: &str) -> AppResult<Lease> {
        require_key("resource", resource)?;
        require_key("holder", holder)?;

        self.repository
            .acquire(resource, holder, self.lease_ttl_seconds)
            .await
    }

    /// Extends the lease held by `holder` on `resource`. A lapsed lease is a
    /// conflict, never a silent re-acquire.
    pub async fn renew(&self, resource: &str, holder: &str) -> AppResult<Lease> {
        require_key("resource", resource)?;
        require_key("holder", holder)?;

        self.repository
            .renew(resource, holder, self.lease_ttl_seconds)
            .await
    }

    /// Releases one lease by identifier; releasing twice is a no-op.
    pub async fn release(&self, lease_id: i64) -> AppResult<Lease> {
        self.repository.release(lease_id).await
    }

    /// Lists lease rows by derived state for dashboards and sweeps.
    pub async fn list_by_state(&self, filter: LeaseStateFilter) -> AppResult<Vec<Lease>> {
        self.repository.list(filter).await
    }
}

#[async_trait]
impl LeaseCoordinator for LeaseService {
    async fn acquire(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant> {
        LeaseService::acquire(self, resource, holder)
            .await
            .map(grant_from_lease)
    }

    async fn renew(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant> {
        LeaseService::renew(self, resource, holder)
            .await
            .map(grant_from_lease)
    }

    async fn release(&self, lease_id: i64) -> AppResult<()> {
        LeaseService::release(self, lease_id).await.map(|_| ())
    }
}

fn grant_from_lease(lease: Lease) -> LeaseGrant {
    LeaseGrant {
        lease_id: lease.id,
        expires_at: lease.expires_at,
        renewed_at: lease.renewed_at,
    }
}

fn require_key(name: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(())
}

#[cfg(test)]
mod tests;
