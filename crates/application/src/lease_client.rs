use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_core::{AppError, AppResult};
use tokio::sync::Mutex;

use crate::lease_ports::{LeaseCoordinator, LeaseGrant};
use crate::renewal::{AutoRenewer, RenewalTarget};

/// Holder-side handle over one named lease.
///
/// Every lease interaction a holder performs goes through one of these: the
/// dispatcher drives a per-task handle when it claims, heartbeats, completes
/// or abandons, and long-lived holders keep one running under the
/// auto-renewer. All calls on one handle serialize through an internal
/// mutex, so an in-flight auto-renewal cannot overlap a caller-initiated
/// release and resurrect an already-released lease. Once a renewal observes
/// the lease as lost, the handle is terminal.
pub struct LeaseClient {
    coordinator: Arc<dyn LeaseCoordinator>,
    resource: String,
    holder: String,
    state: Mutex<LeaseClientState>,
}

#[derive(Debug, Default)]
struct LeaseClientState {
    lease_id: Option<i64>,
    expires_at: Option<DateTime<Utc>>,
    lost: bool,
}

impl LeaseClient {
    /// Creates a handle for `resource` held as `holder`.
    #[must_use]
    pub fn new(
        coordinator: Arc<dyn LeaseCoordinator>,
        resource: impl Into<String>,
        holder: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            resource: resource.into(),
            holder: holder.into(),
            state: Mutex::new(LeaseClientState::default()),
        }
    }

    /// Creates a handle over a lease already granted to `holder`, recording
    /// the known lease id.
    #[must_use]
    pub fn held(
        coordinator: Arc<dyn LeaseCoordinator>,
        resource: impl Into<String>,
        holder: impl Into<String>,
        lease_id: i64,
    ) -> Self {
        Self {
            coordinator,
            resource: resource.into(),
            holder: holder.into(),
            state: Mutex::new(LeaseClientState {
                lease_id: Some(lease_id),
                expires_at: None,
                lost: false,
            }),
        }
    }

    /// Acquires the lease and records the granted identifier.
    pub async fn acquire(&self) -> AppResult<LeaseGrant> {
        let mut state = self.state.lock().await;
        if state.lost {
            return Err(self.lost_error());
        }

        let grant = self
            .coordinator
            .acquire(self.resource.as_str(), self.holder.as_str())
            .await?;
        state.lease_id = Some(grant.lease_id);
        state.expires_at = Some(grant.expires_at);
        Ok(grant)
    }

    /// Extends the lease held on this handle's resource. Renewal is keyed by
    /// resource and holder, so a fresh handle can renew a lease granted on
    /// the holder's behalf; the grant's id is recorded. Contention or a
    /// vanished lease row is terminal for the handle.
    pub async fn renew(&self) -> AppResult<LeaseGrant> {
        let mut state = self.state.lock().await;
        if state.lost {
            return Err(self.lost_error());
        }

        match self
            .coordinator
            .renew(self.resource.as_str(), self.holder.as_str())
            .await
        {
            Ok(grant) => {
                state.lease_id = Some(grant.lease_id);
                state.expires_at = Some(grant.expires_at);
                Ok(grant)
            }
            Err(error) if error.is_claim_loss() => {
                state.lost = true;
                state.lease_id = None;
                Err(error)
            }
            Err(error) => Err(error),
        }
    }

    /// Releases the held lease; releasing an unheld handle is a no-op.
    pub async fn release(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let Some(lease_id) = state.lease_id.take() else {
            return Ok(());
        };
        state.expires_at = None;

        self.coordinator.release(lease_id).await
    }

    /// Returns true once a renewal observed the lease as lost.
    pub async fn is_lost(&self) -> bool {
        self.state.lock().await.lost
    }

    /// Returns the expiry deadline recorded by the latest grant.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.expires_at
    }

    /// Spawns periodic renewal of this handle. The interval must stay
    /// strictly below half the lease TTL.
    #[must_use]
    pub fn start_auto_renew(self: Arc<Self>, interval: Duration) -> AutoRenewer {
        AutoRenewer::spawn(self, interval)
    }

    fn lost_error(&self) -> AppError {
        AppError::Conflict(format!("lease on '{}' was lost", self.resource))
    }
}

#[async_trait]
impl RenewalTarget for LeaseClient {
    async fn renew(&self) -> AppResult<DateTime<Utc>> {
        LeaseClient::renew(self).await.map(|grant| grant.expires_at)
    }
}
