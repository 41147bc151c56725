use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_core::AppResult;
use lariat_domain::{Lease, LeaseStateFilter};

/// Repository port for the authoritative lease store.
///
/// Implementations own the lock, check, write pattern: uniqueness of the
/// active lease per resource is enforced here, not by a schema constraint.
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Inserts a new lease row for `resource` unless an active one exists.
    /// Prior expired or released rows stay in place as history.
    async fn acquire(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease>;

    /// Extends the active lease held by `holder` on `resource`. Fails with
    /// `Conflict` when the holder's lease lapsed or another holder is active,
    /// and `NotFound` when no lease for the pair exists at all.
    async fn renew(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease>;

    /// Marks one lease released; repeating the call is a no-op.
    async fn release(&self, lease_id: i64) -> AppResult<Lease>;

    /// Lists lease rows matching one derived-state filter, oldest first.
    async fn list(&self, filter: LeaseStateFilter) -> AppResult<Vec<Lease>>;
}

/// Grant returned to lease coordination callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseGrant {
    /// Granted lease identifier.
    pub lease_id: i64,
    /// Expiry instant on the lease authority's clock.
    pub expires_at: DateTime<Utc>,
    /// Renewal timestamp when the grant came from a renewal.
    pub renewed_at: Option<DateTime<Utc>>,
}

/// Coordination port over the lease authority, used by dispatchers and
/// worker-side handles. Implemented in-process by the lease service itself
/// and remotely by the HTTP adapter.
#[async_trait]
pub trait LeaseCoordinator: Send + Sync {
    /// Acquires an exclusive lease on `resource` for `holder`.
    async fn acquire(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant>;

    /// Renews the lease held by `holder` on `resource`.
    async fn renew(&self, resource: &str, holder: &str) -> AppResult<LeaseGrant>;

    /// Releases one lease by identifier; releasing twice is a no-op.
    async fn release(&self, lease_id: i64) -> AppResult<()>;
}
