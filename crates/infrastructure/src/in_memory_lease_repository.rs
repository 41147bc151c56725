use async_trait::async_trait;
use chrono::{Duration, Utc};
use lariat_application::LeaseRepository;
use lariat_core::{AppError, AppResult};
use lariat_domain::{Lease, LeaseStateFilter};
use tokio::sync::Mutex;

/// In-memory lease store for tests and single-process setups.
///
/// One mutex stands in for the database row locks: every acquire and renew
/// holds it across its check-then-write, which yields the same per-resource
/// linearization as `FOR UPDATE`.
#[derive(Default)]
pub struct InMemoryLeaseRepository {
    state: Mutex<InMemoryLeaseState>,
}

#[derive(Default)]
struct InMemoryLeaseState {
    rows: Vec<Lease>,
    next_id: i64,
}

impl InMemoryLeaseRepository {
    /// Creates an empty lease store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn force_expire(&self, resource: &str) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        for row in state
            .rows
            .iter_mut()
            .filter(|row| row.resource == resource && row.released_at.is_none())
        {
            row.expires_at = now - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl LeaseRepository for InMemoryLeaseRepository {
    async fn acquire(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        if let Some(active) = state
            .rows
            .iter()
            .find(|row| row.resource == resource && row.is_active(now))
        {
            return Err(AppError::Conflict(format!(
                "resource '{resource}' is already leased by holder '{}'",
                active.holder
            )));
        }

        state.next_id += 1;
        let lease = Lease {
            id: state.next_id,
            resource: resource.to_owned(),
            holder: holder.to_owned(),
            created_at: now,
            renewed_at: None,
            released_at: None,
            expires_at: now + Duration::seconds(i64::from(ttl_seconds)),
        };
        state.rows.push(lease.clone());
        Ok(lease)
    }

    async fn renew(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let active_index = state
            .rows
            .iter()
            .position(|row| row.resource == resource && row.is_active(now));

        match active_index {
            Some(index) if state.rows[index].holder == holder => {
                let row = &mut state.rows[index];
                row.renewed_at = Some(now);
                row.expires_at = now + Duration::seconds(i64::from(ttl_seconds));
                Ok(row.clone())
            }
            Some(index) => Err(AppError::Conflict(format!(
                "resource '{resource}' is leased by holder '{}'",
                state.rows[index].holder
            ))),
            None => {
                let lapsed = state.rows.iter().any(|row| {
                    row.resource == resource && row.holder == holder && row.released_at.is_none()
                });
                if lapsed {
                    Err(AppError::Conflict(format!(
                        "lease on '{resource}' held by '{holder}' has expired"
                    )))
                } else {
                    Err(AppError::NotFound(format!(
                        "no lease held by '{holder}' exists for resource '{resource}'"
                    )))
                }
            }
        }
    }

    async fn release(&self, lease_id: i64) -> AppResult<Lease> {
        let mut state = self.state.lock().await;
        let row = state
            .rows
            .iter_mut()
            .find(|row| row.id == lease_id)
            .ok_or_else(|| AppError::NotFound(format!("lease '{lease_id}' does not exist")))?;

        if row.released_at.is_none() {
            row.released_at = Some(Utc::now());
        }
        Ok(row.clone())
    }

    async fn list(&self, filter: LeaseStateFilter) -> AppResult<Vec<Lease>> {
        let state = self.state.lock().await;
        let now = Utc::now();
        Ok(state
            .rows
            .iter()
            .filter(|row| row.matches(filter, now))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests;
