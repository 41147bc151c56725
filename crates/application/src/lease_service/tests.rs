use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::Mutex;

use lariat_core::{AppError, AppResult};
use lariat_domain::{Lease, LeaseStateFilter};

use crate::lease_ports::{LeaseCoordinator, LeaseRepository};

use super::LeaseService;

#[derive(Default)]
struct FakeLeaseRepository {
    state: Mutex<FakeLeaseState>,
}

#[derive(Default)]
struct FakeLeaseState {
    rows: Vec<Lease>,
    next_id: i64,
}

impl FakeLeaseRepository {
    async fn backdate_expiry(&self, lease_id: i64) {
        let mut state = self.state.lock().await;
        let row = state
            .rows
            .iter_mut()
            .find(|row| row.id == lease_id)
            .expect("lease row should exist");
        row.expires_at = Utc::now() - Duration::seconds(1);
    }
}

#[async_trait]
impl LeaseRepository for FakeLeaseRepository {
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
            Some(_) => Err(AppError::Conflict(format!(
                "resource '{resource}' is leased by another holder"
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

fn service(repository: Arc<FakeLeaseRepository>) -> LeaseService {
    LeaseService::new(repository, 30).expect("valid TTL")
}

#[test]
fn zero_ttl_is_rejected() {
    let result = LeaseService::new(Arc::new(FakeLeaseRepository::default()), 0);
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[tokio::test]
async fn acquire_rejects_empty_resource_and_holder() {
    let repository = Arc::new(FakeLeaseRepository::default());
    let lease_service = service(repository.clone());

    let empty_resource = lease_service.acquire("  ", "w-A").await;
    assert!(matches!(empty_resource, Err(AppError::Validation(_))));

    let empty_holder = lease_service.acquire("task:1", "").await;
    assert!(matches!(empty_holder, Err(AppError::Validation(_))));

    assert!(repository.state.lock().await.rows.is_empty());
}

#[tokio::test]
async fn second_acquire_on_an_active_resource_conflicts() {
    let lease_service = service(Arc::new(FakeLeaseRepository::default()));

    lease_service.acquire("task:1", "w-A").await.unwrap();
    let contender = lease_service.acquire("task:1", "w-B").await;
    assert!(matches!(contender, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn renew_after_expiry_is_a_conflict_not_a_reacquire() {
    let repository = Arc::new(FakeLeaseRepository::default());
    let lease_service = service(repository.clone());

    let lease = lease_service.acquire("task:1", "w-A").await.unwrap();
    repository.backdate_expiry(lease.id).await;

    let renewed = lease_service.renew("task:1", "w-A").await;
    assert!(matches!(renewed, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn renew_of_an_unknown_resource_is_not_found() {
    let lease_service = service(Arc::new(FakeLeaseRepository::default()));

    let renewed = lease_service.renew("task:9", "w-A").await;
    assert!(matches!(renewed, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn release_is_idempotent() {
    let lease_service = service(Arc::new(FakeLeaseRepository::default()));

    let lease = lease_service.acquire("task:1", "w-A").await.unwrap();
    let first = lease_service.release(lease.id).await.unwrap();
    let second = lease_service.release(lease.id).await.unwrap();

    assert_eq!(first.released_at, second.released_at);
    assert!(first.released_at.is_some());
}

#[tokio::test]
async fn coordinator_adapter_exposes_grants_from_the_same_rows() {
    let lease_service = service(Arc::new(FakeLeaseRepository::default()));
    let coordinator: Arc<dyn LeaseCoordinator> = Arc::new(lease_service.clone());

    let grant = coordinator.acquire("task:1", "w-A").await.unwrap();
    assert!(grant.renewed_at.is_none());

    let renewed = coordinator.renew("task:1", "w-A").await.unwrap();
    assert_eq!(renewed.lease_id, grant.lease_id);
    assert!(renewed.renewed_at.is_some());
    assert!(renewed.expires_at >= grant.expires_at);

    coordinator.release(grant.lease_id).await.unwrap();
    let released = lease_service
        .list_by_state(LeaseStateFilter::Released)
        .await
        .unwrap();
    assert_eq!(released.len(), 1);
}
