use lariat_application::LeaseRepository;
use lariat_core::AppError;
use lariat_domain::LeaseStateFilter;

use super::InMemoryLeaseRepository;

#[tokio::test]
async fn only_one_active_lease_per_resource() {
    let repository = InMemoryLeaseRepository::new();

    repository.acquire("task:1", "w-A", 30).await.unwrap();
    let contender = repository.acquire("task:1", "w-B", 30).await;
    assert!(matches!(contender, Err(AppError::Conflict(_))));

    let active = repository.list(LeaseStateFilter::Active).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].holder, "w-A");
}

#[tokio::test]
async fn different_resources_do_not_contend() {
    let repository = InMemoryLeaseRepository::new();

    repository.acquire("task:1", "w-A", 30).await.unwrap();
    repository.acquire("task:2", "w-B", 30).await.unwrap();

    let active = repository.list(LeaseStateFilter::Active).await.unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn reacquire_after_expiry_keeps_the_old_row_as_history() {
    let repository = InMemoryLeaseRepository::new();

    let first = repository.acquire("task:1", "w-A", 30).await.unwrap();
    repository.force_expire("task:1").await;

    let second = repository.acquire("task:1", "w-B", 30).await.unwrap();
    assert!(second.id > first.id);

    let all = repository.list(LeaseStateFilter::All).await.unwrap();
    let expired = repository.list(LeaseStateFilter::Expired).await.unwrap();
    let active = repository.list(LeaseStateFilter::Active).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, first.id);
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].holder, "w-B");
}

#[tokio::test]
async fn renewal_extends_expiry_monotonically() {
    let repository = InMemoryLeaseRepository::new();

    let lease = repository.acquire("task:1", "w-A", 30).await.unwrap();
    let first = repository.renew("task:1", "w-A", 30).await.unwrap();
    let second = repository.renew("task:1", "w-A", 30).await.unwrap();

    assert_eq!(first.id, lease.id);
    assert!(first.expires_at >= lease.expires_at);
    assert!(second.expires_at >= first.expires_at);
    assert!(second.renewed_at.is_some());

    let renewed = repository.list(LeaseStateFilter::Renewed).await.unwrap();
    assert_eq!(renewed.len(), 1);
}

#[tokio::test]
async fn renew_after_expiry_is_a_conflict() {
    let repository = InMemoryLeaseRepository::new();

    repository.acquire("task:1", "w-A", 30).await.unwrap();
    repository.force_expire("task:1").await;

    let renewed = repository.renew("task:1", "w-A", 30).await;
    assert!(matches!(renewed, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn renew_by_a_non_holder_is_a_conflict() {
    let repository = InMemoryLeaseRepository::new();

    repository.acquire("task:1", "w-A", 30).await.unwrap();
    let renewed = repository.renew("task:1", "w-B", 30).await;
    assert!(matches!(renewed, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn renew_of_an_unknown_resource_is_not_found() {
    let repository = InMemoryLeaseRepository::new();

    let renewed = repository.renew("task:9", "w-A", 30).await;
    assert!(matches!(renewed, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn release_twice_keeps_the_first_timestamp() {
    let repository = InMemoryLeaseRepository::new();

    let lease = repository.acquire("task:1", "w-A", 30).await.unwrap();
    let first = repository.release(lease.id).await.unwrap();
    let second = repository.release(lease.id).await.unwrap();

    assert!(first.released_at.is_some());
    assert_eq!(first.released_at, second.released_at);

    let released = repository.list(LeaseStateFilter::Released).await.unwrap();
    assert_eq!(released.len(), 1);
}

#[tokio::test]
async fn release_of_an_unknown_id_is_not_found() {
    let repository = InMemoryLeaseRepository::new();

    let released = repository.release(42).await;
    assert!(matches!(released, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn released_resources_can_be_reacquired_immediately() {
    let repository = InMemoryLeaseRepository::new();

    let lease = repository.acquire("task:1", "w-A", 30).await.unwrap();
    repository.release(lease.id).await.unwrap();

    let reacquired = repository.acquire("task:1", "w-B", 30).await.unwrap();
    assert_eq!(reacquired.holder, "w-B");
}
