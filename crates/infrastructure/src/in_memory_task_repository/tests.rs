use std::sync::Arc;

use lariat_application::{LeaseCoordinator, LeaseRepository, LeaseService, TaskRepository};
use lariat_core::AppError;
use lariat_domain::{LeaseStateFilter, TaskListFilter};
use serde_json::json;

use crate::in_memory_lease_repository::InMemoryLeaseRepository;

use super::InMemoryTaskRepository;

const TTL: u32 = 30;

struct Harness {
    lease_repository: Arc<InMemoryLeaseRepository>,
    lease_service: LeaseService,
    tasks: InMemoryTaskRepository,
}

fn harness() -> Harness {
    let lease_repository = Arc::new(InMemoryLeaseRepository::new());
    let lease_service = LeaseService::new(lease_repository.clone(), TTL).expect("valid TTL");
    let tasks = InMemoryTaskRepository::new(Arc::new(lease_service.clone()));
    Harness {
        lease_repository,
        lease_service,
        tasks,
    }
}

#[tokio::test]
async fn happy_path_claims_heartbeats_and_completes_with_lease_cleanup() {
    let harness = harness();
    harness.tasks.create(json!({"n": 42})).await.unwrap();

    let task = harness
        .tasks
        .claim_next("w-A", TTL)
        .await
        .unwrap()
        .expect("task should be claimable");
    assert_eq!(task.processor.as_deref(), Some("w-A"));
    assert!(task.lease_id.is_some());

    let active = harness
        .lease_service
        .list_by_state(LeaseStateFilter::Active)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].resource, "task:1");
    assert_eq!(active[0].holder, "w-A");

    let heartbeat = harness.tasks.heartbeat(task.id, "w-A", TTL).await.unwrap();
    assert!(heartbeat.must_heartbeat_before >= task.must_heartbeat_before);

    let completed = harness
        .tasks
        .complete(task.id, "w-A", json!({"squared": 1764}))
        .await
        .unwrap();
    assert!(completed.processed_at.is_some());
    assert_eq!(completed.task_output, Some(json!({"squared": 1764})));

    let released = harness
        .lease_service
        .list_by_state(LeaseStateFilter::Released)
        .await
        .unwrap();
    assert_eq!(released.len(), 1);
    assert!(released[0].released_at.is_some());
}

#[tokio::test]
async fn claims_go_to_the_lowest_task_id_first() {
    let harness = harness();
    harness.tasks.create(json!({"n": 1})).await.unwrap();
    harness.tasks.create(json!({"n": 2})).await.unwrap();

    let first = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    let second = harness.tasks.claim_next("w-B", TTL).await.unwrap().unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
}

#[tokio::test]
async fn concurrent_claims_hand_the_single_task_to_exactly_one_processor() {
    let harness = harness();
    harness.tasks.create(json!({"n": 7})).await.unwrap();

    let (first, second) = tokio::join!(
        harness.tasks.claim_next("w-A", TTL),
        harness.tasks.claim_next("w-B", TTL),
    );

    let claims = [first.unwrap(), second.unwrap()];
    let claimed = claims.iter().flatten().count();
    assert_eq!(claimed, 1);

    let active = harness
        .lease_repository
        .list(LeaseStateFilter::Active)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn a_lapsed_claim_is_reclaimed_with_a_fresh_lease_row() {
    let harness = harness();
    harness.tasks.create(json!({"n": 2})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    let first_lease_id = claimed.lease_id.unwrap();

    harness.tasks.force_heartbeat_lapse(claimed.id).await;
    harness.lease_repository.force_expire("task:1").await;

    let reclaimed = harness.tasks.claim_next("w-B", TTL).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.processor.as_deref(), Some("w-B"));
    assert_ne!(reclaimed.lease_id.unwrap(), first_lease_id);

    let all = harness
        .lease_repository
        .list(LeaseStateFilter::All)
        .await
        .unwrap();
    assert_eq!(all.len(), 2, "the expired lease row stays as history");
}

#[tokio::test]
async fn heartbeat_after_the_deadline_conflicts_and_frees_the_task() {
    let harness = harness();
    harness.tasks.create(json!({"n": 3})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    harness.tasks.force_heartbeat_lapse(claimed.id).await;
    harness.lease_repository.force_expire("task:1").await;

    let late_heartbeat = harness.tasks.heartbeat(claimed.id, "w-A", TTL).await;
    assert!(matches!(late_heartbeat, Err(AppError::Conflict(_))));

    let reclaimed = harness.tasks.claim_next("w-B", TTL).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.processor.as_deref(), Some("w-B"));
}

#[tokio::test]
async fn completion_after_expiry_is_rejected() {
    let harness = harness();
    harness.tasks.create(json!({"n": 4})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    harness.tasks.force_heartbeat_lapse(claimed.id).await;

    let late_completion = harness
        .tasks
        .complete(claimed.id, "w-A", json!({"squared": 16}))
        .await;
    assert!(matches!(late_completion, Err(AppError::Conflict(_))));

    let task = harness.tasks.find(claimed.id).await.unwrap().unwrap();
    assert!(task.processed_at.is_none());
    assert!(task.task_output.is_none());
}

#[tokio::test]
async fn completing_twice_conflicts() {
    let harness = harness();
    harness.tasks.create(json!({"n": 5})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    harness
        .tasks
        .complete(claimed.id, "w-A", json!({"squared": 25}))
        .await
        .unwrap();

    let second = harness
        .tasks
        .complete(claimed.id, "w-A", json!({"squared": 25}))
        .await;
    assert!(matches!(second, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn a_foreign_processor_cannot_heartbeat_or_complete() {
    let harness = harness();
    harness.tasks.create(json!({"n": 6})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();

    let foreign_heartbeat = harness.tasks.heartbeat(claimed.id, "w-B", TTL).await;
    assert!(matches!(foreign_heartbeat, Err(AppError::Conflict(_))));

    let foreign_completion = harness
        .tasks
        .complete(claimed.id, "w-B", json!({"squared": 36}))
        .await;
    assert!(matches!(foreign_completion, Err(AppError::Conflict(_))));
}

#[tokio::test]
async fn a_held_lease_blocks_the_claim_and_leaves_the_task_unclaimed() {
    let harness = harness();
    harness.tasks.create(json!({"n": 8})).await.unwrap();

    let coordinator: Arc<dyn LeaseCoordinator> = Arc::new(harness.lease_service.clone());
    coordinator.acquire("task:1", "sweeper").await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await;
    assert!(matches!(claimed, Err(AppError::Conflict(_))));

    let task = harness.tasks.find(1).await.unwrap().unwrap();
    assert!(task.started_at.is_none());
    assert!(task.processor.is_none());
}

#[tokio::test]
async fn abandon_frees_the_task_for_the_next_claim() {
    let harness = harness();
    harness.tasks.create(json!({"n": 9})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();
    let abandoned = harness.tasks.abandon(claimed.id, "w-A").await.unwrap();

    assert!(abandoned.processor.is_none());
    assert!(abandoned.started_at.is_some(), "kept for diagnostics");
    assert!(abandoned.lease_id.is_none());

    let released = harness
        .lease_repository
        .list(LeaseStateFilter::Released)
        .await
        .unwrap();
    assert_eq!(released.len(), 1);

    let reclaimed = harness.tasks.claim_next("w-B", TTL).await.unwrap().unwrap();
    assert_eq!(reclaimed.id, claimed.id);
    assert_eq!(reclaimed.processor.as_deref(), Some("w-B"));
}

#[tokio::test]
async fn started_and_processed_listings_track_the_lifecycle() {
    let harness = harness();
    harness.tasks.create(json!({"n": 1})).await.unwrap();
    harness.tasks.create(json!({"n": 2})).await.unwrap();

    let claimed = harness.tasks.claim_next("w-A", TTL).await.unwrap().unwrap();

    let started = harness.tasks.list(TaskListFilter::Started).await.unwrap();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].id, claimed.id);

    harness
        .tasks
        .complete(claimed.id, "w-A", json!({"squared": 1}))
        .await
        .unwrap();

    let started = harness.tasks.list(TaskListFilter::Started).await.unwrap();
    let processed = harness.tasks.list(TaskListFilter::Processed).await.unwrap();
    assert!(started.is_empty());
    assert_eq!(processed.len(), 1);
}
