use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use lariat_application::{LeaseClient, LeaseCoordinator, TaskRepository};
use lariat_core::{AppError, AppResult};
use lariat_domain::{Task, TaskListFilter};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

/// In-memory task store mirroring the row-locked claim transitions.
///
/// The state mutex is held across the lease round-trip during a claim, the
/// same serialization the Postgres repository gets from its open transaction
/// and row lock. A refused lease leaves the row untouched, which is the
/// in-memory equivalent of the rollback.
pub struct InMemoryTaskRepository {
    state: Mutex<InMemoryTaskState>,
    lease_coordinator: Arc<dyn LeaseCoordinator>,
}

#[derive(Default)]
struct InMemoryTaskState {
    rows: Vec<Task>,
    next_id: i64,
}

impl InMemoryTaskRepository {
    /// Creates an empty task store over the given lease coordinator.
    #[must_use]
    pub fn new(lease_coordinator: Arc<dyn LeaseCoordinator>) -> Self {
        Self {
            state: Mutex::new(InMemoryTaskState::default()),
            lease_coordinator,
        }
    }

    #[cfg(test)]
    pub(crate) async fn force_heartbeat_lapse(&self, task_id: i64) {
        let mut state = self.state.lock().await;
        if let Some(task) = state.rows.iter_mut().find(|task| task.id == task_id) {
            task.must_heartbeat_before = Some(Utc::now() - Duration::seconds(1));
        }
    }

    fn lease_client(&self, task_id: i64, processor: &str) -> LeaseClient {
        LeaseClient::new(
            self.lease_coordinator.clone(),
            format!("task:{task_id}"),
            processor,
        )
    }

    async fn release_claim_lease(&self, task_id: i64, processor: &str, lease_id: Option<i64>) {
        let Some(lease_id) = lease_id else {
            return;
        };

        let lease = LeaseClient::held(
            self.lease_coordinator.clone(),
            format!("task:{task_id}"),
            processor,
            lease_id,
        );
        if let Err(error) = lease.release().await {
            warn!(task_id, lease_id, error = %error, "failed to release task lease");
        }
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task_data: Value) -> AppResult<Task> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let task = Task {
            id: state.next_id,
            task_data,
            task_output: None,
            scheduled_at: Utc::now(),
            started_at: None,
            last_heartbeat_at: None,
            must_heartbeat_before: None,
            processed_at: None,
            processor: None,
            lease_id: None,
        };
        state.rows.push(task.clone());
        Ok(task)
    }

    async fn claim_next(&self, processor: &str, ttl_seconds: u32) -> AppResult<Option<Task>> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let Some(index) = state.rows.iter().position(|task| task.is_claimable(now)) else {
            return Ok(None);
        };
        let task_id = state.rows[index].id;

        let grant = self.lease_client(task_id, processor).acquire().await?;

        let task = &mut state.rows[index];
        task.started_at = Some(now);
        task.last_heartbeat_at = Some(now);
        task.must_heartbeat_before = Some(now + Duration::seconds(i64::from(ttl_seconds)));
        task.processor = Some(processor.to_owned());
        task.lease_id = Some(grant.lease_id);
        Ok(Some(task.clone()))
    }

    async fn heartbeat(&self, task_id: i64, processor: &str, ttl_seconds: u32) -> AppResult<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let index = find_task(&state, task_id)?;
        verify_claim(&state.rows[index], task_id, processor, now)?;

        self.lease_client(task_id, processor)
            .renew()
            .await
            .map_err(|error| {
                if error.is_claim_loss() {
                    AppError::Conflict(format!("lease on task '{task_id}' was lost: {error}"))
                } else {
                    error
                }
            })?;

        let task = &mut state.rows[index];
        task.last_heartbeat_at = Some(now);
        task.must_heartbeat_before = Some(now + Duration::seconds(i64::from(ttl_seconds)));
        Ok(task.clone())
    }

    async fn complete(&self, task_id: i64, processor: &str, output: Value) -> AppResult<Task> {
        let mut state = self.state.lock().await;
        let now = Utc::now();

        let index = find_task(&state, task_id)?;
        verify_claim(&state.rows[index], task_id, processor, now)?;

        let task = &mut state.rows[index];
        task.processed_at = Some(now);
        task.task_output = Some(output);
        let completed = task.clone();
        drop(state);

        self.release_claim_lease(task_id, processor, completed.lease_id)
            .await;
        Ok(completed)
    }

    async fn abandon(&self, task_id: i64, processor: &str) -> AppResult<Task> {
        let mut state = self.state.lock().await;

        let index = find_task(&state, task_id)?;
        let task = &state.rows[index];
        if task.processed_at.is_some() {
            return Err(AppError::Conflict(format!(
                "task '{task_id}' is already processed"
            )));
        }
        if !task.is_owned_by(processor) {
            return Err(AppError::Conflict(format!(
                "task '{task_id}' is not claimed by processor '{processor}'"
            )));
        }

        let task = &mut state.rows[index];
        let lease_id = task.lease_id.take();
        task.processor = None;
        task.must_heartbeat_before = Some(Utc::now());
        let abandoned = task.clone();
        drop(state);

        self.release_claim_lease(task_id, processor, lease_id).await;
        Ok(abandoned)
    }

    async fn find(&self, task_id: i64) -> AppResult<Option<Task>> {
        let state = self.state.lock().await;
        Ok(state.rows.iter().find(|task| task.id == task_id).cloned())
    }

    async fn list(&self, filter: TaskListFilter) -> AppResult<Vec<Task>> {
        let state = self.state.lock().await;
        Ok(state
            .rows
            .iter()
            .filter(|task| task.matches(filter))
            .cloned()
            .collect())
    }
}

fn find_task(state: &InMemoryTaskState, task_id: i64) -> AppResult<usize> {
    state
        .rows
        .iter()
        .position(|task| task.id == task_id)
        .ok_or_else(|| AppError::NotFound(format!("task '{task_id}' does not exist")))
}

fn verify_claim(
    task: &Task,
    task_id: i64,
    processor: &str,
    now: chrono::DateTime<Utc>,
) -> AppResult<()> {
    if task.processed_at.is_some() {
        return Err(AppError::Conflict(format!(
            "task '{task_id}' is already processed"
        )));
    }

    if !task.is_owned_by(processor) {
        return Err(AppError::Conflict(format!(
            "task '{task_id}' is not claimed by processor '{processor}'"
        )));
    }

    if !task.heartbeat_deadline_open(now) {
        return Err(AppError::Conflict(format!(
            "heartbeat deadline for task '{task_id}' has passed"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests;
