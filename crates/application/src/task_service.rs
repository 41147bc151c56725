use std::sync::Arc;

use lariat_core::{AppError, AppResult};
use lariat_domain::{Task, TaskListFilter};
use serde_json::Value;

use crate::task_ports::TaskRepository;

/// Task Dispatcher service.
///
/// Validates caller input and delegates the row-locked claim transitions to
/// the repository. Lease conflicts surface unchanged: the Lease Manager is
/// the sole authority on contention.
#[derive(Clone)]
pub struct TaskService {
    repository: Arc<dyn TaskRepository>,
    lease_ttl_seconds: u32,
}

impl TaskService {
    /// Creates a task service over the task repository.
    pub fn new(repository: Arc<dyn TaskRepository>, lease_ttl_seconds: u32) -> AppResult<Self> {
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

    /// Enqueues one task with an opaque payload.
    pub async fn create_task(&self, task_data: Value) -> AppResult<Task> {
        self.repository.create(task_data).await
    }

    /// Claims the next unprocessed or abandoned task for `processor`.
    pub async fn claim_next(&self, processor: &str) -> AppResult<Option<Task>> {
        require_processor(processor)?;

        self.repository
            .claim_next(processor, self.lease_ttl_seconds)
            .await
    }

    /// Renews the claim deadline for one owned task.
    pub async fn heartbeat(&self, task_id: i64, processor: &str) -> AppResult<Task> {
        require_processor(processor)?;

        self.repository
            .heartbeat(task_id, processor, self.lease_ttl_seconds)
            .await
    }

    /// Completes one owned task with its output. A lapsed claim is a
    /// conflict: output from a worker that cannot prove ownership is refused.
    pub async fn complete(&self, task_id: i64, processor: &str, output: Value) -> AppResult<Task> {
        require_processor(processor)?;

        self.repository.complete(task_id, processor, output).await
    }

    /// Returns one owned task to the reclaimable pool.
    pub async fn abandon(&self, task_id: i64, processor: &str) -> AppResult<Task> {
        require_processor(processor)?;

        self.repository.abandon(task_id, processor).await
    }

    /// Returns one task by identifier.
    pub async fn get_task(&self, task_id: i64) -> AppResult<Task> {
        self.repository
            .find(task_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("task '{task_id}' does not exist")))
    }

    /// Lists tasks matching one lifecycle filter.
    pub async fn list_tasks(&self, filter: TaskListFilter) -> AppResult<Vec<Task>> {
        self.repository.list(filter).await
    }
}

fn require_processor(processor: &str) -> AppResult<()> {
    if processor.trim().is_empty() {
        return Err(AppError::Validation(
            "processor must not be empty".to_owned(),
        ));
    }

    Ok(())
}
