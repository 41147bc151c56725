use async_trait::async_trait;
use lariat_core::AppResult;
use lariat_domain::{Task, TaskListFilter};
use serde_json::Value;

/// Repository port for the task store and its claim transitions.
///
/// Claim, heartbeat, complete and abandon are single row-locked transitions;
/// implementations coordinate the matching lease operation inside the same
/// transaction boundary and roll the claim back when the lease is refused.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Inserts one scheduled task.
    async fn create(&self, task_data: Value) -> AppResult<Task>;

    /// Claims the lowest-id claimable task for `processor` and fences it with
    /// a lease on `task:<id>`. Returns `None` when nothing is claimable and
    /// `Conflict` when a racing claim already holds the lease.
    async fn claim_next(&self, processor: &str, ttl_seconds: u32) -> AppResult<Option<Task>>;

    /// Advances the heartbeat deadline of one owned, unexpired claim.
    async fn heartbeat(&self, task_id: i64, processor: &str, ttl_seconds: u32) -> AppResult<Task>;

    /// Marks one owned, unexpired claim processed with its output.
    async fn complete(&self, task_id: i64, processor: &str, output: Value) -> AppResult<Task>;

    /// Returns one owned claim to the reclaimable pool.
    async fn abandon(&self, task_id: i64, processor: &str) -> AppResult<Task>;

    /// Returns one task by identifier.
    async fn find(&self, task_id: i64) -> AppResult<Option<Task>>;

    /// Lists tasks matching one lifecycle filter, oldest first.
    async fn list(&self, filter: TaskListFilter) -> AppResult<Vec<Task>>;
}
