use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_application::{LeaseClient, LeaseCoordinator, TaskRepository};
use lariat_core::{AppError, AppResult};
use lariat_domain::{Task, TaskListFilter};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::warn;

/// PostgreSQL-backed task store coordinating claims with the lease authority.
///
/// A claim locks the candidate row, writes the tentative claim fields, then
/// acquires the fencing lease through a per-task holder handle while the
/// transaction is still open. A refused lease rolls the claim back, leaving
/// the row for the next poll.
#[derive(Clone)]
pub struct PostgresTaskRepository {
    pool: PgPool,
    lease_coordinator: Arc<dyn LeaseCoordinator>,
}

impl PostgresTaskRepository {
    /// Creates a task repository with its pool and lease coordinator.
    #[must_use]
    pub fn new(pool: PgPool, lease_coordinator: Arc<dyn LeaseCoordinator>) -> Self {
        Self {
            pool,
            lease_coordinator,
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

#[derive(Debug, FromRow)]
struct TaskRow {
    id: i64,
    task_data: Value,
    task_output: Option<Value>,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    last_heartbeat_at: Option<DateTime<Utc>>,
    must_heartbeat_before: Option<DateTime<Utc>>,
    processed_at: Option<DateTime<Utc>>,
    processor: Option<String>,
    lease_id: Option<i64>,
}

#[derive(Debug, FromRow)]
struct ClaimGuardRow {
    processor: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    lease_id: Option<i64>,
    deadline_open: bool,
}

#[async_trait]
impl TaskRepository for PostgresTaskRepository {
    async fn create(&self, task_data: Value) -> AppResult<Task> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            INSERT INTO tasks (task_data, scheduled_at)
            VALUES ($1, now())
            RETURNING id, task_data, task_output, scheduled_at, started_at,
                      last_heartbeat_at, must_heartbeat_before, processed_at,
                      processor, lease_id
            "#,
        )
        .bind(task_data)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to insert task: {error}")))?;

        Ok(task_from_row(row))
    }

    async fn claim_next(&self, processor: &str, ttl_seconds: u32) -> AppResult<Option<Task>> {
        let ttl_seconds = signed_ttl(ttl_seconds)?;

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start task claim transaction: {error}"))
        })?;

        let candidate = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, task_data, task_output, scheduled_at, started_at,
                   last_heartbeat_at, must_heartbeat_before, processed_at,
                   processor, lease_id
            FROM tasks
            WHERE processed_at IS NULL
              AND (started_at IS NULL OR must_heartbeat_before <= now())
            ORDER BY id ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to select a claimable task for processor '{processor}': {error}"
            ))
        })?;

        let Some(candidate) = candidate else {
            transaction.commit().await.map_err(|error| {
                AppError::Internal(format!("failed to commit empty claim transaction: {error}"))
            })?;
            return Ok(None);
        };

        let task_id = candidate.id;

        // Tentative claim; nothing is visible until the commit below.
        sqlx::query(
            r#"
            UPDATE tasks
            SET started_at = now(),
                last_heartbeat_at = now(),
                must_heartbeat_before = now() + make_interval(secs => $2::INT),
                processor = $3,
                lease_id = NULL
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(ttl_seconds)
        .bind(processor)
        .execute(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to write tentative claim for task '{task_id}': {error}"
            ))
        })?;

        let grant = match self.lease_client(task_id, processor).acquire().await {
            Ok(grant) => grant,
            Err(error) => {
                transaction.rollback().await.map_err(|rollback_error| {
                    AppError::Internal(format!(
                        "failed to roll back claim for task '{task_id}': {rollback_error}"
                    ))
                })?;
                return Err(error);
            }
        };

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET lease_id = $2
            WHERE id = $1
            RETURNING id, task_data, task_output, scheduled_at, started_at,
                      last_heartbeat_at, must_heartbeat_before, processed_at,
                      processor, lease_id
            "#,
        )
        .bind(task_id)
        .bind(grant.lease_id)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to record lease for task '{task_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit task claim transaction: {error}"))
        })?;

        Ok(Some(task_from_row(row)))
    }

    async fn heartbeat(&self, task_id: i64, processor: &str, ttl_seconds: u32) -> AppResult<Task> {
        let ttl_seconds = signed_ttl(ttl_seconds)?;

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start heartbeat transaction: {error}"))
        })?;

        let guard = lock_claim(&mut transaction, task_id).await?;
        verify_claim(&guard, task_id, processor)?;

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

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET last_heartbeat_at = now(),
                must_heartbeat_before = now() + make_interval(secs => $2::INT)
            WHERE id = $1
            RETURNING id, task_data, task_output, scheduled_at, started_at,
                      last_heartbeat_at, must_heartbeat_before, processed_at,
                      processor, lease_id
            "#,
        )
        .bind(task_id)
        .bind(ttl_seconds)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to advance heartbeat for task '{task_id}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit heartbeat transaction: {error}"))
        })?;

        Ok(task_from_row(row))
    }

    async fn complete(&self, task_id: i64, processor: &str, output: Value) -> AppResult<Task> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start completion transaction: {error}"))
        })?;

        let guard = lock_claim(&mut transaction, task_id).await?;
        verify_claim(&guard, task_id, processor)?;

        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET processed_at = now(),
                task_output = $2
            WHERE id = $1
            RETURNING id, task_data, task_output, scheduled_at, started_at,
                      last_heartbeat_at, must_heartbeat_before, processed_at,
                      processor, lease_id
            "#,
        )
        .bind(task_id)
        .bind(output)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to complete task '{task_id}': {error}"))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit completion transaction: {error}"))
        })?;

        // The task is terminal; a failed release only leaves an expiring row.
        self.release_claim_lease(task_id, processor, guard.lease_id)
            .await;

        Ok(task_from_row(row))
    }

    async fn abandon(&self, task_id: i64, processor: &str) -> AppResult<Task> {
        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start abandon transaction: {error}"))
        })?;

        let guard = lock_claim(&mut transaction, task_id).await?;
        if guard.processed_at.is_some() {
            return Err(AppError::Conflict(format!(
                "task '{task_id}' is already processed"
            )));
        }
        if guard.processor.as_deref() != Some(processor) {
            return Err(AppError::Conflict(format!(
                "task '{task_id}' is not claimed by processor '{processor}'"
            )));
        }

        // started_at stays for diagnostics; the past deadline makes the row
        // immediately reclaimable.
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            UPDATE tasks
            SET processor = NULL,
                must_heartbeat_before = now(),
                lease_id = NULL
            WHERE id = $1
            RETURNING id, task_data, task_output, scheduled_at, started_at,
                      last_heartbeat_at, must_heartbeat_before, processed_at,
                      processor, lease_id
            "#,
        )
        .bind(task_id)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to abandon task '{task_id}': {error}"))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit abandon transaction: {error}"))
        })?;

        self.release_claim_lease(task_id, processor, guard.lease_id)
            .await;

        Ok(task_from_row(row))
    }

    async fn find(&self, task_id: i64) -> AppResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT id, task_data, task_output, scheduled_at, started_at,
                   last_heartbeat_at, must_heartbeat_before, processed_at,
                   processor, lease_id
            FROM tasks
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to load task '{task_id}': {error}"))
        })?;

        Ok(row.map(task_from_row))
    }

    async fn list(&self, filter: TaskListFilter) -> AppResult<Vec<Task>> {
        let predicate = match filter {
            TaskListFilter::All => "TRUE",
            TaskListFilter::Started => "started_at IS NOT NULL AND processed_at IS NULL",
            TaskListFilter::Processed => "processed_at IS NOT NULL",
        };

        let query = format!(
            "SELECT id, task_data, task_output, scheduled_at, started_at, \
             last_heartbeat_at, must_heartbeat_before, processed_at, processor, lease_id \
             FROM tasks WHERE {predicate} ORDER BY id ASC"
        );

        let rows = sqlx::query_as::<_, TaskRow>(query.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to list tasks with filter '{}': {error}",
                    filter.as_str()
                ))
            })?;

        Ok(rows.into_iter().map(task_from_row).collect())
    }
}

async fn lock_claim(
    transaction: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task_id: i64,
) -> AppResult<ClaimGuardRow> {
    sqlx::query_as::<_, ClaimGuardRow>(
        r#"
        SELECT
            processor,
            processed_at,
            lease_id,
            (must_heartbeat_before IS NOT NULL AND must_heartbeat_before > now()) AS deadline_open
        FROM tasks
        WHERE id = $1
        FOR UPDATE
        "#,
    )
    .bind(task_id)
    .fetch_optional(&mut **transaction)
    .await
    .map_err(|error| AppError::Internal(format!("failed to lock task '{task_id}': {error}")))?
    .ok_or_else(|| AppError::NotFound(format!("task '{task_id}' does not exist")))
}

fn verify_claim(guard: &ClaimGuardRow, task_id: i64, processor: &str) -> AppResult<()> {
    if guard.processed_at.is_some() {
        return Err(AppError::Conflict(format!(
            "task '{task_id}' is already processed"
        )));
    }

    if guard.processor.as_deref() != Some(processor) {
        return Err(AppError::Conflict(format!(
            "task '{task_id}' is not claimed by processor '{processor}'"
        )));
    }

    if !guard.deadline_open {
        return Err(AppError::Conflict(format!(
            "heartbeat deadline for task '{task_id}' has passed"
        )));
    }

    Ok(())
}

fn signed_ttl(ttl_seconds: u32) -> AppResult<i32> {
    i32::try_from(ttl_seconds)
        .map_err(|error| AppError::Validation(format!("invalid lease ttl_seconds value: {error}")))
}

fn task_from_row(row: TaskRow) -> Task {
    Task {
        id: row.id,
        task_data: row.task_data,
        task_output: row.task_output,
        scheduled_at: row.scheduled_at,
        started_at: row.started_at,
        last_heartbeat_at: row.last_heartbeat_at,
        must_heartbeat_before: row.must_heartbeat_before,
        processed_at: row.processed_at,
        processor: row.processor,
        lease_id: row.lease_id,
    }
}
