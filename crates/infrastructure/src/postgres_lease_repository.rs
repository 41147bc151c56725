use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_application::LeaseRepository;
use lariat_core::{AppError, AppResult};
use lariat_domain::{Lease, LeaseStateFilter};
use sqlx::{FromRow, PgPool};

/// PostgreSQL-backed authoritative lease store.
///
/// Uniqueness of the active lease per resource cannot be a schema constraint
/// (no partial-unique support is assumed), so every acquire and renew locks
/// the resource's rows with `FOR UPDATE` before checking and writing. All
/// expiry arithmetic runs on the database clock.
#[derive(Clone)]
pub struct PostgresLeaseRepository {
    pool: PgPool,
}

impl PostgresLeaseRepository {
    /// Creates a lease repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct LeaseRow {
    id: i64,
    resource: String,
    holder: String,
    created_at: DateTime<Utc>,
    renewed_at: Option<DateTime<Utc>>,
    released_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct LockedLeaseRow {
    id: i64,
    holder: String,
    released_at: Option<DateTime<Utc>>,
    is_active: bool,
}

#[async_trait]
impl LeaseRepository for PostgresLeaseRepository {
    async fn acquire(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease> {
        let ttl_seconds = signed_ttl(ttl_seconds)?;

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start lease acquire transaction: {error}"))
        })?;

        let locked = lock_resource_rows(&mut transaction, resource).await?;
        if let Some(active) = locked.iter().find(|row| row.is_active) {
            return Err(AppError::Conflict(format!(
                "resource '{resource}' is already leased by holder '{}'",
                active.holder
            )));
        }

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            INSERT INTO leases (resource, holder, created_at, expires_at)
            VALUES ($1, $2, now(), now() + make_interval(secs => $3::INT))
            RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at
            "#,
        )
        .bind(resource)
        .bind(holder)
        .bind(ttl_seconds)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to insert lease for resource '{resource}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!(
                "failed to commit lease acquire transaction: {error}"
            ))
        })?;

        Ok(lease_from_row(row))
    }

    async fn renew(&self, resource: &str, holder: &str, ttl_seconds: u32) -> AppResult<Lease> {
        let ttl_seconds = signed_ttl(ttl_seconds)?;

        let mut transaction = self.pool.begin().await.map_err(|error| {
            AppError::Internal(format!("failed to start lease renew transaction: {error}"))
        })?;

        let locked = lock_resource_rows(&mut transaction, resource).await?;
        let active = locked.iter().find(|row| row.is_active);

        let lease_id = match active {
            Some(row) if row.holder == holder => row.id,
            Some(row) => {
                return Err(AppError::Conflict(format!(
                    "resource '{resource}' is leased by holder '{}'",
                    row.holder
                )));
            }
            None => {
                let lapsed = locked
                    .iter()
                    .any(|row| row.holder == holder && row.released_at.is_none());
                if lapsed {
                    return Err(AppError::Conflict(format!(
                        "lease on '{resource}' held by '{holder}' has expired"
                    )));
                }
                return Err(AppError::NotFound(format!(
                    "no lease held by '{holder}' exists for resource '{resource}'"
                )));
            }
        };

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            UPDATE leases
            SET renewed_at = now(),
                expires_at = now() + make_interval(secs => $2::INT)
            WHERE id = $1
            RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at
            "#,
        )
        .bind(lease_id)
        .bind(ttl_seconds)
        .fetch_one(&mut *transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to renew lease '{lease_id}' for resource '{resource}': {error}"
            ))
        })?;

        transaction.commit().await.map_err(|error| {
            AppError::Internal(format!("failed to commit lease renew transaction: {error}"))
        })?;

        Ok(lease_from_row(row))
    }

    async fn release(&self, lease_id: i64) -> AppResult<Lease> {
        // COALESCE keeps the first release timestamp, making repeats no-ops.
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            UPDATE leases
            SET released_at = COALESCE(released_at, now())
            WHERE id = $1
            RETURNING id, resource, holder, created_at, renewed_at, released_at, expires_at
            "#,
        )
        .bind(lease_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Internal(format!("failed to release lease '{lease_id}': {error}"))
        })?;

        row.map(lease_from_row)
            .ok_or_else(|| AppError::NotFound(format!("lease '{lease_id}' does not exist")))
    }

    async fn list(&self, filter: LeaseStateFilter) -> AppResult<Vec<Lease>> {
        let predicate = match filter {
            LeaseStateFilter::All => "TRUE",
            LeaseStateFilter::Active => "released_at IS NULL AND expires_at > now()",
            LeaseStateFilter::Expired => "released_at IS NULL AND expires_at <= now()",
            LeaseStateFilter::Released => "released_at IS NOT NULL",
            LeaseStateFilter::Renewed => {
                "released_at IS NULL AND expires_at > now() AND renewed_at IS NOT NULL"
            }
        };

        let query = format!(
            "SELECT id, resource, holder, created_at, renewed_at, released_at, expires_at \
             FROM leases WHERE {predicate} ORDER BY id ASC"
        );

        let rows = sqlx::query_as::<_, LeaseRow>(query.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|error| {
                AppError::Internal(format!(
                    "failed to list leases with state '{}': {error}",
                    filter.as_str()
                ))
            })?;

        Ok(rows.into_iter().map(lease_from_row).collect())
    }
}

async fn lock_resource_rows(
    transaction: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    resource: &str,
) -> AppResult<Vec<LockedLeaseRow>> {
    // Row locks alone cannot serialize the first acquire on a resource that
    // has no rows yet; the advisory lock covers that window.
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::BIGINT)")
        .bind(resource)
        .execute(&mut **transaction)
        .await
        .map_err(|error| {
            AppError::Internal(format!(
                "failed to take advisory lock for resource '{resource}': {error}"
            ))
        })?;

    sqlx::query_as::<_, LockedLeaseRow>(
        r#"
        SELECT
            id,
            holder,
            released_at,
            (released_at IS NULL AND expires_at > now()) AS is_active
        FROM leases
        WHERE resource = $1
        ORDER BY id ASC
        FOR UPDATE
        "#,
    )
    .bind(resource)
    .fetch_all(&mut **transaction)
    .await
    .map_err(|error| {
        AppError::Internal(format!(
            "failed to lock lease rows for resource '{resource}': {error}"
        ))
    })
}

fn signed_ttl(ttl_seconds: u32) -> AppResult<i32> {
    i32::try_from(ttl_seconds)
        .map_err(|error| AppError::Validation(format!("invalid lease ttl_seconds value: {error}")))
}

fn lease_from_row(row: LeaseRow) -> Lease {
    Lease {
        id: row.id,
        resource: row.resource,
        holder: row.holder,
        created_at: row.created_at,
        renewed_at: row.renewed_at,
        released_at: row.released_at,
        expires_at: row.expires_at,
    }
}
