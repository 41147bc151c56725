use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use lariat_domain::{Lease, LeaseStateFilter};
use lariat_http::ApiResult;
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AcquireLeaseRequest {
    pub resource: String,
    pub holder: String,
}

#[derive(Debug, Deserialize)]
pub struct RenewLeaseRequest {
    pub resource: String,
    pub holder: String,
}

#[derive(Debug, Deserialize)]
pub struct ListLeasesQuery {
    pub state: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LeaseResponse {
    pub id: i64,
    pub resource: String,
    pub holder: String,
    pub state: &'static str,
    pub created_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct RenewedLeaseResponse {
    pub id: i64,
    pub expires_at: DateTime<Utc>,
    pub renewed_at: Option<DateTime<Utc>>,
}

pub async fn acquire_lease_handler(
    State(state): State<AppState>,
    Json(payload): Json<AcquireLeaseRequest>,
) -> ApiResult<(StatusCode, Json<LeaseResponse>)> {
    let lease = state
        .lease_service
        .acquire(payload.resource.as_str(), payload.holder.as_str())
        .await?;

    Ok((StatusCode::CREATED, Json(lease_response(lease))))
}

pub async fn renew_lease_handler(
    State(state): State<AppState>,
    Json(payload): Json<RenewLeaseRequest>,
) -> ApiResult<(StatusCode, Json<RenewedLeaseResponse>)> {
    let lease = state
        .lease_service
        .renew(payload.resource.as_str(), payload.holder.as_str())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RenewedLeaseResponse {
            id: lease.id,
            expires_at: lease.expires_at,
            renewed_at: lease.renewed_at,
        }),
    ))
}

pub async fn release_lease_handler(
    State(state): State<AppState>,
    Path(lease_id): Path<i64>,
) -> ApiResult<Json<LeaseResponse>> {
    let lease = state.lease_service.release(lease_id).await?;
    Ok(Json(lease_response(lease)))
}

pub async fn list_leases_handler(
    State(state): State<AppState>,
    Query(query): Query<ListLeasesQuery>,
) -> ApiResult<Json<Vec<LeaseResponse>>> {
    let filter = match query.state.as_deref() {
        None => LeaseStateFilter::All,
        Some(value) => LeaseStateFilter::parse(value)?,
    };

    let leases = state.lease_service.list_by_state(filter).await?;
    Ok(Json(leases.into_iter().map(lease_response).collect()))
}

fn lease_response(lease: Lease) -> LeaseResponse {
    let state = lease.state(Utc::now()).as_str();
    LeaseResponse {
        id: lease.id,
        resource: lease.resource,
        holder: lease.holder,
        state,
        created_at: lease.created_at,
        renewed_at: lease.renewed_at,
        released_at: lease.released_at,
        expires_at: lease.expires_at,
    }
}
