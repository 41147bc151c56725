use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use lariat_core::AppError;
use lariat_domain::{Task, TaskListFilter};
use lariat_http::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub task_data: Value,
}

#[derive(Debug, Deserialize)]
pub struct ClaimTaskRequest {
    pub processor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatTaskRequest {
    pub processor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub processor: Option<String>,
    pub output: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct AbandonTaskRequest {
    pub processor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TaskResponse {
    pub id: i64,
    pub task_data: Value,
    pub task_output: Option<Value>,
    pub state: &'static str,
    pub scheduled_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub must_heartbeat_before: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub processor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub must_heartbeat_before: DateTime<Utc>,
}

pub async fn create_task_handler(
    State(state): State<AppState>,
    Json(payload): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    let task = state.task_service.create_task(payload.task_data).await?;
    Ok((StatusCode::CREATED, Json(task_response(task))))
}

pub async fn claim_next_handler(
    State(state): State<AppState>,
    Json(payload): Json<ClaimTaskRequest>,
) -> ApiResult<Response> {
    let processor = require_processor(payload.processor)?;

    match state.task_service.claim_next(processor.as_str()).await? {
        Some(task) => Ok((StatusCode::ACCEPTED, Json(task_response(task))).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn heartbeat_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(payload): Json<HeartbeatTaskRequest>,
) -> ApiResult<(StatusCode, Json<HeartbeatResponse>)> {
    let processor = require_processor(payload.processor)?;

    let task = state
        .task_service
        .heartbeat(task_id, processor.as_str())
        .await?;
    let must_heartbeat_before = task.must_heartbeat_before.ok_or_else(|| {
        AppError::Internal(format!("heartbeat on task '{task_id}' left no deadline"))
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(HeartbeatResponse {
            must_heartbeat_before,
        }),
    ))
}

pub async fn complete_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(payload): Json<CompleteTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    let processor = require_processor(payload.processor)?;
    let output = payload.output.unwrap_or(Value::Null);

    let task = state
        .task_service
        .complete(task_id, processor.as_str(), output)
        .await?;

    Ok((StatusCode::ACCEPTED, Json(task_response(task))))
}

pub async fn abandon_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
    Json(payload): Json<AbandonTaskRequest>,
) -> ApiResult<(StatusCode, Json<TaskResponse>)> {
    let processor = require_processor(payload.processor)?;

    let task = state
        .task_service
        .abandon(task_id, processor.as_str())
        .await?;

    Ok((StatusCode::ACCEPTED, Json(task_response(task))))
}

pub async fn get_task_handler(
    State(state): State<AppState>,
    Path(task_id): Path<i64>,
) -> ApiResult<Json<TaskResponse>> {
    let task = state.task_service.get_task(task_id).await?;
    Ok(Json(task_response(task)))
}

pub async fn list_tasks_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TaskResponse>>> {
    list_with_filter(&state, TaskListFilter::All).await
}

pub async fn list_started_tasks_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TaskResponse>>> {
    list_with_filter(&state, TaskListFilter::Started).await
}

pub async fn list_processed_tasks_handler(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<TaskResponse>>> {
    list_with_filter(&state, TaskListFilter::Processed).await
}

async fn list_with_filter(
    state: &AppState,
    filter: TaskListFilter,
) -> ApiResult<Json<Vec<TaskResponse>>> {
    let tasks = state.task_service.list_tasks(filter).await?;
    Ok(Json(tasks.into_iter().map(task_response).collect()))
}

fn require_processor(processor: Option<String>) -> Result<String, ApiError> {
    processor
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::Validation("processor is required".to_owned()).into())
}

fn task_response(task: Task) -> TaskResponse {
    let state = task.state(Utc::now()).as_str();
    TaskResponse {
        id: task.id,
        task_data: task.task_data,
        task_output: task.task_output,
        state,
        scheduled_at: task.scheduled_at,
        started_at: task.started_at,
        last_heartbeat_at: task.last_heartbeat_at,
        must_heartbeat_before: task.must_heartbeat_before,
        processed_at: task.processed_at,
        processor: task.processor,
    }
}
