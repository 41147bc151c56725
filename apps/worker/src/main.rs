//! Lariat polling worker runtime.

#![forbid(unsafe_code)]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lariat_application::{AutoRenewer, RenewalTarget};
use lariat_core::{AppError, AppResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
struct WorkerConfig {
    task_service_url: String,
    worker_id: String,
    heartbeat_interval: Duration,
    poll_interval: Duration,
    request_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct ClaimTaskRequest<'a> {
    processor: &'a str,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    processor: &'a str,
}

#[derive(Debug, Serialize)]
struct CompleteRequest<'a> {
    processor: &'a str,
    output: Value,
}

#[derive(Debug, Serialize)]
struct AbandonRequest<'a> {
    processor: &'a str,
}

#[derive(Debug, Deserialize)]
struct ClaimedTaskResponse {
    id: i64,
    task_data: Value,
    must_heartbeat_before: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HeartbeatResponse {
    must_heartbeat_before: DateTime<Utc>,
}

#[derive(Clone)]
struct DispatcherClient {
    http_client: reqwest::Client,
    base_url: String,
    worker_id: String,
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let client = DispatcherClient::new(&config)?;

    info!(
        worker_id = %config.worker_id,
        task_service_url = %config.task_service_url,
        heartbeat_interval_secs = config.heartbeat_interval.as_secs(),
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        "lariat-worker started"
    );

    loop {
        match client.claim_next().await {
            Ok(Some(task)) => {
                process_task(&client, &config, task).await;
            }
            Ok(None) => {
                tokio::time::sleep(config.poll_interval).await;
            }
            Err(error) => {
                warn!(worker_id = %config.worker_id, error = %error, "failed to claim a task");
                tokio::time::sleep(config.poll_interval).await;
            }
        }
    }
}

async fn process_task(client: &DispatcherClient, config: &WorkerConfig, task: ClaimedTaskResponse) {
    let task_id = task.id;
    info!(task_id, deadline = %task.must_heartbeat_before, "claimed task");

    let heartbeat_target = Arc::new(TaskHeartbeat {
        client: client.clone(),
        task_id,
    });
    let renewer = AutoRenewer::spawn(heartbeat_target, config.heartbeat_interval);

    // The workload runs in its own task so a panic surfaces as a join error
    // instead of taking the worker down with the claim still held.
    let workload = tokio::spawn(run_workload(task.task_data));
    let outcome = match workload.await {
        Ok(result) => result,
        Err(error) => Err(AppError::Internal(format!("task workload panicked: {error}"))),
    };

    let lost = renewer.is_lost();
    renewer.stop().await;

    if lost {
        warn!(task_id, "claim was lost while processing; dropping task");
        return;
    }

    match outcome {
        Ok(output) => match client.complete(task_id, output).await {
            Ok(()) => info!(task_id, "task completed"),
            Err(error) if error.is_conflict() => {
                warn!(task_id, error = %error, "claim lost before completion was recorded");
            }
            Err(error) => {
                warn!(task_id, error = %error, "failed to report task completion");
            }
        },
        Err(error) => {
            warn!(task_id, error = %error, "task workload failed; abandoning");
            if let Err(abandon_error) = client.abandon(task_id).await {
                warn!(task_id, error = %abandon_error, "failed to abandon task");
            }
        }
    }
}

async fn run_workload(task_data: Value) -> AppResult<Value> {
    let n = task_data
        .get("n")
        .and_then(Value::as_i64)
        .ok_or_else(|| AppError::Validation("task_data requires integer field 'n'".to_owned()))?;

    Ok(json!({ "squared": n * n }))
}

struct TaskHeartbeat {
    client: DispatcherClient,
    task_id: i64,
}

#[async_trait]
impl RenewalTarget for TaskHeartbeat {
    async fn renew(&self) -> AppResult<DateTime<Utc>> {
        self.client.heartbeat(self.task_id).await
    }
}

impl DispatcherClient {
    fn new(config: &WorkerConfig) -> AppResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;

        Ok(Self {
            http_client,
            base_url: config.task_service_url.clone(),
            worker_id: config.worker_id.clone(),
        })
    }

    async fn claim_next(&self) -> AppResult<Option<ClaimedTaskResponse>> {
        let response = self
            .http_client
            .post(format!("{}/tasks/next", self.base_url))
            .json(&ClaimTaskRequest {
                processor: self.worker_id.as_str(),
            })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call task claim endpoint: {error}"))
            })?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            StatusCode::ACCEPTED => {
                let task = response.json::<ClaimedTaskResponse>().await.map_err(|error| {
                    AppError::Internal(format!("failed to parse claimed task body: {error}"))
                })?;
                Ok(Some(task))
            }
            status => Err(Self::error_from_response(status, response, "task claim").await),
        }
    }

    async fn heartbeat(&self, task_id: i64) -> AppResult<DateTime<Utc>> {
        let response = self
            .http_client
            .put(format!("{}/tasks/{task_id}/heartbeat", self.base_url))
            .json(&HeartbeatRequest {
                processor: self.worker_id.as_str(),
            })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call heartbeat endpoint: {error}"))
            })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            let body = response.json::<HeartbeatResponse>().await.map_err(|error| {
                AppError::Internal(format!("failed to parse heartbeat body: {error}"))
            })?;
            return Ok(body.must_heartbeat_before);
        }

        Err(Self::error_from_response(status, response, "task heartbeat").await)
    }

    async fn complete(&self, task_id: i64, output: Value) -> AppResult<()> {
        let response = self
            .http_client
            .put(format!("{}/tasks/{task_id}/complete", self.base_url))
            .json(&CompleteRequest {
                processor: self.worker_id.as_str(),
                output,
            })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call completion endpoint: {error}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(Self::error_from_response(status, response, "task completion").await)
    }

    async fn abandon(&self, task_id: i64) -> AppResult<()> {
        let response = self
            .http_client
            .put(format!("{}/tasks/{task_id}/abandon", self.base_url))
            .json(&AbandonRequest {
                processor: self.worker_id.as_str(),
            })
            .send()
            .await
            .map_err(|error| {
                AppError::Internal(format!("failed to call abandon endpoint: {error}"))
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        Err(Self::error_from_response(status, response, "task abandon").await)
    }

    async fn error_from_response(
        status: StatusCode,
        response: reqwest::Response,
        context: &str,
    ) -> AppError {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<body unavailable>".to_owned());

        match status {
            StatusCode::CONFLICT => AppError::Conflict(format!("{context} rejected: {body}")),
            StatusCode::NOT_FOUND => AppError::NotFound(format!("{context} rejected: {body}")),
            _ => AppError::Internal(format!(
                "{context} endpoint returned status {}: {body}",
                status.as_u16()
            )),
        }
    }
}

impl WorkerConfig {
    fn load() -> AppResult<Self> {
        let task_service_url = env::var("TASK_SERVICE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8081".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let worker_id = env::var("WORKER_ID")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| format!("worker-{}", std::process::id()));
        let heartbeat_interval_seconds = parse_env_u64("HEARTBEAT_INTERVAL_SECONDS", 15)?;
        let lease_ttl_seconds = parse_env_u64("LEASE_TTL_SECONDS", 30)?;
        let poll_interval_ms = parse_env_u64("POLL_INTERVAL_MS", 1500)?;

        if heartbeat_interval_seconds == 0 {
            return Err(AppError::Validation(
                "HEARTBEAT_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        if poll_interval_ms == 0 {
            return Err(AppError::Validation(
                "POLL_INTERVAL_MS must be greater than zero".to_owned(),
            ));
        }

        if heartbeat_interval_seconds * 2 > lease_ttl_seconds {
            return Err(AppError::Validation(format!(
                "HEARTBEAT_INTERVAL_SECONDS ({heartbeat_interval_seconds}) must be at most half \
                 of LEASE_TTL_SECONDS ({lease_ttl_seconds})"
            )));
        }

        Ok(Self {
            task_service_url,
            worker_id,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_seconds),
            poll_interval: Duration::from_millis(poll_interval_ms),
            request_timeout: Duration::from_secs((lease_ttl_seconds / 3).max(1)),
        })
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    match env::var(name) {
        Ok(value) => value.parse::<u64>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}
