//! Lariat Task Dispatcher composition root.

#![forbid(unsafe_code)]

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use lariat_application::TaskService;
use lariat_core::AppError;
use lariat_infrastructure::{HttpLeaseCoordinator, PostgresTaskRepository};
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::TaskServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    lariat_http::init_tracing();

    let config = TaskServerConfig::load()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(config.database_url.as_str())
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    if config.migrate_only {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let lease_coordinator = Arc::new(HttpLeaseCoordinator::new(
        config.service_leases_url.as_str(),
        config.lease_request_timeout(),
    )?);
    let task_repository = Arc::new(PostgresTaskRepository::new(pool, lease_coordinator));
    let app_state = AppState {
        task_service: TaskService::new(task_repository, config.lease_ttl_seconds)?,
    };

    let app = Router::new()
        .route(
            "/tasks",
            post(handlers::create_task_handler).get(handlers::list_tasks_handler),
        )
        .route("/tasks/next", post(handlers::claim_next_handler))
        .route("/tasks/started", get(handlers::list_started_tasks_handler))
        .route(
            "/tasks/processed",
            get(handlers::list_processed_tasks_handler),
        )
        .route("/tasks/{task_id}", get(handlers::get_task_handler))
        .route(
            "/tasks/{task_id}/heartbeat",
            put(handlers::heartbeat_task_handler),
        )
        .route(
            "/tasks/{task_id}/complete",
            put(handlers::complete_task_handler),
        )
        .route(
            "/tasks/{task_id}/abandon",
            put(handlers::abandon_task_handler),
        )
        .route("/healthz", get(lariat_http::healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(
        %address,
        service_leases_url = %config.service_leases_url,
        lease_ttl_seconds = config.lease_ttl_seconds,
        "lariat-tasks listening"
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("task server error: {error}")))
}
