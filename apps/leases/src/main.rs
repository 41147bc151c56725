//! Lariat Lease Manager composition root.

#![forbid(unsafe_code)]

mod config;
mod handlers;
mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use lariat_application::LeaseService;
use lariat_core::AppError;
use lariat_infrastructure::PostgresLeaseRepository;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::LeaseServerConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    lariat_http::init_tracing();

    let config = LeaseServerConfig::load()?;

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

    let lease_repository = Arc::new(PostgresLeaseRepository::new(pool));
    let app_state = AppState {
        lease_service: LeaseService::new(lease_repository, config.lease_ttl_seconds)?,
    };

    let app = Router::new()
        .route(
            "/leases",
            post(handlers::acquire_lease_handler).get(handlers::list_leases_handler),
        )
        .route("/leases/renew", put(handlers::renew_lease_handler))
        .route("/leases/{lease_id}", delete(handlers::release_lease_handler))
        .route("/healthz", get(lariat_http::healthz_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let address = config.socket_address()?;
    let listener = tokio::net::TcpListener::bind(address)
        .await
        .map_err(|error| AppError::Internal(format!("failed to bind listener: {error}")))?;

    info!(
        %address,
        lease_ttl_seconds = config.lease_ttl_seconds,
        "lariat-leases listening"
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| AppError::Internal(format!("lease server error: {error}")))
}
