use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use lariat_core::AppError;
use lariat_http::{parse_env_u16, parse_env_u32, required_env, socket_address};

/// Task Dispatcher runtime configuration.
#[derive(Debug, Clone)]
pub struct TaskServerConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub service_leases_url: String,
    pub lease_ttl_seconds: u32,
}

impl TaskServerConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_env("DATABASE_URL")?;
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let port = parse_env_u16("PORT", 8081)?;
        let service_leases_url = env::var("SERVICE_LEASES_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_owned())
            .trim_end_matches('/')
            .to_owned();
        let lease_ttl_seconds = parse_env_u32("LEASE_TTL_SECONDS", 30)?;

        if lease_ttl_seconds == 0 {
            return Err(AppError::Validation(
                "LEASE_TTL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            migrate_only,
            database_url,
            host,
            port,
            service_leases_url,
            lease_ttl_seconds,
        })
    }

    /// Deadline for calls to the Lease Manager, kept strictly below half the
    /// TTL so a stuck call cannot outlive the lease it is renewing.
    #[must_use]
    pub fn lease_request_timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.lease_ttl_seconds / 3).max(1))
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        socket_address(self.host.as_str(), self.port)
    }
}
