use std::env;
use std::net::SocketAddr;

use lariat_core::AppError;
use lariat_http::{parse_env_u16, parse_env_u32, required_env, socket_address};

/// Lease Manager runtime configuration.
#[derive(Debug, Clone)]
pub struct LeaseServerConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub lease_ttl_seconds: u32,
}

impl LeaseServerConfig {
    pub fn load() -> Result<Self, AppError> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_env("DATABASE_URL")?;
        let host = env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let port = parse_env_u16("PORT", 8080)?;
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
            lease_ttl_seconds,
        })
    }

    pub fn socket_address(&self) -> Result<SocketAddr, AppError> {
        socket_address(self.host.as_str(), self.port)
    }
}
