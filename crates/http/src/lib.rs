//! Shared HTTP plumbing for Lariat services.

#![forbid(unsafe_code)]

mod env;
mod error;
mod health;

pub use env::{init_tracing, parse_env_u16, parse_env_u32, required_env, socket_address};
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use health::{HealthResponse, healthz_handler};
