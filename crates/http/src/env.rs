use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use lariat_core::AppError;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

pub fn required_env(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))
}

pub fn parse_env_u16(name: &str, default: u16) -> Result<u16, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u16>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

pub fn parse_env_u32(name: &str, default: u32) -> Result<u32, AppError> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

pub fn socket_address(host: &str, port: u16) -> Result<SocketAddr, AppError> {
    let host = IpAddr::from_str(host)
        .map_err(|error| AppError::Internal(format!("invalid HOST '{host}': {error}")))?;
    Ok(SocketAddr::from((host, port)))
}

#[cfg(test)]
mod tests {
    use super::socket_address;

    #[test]
    fn socket_address_parses_host_and_port() {
        let address = socket_address("127.0.0.1", 8080).unwrap();
        assert_eq!(address.to_string(), "127.0.0.1:8080");

        assert!(socket_address("not-a-host", 8080).is_err());
    }
}
