//! Application services and ports.

#![forbid(unsafe_code)]

mod lease_client;
mod lease_ports;
mod lease_service;
mod renewal;
mod task_ports;
mod task_service;

pub use lease_client::LeaseClient;
pub use lease_ports::{LeaseCoordinator, LeaseGrant, LeaseRepository};
pub use lease_service::LeaseService;
pub use renewal::{AutoRenewer, RenewalTarget};
pub use task_ports::TaskRepository;
pub use task_service::TaskService;
