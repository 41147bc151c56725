use lariat_application::LeaseService;

/// Shared state for Lease Manager handlers.
#[derive(Clone)]
pub struct AppState {
    pub lease_service: LeaseService,
}
