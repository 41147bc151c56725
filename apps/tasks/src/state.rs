use lariat_application::TaskService;

/// Shared state for Task Dispatcher handlers.
#[derive(Clone)]
pub struct AppState {
    pub task_service: TaskService,
}
