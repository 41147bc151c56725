//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod lease;
mod task;

pub use lease::{Lease, LeaseState, LeaseStateFilter};
pub use task::{Task, TaskListFilter, TaskState};
