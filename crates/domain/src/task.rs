use chrono::{DateTime, Utc};
use lariat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Derived lifecycle state of one task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its first claim.
    Scheduled,
    /// Claimed by a processor whose heartbeat deadline is still open.
    Processing,
    /// Claimed but past its heartbeat deadline; eligible for reclamation.
    Abandoned,
    /// Terminally processed.
    Completed,
}

impl TaskState {
    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Processing => "processing",
            Self::Abandoned => "abandoned",
            Self::Completed => "completed",
        }
    }
}

/// Task listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskListFilter {
    /// Every task row.
    All,
    /// Claimed rows that have not been processed yet.
    Started,
    /// Terminally processed rows.
    Processed,
}

impl TaskListFilter {
    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Started => "started",
            Self::Processed => "processed",
        }
    }

    /// Parses wire value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "all" => Ok(Self::All),
            "started" => Ok(Self::Started),
            "processed" => Ok(Self::Processed),
            _ => Err(AppError::Validation(format!(
                "unknown task list filter '{value}'"
            ))),
        }
    }
}

/// One persisted unit of work with its claim lifecycle timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    /// Monotonically assigned task identifier; claims go to the lowest id.
    pub id: i64,
    /// Opaque business payload.
    pub task_data: Value,
    /// Opaque worker output once completed.
    pub task_output: Option<Value>,
    /// Enqueue timestamp.
    pub scheduled_at: DateTime<Utc>,
    /// First (or latest reclaim) claim timestamp.
    pub started_at: Option<DateTime<Utc>>,
    /// Latest heartbeat timestamp for the current claim.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Deadline after which the current claim is forfeit.
    pub must_heartbeat_before: Option<DateTime<Utc>>,
    /// Terminal completion timestamp.
    pub processed_at: Option<DateTime<Utc>>,
    /// Identity of the current claim holder.
    pub processor: Option<String>,
    /// Lease row backing the current claim.
    pub lease_id: Option<i64>,
}

impl Task {
    /// Returns the derived state of this row at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> TaskState {
        if self.processed_at.is_some() {
            TaskState::Completed
        } else if self.started_at.is_none() {
            TaskState::Scheduled
        } else if self.heartbeat_deadline_open(now) {
            TaskState::Processing
        } else {
            TaskState::Abandoned
        }
    }

    /// Returns true when the current claim's heartbeat deadline has not
    /// passed at `now`.
    #[must_use]
    pub fn heartbeat_deadline_open(&self, now: DateTime<Utc>) -> bool {
        self.must_heartbeat_before
            .is_some_and(|deadline| deadline > now)
    }

    /// Returns true when a dispatch at `now` may claim this row: never
    /// claimed, or claimed but past its heartbeat deadline.
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.processed_at.is_none()
            && (self.started_at.is_none() || !self.heartbeat_deadline_open(now))
    }

    /// Returns true when `processor` holds the current claim.
    #[must_use]
    pub fn is_owned_by(&self, processor: &str) -> bool {
        self.processor.as_deref() == Some(processor)
    }

    /// Returns the lease resource key fencing this task.
    #[must_use]
    pub fn lease_resource(&self) -> String {
        format!("task:{}", self.id)
    }

    /// Returns true when this row satisfies `filter`.
    #[must_use]
    pub fn matches(&self, filter: TaskListFilter) -> bool {
        match filter {
            TaskListFilter::All => true,
            TaskListFilter::Started => self.started_at.is_some() && self.processed_at.is_none(),
            TaskListFilter::Processed => self.processed_at.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::json;

    use super::{Task, TaskListFilter, TaskState};

    fn scheduled_task() -> Task {
        Task {
            id: 1,
            task_data: json!({"n": 42}),
            task_output: None,
            scheduled_at: Utc::now(),
            started_at: None,
            last_heartbeat_at: None,
            must_heartbeat_before: None,
            processed_at: None,
            processor: None,
            lease_id: None,
        }
    }

    fn claimed_task() -> Task {
        let now = Utc::now();
        let mut task = scheduled_task();
        task.started_at = Some(now);
        task.last_heartbeat_at = Some(now);
        task.must_heartbeat_before = Some(now + Duration::seconds(30));
        task.processor = Some("w-A".to_owned());
        task.lease_id = Some(7);
        task
    }

    #[test]
    fn unclaimed_task_is_scheduled_and_claimable() {
        let task = scheduled_task();
        let now = Utc::now();
        assert_eq!(task.state(now), TaskState::Scheduled);
        assert!(task.is_claimable(now));
    }

    #[test]
    fn claimed_task_is_processing_until_its_deadline() {
        let task = claimed_task();
        let now = Utc::now();
        assert_eq!(task.state(now), TaskState::Processing);
        assert!(!task.is_claimable(now));

        let past_deadline = task.must_heartbeat_before.unwrap();
        assert_eq!(task.state(past_deadline), TaskState::Abandoned);
        assert!(task.is_claimable(past_deadline));
    }

    #[test]
    fn completed_task_is_terminal() {
        let mut task = claimed_task();
        task.processed_at = Some(Utc::now());
        task.task_output = Some(json!({"squared": 1764}));

        let past_deadline = task.must_heartbeat_before.unwrap();
        assert_eq!(task.state(past_deadline), TaskState::Completed);
        assert!(!task.is_claimable(past_deadline));
    }

    #[test]
    fn ownership_matches_the_claiming_processor() {
        let task = claimed_task();
        assert!(task.is_owned_by("w-A"));
        assert!(!task.is_owned_by("w-B"));
        assert!(!scheduled_task().is_owned_by("w-A"));
    }

    #[test]
    fn lease_resource_is_derived_from_the_task_id() {
        assert_eq!(scheduled_task().lease_resource(), "task:1");
    }

    #[test]
    fn filter_round_trips_wire_values() {
        for filter in [
            TaskListFilter::All,
            TaskListFilter::Started,
            TaskListFilter::Processed,
        ] {
            assert_eq!(TaskListFilter::parse(filter.as_str()).unwrap(), filter);
        }
        assert!(TaskListFilter::parse("running").is_err());
    }

    #[test]
    fn started_filter_excludes_scheduled_and_processed_rows() {
        let mut completed = claimed_task();
        completed.processed_at = Some(Utc::now());

        assert!(!scheduled_task().matches(TaskListFilter::Started));
        assert!(claimed_task().matches(TaskListFilter::Started));
        assert!(!completed.matches(TaskListFilter::Started));
        assert!(completed.matches(TaskListFilter::Processed));
    }
}
