use chrono::{DateTime, Utc};
use lariat_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Derived lifecycle state of one lease row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseState {
    /// Unreleased and not yet past its expiry instant.
    Active,
    /// Unreleased but past its expiry instant.
    Expired,
    /// Terminally released by its holder.
    Released,
}

impl LeaseState {
    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
        }
    }
}

/// Lease listing filter over derived states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStateFilter {
    /// Every lease row regardless of state.
    All,
    /// Unreleased rows that have not expired.
    Active,
    /// Unreleased rows past their expiry instant.
    Expired,
    /// Terminally released rows.
    Released,
    /// Active rows that have been renewed at least once.
    Renewed,
}

impl LeaseStateFilter {
    /// Returns stable wire value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Released => "released",
            Self::Renewed => "renewed",
        }
    }

    /// Parses wire value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "all" => Ok(Self::All),
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            "released" => Ok(Self::Released),
            "renewed" => Ok(Self::Renewed),
            _ => Err(AppError::Validation(format!(
                "unknown lease state filter '{value}'"
            ))),
        }
    }
}

/// One persisted lease on a named resource.
///
/// Rows are history: re-acquiring an expired resource inserts a new row and
/// leaves the old one in place. State is derived from timestamps against the
/// server clock, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    /// Monotonically assigned lease identifier.
    pub id: i64,
    /// Resource key this lease holds exclusively while active.
    pub resource: String,
    /// Opaque identity of the acquiring party.
    pub holder: String,
    /// Acquisition timestamp.
    pub created_at: DateTime<Utc>,
    /// Latest renewal timestamp once renewed.
    pub renewed_at: Option<DateTime<Utc>>,
    /// Terminal release timestamp once released.
    pub released_at: Option<DateTime<Utc>>,
    /// Expiry instant computed on the lease authority's clock.
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Returns the derived state of this row at `now`.
    #[must_use]
    pub fn state(&self, now: DateTime<Utc>) -> LeaseState {
        if self.released_at.is_some() {
            LeaseState::Released
        } else if self.expires_at > now {
            LeaseState::Active
        } else {
            LeaseState::Expired
        }
    }

    /// Returns true when this row holds the resource at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == LeaseState::Active
    }

    /// Returns true for an active row that has been renewed at least once.
    #[must_use]
    pub fn is_renewed(&self, now: DateTime<Utc>) -> bool {
        self.is_active(now) && self.renewed_at.is_some()
    }

    /// Returns true when this row satisfies `filter` at `now`.
    #[must_use]
    pub fn matches(&self, filter: LeaseStateFilter, now: DateTime<Utc>) -> bool {
        match filter {
            LeaseStateFilter::All => true,
            LeaseStateFilter::Active => self.is_active(now),
            LeaseStateFilter::Expired => self.state(now) == LeaseState::Expired,
            LeaseStateFilter::Released => self.released_at.is_some(),
            LeaseStateFilter::Renewed => self.is_renewed(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{Lease, LeaseState, LeaseStateFilter};

    fn lease() -> Lease {
        let now = Utc::now();
        Lease {
            id: 1,
            resource: "task:1".to_owned(),
            holder: "w-A".to_owned(),
            created_at: now,
            renewed_at: None,
            released_at: None,
            expires_at: now + Duration::seconds(30),
        }
    }

    #[test]
    fn unreleased_future_expiry_is_active() {
        let lease = lease();
        assert_eq!(lease.state(Utc::now()), LeaseState::Active);
    }

    #[test]
    fn passing_the_expiry_instant_flips_to_expired() {
        let lease = lease();
        let later = lease.expires_at;
        assert_eq!(lease.state(later), LeaseState::Expired);
    }

    #[test]
    fn release_is_terminal_even_before_expiry() {
        let mut lease = lease();
        lease.released_at = Some(Utc::now());
        assert_eq!(lease.state(Utc::now()), LeaseState::Released);
        assert_eq!(lease.state(lease.expires_at), LeaseState::Released);
    }

    #[test]
    fn renewed_filter_requires_active_and_renewed() {
        let now = Utc::now();
        let mut lease = lease();
        assert!(!lease.matches(LeaseStateFilter::Renewed, now));

        lease.renewed_at = Some(now);
        assert!(lease.matches(LeaseStateFilter::Renewed, now));
        assert!(!lease.matches(LeaseStateFilter::Renewed, lease.expires_at));
    }

    #[test]
    fn filter_round_trips_wire_values() {
        for filter in [
            LeaseStateFilter::All,
            LeaseStateFilter::Active,
            LeaseStateFilter::Expired,
            LeaseStateFilter::Released,
            LeaseStateFilter::Renewed,
        ] {
            assert_eq!(LeaseStateFilter::parse(filter.as_str()).unwrap(), filter);
        }
        assert!(LeaseStateFilter::parse("held").is_err());
    }
}
