//! The timer record as persisted by the store.
//!
//! Progress is deliberately absent: it is derived at read time by
//! [`crate::progress::compute_view`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{TimerId, UserId};

/// One tracked task, owned by exactly one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Timer {
    pub id: TimerId,
    pub owner_id: UserId,
    pub description: String,
    /// `true` from creation until the single stop transition.
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    /// Captured by [`Timer::stop`]; `None` while the timer runs.
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Nominal length in milliseconds. `None` or `Some(0)` means open-ended.
    pub duration: Option<u64>,
}

impl Timer {
    pub fn new(
        owner_id: UserId,
        description: impl Into<String>,
        duration: Option<u64>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TimerId::new(),
            owner_id,
            description: description.into(),
            is_active: true,
            started_at: now,
            ended_at: None,
            duration,
        }
    }

    /// Mark the timer stopped at `now`.
    ///
    /// Returns `false` (and leaves the record untouched) when the timer was
    /// already stopped.
    pub fn stop(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.ended_at = Some(now);
        true
    }

    /// The clamping bound, if the timer has a positive nominal length.
    pub fn bounded_duration(&self) -> Option<u64> {
        self.duration.filter(|d| *d > 0)
    }
}
