//! Records and query helpers persisted alongside [`Timer`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use timesync_shared::timer::Timer;
use timesync_shared::types::UserId;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered account. The password is only ever stored as a PHC hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub id: UserId,
    /// Unique login name.
    pub username: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Timer queries
// ---------------------------------------------------------------------------

/// Conjunctive filter for [`crate::TimerRepository::find_all`]. Unset
/// fields match everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerFilter {
    pub owner_id: Option<UserId>,
    pub is_active: Option<bool>,
}

impl TimerFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            is_active: Some(true),
            ..Self::default()
        }
    }

    pub fn owned_by(owner_id: UserId) -> Self {
        Self {
            owner_id: Some(owner_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, timer: &Timer) -> bool {
        self.owner_id.map_or(true, |owner| timer.owner_id == owner)
            && self.is_active.map_or(true, |active| timer.is_active == active)
    }
}

/// Partial update for [`crate::TimerRepository::update_by_id`].
///
/// Only the stop transition is expressible; identity, owner, description,
/// start and duration are immutable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerPatch {
    pub is_active: Option<bool>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TimerPatch {
    pub fn stopped(at: DateTime<Utc>) -> Self {
        Self {
            is_active: Some(false),
            ended_at: Some(at),
        }
    }

    pub fn apply(&self, timer: &mut Timer) {
        if let Some(active) = self.is_active {
            timer.is_active = active;
        }
        if let Some(ended_at) = self.ended_at {
            timer.ended_at = Some(ended_at);
        }
    }
}
