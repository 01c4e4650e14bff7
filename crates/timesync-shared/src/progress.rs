//! Progress calculator.
//!
//! A timer's elapsed value is always derived from its stored start time
//! and the caller-supplied `now`; nothing here reads the clock.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timer::Timer;
use crate::types::{TimerId, UserId};

/// How a stopped timer's elapsed value is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ElapsedMode {
    /// Elapsed is measured up to `endedAt` once the timer stops.
    #[default]
    Frozen,
    /// Elapsed is always measured up to `now`, even after stop.
    Live,
}

impl FromStr for ElapsedMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "frozen" => Ok(Self::Frozen),
            "live" => Ok(Self::Live),
            other => Err(format!("unknown elapsed mode: {other}")),
        }
    }
}

/// A timer plus its derived elapsed time, as sent to observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerView {
    pub id: TimerId,
    pub owner_id: UserId,
    pub description: String,
    pub is_active: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub ended_at: Option<DateTime<Utc>>,
    pub duration: Option<u64>,
    /// Milliseconds, in `[0, duration]` when a positive duration is set.
    pub elapsed: u64,
}

/// Compute the view of `timer` at `now` with the default [`ElapsedMode`].
pub fn compute_view(timer: &Timer, now: DateTime<Utc>) -> TimerView {
    compute_view_with(timer, now, ElapsedMode::default())
}

pub fn compute_view_with(timer: &Timer, now: DateTime<Utc>, mode: ElapsedMode) -> TimerView {
    let reference = match (mode, timer.is_active, timer.ended_at) {
        (ElapsedMode::Frozen, false, Some(ended_at)) => ended_at,
        _ => now,
    };

    let raw = (reference - timer.started_at).num_milliseconds().max(0) as u64;
    let elapsed = match timer.bounded_duration() {
        Some(limit) => raw.min(limit),
        None => raw,
    };

    TimerView {
        id: timer.id,
        owner_id: timer.owner_id,
        description: timer.description.clone(),
        is_active: timer.is_active,
        started_at: timer.started_at,
        ended_at: timer.ended_at,
        duration: timer.duration,
        elapsed,
    }
}

pub fn compute_views(timers: &[Timer], now: DateTime<Utc>, mode: ElapsedMode) -> Vec<TimerView> {
    timers
        .iter()
        .map(|timer| compute_view_with(timer, now, mode))
        .collect()
}
