//! CRUD operations for [`Timer`] records.

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use timesync_shared::timer::Timer;
use timesync_shared::types::{TimerId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::models::{TimerFilter, TimerPatch};

const TIMER_COLUMNS: &str = "id, owner_id, description, is_active, started_at, ended_at, duration";

impl Database {
    // ------------------------------------------------------------------
    // Create / replace
    // ------------------------------------------------------------------

    /// Insert a timer, or overwrite the mutable columns of an existing one.
    ///
    /// SQLite integers are signed, so a duration above `i64::MAX` is
    /// rejected rather than stored wrapped.
    pub fn upsert_timer(&self, timer: &Timer) -> Result<()> {
        let duration = timer
            .duration
            .map(i64::try_from)
            .transpose()
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        self.conn().execute(
            "INSERT INTO timers (id, owner_id, description, is_active, started_at, ended_at, duration)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                 is_active = excluded.is_active,
                 ended_at  = excluded.ended_at",
            params![
                timer.id.to_string(),
                timer.owner_id.to_string(),
                timer.description,
                timer.is_active,
                timer.started_at.timestamp_millis(),
                timer.ended_at.map(|t| t.timestamp_millis()),
                duration,
            ],
        )?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch a single timer by id.
    pub fn get_timer(&self, id: TimerId) -> Result<Option<Timer>> {
        let timer = self
            .conn()
            .query_row(
                &format!("SELECT {TIMER_COLUMNS} FROM timers WHERE id = ?1"),
                params![id.to_string()],
                row_to_timer,
            )
            .optional()?;
        Ok(timer)
    }

    /// List timers matching `filter`, oldest first.
    pub fn list_timers(&self, filter: &TimerFilter) -> Result<Vec<Timer>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {TIMER_COLUMNS}
             FROM timers
             WHERE (?1 IS NULL OR owner_id = ?1)
               AND (?2 IS NULL OR is_active = ?2)
             ORDER BY started_at ASC, rowid ASC"
        ))?;

        let rows = stmt.query_map(
            params![filter.owner_id.map(|o| o.to_string()), filter.is_active],
            row_to_timer,
        )?;

        let mut timers = Vec::new();
        for row in rows {
            timers.push(row?);
        }
        Ok(timers)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Apply `patch` to a timer. Returns the updated record, or `None` if no
    /// timer has this id.
    pub fn patch_timer(&self, id: TimerId, patch: &TimerPatch) -> Result<Option<Timer>> {
        let affected = self.conn().execute(
            "UPDATE timers
             SET is_active = COALESCE(?2, is_active),
                 ended_at  = COALESCE(?3, ended_at)
             WHERE id = ?1",
            params![
                id.to_string(),
                patch.is_active,
                patch.ended_at.map(|t| t.timestamp_millis()),
            ],
        )?;

        if affected == 0 {
            return Ok(None);
        }
        self.get_timer(id)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn millis_to_datetime(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Integer,
            format!("timestamp out of range: {millis}").into(),
        )
    })
}

/// Map a `rusqlite::Row` to a [`Timer`].
fn row_to_timer(row: &rusqlite::Row<'_>) -> rusqlite::Result<Timer> {
    let id_str: String = row.get(0)?;
    let owner_str: String = row.get(1)?;
    let description: String = row.get(2)?;
    let is_active: bool = row.get(3)?;
    let started_ms: i64 = row.get(4)?;
    let ended_ms: Option<i64> = row.get(5)?;
    let duration: Option<i64> = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| conversion_error(0, e))?;
    let owner = Uuid::parse_str(&owner_str).map_err(|e| conversion_error(1, e))?;

    Ok(Timer {
        id: TimerId(id),
        owner_id: UserId(owner),
        description,
        is_active,
        started_at: millis_to_datetime(4, started_ms)?,
        ended_at: ended_ms.map(|ms| millis_to_datetime(5, ms)).transpose()?,
        duration: duration
            .map(|d| u64::try_from(d).map_err(|e| conversion_error(6, e)))
            .transpose()?,
    })
}
