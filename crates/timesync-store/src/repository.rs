//! Storage seams consumed by the server.

use timesync_shared::timer::Timer;
use timesync_shared::types::{TimerId, UserId};

use crate::database::Database;
use crate::error::Result;
use crate::memory::MemoryStore;
use crate::models::{TimerFilter, TimerPatch, UserRecord};

/// CRUD over timers.
pub trait TimerRepository {
    /// Insert `timer`, replacing any record with the same id.
    fn save(&mut self, timer: &Timer) -> Result<()>;

    fn find_by_id(&self, id: TimerId) -> Result<Option<Timer>>;

    /// All matching timers in creation order.
    fn find_all(&self, filter: &TimerFilter) -> Result<Vec<Timer>>;

    /// Apply `patch` and return the updated record, or `None` if `id` is
    /// unknown.
    fn update_by_id(&mut self, id: TimerId, patch: &TimerPatch) -> Result<Option<Timer>>;
}

/// Account lookups backing registration, login and owner validation.
pub trait UserRepository {
    /// Fails with [`crate::StoreError::Conflict`] if the username is taken.
    fn insert_user(&mut self, user: &UserRecord) -> Result<()>;

    fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>>;

    fn user_exists(&self, id: UserId) -> Result<bool>;
}

/// A complete backend. Blanket-implemented for anything providing both
/// halves.
pub trait Repository: TimerRepository + UserRepository + Send {}

impl<T: TimerRepository + UserRepository + Send> Repository for T {}

// ---------------------------------------------------------------------------
// SQLite
// ---------------------------------------------------------------------------

impl TimerRepository for Database {
    fn save(&mut self, timer: &Timer) -> Result<()> {
        self.upsert_timer(timer)
    }

    fn find_by_id(&self, id: TimerId) -> Result<Option<Timer>> {
        self.get_timer(id)
    }

    fn find_all(&self, filter: &TimerFilter) -> Result<Vec<Timer>> {
        self.list_timers(filter)
    }

    fn update_by_id(&mut self, id: TimerId, patch: &TimerPatch) -> Result<Option<Timer>> {
        self.patch_timer(id, patch)
    }
}

impl UserRepository for Database {
    fn insert_user(&mut self, user: &UserRecord) -> Result<()> {
        self.create_user(user)
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.get_user_by_username(username)
    }

    fn user_exists(&self, id: UserId) -> Result<bool> {
        self.has_user(id)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

impl TimerRepository for MemoryStore {
    fn save(&mut self, timer: &Timer) -> Result<()> {
        self.put_timer(timer.clone());
        Ok(())
    }

    fn find_by_id(&self, id: TimerId) -> Result<Option<Timer>> {
        Ok(self.timer(id).cloned())
    }

    fn find_all(&self, filter: &TimerFilter) -> Result<Vec<Timer>> {
        Ok(self
            .timers()
            .filter(|timer| filter.matches(timer))
            .cloned()
            .collect())
    }

    fn update_by_id(&mut self, id: TimerId, patch: &TimerPatch) -> Result<Option<Timer>> {
        Ok(self.timer_mut(id).map(|timer| {
            patch.apply(timer);
            timer.clone()
        }))
    }
}

impl UserRepository for MemoryStore {
    fn insert_user(&mut self, user: &UserRecord) -> Result<()> {
        self.put_user(user.clone())
    }

    fn find_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.user_by_username(username).cloned())
    }

    fn user_exists(&self, id: UserId) -> Result<bool> {
        Ok(self.has_user(id))
    }
}
