//! Volatile backend. Everything is lost when the process exits.

use std::collections::HashMap;

use timesync_shared::timer::Timer;
use timesync_shared::types::{TimerId, UserId};

use crate::error::{Result, StoreError};
use crate::models::UserRecord;

#[derive(Debug, Default)]
pub struct MemoryStore {
    timers: HashMap<TimerId, Timer>,
    /// Insertion order of `timers`, so listings come back in creation order.
    order: Vec<TimerId>,
    users: HashMap<UserId, UserRecord>,
    usernames: HashMap<String, UserId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_timer(&mut self, timer: Timer) {
        if self.timers.insert(timer.id, timer.clone()).is_none() {
            self.order.push(timer.id);
        }
    }

    pub(crate) fn timer(&self, id: TimerId) -> Option<&Timer> {
        self.timers.get(&id)
    }

    pub(crate) fn timer_mut(&mut self, id: TimerId) -> Option<&mut Timer> {
        self.timers.get_mut(&id)
    }

    pub(crate) fn timers(&self) -> impl Iterator<Item = &Timer> {
        self.order.iter().filter_map(|id| self.timers.get(id))
    }

    pub(crate) fn put_user(&mut self, user: UserRecord) -> Result<()> {
        if self.usernames.contains_key(&user.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' already exists",
                user.username
            )));
        }
        self.usernames.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user);
        Ok(())
    }

    pub(crate) fn user_by_username(&self, username: &str) -> Option<&UserRecord> {
        self.usernames
            .get(username)
            .and_then(|id| self.users.get(id))
    }

    pub(crate) fn has_user(&self, id: UserId) -> bool {
        self.users.contains_key(&id)
    }

    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }
}
