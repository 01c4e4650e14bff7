//! Session registry.
//!
//! Maps opaque bearer tokens to the user they were issued for. Tokens are
//! random 256-bit values, hex encoded, and expire after a fixed TTL.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use tokio::sync::RwLock;
use tracing::debug;

use timesync_shared::types::UserId;

use crate::error::ServerError;

#[derive(Debug, Clone)]
struct SessionEntry {
    user_id: UserId,
    expires_at: DateTime<Utc>,
}

impl SessionEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: chrono::Duration,
}

impl SessionRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
        }
    }

    /// Create a fresh session for `user_id` and return its token.
    pub async fn issue(&self, user_id: UserId) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);

        let now = Utc::now();
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.sessions
            .write()
            .await
            .insert(token.clone(), SessionEntry { user_id, expires_at });

        debug!(user = %user_id.short(), "Session issued");
        token
    }

    /// Resolve a token to its user. Unknown and expired tokens are both
    /// reported as [`ServerError::Unauthorized`].
    pub async fn resolve(&self, token: &str) -> Result<UserId, ServerError> {
        let sessions = self.sessions.read().await;
        match sessions.get(token) {
            Some(entry) if entry.is_live(Utc::now()) => Ok(entry.user_id),
            _ => Err(ServerError::Unauthorized),
        }
    }

    /// Invalidate a token. Returns `true` if it existed.
    pub async fn revoke(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_live(now));
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "Purged expired sessions");
        }
        purged
    }

    #[allow(dead_code)]
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
