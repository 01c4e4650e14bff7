//! Account registration and credential verification.
//!
//! Passwords are hashed with Argon2id and stored as PHC strings. Hashing
//! runs on the blocking pool so a burst of logins does not stall the
//! runtime's worker threads.

use std::sync::Arc;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use timesync_shared::types::UserId;
use timesync_store::{UserRecord, UserRepository};

use crate::error::ServerError;
use crate::session::SessionRegistry;
use crate::timers::SharedRepository;

const USERNAME_LEN: std::ops::RangeInclusive<usize> = 3..=64;
const MIN_PASSWORD_LEN: usize = 8;

/// Returned by signup and login.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub user_id: UserId,
}

pub struct AuthService {
    repo: SharedRepository,
    sessions: Arc<SessionRegistry>,
}

impl AuthService {
    pub fn new(repo: SharedRepository, sessions: Arc<SessionRegistry>) -> Self {
        Self { repo, sessions }
    }

    /// Create an account.
    pub async fn register(&self, username: &str, password: &str) -> Result<UserId, ServerError> {
        let username = username.trim();
        if !USERNAME_LEN.contains(&username.chars().count()) {
            return Err(ServerError::validation(
                "username",
                format!(
                    "must be between {} and {} characters",
                    USERNAME_LEN.start(),
                    USERNAME_LEN.end()
                ),
            ));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(ServerError::validation(
                "password",
                format!("must be at least {MIN_PASSWORD_LEN} characters"),
            ));
        }

        let password_hash = hash_password(password.to_owned()).await?;
        let record = UserRecord {
            id: UserId::new(),
            username: username.to_string(),
            password_hash,
            created_at: Utc::now(),
        };

        self.repo.lock().await.insert_user(&record)?;

        info!(user = %record.id.short(), username = %record.username, "User registered");
        Ok(record.id)
    }

    /// Check a username/password pair.
    pub async fn verify(&self, username: &str, password: &str) -> Result<UserId, ServerError> {
        let record = self
            .repo
            .lock()
            .await
            .find_user_by_username(username.trim())?;

        let Some(record) = record else {
            debug!("Login for unknown username");
            return Err(ServerError::Unauthorized);
        };

        if verify_password(password.to_owned(), record.password_hash).await? {
            Ok(record.id)
        } else {
            debug!(user = %record.id.short(), "Login with wrong password");
            Err(ServerError::Unauthorized)
        }
    }

    pub async fn signup(&self, username: &str, password: &str) -> Result<Session, ServerError> {
        let user_id = self.register(username, password).await?;
        self.open_session(user_id).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<Session, ServerError> {
        let user_id = self.verify(username, password).await?;
        self.open_session(user_id).await
    }

    async fn open_session(&self, user_id: UserId) -> Result<Session, ServerError> {
        let session_id = self.sessions.issue(user_id).await;
        Ok(Session {
            session_id,
            user_id,
        })
    }
}

async fn hash_password(password: String) -> Result<String, ServerError> {
    tokio::task::spawn_blocking(move || {
        let salt_bytes: [u8; 16] = rand::random();
        let salt = SaltString::encode_b64(&salt_bytes)
            .map_err(|e| ServerError::Internal(format!("salt encoding failed: {e}")))?;
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| ServerError::Internal(format!("password hashing failed: {e}")))
    })
    .await
    .map_err(|e| ServerError::Internal(format!("hashing task failed: {e}")))?
}

async fn verify_password(password: String, stored: String) -> Result<bool, ServerError> {
    tokio::task::spawn_blocking(move || {
        let Ok(parsed) = PasswordHash::new(&stored) else {
            tracing::warn!("Stored password hash is not a valid PHC string");
            return false;
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
    .await
    .map_err(|e| ServerError::Internal(format!("verification task failed: {e}")))
}
