//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use timesync_shared::progress::ElapsedMode;

use crate::broadcast::BroadcastScope;

/// Where users and timers are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    /// Volatile, lost on restart.
    Memory,
    /// SQLite file. `None` selects the platform data directory.
    Sqlite(Option<PathBuf>),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP + WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:3000`
    pub http_addr: SocketAddr,

    /// Env: `STORAGE` (`sqlite` | `memory`), `DATABASE_PATH`
    /// Default: SQLite in the platform data directory.
    pub storage: StorageBackend,

    /// Period of the per-connection `active_timers` push.
    /// Env: `TICK_INTERVAL_MS`
    /// Default: `1000`
    pub tick_interval: Duration,

    /// Lifetime of an issued session token.
    /// Env: `SESSION_TTL_SECS`
    /// Default: `86400` (one day)
    pub session_ttl: Duration,

    /// Which timers each connection is sent.
    /// Env: `BROADCAST_SCOPE` (`global` | `owner`)
    /// Default: `global`
    pub broadcast_scope: BroadcastScope,

    /// Whether a stopped timer's elapsed time stops advancing.
    /// Env: `ELAPSED_AFTER_STOP` (`frozen` | `live`)
    /// Default: `frozen`
    pub elapsed_mode: ElapsedMode,

    /// Upper bound on a timer description, in characters.
    /// Env: `MAX_DESCRIPTION_LEN`
    /// Default: `256`
    pub max_description_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 3000).into(),
            storage: StorageBackend::Sqlite(None),
            tick_interval: Duration::from_millis(1000),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            broadcast_scope: BroadcastScope::Global,
            elapsed_mode: ElapsedMode::Frozen,
            max_description_len: 256,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Some(parsed) = parse_or_warn::<SocketAddr>("HTTP_ADDR", &addr) {
                config.http_addr = parsed;
            }
        }

        let path = lookup("DATABASE_PATH").filter(|p| !p.is_empty()).map(PathBuf::from);
        config.storage = match lookup("STORAGE").as_deref().map(str::trim) {
            Some("memory") => StorageBackend::Memory,
            Some("sqlite") | None => StorageBackend::Sqlite(path),
            Some(other) => {
                tracing::warn!(value = %other, "Invalid STORAGE, using sqlite");
                StorageBackend::Sqlite(path)
            }
        };

        if let Some(val) = lookup("TICK_INTERVAL_MS") {
            match parse_or_warn::<u64>("TICK_INTERVAL_MS", &val) {
                Some(0) => tracing::warn!("TICK_INTERVAL_MS must be positive, using default"),
                Some(ms) => config.tick_interval = Duration::from_millis(ms),
                None => {}
            }
        }

        if let Some(val) = lookup("SESSION_TTL_SECS") {
            if let Some(secs) = parse_or_warn::<u64>("SESSION_TTL_SECS", &val) {
                config.session_ttl = Duration::from_secs(secs);
            }
        }

        if let Some(val) = lookup("BROADCAST_SCOPE") {
            if let Some(scope) = parse_or_warn::<BroadcastScope>("BROADCAST_SCOPE", &val) {
                config.broadcast_scope = scope;
            }
        }

        if let Some(val) = lookup("ELAPSED_AFTER_STOP") {
            if let Some(mode) = parse_or_warn::<ElapsedMode>("ELAPSED_AFTER_STOP", &val) {
                config.elapsed_mode = mode;
            }
        }

        if let Some(val) = lookup("MAX_DESCRIPTION_LEN") {
            if let Some(n) = parse_or_warn::<usize>("MAX_DESCRIPTION_LEN", &val) {
                config.max_description_len = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::from_lookup(|_| None);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.storage, StorageBackend::Sqlite(None));
        assert_eq!(config.broadcast_scope, BroadcastScope::Global);
        assert_eq!(config.elapsed_mode, ElapsedMode::Frozen);
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("STORAGE", "memory"),
            ("TICK_INTERVAL_MS", "250"),
            ("SESSION_TTL_SECS", "60"),
            ("BROADCAST_SCOPE", "owner"),
            ("ELAPSED_AFTER_STOP", "live"),
            ("MAX_DESCRIPTION_LEN", "32"),
        ]));
        assert_eq!(config.http_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.session_ttl, Duration::from_secs(60));
        assert_eq!(config.broadcast_scope, BroadcastScope::Owner);
        assert_eq!(config.elapsed_mode, ElapsedMode::Live);
        assert_eq!(config.max_description_len, 32);
    }

    #[test]
    fn test_database_path() {
        let config = ServerConfig::from_lookup(lookup_from(&[("DATABASE_PATH", "/tmp/t.db")]));
        assert_eq!(
            config.storage,
            StorageBackend::Sqlite(Some(PathBuf::from("/tmp/t.db")))
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = ServerConfig::from_lookup(lookup_from(&[
            ("HTTP_ADDR", "nope"),
            ("TICK_INTERVAL_MS", "0"),
            ("BROADCAST_SCOPE", "everyone"),
        ]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 3000).into());
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.broadcast_scope, BroadcastScope::Global);
    }
}
