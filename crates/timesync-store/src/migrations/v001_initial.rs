//! v001 -- Initial schema creation: `users` and `timers`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    username      TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,              -- argon2 PHC string
    created_at    TEXT NOT NULL               -- RFC-3339
);

-- ----------------------------------------------------------------
-- Timers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS timers (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    owner_id    TEXT NOT NULL,                -- FK -> users(id)
    description TEXT NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 1,   -- boolean 0/1
    started_at  INTEGER NOT NULL,             -- unix millis
    ended_at    INTEGER,                      -- unix millis, set on stop
    duration    INTEGER,                      -- millis, NULL = open-ended

    FOREIGN KEY (owner_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_timers_owner ON timers(owner_id);
CREATE INDEX IF NOT EXISTS idx_timers_active ON timers(is_active);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
