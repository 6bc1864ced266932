//! v001 -- Initial schema: `users` and `messages`.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id            TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    email         TEXT NOT NULL UNIQUE COLLATE NOCASE,
    full_name     TEXT NOT NULL,
    bio           TEXT NOT NULL DEFAULT '',
    profile_pic   TEXT,                       -- public URL
    password_hash TEXT NOT NULL,              -- argon2 PHC string
    created_at    TEXT NOT NULL               -- RFC-3339, microseconds
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,                -- FK -> users(id)
    receiver_id TEXT NOT NULL,                -- FK -> users(id)
    text        TEXT,
    image       TEXT,                         -- public URL
    seen        INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1, only ever 0 -> 1
    created_at  TEXT NOT NULL,

    CHECK (text IS NOT NULL OR image IS NOT NULL),
    FOREIGN KEY (sender_id)   REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (receiver_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_unseen
    ON messages(receiver_id, seen, sender_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
