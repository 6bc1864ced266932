//! v002 -- Index on `messages.created_at` for the latest-timestamp lookup
//! done on every insert.

use rusqlite::Connection;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_messages_created_at ON messages(created_at);",
    )
}
