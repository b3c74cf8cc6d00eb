//! v001 -- Initial schema creation.
//!
//! A single `records` table holds every cached entity. The sort columns are
//! denormalized out of the JSON payload so pages can be read in index order.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id                   TEXT PRIMARY KEY NOT NULL,   -- full entity id
    kind                 TEXT NOT NULL,               -- plural kind name
    parent_id            TEXT,                        -- owning conversation/channel
    created_at           TEXT,                        -- RFC-3339, millisecond precision, UTC
    last_message_sent_at TEXT,
    position             INTEGER,
    payload              TEXT NOT NULL,               -- server JSON
    cached_at            TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_records_kind_created
    ON records(kind, created_at DESC);

CREATE INDEX IF NOT EXISTS idx_records_parent_position
    ON records(parent_id, position DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
