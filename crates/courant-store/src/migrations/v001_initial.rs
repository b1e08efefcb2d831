//! v001 -- Initial schema creation.
//!
//! Creates the single `cached_messages` table holding the per-conversation
//! mirror of the authoritative store.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Cached messages, keyed by the conversation they belong to on this
-- device: (viewer, counterpart). The same authoritative message may
-- appear under two different viewers on two devices; locally the
-- authoritative id is unique per conversation.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS cached_messages (
    viewer         TEXT NOT NULL,              -- UUID of the local user
    counterpart    TEXT NOT NULL,              -- UUID of the other party
    id             TEXT NOT NULL,              -- authoritative message UUID
    correlation_id TEXT NOT NULL,              -- client-side stub key
    sender         TEXT NOT NULL,
    receiver       TEXT NOT NULL,
    content        TEXT NOT NULL,              -- serde_json MessageContent
    reply_to       TEXT,                       -- nullable message UUID
    reactions      TEXT NOT NULL,              -- serde_json map user -> emoji
    is_deleted     INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    status         TEXT NOT NULL,              -- serde_json MessageStatus
    created_at     TEXT NOT NULL,              -- ISO-8601 / RFC-3339
    delivered_at   TEXT,
    read_at        TEXT,
    position       INTEGER NOT NULL,           -- authoritative list order

    PRIMARY KEY (viewer, counterpart, id)
);

CREATE INDEX IF NOT EXISTS idx_cached_messages_conversation
    ON cached_messages(viewer, counterpart, position);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
