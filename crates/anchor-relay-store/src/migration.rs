//! Database schema migrations for SQLite.
//!
//! A simple versioned migration system. Each migration transforms the schema
//! from version N to N+1.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Idempotent: safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema v{} is newer than supported v{}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied metadata schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!("unknown migration version: {}", version))),
    }
}

/// Migration v1: message cache.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per derived message; `value` is the CBOR-encoded Message
        CREATE TABLE messages (
            message_id BLOB PRIMARY KEY,      -- 32 bytes
            sender BLOB NOT NULL,             -- 20 bytes
            receiver BLOB NOT NULL,           -- 20 bytes
            content_hash BLOB NOT NULL,       -- 32 bytes
            blob_ref TEXT,                    -- nullable: ledger records may lack it
            timestamp INTEGER NOT NULL,       -- Unix seconds
            status TEXT NOT NULL,             -- pending | confirmed | failed
            value BLOB NOT NULL,
            updated_at INTEGER NOT NULL       -- local time of last write (Unix ms)
        );

        CREATE INDEX idx_messages_pair ON messages(sender, receiver, timestamp);
        CREATE INDEX idx_messages_timestamp ON messages(timestamp);
        "#,
    )?;

    Ok(())
}

/// Current time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
