//! SQLite implementation of the MetadataStore trait.
//!
//! The primary persistent backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use anchor_relay_core::{Address, Message, MessageId};

use crate::error::{Result, StoreError};
use crate::migration::{self, now_millis};
use crate::traits::{MetadataStore, UpsertResult};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations run on the blocking pool.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a blocking operation on the connection.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn encode_message(message: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_message(bytes: &[u8]) -> Result<Message> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Timestamps are stored in a signed SQLite INTEGER column.
fn sql_timestamp(timestamp: u64) -> Result<i64> {
    i64::try_from(timestamp).map_err(|_| StoreError::InvalidData(format!("timestamp {} out of range", timestamp)))
}

/// Write one message inside an open connection or transaction.
fn put(conn: &Connection, message: &Message) -> Result<UpsertResult> {
    let timestamp = sql_timestamp(message.timestamp)?;
    let existing: Option<Vec<u8>> = conn
        .query_row(
            "SELECT value FROM messages WHERE message_id = ?1",
            params![message.id.as_bytes().as_slice()],
            |row| row.get(0),
        )
        .optional()?;

    let result = match existing {
        None => UpsertResult::Inserted,
        Some(bytes) => {
            if decode_message(&bytes)? == *message {
                return Ok(UpsertResult::Unchanged);
            }
            UpsertResult::Updated
        }
    };

    conn.execute(
        "INSERT OR REPLACE INTO messages (
            message_id, sender, receiver, content_hash, blob_ref,
            timestamp, status, value, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            message.id.as_bytes().as_slice(),
            message.sender.as_bytes().as_slice(),
            message.receiver.as_bytes().as_slice(),
            message.content_hash.as_bytes().as_slice(),
            message.blob_ref.as_ref().map(|r| r.as_str()),
            timestamp,
            message.status.as_str(),
            encode_message(message)?,
            now_millis(),
        ],
    )?;

    Ok(result)
}

/// Run a `SELECT value ...` query and decode every row.
fn query_messages(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Message>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params, |row| row.get::<_, Vec<u8>>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    values.iter().map(|v| decode_message(v)).collect()
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn upsert_message(&self, message: &Message) -> Result<UpsertResult> {
        let message = message.clone();
        self.run(move |conn| put(conn, &message)).await
    }

    async fn upsert_messages(&self, messages: &[Message]) -> Result<Vec<UpsertResult>> {
        let messages = messages.to_vec();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let results = messages
                .iter()
                .map(|m| put(&tx, m))
                .collect::<Result<Vec<_>>>()?;
            tx.commit()?;
            Ok(results)
        })
        .await
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = *id;
        self.run(move |conn| {
            let value: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT value FROM messages WHERE message_id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            value.map(|v| decode_message(&v)).transpose()
        })
        .await
    }

    async fn has_message(&self, id: &MessageId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM messages WHERE message_id = ?1)",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
        .await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let n = conn.execute(
                "DELETE FROM messages WHERE message_id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_conversation(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        let (a, b) = (*a, *b);
        self.run(move |conn| {
            query_messages(
                conn,
                "SELECT value FROM messages
                 WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                 ORDER BY timestamp, message_id",
                params![a.as_bytes().as_slice(), b.as_bytes().as_slice()],
            )
        })
        .await
    }

    async fn list_messages_since(&self, since: u64) -> Result<Vec<Message>> {
        // Nothing can be stored past i64::MAX.
        let since = sql_timestamp(since).unwrap_or(i64::MAX);
        self.run(move |conn| {
            query_messages(
                conn,
                "SELECT value FROM messages WHERE timestamp >= ?1 ORDER BY timestamp, message_id",
                params![since],
            )
        })
        .await
    }

    async fn count_messages(&self) -> Result<usize> {
        self.run(|conn| {
            let n: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
            usize::try_from(n).map_err(|_| StoreError::InvalidData(format!("negative count {}", n)))
        })
        .await
    }
}
