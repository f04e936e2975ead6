//! Durable per-recipient FIFO mailbox (the offline queue).
//!
//! Every accepted envelope lands here, whether or not the recipient was
//! online at send time; rows are removed by an explicit `ack` or by the
//! atomic drain performed when the recipient registers. Uses WAL mode for
//! concurrent reads/writes.

use crate::error::{StorageError, StorageResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use weft_types::{Did, MessageEnvelope};

/// SQLite-backed mailbox.
#[derive(Clone)]
pub struct Mailbox {
    pool: SqlitePool,
}

impl Mailbox {
    /// Open a mailbox at the given database path.
    ///
    /// Creates the database file if it doesn't exist.
    pub async fn open(path: &Path) -> StorageResult<Self> {
        let path_str = path.to_str().ok_or_else(|| StorageError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let mailbox = Self { pool };
        mailbox.run_migrations().await?;
        Ok(mailbox)
    }

    /// Create an in-memory mailbox (for testing).
    pub async fn in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(":memory:")?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let mailbox = Self { pool };
        mailbox.run_migrations().await?;
        Ok(mailbox)
    }

    async fn run_migrations(&self) -> StorageResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mailbox (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_did TEXT NOT NULL,
                message_id TEXT NOT NULL,
                envelope TEXT NOT NULL,
                enqueued_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mailbox_recipient ON mailbox(recipient_did, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_mailbox_message ON mailbox(recipient_did, message_id)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append an envelope durably to a recipient's queue.
    ///
    /// Failures propagate to the caller; there is no in-memory fallback, so
    /// a failed enqueue must be treated as a failed send.
    pub async fn enqueue(&self, recipient: &Did, envelope: &MessageEnvelope) -> StorageResult<()> {
        let json = serde_json::to_string(envelope).map_err(|e| StorageError::Corrupt {
            recipient: recipient.to_string(),
            reason: e.to_string(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO mailbox (recipient_did, message_id, envelope, enqueued_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(recipient.as_str())
        .bind(&envelope.id)
        .bind(json)
        .bind(current_timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Atomically return all queued envelopes for a recipient in FIFO order
    /// and remove them from storage in the same transaction.
    ///
    /// There is no partial drain: either every row for the DID is returned
    /// and deleted, or none are.
    pub async fn dequeue(&self, recipient: &Did) -> StorageResult<Vec<MessageEnvelope>> {
        let mut tx = self.pool.begin().await?;

        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT envelope FROM mailbox
            WHERE recipient_did = ?1
            ORDER BY id ASC
            "#,
        )
        .bind(recipient.as_str())
        .fetch_all(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM mailbox WHERE recipient_did = ?1")
            .bind(recipient.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        rows.into_iter()
            .map(|(json,)| {
                serde_json::from_str(&json).map_err(|e| StorageError::Corrupt {
                    recipient: recipient.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    /// Remove the envelope with the given id from a recipient's queue.
    ///
    /// Returns whether a row was removed. Acking an id with no matching row
    /// is a no-op, never an error.
    pub async fn acknowledge(&self, recipient: &Did, message_id: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            "DELETE FROM mailbox WHERE recipient_did = ?1 AND message_id = ?2",
        )
        .bind(recipient.as_str())
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Queue depth for one recipient, or globally if no DID is given.
    pub async fn count(&self, recipient: Option<&Did>) -> StorageResult<u64> {
        let count: i64 = match recipient {
            Some(did) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM mailbox WHERE recipient_did = ?1")
                    .bind(did.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM mailbox")
                    .fetch_one(&self.pool)
                    .await?
            }
        };

        Ok(count as u64)
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
