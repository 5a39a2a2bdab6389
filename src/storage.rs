use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::memory::HistoryWindow;
use crate::message::{Exchange, Sender, UserId};

/// Per-user bounded conversation history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Most recent exchanges for `user_id`, oldest first. Unknown users get an
    /// empty list.
    async fn get_history(&self, user_id: UserId) -> Result<Vec<Exchange>>;

    /// Appends one exchange, evicting the oldest when the record is full.
    /// Every call appends, even when the content repeats the previous one.
    async fn append_exchange(&self, user_id: UserId, user: &str, bot: &str) -> Result<()>;
}

/// Append-only log of every individual message.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn log_message(&self, user_id: UserId, text: &str, sender: Sender) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub user_id: UserId,
    pub sender: Sender,
    pub text: String,
}

/// History kept in process memory; lost on restart.
#[derive(Clone)]
pub struct InMemoryHistoryStore {
    capacity: usize,
    records: Arc<RwLock<HashMap<UserId, HistoryWindow>>>,
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(crate::memory::DEFAULT_HISTORY_CAPACITY)
    }
}

impl InMemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn get_history(&self, user_id: UserId) -> Result<Vec<Exchange>> {
        Ok(self
            .records
            .read()
            .await
            .get(&user_id)
            .map(HistoryWindow::to_vec)
            .unwrap_or_default())
    }

    async fn append_exchange(&self, user_id: UserId, user: &str, bot: &str) -> Result<()> {
        let mut records = self.records.write().await;
        records
            .entry(user_id)
            .or_insert_with(|| HistoryWindow::new(self.capacity))
            .push(Exchange::new(user, bot));
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<Vec<AuditEntry>>>,
}

impl InMemoryAuditLog {
    pub async fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().await.clone()
    }

    pub async fn entries_for(&self, user_id: UserId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|entry| entry.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn log_message(&self, user_id: UserId, text: &str, sender: Sender) -> Result<()> {
        self.entries.write().await.push(AuditEntry {
            user_id,
            sender,
            text: text.to_string(),
        });
        Ok(())
    }
}

#[cfg(feature = "persistence")]
pub use sql::{SqlAuditLog, SqlHistoryStore, SqliteDatabase};

#[cfg(feature = "persistence")]
mod sql {
    use std::time::Duration;

    use async_trait::async_trait;
    use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
    use tracing::debug;

    use super::{AuditEntry, AuditLog, HistoryStore};
    use crate::error::{BotError, Result};
    use crate::message::{Exchange, Sender, UserId};

    /// Shared SQLite pool with the bot's schema applied.
    #[derive(Clone)]
    pub struct SqliteDatabase {
        pool: SqlitePool,
    }

    impl SqliteDatabase {
        const INIT_STATEMENTS: [&'static str; 2] = [
            r#"
            CREATE TABLE IF NOT EXISTS chats (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                message TEXT NOT NULL,
                sender TEXT NOT NULL,
                timestamp DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS chat_history (
                user_id INTEGER NOT NULL,
                seq INTEGER NOT NULL,
                exchange TEXT NOT NULL,
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (user_id, seq)
            )
            "#,
        ];

        pub async fn connect(connection_url: impl AsRef<str>) -> Result<Self> {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(connection_url.as_ref())
                .await
                .map_err(|err| {
                    BotError::Storage(format!(
                        "failed connecting to SQL backend `{}`: {err}",
                        connection_url.as_ref()
                    ))
                })?;

            for statement in Self::INIT_STATEMENTS {
                sqlx::query(statement)
                    .execute(&pool)
                    .await
                    .map_err(|err| BotError::Storage(format!("failed initializing schema: {err}")))?;
            }

            Ok(Self { pool })
        }

        pub fn history(&self, capacity: usize) -> SqlHistoryStore {
            SqlHistoryStore {
                pool: self.pool.clone(),
                capacity: i64::try_from(capacity.max(1)).unwrap_or(i64::MAX),
            }
        }

        pub fn audit_log(&self) -> SqlAuditLog {
            SqlAuditLog {
                pool: self.pool.clone(),
            }
        }
    }

    /// One row per exchange; `seq` grows per user and rows older than the
    /// newest `capacity` are deleted in the same transaction as the insert.
    #[derive(Clone)]
    pub struct SqlHistoryStore {
        pool: SqlitePool,
        capacity: i64,
    }

    impl SqlHistoryStore {
        /// Drops every record whose newest exchange is older than `max_age`.
        /// Returns the number of deleted rows.
        pub async fn prune_idle(&self, max_age: Duration) -> Result<u64> {
            let modifier = format!("-{} seconds", max_age.as_secs());
            let deleted = sqlx::query(
                r#"
                DELETE FROM chat_history WHERE user_id IN (
                    SELECT user_id FROM chat_history
                    GROUP BY user_id
                    HAVING MAX(created_at) < datetime('now', ?)
                )
                "#,
            )
            .bind(modifier)
            .execute(&self.pool)
            .await
            .map_err(|err| BotError::Storage(format!("failed pruning history: {err}")))?
            .rows_affected();
            Ok(deleted)
        }
    }

    #[async_trait]
    impl HistoryStore for SqlHistoryStore {
        async fn get_history(&self, user_id: UserId) -> Result<Vec<Exchange>> {
            let rows = sqlx::query(
                "SELECT exchange FROM chat_history WHERE user_id = ? ORDER BY seq DESC LIMIT ?",
            )
            .bind(user_id)
            .bind(self.capacity)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| BotError::Storage(format!("failed loading history: {err}")))?;

            let mut exchanges = rows
                .into_iter()
                .map(|row| {
                    let payload: String = row.try_get("exchange").map_err(|err| {
                        BotError::Storage(format!("failed decoding exchange: {err}"))
                    })?;
                    serde_json::from_str::<Exchange>(&payload)
                        .map_err(|err| BotError::Storage(format!("invalid exchange payload: {err}")))
                })
                .collect::<Result<Vec<_>>>()?;
            exchanges.reverse();
            Ok(exchanges)
        }

        async fn append_exchange(&self, user_id: UserId, user: &str, bot: &str) -> Result<()> {
            let payload = serde_json::to_string(&Exchange::new(user, bot))?;
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|err| BotError::Storage(format!("failed opening transaction: {err}")))?;

            let seq = sqlx::query_scalar::<_, i64>(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_history WHERE user_id = ?",
            )
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| BotError::Storage(format!("failed reading history cursor: {err}")))?;

            sqlx::query("INSERT INTO chat_history (user_id, seq, exchange) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(seq)
                .bind(payload)
                .execute(&mut *tx)
                .await
                .map_err(|err| BotError::Storage(format!("failed writing exchange: {err}")))?;

            let evicted = sqlx::query("DELETE FROM chat_history WHERE user_id = ? AND seq <= ?")
                .bind(user_id)
                .bind(seq - self.capacity)
                .execute(&mut *tx)
                .await
                .map_err(|err| BotError::Storage(format!("failed evicting history: {err}")))?
                .rows_affected();

            tx.commit()
                .await
                .map_err(|err| BotError::Storage(format!("failed committing exchange: {err}")))?;

            debug!(user_id, seq, evicted, "history exchange appended");
            Ok(())
        }
    }

    #[derive(Clone)]
    pub struct SqlAuditLog {
        pool: SqlitePool,
    }

    impl SqlAuditLog {
        pub async fn messages_for(&self, user_id: UserId) -> Result<Vec<AuditEntry>> {
            let rows = sqlx::query("SELECT message, sender FROM chats WHERE user_id = ? ORDER BY id ASC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await
                .map_err(|err| BotError::Storage(format!("failed loading audit log: {err}")))?;

            rows.into_iter()
                .map(|row| {
                    let text: String = row.try_get("message").map_err(|err| {
                        BotError::Storage(format!("failed decoding audit message: {err}"))
                    })?;
                    let sender: String = row.try_get("sender").map_err(|err| {
                        BotError::Storage(format!("failed decoding audit sender: {err}"))
                    })?;
                    let sender = match sender.as_str() {
                        "user" => Sender::User,
                        "bot" => Sender::Bot,
                        other => {
                            return Err(BotError::Storage(format!("unknown sender tag `{other}`")))
                        }
                    };
                    Ok(AuditEntry {
                        user_id,
                        sender,
                        text,
                    })
                })
                .collect()
        }
    }

    #[async_trait]
    impl AuditLog for SqlAuditLog {
        async fn log_message(&self, user_id: UserId, text: &str, sender: Sender) -> Result<()> {
            sqlx::query("INSERT INTO chats (user_id, message, sender) VALUES (?, ?, ?)")
                .bind(user_id)
                .bind(text)
                .bind(sender.as_str())
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(|err| BotError::Storage(format!("failed writing audit entry: {err}")))
        }
    }

}
