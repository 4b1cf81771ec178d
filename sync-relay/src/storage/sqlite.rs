//! SQLite storage backend for sync-relay.

use super::{ActionStorage, Appended};
use crate::config::StorageConfig;
use crate::error::StorageError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Executor, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use sync_client::log::now_millis;
use sync_client::{SeatConfig, SessionDoc, SessionStatus};
use sync_types::{Command, LogEntry, PlayerId, SequenceId, SessionId};
use tokio::sync::Mutex;

/// Schema version written to `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

/// WHERE clause selecting sessions eligible for cleanup.
const STALE_SESSIONS: &str =
    "(status = 'completed' AND updated_at <= ?1) OR updated_at <= ?2";

/// SQLite-based command log storage.
///
/// Uses WAL mode for concurrent reads. SQLite allows one writer at a time,
/// so writes are serialized in-process; a read-then-increment append never
/// sees its snapshot invalidated by another connection.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage")
            .field("connections", &self.pool.size())
            .finish_non_exhaustive()
    }
}

impl SqliteStorage {
    /// Open (creating if missing) the database described by `config`.
    pub async fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let path = &config.database;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(StorageError::InvalidPath { path: path.clone() });
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(config.busy_timeout());

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self::with_pool(pool);
        storage.run_migrations().await?;
        tracing::info!("Opened session store at {}", path.display());
        Ok(storage)
    }

    /// Create an in-memory SQLite storage (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:").map_err(StorageError::Database)?;

        // Each connection to :memory: is its own database; keep exactly one
        // alive for the life of the pool.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let storage = Self::with_pool(pool);
        storage.run_migrations().await?;
        Ok(storage)
    }

    fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::Database)?;
        if version > SCHEMA_VERSION {
            return Err(StorageError::Migration(format!(
                "database schema v{version} is newer than supported v{SCHEMA_VERSION}"
            )));
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                join_code TEXT NOT NULL UNIQUE,
                seed INTEGER NOT NULL,
                seats TEXT NOT NULL,
                ready0 INTEGER NOT NULL DEFAULT 0,
                ready1 INTEGER NOT NULL DEFAULT 0,
                started INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                next_sequence INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS actions (
                session_id TEXT NOT NULL,
                sequence_id INTEGER NOT NULL,
                action_id TEXT NOT NULL,
                record TEXT NOT NULL,
                PRIMARY KEY (session_id, sequence_id),
                UNIQUE (session_id, action_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status_updated ON sessions(status, updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(())
    }
}

/// Load one session through any executor (pool or open transaction).
async fn load_session<'e, E>(executor: E, session_id: SessionId) -> Result<SessionDoc, StorageError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query_as::<_, SessionRow>(
        r#"
        SELECT session_id, join_code, seed, seats, ready0, ready1, started, status,
               created_at, next_sequence
        FROM sessions
        WHERE session_id = ?1
        "#,
    )
    .bind(session_id.to_string())
    .fetch_optional(executor)
    .await
    .map_err(StorageError::Database)?;

    match row {
        Some(row) => row.try_into(),
        None => Err(StorageError::SessionNotFound(session_id)),
    }
}

fn decode_entry(session_id: SessionId, sequence_id: i64, record: &str) -> Result<LogEntry, StorageError> {
    LogEntry::from_record(SequenceId::new(sequence_id as u64), record)
        .map_err(|e| corrupt(&session_id.to_string(), e))
}

fn corrupt(session_id: &str, reason: impl std::fmt::Display) -> StorageError {
    StorageError::Corrupt {
        session_id: session_id.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait]
impl ActionStorage for SqliteStorage {
    async fn insert_session(&self, doc: &SessionDoc) -> Result<bool, StorageError> {
        let seats = serde_json::to_string(&doc.seats)
            .map_err(|e| corrupt(&doc.session_id.to_string(), e))?;

        let _guard = self.write_lock.lock().await;
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (session_id, join_code, seed, seats, ready0, ready1, started,
                                  status, created_at, updated_at, next_sequence)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)
            ON CONFLICT(join_code) DO NOTHING
            "#,
        )
        .bind(doc.session_id.to_string())
        .bind(&doc.join_code)
        // Stored bit-for-bit; SQLite integers are signed.
        .bind(doc.seed as i64)
        .bind(seats)
        .bind(doc.ready[0])
        .bind(doc.ready[1])
        .bind(doc.started)
        .bind(doc.status.as_str())
        .bind(doc.created_at as i64)
        .bind(doc.next_sequence.value() as i64)
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_session(&self, session_id: SessionId) -> Result<SessionDoc, StorageError> {
        load_session(&self.pool, session_id).await
    }

    async fn find_by_join_code(&self, code: &str) -> Result<Option<SessionId>, StorageError> {
        let id: Option<String> =
            sqlx::query_scalar("SELECT session_id FROM sessions WHERE join_code = ?1")
                .bind(code)
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        id.map(|id| SessionId::parse(&id).map_err(|e| corrupt(&id, e)))
            .transpose()
    }

    async fn append_action(
        &self,
        session_id: SessionId,
        command: &Command,
        timestamp: u64,
    ) -> Result<Appended, StorageError> {
        let sid = session_id.to_string();
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let existing: Option<(i64, String)> = sqlx::query_as(
            "SELECT sequence_id, record FROM actions WHERE session_id = ?1 AND action_id = ?2",
        )
        .bind(&sid)
        .bind(command.action_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        if let Some((sequence_id, record)) = existing {
            return Ok(Appended {
                entry: decode_entry(session_id, sequence_id, &record)?,
                created: false,
            });
        }

        // Atomic read-and-increment of the session counter
        let assigned: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE sessions
            SET next_sequence = next_sequence + 1, updated_at = ?2
            WHERE session_id = ?1
            RETURNING next_sequence - 1
            "#,
        )
        .bind(&sid)
        .bind(timestamp as i64)
        .fetch_optional(&mut *tx)
        .await
        .map_err(StorageError::Database)?;
        let assigned = assigned.ok_or(StorageError::SessionNotFound(session_id))?;

        let entry = LogEntry {
            sequence_id: SequenceId::new(assigned as u64),
            command: command.clone(),
            timestamp,
        };
        let record = entry.to_record().map_err(|e| corrupt(&sid, e))?;

        sqlx::query(
            r#"
            INSERT INTO actions (session_id, sequence_id, action_id, record)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&sid)
        .bind(assigned)
        .bind(command.action_id.to_string())
        .bind(record)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(Appended {
            entry,
            created: true,
        })
    }

    async fn get_actions_from(
        &self,
        session_id: SessionId,
        from: SequenceId,
    ) -> Result<Vec<LogEntry>, StorageError> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            r#"
            SELECT sequence_id, record
            FROM actions
            WHERE session_id = ?1 AND sequence_id >= ?2
            ORDER BY sequence_id ASC
            "#,
        )
        .bind(session_id.to_string())
        .bind(from.value() as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        rows.iter()
            .map(|(seq, record)| decode_entry(session_id, *seq, record))
            .collect()
    }

    async fn set_seat_ready(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
    ) -> Result<SessionDoc, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let mut doc = load_session(&mut *tx, session_id).await?;
        if doc.mark_ready(player_id) {
            tracing::info!("Session {} started", session_id);
        }

        sqlx::query(
            r#"
            UPDATE sessions
            SET ready0 = ?2, ready1 = ?3, started = ?4, status = ?5, updated_at = ?6
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id.to_string())
        .bind(doc.ready[0])
        .bind(doc.ready[1])
        .bind(doc.started)
        .bind(doc.status.as_str())
        .bind(now_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;
        Ok(doc)
    }

    async fn update_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
    ) -> Result<SessionDoc, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let result = sqlx::query(
            "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
        )
        .bind(session_id.to_string())
        .bind(status.as_str())
        .bind(now_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::SessionNotFound(session_id));
        }

        let doc = load_session(&mut *tx, session_id).await?;
        tx.commit().await.map_err(StorageError::Database)?;
        Ok(doc)
    }

    async fn delete_stale_sessions(
        &self,
        completed_before: u64,
        idle_before: u64,
    ) -> Result<Vec<SessionId>, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await.map_err(StorageError::Database)?;

        let ids: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT session_id FROM sessions WHERE {STALE_SESSIONS}"
        ))
        .bind(completed_before as i64)
        .bind(idle_before as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        // Delete entries using subquery (avoids N+1)
        sqlx::query(&format!(
            "DELETE FROM actions WHERE session_id IN (SELECT session_id FROM sessions WHERE {STALE_SESSIONS})"
        ))
        .bind(completed_before as i64)
        .bind(idle_before as i64)
        .execute(&mut *tx)
        .await
        .map_err(StorageError::Database)?;

        sqlx::query(&format!("DELETE FROM sessions WHERE {STALE_SESSIONS}"))
            .bind(completed_before as i64)
            .bind(idle_before as i64)
            .execute(&mut *tx)
            .await
            .map_err(StorageError::Database)?;

        tx.commit().await.map_err(StorageError::Database)?;

        ids.iter()
            .map(|id| SessionId::parse(id).map_err(|e| corrupt(id, e)))
            .collect()
    }
}

/// Internal row type for SQLite queries.
#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    join_code: String,
    seed: i64,
    seats: String,
    ready0: bool,
    ready1: bool,
    started: bool,
    status: String,
    created_at: i64,
    next_sequence: i64,
}

impl TryFrom<SessionRow> for SessionDoc {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let session_id =
            SessionId::parse(&row.session_id).map_err(|e| corrupt(&row.session_id, e))?;
        let seats: [SeatConfig; 2] =
            serde_json::from_str(&row.seats).map_err(|e| corrupt(&row.session_id, e))?;
        let status = SessionStatus::parse(&row.status)
            .ok_or_else(|| corrupt(&row.session_id, format!("unknown status {:?}", row.status)))?;

        Ok(SessionDoc {
            session_id,
            seed: row.seed as u64,
            join_code: row.join_code,
            seats,
            ready: [row.ready0, row.ready1],
            started: row.started,
            status,
            created_at: row.created_at as u64,
            next_sequence: SequenceId::new(row.next_sequence as u64),
        })
    }
}
