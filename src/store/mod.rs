//! Persistent storage.
//!
//! Async SQLite access through SQLx for the four durable collections:
//! - registered users
//! - one-time invite tokens
//! - signal / broadcast audit log
//! - channel membership event log
//!
//! Every mutation is a single statement, so each record update is atomic on
//! its own; nothing here opens a transaction spanning several records.

mod audit;
mod invites;
mod users;

pub use audit::{
    ChannelEvent, ChannelEventKind, ChannelEventLog, NewSignal, SignalCategory, SignalLog,
    SignalRecord,
};
pub use invites::{InviteError, InviteLedger, InviteSettings, InviteToken, IssuedInvite};
pub use users::{NewUser, UserRecord, UserRepository, UserStats};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::info;

static MEMDB_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Open (or create) the database at `path` and apply migrations.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let pool = if path == ":memory:" {
            // Each in-memory handle gets its own shared-cache name so parallel
            // tests never see each other's rows.
            let id = MEMDB_COUNTER.fetch_add(1, Ordering::Relaxed);
            let memdb_uri = format!(
                "file:relaybot-memdb-{}-{}?mode=memory&cache=shared",
                std::process::id(),
                id
            );

            let options = SqliteConnectOptions::new()
                .filename(&memdb_uri)
                .shared_cache(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(None)
                .connect_with(options)
                .await?
        } else {
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
                    }
                }
            }

            // Applied to every pooled connection. WAL lets readers proceed
            // while a broadcast is writing.
            let options = SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        info!("Database migrations checked/applied");
        Ok(())
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get signal / broadcast audit log.
    pub fn signals(&self) -> SignalLog<'_> {
        SignalLog::new(&self.pool)
    }

    /// Get channel event audit log.
    pub fn channel_events(&self) -> ChannelEventLog<'_> {
        ChannelEventLog::new(&self.pool)
    }
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// SQLite stores integers as i64; timestamps never get near the sign bit.
pub(crate) fn to_db_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_time(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_databases_are_isolated() {
        let a = Database::open(":memory:").await.unwrap();
        let b = Database::open(":memory:").await.unwrap();

        sqlx::query(
            "INSERT INTO channel_events (user_id, kind, occurred_at, detail) VALUES (1, 'joined', 0, '')",
        )
        .execute(a.pool())
        .await
        .unwrap();

        assert_eq!(a.channel_events().count().await.unwrap(), 1);
        assert_eq!(b.channel_events().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_database_survives_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data").join("relay.db");
        let path = path.to_string_lossy().to_string();

        {
            let db = Database::open(&path).await.unwrap();
            db.channel_events()
                .append(crate::telegram::traits::UserId(5), ChannelEventKind::Joined, "", 10)
                .await
                .unwrap();
        }

        let db = Database::open(&path).await.unwrap();
        assert_eq!(db.channel_events().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_database_pragmas_on_every_connection() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.db").to_string_lossy().to_string();
        let db = Database::open(&path).await.unwrap();

        let mut connections = Vec::new();
        for _ in 0..3 {
            connections.push(db.pool().acquire().await.unwrap());
        }
        for conn in connections.iter_mut() {
            let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(mode, "wal");

            // NORMAL
            let (synchronous,): (i64,) = sqlx::query_as("PRAGMA synchronous")
                .fetch_one(&mut **conn)
                .await
                .unwrap();
            assert_eq!(synchronous, 1);
        }
    }

    #[test]
    fn test_db_time_conversion() {
        assert_eq!(to_db_time(1_700_000_000), 1_700_000_000);
        assert_eq!(from_db_time(-5), 0);
        assert_eq!(to_db_time(u64::MAX), i64::MAX);
    }
}
