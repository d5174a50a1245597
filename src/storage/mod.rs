//! SQLite persistence for responders, schedules, and tasks.
//!
//! [`Storage`] wraps an `sqlx` pool and is cheap to clone. Queries are grouped
//! by entity in submodules, each adding an `impl Storage` block. Rows are
//! mapped by hand so that malformed values surface as
//! [`StorageError::InvalidValue`] rather than panics.

mod responders;
mod schedules;
mod schema;
mod tasks;

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let storage = Storage { pool };
        storage.initialize_schema().await?;
        info!(path = %path.display(), "Opened database");
        Ok(storage)
    }

    /// A private in-memory database on a single long-lived connection.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // Every connection to :memory: is a separate database, so pin to one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let storage = Storage { pool };
        storage.initialize_schema().await?;
        Ok(storage)
    }

    async fn initialize_schema(&self) -> Result<()> {
        for stmt in schema::STATEMENTS {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        debug!(statements = schema::STATEMENTS.len(), "Schema initialized");
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Closes every pooled connection. Later queries fail.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database");
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}

fn to_index(value: i64, column: &'static str) -> Result<usize> {
    usize::try_from(value).map_err(|_| StorageError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

fn parse_column<T: FromStr>(value: String, column: &'static str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StorageError::InvalidValue { column, value })
}
