//! Database connection and pool management.

use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use serde::Deserialize;
use sqlx::any::{AnyConnectOptions, AnyPoolOptions};
use sqlx::pool::PoolConnectionMetadata;
use sqlx::{AnyConnection, AnyPool, Executor};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// Embedded migrations that are run automatically on connect.
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Connection-level settings for SQLite that the URL can't express.
const SQLITE_PRAGMAS: &str = r#"
    PRAGMA foreign_keys = ON;
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA busy_timeout = 1500;
    PRAGMA temp_store = MEMORY;
"#;

/// Relational engine backing the metadata store, chosen at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Driver {
    Sqlite,
    Postgres,
}

impl FromStr for Driver {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            _ => exn::bail!(ErrorKind::UnsupportedDriver(s.to_string())),
        }
    }
}
impl TryFrom<String> for Driver {
    type Error = ErrorKind;
    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse().map_err(|_| ErrorKind::UnsupportedDriver(value))
    }
}

impl Driver {
    /// Turn a configured DSN into a connection URL for this driver.
    ///
    /// SQLite also accepts a bare file path, which is created if missing.
    fn url(self, dsn: &str) -> Result<String> {
        let dsn = dsn.trim();
        match self {
            Self::Sqlite if dsn.starts_with("sqlite:") => Ok(dsn.to_string()),
            Self::Sqlite if !dsn.is_empty() => Ok(format!("sqlite://{dsn}?mode=rwc")),
            Self::Postgres if dsn.starts_with("postgres://") || dsn.starts_with("postgresql://") => {
                Ok(dsn.to_string())
            },
            Self::Sqlite => exn::bail!(ErrorKind::InvalidDsn("sqlite")),
            Self::Postgres => exn::bail!(ErrorKind::InvalidDsn("postgres")),
        }
    }
}

/// Connection pool bounds.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_open: u32,
    /// Connections kept open while idle.
    pub min_idle: u32,
    pub max_lifetime: Option<Duration>,
}
impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_open: 10,
            min_idle: 2,
            max_lifetime: Some(Duration::from_secs(3600)),
        }
    }
}

/// Database connection pool for the metadata store.
///
/// This is the main entry point for interacting with the relational store.
/// It manages the connection pool; queries live in [`Repository`](crate::Repository).
#[derive(Debug, Clone)]
pub struct Database {
    pool: AnyPool,
    driver: Driver,
}

impl Database {
    async fn new(driver: Driver, url: &str, options: AnyPoolOptions) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let connect_options = AnyConnectOptions::from_str(url).or_raise(|| ErrorKind::Database)?;
        let pool = options
            // Applied to EVERY connection the pool opens, not just the first.
            .after_connect(|conn, meta| Box::pin(async move { Self::apply_pragmas(conn, meta).await }))
            .connect_with(connect_options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool, driver };
        db.migrate().await?;
        Ok(db)
    }

    /// Connect to the configured database and run migrations.
    pub async fn connect(driver: Driver, dsn: &str, settings: &PoolSettings) -> Result<Self> {
        let url = driver.url(dsn)?;
        let options = AnyPoolOptions::new()
            .max_connections(settings.max_open.max(1))
            .min_connections(settings.min_idle.min(settings.max_open))
            .max_lifetime(settings.max_lifetime);
        tracing::debug!(?driver, "connecting to metadata database");
        Self::new(driver, &url, options).await
    }

    /// Connect to an in-memory SQLite database (useful for testing).
    ///
    /// Note:
    /// - In-memory databases are destroyed when the connection closes.
    /// - Do NOT apply `#[cfg(test)]` so that other crates can also use this in their tests.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection would see its own empty database, so there must be
        // exactly one, and it must never be recycled.
        let options = AnyPoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>);
        Self::new(Driver::Sqlite, "sqlite::memory:", options).await
    }

    async fn apply_pragmas(conn: &mut AnyConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        if conn.backend_name() == "SQLite" {
            conn.execute(SQLITE_PRAGMAS).await?;
        }
        Ok(())
    }

    /// Run database migrations.
    ///
    /// This is called automatically by `connect` and `connect_in_memory`.
    #[instrument("performing database migrations", skip(self), fields(driver = ?self.driver))]
    async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn driver(&self) -> Driver {
        self.driver
    }

    /// Close the database connection pool.
    ///
    /// Waits for all connections to be returned to the pool and then closes
    /// them. The Database instance should not be used afterwards.
    pub async fn close(&self) {
        if self.driver == Driver::Sqlite {
            // Let SQLite update query planner statistics
            _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        }
        self.pool.close().await;
    }
}
