//! # corvid-db
//!
//! SQLite storage layer for the corvid corpus engine. Implements the
//! repository traits from `corvid-core` and bundles them behind [`Database`].

pub mod audit;
pub mod corpus;
pub mod jobs;
pub mod pool;
pub mod throttle;

pub use audit::SqliteAuditRepository;
pub use corpus::SqliteCorpusRepository;
pub use jobs::SqliteJobRepository;
pub use pool::{create_memory_pool, create_pool, PoolConfig};
pub use throttle::SqliteThrottleRepository;

use sqlx::SqlitePool;

use corvid_core::{Error, Result};

/// Database handle bundling all repositories over a shared pool.
pub struct Database {
    pool: SqlitePool,
    pub jobs: SqliteJobRepository,
    pub corpus: SqliteCorpusRepository,
    pub throttle: SqliteThrottleRepository,
    pub audits: SqliteAuditRepository,
}

impl Database {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            jobs: SqliteJobRepository::new(pool.clone()),
            corpus: SqliteCorpusRepository::new(pool.clone()),
            throttle: SqliteThrottleRepository::new(pool.clone()),
            audits: SqliteAuditRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect to a SQLite database URL and run pending migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = pool::create_pool(url, PoolConfig::default()).await?;
        let db = Self::new(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// Fresh in-memory database with migrations applied, for tests.
    pub async fn connect_in_memory() -> Result<Self> {
        let pool = pool::create_memory_pool().await?;
        let db = Self::new(pool);
        db.migrate().await?;
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        tracing::debug!(
            subsystem = "database",
            component = "migrate",
            "migrations applied"
        );
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
