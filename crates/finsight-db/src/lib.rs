//! # finsight-db
//!
//! PostgreSQL persistence and blob storage for the finsight report pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - The `PgReportRepository` implementation of `ReportRepository`, including
//!   lease-based claiming with `FOR UPDATE SKIP LOCKED`
//! - Filesystem blob storage for uploads and artifacts
//! - In-memory repository/store implementations for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use finsight_db::Database;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/finsight").await?;
//!     let report = db.reports.get(report_id).await?;
//!     Ok(())
//! }
//! ```

pub mod blob;
pub mod memory;
pub mod pool;
pub mod reports;

// Re-export core types
pub use finsight_core::*;

pub use blob::{compute_content_hash, FilesystemBlobStore};
pub use memory::{InMemoryBlobStore, InMemoryReportRepository};
pub use pool::{create_pool, create_pool_with_config, log_pool_metrics, PoolConfig};
pub use reports::PgReportRepository;

/// Combined database context.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Report repository.
    pub reports: PgReportRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            reports: PgReportRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
