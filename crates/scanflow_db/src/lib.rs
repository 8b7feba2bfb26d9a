//! Database layer for Scanflow.
//!
//! This crate is the single source of truth for persisted Scanflow state:
//! projects, pipeline runs, the codebase resource / discovered package
//! inventory, and the project error log.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scanflow_db::{ScanflowDb, Result};
//!
//! let db = ScanflowDb::open("~/.scanflow/scanflow.sqlite3").await?;
//!
//! // Run queue operations
//! let next = db.get_next_run(&project.uuid).await?;
//!
//! // Inventory operations
//! let unscanned = db.resources_no_status(&project.uuid).await?;
//! ```

mod error;
mod schema;
mod types;

pub mod purl;

// Method implementations organized by domain
mod error_log;
mod inventory;
mod project;
mod run;

pub use error::{DbError, Result};
pub use inventory::SaveOutcome;
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Unified database handle for all Scanflow operations.
///
/// This is the ONLY way to access the database. Do not use raw sqlx elsewhere.
#[derive(Clone)]
pub struct ScanflowDb {
    pool: SqlitePool,
}

impl ScanflowDb {
    /// Open or create a database at the given path.
    ///
    /// Creates all tables if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");

        Ok(db)
    }

    /// Open an existing database (fails if not exists).
    pub async fn open_existing(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(DbError::NotFound(format!(
                "Database not found: {}",
                path.display()
            )));
        }

        let url = format!("sqlite:{}?mode=rw", path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        Ok(Self { pool })
    }

    /// Open an in-memory database. Single connection, state lives as long
    /// as the pool.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        Ok(db)
    }

    /// Get the underlying connection pool (escape hatch for complex queries).
    ///
    /// Prefer using the typed methods instead.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("test.db");

        let db = ScanflowDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());

        db.close().await;
    }

    #[tokio::test]
    async fn test_open_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("test.db");

        let db = ScanflowDb::open(&db_path).await.unwrap();
        db.close().await;

        // Re-opening runs schema creation again without error
        let db = ScanflowDb::open(&db_path).await.unwrap();
        db.close().await;
    }

    #[tokio::test]
    async fn test_open_existing_fails_if_not_exists() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nonexistent.db");

        let result = ScanflowDb::open_existing(&db_path).await;
        assert!(result.is_err());
    }
}
