//! Project error log operations.
//!
//! Failed inventory writes land here as queryable records instead of
//! aborting the pipeline run that triggered them.

use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ScanflowDb;

impl ScanflowDb {
    /// Persist a ProjectError record.
    pub async fn record_error(&self, error: &ProjectError) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sf_project_errors (uuid, project_uuid, created_date, model, details, message, traceback)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&error.uuid)
        .bind(&error.project_uuid)
        .bind(error.created_date)
        .bind(&error.model)
        .bind(serde_json::to_string(&error.details)?)
        .bind(&error.message)
        .bind(&error.traceback)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Build and persist a ProjectError describing a failed save of a
    /// `model` entity, returning the stored record.
    pub async fn record_failed_save(
        &self,
        project_uuid: &str,
        model: &str,
        details: Value,
        err: &DbError,
    ) -> Result<ProjectError> {
        let error = ProjectError {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: project_uuid.to_string(),
            created_date: Utc::now(),
            model: model.to_string(),
            details,
            message: err.to_string(),
            traceback: format_error_chain(err),
        };
        self.record_error(&error).await?;
        Ok(error)
    }

    /// List all errors recorded for a project, oldest first.
    pub async fn list_errors(&self, project_uuid: &str) -> Result<Vec<ProjectError>> {
        let rows = sqlx::query(
            "SELECT * FROM sf_project_errors WHERE project_uuid = ? ORDER BY created_date ASC, rowid ASC",
        )
        .bind(project_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_error(row)).collect()
    }

    fn row_to_error(&self, row: &sqlx::sqlite::SqliteRow) -> Result<ProjectError> {
        let details: String = row.get("details");

        Ok(ProjectError {
            uuid: row.get("uuid"),
            project_uuid: row.get("project_uuid"),
            created_date: row.get("created_date"),
            model: row.get("model"),
            details: serde_json::from_str(&details)?,
            message: row.get("message"),
            traceback: row.get("traceback"),
        })
    }
}

/// Render an error and its source chain, one frame per line. Stands in for
/// the stack trace recorded on ProjectError.
fn format_error_chain(err: &dyn std::error::Error) -> String {
    let mut out = format!("{}\n", err);
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(&format!("caused by: {}\n", cause));
        source = cause.source();
    }
    out
}
