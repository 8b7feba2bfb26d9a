//! Run queue database operations.
//!
//! Runs are the persistent state machine behind pipeline execution: created
//! unclaimed, atomically claimed by a worker, finalized with an exit code.

use chrono::Utc;
use sqlx::Row;
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ScanflowDb;

impl ScanflowDb {
    /// Create a new run in the unclaimed (queued) state.
    pub async fn create_run(
        &self,
        project_uuid: &str,
        pipeline: &str,
        description: &str,
    ) -> Result<Run> {
        let run = Run {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: project_uuid.to_string(),
            pipeline: pipeline.to_string(),
            description: description.to_string(),
            created_date: Utc::now(),
            task_id: None,
            task_start_date: None,
            task_end_date: None,
            task_exitcode: None,
            task_output: String::new(),
            task_state_override: None,
            steps_completed: 0,
        };

        sqlx::query(
            r#"
            INSERT INTO sf_runs (uuid, project_uuid, pipeline, description, created_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&run.uuid)
        .bind(&run.project_uuid)
        .bind(&run.pipeline)
        .bind(&run.description)
        .bind(run.created_date)
        .execute(&self.pool)
        .await?;

        Ok(run)
    }

    /// Get a run by uuid.
    pub async fn get_run(&self, uuid: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM sf_runs WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// List all runs for a project, oldest first.
    pub async fn list_runs(&self, project_uuid: &str) -> Result<Vec<Run>> {
        let rows = sqlx::query(
            "SELECT * FROM sf_runs WHERE project_uuid = ? ORDER BY created_date ASC, rowid ASC",
        )
        .bind(project_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_run(row)).collect()
    }

    /// The next run to execute for a project: the earliest-created run with
    /// no task id assigned yet. Strictly FIFO per project.
    pub async fn get_next_run(&self, project_uuid: &str) -> Result<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM sf_runs
            WHERE project_uuid = ? AND task_id IS NULL
            ORDER BY created_date ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(project_uuid)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_run(&row)?)),
            None => Ok(None),
        }
    }

    /// Atomically claim an unclaimed run for execution.
    ///
    /// Returns false when the run does not exist or was already claimed by
    /// another worker.
    pub async fn claim_run(&self, uuid: &str, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE sf_runs
            SET task_id = ?, task_start_date = ?
            WHERE uuid = ? AND task_id IS NULL
            "#,
        )
        .bind(task_id)
        .bind(Utc::now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Claim a previously-executed run again for a resume attempt.
    ///
    /// Clears the terminal fields but keeps the captured output and the
    /// step progress so completed steps are not re-executed.
    pub async fn reclaim_run(&self, uuid: &str, task_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE sf_runs
            SET task_id = ?,
                task_start_date = ?,
                task_end_date = NULL,
                task_exitcode = NULL,
                task_state_override = NULL
            WHERE uuid = ?
            "#,
        )
        .bind(task_id)
        .bind(Utc::now())
        .bind(uuid)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("Run {}", uuid)));
        }
        Ok(())
    }

    /// Append text to a run's captured task output.
    pub async fn append_task_output(&self, uuid: &str, text: &str) -> Result<()> {
        sqlx::query("UPDATE sf_runs SET task_output = task_output || ? WHERE uuid = ?")
            .bind(text)
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Record how many leading pipeline steps have completed.
    pub async fn set_steps_completed(&self, uuid: &str, steps_completed: i64) -> Result<()> {
        sqlx::query("UPDATE sf_runs SET steps_completed = ? WHERE uuid = ?")
            .bind(steps_completed)
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Finalize a run with its exit code (0 = succeeded).
    pub async fn finalize_run(&self, uuid: &str, exitcode: i64) -> Result<()> {
        sqlx::query("UPDATE sf_runs SET task_end_date = ?, task_exitcode = ? WHERE uuid = ?")
            .bind(Utc::now())
            .bind(exitcode)
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Force a run into the stale state. Used by external monitoring when a
    /// worker died without finalizing; the engine never calls this.
    pub async fn mark_run_stale(&self, uuid: &str) -> Result<()> {
        self.set_state_override(uuid, TaskState::Stale).await
    }

    /// Force a run into the terminated state.
    pub async fn mark_run_terminated(&self, uuid: &str) -> Result<()> {
        self.set_state_override(uuid, TaskState::Terminated).await
    }

    async fn set_state_override(&self, uuid: &str, state: TaskState) -> Result<()> {
        let result = sqlx::query("UPDATE sf_runs SET task_state_override = ? WHERE uuid = ?")
            .bind(state.as_str())
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("Run {}", uuid)));
        }
        Ok(())
    }

    /// Per-state run counts for a project.
    pub async fn run_stats(&self, project_uuid: &str) -> Result<RunStats> {
        let runs = self.list_runs(project_uuid).await?;

        let mut stats = RunStats::default();
        for run in &runs {
            stats.total += 1;
            match run.state() {
                TaskState::Unclaimed => stats.unclaimed += 1,
                TaskState::Running => stats.running += 1,
                TaskState::Succeeded => stats.succeeded += 1,
                TaskState::Failed => stats.failed += 1,
                TaskState::Stale => stats.stale += 1,
                TaskState::Terminated => stats.terminated += 1,
            }
        }
        Ok(stats)
    }

    fn row_to_run(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Run> {
        let override_str: Option<String> = row.get("task_state_override");
        let task_state_override = match override_str {
            Some(s) => Some(TaskState::parse(&s).ok_or_else(|| {
                DbError::invalid_state(format!("Unknown task state override: {}", s))
            })?),
            None => None,
        };

        Ok(Run {
            uuid: row.get("uuid"),
            project_uuid: row.get("project_uuid"),
            pipeline: row.get("pipeline"),
            description: row.get("description"),
            created_date: row.get("created_date"),
            task_id: row.get("task_id"),
            task_start_date: row.get("task_start_date"),
            task_end_date: row.get("task_end_date"),
            task_exitcode: row.get("task_exitcode"),
            task_output: row.get("task_output"),
            task_state_override,
            steps_completed: row.get("steps_completed"),
        })
    }
}
