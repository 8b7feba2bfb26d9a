//! Database schema creation for all Scanflow tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::Result;
use crate::ScanflowDb;
use tracing::info;

impl ScanflowDb {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // Enable WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        self.create_project_tables().await?;
        self.create_inventory_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    /// Create project, run and error-log tables
    async fn create_project_tables(&self) -> Result<()> {
        // Projects: one analysis workspace per row
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_projects (
                uuid TEXT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                work_directory TEXT NOT NULL DEFAULT '',
                extra_data TEXT NOT NULL DEFAULT '{}',
                created_date TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Runs: one pipeline execution attempt per row.
        // task_id is NULL until a worker claims the run.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_runs (
                uuid TEXT PRIMARY KEY,
                project_uuid TEXT NOT NULL REFERENCES sf_projects(uuid),
                pipeline TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_date TEXT NOT NULL,
                task_id TEXT,
                task_start_date TEXT,
                task_end_date TEXT,
                task_exitcode INTEGER,
                task_output TEXT NOT NULL DEFAULT '',
                task_state_override TEXT,
                steps_completed INTEGER NOT NULL DEFAULT 0
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Errors raised while persisting project-related entities
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_project_errors (
                uuid TEXT PRIMARY KEY,
                project_uuid TEXT NOT NULL REFERENCES sf_projects(uuid),
                created_date TEXT NOT NULL,
                model TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                message TEXT NOT NULL DEFAULT '',
                traceback TEXT NOT NULL DEFAULT ''
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_project ON sf_runs(project_uuid)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_runs_task_id ON sf_runs(task_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_project_errors_project ON sf_project_errors(project_uuid)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create inventory tables (codebase resources & discovered packages)
    async fn create_inventory_tables(&self) -> Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_codebase_resources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_uuid TEXT NOT NULL REFERENCES sf_projects(uuid),
                path TEXT NOT NULL,
                rootfs_path TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                type TEXT NOT NULL,
                name TEXT NOT NULL DEFAULT '',
                extension TEXT NOT NULL DEFAULT '',
                programming_language TEXT NOT NULL DEFAULT '',
                mime_type TEXT NOT NULL DEFAULT '',
                file_type TEXT NOT NULL DEFAULT '',
                extra_data TEXT NOT NULL DEFAULT '{}',
                copyrights TEXT NOT NULL DEFAULT '[]',
                holders TEXT NOT NULL DEFAULT '[]',
                authors TEXT NOT NULL DEFAULT '[]',
                licenses TEXT NOT NULL DEFAULT '[]',
                license_expressions TEXT NOT NULL DEFAULT '[]',
                emails TEXT NOT NULL DEFAULT '[]',
                urls TEXT NOT NULL DEFAULT '[]',
                UNIQUE(project_uuid, path)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // No uniqueness on package_url fields: the same purl may be
        // discovered by several detection passes.
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_discovered_packages (
                uuid TEXT PRIMARY KEY,
                project_uuid TEXT NOT NULL REFERENCES sf_projects(uuid),
                type TEXT NOT NULL DEFAULT '',
                namespace TEXT NOT NULL DEFAULT '',
                name TEXT NOT NULL DEFAULT '',
                version TEXT NOT NULL DEFAULT '',
                qualifiers TEXT NOT NULL DEFAULT '',
                subpath TEXT NOT NULL DEFAULT '',
                primary_language TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                release_date TEXT NOT NULL DEFAULT '',
                homepage_url TEXT NOT NULL DEFAULT '',
                download_url TEXT NOT NULL DEFAULT '',
                size INTEGER,
                sha1 TEXT NOT NULL DEFAULT '',
                md5 TEXT NOT NULL DEFAULT '',
                bug_tracking_url TEXT NOT NULL DEFAULT '',
                code_view_url TEXT NOT NULL DEFAULT '',
                vcs_url TEXT NOT NULL DEFAULT '',
                copyright TEXT NOT NULL DEFAULT '',
                license_expression TEXT NOT NULL DEFAULT '',
                declared_license TEXT NOT NULL DEFAULT '',
                notice_text TEXT NOT NULL DEFAULT '',
                keywords TEXT NOT NULL DEFAULT '[]',
                source_packages TEXT NOT NULL DEFAULT '[]',
                missing_resources TEXT NOT NULL DEFAULT '[]',
                modified_resources TEXT NOT NULL DEFAULT '[]'
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Many-to-many: a package may span many resources, a resource may
        // belong to many packages (nested/vendored packages).
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS sf_resource_packages (
                resource_id INTEGER NOT NULL REFERENCES sf_codebase_resources(id),
                package_uuid TEXT NOT NULL REFERENCES sf_discovered_packages(uuid),
                UNIQUE(resource_id, package_uuid)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resources_project ON sf_codebase_resources(project_uuid)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resources_status ON sf_codebase_resources(status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_packages_project ON sf_discovered_packages(project_uuid)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_resource_packages_package ON sf_resource_packages(package_uuid)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
