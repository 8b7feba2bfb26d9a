//! Project database operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ScanflowDb;
use sqlx::Row;

impl ScanflowDb {
    /// Persist a new project record.
    ///
    /// The caller owns id allocation and work-directory setup (see the
    /// engine crate's workspace module); this only writes the record. A
    /// name collision maps to [`DbError::DuplicateName`].
    pub async fn insert_project(&self, project: &Project) -> Result<()> {
        let extra_data = serde_json::to_string(&project.extra_data)?;

        let result = sqlx::query(
            r#"
            INSERT INTO sf_projects (uuid, name, work_directory, extra_data, created_date)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&project.uuid)
        .bind(&project.name)
        .bind(&project.work_directory)
        .bind(&extra_data)
        .bind(project.created_date)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let err = DbError::from(err);
                if err.is_unique_violation() {
                    return Err(DbError::DuplicateName(project.name.clone()));
                }
                Err(err)
            }
        }
    }

    /// Get a project by uuid.
    pub async fn get_project(&self, uuid: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM sf_projects WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_project(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a project by its unique name.
    pub async fn get_project_by_name(&self, name: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT * FROM sf_projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_project(&row)?)),
            None => Ok(None),
        }
    }

    /// List all projects, most recent first.
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM sf_projects ORDER BY created_date DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| self.row_to_project(row)).collect()
    }

    /// Replace a project's extensible metadata mapping.
    pub async fn update_project_extra_data(&self, uuid: &str, extra_data: &JsonMap) -> Result<()> {
        let encoded = serde_json::to_string(extra_data)?;

        let result = sqlx::query("UPDATE sf_projects SET extra_data = ? WHERE uuid = ?")
            .bind(&encoded)
            .bind(uuid)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("Project {}", uuid)));
        }
        Ok(())
    }

    fn row_to_project(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Project> {
        let extra_data: String = row.get("extra_data");

        Ok(Project {
            uuid: row.get("uuid"),
            name: row.get("name"),
            work_directory: row.get("work_directory"),
            extra_data: serde_json::from_str(&extra_data)?,
            created_date: row.get("created_date"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_get_project() {
        let db = ScanflowDb::open_in_memory().await.unwrap();

        let project = Project::new("acme", "/workspace/projects/acme-12345678");
        db.insert_project(&project).await.unwrap();

        let fetched = db.get_project(&project.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.name, "acme");
        assert_eq!(fetched.work_directory, project.work_directory);

        let by_name = db.get_project_by_name("acme").await.unwrap().unwrap();
        assert_eq!(by_name.uuid, project.uuid);
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let db = ScanflowDb::open_in_memory().await.unwrap();

        db.insert_project(&Project::new("acme", "/w/acme-1")).await.unwrap();
        let err = db
            .insert_project(&Project::new("acme", "/w/acme-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateName(name) if name == "acme"));
    }

    #[tokio::test]
    async fn test_update_extra_data() {
        let db = ScanflowDb::open_in_memory().await.unwrap();

        let project = Project::new("acme", "/w/acme-1");
        db.insert_project(&project).await.unwrap();

        let mut extra = JsonMap::new();
        extra.insert("resources".to_string(), serde_json::json!(42));
        db.update_project_extra_data(&project.uuid, &extra)
            .await
            .unwrap();

        let fetched = db.get_project(&project.uuid).await.unwrap().unwrap();
        assert_eq!(fetched.extra_data, extra);

        let missing = db.update_project_extra_data("no-such-uuid", &extra).await;
        assert!(matches!(missing, Err(DbError::NotFound(_))));
    }
}
