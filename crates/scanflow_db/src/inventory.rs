//! Inventory database operations (codebase resources & discovered packages).

use sqlx::Row;

use crate::error::{DbError, Result};
use crate::types::*;
use crate::ScanflowDb;

/// Outcome of an error-capturing save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The entity was written
    Saved,
    /// The write failed; a ProjectError was recorded and the failure was
    /// swallowed so a bulk import can continue
    ErrorLogged,
}

impl ScanflowDb {
    // ========================================================================
    // Codebase resource operations
    // ========================================================================

    /// Insert a resource, returning its new row id.
    ///
    /// The (project, path) pair is unique; a second insert for the same
    /// path maps to [`DbError::Constraint`].
    pub async fn create_resource(&self, resource: &CodebaseResource) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO sf_codebase_resources (
                project_uuid, path, rootfs_path, status, type, name, extension,
                programming_language, mime_type, file_type, extra_data,
                copyrights, holders, authors, licenses, license_expressions,
                emails, urls
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.project_uuid)
        .bind(&resource.path)
        .bind(&resource.rootfs_path)
        .bind(&resource.status)
        .bind(resource.resource_type.as_str())
        .bind(&resource.name)
        .bind(&resource.extension)
        .bind(&resource.programming_language)
        .bind(&resource.mime_type)
        .bind(&resource.file_type)
        .bind(serde_json::to_string(&resource.extra_data)?)
        .bind(serde_json::to_string(&resource.copyrights)?)
        .bind(serde_json::to_string(&resource.holders)?)
        .bind(serde_json::to_string(&resource.authors)?)
        .bind(serde_json::to_string(&resource.licenses)?)
        .bind(serde_json::to_string(&resource.license_expressions)?)
        .bind(serde_json::to_string(&resource.emails)?)
        .bind(serde_json::to_string(&resource.urls)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.last_insert_rowid()),
            Err(err) => {
                let err = DbError::from(err);
                if err.is_unique_violation() {
                    return Err(DbError::constraint(format!(
                        "Resource already exists for path: {}",
                        resource.path
                    )));
                }
                Err(err)
            }
        }
    }

    /// Update a previously-persisted resource in place.
    pub async fn update_resource(&self, resource: &CodebaseResource) -> Result<()> {
        let id = resource
            .id
            .ok_or_else(|| DbError::invalid_state("Resource was never persisted"))?;

        let result = sqlx::query(
            r#"
            UPDATE sf_codebase_resources SET
                rootfs_path = ?, status = ?, type = ?, name = ?, extension = ?,
                programming_language = ?, mime_type = ?, file_type = ?,
                extra_data = ?, copyrights = ?, holders = ?, authors = ?,
                licenses = ?, license_expressions = ?, emails = ?, urls = ?
            WHERE id = ?
            "#,
        )
        .bind(&resource.rootfs_path)
        .bind(&resource.status)
        .bind(resource.resource_type.as_str())
        .bind(&resource.name)
        .bind(&resource.extension)
        .bind(&resource.programming_language)
        .bind(&resource.mime_type)
        .bind(&resource.file_type)
        .bind(serde_json::to_string(&resource.extra_data)?)
        .bind(serde_json::to_string(&resource.copyrights)?)
        .bind(serde_json::to_string(&resource.holders)?)
        .bind(serde_json::to_string(&resource.authors)?)
        .bind(serde_json::to_string(&resource.licenses)?)
        .bind(serde_json::to_string(&resource.license_expressions)?)
        .bind(serde_json::to_string(&resource.emails)?)
        .bind(serde_json::to_string(&resource.urls)?)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("Resource id {}", id)));
        }
        Ok(())
    }

    /// Save a resource, converting any failure into a ProjectError record.
    ///
    /// Inserts when the resource has no id yet (setting it on success),
    /// updates otherwise. A failed write never propagates: it is captured
    /// under the resource's project and `ErrorLogged` is returned so bulk
    /// imports keep going.
    pub async fn save_resource(&self, resource: &mut CodebaseResource) -> Result<SaveOutcome> {
        let result = match resource.id {
            Some(_) => self.update_resource(resource).await,
            None => match self.create_resource(resource).await {
                Ok(id) => {
                    resource.id = Some(id);
                    Ok(())
                }
                Err(err) => Err(err),
            },
        };

        match result {
            Ok(()) => Ok(SaveOutcome::Saved),
            Err(err) => self.log_failed_save(resource, &err).await,
        }
    }

    /// Get a resource by its (project, path) identity.
    pub async fn get_resource(
        &self,
        project_uuid: &str,
        path: &str,
    ) -> Result<Option<CodebaseResource>> {
        let row = sqlx::query(
            "SELECT * FROM sf_codebase_resources WHERE project_uuid = ? AND path = ?",
        )
        .bind(project_uuid)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_resource(&row)?)),
            None => Ok(None),
        }
    }

    /// List all resources of a project, ordered by path.
    pub async fn list_resources(&self, project_uuid: &str) -> Result<Vec<CodebaseResource>> {
        let rows = sqlx::query(
            "SELECT * FROM sf_codebase_resources WHERE project_uuid = ? ORDER BY path",
        )
        .bind(project_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_resource(row)).collect()
    }

    /// Resources carrying exactly the given analysis status.
    pub async fn resources_with_status(
        &self,
        project_uuid: &str,
        status: &str,
    ) -> Result<Vec<CodebaseResource>> {
        let rows = sqlx::query(
            "SELECT * FROM sf_codebase_resources WHERE project_uuid = ? AND status = ? ORDER BY path",
        )
        .bind(project_uuid)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_resource(row)).collect()
    }

    /// Resources not yet analyzed (empty status), for pipelines that
    /// process unscanned resources incrementally.
    pub async fn resources_no_status(&self, project_uuid: &str) -> Result<Vec<CodebaseResource>> {
        self.resources_with_status(project_uuid, "").await
    }

    // ========================================================================
    // Discovered package operations
    // ========================================================================

    /// Create and persist a package for `project_uuid` from an untyped data
    /// mapping, normalizing qualifiers and dropping unrecognized or empty
    /// fields. No duplicate check is performed.
    pub async fn create_package_from_data(
        &self,
        project_uuid: &str,
        package_data: JsonMap,
    ) -> Result<DiscoveredPackage> {
        let package = DiscoveredPackage::from_data(project_uuid, package_data);
        self.insert_package(&package).await?;
        Ok(package)
    }

    /// Create a package from `package_data` under the resource's project
    /// and associate it with the resource.
    pub async fn create_package_for_resource(
        &self,
        package_data: JsonMap,
        resource: &CodebaseResource,
    ) -> Result<DiscoveredPackage> {
        let resource_id = resource
            .id
            .ok_or_else(|| DbError::invalid_state("Resource was never persisted"))?;

        let package = self
            .create_package_from_data(&resource.project_uuid, package_data)
            .await?;
        self.relate_resource_package(resource_id, &package.uuid)
            .await?;
        Ok(package)
    }

    /// Save a package, converting any failure into a ProjectError record.
    pub async fn save_package(&self, package: &DiscoveredPackage) -> Result<SaveOutcome> {
        match self.insert_package(package).await {
            Ok(()) => Ok(SaveOutcome::Saved),
            Err(err) => self.log_failed_save(package, &err).await,
        }
    }

    /// Get a package by uuid.
    pub async fn get_package(&self, uuid: &str) -> Result<Option<DiscoveredPackage>> {
        let row = sqlx::query("SELECT * FROM sf_discovered_packages WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(self.row_to_package(&row)?)),
            None => Ok(None),
        }
    }

    /// List all packages of a project.
    pub async fn list_packages(&self, project_uuid: &str) -> Result<Vec<DiscoveredPackage>> {
        let rows = sqlx::query(
            "SELECT * FROM sf_discovered_packages WHERE project_uuid = ? ORDER BY uuid",
        )
        .bind(project_uuid)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_package(row)).collect()
    }

    /// Associate a resource with a package (idempotent).
    pub async fn relate_resource_package(
        &self,
        resource_id: i64,
        package_uuid: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO sf_resource_packages (resource_id, package_uuid) VALUES (?, ?)",
        )
        .bind(resource_id)
        .bind(package_uuid)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// String identities (package URL or uuid) of every package associated
    /// with a resource. For display and debugging, not identity.
    pub async fn packages_for_resource(&self, resource_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT p.* FROM sf_discovered_packages p
            JOIN sf_resource_packages rp ON rp.package_uuid = p.uuid
            WHERE rp.resource_id = ?
            ORDER BY p.uuid
            "#,
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| self.row_to_package(row).map(|p| p.to_string()))
            .collect()
    }

    /// Paths of every resource associated with a package.
    pub async fn resources_for_package(&self, package_uuid: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT r.path FROM sf_codebase_resources r
            JOIN sf_resource_packages rp ON rp.resource_id = r.id
            WHERE rp.package_uuid = ?
            ORDER BY r.path
            "#,
        )
        .bind(package_uuid)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("path")).collect())
    }

    // ========================================================================
    // Shared plumbing
    // ========================================================================

    /// Record a failed save as a ProjectError under the entity's project.
    async fn log_failed_save<E: ProjectScoped>(
        &self,
        entity: &E,
        err: &DbError,
    ) -> Result<SaveOutcome> {
        self.record_failed_save(
            entity.project_uuid(),
            E::MODEL_NAME,
            entity.detail_snapshot(),
            err,
        )
        .await?;
        Ok(SaveOutcome::ErrorLogged)
    }

    async fn insert_package(&self, package: &DiscoveredPackage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sf_discovered_packages (
                uuid, project_uuid, type, namespace, name, version, qualifiers,
                subpath, primary_language, description, release_date,
                homepage_url, download_url, size, sha1, md5, bug_tracking_url,
                code_view_url, vcs_url, copyright, license_expression,
                declared_license, notice_text, keywords, source_packages,
                missing_resources, modified_resources
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&package.uuid)
        .bind(&package.project_uuid)
        .bind(&package.package_type)
        .bind(&package.namespace)
        .bind(&package.name)
        .bind(&package.version)
        .bind(&package.qualifiers)
        .bind(&package.subpath)
        .bind(&package.primary_language)
        .bind(&package.description)
        .bind(&package.release_date)
        .bind(&package.homepage_url)
        .bind(&package.download_url)
        .bind(package.size)
        .bind(&package.sha1)
        .bind(&package.md5)
        .bind(&package.bug_tracking_url)
        .bind(&package.code_view_url)
        .bind(&package.vcs_url)
        .bind(&package.copyright)
        .bind(&package.license_expression)
        .bind(&package.declared_license)
        .bind(&package.notice_text)
        .bind(serde_json::to_string(&package.keywords)?)
        .bind(serde_json::to_string(&package.source_packages)?)
        .bind(serde_json::to_string(&package.missing_resources)?)
        .bind(serde_json::to_string(&package.modified_resources)?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_resource(&self, row: &sqlx::sqlite::SqliteRow) -> Result<CodebaseResource> {
        let type_str: String = row.get("type");
        let resource_type = ResourceType::parse(&type_str)
            .ok_or_else(|| DbError::invalid_state(format!("Unknown resource type: {}", type_str)))?;

        Ok(CodebaseResource {
            id: row.get("id"),
            project_uuid: row.get("project_uuid"),
            path: row.get("path"),
            rootfs_path: row.get("rootfs_path"),
            status: row.get("status"),
            resource_type,
            name: row.get("name"),
            extension: row.get("extension"),
            programming_language: row.get("programming_language"),
            mime_type: row.get("mime_type"),
            file_type: row.get("file_type"),
            extra_data: json_column(row, "extra_data")?,
            copyrights: json_column(row, "copyrights")?,
            holders: json_column(row, "holders")?,
            authors: json_column(row, "authors")?,
            licenses: json_column(row, "licenses")?,
            license_expressions: json_column(row, "license_expressions")?,
            emails: json_column(row, "emails")?,
            urls: json_column(row, "urls")?,
        })
    }

    fn row_to_package(&self, row: &sqlx::sqlite::SqliteRow) -> Result<DiscoveredPackage> {
        Ok(DiscoveredPackage {
            uuid: row.get("uuid"),
            project_uuid: row.get("project_uuid"),
            package_type: row.get("type"),
            namespace: row.get("namespace"),
            name: row.get("name"),
            version: row.get("version"),
            qualifiers: row.get("qualifiers"),
            subpath: row.get("subpath"),
            primary_language: row.get("primary_language"),
            description: row.get("description"),
            release_date: row.get("release_date"),
            homepage_url: row.get("homepage_url"),
            download_url: row.get("download_url"),
            size: row.get("size"),
            sha1: row.get("sha1"),
            md5: row.get("md5"),
            bug_tracking_url: row.get("bug_tracking_url"),
            code_view_url: row.get("code_view_url"),
            vcs_url: row.get("vcs_url"),
            copyright: row.get("copyright"),
            license_expression: row.get("license_expression"),
            declared_license: row.get("declared_license"),
            notice_text: row.get("notice_text"),
            keywords: json_column(row, "keywords")?,
            source_packages: json_column(row, "source_packages")?,
            missing_resources: json_column(row, "missing_resources")?,
            modified_resources: json_column(row, "modified_resources")?,
        })
    }
}

fn json_column<T: serde::de::DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<T> {
    let raw: String = row.get(column);
    Ok(serde_json::from_str(&raw)?)
}
