//! Entity types for all Scanflow database records.
//!
//! These types are the single source of truth. The engine crate and any
//! presentation layer should use these types.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::purl;

/// JSON object mapping used for extensible metadata and scan-result input.
pub type JsonMap = serde_json::Map<String, Value>;

// ============================================================================
// Project
// ============================================================================

/// One analysis workspace. Multiple pipelines can be run on a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier (UUID v4, stored as text)
    pub uuid: String,
    /// Globally unique human name
    pub name: String,
    /// Work directory location on disk
    pub work_directory: String,
    /// Free-form extensible metadata
    pub extra_data: JsonMap,
    pub created_date: DateTime<Utc>,
}

impl Project {
    pub fn new(name: &str, work_directory: &str) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            name: name.to_string(),
            work_directory: work_directory.to_string(),
            extra_data: JsonMap::new(),
            created_date: Utc::now(),
        }
    }

    /// First 8 characters of the uuid, used in the work directory name.
    pub fn short_uuid(&self) -> &str {
        &self.uuid[..8]
    }

    pub fn work_path(&self) -> PathBuf {
        PathBuf::from(&self.work_directory)
    }
}

impl std::fmt::Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ============================================================================
// Run / task state
// ============================================================================

/// Derived state of a pipeline run.
///
/// `Stale` and `Terminated` are never set by the engine itself, only by
/// external callers observing a dead worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskState {
    Unclaimed,
    Running,
    Succeeded,
    Failed,
    Stale,
    Terminated,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unclaimed => "UNCLAIMED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Stale => "STALE",
            Self::Terminated => "TERMINATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UNCLAIMED" => Some(Self::Unclaimed),
            "RUNNING" => Some(Self::Running),
            "SUCCEEDED" => Some(Self::Succeeded),
            "FAILED" => Some(Self::Failed),
            "STALE" => Some(Self::Stale),
            "TERMINATED" => Some(Self::Terminated),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One execution attempt of a named pipeline against a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub uuid: String,
    pub project_uuid: String,
    /// Pipeline name, resolved through the pipeline registry
    pub pipeline: String,
    /// Pipeline description snapshotted at creation time
    pub description: String,
    pub created_date: DateTime<Utc>,
    /// Worker-assigned task identifier; NULL while queued
    pub task_id: Option<String>,
    pub task_start_date: Option<DateTime<Utc>>,
    pub task_end_date: Option<DateTime<Utc>>,
    pub task_exitcode: Option<i64>,
    /// Captured stdout/stderr-style output, incrementally appended
    pub task_output: String,
    /// External force override (stale/terminated), wins over derivation
    pub task_state_override: Option<TaskState>,
    /// Number of leading pipeline steps recorded as completed
    pub steps_completed: i64,
}

impl Run {
    /// Derive the task state from the recorded fields.
    pub fn state(&self) -> TaskState {
        if let Some(forced) = self.task_state_override {
            return forced;
        }
        if self.task_end_date.is_some() {
            if self.task_succeeded() {
                return TaskState::Succeeded;
            }
            return TaskState::Failed;
        }
        if self.task_id.is_some() {
            return TaskState::Running;
        }
        TaskState::Unclaimed
    }

    /// A run succeeded iff its recorded exit code is 0.
    pub fn task_succeeded(&self) -> bool {
        self.task_exitcode == Some(0)
    }

    /// Extract the worker-assigned run id from the captured task output.
    ///
    /// Looks for the literal token `run-id ` followed by digits. This is a
    /// diagnostic convenience, not load-bearing for correctness.
    pub fn get_run_id(&self) -> Option<String> {
        let run_id_re = Regex::new(r"run-id [0-9]+").ok()?;
        let found = run_id_re.find(&self.task_output)?;
        found.as_str().split_whitespace().last().map(String::from)
    }
}

impl std::fmt::Display for Run {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pipeline)
    }
}

/// Per-state run counts for a project.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub total: u64,
    pub unclaimed: u64,
    pub running: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stale: u64,
    pub terminated: u64,
}

// ============================================================================
// Codebase resources
// ============================================================================

/// Type of a codebase resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    File,
    Directory,
    Symlink,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Directory => "directory",
            Self::Symlink => "symlink",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "file" => Some(Self::File),
            "directory" => Some(Self::Directory),
            "symlink" => Some(Self::Symlink),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scan-result fields a detector may set on a resource. Fields absent from
/// this list are never touched by `set_scan_results`.
pub const SCAN_FIELD_NAMES: &[&str] = &[
    "copyrights",
    "holders",
    "authors",
    "licenses",
    "license_expressions",
    "emails",
    "urls",
];

/// One filesystem entry (file, directory or symlink) under analysis.
///
/// Unique per (project, path).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodebaseResource {
    pub id: Option<i64>,
    pub project_uuid: String,
    /// Path relative to the codebase root
    pub path: String,
    /// Path relative to some root filesystem root directory. Useful when
    /// working on disk images, docker images, and VM images.
    pub rootfs_path: String,
    /// Analysis status; empty string means "not yet analyzed"
    pub status: String,
    pub resource_type: ResourceType,
    pub name: String,
    pub extension: String,
    pub programming_language: String,
    pub mime_type: String,
    pub file_type: String,
    pub extra_data: JsonMap,
    pub copyrights: Vec<Value>,
    pub holders: Vec<Value>,
    pub authors: Vec<Value>,
    pub licenses: Vec<Value>,
    pub license_expressions: Vec<Value>,
    pub emails: Vec<Value>,
    pub urls: Vec<Value>,
}

impl CodebaseResource {
    /// Build a resource for `path`, deriving name and extension.
    pub fn new(project_uuid: &str, path: &str, resource_type: ResourceType) -> Self {
        let file_path = Path::new(path);
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = match resource_type {
            ResourceType::File => file_path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            // Directories do not have an extension
            _ => String::new(),
        };

        Self {
            id: None,
            project_uuid: project_uuid.to_string(),
            path: path.to_string(),
            rootfs_path: String::new(),
            status: String::new(),
            resource_type,
            name,
            extension,
            programming_language: String::new(),
            mime_type: String::new(),
            file_type: String::new(),
            extra_data: JsonMap::new(),
            copyrights: Vec::new(),
            holders: Vec::new(),
            authors: Vec::new(),
            licenses: Vec::new(),
            license_expressions: Vec::new(),
            emails: Vec::new(),
            urls: Vec::new(),
        }
    }

    /// Location of this resource on disk, under the project codebase root.
    pub fn location(&self, codebase_path: &Path) -> PathBuf {
        codebase_path.join(self.path.trim_start_matches('/'))
    }

    /// Apply detector output to this resource.
    ///
    /// Only recognized scan fields carrying a non-empty value overwrite the
    /// corresponding attribute; everything else is left untouched. The
    /// caller decides whether and when to persist.
    pub fn set_scan_results(&mut self, scan_results: &JsonMap) {
        for field_name in SCAN_FIELD_NAMES {
            let values = match scan_results.get(*field_name).and_then(Value::as_array) {
                Some(values) if !values.is_empty() => values.clone(),
                _ => continue,
            };
            match *field_name {
                "copyrights" => self.copyrights = values,
                "holders" => self.holders = values,
                "authors" => self.authors = values,
                "licenses" => self.licenses = values,
                "license_expressions" => self.license_expressions = values,
                "emails" => self.emails = values,
                "urls" => self.urls = values,
                _ => {}
            }
        }
    }
}

impl std::fmt::Display for CodebaseResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path)
    }
}

// ============================================================================
// Discovered packages
// ============================================================================

/// Package-data fields recognized when constructing a package from an
/// untyped mapping. Unrecognized keys are silently dropped.
pub const PACKAGE_FIELD_NAMES: &[&str] = &[
    "type",
    "namespace",
    "name",
    "version",
    "qualifiers",
    "subpath",
    "primary_language",
    "description",
    "release_date",
    "homepage_url",
    "download_url",
    "size",
    "sha1",
    "md5",
    "bug_tracking_url",
    "code_view_url",
    "vcs_url",
    "copyright",
    "license_expression",
    "declared_license",
    "notice_text",
    "keywords",
    "source_packages",
    "missing_resources",
    "modified_resources",
];

/// One detected software package, identified primarily by its
/// package-URL-shaped fields. No uniqueness is enforced on the purl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPackage {
    pub uuid: String,
    pub project_uuid: String,
    pub package_type: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
    /// Canonical encoded qualifier string, see [`purl::normalize_qualifiers`]
    pub qualifiers: String,
    pub subpath: String,
    pub primary_language: String,
    pub description: String,
    pub release_date: String,
    pub homepage_url: String,
    pub download_url: String,
    pub size: Option<i64>,
    pub sha1: String,
    pub md5: String,
    pub bug_tracking_url: String,
    pub code_view_url: String,
    pub vcs_url: String,
    pub copyright: String,
    pub license_expression: String,
    pub declared_license: String,
    pub notice_text: String,
    pub keywords: Vec<Value>,
    pub source_packages: Vec<Value>,
    /// Resource paths believed missing relative to the package definition
    pub missing_resources: Vec<Value>,
    /// Resource paths believed modified relative to the package definition
    pub modified_resources: Vec<Value>,
}

impl DiscoveredPackage {
    /// Build a package for `project_uuid` from an untyped data mapping.
    ///
    /// Qualifiers are normalized to their canonical encoded form, keys
    /// outside [`PACKAGE_FIELD_NAMES`] are dropped, and so are empty or
    /// zero values. No duplicate check is performed; callers needing
    /// uniqueness must check first.
    pub fn from_data(project_uuid: &str, mut data: JsonMap) -> Self {
        let qualifiers = data
            .remove("qualifiers")
            .and_then(|value| purl::normalize_qualifiers(&value))
            .unwrap_or_default();

        Self {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: project_uuid.to_string(),
            package_type: string_field(&data, "type"),
            namespace: string_field(&data, "namespace"),
            name: string_field(&data, "name"),
            version: string_field(&data, "version"),
            qualifiers,
            subpath: string_field(&data, "subpath"),
            primary_language: string_field(&data, "primary_language"),
            description: string_field(&data, "description"),
            release_date: string_field(&data, "release_date"),
            homepage_url: string_field(&data, "homepage_url"),
            download_url: string_field(&data, "download_url"),
            size: data.get("size").and_then(Value::as_i64).filter(|s| *s != 0),
            sha1: string_field(&data, "sha1"),
            md5: string_field(&data, "md5"),
            bug_tracking_url: string_field(&data, "bug_tracking_url"),
            code_view_url: string_field(&data, "code_view_url"),
            vcs_url: string_field(&data, "vcs_url"),
            copyright: string_field(&data, "copyright"),
            license_expression: string_field(&data, "license_expression"),
            declared_license: string_field(&data, "declared_license"),
            notice_text: string_field(&data, "notice_text"),
            keywords: list_field(&data, "keywords"),
            source_packages: list_field(&data, "source_packages"),
            missing_resources: list_field(&data, "missing_resources"),
            modified_resources: list_field(&data, "modified_resources"),
        }
    }

    /// The `pkg:` URL for this package, when type and name are known.
    pub fn package_url(&self) -> Option<String> {
        purl::build_package_url(
            &self.package_type,
            &self.namespace,
            &self.name,
            &self.version,
            &self.qualifiers,
            &self.subpath,
        )
    }
}

impl std::fmt::Display for DiscoveredPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.package_url() {
            Some(purl) => write!(f, "{}", purl),
            None => write!(f, "{}", self.uuid),
        }
    }
}

fn string_field(data: &JsonMap, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn list_field(data: &JsonMap, key: &str) -> Vec<Value> {
    data.get(key)
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

// ============================================================================
// Project errors
// ============================================================================

/// Durable record of a failed persistence attempt against a project-related
/// entity. Created as a side effect of a failed save; never aborts the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectError {
    pub uuid: String,
    pub project_uuid: String,
    pub created_date: DateTime<Utc>,
    /// Name of the entity type that failed to save
    pub model: String,
    /// Field-value snapshot of the entity at failure time
    pub details: Value,
    pub message: String,
    pub traceback: String,
}

/// Implemented by every entity type eligible for error-capturing
/// persistence. Requiring the project reference here makes the structural
/// precondition a compile-time property rather than a startup check.
pub trait ProjectScoped {
    const MODEL_NAME: &'static str;

    fn project_uuid(&self) -> &str;

    /// Field-value snapshot recorded on a failed save.
    fn detail_snapshot(&self) -> Value;
}

impl ProjectScoped for CodebaseResource {
    const MODEL_NAME: &'static str = "CodebaseResource";

    fn project_uuid(&self) -> &str {
        &self.project_uuid
    }

    fn detail_snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl ProjectScoped for DiscoveredPackage {
    const MODEL_NAME: &'static str = "DiscoveredPackage";

    fn project_uuid(&self) -> &str {
        &self.project_uuid
    }

    fn detail_snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn unclaimed_run() -> Run {
        Run {
            uuid: Uuid::new_v4().to_string(),
            project_uuid: Uuid::new_v4().to_string(),
            pipeline: "scan_inventory".to_string(),
            description: String::new(),
            created_date: Utc::now(),
            task_id: None,
            task_start_date: None,
            task_end_date: None,
            task_exitcode: None,
            task_output: String::new(),
            task_state_override: None,
            steps_completed: 0,
        }
    }

    #[test]
    fn test_task_state_roundtrip() {
        for state in [
            TaskState::Unclaimed,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::Stale,
            TaskState::Terminated,
        ] {
            let s = state.as_str();
            let parsed = TaskState::parse(s).unwrap();
            assert_eq!(state, parsed);
        }
    }

    #[test]
    fn test_resource_type_roundtrip() {
        for rtype in [
            ResourceType::File,
            ResourceType::Directory,
            ResourceType::Symlink,
        ] {
            assert_eq!(ResourceType::parse(rtype.as_str()), Some(rtype));
        }
    }

    #[test]
    fn test_run_state_derivation() {
        let mut run = unclaimed_run();
        assert_eq!(run.state(), TaskState::Unclaimed);

        run.task_id = Some("worker-1/abc".to_string());
        assert_eq!(run.state(), TaskState::Running);

        run.task_end_date = Some(Utc::now());
        run.task_exitcode = Some(0);
        assert_eq!(run.state(), TaskState::Succeeded);
        assert!(run.task_succeeded());

        run.task_exitcode = Some(1);
        assert_eq!(run.state(), TaskState::Failed);
        assert!(!run.task_succeeded());

        run.task_state_override = Some(TaskState::Stale);
        assert_eq!(run.state(), TaskState::Stale);
    }

    #[test]
    fn test_get_run_id() {
        let mut run = unclaimed_run();
        run.task_output = "starting\nrun-id 4821\nStep [1/3]\n".to_string();
        assert_eq!(run.get_run_id(), Some("4821".to_string()));

        run.task_output = "no token here".to_string();
        assert_eq!(run.get_run_id(), None);

        run.task_output = String::new();
        assert_eq!(run.get_run_id(), None);
    }

    #[test]
    fn test_set_scan_results_skips_empty_values() {
        let mut resource =
            CodebaseResource::new("project-uuid", "src/main.rs", ResourceType::File);
        resource.licenses = vec![json!({"key": "apache-2.0"})];

        let mut scan_results = JsonMap::new();
        scan_results.insert("licenses".to_string(), json!([]));
        resource.set_scan_results(&scan_results);
        assert_eq!(resource.licenses, vec![json!({"key": "apache-2.0"})]);

        scan_results.insert("licenses".to_string(), json!([{"key": "mit"}]));
        resource.set_scan_results(&scan_results);
        assert_eq!(resource.licenses, vec![json!({"key": "mit"})]);
    }

    #[test]
    fn test_set_scan_results_ignores_unrecognized_fields() {
        let mut resource =
            CodebaseResource::new("project-uuid", "src/main.rs", ResourceType::File);
        let mut scan_results = JsonMap::new();
        scan_results.insert("status".to_string(), json!(["hijacked"]));
        scan_results.insert("emails".to_string(), json!([{"email": "dev@example.com"}]));
        resource.set_scan_results(&scan_results);

        assert_eq!(resource.status, "");
        assert_eq!(resource.emails, vec![json!({"email": "dev@example.com"})]);
    }

    #[test]
    fn test_resource_name_and_extension_derivation() {
        let resource = CodebaseResource::new("p", "src/lib/util.tar.gz", ResourceType::File);
        assert_eq!(resource.name, "util.tar.gz");
        assert_eq!(resource.extension, ".gz");

        let dir = CodebaseResource::new("p", "src/lib", ResourceType::Directory);
        assert_eq!(dir.name, "lib");
        assert_eq!(dir.extension, "");
    }

    #[test]
    fn test_package_from_data_filters_fields() {
        let data = json!({
            "type": "maven",
            "name": "commons-io",
            "version": "2.11.0",
            "qualifiers": {"classifier": "SOURCES"},
            "unknown_field": "dropped",
            "description": "",
            "size": 0,
            "keywords": []
        });
        let Value::Object(data) = data else { unreachable!() };
        let package = DiscoveredPackage::from_data("project-uuid", data);

        assert_eq!(package.package_type, "maven");
        assert_eq!(package.qualifiers, "classifier=SOURCES");
        assert_eq!(package.description, "");
        assert_eq!(package.size, None);
        assert!(package.keywords.is_empty());
        assert_eq!(
            package.package_url(),
            Some("pkg:maven/commons-io@2.11.0?classifier=SOURCES".to_string())
        );
    }

    #[test]
    fn test_package_display_falls_back_to_uuid() {
        let package = DiscoveredPackage::from_data("project-uuid", JsonMap::new());
        assert_eq!(package.to_string(), package.uuid);
    }
}
