//! Project workspace management.
//!
//! Every project owns an isolated directory tree with four fixed subareas:
//! `input/` (ingested files), `output/` (pipeline products), `codebase/`
//! (the tree under analysis) and `tmp/` (transient scratch space, cleared
//! at the end of every pipeline run).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use scanflow_db::{DbError, Project, Result, ScanflowDb};

/// Fixed subareas of a project work directory.
pub const WORK_DIRECTORIES: [&str; 4] = ["input", "output", "codebase", "tmp"];

/// Get the Scanflow home directory: ~/.scanflow
///
/// Overridable through the `SCANFLOW_HOME` environment variable.
pub fn scanflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SCANFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .expect("Could not determine home directory")
        .join(".scanflow")
}

/// Root directory holding all project work directories.
pub fn projects_root() -> PathBuf {
    scanflow_home().join("projects")
}

/// Work directory location for a project: `<root>/<name>-<short-uuid>`.
///
/// Deterministic given the project's name and id.
pub fn work_directory_for(projects_root: &Path, name: &str, short_uuid: &str) -> PathBuf {
    projects_root.join(format!("{}-{}", name, short_uuid))
}

/// Filesystem view over one project's work directory.
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(project: &Project) -> Self {
        Self {
            root: project.work_path(),
        }
    }

    pub fn work_path(&self) -> &Path {
        &self.root
    }

    pub fn input_path(&self) -> PathBuf {
        self.root.join("input")
    }

    pub fn output_path(&self) -> PathBuf {
        self.root.join("output")
    }

    pub fn codebase_path(&self) -> PathBuf {
        self.root.join("codebase")
    }

    pub fn tmp_path(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the whole work directory structure, skipping existing parts.
    pub fn setup(&self) -> io::Result<()> {
        for subdirectory in WORK_DIRECTORIES {
            fs::create_dir_all(self.root.join(subdirectory))?;
        }
        Ok(())
    }

    /// Delete the whole tmp/ directory content and recreate it empty.
    ///
    /// Called at the end of each pipeline run; tmp/ never carries state
    /// needed by a subsequent pipeline. A missing directory is not an
    /// error.
    pub fn clear_tmp(&self) -> io::Result<()> {
        let tmp = self.tmp_path();
        if tmp.exists() {
            fs::remove_dir_all(&tmp)?;
        }
        fs::create_dir_all(&tmp)?;
        debug!(path = %tmp.display(), "tmp directory cleared");
        Ok(())
    }

    /// Stream bytes into `input/<filename>`, overwriting any existing file.
    ///
    /// No size limit is enforced at this layer.
    pub fn add_input_file(&self, filename: &str, reader: &mut impl io::Read) -> io::Result<u64> {
        let file_path = self.input_path().join(filename);
        let mut file = fs::File::create(&file_path)?;
        io::copy(reader, &mut file)
    }

    /// Relative paths of all regular files under input/, recursively.
    pub fn input_files(&self) -> io::Result<Vec<String>> {
        let input = self.input_path();
        let mut files = Vec::new();

        for entry in WalkDir::new(&input) {
            let entry = entry.map_err(io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&input)
                .unwrap_or(entry.path());
            files.push(to_forward_slashes(rel));
        }

        files.sort();
        Ok(files)
    }

    /// Names of the first-level children (files and directories) of input/.
    pub fn input_root(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.input_path())? {
            let entry = entry?;
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }
}

/// Normalize a relative path to forward slashes so listings compare the
/// same on every platform.
fn to_forward_slashes(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Create a project under the default projects root.
///
/// Fails with [`DbError::DuplicateName`] when the name is taken; allocates
/// an id, creates the work directory structure, persists the record.
pub async fn create_project(db: &ScanflowDb, name: &str) -> Result<Project> {
    create_project_in(db, name, &projects_root()).await
}

/// Create a project with its work directory under `projects_root`.
pub async fn create_project_in(
    db: &ScanflowDb,
    name: &str,
    projects_root: &Path,
) -> Result<Project> {
    // Check first so no work directory is created for a rejected name. The
    // UNIQUE constraint still backstops a concurrent create.
    if db.get_project_by_name(name).await?.is_some() {
        return Err(DbError::DuplicateName(name.to_string()));
    }

    let mut project = Project::new(name, "");
    let work_directory = work_directory_for(projects_root, name, project.short_uuid());
    project.work_directory = work_directory.display().to_string();

    let workdir = WorkDir::new(&project);
    workdir.setup()?;

    db.insert_project(&project).await?;
    Ok(project)
}
