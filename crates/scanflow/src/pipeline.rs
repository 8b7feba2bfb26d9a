//! Pipeline definitions.
//!
//! A pipeline is a named, ordered list of step functions. Steps execute
//! strictly in declaration order against a mutable run context; the driver
//! loop in [`crate::runner`] records start/end/failure around each call.

use std::future::Future;
use std::pin::Pin;

use scanflow_db::{Project, Run, ScanflowDb};

use crate::pipelines;
use crate::workspace::WorkDir;

/// Boxed future returned by a step function.
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// One unit of pipeline work. Plain function pointer: steps hold no state
/// of their own, everything flows through the context.
pub type StepFn = for<'a> fn(&'a mut RunContext) -> StepFuture<'a>;

/// A named pipeline step.
pub struct Step {
    pub name: &'static str,
    pub func: StepFn,
}

/// A named, ordered sequence of steps implementing one analysis workflow.
pub struct Pipeline {
    pub name: &'static str,
    /// Human-readable documentation, snapshotted onto the Run at creation
    /// time so later code changes don't rewrite history.
    pub description: &'static str,
    pub steps: Vec<Step>,
}

/// Everything a step needs while executing: database handle, the project
/// under analysis, the run record being driven, and the project's work
/// directory.
pub struct RunContext {
    pub db: ScanflowDb,
    pub project: Project,
    pub run: Run,
    pub workdir: WorkDir,
}

/// Attach a pipeline to a project: creates a Run in the unclaimed state
/// with the pipeline's current description snapshotted onto it.
pub async fn add_pipeline(
    db: &ScanflowDb,
    project: &Project,
    pipeline_name: &str,
) -> anyhow::Result<Run> {
    let description = pipelines::get_pipeline_doc(pipeline_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown pipeline: {}", pipeline_name))?;

    let run = db
        .create_run(&project.uuid, pipeline_name, description)
        .await?;
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanflow_db::TaskState;

    #[tokio::test]
    async fn test_add_pipeline_snapshots_description() {
        let db = ScanflowDb::open_in_memory().await.unwrap();
        let project = Project::new("acme", "/w/acme-1");
        db.insert_project(&project).await.unwrap();

        let run = add_pipeline(&db, &project, "scan_inventory").await.unwrap();
        assert_eq!(run.pipeline, "scan_inventory");
        assert_eq!(
            run.description,
            pipelines::get_pipeline_doc("scan_inventory").unwrap()
        );
        assert_eq!(run.state(), TaskState::Unclaimed);
    }

    #[tokio::test]
    async fn test_add_unknown_pipeline_fails() {
        let db = ScanflowDb::open_in_memory().await.unwrap();
        let project = Project::new("acme", "/w/acme-1");
        db.insert_project(&project).await.unwrap();

        assert!(add_pipeline(&db, &project, "no_such_pipeline").await.is_err());
    }
}
