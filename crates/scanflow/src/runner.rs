//! Pipeline driver loop.
//!
//! Claims a run, executes its pipeline's steps in order, records per-step
//! progress into the run record and finalizes with an exit code. The tmp/
//! directory is cleared unconditionally on the way out, success or not.

use anyhow::{anyhow, bail, Result};
use tracing::{error, info, warn};

use scanflow_db::{ScanflowDb, TaskState};

use crate::pipeline::{Pipeline, RunContext};
use crate::pipelines;
use crate::workspace::WorkDir;

/// Execute a run's pipeline from the first step.
pub async fn execute(db: &ScanflowDb, run_uuid: &str, task_id: &str) -> Result<TaskState> {
    let pipeline = resolve_pipeline(db, run_uuid).await?;
    run_pipeline(db, run_uuid, task_id, &pipeline, false).await
}

/// Resume a run's pipeline, restarting at the first not-yet-completed step.
pub async fn resume(db: &ScanflowDb, run_uuid: &str, task_id: &str) -> Result<TaskState> {
    let pipeline = resolve_pipeline(db, run_uuid).await?;
    run_pipeline(db, run_uuid, task_id, &pipeline, true).await
}

async fn resolve_pipeline(db: &ScanflowDb, run_uuid: &str) -> Result<Pipeline> {
    let run = db
        .get_run(run_uuid)
        .await?
        .ok_or_else(|| anyhow!("Run not found: {}", run_uuid))?;
    pipelines::get_pipeline(&run.pipeline)
        .ok_or_else(|| anyhow!("Unknown pipeline: {}", run.pipeline))
}

/// Drive the given pipeline for a run.
///
/// Entry point for callers that resolved (or built) the pipeline
/// themselves; `execute` and `resume` are thin wrappers resolving through
/// the registry. Step failures are a recorded outcome, not an error: the
/// returned state is `Failed` and the error detail lives in the run's
/// captured output. An `Err` from this function means the driver itself
/// could not proceed (missing run, claim refused, storage unavailable).
pub async fn run_pipeline(
    db: &ScanflowDb,
    run_uuid: &str,
    task_id: &str,
    pipeline: &Pipeline,
    resume_run: bool,
) -> Result<TaskState> {
    if resume_run {
        db.reclaim_run(run_uuid, task_id).await?;
    } else if !db.claim_run(run_uuid, task_id).await? {
        bail!("Run {} is already claimed", run_uuid);
    }

    let run = db
        .get_run(run_uuid)
        .await?
        .ok_or_else(|| anyhow!("Run not found: {}", run_uuid))?;
    let project = db
        .get_project(&run.project_uuid)
        .await?
        .ok_or_else(|| anyhow!("Project not found: {}", run.project_uuid))?;

    // The run-id token makes the worker-assigned id discoverable in the
    // captured output (see Run::get_run_id)
    db.append_task_output(run_uuid, &format!("run-id {}\n", std::process::id()))
        .await?;

    let start_index = if resume_run {
        run.steps_completed as usize
    } else {
        if run.steps_completed != 0 {
            db.set_steps_completed(run_uuid, 0).await?;
        }
        0
    };

    let workdir = WorkDir::new(&project);
    let mut ctx = RunContext {
        db: db.clone(),
        project,
        run,
        workdir,
    };

    let total = pipeline.steps.len();
    let mut failed = false;

    for (index, step) in pipeline.steps.iter().enumerate().skip(start_index) {
        let marker = format!("Step [{}/{}] {}", index + 1, total, step.name);
        db.append_task_output(run_uuid, &format!("{} starting\n", marker))
            .await?;
        info!(run = run_uuid, step = step.name, "step starting");

        match (step.func)(&mut ctx).await {
            Ok(()) => {
                db.set_steps_completed(run_uuid, (index + 1) as i64).await?;
                db.append_task_output(run_uuid, &format!("{} completed\n", marker))
                    .await?;
            }
            Err(err) => {
                db.append_task_output(run_uuid, &format!("{} failed: {:#}\n", marker, err))
                    .await?;
                error!(run = run_uuid, step = step.name, error = %format!("{:#}", err), "step failed");
                failed = true;
                break;
            }
        }
    }

    let exitcode = if failed { 1 } else { 0 };
    db.finalize_run(run_uuid, exitcode).await?;

    // tmp/ never carries state into a following pipeline
    if let Err(err) = ctx.workdir.clear_tmp() {
        warn!(run = run_uuid, error = %err, "failed to clear tmp directory");
    }

    let state = if failed {
        TaskState::Failed
    } else {
        TaskState::Succeeded
    };
    info!(run = run_uuid, state = %state, "run finished");
    Ok(state)
}
