//! End-to-end pipeline execution tests: step ordering, failure capture,
//! resume behavior, tmp cleanup and queue dispatch.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::time::Duration;

use anyhow::bail;
use tempfile::TempDir;

use scanflow::dispatch::{spawn_workers, TaskQueue};
use scanflow::pipeline::{Pipeline, RunContext, Step, StepFuture};
use scanflow::runner;
use scanflow::workspace::{create_project_in, WorkDir};
use scanflow_db::{Project, ScanflowDb, TaskState};

async fn setup() -> (TempDir, ScanflowDb, Project) {
    let tmp = TempDir::new().unwrap();
    let db = ScanflowDb::open(tmp.path().join("scanflow.sqlite3"))
        .await
        .unwrap();
    let project = create_project_in(&db, "acme", &tmp.path().join("projects"))
        .await
        .unwrap();
    (tmp, db, project)
}

fn write_step_marker(ctx: &RunContext, name: &str) -> anyhow::Result<()> {
    let path = ctx.workdir.output_path().join(name);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "ran")?;
    Ok(())
}

fn step_one(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        write_step_marker(ctx, "step1.txt")?;
        // Scratch state that must be gone after the run
        fs::write(ctx.workdir.tmp_path().join("scratch.bin"), b"x")?;
        Ok(())
    })
}

fn step_two_fails(_ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move { bail!("scan backend exploded") })
}

fn step_two_gated(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        if !ctx.workdir.output_path().join("gate.txt").exists() {
            bail!("gate file missing");
        }
        write_step_marker(ctx, "step2.txt")?;
        Ok(())
    })
}

fn step_three(ctx: &mut RunContext) -> StepFuture<'_> {
    Box::pin(async move {
        write_step_marker(ctx, "step3.txt")?;
        Ok(())
    })
}

#[tokio::test]
async fn test_failing_step_halts_pipeline() {
    let (_tmp, db, project) = setup().await;

    let workdir = WorkDir::new(&project);
    workdir
        .add_input_file("notes.txt", &mut "input".as_bytes())
        .unwrap();

    let pipeline = Pipeline {
        name: "three_step_test",
        description: "Three steps, the second one raises.",
        steps: vec![
            Step { name: "one", func: step_one },
            Step { name: "two", func: step_two_fails },
            Step { name: "three", func: step_three },
        ],
    };
    let run = db
        .create_run(&project.uuid, pipeline.name, pipeline.description)
        .await
        .unwrap();

    let state = runner::run_pipeline(&db, &run.uuid, "worker-1/t1", &pipeline, false)
        .await
        .unwrap();
    assert_eq!(state, TaskState::Failed);

    let run = db.get_run(&run.uuid).await.unwrap().unwrap();
    assert_eq!(run.state(), TaskState::Failed);
    assert_eq!(run.task_exitcode, Some(1));
    assert!(!run.task_succeeded());
    assert_eq!(run.steps_completed, 1);
    assert!(run.task_output.contains("Step [2/3] two failed"));
    assert!(run.task_output.contains("scan backend exploded"));
    assert!(run.get_run_id().is_some());

    // Step 1 ran, step 3 was skipped
    assert!(workdir.output_path().join("step1.txt").exists());
    assert!(!workdir.output_path().join("step3.txt").exists());

    // tmp/ is cleared even on failure
    assert!(workdir.tmp_path().is_dir());
    assert_eq!(fs::read_dir(workdir.tmp_path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_resume_skips_completed_steps() {
    let (_tmp, db, project) = setup().await;
    let workdir = WorkDir::new(&project);

    let pipeline = Pipeline {
        name: "gated_test",
        description: "Second step requires a gate file.",
        steps: vec![
            Step { name: "one", func: step_one },
            Step { name: "two", func: step_two_gated },
            Step { name: "three", func: step_three },
        ],
    };
    let run = db
        .create_run(&project.uuid, pipeline.name, pipeline.description)
        .await
        .unwrap();

    let state = runner::run_pipeline(&db, &run.uuid, "worker-1/t1", &pipeline, false)
        .await
        .unwrap();
    assert_eq!(state, TaskState::Failed);
    assert_eq!(
        db.get_run(&run.uuid).await.unwrap().unwrap().steps_completed,
        1
    );

    // Unblock step two and resume
    fs::write(workdir.output_path().join("gate.txt"), b"open").unwrap();
    let state = runner::run_pipeline(&db, &run.uuid, "worker-2/t2", &pipeline, true)
        .await
        .unwrap();
    assert_eq!(state, TaskState::Succeeded);

    let run = db.get_run(&run.uuid).await.unwrap().unwrap();
    assert_eq!(run.state(), TaskState::Succeeded);
    assert_eq!(run.steps_completed, 3);

    // Step one executed exactly once across both attempts
    let step1_log = fs::read_to_string(workdir.output_path().join("step1.txt")).unwrap();
    assert_eq!(step1_log.lines().count(), 1);
    assert!(workdir.output_path().join("step2.txt").exists());
    assert!(workdir.output_path().join("step3.txt").exists());
}

#[tokio::test]
async fn test_execute_refuses_claimed_run() {
    let (_tmp, db, project) = setup().await;

    let run = db
        .create_run(&project.uuid, "scan_inventory", "")
        .await
        .unwrap();
    assert!(db.claim_run(&run.uuid, "other-worker/t1").await.unwrap());

    let result = runner::execute(&db, &run.uuid, "worker-1/t1").await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_scan_inventory_pipeline() {
    let (_tmp, db, project) = setup().await;
    let workdir = WorkDir::new(&project);

    let scan_document = serde_json::json!({
        "files": [
            {
                "path": "src/app.py",
                "type": "file",
                "programming_language": "Python",
                "mime_type": "text/x-python",
                "licenses": [{"key": "mit"}],
                "emails": [{"email": "dev@acme.example"}],
                "packages": [
                    {"type": "pypi", "name": "acme-app", "version": "1.0.0"}
                ]
            },
            {"path": "src", "type": "directory"}
        ],
        "packages": [
            {"type": "pypi", "name": "requests", "version": "2.31.0",
             "unknown_field": "dropped"}
        ]
    });
    workdir
        .add_input_file(
            "scan.json",
            &mut scan_document.to_string().as_bytes(),
        )
        .unwrap();

    let run = scanflow::add_pipeline(&db, &project, "scan_inventory")
        .await
        .unwrap();
    assert!(!run.description.is_empty());

    let state = runner::execute(&db, &run.uuid, "worker-1/t1").await.unwrap();
    assert_eq!(state, TaskState::Succeeded);

    let resources = db.list_resources(&project.uuid).await.unwrap();
    assert_eq!(resources.len(), 2);

    let app = db
        .get_resource(&project.uuid, "src/app.py")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(app.programming_language, "Python");
    assert_eq!(app.licenses, vec![serde_json::json!({"key": "mit"})]);

    let identities = db.packages_for_resource(app.id.unwrap()).await.unwrap();
    assert_eq!(identities, vec!["pkg:pypi/acme-app@1.0.0".to_string()]);

    let packages = db.list_packages(&project.uuid).await.unwrap();
    assert_eq!(packages.len(), 2);

    let updated = db.get_project(&project.uuid).await.unwrap().unwrap();
    assert_eq!(updated.extra_data["resource_count"], serde_json::json!(2));
    assert_eq!(updated.extra_data["package_count"], serde_json::json!(2));

    let run = db.get_run(&run.uuid).await.unwrap().unwrap();
    assert!(run.task_succeeded());
    assert!(run.task_output.contains("Imported 2 resources and 2 packages"));
}

#[tokio::test]
async fn test_scan_inventory_without_inputs_fails() {
    let (_tmp, db, project) = setup().await;

    let run = scanflow::add_pipeline(&db, &project, "scan_inventory")
        .await
        .unwrap();
    let state = runner::execute(&db, &run.uuid, "worker-1/t1").await.unwrap();
    assert_eq!(state, TaskState::Failed);

    let run = db.get_run(&run.uuid).await.unwrap().unwrap();
    assert!(run.task_output.contains("No input files"));
    assert_eq!(run.steps_completed, 0);
}

#[tokio::test]
async fn test_queue_resume_after_failure() {
    let (_tmp, db, project) = setup().await;
    let workdir = WorkDir::new(&project);

    // No inputs yet: the first attempt fails in the start step
    let run = scanflow::add_pipeline(&db, &project, "scan_inventory")
        .await
        .unwrap();
    let state = runner::execute(&db, &run.uuid, "worker-1/t1").await.unwrap();
    assert_eq!(state, TaskState::Failed);

    workdir
        .add_input_file(
            "scan.json",
            &mut r#"{"files": [{"path": "a.txt", "type": "file"}]}"#.as_bytes(),
        )
        .unwrap();

    let (queue, rx) = TaskQueue::new();
    let handles = spawn_workers(db.clone(), rx, 1);
    queue.enqueue_resume(&run.uuid).await.unwrap();

    let mut state = TaskState::Failed;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        state = db.get_run(&run.uuid).await.unwrap().unwrap().state();
        if state == TaskState::Succeeded {
            break;
        }
    }
    assert_eq!(state, TaskState::Succeeded);
    assert_eq!(db.list_resources(&project.uuid).await.unwrap().len(), 1);

    drop(queue);
    for handle in handles {
        handle.join().await;
    }
}

#[tokio::test]
async fn test_queue_dispatch_executes_run() {
    let (_tmp, db, project) = setup().await;
    let workdir = WorkDir::new(&project);

    let scan_document = serde_json::json!({
        "files": [{"path": "README.md", "type": "file"}]
    });
    workdir
        .add_input_file("scan.json", &mut scan_document.to_string().as_bytes())
        .unwrap();

    let run = scanflow::add_pipeline(&db, &project, "scan_inventory")
        .await
        .unwrap();

    let (queue, rx) = TaskQueue::new();
    let handles = spawn_workers(db.clone(), rx, 1);

    // FIFO admission: the queued run is the project's next run
    let next = db.get_next_run(&project.uuid).await.unwrap().unwrap();
    assert_eq!(next.uuid, run.uuid);
    queue.enqueue(&next.uuid).await.unwrap();

    // Wait for the worker to finish the run
    let mut state = TaskState::Unclaimed;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        state = db.get_run(&run.uuid).await.unwrap().unwrap().state();
        if state == TaskState::Succeeded || state == TaskState::Failed {
            break;
        }
    }
    assert_eq!(state, TaskState::Succeeded);

    // Nothing queued anymore; pool drains after the queue is dropped
    assert!(db.get_next_run(&project.uuid).await.unwrap().is_none());
    drop(queue);
    for handle in handles {
        handle.join().await;
    }
}
