//! Scanflow worker
//!
//! Polls every project's run queue and dispatches queued runs onto a local
//! worker pool.
//!
//! Usage:
//!     scanflow-worker --database /path/to/scanflow.sqlite3 --workers 2

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scanflow::dispatch::{spawn_workers, TaskQueue};
use scanflow_db::ScanflowDb;

#[derive(Parser, Debug)]
#[command(name = "scanflow-worker", about = "Pipeline run worker for Scanflow")]
struct Args {
    /// Database path
    #[arg(long, default_value = "scanflow.sqlite3", env = "SCANFLOW_DATABASE")]
    database: PathBuf,

    /// Number of concurrent pipeline workers
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Poll interval for queued runs, in seconds
    #[arg(long, default_value_t = 5)]
    poll_interval: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scanflow=info,scanflow_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    tracing::info!("Starting Scanflow worker");
    tracing::info!("  Database: {}", args.database.display());
    tracing::info!("  Workers: {}", args.workers);

    let db = ScanflowDb::open(&args.database).await?;

    let (queue, rx) = TaskQueue::new();
    let handles = spawn_workers(db.clone(), rx, args.workers);

    // Admission loop: strictly FIFO per project via get_next_run. Tracks
    // what was already handed to the pool so a run is not enqueued twice
    // while it waits to be claimed.
    let mut enqueued: HashSet<String> = HashSet::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(args.poll_interval)) => {}
        }

        for project in db.list_projects().await? {
            if let Some(run) = db.get_next_run(&project.uuid).await? {
                if enqueued.insert(run.uuid.clone()) {
                    tracing::info!(project = %project.name, run = %run.uuid, "run queued for dispatch");
                    queue.enqueue(&run.uuid).await?;
                }
            }
        }
    }

    // Closing the queue lets the workers drain and stop
    drop(queue);
    for handle in handles {
        handle.join().await;
    }

    Ok(())
}
