//! Run dispatch onto an asynchronous worker pool.
//!
//! The queue hands a run's identity and a lane tag to whatever consumes
//! the channel; the bundled workers invoke the pipeline driver. The pool
//! shuts down when every queue handle is dropped.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use scanflow_db::ScanflowDb;

use crate::runner;

/// Default dispatch lane.
pub const DEFAULT_LANE: &str = "default";

/// Queue capacity before enqueue backpressures.
const QUEUE_CAPACITY: usize = 256;

/// Dispatch errors.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// All workers are gone; the queued run can never execute
    #[error("Task queue is closed")]
    QueueClosed,
}

/// One queued execution request.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub run_uuid: String,
    pub lane: &'static str,
    pub resume: bool,
}

/// Clonable handle for enqueueing runs.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<QueuedTask>,
}

impl TaskQueue {
    /// Create a queue and the receiver end consumed by the worker pool.
    pub fn new() -> (Self, mpsc::Receiver<QueuedTask>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (Self { tx }, rx)
    }

    /// Queue a run for execution from the start.
    pub async fn enqueue(&self, run_uuid: &str) -> Result<(), DispatchError> {
        self.send(run_uuid, false).await
    }

    /// Queue a run for execution from its last completed step.
    pub async fn enqueue_resume(&self, run_uuid: &str) -> Result<(), DispatchError> {
        self.send(run_uuid, true).await
    }

    async fn send(&self, run_uuid: &str, resume: bool) -> Result<(), DispatchError> {
        let task = QueuedTask {
            run_uuid: run_uuid.to_string(),
            lane: DEFAULT_LANE,
            resume,
        };
        self.tx
            .send(task)
            .await
            .map_err(|_| DispatchError::QueueClosed)
    }
}

/// Handle on one spawned worker.
pub struct WorkerHandle {
    pub worker_id: String,
    join_handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Wait for the worker to drain and exit. Workers exit once the queue
    /// is closed (all TaskQueue handles dropped) and empty.
    pub async fn join(self) {
        let _ = self.join_handle.await;
    }
}

/// Spawn `count` workers sharing one queue receiver.
///
/// Each claimed run gets a task id of `<worker-id>/<uuid>`.
pub fn spawn_workers(
    db: ScanflowDb,
    rx: mpsc::Receiver<QueuedTask>,
    count: usize,
) -> Vec<WorkerHandle> {
    let rx = Arc::new(Mutex::new(rx));

    (0..count.max(1))
        .map(|index| {
            let worker_id = format!("worker-{}", index + 1);
            let db = db.clone();
            let rx = Arc::clone(&rx);
            let id = worker_id.clone();

            let join_handle = tokio::spawn(async move {
                info!(worker = %id, "worker started");
                loop {
                    let task = { rx.lock().await.recv().await };
                    let Some(task) = task else {
                        break;
                    };

                    let task_id = format!("{}/{}", id, Uuid::new_v4());
                    let result = if task.resume {
                        runner::resume(&db, &task.run_uuid, &task_id).await
                    } else {
                        runner::execute(&db, &task.run_uuid, &task_id).await
                    };

                    match result {
                        Ok(state) => {
                            info!(worker = %id, run = %task.run_uuid, state = %state, "run processed")
                        }
                        Err(err) => {
                            error!(worker = %id, run = %task.run_uuid, error = %format!("{:#}", err), "run dispatch failed")
                        }
                    }
                }
                info!(worker = %id, "worker stopped");
            });

            WorkerHandle {
                worker_id,
                join_handle,
            }
        })
        .collect()
}
