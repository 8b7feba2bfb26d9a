//! Scanflow pipeline execution engine.
//!
//! Coordinates multi-step analysis pipelines over project workspaces: a
//! project owns an isolated directory tree and an inventory of codebase
//! resources and discovered packages; pipelines are ordered step lists
//! executed by a driver loop that records per-step progress into the run
//! record and supports resuming after interruption.

pub mod dispatch;
pub mod pipeline;
pub mod pipelines;
pub mod runner;
pub mod workspace;

pub use dispatch::{spawn_workers, DispatchError, QueuedTask, TaskQueue, WorkerHandle, DEFAULT_LANE};
pub use pipeline::{add_pipeline, Pipeline, RunContext, Step, StepFn, StepFuture};
pub use pipelines::{get_pipeline, get_pipeline_doc, pipeline_names};
pub use workspace::{create_project, create_project_in, WorkDir, WORK_DIRECTORIES};
