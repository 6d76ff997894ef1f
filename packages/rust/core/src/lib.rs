//! Pipeline Orchestrator, Restart Planner, and Progress Reporter.
//!
//! This crate is the process-facing heart of the system: it decides which
//! stages a task runs through, wires stage locks and retry around the
//! discovery/fetch/synthesize/embed engines, persists restart-capable
//! results onto the task registry, and exposes the read-side views the CLI
//! reports on.

pub mod orchestrator;
pub mod progress;
pub mod restart;

pub use orchestrator::PipelineHandle;
pub use progress::{DetailLevel, ProgressSummary, RunningTaskView, TaskView, summarize, task_detail};
pub use restart::{RestartStage, plan_restart};
