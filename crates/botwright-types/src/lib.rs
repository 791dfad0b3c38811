//! Shared domain types for botwright workflow runs.
//!
//! This crate holds the serializable record types that cross the engine
//! boundary: the error taxonomy, run/step status enums, per-step results and
//! logs, the `WorkflowRun` audit record, and the lifecycle event stream.
//! Behavior lives in `botwright-engine`; everything here is plain data.

pub mod error;
pub mod event;
pub mod run;

pub use error::WorkflowError;
pub use event::WorkflowEvent;
pub use run::{StepLog, StepResult, StepResultStatus, StepStatus, WorkflowRun, WorkflowRunStatus};
