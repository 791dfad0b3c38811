//! Workflow orchestration engine: definitions, dependency resolution, retry,
//! validation, and sequential step execution with cooperative cancellation.
//!
//! This crate contains the "brain" of the run loop:
//! - `definition` -- callback-based workflow/step definitions and structural validation
//! - `dag` -- dependency resolution via Kahn's algorithm with declared-order tie-break
//! - `retry` -- three-level retry policy merge and exponential backoff with jitter
//! - `validation` -- validator verdict normalization for input/output checks
//! - `bus` -- sequential, failure-isolated lifecycle event delivery
//! - `executor` -- per-step attempt state machine (skip, validate, timeout, retry)
//! - `engine` -- top-level run state machine; `run()` always returns a well-formed record
//! - `registry` -- named workflow registration with enable/disable
//! - `builder` -- fluent sugar over hand-built definitions
//! - `recorder` -- JSONL event sink implementing the listener shape

pub mod builder;
pub mod bus;
pub mod dag;
pub mod definition;
pub mod engine;
pub(crate) mod executor;
pub mod recorder;
pub mod registry;
pub mod retry;
pub mod validation;

pub use builder::{StepBuilder, WorkflowBuilder};
pub use bus::{EventBus, ListenerFn, listener_fn};
pub use definition::{
    StepDefinition, WorkflowDefinition, context_init_fn, predicate_fn, step_fn,
    transform_input_fn, transform_output_fn, validate_definition, validate_fn,
};
pub use engine::{RunOptions, WorkflowEngine};
pub use recorder::JsonlRecorder;
pub use registry::{RegisteredWorkflow, WorkflowRegistry};
pub use retry::{RetryOverride, RetryPolicy};
pub use validation::Verdict;
