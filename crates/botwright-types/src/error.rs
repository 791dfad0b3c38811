//! Unified error taxonomy for workflow execution.
//!
//! Step-level errors never escape `run()` as `Err`; they are folded into
//! `StepResult`/`StepLog` records and drive the run status. The variants here
//! exist so retry classifiers and recorders can tell failure modes apart.

use thiserror::Error;

/// Errors produced while defining or executing a workflow.
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    /// A step's input failed its validation predicate.
    #[error("input validation failed for step '{step_id}': {message}")]
    InputValidation { step_id: String, message: String },

    /// A step's output failed its validation predicate.
    #[error("output validation failed for step '{step_id}': {message}")]
    OutputValidation { step_id: String, message: String },

    /// A step's execute callback exceeded its configured timeout.
    #[error("step '{step_id}' timed out after {timeout_ms}ms")]
    StepTimeout { step_id: String, timeout_ms: u64 },

    /// The step callback itself failed.
    #[error("step execution failed: {0}")]
    Execution(String),

    /// Cancellation fired before or during a step attempt.
    #[error("workflow run aborted")]
    Aborted,

    /// The dependency graph contains a cycle involving the listed steps.
    #[error("dependency cycle involving steps: {0}")]
    CycleDetected(String),

    /// Structural validation of a definition failed.
    #[error("invalid workflow definition: {0}")]
    Definition(String),

    /// An engine-owned operation (context init, output transform) failed.
    #[error("engine error: {0}")]
    Engine(String),

    /// A workflow with this id is already registered.
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// No workflow with this id is registered.
    #[error("workflow '{0}' is not registered")]
    WorkflowNotFound(String),
}

impl WorkflowError {
    /// Returns `true` if a retry may succeed.
    ///
    /// Only abort is categorically non-retryable; the baseline retry policy
    /// treats everything else (including validation failures) as transient
    /// unless a step's own classifier says otherwise.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, WorkflowError::Aborted)
    }

    /// Shorthand for a step execution failure with a plain message.
    pub fn execution(message: impl Into<String>) -> Self {
        WorkflowError::Execution(message.into())
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        WorkflowError::Execution(format!("{err:#}"))
    }
}
