//! Run and step execution records.
//!
//! A `WorkflowRun` is the audit record handed back from the engine at a
//! terminal state. `StepResult` is the final verdict for one step keyed by
//! step id; `StepLog` is the append-only per-attempt trail (N retries produce
//! N+1 log rows). None of these are mutated after the engine appends them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
///
/// `Pending -> Running -> {Completed | Failed | Aborted}`; terminal states are
/// set exactly once and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

impl WorkflowRunStatus {
    /// Returns `true` for terminal states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowRunStatus::Completed | WorkflowRunStatus::Failed | WorkflowRunStatus::Aborted
        )
    }
}

/// Status of a single step attempt within a run's log trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Retrying,
}

/// Final verdict for one step. Skipped is a distinct outcome, never "success".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResultStatus {
    Success,
    Error,
    Skipped,
}

// ---------------------------------------------------------------------------
// StepResult
// ---------------------------------------------------------------------------

/// Final outcome of a step within a run, keyed by step id on `WorkflowRun`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Final status.
    pub status: StepResultStatus,
    /// Output produced on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration across all attempts, in milliseconds.
    pub duration_ms: u64,
    /// Number of times the execute callback was invoked. A step that never
    /// passed input validation (or was skipped) reports 0.
    pub attempts: u32,
    /// Whether the terminal error was retryable (budget exhaustion) as
    /// opposed to rejected by the retry classifier. Always `false` on success
    /// and skip.
    #[serde(default)]
    pub retryable: bool,
    /// Validation detail (the normalized failure message), when the terminal
    /// error came from a validation predicate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<String>,
}

impl StepResult {
    /// Successful result with the given output.
    pub fn success(output: Value, attempts: u32, duration_ms: u64) -> Self {
        Self {
            status: StepResultStatus::Success,
            output: Some(output),
            error: None,
            duration_ms,
            attempts,
            retryable: false,
            validation: None,
        }
    }

    /// Skipped result; consumes no attempts and no time.
    pub fn skipped() -> Self {
        Self {
            status: StepResultStatus::Skipped,
            output: None,
            error: None,
            duration_ms: 0,
            attempts: 0,
            retryable: false,
            validation: None,
        }
    }

    /// Failed result with the terminal error message.
    pub fn error(message: impl Into<String>, attempts: u32, duration_ms: u64, retryable: bool) -> Self {
        Self {
            status: StepResultStatus::Error,
            output: None,
            error: Some(message.into()),
            duration_ms,
            attempts,
            retryable,
            validation: None,
        }
    }

    /// Attach a validation detail message.
    pub fn with_validation(mut self, detail: impl Into<String>) -> Self {
        self.validation = Some(detail.into());
        self
    }
}

// ---------------------------------------------------------------------------
// StepLog
// ---------------------------------------------------------------------------

/// One row in the append-only per-attempt execution trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLog {
    /// Step id matching the definition.
    pub step_id: String,
    /// Step name (denormalized for display).
    pub step_name: String,
    /// Terminal status of this attempt row.
    pub status: StepStatus,
    /// Attempt number (1-based; 0 for skipped rows).
    pub attempt: u32,
    /// Effective maximum attempts for the step.
    pub max_attempts: u32,
    /// When this attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When this attempt reached its terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Attempt duration in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Output captured on a completed attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Error captured on a failed or retrying attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// WorkflowRun
// ---------------------------------------------------------------------------

/// A single execution instance of a workflow, handed to the caller at a
/// terminal state and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run id, generated once per run.
    pub run_id: Uuid,
    /// Id of the workflow definition that was executed.
    pub workflow_id: String,
    /// Terminal (or in-flight, while executing) status.
    pub status: WorkflowRunStatus,
    /// Append-only per-attempt trail, in execution order.
    pub step_logs: Vec<StepLog>,
    /// Final verdict per step id. Steps never started have no entry.
    pub step_results: HashMap<String, StepResult>,
    /// Input the run was invoked with.
    pub input: Value,
    /// Final output (transform result or last successful step output).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// JSON snapshot of the shared context at the terminal state.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub context: Value,
    /// Caller-supplied metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Top-level error summary naming the failing step and reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
