//! Lifecycle events emitted during a workflow run.
//!
//! Every event names the run and workflow it belongs to and carries a
//! timestamp taken at emission. The stream for a single run is strictly
//! ordered: the engine awaits every listener before moving on, so a consumer
//! observing `step_completed` for step N knows all events for steps before N
//! have already been delivered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// WorkflowEvent
// ---------------------------------------------------------------------------

/// A single lifecycle event within a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// The run started executing.
    WorkflowStarted {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    /// The run reached `completed`.
    WorkflowCompleted {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        duration_ms: u64,
    },
    /// The run reached `failed`.
    WorkflowFailed {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
    /// The run was cancelled cooperatively.
    WorkflowAborted {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A step attempt began.
    StepStarted {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        attempt: u32,
        max_attempts: u32,
    },
    /// A step attempt succeeded.
    StepCompleted {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        attempt: u32,
        duration_ms: u64,
    },
    /// A step reached its terminal failure.
    StepFailed {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        attempt: u32,
        error: String,
        retryable: bool,
    },
    /// A failed attempt will be retried after the given delay.
    StepRetrying {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        attempt: u32,
        delay_ms: u64,
    },
    /// A step was skipped without executing.
    StepSkipped {
        run_id: Uuid,
        workflow_id: String,
        timestamp: DateTime<Utc>,
        step_id: String,
        reason: String,
    },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::WorkflowStarted { run_id, .. }
            | WorkflowEvent::WorkflowCompleted { run_id, .. }
            | WorkflowEvent::WorkflowFailed { run_id, .. }
            | WorkflowEvent::WorkflowAborted { run_id, .. }
            | WorkflowEvent::StepStarted { run_id, .. }
            | WorkflowEvent::StepCompleted { run_id, .. }
            | WorkflowEvent::StepFailed { run_id, .. }
            | WorkflowEvent::StepRetrying { run_id, .. }
            | WorkflowEvent::StepSkipped { run_id, .. } => *run_id,
        }
    }

    /// The workflow definition id this event belongs to.
    pub fn workflow_id(&self) -> &str {
        match self {
            WorkflowEvent::WorkflowStarted { workflow_id, .. }
            | WorkflowEvent::WorkflowCompleted { workflow_id, .. }
            | WorkflowEvent::WorkflowFailed { workflow_id, .. }
            | WorkflowEvent::WorkflowAborted { workflow_id, .. }
            | WorkflowEvent::StepStarted { workflow_id, .. }
            | WorkflowEvent::StepCompleted { workflow_id, .. }
            | WorkflowEvent::StepFailed { workflow_id, .. }
            | WorkflowEvent::StepRetrying { workflow_id, .. }
            | WorkflowEvent::StepSkipped { workflow_id, .. } => workflow_id,
        }
    }

    /// Emission timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            WorkflowEvent::WorkflowStarted { timestamp, .. }
            | WorkflowEvent::WorkflowCompleted { timestamp, .. }
            | WorkflowEvent::WorkflowFailed { timestamp, .. }
            | WorkflowEvent::WorkflowAborted { timestamp, .. }
            | WorkflowEvent::StepStarted { timestamp, .. }
            | WorkflowEvent::StepCompleted { timestamp, .. }
            | WorkflowEvent::StepFailed { timestamp, .. }
            | WorkflowEvent::StepRetrying { timestamp, .. }
            | WorkflowEvent::StepSkipped { timestamp, .. } => *timestamp,
        }
    }

    /// The step this event concerns, when it is a step-level event.
    pub fn step_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::StepStarted { step_id, .. }
            | WorkflowEvent::StepCompleted { step_id, .. }
            | WorkflowEvent::StepFailed { step_id, .. }
            | WorkflowEvent::StepRetrying { step_id, .. }
            | WorkflowEvent::StepSkipped { step_id, .. } => Some(step_id),
            _ => None,
        }
    }
}
