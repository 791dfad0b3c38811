//! Per-step attempt state machine.
//!
//! One call to [`execute_step`] drives a step through its whole lifecycle:
//! condition/skip gates, input validation, the execute callback raced against
//! its timeout and the run's abort signal, output validation, and the retry
//! loop with backoff. It returns the final `StepResult` plus the append-only
//! `StepLog` rows produced along the way (N retries yield N+1 rows).
//!
//! The abort signal is cooperative: it is checked before each attempt and
//! raced against the execute future and the backoff sleep, but a callback
//! that ignores it is not force-terminated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use botwright_types::{StepLog, StepResult, StepStatus, WorkflowError, WorkflowEvent};
use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{EventBus, ListenerFn};
use crate::definition::StepDefinition;
use crate::retry::RetryPolicy;
use crate::validation::{self, ValidationKind};

// ---------------------------------------------------------------------------
// StepEnv / StepOutcome
// ---------------------------------------------------------------------------

/// Run-scoped plumbing threaded into each step execution.
pub(crate) struct StepEnv<'a> {
    pub run_id: Uuid,
    pub workflow_id: &'a str,
    pub cancel: &'a CancellationToken,
    pub bus: &'a EventBus,
    pub run_listeners: &'a [ListenerFn],
}

impl StepEnv<'_> {
    async fn emit(&self, event: WorkflowEvent) {
        self.bus.emit(&event, self.run_listeners).await;
    }
}

/// What one step execution produced.
pub(crate) struct StepOutcome {
    pub result: StepResult,
    pub logs: Vec<StepLog>,
    /// True when the run's abort signal ended this step; the engine turns
    /// this into an aborted run rather than a failed one.
    pub aborted: bool,
}

// ---------------------------------------------------------------------------
// Skip
// ---------------------------------------------------------------------------

/// Record a skipped step: one log row, a skipped result, no execute call and
/// no retry budget consumed.
pub(crate) async fn skip_step<C>(
    step: &StepDefinition<C>,
    policy: &RetryPolicy,
    reason: &str,
    env: &StepEnv<'_>,
) -> StepOutcome {
    let now = Utc::now();
    tracing::debug!(
        run_id = %env.run_id,
        step_id = step.id.as_str(),
        reason,
        "step skipped"
    );
    env.emit(WorkflowEvent::StepSkipped {
        run_id: env.run_id,
        workflow_id: env.workflow_id.to_string(),
        timestamp: now,
        step_id: step.id.clone(),
        reason: reason.to_string(),
    })
    .await;

    StepOutcome {
        result: StepResult::skipped(),
        logs: vec![StepLog {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status: StepStatus::Skipped,
            attempt: 0,
            max_attempts: policy.max_attempts,
            started_at: Some(now),
            completed_at: Some(now),
            duration_ms: Some(0),
            output: None,
            error: None,
        }],
        aborted: false,
    }
}

// ---------------------------------------------------------------------------
// execute_step
// ---------------------------------------------------------------------------

pub(crate) async fn execute_step<C>(
    step: &StepDefinition<C>,
    input: Value,
    ctx: Arc<C>,
    policy: &RetryPolicy,
    env: &StepEnv<'_>,
) -> StepOutcome
where
    C: Send + Sync + 'static,
{
    if let Some(condition) = &step.condition {
        if !condition(ctx.clone()).await {
            return skip_step(step, policy, "condition returned false", env).await;
        }
    }
    if let Some(should_skip) = &step.should_skip {
        if should_skip(ctx.clone()).await {
            return skip_step(step, policy, "skip predicate returned true", env).await;
        }
    }

    let step_clock = Instant::now();
    let mut logs = Vec::new();
    // Budgeted attempts and actual execute invocations diverge when input
    // validation fails before the callback runs.
    let mut executed: u32 = 0;
    let mut attempt: u32 = 1;

    loop {
        if env.cancel.is_cancelled() {
            return aborted_outcome(step, executed, step_clock, logs);
        }

        let attempt_started_at = Utc::now();
        let attempt_clock = Instant::now();

        tracing::debug!(
            run_id = %env.run_id,
            step_id = step.id.as_str(),
            attempt,
            max_attempts = policy.max_attempts,
            "step attempt started"
        );
        env.emit(WorkflowEvent::StepStarted {
            run_id: env.run_id,
            workflow_id: env.workflow_id.to_string(),
            timestamp: attempt_started_at,
            step_id: step.id.clone(),
            attempt,
            max_attempts: policy.max_attempts,
        })
        .await;

        let mut attempt_err: Option<WorkflowError> = None;
        let mut output: Option<Value> = None;

        if let Some(validate) = &step.validate {
            let verdict = validate(input.clone(), ctx.clone()).await;
            if let Err(err) = validation::check(verdict, ValidationKind::Input, &step.id) {
                attempt_err = Some(err);
            }
        }

        if attempt_err.is_none() {
            executed += 1;
            let fut = (step.execute)(input.clone(), ctx.clone());
            let raced = match step.timeout_ms {
                Some(timeout_ms) => {
                    tokio::select! {
                        res = tokio::time::timeout(Duration::from_millis(timeout_ms), fut) => {
                            match res {
                                Ok(inner) => inner,
                                Err(_) => Err(WorkflowError::StepTimeout {
                                    step_id: step.id.clone(),
                                    timeout_ms,
                                }),
                            }
                        }
                        _ = env.cancel.cancelled() => Err(WorkflowError::Aborted),
                    }
                }
                None => {
                    tokio::select! {
                        res = fut => res,
                        _ = env.cancel.cancelled() => Err(WorkflowError::Aborted),
                    }
                }
            };
            match raced {
                Ok(value) => output = Some(value),
                Err(err) => attempt_err = Some(err),
            }
        }

        if attempt_err.is_none() {
            if let Some(validate_output) = &step.validate_output {
                let candidate = output.clone().unwrap_or(Value::Null);
                let verdict = validate_output(candidate, ctx.clone()).await;
                if let Err(err) = validation::check(verdict, ValidationKind::Output, &step.id) {
                    attempt_err = Some(err);
                    output = None;
                }
            }
        }

        let attempt_ms = attempt_clock.elapsed().as_millis() as u64;

        let err = match attempt_err {
            None => {
                let value = output.unwrap_or(Value::Null);
                logs.push(StepLog {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    status: StepStatus::Completed,
                    attempt,
                    max_attempts: policy.max_attempts,
                    started_at: Some(attempt_started_at),
                    completed_at: Some(Utc::now()),
                    duration_ms: Some(attempt_ms),
                    output: Some(value.clone()),
                    error: None,
                });
                env.emit(WorkflowEvent::StepCompleted {
                    run_id: env.run_id,
                    workflow_id: env.workflow_id.to_string(),
                    timestamp: Utc::now(),
                    step_id: step.id.clone(),
                    attempt,
                    duration_ms: attempt_ms,
                })
                .await;
                let total_ms = step_clock.elapsed().as_millis() as u64;
                return StepOutcome {
                    result: StepResult::success(value, executed, total_ms),
                    logs,
                    aborted: false,
                };
            }
            Some(err) => err,
        };

        if matches!(err, WorkflowError::Aborted) {
            logs.push(failed_log(step, policy, attempt, attempt_started_at, attempt_ms, &err));
            return aborted_outcome(step, executed, step_clock, logs);
        }

        if policy.should_retry(&err, attempt) {
            let delay_ms = policy.delay_for_attempt(attempt);
            tracing::warn!(
                run_id = %env.run_id,
                step_id = step.id.as_str(),
                attempt,
                delay_ms,
                error = %err,
                "step attempt failed, retrying"
            );
            logs.push(StepLog {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                status: StepStatus::Retrying,
                attempt,
                max_attempts: policy.max_attempts,
                started_at: Some(attempt_started_at),
                completed_at: Some(Utc::now()),
                duration_ms: Some(attempt_ms),
                output: None,
                error: Some(err.to_string()),
            });
            env.emit(WorkflowEvent::StepRetrying {
                run_id: env.run_id,
                workflow_id: env.workflow_id.to_string(),
                timestamp: Utc::now(),
                step_id: step.id.clone(),
                attempt,
                delay_ms,
            })
            .await;

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => false,
                _ = env.cancel.cancelled() => true,
            };
            if cancelled {
                return aborted_outcome(step, executed, step_clock, logs);
            }
            attempt += 1;
            continue;
        }

        // Terminal failure. The classifier only runs while budget remains, so
        // on exhaustion `retryable` reports whether the error itself was.
        let retryable = attempt >= policy.max_attempts && err.is_retryable();
        let validation_detail = match &err {
            WorkflowError::InputValidation { message, .. }
            | WorkflowError::OutputValidation { message, .. } => Some(message.clone()),
            _ => None,
        };

        tracing::warn!(
            run_id = %env.run_id,
            step_id = step.id.as_str(),
            attempt,
            retryable,
            error = %err,
            "step failed"
        );
        logs.push(failed_log(step, policy, attempt, attempt_started_at, attempt_ms, &err));
        env.emit(WorkflowEvent::StepFailed {
            run_id: env.run_id,
            workflow_id: env.workflow_id.to_string(),
            timestamp: Utc::now(),
            step_id: step.id.clone(),
            attempt,
            error: err.to_string(),
            retryable,
        })
        .await;

        let total_ms = step_clock.elapsed().as_millis() as u64;
        let mut result = StepResult::error(err.to_string(), executed, total_ms, retryable);
        if let Some(detail) = validation_detail {
            result = result.with_validation(detail);
        }
        return StepOutcome {
            result,
            logs,
            aborted: false,
        };
    }
}

fn failed_log<C>(
    step: &StepDefinition<C>,
    policy: &RetryPolicy,
    attempt: u32,
    started_at: chrono::DateTime<Utc>,
    duration_ms: u64,
    err: &WorkflowError,
) -> StepLog {
    StepLog {
        step_id: step.id.clone(),
        step_name: step.name.clone(),
        status: StepStatus::Failed,
        attempt,
        max_attempts: policy.max_attempts,
        started_at: Some(started_at),
        completed_at: Some(Utc::now()),
        duration_ms: Some(duration_ms),
        output: None,
        error: Some(err.to_string()),
    }
}

fn aborted_outcome<C>(
    step: &StepDefinition<C>,
    executed: u32,
    step_clock: Instant,
    logs: Vec<StepLog>,
) -> StepOutcome {
    let total_ms = step_clock.elapsed().as_millis() as u64;
    tracing::debug!(step_id = step.id.as_str(), "step ended by abort signal");
    StepOutcome {
        result: StepResult::error(
            WorkflowError::Aborted.to_string(),
            executed,
            total_ms,
            false,
        ),
        logs,
        aborted: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
