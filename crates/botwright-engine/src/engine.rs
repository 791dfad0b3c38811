//! Top-level run state machine.
//!
//! `WorkflowEngine::run` executes one workflow definition against one input
//! and always returns a well-formed `WorkflowRun`; engine-owned failures
//! (structural validation, context init, output transform) become a `failed`
//! run rather than an `Err`. Steps run strictly sequentially in resolved
//! dependency order; a step's output feeds the next step's input unless the
//! next step reshapes it with `transform_input`.
//!
//! Cancellation composes through a child token: the caller's token and the
//! workflow timeout each cancel the same child, so either alone aborts the
//! run at the next check point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use botwright_types::{
    StepLog, StepResult, StepResultStatus, StepStatus, WorkflowEvent, WorkflowRun,
    WorkflowRunStatus,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{EventBus, ListenerFn};
use crate::dag::resolve_order;
use crate::definition::{StepDefinition, WorkflowDefinition, validate_definition};
use crate::executor::{self, StepEnv};
use crate::retry::RetryPolicy;

// ---------------------------------------------------------------------------
// RunOptions
// ---------------------------------------------------------------------------

/// Per-invocation options for [`WorkflowEngine::run`].
#[derive(Default)]
pub struct RunOptions {
    /// Run id override; generated (UUIDv7) when absent.
    pub run_id: Option<Uuid>,
    /// Listeners scoped to this run only, dropped when `run()` returns.
    pub listeners: Vec<ListenerFn>,
    /// External cancellation; composed with the workflow timeout.
    pub cancellation: Option<CancellationToken>,
    /// Caller metadata carried verbatim on the run record.
    pub metadata: HashMap<String, Value>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("run_id", &self.run_id)
            .field("listeners", &self.listeners.len())
            .field("has_cancellation", &self.cancellation.is_some())
            .field("metadata", &self.metadata)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes workflow definitions. One engine may serve many concurrent runs;
/// the only shared state is the engine-wide listener registry.
pub struct WorkflowEngine {
    bus: EventBus,
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
        }
    }

    /// Register a listener that receives events from every run.
    pub fn subscribe(&self, listener: ListenerFn) {
        self.bus.subscribe(listener);
    }

    /// Execute one run of `def` against `input`.
    ///
    /// Never returns an error: every failure mode ends in a terminal
    /// `WorkflowRun` with `status`, `error`, and the per-step records filled
    /// in as far as execution got.
    ///
    /// Without an `init_context` on the definition the context starts from
    /// `C::default()`; use [`WorkflowEngine::run_with_init`] for context
    /// types that are only ever built by an initializer.
    pub async fn run<C>(
        &self,
        def: &WorkflowDefinition<C>,
        input: Value,
        options: RunOptions,
    ) -> WorkflowRun
    where
        C: Default + Serialize + Send + Sync + 'static,
    {
        let fallback = if def.init_context.is_some() {
            None
        } else {
            Some(C::default())
        };
        self.run_inner(def, input, options, fallback).await
    }

    /// Like [`WorkflowEngine::run`] but without the `Default` requirement on
    /// the context type. The definition must carry an `init_context`;
    /// otherwise the run fails.
    pub async fn run_with_init<C>(
        &self,
        def: &WorkflowDefinition<C>,
        input: Value,
        options: RunOptions,
    ) -> WorkflowRun
    where
        C: Serialize + Send + Sync + 'static,
    {
        self.run_inner(def, input, options, None).await
    }

    async fn run_inner<C>(
        &self,
        def: &WorkflowDefinition<C>,
        input: Value,
        options: RunOptions,
        fallback: Option<C>,
    ) -> WorkflowRun
    where
        C: Serialize + Send + Sync + 'static,
    {
        let run_id = options.run_id.unwrap_or_else(Uuid::now_v7);
        let started_at = Utc::now();
        let clock = Instant::now();
        let listeners = options.listeners;

        let mut run = WorkflowRun {
            run_id,
            workflow_id: def.id.clone(),
            status: WorkflowRunStatus::Pending,
            step_logs: Vec::new(),
            step_results: HashMap::new(),
            input: input.clone(),
            output: None,
            context: Value::Null,
            metadata: options.metadata,
            started_at,
            completed_at: None,
            error: None,
        };

        if let Err(err) = validate_definition(def) {
            tracing::warn!(run_id = %run_id, workflow_id = def.id.as_str(), error = %err, "definition rejected");
            return self
                .finish(run, WorkflowRunStatus::Failed, Some(err.to_string()), clock, &listeners)
                .await;
        }

        // Context init is the last thing before the run counts as running.
        let ctx: Arc<C> = match &def.init_context {
            Some(init) => match init(input.clone()).await {
                Ok(ctx) => Arc::new(ctx),
                Err(err) => {
                    tracing::warn!(run_id = %run_id, workflow_id = def.id.as_str(), error = %err, "context initializer failed");
                    return self
                        .finish(
                            run,
                            WorkflowRunStatus::Failed,
                            Some(format!("context initializer failed: {err}")),
                            clock,
                            &listeners,
                        )
                        .await;
                }
            },
            None => match fallback {
                Some(ctx) => Arc::new(ctx),
                None => {
                    let message = format!(
                        "workflow '{}' has no context initializer",
                        def.id
                    );
                    tracing::warn!(run_id = %run_id, workflow_id = def.id.as_str(), "definition lacks a context initializer");
                    return self
                        .finish(run, WorkflowRunStatus::Failed, Some(message), clock, &listeners)
                        .await;
                }
            },
        };

        run.status = WorkflowRunStatus::Running;
        tracing::info!(run_id = %run_id, workflow_id = def.id.as_str(), steps = def.steps.len(), "workflow run started");
        self.bus
            .emit(
                &WorkflowEvent::WorkflowStarted {
                    run_id,
                    workflow_id: def.id.clone(),
                    timestamp: Utc::now(),
                },
                &listeners,
            )
            .await;

        // Workflow timeout and external cancellation compose on a child token.
        let parent = options.cancellation.unwrap_or_default();
        let cancel = parent.child_token();
        let timeout_guard = def.timeout_ms.map(|timeout_ms| {
            let trip = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
                tracing::warn!(run_id = %run_id, timeout_ms, "workflow timeout reached, aborting run");
                trip.cancel();
            })
        });

        // Degraded mode on a cycle: warn and run in declared order. The
        // runtime dependency gate is disabled with it, otherwise every cycle
        // member would block on its unresolved dependency and nothing would
        // execute.
        let (order, dependency_gate): (Vec<usize>, bool) = match resolve_order(&def.steps) {
            Ok(order) => (order, true),
            Err(err) => {
                tracing::warn!(
                    run_id = %run_id,
                    workflow_id = def.id.as_str(),
                    error = %err,
                    "dependency cycle detected, falling back to declared order"
                );
                ((0..def.steps.len()).collect(), false)
            }
        };

        let mut previous_output = Value::Null;
        let mut last_success: Option<Value> = None;
        let mut status = WorkflowRunStatus::Running;
        let mut error: Option<String> = None;

        for index in order {
            let step = &def.steps[index];

            if cancel.is_cancelled() {
                status = WorkflowRunStatus::Aborted;
                break;
            }

            let policy = RetryPolicy::resolve(def.default_retry.as_ref(), step.retry.as_ref());
            let env = StepEnv {
                run_id,
                workflow_id: &def.id,
                cancel: &cancel,
                bus: &self.bus,
                run_listeners: &listeners,
            };

            // A dependency that was skipped (or never produced a result) is a
            // hard block; a failed dependency reached under
            // continue_on_failure does not block its dependents.
            if dependency_gate
                && let Some(unmet) = unmet_dependency(step, &run.step_results)
            {
                let outcome =
                    executor::skip_step(step, &policy, &format!("unmet dependency '{unmet}'"), &env)
                        .await;
                run.step_logs.extend(outcome.logs);
                run.step_results.insert(step.id.clone(), outcome.result);
                continue;
            }

            let step_input = match &step.transform_input {
                Some(transform) => match transform(previous_output.clone(), ctx.clone()).await {
                    Ok(value) => value,
                    Err(err) => {
                        let message = format!("input transform failed: {err}");
                        self.record_transform_failure(&mut run, step, &policy, &message, &env)
                            .await;
                        if step.continue_on_failure || !def.abort_on_error {
                            continue;
                        }
                        status = WorkflowRunStatus::Failed;
                        error = Some(format!("step '{}' failed: {message}", step.id));
                        break;
                    }
                },
                None => previous_output.clone(),
            };

            let outcome =
                executor::execute_step(step, step_input, ctx.clone(), &policy, &env).await;
            run.step_logs.extend(outcome.logs);
            let result_status = outcome.result.status;
            let result_error = outcome.result.error.clone();
            run.step_results.insert(step.id.clone(), outcome.result);

            if outcome.aborted {
                status = WorkflowRunStatus::Aborted;
                break;
            }

            match result_status {
                StepResultStatus::Success => {
                    if let Some(result) = run.step_results.get(&step.id) {
                        previous_output = result.output.clone().unwrap_or(Value::Null);
                        last_success = Some(previous_output.clone());
                    }
                }
                StepResultStatus::Skipped => {}
                StepResultStatus::Error => {
                    if step.continue_on_failure || !def.abort_on_error {
                        // Keep iterating; previous_output is left unchanged.
                        continue;
                    }
                    status = WorkflowRunStatus::Failed;
                    error = Some(format!(
                        "step '{}' failed: {}",
                        step.id,
                        result_error.unwrap_or_else(|| "unknown error".into())
                    ));
                    break;
                }
            }
        }

        if let Some(guard) = timeout_guard {
            guard.abort();
        }

        if status == WorkflowRunStatus::Running {
            status = WorkflowRunStatus::Completed;
            match &def.transform_output {
                Some(transform) => {
                    match transform(run.step_results.clone(), ctx.clone()).await {
                        Ok(output) => run.output = Some(output),
                        Err(err) => {
                            status = WorkflowRunStatus::Failed;
                            error = Some(format!("output transform failed: {err}"));
                        }
                    }
                }
                None => run.output = last_success,
            }
        }

        run.context = serde_json::to_value(&*ctx).unwrap_or(Value::Null);
        self.finish(run, status, error, clock, &listeners).await
    }

    /// Seal the run record and emit its terminal event.
    async fn finish(
        &self,
        mut run: WorkflowRun,
        status: WorkflowRunStatus,
        error: Option<String>,
        clock: Instant,
        listeners: &[ListenerFn],
    ) -> WorkflowRun {
        let duration_ms = clock.elapsed().as_millis() as u64;
        run.status = status;
        run.error = error;
        run.completed_at = Some(Utc::now());

        let event = match status {
            WorkflowRunStatus::Completed => {
                tracing::info!(run_id = %run.run_id, workflow_id = run.workflow_id.as_str(), duration_ms, "workflow run completed");
                WorkflowEvent::WorkflowCompleted {
                    run_id: run.run_id,
                    workflow_id: run.workflow_id.clone(),
                    timestamp: Utc::now(),
                    duration_ms,
                }
            }
            WorkflowRunStatus::Aborted => {
                tracing::info!(run_id = %run.run_id, workflow_id = run.workflow_id.as_str(), duration_ms, "workflow run aborted");
                WorkflowEvent::WorkflowAborted {
                    run_id: run.run_id,
                    workflow_id: run.workflow_id.clone(),
                    timestamp: Utc::now(),
                }
            }
            _ => {
                let message = run.error.clone().unwrap_or_else(|| "unknown error".into());
                tracing::warn!(run_id = %run.run_id, workflow_id = run.workflow_id.as_str(), error = message.as_str(), "workflow run failed");
                WorkflowEvent::WorkflowFailed {
                    run_id: run.run_id,
                    workflow_id: run.workflow_id.clone(),
                    timestamp: Utc::now(),
                    error: message,
                }
            }
        };
        self.bus.emit(&event, listeners).await;
        run
    }

    /// Record an input-transform failure as a failed step without invoking
    /// the executor.
    async fn record_transform_failure<C>(
        &self,
        run: &mut WorkflowRun,
        step: &StepDefinition<C>,
        policy: &RetryPolicy,
        message: &str,
        env: &StepEnv<'_>,
    ) {
        let now = Utc::now();
        run.step_logs.push(StepLog {
            step_id: step.id.clone(),
            step_name: step.name.clone(),
            status: StepStatus::Failed,
            attempt: 0,
            max_attempts: policy.max_attempts,
            started_at: Some(now),
            completed_at: Some(now),
            duration_ms: Some(0),
            output: None,
            error: Some(message.to_string()),
        });
        run.step_results
            .insert(step.id.clone(), StepResult::error(message, 0, 0, false));
        self.bus
            .emit(
                &WorkflowEvent::StepFailed {
                    run_id: env.run_id,
                    workflow_id: env.workflow_id.to_string(),
                    timestamp: now,
                    step_id: step.id.clone(),
                    attempt: 0,
                    error: message.to_string(),
                    retryable: false,
                },
                env.run_listeners,
            )
            .await;
    }
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First dependency of `step` that blocks it: skipped, or no result recorded
/// at all (unknown id or never reached). Failed dependencies do not block.
fn unmet_dependency<'a, C>(
    step: &'a StepDefinition<C>,
    results: &HashMap<String, StepResult>,
) -> Option<&'a str> {
    step.depends_on.iter().find_map(|dep| match results.get(dep) {
        Some(result) if result.status == StepResultStatus::Skipped => Some(dep.as_str()),
        Some(_) => None,
        None => Some(dep.as_str()),
    })
}
