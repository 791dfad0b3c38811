//! Callback-based workflow and step definitions.
//!
//! Definitions are immutable once built. Steps are opaque async callbacks over
//! a caller-defined shared context type `C`; the engine never interprets what
//! a step does. Callbacks are stored as `Arc<dyn Fn(..) -> BoxFuture>` so the
//! definition stays object-safe and cheaply shareable across runs.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use botwright_types::{StepResult, WorkflowError};
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::retry::RetryOverride;
use crate::validation::Verdict;

// ---------------------------------------------------------------------------
// Callback aliases
// ---------------------------------------------------------------------------

/// A step's execute callback: `(input, context) -> output`.
pub type StepFn<C> =
    Arc<dyn Fn(Value, Arc<C>) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync>;

/// Input/output validation callback, returning a normalized verdict.
pub type ValidateFn<C> = Arc<dyn Fn(Value, Arc<C>) -> BoxFuture<'static, Verdict> + Send + Sync>;

/// Boolean predicate over the shared context (skip and condition gates).
pub type PredicateFn<C> = Arc<dyn Fn(Arc<C>) -> BoxFuture<'static, bool> + Send + Sync>;

/// Reshapes the previous step's output into this step's input.
pub type TransformInputFn<C> =
    Arc<dyn Fn(Value, Arc<C>) -> BoxFuture<'static, Result<Value, WorkflowError>> + Send + Sync>;

/// Builds the shared context from the run input.
pub type ContextInitFn<C> =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<C, WorkflowError>> + Send + Sync>;

/// Computes the run's final output from the per-step results and context.
pub type TransformOutputFn<C> = Arc<
    dyn Fn(HashMap<String, StepResult>, Arc<C>) -> BoxFuture<'static, Result<Value, WorkflowError>>
        + Send
        + Sync,
>;

/// Box a plain async closure into a [`StepFn`].
pub fn step_fn<C, F, Fut>(f: F) -> StepFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    Arc::new(move |input, ctx| Box::pin(f(input, ctx)))
}

/// Box a plain async closure into a [`ValidateFn`]. The closure may return
/// anything convertible into a [`Verdict`] (`bool` or a failure message).
pub fn validate_fn<C, F, Fut, V>(f: F) -> ValidateFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = V> + Send + 'static,
    V: Into<Verdict>,
{
    Arc::new(move |value, ctx| {
        let fut = f(value, ctx);
        Box::pin(async move { fut.await.into() })
    })
}

/// Box a plain async closure into a [`PredicateFn`].
pub fn predicate_fn<C, F, Fut>(f: F) -> PredicateFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = bool> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}

/// Box a plain async closure into a [`TransformInputFn`].
pub fn transform_input_fn<C, F, Fut>(f: F) -> TransformInputFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    Arc::new(move |prev, ctx| Box::pin(f(prev, ctx)))
}

/// Box a plain async closure into a [`ContextInitFn`].
pub fn context_init_fn<C, F, Fut>(f: F) -> ContextInitFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, WorkflowError>> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

/// Box a plain async closure into a [`TransformOutputFn`].
pub fn transform_output_fn<C, F, Fut>(f: F) -> TransformOutputFn<C>
where
    C: Send + Sync + 'static,
    F: Fn(HashMap<String, StepResult>, Arc<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
{
    Arc::new(move |results, ctx| Box::pin(f(results, ctx)))
}

// ---------------------------------------------------------------------------
// StepDefinition
// ---------------------------------------------------------------------------

/// One unit of work in a workflow.
pub struct StepDefinition<C> {
    /// Unique id within the workflow.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Ids of steps that must reach a satisfying terminal state first.
    pub depends_on: Vec<String>,
    /// The opaque work callback.
    pub execute: StepFn<C>,
    /// Input validation, run before each execute attempt.
    pub validate: Option<ValidateFn<C>>,
    /// Output validation, run after each successful execute attempt.
    pub validate_output: Option<ValidateFn<C>>,
    /// When true, the step is skipped without executing.
    pub should_skip: Option<PredicateFn<C>>,
    /// Gate predicate; a false result skips the step.
    pub condition: Option<PredicateFn<C>>,
    /// Reshape the previous step's output into this step's input.
    pub transform_input: Option<TransformInputFn<C>>,
    /// Per-step retry settings, merged over the workflow default.
    pub retry: Option<RetryOverride>,
    /// Per-attempt execute timeout in milliseconds.
    pub timeout_ms: Option<u64>,
    /// When true, a terminal failure does not stop the run.
    pub continue_on_failure: bool,
}

impl<C> StepDefinition<C> {
    /// Minimal step with an execute callback and defaults everywhere else.
    pub fn new(id: impl Into<String>, execute: StepFn<C>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            depends_on: Vec::new(),
            execute,
            validate: None,
            validate_output: None,
            should_skip: None,
            condition: None,
            transform_input: None,
            retry: None,
            timeout_ms: None,
            continue_on_failure: false,
        }
    }
}

impl<C> Clone for StepDefinition<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            depends_on: self.depends_on.clone(),
            execute: Arc::clone(&self.execute),
            validate: self.validate.clone(),
            validate_output: self.validate_output.clone(),
            should_skip: self.should_skip.clone(),
            condition: self.condition.clone(),
            transform_input: self.transform_input.clone(),
            retry: self.retry.clone(),
            timeout_ms: self.timeout_ms,
            continue_on_failure: self.continue_on_failure,
        }
    }
}

impl<C> std::fmt::Debug for StepDefinition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("has_validate", &self.validate.is_some())
            .field("has_validate_output", &self.validate_output.is_some())
            .field("timeout_ms", &self.timeout_ms)
            .field("continue_on_failure", &self.continue_on_failure)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A named, reusable definition of an ordered set of steps.
pub struct WorkflowDefinition<C> {
    /// Unique workflow id.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Steps in declared order.
    pub steps: Vec<StepDefinition<C>>,
    /// Workflow-level retry defaults, merged under each step's override.
    pub default_retry: Option<RetryOverride>,
    /// Whole-run timeout in milliseconds; trips the run's abort signal.
    pub timeout_ms: Option<u64>,
    /// When false, a step failure does not stop the run (default true).
    pub abort_on_error: bool,
    /// Builds the shared context from the run input.
    pub init_context: Option<ContextInitFn<C>>,
    /// Computes the run's final output from step results.
    pub transform_output: Option<TransformOutputFn<C>>,
}

impl<C> WorkflowDefinition<C> {
    /// Minimal workflow with the given steps and defaults everywhere else.
    pub fn new(id: impl Into<String>, steps: Vec<StepDefinition<C>>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            steps,
            default_retry: None,
            timeout_ms: None,
            abort_on_error: true,
            init_context: None,
            transform_output: None,
        }
    }
}

impl<C> Clone for WorkflowDefinition<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            steps: self.steps.clone(),
            default_retry: self.default_retry.clone(),
            timeout_ms: self.timeout_ms,
            abort_on_error: self.abort_on_error,
            init_context: self.init_context.clone(),
            transform_output: self.transform_output.clone(),
        }
    }
}

impl<C> std::fmt::Debug for WorkflowDefinition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("timeout_ms", &self.timeout_ms)
            .field("abort_on_error", &self.abort_on_error)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Structural validation
// ---------------------------------------------------------------------------

/// Validate the structural shape of a definition.
///
/// Checks: non-empty workflow id, at least one step, non-empty and unique
/// step ids. Dependency ids that name no real step are deliberately not an
/// error here; unmet dependencies are a run-time gate, not a definition
/// defect.
pub fn validate_definition<C>(def: &WorkflowDefinition<C>) -> Result<(), WorkflowError> {
    if def.id.trim().is_empty() {
        return Err(WorkflowError::Definition("workflow id is empty".into()));
    }
    if def.steps.is_empty() {
        return Err(WorkflowError::Definition(format!(
            "workflow '{}' has no steps",
            def.id
        )));
    }

    let mut seen = HashSet::new();
    for step in &def.steps {
        if step.id.trim().is_empty() {
            return Err(WorkflowError::Definition(format!(
                "workflow '{}' contains a step with an empty id",
                def.id
            )));
        }
        if !seen.insert(step.id.as_str()) {
            return Err(WorkflowError::Definition(format!(
                "duplicate step id '{}' in workflow '{}'",
                step.id, def.id
            )));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
