//! Fluent builders over hand-built definitions.
//!
//! Pure sugar: every builder method maps one-to-one onto a
//! `WorkflowDefinition`/`StepDefinition` field, and `build()` runs the same
//! structural validation the registry applies.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use botwright_types::{StepResult, WorkflowError};
use serde_json::Value;

use crate::definition::{
    StepDefinition, WorkflowDefinition, context_init_fn, predicate_fn, step_fn,
    transform_input_fn, transform_output_fn, validate_definition, validate_fn,
};
use crate::retry::RetryOverride;
use crate::validation::Verdict;

// ---------------------------------------------------------------------------
// StepBuilder
// ---------------------------------------------------------------------------

/// Builds one [`StepDefinition`].
pub struct StepBuilder<C> {
    step: StepDefinition<C>,
}

impl<C: Send + Sync + 'static> StepBuilder<C> {
    /// Start a step from its id and execute callback.
    pub fn new<F, Fut>(id: impl Into<String>, execute: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        Self {
            step: StepDefinition::new(id, step_fn(execute)),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.step.name = name.into();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.step.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate<F, Fut, V>(mut self, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = V> + Send + 'static,
        V: Into<Verdict>,
    {
        self.step.validate = Some(validate_fn(f));
        self
    }

    pub fn validate_output<F, Fut, V>(mut self, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = V> + Send + 'static,
        V: Into<Verdict>,
    {
        self.step.validate_output = Some(validate_fn(f));
        self
    }

    pub fn should_skip<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.step.should_skip = Some(predicate_fn(f));
        self
    }

    pub fn condition<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.step.condition = Some(predicate_fn(f));
        self
    }

    pub fn transform_input<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        self.step.transform_input = Some(transform_input_fn(f));
        self
    }

    pub fn with_retry(mut self, retry: RetryOverride) -> Self {
        self.step.retry = Some(retry);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.step.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn continue_on_failure(mut self, continue_on_failure: bool) -> Self {
        self.step.continue_on_failure = continue_on_failure;
        self
    }

    fn build(self) -> StepDefinition<C> {
        self.step
    }
}

// ---------------------------------------------------------------------------
// WorkflowBuilder
// ---------------------------------------------------------------------------

/// Builds one [`WorkflowDefinition`].
pub struct WorkflowBuilder<C> {
    definition: WorkflowDefinition<C>,
}

impl<C: Send + Sync + 'static> WorkflowBuilder<C> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            definition: WorkflowDefinition::new(id, Vec::new()),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.definition.name = name.into();
        self
    }

    /// Append a step in declared order.
    pub fn step(mut self, step: StepBuilder<C>) -> Self {
        self.definition.steps.push(step.build());
        self
    }

    pub fn default_retry(mut self, retry: RetryOverride) -> Self {
        self.definition.default_retry = Some(retry);
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.definition.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn abort_on_error(mut self, abort_on_error: bool) -> Self {
        self.definition.abort_on_error = abort_on_error;
        self
    }

    pub fn init_context<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<C, WorkflowError>> + Send + 'static,
    {
        self.definition.init_context = Some(context_init_fn(f));
        self
    }

    pub fn transform_output<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(HashMap<String, StepResult>, Arc<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        self.definition.transform_output = Some(transform_output_fn(f));
        self
    }

    /// Validate and hand back the finished definition.
    pub fn build(self) -> Result<WorkflowDefinition<C>, WorkflowError> {
        validate_definition(&self.definition)?;
        Ok(self.definition)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
