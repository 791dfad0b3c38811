//! Retry policy resolution and backoff computation.
//!
//! Settings merge field-by-field across three levels: step override, then the
//! workflow default, then the baseline. A step may override only
//! `max_attempts` while inheriting the workflow's delay settings. Backoff is
//! exponential with a uniform jitter band; `jitter = 0` is deterministic.

use std::sync::Arc;

use botwright_types::WorkflowError;
use rand::Rng;

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

pub const BASELINE_MAX_ATTEMPTS: u32 = 3;
pub const BASELINE_INITIAL_DELAY_MS: u64 = 1000;
pub const BASELINE_MAX_DELAY_MS: u64 = 30_000;
pub const BASELINE_JITTER: f64 = 0.1;

/// Classifier deciding whether a failed attempt may be retried.
///
/// Receives the error and the 1-based attempt number that just failed. Only
/// consulted while attempt budget remains.
pub type RetryableFn = Arc<dyn Fn(&WorkflowError, u32) -> bool + Send + Sync>;

// ---------------------------------------------------------------------------
// RetryOverride
// ---------------------------------------------------------------------------

/// Partial retry settings; unset fields inherit from the next level down.
#[derive(Clone, Default)]
pub struct RetryOverride {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    /// Jitter fraction in `[0, 1]`.
    pub jitter: Option<f64>,
    pub is_retryable: Option<RetryableFn>,
}

impl RetryOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn with_initial_delay_ms(mut self, initial_delay_ms: u64) -> Self {
        self.initial_delay_ms = Some(initial_delay_ms);
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = Some(max_delay_ms);
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = Some(jitter.clamp(0.0, 1.0));
        self
    }

    pub fn with_retryable<F>(mut self, f: F) -> Self
    where
        F: Fn(&WorkflowError, u32) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Some(Arc::new(f));
        self
    }
}

impl std::fmt::Debug for RetryOverride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryOverride")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter", &self.jitter)
            .field("has_classifier", &self.is_retryable.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Fully resolved retry settings for one step.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
    is_retryable: Option<RetryableFn>,
}

impl RetryPolicy {
    /// Merge step override over workflow default over the baseline, one field
    /// at a time.
    pub fn resolve(workflow: Option<&RetryOverride>, step: Option<&RetryOverride>) -> Self {
        let pick_u32 = |f: fn(&RetryOverride) -> Option<u32>, fallback: u32| {
            step.and_then(f)
                .or_else(|| workflow.and_then(f))
                .unwrap_or(fallback)
        };
        let pick_u64 = |f: fn(&RetryOverride) -> Option<u64>, fallback: u64| {
            step.and_then(f)
                .or_else(|| workflow.and_then(f))
                .unwrap_or(fallback)
        };

        Self {
            max_attempts: pick_u32(|o| o.max_attempts, BASELINE_MAX_ATTEMPTS).max(1),
            initial_delay_ms: pick_u64(|o| o.initial_delay_ms, BASELINE_INITIAL_DELAY_MS),
            max_delay_ms: pick_u64(|o| o.max_delay_ms, BASELINE_MAX_DELAY_MS),
            jitter: step
                .and_then(|o| o.jitter)
                .or_else(|| workflow.and_then(|o| o.jitter))
                .unwrap_or(BASELINE_JITTER)
                .clamp(0.0, 1.0),
            is_retryable: step
                .and_then(|o| o.is_retryable.clone())
                .or_else(|| workflow.and_then(|o| o.is_retryable.clone())),
        }
    }

    /// The baseline policy with no overrides.
    pub fn baseline() -> Self {
        Self::resolve(None, None)
    }

    /// Whether the failure of the given 1-based attempt may be retried.
    ///
    /// The classifier is only consulted while attempt budget remains; the
    /// baseline classifier retries everything except abort.
    pub fn should_retry(&self, error: &WorkflowError, attempt: u32) -> bool {
        if attempt >= self.max_attempts {
            return false;
        }
        match &self.is_retryable {
            Some(classifier) => classifier(error, attempt),
            None => error.is_retryable(),
        }
    }

    /// Backoff delay in ms before the attempt after `failed_attempt` (1-based).
    ///
    /// `min(initial * 2^(n-1), max)`, scaled by a uniform factor in
    /// `[1 - jitter, 1 + jitter]`, floored at zero and rounded to the nearest
    /// millisecond.
    pub fn delay_for_attempt(&self, failed_attempt: u32) -> u64 {
        let exponent = failed_attempt.saturating_sub(1).min(63);
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX))
            .min(self.max_delay_ms);
        if self.jitter <= 0.0 || base == 0 {
            return base;
        }
        let factor: f64 = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = base as f64 * (1.0 + factor);
        jittered.max(0.0).round() as u64
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("jitter", &self.jitter)
            .field("has_classifier", &self.is_retryable.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
