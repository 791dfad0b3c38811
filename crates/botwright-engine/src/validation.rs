//! Validator verdict normalization.
//!
//! Validation callbacks may answer with a plain boolean or with a failure
//! message; both normalize into a [`Verdict`]. A verdict is turned into the
//! matching typed error by [`check`], keeping input and output failures
//! distinguishable for retry classification and diagnostics.

use botwright_types::WorkflowError;

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Normalized outcome of a validation callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Validation passed.
    Pass,
    /// Validation failed without further detail.
    Fail,
    /// Validation failed with a diagnostic message.
    FailWith(String),
}

impl Verdict {
    /// Returns `true` when the verdict passes.
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl From<bool> for Verdict {
    fn from(pass: bool) -> Self {
        if pass { Verdict::Pass } else { Verdict::Fail }
    }
}

// A returned string is always a failure message, never a passing note.
impl From<String> for Verdict {
    fn from(message: String) -> Self {
        Verdict::FailWith(message)
    }
}

impl From<&str> for Verdict {
    fn from(message: &str) -> Self {
        Verdict::FailWith(message.to_string())
    }
}

// ---------------------------------------------------------------------------
// Checking
// ---------------------------------------------------------------------------

/// Which validation phase produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    Input,
    Output,
}

/// Convert a verdict into `Ok(())` or the matching typed validation error.
pub fn check(verdict: Verdict, kind: ValidationKind, step_id: &str) -> Result<(), WorkflowError> {
    let message = match verdict {
        Verdict::Pass => return Ok(()),
        Verdict::Fail => "validation predicate returned false".to_string(),
        Verdict::FailWith(message) => message,
    };
    let step_id = step_id.to_string();
    Err(match kind {
        ValidationKind::Input => WorkflowError::InputValidation { step_id, message },
        ValidationKind::Output => WorkflowError::OutputValidation { step_id, message },
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
