//! Named workflow registration.
//!
//! The registry is shared across tasks, so it sits on a `DashMap`. A
//! duplicate `register` is a typed error rather than a silent overwrite, and
//! disabled workflows stay listed so operators can re-enable them.

use std::sync::Arc;

use botwright_types::WorkflowError;
use dashmap::DashMap;

use crate::definition::{WorkflowDefinition, validate_definition};

/// A registered workflow plus its enablement flag.
pub struct RegisteredWorkflow<C> {
    pub definition: Arc<WorkflowDefinition<C>>,
    pub enabled: bool,
}

impl<C> Clone for RegisteredWorkflow<C> {
    fn clone(&self) -> Self {
        Self {
            definition: Arc::clone(&self.definition),
            enabled: self.enabled,
        }
    }
}

/// Concurrent registry of workflow definitions keyed by workflow id.
pub struct WorkflowRegistry<C> {
    workflows: DashMap<String, RegisteredWorkflow<C>>,
}

impl<C> WorkflowRegistry<C> {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    /// Register a definition. Rejects structural defects and duplicate ids.
    pub fn register(&self, definition: WorkflowDefinition<C>) -> Result<(), WorkflowError> {
        validate_definition(&definition)?;
        if self.workflows.contains_key(&definition.id) {
            return Err(WorkflowError::DuplicateWorkflow(definition.id));
        }
        tracing::debug!(workflow_id = definition.id.as_str(), "workflow registered");
        self.workflows.insert(
            definition.id.clone(),
            RegisteredWorkflow {
                definition: Arc::new(definition),
                enabled: true,
            },
        );
        Ok(())
    }

    /// Fetch a registered workflow; callers gate execution on `enabled`.
    pub fn get(&self, id: &str) -> Option<RegisteredWorkflow<C>> {
        self.workflows.get(id).map(|entry| entry.value().clone())
    }

    /// All registered workflow ids, sorted for stable output.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Remove a workflow, returning its definition.
    pub fn unregister(&self, id: &str) -> Result<Arc<WorkflowDefinition<C>>, WorkflowError> {
        self.workflows
            .remove(id)
            .map(|(_, registered)| registered.definition)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.to_string()))
    }

    /// Enable or disable a workflow without removing it.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), WorkflowError> {
        let mut entry = self
            .workflows
            .get_mut(id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(id.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }
}

impl<C> Default for WorkflowRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
