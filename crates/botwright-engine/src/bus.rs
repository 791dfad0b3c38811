//! Lifecycle event delivery.
//!
//! Listeners are boxed async callbacks. Delivery is sequential and awaited:
//! the engine does not start the next step until every listener has finished
//! with the previous step's events, which is what makes the per-run stream
//! verifiable. A listener error is logged and swallowed; it never affects the
//! run or the remaining listeners.

use std::future::Future;
use std::sync::{Arc, RwLock};

use botwright_types::{WorkflowError, WorkflowEvent};
use futures_util::future::BoxFuture;

/// An event listener callback.
pub type ListenerFn =
    Arc<dyn Fn(WorkflowEvent) -> BoxFuture<'static, Result<(), WorkflowError>> + Send + Sync>;

/// Box a plain async closure into a [`ListenerFn`].
pub fn listener_fn<F, Fut>(f: F) -> ListenerFn
where
    F: Fn(WorkflowEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkflowError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Delivers lifecycle events to engine-wide listeners plus the run-scoped
/// listeners passed alongside each emit.
///
/// Engine-wide listeners live for the bus's lifetime and see events from every
/// run; run-scoped listeners are owned by one `run()` call and dropped with it.
pub struct EventBus {
    listeners: RwLock<Vec<ListenerFn>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Register an engine-wide listener.
    pub fn subscribe(&self, listener: ListenerFn) {
        let mut guard = match self.listeners.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(listener);
    }

    /// Number of engine-wide listeners.
    pub fn listener_count(&self) -> usize {
        match self.listeners.read() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Deliver one event to every engine-wide listener, then every run-scoped
    /// listener, in registration order. Each delivery is awaited; failures are
    /// logged and do not stop delivery to later listeners.
    pub async fn emit(&self, event: &WorkflowEvent, run_listeners: &[ListenerFn]) {
        // Snapshot under the lock; never hold it across an await point.
        let engine_wide: Vec<ListenerFn> = {
            match self.listeners.read() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        };

        if engine_wide.is_empty() && run_listeners.is_empty() {
            return;
        }

        for listener in engine_wide.iter().chain(run_listeners.iter()) {
            if let Err(err) = listener(event.clone()).await {
                tracing::warn!(
                    run_id = %event.run_id(),
                    workflow_id = event.workflow_id(),
                    error = %err,
                    "event listener failed, continuing"
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
