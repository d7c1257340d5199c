//! Entity lifecycle with the owning connection
//!
//! Actions and feedbacks of real connections are subscribed with
//! `action_update`/`feedback_update` and released with
//! `action_delete`/`feedback_delete`. Calls are detached tasks: failures are
//! logged and never reach the caller, the local change stands regardless.
//! Internal entities are skipped here; the hub syncs them with the
//! internal controller directly.

use super::model::{ActionEntity, FeedbackEntity};
use crate::connections::ConnectionRegistry;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, trace};

/// Spawn a best-effort task, outside of a runtime the call is dropped
fn spawn_detached<F>(what: &'static str, fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(fut);
        }
        Err(_) => trace!("No runtime, dropping {} notification", what),
    }
}

/// Notifies connections about entity changes
#[derive(Clone)]
pub struct EntityNotifier {
    connections: Arc<ConnectionRegistry>,
}

impl EntityNotifier {
    pub fn new(connections: Arc<ConnectionRegistry>) -> Self {
        Self { connections }
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Subscribe/refresh an enabled action
    pub fn action_update(&self, action: &ActionEntity, control_id: &str) {
        if action.disabled || action.is_internal() {
            return;
        }
        let Some(instance) = self.connections.get_child(&action.connection_id) else {
            return;
        };
        let action = action.clone();
        let control_id = control_id.to_string();
        spawn_detached("action_update", async move {
            if let Err(e) = instance.action_update(&action, &control_id).await {
                debug!(action_id = %action.id, "actionUpdate failed: {}", e);
            }
        });
    }

    /// Release an action
    pub fn action_delete(&self, action: &ActionEntity) {
        if action.is_internal() {
            return;
        }
        let Some(instance) = self.connections.get_child(&action.connection_id) else {
            return;
        };
        let action = action.clone();
        spawn_detached("action_delete", async move {
            if let Err(e) = instance.action_delete(&action).await {
                debug!(action_id = %action.id, "actionDelete failed: {}", e);
            }
        });
    }

    /// Subscribe/refresh an enabled feedback (children are the caller's concern)
    pub fn feedback_update(&self, feedback: &FeedbackEntity, control_id: &str) {
        if feedback.disabled || feedback.is_internal() {
            return;
        }
        let Some(instance) = self.connections.get_child(&feedback.connection_id) else {
            return;
        };
        let mut feedback = feedback.clone();
        feedback.children.clear();
        let control_id = control_id.to_string();
        spawn_detached("feedback_update", async move {
            if let Err(e) = instance.feedback_update(&feedback, &control_id).await {
                debug!(feedback_id = %feedback.id, "feedbackUpdate failed: {}", e);
            }
        });
    }

    /// Release a feedback
    pub fn feedback_delete(&self, feedback: &FeedbackEntity) {
        if feedback.is_internal() {
            return;
        }
        let Some(instance) = self.connections.get_child(&feedback.connection_id) else {
            return;
        };
        let mut feedback = feedback.clone();
        feedback.children.clear();
        spawn_detached("feedback_delete", async move {
            if let Err(e) = instance.feedback_delete(&feedback).await {
                debug!(feedback_id = %feedback.id, "feedbackDelete failed: {}", e);
            }
        });
    }
}
