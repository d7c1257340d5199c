//! HubHandle - public API for the hub actor
//!
//! Fire-and-forget methods for the hot paths and deferred control effects,
//! plus `invoke` for anything that needs an answer.

use super::commands::{HubCommand, PageNavKind};
use super::Hub;
use crate::connections::{ConnectionCallbacks, ConnectionStatus, FeedbackValueUpdate};
use crate::controls::model::{ActionEntity, ActionSetId, ControlId, EntityOptions, SurfaceId};
use crate::controls::runner::RunActionExtras;
use crate::surface::SurfaceInputEvent;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Handle for interacting with the hub actor
///
/// Cheap to clone. Every method is non-blocking for the caller; sends to a
/// stopped hub are dropped.
#[derive(Clone)]
pub struct HubHandle {
    cmd_tx: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    pub fn new(cmd_tx: mpsc::UnboundedSender<HubCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Create a handle together with the receiver the hub will consume
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<HubCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn send(&self, cmd: HubCommand) {
        let _ = self.cmd_tx.send(cmd);
    }

    // =========================================================================
    // Deferred control effects
    // =========================================================================

    /// Persist a control, optionally redrawing it
    pub fn control_changed(&self, control_id: &str, redraw: bool) {
        self.send(HubCommand::ControlChanged {
            control_id: control_id.to_string(),
            redraw,
        });
    }

    pub fn trigger_redraw(&self, control_id: &str) {
        self.send(HubCommand::Redraw {
            control_id: control_id.to_string(),
        });
    }

    pub fn runtime_props_changed(&self, control_id: &str) {
        self.send(HubCommand::RuntimePropsChanged {
            control_id: control_id.to_string(),
        });
    }

    pub fn hold_timer_elapsed(
        &self,
        control_id: ControlId,
        surface_id: SurfaceId,
        token: u64,
        set_id: ActionSetId,
    ) {
        self.send(HubCommand::HoldTimerElapsed {
            control_id,
            surface_id,
            token,
            set_id,
        });
    }

    pub fn page_nav(&self, surface_id: Option<SurfaceId>, kind: PageNavKind) {
        self.send(HubCommand::PageNav { surface_id, kind });
    }

    pub fn execute_internal_action(&self, action: ActionEntity, extras: RunActionExtras) {
        self.send(HubCommand::ExecuteInternalAction { action, extras });
    }

    pub fn execute_trigger(&self, control_id: &str, source: &'static str) {
        self.send(HubCommand::ExecuteTrigger {
            control_id: control_id.to_string(),
            source,
        });
    }

    pub fn apply_learned_options(&self, control_id: ControlId, action_id: String, options: EntityOptions) {
        self.send(HubCommand::ApplyLearnedOptions {
            control_id,
            action_id,
            options,
        });
    }

    // =========================================================================
    // Hot path
    // =========================================================================

    pub fn press_control(&self, control_id: &str, pressed: bool, surface_id: Option<SurfaceId>, force: bool) {
        self.send(HubCommand::PressControl {
            control_id: control_id.to_string(),
            pressed,
            surface_id,
            force,
        });
    }

    pub fn rotate_control(&self, control_id: &str, right: bool, surface_id: Option<SurfaceId>) {
        self.send(HubCommand::RotateControl {
            control_id: control_id.to_string(),
            right,
            surface_id,
        });
    }

    pub fn surface_input(&self, surface_id: &str, event: SurfaceInputEvent) {
        self.send(HubCommand::SurfaceInput {
            surface_id: surface_id.to_string(),
            event,
        });
    }

    pub fn update_feedback_values(&self, connection_id: String, updates: Vec<FeedbackValueUpdate>) {
        self.send(HubCommand::UpdateFeedbackValues {
            connection_id,
            updates,
        });
    }

    pub fn set_variable_values(&self, connection_id: String, values: Vec<(String, Value)>) {
        self.send(HubCommand::SetVariableValues {
            connection_id,
            values,
        });
    }

    pub fn connection_status_changed(&self, connection_id: String, status: ConnectionStatus) {
        self.send(HubCommand::ConnectionStatusChanged {
            connection_id,
            status,
        });
    }

    pub fn tick(&self) {
        self.send(HubCommand::Tick);
    }

    /// Callbacks for connections that report straight into this hub
    pub fn connection_callbacks(&self) -> ConnectionCallbacks {
        let feedback = self.clone();
        let variables = self.clone();
        let status = self.clone();
        ConnectionCallbacks {
            feedback_values: Arc::new(move |id, updates| feedback.update_feedback_values(id, updates)),
            variable_values: Arc::new(move |id, values| variables.set_variable_values(id, values)),
            status: Arc::new(move |id, s| status.connection_status_changed(id, s)),
        }
    }

    // =========================================================================
    // Request-response
    // =========================================================================

    /// Run `f` on the hub and return its result
    ///
    /// Returns `None` if the hub has stopped.
    pub async fn invoke<R, F>(&self, f: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Hub) -> R + Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();
        let cmd = HubCommand::Invoke(Box::new(move |hub| {
            let _ = response_tx.send(f(hub));
        }));
        if self.cmd_tx.send(cmd).is_err() {
            return None;
        }
        response_rx.await.ok()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_alive(&self) -> bool {
        !self.cmd_tx.is_closed()
    }

    pub fn shutdown(&self) {
        self.send(HubCommand::Shutdown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<HubHandle>();
    }

    #[tokio::test]
    async fn test_is_alive_when_channel_closed() {
        let (handle, rx) = HubHandle::channel();
        assert!(handle.is_alive());
        drop(rx);
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn test_invoke_on_stopped_hub_returns_none() {
        let (handle, rx) = HubHandle::channel();
        drop(rx);
        let result = handle.invoke(|_hub| 1).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_connection_callbacks_forward_commands() {
        let (handle, mut rx) = HubHandle::channel();
        let callbacks = handle.connection_callbacks();
        (callbacks.variable_values)("c1".to_string(), vec![("x".to_string(), Value::from(1))]);

        match rx.recv().await {
            Some(HubCommand::SetVariableValues { connection_id, values }) => {
                assert_eq!(connection_id, "c1");
                assert_eq!(values.len(), 1);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
