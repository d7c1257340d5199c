//! Commands processed by the hub actor
//!
//! Everything that mutates controller state arrives here: surface input,
//! connection reports, timer completions and the deferred side effects that
//! controls emit while handling a command (commit, redraw, runtime props).

use crate::connections::{ConnectionStatus, FeedbackValueUpdate};
use crate::controls::model::{ActionEntity, ActionSetId, ControlId, EntityOptions, SurfaceId};
use crate::controls::runner::RunActionExtras;
use crate::surface::SurfaceInputEvent;
use serde_json::Value;
use std::fmt;

/// Closure run against the hub with exclusive access
pub type HubInvoke = Box<dyn FnOnce(&mut super::Hub) + Send>;

/// Page change requested by a navigation button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageNavKind {
    /// Back to the group's startup page
    Home,
    Up,
    Down,
}

/// Commands for the hub actor
///
/// # Hot path (fire-and-forget)
/// - `SurfaceInput`: raw press/rotate from a surface
/// - `UpdateFeedbackValues` / `SetVariableValues`: connection reports
/// - `HoldTimerElapsed`: a run-while-held timer fired
///
/// # Deferred control effects
/// - `ControlChanged`: persist (and maybe redraw) a control
/// - `Redraw`: re-render a control's face
/// - `RuntimePropsChanged`: step/pushed state changed
///
/// # Request-response
/// - `Invoke`: run a closure with `&mut Hub` (API queries and mutations)
pub enum HubCommand {
    ControlChanged {
        control_id: ControlId,
        redraw: bool,
    },
    Redraw {
        control_id: ControlId,
    },
    RuntimePropsChanged {
        control_id: ControlId,
    },
    PressControl {
        control_id: ControlId,
        pressed: bool,
        surface_id: Option<SurfaceId>,
        force: bool,
    },
    RotateControl {
        control_id: ControlId,
        right: bool,
        surface_id: Option<SurfaceId>,
    },
    HoldTimerElapsed {
        control_id: ControlId,
        surface_id: SurfaceId,
        token: u64,
        set_id: ActionSetId,
    },
    PageNav {
        surface_id: Option<SurfaceId>,
        kind: PageNavKind,
    },
    ExecuteInternalAction {
        action: ActionEntity,
        extras: RunActionExtras,
    },
    ExecuteTrigger {
        control_id: ControlId,
        source: &'static str,
    },
    UpdateFeedbackValues {
        connection_id: String,
        updates: Vec<FeedbackValueUpdate>,
    },
    SetVariableValues {
        connection_id: String,
        values: Vec<(String, Value)>,
    },
    ConnectionStatusChanged {
        connection_id: String,
        status: ConnectionStatus,
    },
    ApplyLearnedOptions {
        control_id: ControlId,
        action_id: String,
        options: EntityOptions,
    },
    SurfaceInput {
        surface_id: SurfaceId,
        event: SurfaceInputEvent,
    },
    Tick,
    Invoke(HubInvoke),
    Shutdown,
}

impl fmt::Debug for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HubCommand::ControlChanged { control_id, redraw } => f
                .debug_struct("ControlChanged")
                .field("control_id", control_id)
                .field("redraw", redraw)
                .finish(),
            HubCommand::Redraw { control_id } => {
                f.debug_struct("Redraw").field("control_id", control_id).finish()
            }
            HubCommand::RuntimePropsChanged { control_id } => f
                .debug_struct("RuntimePropsChanged")
                .field("control_id", control_id)
                .finish(),
            HubCommand::PressControl {
                control_id,
                pressed,
                ..
            } => f
                .debug_struct("PressControl")
                .field("control_id", control_id)
                .field("pressed", pressed)
                .finish(),
            HubCommand::RotateControl {
                control_id, right, ..
            } => f
                .debug_struct("RotateControl")
                .field("control_id", control_id)
                .field("right", right)
                .finish(),
            HubCommand::HoldTimerElapsed {
                control_id,
                set_id,
                ..
            } => f
                .debug_struct("HoldTimerElapsed")
                .field("control_id", control_id)
                .field("set_id", set_id)
                .finish(),
            HubCommand::PageNav { surface_id, kind } => f
                .debug_struct("PageNav")
                .field("surface_id", surface_id)
                .field("kind", kind)
                .finish(),
            HubCommand::ExecuteInternalAction { action, .. } => f
                .debug_struct("ExecuteInternalAction")
                .field("definition_id", &action.definition_id)
                .finish(),
            HubCommand::ExecuteTrigger { control_id, source } => f
                .debug_struct("ExecuteTrigger")
                .field("control_id", control_id)
                .field("source", source)
                .finish(),
            HubCommand::UpdateFeedbackValues {
                connection_id,
                updates,
            } => f
                .debug_struct("UpdateFeedbackValues")
                .field("connection_id", connection_id)
                .field("count", &updates.len())
                .finish(),
            HubCommand::SetVariableValues {
                connection_id,
                values,
            } => f
                .debug_struct("SetVariableValues")
                .field("connection_id", connection_id)
                .field("count", &values.len())
                .finish(),
            HubCommand::ConnectionStatusChanged {
                connection_id,
                status,
            } => f
                .debug_struct("ConnectionStatusChanged")
                .field("connection_id", connection_id)
                .field("status", status)
                .finish(),
            HubCommand::ApplyLearnedOptions {
                control_id,
                action_id,
                ..
            } => f
                .debug_struct("ApplyLearnedOptions")
                .field("control_id", control_id)
                .field("action_id", action_id)
                .finish(),
            HubCommand::SurfaceInput { surface_id, event } => f
                .debug_struct("SurfaceInput")
                .field("surface_id", surface_id)
                .field("event", event)
                .finish(),
            HubCommand::Tick => write!(f, "Tick"),
            HubCommand::Invoke(_) => write!(f, "Invoke"),
            HubCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}
