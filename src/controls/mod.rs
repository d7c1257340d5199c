//! Controls: buttons, page navigation and triggers
//!
//! A control owns its entities (actions through `ActionSetCollection`,
//! feedbacks through `FeedbackTree`) and reports every change back to the hub
//! through the injected commit callback. Controls never touch the store or the
//! surfaces directly; the hub drains their deferred effects after each command.

pub mod action_sets;
pub mod button;
pub mod controller;
pub mod entity;
pub mod feedbacks;
pub mod hold;
pub mod model;
pub mod page_nav;
pub mod preset;
pub mod runner;
pub mod style;
pub mod trigger;

#[cfg(test)]
mod tests;

pub use action_sets::{ActionSetCollection, CommitChange};
pub use button::{ButtonControl, ButtonKind};
pub use controller::{ControlsController, RenamedReferences};
pub use entity::EntityNotifier;
pub use feedbacks::{FeedbackTree, TextContext};
pub use model::{ActionEntity, ActionSetId, ControlId, ControlModel, FeedbackEntity, RuntimeModel};
pub use page_nav::PageNavControl;
pub use runner::{ActionRunner, RunActionExtras};
pub use style::DrawStyle;
pub use trigger::TriggerControl;

use crate::connections::ConnectionRegistry;
use crate::hub::HubHandle;
use crate::page::ControlLocation;
use crate::references::ReferenceVisitor;
use crate::variables::VariablesController;
use model::EntityOptions;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Shared services handed to every control
#[derive(Clone)]
pub struct ControlDeps {
    pub hub: HubHandle,
    pub connections: Arc<ConnectionRegistry>,
    pub runner: ActionRunner,
}

impl ControlDeps {
    pub fn new(hub: HubHandle, connections: Arc<ConnectionRegistry>) -> Self {
        let runner = ActionRunner::new(connections.clone(), hub.clone());
        Self {
            hub,
            connections,
            runner,
        }
    }

    pub fn notifier(&self) -> EntityNotifier {
        EntityNotifier::new(self.connections.clone())
    }

    /// Commit callback that defers persistence (and maybe a redraw) to the hub
    pub fn commit_for(&self, control_id: &str) -> CommitChange {
        let hub = self.hub.clone();
        let control_id = control_id.to_string();
        Arc::new(move |redraw| hub.control_changed(&control_id, redraw))
    }
}

/// Control id prefix for page buttons
pub const BANK_PREFIX: &str = "bank:";

/// Control id prefix for triggers
pub const TRIGGER_PREFIX: &str = "trigger:";

/// Control id prefix for preset buttons
pub const PRESET_PREFIX: &str = "preset:";

pub fn new_bank_id() -> ControlId {
    format!("{}{}", BANK_PREFIX, model::new_id())
}

pub fn new_trigger_id() -> ControlId {
    format!("{}{}", TRIGGER_PREFIX, model::new_id())
}

pub fn preset_control_id(connection_id: &str, preset_id: &str) -> ControlId {
    format!("{}{}:{}", PRESET_PREFIX, connection_id, preset_id)
}

/// One live control
pub enum Control {
    Button(ButtonControl),
    PageNav(PageNavControl),
    Trigger(TriggerControl),
}

impl Control {
    /// Build a runtime control, dispatching on the persisted type
    pub fn from_model(
        control_id: &str,
        model: ControlModel,
        runtime: Option<RuntimeModel>,
        deps: &ControlDeps,
    ) -> Result<Self, crate::error::ControlError> {
        Ok(match &model {
            ControlModel::Button(_) | ControlModel::PresetButton(_) => {
                Control::Button(ButtonControl::from_model(control_id, model, runtime, deps)?)
            }
            ControlModel::PageNumber | ControlModel::PageUp | ControlModel::PageDown => {
                Control::PageNav(PageNavControl::from_model(control_id, model, deps)?)
            }
            ControlModel::Trigger(_) => {
                Control::Trigger(TriggerControl::from_model(control_id, model, runtime, deps)?)
            }
        })
    }

    pub fn control_id(&self) -> &str {
        match self {
            Control::Button(c) => c.control_id(),
            Control::PageNav(c) => c.control_id(),
            Control::Trigger(c) => c.control_id(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Control::Button(c) => c.type_name(),
            Control::PageNav(c) => c.type_name(),
            Control::Trigger(_) => model::TYPE_TRIGGER,
        }
    }

    pub fn to_json(&self) -> ControlModel {
        match self {
            Control::Button(c) => c.to_json(),
            Control::PageNav(c) => c.to_json(),
            Control::Trigger(c) => c.to_json(),
        }
    }

    pub fn to_runtime_json(&self) -> Option<RuntimeModel> {
        match self {
            Control::Button(c) => Some(c.to_runtime_json()),
            Control::PageNav(_) => None,
            Control::Trigger(c) => Some(c.to_runtime_json()),
        }
    }

    pub fn as_button(&self) -> Option<&ButtonControl> {
        match self {
            Control::Button(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_button_mut(&mut self) -> Option<&mut ButtonControl> {
        match self {
            Control::Button(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_trigger(&self) -> Option<&TriggerControl> {
        match self {
            Control::Trigger(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_trigger_mut(&mut self) -> Option<&mut TriggerControl> {
        match self {
            Control::Trigger(c) => Some(c),
            _ => None,
        }
    }

    pub fn press_control(
        &mut self,
        pressed: bool,
        surface_id: Option<&str>,
        force: bool,
        location: Option<ControlLocation>,
    ) {
        match self {
            Control::Button(c) => c.press_control(pressed, surface_id, force, location),
            Control::PageNav(c) => c.press_control(pressed, surface_id),
            Control::Trigger(_) => {}
        }
    }

    pub fn rotate_control(&mut self, right: bool, surface_id: Option<&str>, location: Option<ControlLocation>) {
        if let Control::Button(c) = self {
            c.rotate_control(right, surface_id, location);
        }
    }

    /// Face to render, `None` for controls that are never drawn
    pub fn get_draw_style(
        &mut self,
        variables: &VariablesController,
        location: Option<&ControlLocation>,
    ) -> Option<DrawStyle> {
        match self {
            Control::Button(c) => Some(c.get_draw_style(variables, location)),
            Control::PageNav(c) => Some(c.get_draw_style()),
            Control::Trigger(_) => None,
        }
    }

    pub fn get_bitmap_size(&self) -> Option<(u32, u32)> {
        match self {
            Control::Button(_) | Control::PageNav(_) => Some(style::BUTTON_BITMAP_SIZE),
            Control::Trigger(_) => None,
        }
    }

    fn feedback_tree(&self) -> Option<&FeedbackTree> {
        match self {
            Control::Button(c) => Some(c.feedbacks()),
            Control::Trigger(c) => Some(c.condition()),
            Control::PageNav(_) => None,
        }
    }

    fn feedback_tree_mut(&mut self) -> Option<&mut FeedbackTree> {
        match self {
            Control::Button(c) => Some(c.feedbacks_mut()),
            Control::Trigger(c) => Some(c.condition_mut()),
            Control::PageNav(_) => None,
        }
    }

    /// Store feedback values reported by a connection; returns whether the face changed
    pub fn update_feedback_values(&mut self, connection_id: &str, updates: &[(String, Value)]) -> bool {
        self.feedback_tree_mut()
            .map(|tree| tree.update_feedback_values(connection_id, updates))
            .unwrap_or(false)
    }

    /// Whether the last draw used any of the changed variables
    pub fn on_variables_changed(&self, changed: &HashSet<String>) -> bool {
        match self {
            Control::Button(c) => c.on_variables_changed(changed),
            _ => false,
        }
    }

    /// Enabled internal feedbacks, for the internal controller to compute
    pub fn internal_feedbacks(&self) -> Vec<FeedbackEntity> {
        self.feedback_tree()
            .map(|tree| tree.internal_feedbacks())
            .unwrap_or_default()
    }

    pub fn all_actions(&self) -> Vec<&ActionEntity> {
        match self {
            Control::Button(c) => c.all_actions(),
            Control::Trigger(c) => c.actions().all_actions().collect(),
            Control::PageNav(_) => Vec::new(),
        }
    }

    /// Every feedback, children included
    pub fn all_feedbacks(&self) -> Vec<&FeedbackEntity> {
        self.feedback_tree().map(|tree| tree.flatten()).unwrap_or_default()
    }

    /// Replace an action wherever it lives, matching by id
    pub fn action_replace(&mut self, replacement: &ActionEntity) -> bool {
        match self {
            Control::Button(c) => c.action_replace(replacement),
            Control::Trigger(c) => c.action_replace(replacement),
            Control::PageNav(_) => false,
        }
    }

    pub fn feedback_replace(&mut self, replacement: &FeedbackEntity) -> bool {
        self.feedback_tree_mut()
            .map(|tree| tree.feedback_replace(replacement))
            .unwrap_or(false)
    }

    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        match self {
            Control::Button(c) => c.forget_connection(connection_id),
            Control::Trigger(c) => c.forget_connection(connection_id),
            Control::PageNav(_) => false,
        }
    }

    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        match self {
            Control::Button(c) => c.verify_connection_ids(known),
            Control::Trigger(c) => c.verify_connection_ids(known),
            Control::PageNav(_) => false,
        }
    }

    pub fn apply_learned_options(&mut self, action_id: &str, options: EntityOptions) -> bool {
        match self {
            Control::Button(c) => c.apply_learned_options(action_id, options),
            Control::Trigger(c) => c.actions_mut().apply_learned_options(action_id, options),
            Control::PageNav(_) => false,
        }
    }

    pub fn visit_references(&mut self, visitor: &mut dyn ReferenceVisitor) {
        match self {
            Control::Button(c) => c.visit_references(visitor),
            Control::Trigger(c) => c.visit_references(visitor),
            Control::PageNav(_) => {}
        }
    }

    pub fn subscribe_all(&self) {
        match self {
            Control::Button(c) => c.subscribe_all(),
            Control::Trigger(c) => c.subscribe_all(),
            Control::PageNav(_) => {}
        }
    }

    /// Stop everything in flight (hold timers and running actions)
    pub fn abort(&mut self) {
        match self {
            Control::Button(c) => c.abort_running(),
            Control::Trigger(c) => c.abort_running(),
            Control::PageNav(_) => {}
        }
    }

    /// Release every entity; the control is about to be dropped
    pub fn destroy(&mut self) {
        match self {
            Control::Button(c) => c.destroy(),
            Control::Trigger(c) => c.destroy(),
            Control::PageNav(_) => {}
        }
    }
}
