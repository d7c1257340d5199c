//! Acting on other controls by location
//!
//! Every action and feedback takes a `location` option (see
//! `resolve_location`). Feedbacks report the variables the location used so
//! a variable change can move them to another button.

use super::{
    control_at, def, option_f64, option_str, resolve_location, FeedbackContext, FeedbackOutcome,
    InternalContext, InternalDefinition, InternalFragment,
};
use crate::controls::model::{ActionEntity, FeedbackEntity, StylePatch};
use crate::controls::RunActionExtras;
use serde_json::Value;
use tracing::{debug, info};

const ACTIONS: &[InternalDefinition] = &[
    def("button_pressrelease", "Button: Trigger press and release"),
    def("button_press", "Button: Trigger press"),
    def("button_release", "Button: Trigger release"),
    def("button_rotate_left", "Button: Trigger rotate left"),
    def("button_rotate_right", "Button: Trigger rotate right"),
    def("button_text", "Button: Set text"),
    def("textcolor", "Button: Set text color"),
    def("bgcolor", "Button: Set background color"),
    def("bank_current_step", "Button: Set current step"),
    def("bank_current_step_delta", "Button: Skip step"),
    def("panic_bank", "Actions: Abort actions on button"),
    def("panic", "Actions: Abort all delayed actions"),
];

const FEEDBACKS: &[InternalDefinition] = &[
    def("bank_style", "Button: Use another button's style"),
    def("bank_pushed", "Button: When pushed"),
    def("bank_current_step", "Button: Check step"),
];

fn option_bool(action: &ActionEntity, key: &str) -> bool {
    action.options.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn style_patch(key: &str, value: Value) -> StylePatch {
    let mut patch = StylePatch::new();
    patch.insert(key.to_string(), value);
    patch
}

pub struct Controls;

impl Controls {
    fn apply_style(ctx: &mut InternalContext<'_>, control_id: &str, patch: StylePatch) {
        let Some(tree) = ctx
            .controls
            .get_mut(control_id)
            .and_then(|c| c.as_button_mut())
            .and_then(|b| b.editable_feedbacks())
        else {
            debug!("Style action ignored, '{}' is not an editable button", control_id);
            return;
        };
        tree.style_set_fields(&patch);
    }
}

impl InternalFragment for Controls {
    fn name(&self) -> &'static str {
        "controls"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn execute_action(&mut self, action: &ActionEntity, extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        let id = action.definition_id.as_str();
        if !ACTIONS.iter().any(|d| d.id == id) {
            return false;
        }
        if id == "panic" {
            info!("🛑 Aborting all delayed actions");
            ctx.controls.abort_all();
            return true;
        }

        let (location, _) = resolve_location(&action.options, extras.location.as_ref(), ctx.variables);
        let Some(target) = control_at(ctx.pages, location) else {
            debug!(control_id = %extras.control_id, "No control at the location of '{}'", id);
            return true;
        };
        let force = option_bool(action, "force");

        match id {
            "button_pressrelease" => {
                ctx.controls.press_control(&target, true, None, force, location);
                ctx.controls.press_control(&target, false, None, force, location);
            }
            "button_press" => {
                ctx.controls.press_control(&target, true, None, force, location);
            }
            "button_release" => {
                ctx.controls.press_control(&target, false, None, force, location);
            }
            "button_rotate_left" => {
                ctx.controls.rotate_control(&target, false, None, location);
            }
            "button_rotate_right" => {
                ctx.controls.rotate_control(&target, true, None, location);
            }
            "button_text" => {
                let text = option_str(&action.options, "label").unwrap_or_default();
                Self::apply_style(ctx, &target, style_patch("text", Value::from(text)));
            }
            "textcolor" | "bgcolor" => {
                let key = if id == "textcolor" { "color" } else { "bgcolor" };
                if let Some(color) = option_f64(&action.options, "color") {
                    Self::apply_style(ctx, &target, style_patch(key, Value::from(color as u32)));
                }
            }
            "bank_current_step" => {
                let step = option_f64(&action.options, "step").unwrap_or(1.0).max(1.0) as usize;
                if let Some(button) = ctx.controls.get_mut(&target).and_then(|c| c.as_button_mut()) {
                    if let Some(step_id) = button.step_ids().get(step - 1).cloned() {
                        button.step_select_current(&step_id);
                    }
                }
                ctx.effects.recheck.insert("bank_current_step");
            }
            "bank_current_step_delta" => {
                let amount = option_f64(&action.options, "amount").unwrap_or(1.0) as i64;
                if let Some(button) = ctx.controls.get_mut(&target).and_then(|c| c.as_button_mut()) {
                    button.step_advance_delta(amount);
                }
                ctx.effects.recheck.insert("bank_current_step");
            }
            "panic_bank" => {
                ctx.controls.abort_control(&target);
            }
            _ => {}
        }
        true
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, control_id: &str, ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        let id = feedback.definition_id.as_str();
        if !FEEDBACKS.iter().any(|d| d.id == id) {
            return None;
        }
        let own = ctx.pages.get_location_of_control_id(control_id);
        let (location, referenced_variables) = resolve_location(&feedback.options, own.as_ref(), ctx.variables);
        let button = control_at(ctx.pages, location)
            .and_then(|target| ctx.controls.get(&target))
            .and_then(|c| c.as_button());

        let value = match (id, button) {
            ("bank_style", Some(b)) if b.control_id() != control_id => {
                let style = b.feedbacks().merged_style();
                serde_json::to_value(&style).unwrap_or_else(|_| Value::Object(StylePatch::new()))
            }
            ("bank_style", _) => Value::Object(StylePatch::new()),
            ("bank_pushed", b) => Value::Bool(b.map(|b| b.pushed()).unwrap_or(false)),
            ("bank_current_step", b) => {
                let wanted = option_f64(&feedback.options, "step").unwrap_or(1.0) as usize;
                let current = b.map(|b| {
                    b.step_ids()
                        .iter()
                        .position(|s| s == b.current_step_id())
                        .map(|i| i + 1)
                        .unwrap_or(0)
                });
                Value::Bool(current == Some(wanted))
            }
            _ => return None,
        };
        Some(FeedbackOutcome::Tracked {
            value,
            referenced_variables,
        })
    }
}
