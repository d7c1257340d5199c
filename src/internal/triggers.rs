use super::{
    def, option_str, option_toggle, FeedbackContext, FeedbackOutcome, InternalContext, InternalDefinition,
    InternalFragment,
};
use crate::controls::model::{ActionEntity, FeedbackEntity};
use crate::controls::RunActionExtras;
use serde_json::Value;
use tracing::debug;

const ACTIONS: &[InternalDefinition] = &[def("trigger_enabled", "Trigger: Enable or disable")];

const FEEDBACKS: &[InternalDefinition] = &[def("trigger_enabled", "Trigger: When enabled")];

/// Enabling triggers from actions, and showing whether they are
pub struct Triggers;

impl InternalFragment for Triggers {
    fn name(&self) -> &'static str {
        "triggers"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn execute_action(&mut self, action: &ActionEntity, _extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        if action.definition_id != "trigger_enabled" {
            return false;
        }
        let Some(trigger_id) = option_str(&action.options, "trigger_id") else {
            return true;
        };
        let Some(trigger) = ctx.controls.get_mut(trigger_id).and_then(|c| c.as_trigger_mut()) else {
            debug!("Trigger '{}' not found", trigger_id);
            return true;
        };
        let enabled = option_toggle(&action.options, "enable", trigger.is_enabled());
        if enabled != trigger.is_enabled() {
            trigger.options_set_field("enabled", &Value::Bool(enabled));
            ctx.effects.recheck.insert("trigger_enabled");
        }
        true
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, _control_id: &str, ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        if feedback.definition_id != "trigger_enabled" {
            return None;
        }
        let enabled = option_str(&feedback.options, "trigger_id")
            .and_then(|id| ctx.controls.get(id))
            .and_then(|c| c.as_trigger())
            .map(|t| t.is_enabled())
            .unwrap_or(false);
        let wanted = feedback.options.get("enable").and_then(Value::as_bool).unwrap_or(true);
        Some(FeedbackOutcome::Bool(enabled == wanted))
    }
}
