use super::{def, option_str, InternalContext, InternalDefinition, InternalFragment};
use crate::controls::model::ActionEntity;
use crate::controls::RunActionExtras;
use crate::variables::VariableOverrides;
use tracing::info;

const ACTIONS: &[InternalDefinition] = &[def("custom_log", "System: Write to log")];

pub struct System;

impl InternalFragment for System {
    fn name(&self) -> &'static str {
        "system"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn execute_action(&mut self, action: &ActionEntity, extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        if action.definition_id != "custom_log" {
            return false;
        }
        let message = option_str(&action.options, "message").unwrap_or_default();
        let text = ctx.variables.parse_variables(message, &VariableOverrides::new()).text;
        info!(control_id = %extras.control_id, "📝 {}", text);
        true
    }
}
