//! User-defined variables

use super::{def, option_str, InternalContext, InternalDefinition, InternalFragment};
use crate::controls::model::{ActionEntity, EntityOptions};
use crate::controls::RunActionExtras;
use crate::variables::{VariableOverrides, CUSTOM_LABEL};
use serde_json::Value;
use tracing::{debug, warn};

const ACTIONS: &[InternalDefinition] = &[
    def("custom_variable_set_value", "Custom Variable: Set value"),
    def("custom_variable_set_expression", "Custom Variable: Set with expression"),
    def("custom_variable_reset_to_default", "Custom Variable: Reset to default value"),
];

/// Operator of a legacy math operation and whether the operand comes first
fn math_operator(operation: &str) -> Option<(&'static str, bool)> {
    match operation {
        "plus" | "add" => Some(("+", false)),
        "minus" | "subtract" => Some(("-", false)),
        "minus_opposite" => Some(("-", true)),
        "multiply" => Some(("*", false)),
        "divide" => Some(("/", false)),
        "divide_opposite" => Some(("/", true)),
        _ => None,
    }
}

pub struct CustomVariables;

impl InternalFragment for CustomVariables {
    fn name(&self) -> &'static str {
        "custom_variables"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn execute_action(&mut self, action: &ActionEntity, _extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        let Some(name) = option_str(&action.options, "name") else {
            return ACTIONS.iter().any(|d| d.id == action.definition_id);
        };

        let changed = match action.definition_id.as_str() {
            "custom_variable_set_value" => {
                let value = match action.options.get("value") {
                    Some(Value::String(s)) => {
                        Value::from(ctx.variables.parse_variables(s, &VariableOverrides::new()).text)
                    }
                    Some(other) => other.clone(),
                    None => Value::from(""),
                };
                ctx.variables.set_custom_variable_value(name, value)
            }
            "custom_variable_set_expression" => {
                let expression = option_str(&action.options, "expression").unwrap_or_default();
                match ctx.variables.execute_expression(expression, &VariableOverrides::new()) {
                    Ok(result) => ctx.variables.set_custom_variable_value(name, result.value),
                    Err(e) => {
                        warn!("Expression for custom variable '{}' failed: {}", name, e);
                        return true;
                    }
                }
            }
            "custom_variable_reset_to_default" => ctx.variables.reset_custom_variable(name),
            _ => return false,
        };

        match changed {
            Some(ids) => ctx.effects.changed_variables.extend(ids),
            None => debug!("Custom variable '{}' does not exist", name),
        }
        true
    }

    /// `custom_variable_math_operation` becomes an expression
    fn action_upgrade(&self, action: &ActionEntity) -> Option<ActionEntity> {
        if action.definition_id != "custom_variable_math_operation" {
            return None;
        }
        let Some(variable) = option_str(&action.options, "variable") else {
            warn!("Cannot upgrade math operation {}: no variable", action.id);
            return None;
        };
        let operation = option_str(&action.options, "operation").unwrap_or("plus");
        let Some((operator, operand_first)) = math_operator(operation) else {
            warn!("Cannot upgrade math operation {}: unknown operation '{}'", action.id, operation);
            return None;
        };
        let operand = match action.options.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "0".to_string(),
        };

        let mut options = EntityOptions::new();
        options.insert("name".to_string(), Value::from(variable));
        let current = format!("$({}:{})", CUSTOM_LABEL, variable);
        let expression = if operand_first {
            format!("{} {} {}", operand, operator, current)
        } else {
            format!("{} {} {}", current, operator, operand)
        };
        options.insert("expression".to_string(), Value::from(expression));

        let mut upgraded = action.clone();
        upgraded.definition_id = "custom_variable_set_expression".to_string();
        upgraded.options = options;
        upgraded.upgrade_index = None;
        Some(upgraded)
    }
}
