//! Variable comparisons

use super::{def, option_str, FeedbackContext, FeedbackOutcome, InternalDefinition, InternalFragment, ReferenceTable};
use crate::controls::model::FeedbackEntity;
use crate::references::ReferenceField;
use crate::variables::{is_truthy, value_to_text, VariableOverrides};
use serde_json::Value;
use std::collections::HashSet;
use tracing::trace;

pub(super) const REFERENCE_FIELDS: ReferenceTable = &[
    ("variable_value", &[("variable", ReferenceField::VariableName)]),
    (
        "variable_variable",
        &[
            ("variable", ReferenceField::VariableName),
            ("variable2", ReferenceField::VariableName),
        ],
    ),
];

const FEEDBACKS: &[InternalDefinition] = &[
    def("variable_value", "Variable: Check value"),
    def("variable_variable", "Variable: Compare two variables"),
    def("check_expression", "Variable: Check boolean expression"),
];

/// Compare two values with one of `eq`, `ne`, `gt`, `lt`
///
/// `gt`/`lt` compare numerically and fail when either side is not a number.
pub(crate) fn compare(left: &Value, op: &str, right: &Value) -> bool {
    let as_number = |v: &Value| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    };
    match op {
        "gt" | "lt" => match (as_number(left), as_number(right)) {
            (Some(l), Some(r)) if op == "gt" => l > r,
            (Some(l), Some(r)) => l < r,
            _ => false,
        },
        "ne" => value_to_text(left) != value_to_text(right),
        _ => value_to_text(left) == value_to_text(right),
    }
}

pub struct Variables;

impl InternalFragment for Variables {
    fn name(&self) -> &'static str {
        "variables"
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, _control_id: &str, ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        let op = option_str(&feedback.options, "op").unwrap_or("eq");
        let mut referenced = HashSet::new();
        let mut lookup = |key: &str| -> Value {
            let Some(name) = option_str(&feedback.options, key).map(str::trim).filter(|n| !n.is_empty()) else {
                return Value::Null;
            };
            referenced.insert(name.to_string());
            ctx.variables.get_value(name).cloned().unwrap_or(Value::Null)
        };

        let result = match feedback.definition_id.as_str() {
            "variable_value" => {
                let left = lookup("variable");
                let right = match feedback.options.get("value") {
                    Some(Value::String(s)) => {
                        let parsed = ctx.variables.parse_variables(s, &VariableOverrides::new());
                        referenced.extend(parsed.variable_ids);
                        Value::from(parsed.text)
                    }
                    Some(other) => other.clone(),
                    None => Value::from(""),
                };
                compare(&left, op, &right)
            }
            "variable_variable" => {
                let left = lookup("variable");
                let right = lookup("variable2");
                compare(&left, op, &right)
            }
            "check_expression" => {
                let expression = option_str(&feedback.options, "expression").unwrap_or_default();
                match ctx.variables.execute_expression(expression, &VariableOverrides::new()) {
                    Ok(result) => {
                        referenced.extend(result.variable_ids);
                        is_truthy(&result.value)
                    }
                    Err(e) => {
                        trace!("Expression feedback '{}' failed: {}", feedback.id, e);
                        false
                    }
                }
            }
            _ => return None,
        };

        Some(FeedbackOutcome::Tracked {
            value: Value::Bool(result),
            referenced_variables: referenced,
        })
    }
}
