//! Connection and variable references inside controls
//!
//! One traversal walks every place a control can mention a connection or a
//! variable: button text, local variable expressions, action and feedback
//! options, trigger event options. What happens at each place is up to the
//! visitor: `ReferencesCollector` records, `ReferencesUpdater` rewrites.
//!
//! Options of third-party entities are opaque, so only their top-level
//! strings are visited. Internal entities declare which option keys hold
//! connection ids or variable names (see `internal::reference_fields`).

mod collector;
mod updater;

pub use collector::ReferencesCollector;
pub use updater::ReferencesUpdater;

use crate::controls::model::{
    ActionEntity, ButtonStyle, EntityOptions, FeedbackEntity, LocalVariableModel, TriggerEventModel,
};
use serde_json::Value;

/// How an internal option refers to something
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceField {
    ConnectionId,
    ConnectionIdArray,
    VariableName,
}

pub trait ReferenceVisitor {
    fn visit_connection_id(&mut self, value: &mut String, feedback_id: Option<&str>);
    fn visit_connection_id_array(&mut self, values: &mut Vec<Value>, feedback_id: Option<&str>);
    /// Free text that may contain `$(label:name)` references
    fn visit_string(&mut self, value: &mut String, feedback_id: Option<&str>);
    /// A bare `label:name` variable id
    fn visit_variable_name(&mut self, value: &mut String, feedback_id: Option<&str>);
}

/// Mutable views of everything a control can reference
pub struct ControlParts<'a> {
    pub style: Option<&'a mut ButtonStyle>,
    pub actions: Vec<&'a mut ActionEntity>,
    pub feedbacks: Vec<&'a mut FeedbackEntity>,
    pub events: Vec<&'a mut TriggerEventModel>,
    pub local_variables: &'a mut [LocalVariableModel],
}

fn visit_options(
    visitor: &mut dyn ReferenceVisitor,
    internal: bool,
    definition_id: &str,
    options: &mut EntityOptions,
    feedback_id: Option<&str>,
) {
    let fields: &[(&str, ReferenceField)] = if internal {
        crate::internal::reference_fields(definition_id)
    } else {
        &[]
    };
    for (key, value) in options.iter_mut() {
        let field = fields.iter().find(|(k, _)| *k == key.as_str()).map(|(_, f)| *f);
        match (field, value) {
            (Some(ReferenceField::ConnectionId), Value::String(s)) => visitor.visit_connection_id(s, feedback_id),
            (Some(ReferenceField::ConnectionIdArray), Value::Array(items)) => {
                visitor.visit_connection_id_array(items, feedback_id)
            }
            (Some(ReferenceField::VariableName), Value::String(s)) => visitor.visit_variable_name(s, feedback_id),
            (_, Value::String(s)) => visitor.visit_string(s, feedback_id),
            _ => {}
        }
    }
}

/// Walk every reference of one control
pub fn visit_control_parts(visitor: &mut dyn ReferenceVisitor, parts: ControlParts<'_>) {
    if let Some(style) = parts.style {
        visitor.visit_string(&mut style.text, None);
    }

    for local in parts.local_variables.iter_mut() {
        visitor.visit_string(&mut local.expression, None);
    }

    for action in parts.actions {
        let internal = action.is_internal();
        if !internal {
            visitor.visit_connection_id(&mut action.connection_id, None);
        }
        visit_options(visitor, internal, &action.definition_id, &mut action.options, None);
    }

    for feedback in parts.feedbacks {
        let internal = feedback.is_internal();
        let id = feedback.id.clone();
        if !internal {
            visitor.visit_connection_id(&mut feedback.connection_id, Some(&id));
        }
        visit_options(visitor, internal, &feedback.definition_id, &mut feedback.options, Some(&id));
        if let Some(Value::String(text)) = feedback.style.as_mut().and_then(|s| s.get_mut("text")) {
            visitor.visit_string(text, Some(&id));
        }
    }

    for event in parts.events {
        for (key, value) in event.options.iter_mut() {
            if let Value::String(s) = value {
                if key == "variableId" {
                    visitor.visit_variable_name(s, None);
                } else {
                    visitor.visit_string(s, None);
                }
            }
        }
    }
}
