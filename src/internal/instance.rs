//! Connection control and status

use super::{
    def, option_f64, option_str, option_toggle, FeedbackContext, FeedbackOutcome, InternalContext,
    InternalDefinition, InternalFragment, ReferenceTable,
};
use crate::connections::ConnectionStatus;
use crate::controls::model::{ActionEntity, FeedbackEntity, StylePatch};
use crate::controls::RunActionExtras;
use crate::references::ReferenceField;
use serde_json::Value;

pub(super) const REFERENCE_FIELDS: ReferenceTable = &[
    ("instance_control", &[("instance_id", ReferenceField::ConnectionId)]),
    ("instance_status", &[("instance_id", ReferenceField::ConnectionId)]),
];

const ACTIONS: &[InternalDefinition] = &[def("instance_control", "Connection: Enable or disable")];

const FEEDBACKS: &[InternalDefinition] = &[def("instance_status", "Connection: Status")];

const VARIABLES: &[InternalDefinition] = &[
    def("instance_oks", "Connections OK"),
    def("instance_warnings", "Connections with warnings"),
    def("instance_errors", "Connections with errors"),
];

fn status_colors(feedback: &FeedbackEntity, status: &ConnectionStatus) -> (u32, u32) {
    let (fg_key, bg_key, fg, bg) = match status {
        ConnectionStatus::Ok => ("ok_fg", "ok_bg", 0xffffff, 0x00cc00),
        ConnectionStatus::Warning => ("warning_fg", "warning_bg", 0x000000, 0xfcd200),
        ConnectionStatus::Error => ("error_fg", "error_bg", 0xffffff, 0xc80000),
        ConnectionStatus::Disabled => ("disabled_fg", "disabled_bg", 0x7b7b7b, 0x000000),
    };
    let read = |key: &str, default: u32| option_f64(&feedback.options, key).map(|v| v as u32).unwrap_or(default);
    (read(fg_key, fg), read(bg_key, bg))
}

/// Worst status across every connection (all connections for an empty id)
fn combined_status(ctx: &FeedbackContext<'_>, connection_id: Option<&str>) -> Option<ConnectionStatus> {
    match connection_id {
        Some(id) if !id.is_empty() && id != "all" => ctx.connections.status(id),
        _ => {
            let statuses: Vec<ConnectionStatus> = ctx
                .connections
                .ids()
                .iter()
                .filter_map(|id| ctx.connections.status(id))
                .filter(|s| *s != ConnectionStatus::Disabled)
                .collect();
            if statuses.contains(&ConnectionStatus::Error) {
                Some(ConnectionStatus::Error)
            } else if statuses.contains(&ConnectionStatus::Warning) {
                Some(ConnectionStatus::Warning)
            } else {
                Some(ConnectionStatus::Ok)
            }
        }
    }
}

pub struct Instance;

impl InternalFragment for Instance {
    fn name(&self) -> &'static str {
        "instance"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn variable_definitions(&self) -> &'static [InternalDefinition] {
        VARIABLES
    }

    fn variable_values(&self, ctx: &FeedbackContext<'_>) -> Vec<(String, Value)> {
        let mut counts = [0u64; 3];
        for id in ctx.connections.ids() {
            match ctx.connections.status(&id) {
                Some(ConnectionStatus::Ok) => counts[0] += 1,
                Some(ConnectionStatus::Warning) => counts[1] += 1,
                Some(ConnectionStatus::Error) => counts[2] += 1,
                _ => {}
            }
        }
        vec![
            ("instance_oks".to_string(), Value::from(counts[0])),
            ("instance_warnings".to_string(), Value::from(counts[1])),
            ("instance_errors".to_string(), Value::from(counts[2])),
        ]
    }

    fn execute_action(&mut self, action: &ActionEntity, _extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        if action.definition_id != "instance_control" {
            return false;
        }
        let Some(connection_id) = option_str(&action.options, "instance_id") else {
            return true;
        };
        let enabled = option_toggle(&action.options, "enable", ctx.connections.is_enabled(connection_id));
        if ctx.connections.set_enabled(connection_id, enabled) {
            ctx.effects.recheck.insert("instance_status");
        }
        true
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, _control_id: &str, ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        if feedback.definition_id != "instance_status" {
            return None;
        }
        let status = combined_status(ctx, option_str(&feedback.options, "instance_id"))?;
        let (color, bgcolor) = status_colors(feedback, &status);
        let mut patch = StylePatch::new();
        patch.insert("color".to_string(), Value::from(color));
        patch.insert("bgcolor".to_string(), Value::from(bgcolor));
        Some(FeedbackOutcome::Style(patch))
    }
}
