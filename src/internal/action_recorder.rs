//! Action recorder: a recording flag and the connections it listens to

use super::{
    def, option_str, option_toggle, FeedbackContext, FeedbackOutcome, InternalContext, InternalDefinition,
    InternalFragment, ReferenceTable,
};
use crate::controls::model::{ActionEntity, FeedbackEntity};
use crate::controls::RunActionExtras;
use crate::references::ReferenceField;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::info;

pub(super) const REFERENCE_FIELDS: ReferenceTable = &[
    (
        "action_recorder_set_connections",
        &[("connections", ReferenceField::ConnectionIdArray)],
    ),
    (
        "action_recorder_check_connections",
        &[("connections", ReferenceField::ConnectionIdArray)],
    ),
];

const ACTIONS: &[InternalDefinition] = &[
    def("action_recorder_set_recording", "Action Recorder: Start or stop recording"),
    def("action_recorder_set_connections", "Action Recorder: Set connections"),
];

const FEEDBACKS: &[InternalDefinition] = &[def(
    "action_recorder_check_connections",
    "Action Recorder: Check if recording for connections",
)];

fn connection_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

#[derive(Default)]
pub struct ActionRecorder {
    recording: bool,
    connections: BTreeSet<String>,
}

impl InternalFragment for ActionRecorder {
    fn name(&self) -> &'static str {
        "action_recorder"
    }

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        ACTIONS
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        FEEDBACKS
    }

    fn execute_action(&mut self, action: &ActionEntity, _extras: &RunActionExtras, ctx: &mut InternalContext<'_>) -> bool {
        match action.definition_id.as_str() {
            "action_recorder_set_recording" => {
                let recording = option_toggle(&action.options, "enable", self.recording);
                if recording != self.recording {
                    self.recording = recording;
                    info!("🎙️ Action recorder {}", if recording { "started" } else { "stopped" });
                }
            }
            "action_recorder_set_connections" => {
                let listed = connection_list(action.options.get("connections"));
                match option_str(&action.options, "mode").unwrap_or("set") {
                    "add" => self.connections.extend(listed),
                    "remove" => {
                        for id in &listed {
                            self.connections.remove(id);
                        }
                    }
                    _ => self.connections = listed.into_iter().collect(),
                }
            }
            _ => return false,
        }
        ctx.effects.recheck.insert("action_recorder_check_connections");
        true
    }

    fn execute_feedback(&self, feedback: &FeedbackEntity, _control_id: &str, _ctx: &FeedbackContext<'_>) -> Option<FeedbackOutcome> {
        if feedback.definition_id != "action_recorder_check_connections" {
            return None;
        }
        let wanted = connection_list(feedback.options.get("connections"));
        let listening = match option_str(&feedback.options, "mode").unwrap_or("any") {
            _ if wanted.is_empty() => true,
            "all" => wanted.iter().all(|id| self.connections.contains(id)),
            _ => wanted.iter().any(|id| self.connections.contains(id)),
        };
        Some(FeedbackOutcome::Bool(self.recording && listening))
    }
}
