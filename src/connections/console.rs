//! Console connection - logs actions and serves simple flag feedbacks
//!
//! Useful for trying out button configurations without real integrations:
//! - `log { message }` logs a line
//! - `set_flag { flag, value }` sets (or with `"toggle"` flips) a named flag
//! - `set_variable { name, value }` publishes `$(label:name)`
//!
//! Feedbacks: `flag { flag }` (boolean) and `flag_color { flag, on, off }`
//! (advanced, returns a `bgcolor` patch).

use super::{Connection, ConnectionCallbacks, FeedbackValueUpdate};
use crate::controls::model::{
    ActionEntity, ActionSetId, ButtonOptions, ButtonStyle, EntityOptions, FeedbackEntity,
    PresetDefinition, StepModel,
};
use crate::controls::runner::RunActionExtras;
use crate::error::ConnectionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

#[derive(Default)]
struct ConsoleState {
    flags: HashMap<String, bool>,
    /// feedback id -> (feedback, control id)
    subscriptions: HashMap<String, (FeedbackEntity, String)>,
    executed: Vec<ActionEntity>,
}

/// Connection that logs everything it is asked to do
pub struct ConsoleConnection {
    id: String,
    label: String,
    callbacks: ConnectionCallbacks,
    state: Mutex<ConsoleState>,
}

impl ConsoleConnection {
    pub fn new(id: impl Into<String>, label: impl Into<String>, callbacks: ConnectionCallbacks) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            callbacks,
            state: Mutex::new(ConsoleState::default()),
        }
    }

    /// Actions executed so far, oldest first
    pub fn executed_actions(&self) -> Vec<ActionEntity> {
        self.state.lock().executed.clone()
    }

    /// Options of a subscribed feedback as last sent by the hub
    pub fn subscribed_options(&self, feedback_id: &str) -> Option<EntityOptions> {
        self.state
            .lock()
            .subscriptions
            .get(feedback_id)
            .map(|(feedback, _)| feedback.options.clone())
    }

    pub fn flag(&self, name: &str) -> bool {
        self.state.lock().flags.get(name).copied().unwrap_or(false)
    }

    fn compute_feedback(flags: &HashMap<String, bool>, feedback: &FeedbackEntity) -> Option<Value> {
        let flag = feedback.options.get("flag").and_then(Value::as_str).unwrap_or("");
        let on = flags.get(flag).copied().unwrap_or(false);
        match feedback.definition_id.as_str() {
            "flag" => Some(Value::Bool(on)),
            "flag_color" => {
                let key = if on { "on" } else { "off" };
                let color = feedback.options.get(key).cloned().unwrap_or(json!(0));
                Some(json!({ "bgcolor": color }))
            }
            _ => None,
        }
    }

    /// Recompute feedbacks watching `flag` and report them
    fn publish_flag_feedbacks(&self, flag: &str) {
        let updates: Vec<FeedbackValueUpdate> = {
            let state = self.state.lock();
            state
                .subscriptions
                .values()
                .filter(|(fb, _)| fb.options.get("flag").and_then(Value::as_str) == Some(flag))
                .filter_map(|(fb, control_id)| {
                    Self::compute_feedback(&state.flags, fb).map(|value| FeedbackValueUpdate {
                        id: fb.id.clone(),
                        control_id: control_id.clone(),
                        value,
                    })
                })
                .collect()
        };
        if !updates.is_empty() {
            (self.callbacks.feedback_values)(self.id.clone(), updates);
        }
    }
}

#[async_trait]
impl Connection for ConsoleConnection {
    fn id(&self) -> &str {
        &self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn execute_action(
        &self,
        action: &ActionEntity,
        extras: &RunActionExtras,
    ) -> Result<(), ConnectionError> {
        self.state.lock().executed.push(action.clone());

        match action.definition_id.as_str() {
            "log" => {
                let message = action
                    .options
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                info!(
                    "🎮 [{}] Connection '{}' → log: {} (control: {})",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    self.label,
                    message,
                    extras.control_id
                );
            }
            "set_flag" => {
                let flag = action
                    .options
                    .get("flag")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                {
                    let mut state = self.state.lock();
                    let current = state.flags.get(&flag).copied().unwrap_or(false);
                    let next = match action.options.get("value") {
                        Some(Value::Bool(b)) => *b,
                        _ => !current,
                    };
                    state.flags.insert(flag.clone(), next);
                    debug!(connection = %self.id, flag = %flag, value = next, "Flag set");
                }
                self.publish_flag_feedbacks(&flag);
            }
            "set_variable" => {
                let Some(name) = action.options.get("name").and_then(Value::as_str) else {
                    return Err(ConnectionError::Other("set_variable needs a name".to_string()));
                };
                let value = action.options.get("value").cloned().unwrap_or(Value::Null);
                (self.callbacks.variable_values)(self.id.clone(), vec![(name.to_string(), value)]);
            }
            other => {
                return Err(ConnectionError::UnknownAction {
                    connection_id: self.id.clone(),
                    definition_id: other.to_string(),
                })
            }
        }
        Ok(())
    }

    async fn action_learn_values(
        &self,
        action: &ActionEntity,
        _control_id: &str,
    ) -> Result<Option<EntityOptions>, ConnectionError> {
        if action.definition_id != "set_flag" {
            return Ok(None);
        }
        let flag = action.options.get("flag").and_then(Value::as_str).unwrap_or("");
        let mut options = action.options.clone();
        options.insert("value".to_string(), Value::Bool(self.flag(flag)));
        Ok(Some(options))
    }

    async fn feedback_update(
        &self,
        feedback: &FeedbackEntity,
        control_id: &str,
    ) -> Result<(), ConnectionError> {
        let value = {
            let mut state = self.state.lock();
            state
                .subscriptions
                .insert(feedback.id.clone(), (feedback.clone(), control_id.to_string()));
            Self::compute_feedback(&state.flags, feedback)
        };
        if let Some(value) = value {
            (self.callbacks.feedback_values)(
                self.id.clone(),
                vec![FeedbackValueUpdate {
                    id: feedback.id.clone(),
                    control_id: control_id.to_string(),
                    value,
                }],
            );
        }
        Ok(())
    }

    async fn feedback_delete(&self, feedback: &FeedbackEntity) -> Result<(), ConnectionError> {
        self.state.lock().subscriptions.remove(&feedback.id);
        Ok(())
    }

    fn presets(&self) -> Vec<PresetDefinition> {
        let mut toggle = EntityOptions::new();
        toggle.insert("flag".to_string(), json!("preset"));
        toggle.insert("value".to_string(), json!("toggle"));

        let mut step = StepModel::empty(false);
        step.action_sets.insert(
            ActionSetId::Down,
            vec![ActionEntity::new(self.id.clone(), "set_flag", toggle)],
        );
        let mut steps = BTreeMap::new();
        steps.insert("0".to_string(), step);

        let mut flag_options = EntityOptions::new();
        flag_options.insert("flag".to_string(), json!("preset"));
        let mut feedback = FeedbackEntity::new(self.id.clone(), "flag", flag_options);
        let mut style = serde_json::Map::new();
        style.insert("bgcolor".to_string(), json!(0xff0000));
        feedback.style = Some(style);

        vec![PresetDefinition {
            id: "toggle_flag".to_string(),
            name: "Toggle flag".to_string(),
            style: ButtonStyle {
                text: "Toggle".to_string(),
                ..ButtonStyle::default()
            },
            options: ButtonOptions::default(),
            feedbacks: vec![feedback],
            steps,
        }]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn extras() -> RunActionExtras {
        RunActionExtras {
            control_id: "bank:test".to_string(),
            surface_id: None,
            location: None,
        }
    }

    fn options(value: Value) -> EntityOptions {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_set_flag_publishes_feedback() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let mut callbacks = ConnectionCallbacks::noop();
        callbacks.feedback_values = Arc::new(move |_, updates| sink.lock().extend(updates));

        let conn = ConsoleConnection::new("c1", "console", callbacks);
        let fb = FeedbackEntity::new("c1", "flag", options(json!({ "flag": "rec" })));
        conn.feedback_update(&fb, "bank:test").await.unwrap();

        let action = ActionEntity::new("c1", "set_flag", options(json!({ "flag": "rec" })));
        conn.execute_action(&action, &extras()).await.unwrap();

        let got = received.lock();
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].value, Value::Bool(false));
        assert_eq!(got[1].value, Value::Bool(true));
        assert!(conn.flag("rec"));
    }

    #[tokio::test]
    async fn test_unknown_action_is_an_error() {
        let conn = ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop());
        let action = ActionEntity::new("c1", "explode", EntityOptions::new());
        let err = conn.execute_action(&action, &extras()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::UnknownAction { .. }));
        assert_eq!(conn.executed_actions().len(), 1);
    }

    #[tokio::test]
    async fn test_learn_values_reports_current_flag() {
        let conn = ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop());
        let set = ActionEntity::new("c1", "set_flag", options(json!({ "flag": "a", "value": true })));
        conn.execute_action(&set, &extras()).await.unwrap();

        let probe = ActionEntity::new("c1", "set_flag", options(json!({ "flag": "a", "value": false })));
        let learned = conn.action_learn_values(&probe, "bank:test").await.unwrap().unwrap();
        assert_eq!(learned.get("value"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_presets_reference_own_connection() {
        let conn = ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop());
        let presets = conn.presets();
        assert_eq!(presets.len(), 1);
        let down = &presets[0].steps["0"].action_sets[&ActionSetId::Down];
        assert_eq!(down[0].connection_id, "c1");
    }
}
