//! TriggerControl - actions fired by events instead of presses
//!
//! Events are checked by the controller (tick, startup, button presses,
//! variable changes, condition edges). A trigger only runs while enabled, and
//! only when every enabled condition is true; the condition edge events are
//! the exception since the condition itself is what fired them.

use super::action_sets::{ActionSetCollection, CommitChange};
use super::feedbacks::FeedbackTree;
use super::model::{
    ActionEntity, ActionSetId, ButtonStyle, ControlId, ControlModel, EntityOptions, LocalVariableModel,
    RuntimeModel, StepModel, StepOptions, TriggerEventModel, TriggerOptions, TYPE_TRIGGER,
};
use super::runner::RunActionExtras;
use super::ControlDeps;
use crate::error::ControlError;
use crate::references::{visit_control_parts, ControlParts, ReferenceVisitor};
use chrono::{DateTime, Datelike, Local, Timelike};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace};

pub const EVENT_STARTUP: &str = "startup";
pub const EVENT_INTERVAL: &str = "interval";
pub const EVENT_TIME_OF_DAY: &str = "timeofday";
pub const EVENT_BUTTON_PRESS: &str = "button_press";
pub const EVENT_BUTTON_DEPRESS: &str = "button_depress";
pub const EVENT_VARIABLE_CHANGED: &str = "variable_changed";
pub const EVENT_CONDITION_TRUE: &str = "condition_true";
pub const EVENT_CONDITION_FALSE: &str = "condition_false";

/// Source passed to `execute` for a manual run; skips the condition check
pub const SOURCE_TEST: &str = "test";

fn option_u64(options: &EntityOptions, key: &str) -> Option<u64> {
    match options.get(key)? {
        Value::Number(n) => n.as_f64().map(|f| f.max(0.0) as u64),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.max(0.0) as u64),
        _ => None,
    }
}

/// Normalise `HH:MM` / `HH:MM:SS` to `HH:MM:SS`
fn normalise_time(raw: &str) -> Option<String> {
    let parts: Vec<u32> = raw
        .trim()
        .split(':')
        .map(|p| p.parse::<u32>().ok())
        .collect::<Option<Vec<u32>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [h, m] => (*h, *m, 0),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    (h < 24 && m < 60 && s < 60).then(|| format!("{:02}:{:02}:{:02}", h, m, s))
}

pub struct TriggerControl {
    control_id: ControlId,
    options: TriggerOptions,
    actions: ActionSetCollection,
    condition: FeedbackTree,
    events: Vec<TriggerEventModel>,
    local_variables: Vec<LocalVariableModel>,
    last_executed: Option<i64>,
    last_condition: Option<bool>,
    interval_started: HashMap<String, Instant>,
    /// `date time` of the last time-of-day run, so one second never fires twice
    last_time_of_day: Option<String>,
    deps: ControlDeps,
    commit: CommitChange,
}

impl TriggerControl {
    pub fn from_model(
        control_id: &str,
        model: ControlModel,
        runtime: Option<RuntimeModel>,
        deps: &ControlDeps,
    ) -> Result<Self, ControlError> {
        let ControlModel::Trigger(model) = model else {
            return Err(ControlError::TypeMismatch {
                control_id: control_id.to_string(),
                expected: TYPE_TRIGGER,
                actual: model.type_name().to_string(),
            });
        };

        let commit = deps.commit_for(control_id);
        let notifier = deps.notifier();
        let mut action_sets = BTreeMap::new();
        action_sets.insert(ActionSetId::Down, model.actions);
        let actions = ActionSetCollection::new(
            control_id,
            StepModel {
                action_sets,
                options: StepOptions::default(),
            },
            notifier.clone(),
            commit.clone(),
        );
        let condition = FeedbackTree::new(
            control_id,
            model.condition,
            ButtonStyle::default(),
            notifier,
            commit.clone(),
        );

        Ok(Self {
            control_id: control_id.to_string(),
            options: model.options,
            actions,
            condition,
            events: model.events,
            local_variables: model.local_variables,
            last_executed: runtime.and_then(|r| r.last_executed),
            last_condition: None,
            interval_started: HashMap::new(),
            last_time_of_day: None,
            deps: deps.clone(),
            commit,
        })
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    pub fn options(&self) -> &TriggerOptions {
        &self.options
    }

    pub fn is_enabled(&self) -> bool {
        self.options.enabled
    }

    pub fn events(&self) -> &[TriggerEventModel] {
        &self.events
    }

    pub fn last_executed(&self) -> Option<i64> {
        self.last_executed
    }

    pub fn actions(&self) -> &ActionSetCollection {
        &self.actions
    }

    pub fn actions_mut(&mut self) -> &mut ActionSetCollection {
        &mut self.actions
    }

    pub fn condition(&self) -> &FeedbackTree {
        &self.condition
    }

    pub fn condition_mut(&mut self) -> &mut FeedbackTree {
        &mut self.condition
    }

    pub fn to_json(&self) -> ControlModel {
        ControlModel::Trigger(super::model::TriggerModel {
            options: self.options.clone(),
            actions: self
                .actions
                .get_action_set(&ActionSetId::Down)
                .cloned()
                .unwrap_or_default(),
            condition: self.condition.to_model(),
            events: self.events.clone(),
            local_variables: self.local_variables.clone(),
        })
    }

    pub fn to_runtime_json(&self) -> RuntimeModel {
        RuntimeModel {
            current_step_id: None,
            last_executed: self.last_executed,
        }
    }

    pub fn subscribe_all(&self) {
        self.actions.subscribe_all();
        self.condition.subscribe_all();
    }

    pub fn destroy(&mut self) {
        self.abort_running();
        self.actions.destroy();
        self.condition.destroy();
    }

    pub fn abort_running(&mut self) {
        self.deps.runner.abort_control(&self.control_id);
    }

    fn enabled_events<'a>(&'a self, event_type: &'a str) -> impl Iterator<Item = &'a TriggerEventModel> {
        self.events
            .iter()
            .filter(move |e| e.enabled && e.event_type == event_type)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run the actions if enabled and the condition holds; returns whether it ran
    pub fn execute(&mut self, source: &str, now_ms: i64) -> bool {
        if !self.options.enabled && source != SOURCE_TEST {
            return false;
        }
        let skips_condition = matches!(source, SOURCE_TEST | EVENT_CONDITION_TRUE | EVENT_CONDITION_FALSE);
        if !skips_condition && !self.condition.check_all_true() {
            trace!(control_id = %self.control_id, source, "Trigger condition not met");
            return false;
        }

        info!("⚡ Trigger '{}' fired ({})", self.options.name, source);
        if let Some(actions) = self.actions.get_action_set(&ActionSetId::Down) {
            self.deps
                .runner
                .run_multiple(actions, RunActionExtras::new(self.control_id.clone()));
        }
        self.last_executed = Some(now_ms);
        self.deps.hub.runtime_props_changed(&self.control_id);
        true
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Arm the startup events; each fires once after its delay
    pub fn on_startup(&self) {
        if !self.options.enabled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        for event in self.enabled_events(EVENT_STARTUP) {
            let delay = option_u64(&event.options, "delay").unwrap_or(0);
            let hub = self.deps.hub.clone();
            let control_id = self.control_id.clone();
            runtime.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                hub.execute_trigger(&control_id, EVENT_STARTUP);
            });
        }
    }

    /// Once per second: interval and time-of-day events
    pub fn on_tick(&mut self, now: DateTime<Local>) -> Option<&'static str> {
        if !self.options.enabled {
            return None;
        }

        let mut fired = None;
        let intervals: Vec<(String, u64)> = self
            .enabled_events(EVENT_INTERVAL)
            .filter_map(|e| option_u64(&e.options, "seconds").map(|s| (e.id.clone(), s)))
            .filter(|(_, seconds)| *seconds > 0)
            .collect();
        for (event_id, seconds) in intervals {
            let started = *self.interval_started.entry(event_id.clone()).or_insert_with(Instant::now);
            if started.elapsed() >= Duration::from_secs(seconds) {
                self.interval_started.insert(event_id, Instant::now());
                fired = Some(EVENT_INTERVAL);
            }
        }

        let clock = format!("{:02}:{:02}:{:02}", now.hour(), now.minute(), now.second());
        let weekday = u64::from(now.weekday().num_days_from_sunday());
        let stamp = format!("{} {}", now.date_naive(), clock);
        let due = self.enabled_events(EVENT_TIME_OF_DAY).any(|e| {
            let time_matches = e
                .options
                .get("time")
                .and_then(Value::as_str)
                .and_then(normalise_time)
                .map(|t| t == clock)
                .unwrap_or(false);
            let day_matches = match e.options.get("days").and_then(Value::as_array) {
                Some(days) if !days.is_empty() => days.iter().any(|d| d.as_u64() == Some(weekday)),
                _ => true,
            };
            time_matches && day_matches
        });
        if due && self.last_time_of_day.as_deref() != Some(stamp.as_str()) {
            self.last_time_of_day = Some(stamp);
            fired = Some(EVENT_TIME_OF_DAY);
        }
        fired
    }

    /// Some button was pressed or released
    pub fn on_button_press(&self, pressed: bool) -> Option<&'static str> {
        if !self.options.enabled {
            return None;
        }
        let event = if pressed {
            EVENT_BUTTON_PRESS
        } else {
            EVENT_BUTTON_DEPRESS
        };
        self.enabled_events(event).next().map(|_| event)
    }

    pub fn on_variables_changed(&self, changed: &HashSet<String>) -> Option<&'static str> {
        if !self.options.enabled {
            return None;
        }
        self.enabled_events(EVENT_VARIABLE_CHANGED)
            .any(|e| {
                e.options
                    .get("variableId")
                    .and_then(Value::as_str)
                    .map(|id| changed.contains(id))
                    .unwrap_or(false)
            })
            .then_some(EVENT_VARIABLE_CHANGED)
    }

    /// Re-evaluate the condition; reports an edge event when one is configured
    pub fn on_condition_changed(&mut self) -> Option<&'static str> {
        let now = self.condition.check_all_true();
        let previous = self.last_condition.replace(now);
        if previous == Some(now) || !self.options.enabled {
            return None;
        }
        let event = if now {
            EVENT_CONDITION_TRUE
        } else {
            EVENT_CONDITION_FALSE
        };
        // The first evaluation only records the state
        if previous.is_none() {
            return None;
        }
        self.enabled_events(event).next().map(|_| event)
    }

    // =========================================================================
    // Editing
    // =========================================================================

    /// Set `name`, `enabled` or `sortOrder`
    pub fn options_set_field(&mut self, key: &str, value: &Value) -> bool {
        match (key, value) {
            ("name", Value::String(s)) => self.options.name = s.clone(),
            ("enabled", Value::Bool(b)) => {
                self.options.enabled = *b;
                self.interval_started.clear();
                debug!(control_id = %self.control_id, enabled = *b, "Trigger toggled");
            }
            ("sortOrder", Value::Number(n)) => match n.as_i64() {
                Some(order) => self.options.sort_order = order,
                None => return false,
            },
            _ => return false,
        }
        (self.commit)(false);
        true
    }

    pub fn event_add(&mut self, event_type: &str, options: EntityOptions) -> String {
        let event = TriggerEventModel::new(event_type, options);
        let id = event.id.clone();
        self.events.push(event);
        (self.commit)(false);
        id
    }

    pub fn event_remove(&mut self, event_id: &str) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.id != event_id);
        if self.events.len() == before {
            return false;
        }
        self.interval_started.remove(event_id);
        (self.commit)(false);
        true
    }

    pub fn event_enabled(&mut self, event_id: &str, enabled: bool) -> bool {
        let Some(event) = self.events.iter_mut().find(|e| e.id == event_id) else {
            return false;
        };
        event.enabled = enabled;
        self.interval_started.remove(event_id);
        (self.commit)(false);
        true
    }

    pub fn event_set_option(&mut self, event_id: &str, key: &str, value: Value) -> bool {
        let Some(event) = self.events.iter_mut().find(|e| e.id == event_id) else {
            return false;
        };
        event.options.insert(key.to_string(), value);
        self.interval_started.remove(event_id);
        (self.commit)(false);
        true
    }

    pub fn action_replace(&mut self, replacement: &ActionEntity) -> bool {
        self.actions.action_replace(replacement)
    }

    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        let changed = self.actions.forget_connection(connection_id) | self.condition.forget_connection(connection_id);
        if changed {
            (self.commit)(false);
        }
        changed
    }

    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        let changed = self.actions.verify_connection_ids(known) | self.condition.verify_connection_ids(known);
        if changed {
            (self.commit)(false);
        }
        changed
    }

    pub fn visit_references(&mut self, visitor: &mut dyn ReferenceVisitor) {
        let (_, feedbacks) = self.condition.parts_mut();
        visit_control_parts(
            visitor,
            ControlParts {
                style: None,
                actions: self.actions.all_actions_mut().collect(),
                feedbacks,
                events: self.events.iter_mut().collect(),
                local_variables: &mut self.local_variables,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionRegistry;
    use crate::controls::model::{FeedbackEntity, TriggerModel};
    use crate::hub::HubHandle;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;

    fn trigger(model: TriggerModel) -> TriggerControl {
        let (hub, _rx) = HubHandle::channel();
        let deps = ControlDeps::new(hub, Arc::new(ConnectionRegistry::new()));
        TriggerControl::from_model("trigger:t1", ControlModel::Trigger(model), None, &deps).unwrap()
    }

    fn enabled_model(events: Vec<TriggerEventModel>) -> TriggerModel {
        TriggerModel {
            options: TriggerOptions {
                name: "test".to_string(),
                enabled: true,
                sort_order: 0,
            },
            events,
            ..Default::default()
        }
    }

    fn options(value: Value) -> EntityOptions {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_rejects_button_model() {
        let (hub, _rx) = HubHandle::channel();
        let deps = ControlDeps::new(hub, Arc::new(ConnectionRegistry::new()));
        let result = TriggerControl::from_model(
            "trigger:t1",
            ControlModel::Button(Default::default()),
            None,
            &deps,
        );
        assert!(matches!(result, Err(ControlError::TypeMismatch { .. })));
    }

    #[test]
    fn test_time_normalisation() {
        assert_eq!(normalise_time("7:05").as_deref(), Some("07:05:00"));
        assert_eq!(normalise_time("23:59:59").as_deref(), Some("23:59:59"));
        assert_eq!(normalise_time("24:00"), None);
        assert_eq!(normalise_time("noon"), None);
    }

    #[test]
    fn test_time_of_day_fires_once_per_second() {
        let event = TriggerEventModel::new(EVENT_TIME_OF_DAY, options(json!({ "time": "08:30", "days": [] })));
        let mut t = trigger(enabled_model(vec![event]));
        let at = Local.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        assert_eq!(t.on_tick(at), Some(EVENT_TIME_OF_DAY));
        assert_eq!(t.on_tick(at), None);
        assert_eq!(t.on_tick(at + chrono::Duration::seconds(1)), None);
    }

    #[test]
    fn test_time_of_day_respects_days() {
        // 2026-03-02 is a Monday (1)
        let event = TriggerEventModel::new(EVENT_TIME_OF_DAY, options(json!({ "time": "08:30:00", "days": [0, 6] })));
        let mut t = trigger(enabled_model(vec![event]));
        let at = Local.with_ymd_and_hms(2026, 3, 2, 8, 30, 0).unwrap();
        assert_eq!(t.on_tick(at), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_fires_after_period() {
        let event = TriggerEventModel::new(EVENT_INTERVAL, options(json!({ "seconds": 5 })));
        let mut t = trigger(enabled_model(vec![event]));
        let now = Local::now();
        assert_eq!(t.on_tick(now), None);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(t.on_tick(now), Some(EVENT_INTERVAL));
        assert_eq!(t.on_tick(now), None);
    }

    #[test]
    fn test_disabled_trigger_ignores_events() {
        let mut model = enabled_model(vec![TriggerEventModel::new(EVENT_BUTTON_PRESS, EntityOptions::new())]);
        model.options.enabled = false;
        let mut t = trigger(model);
        assert_eq!(t.on_button_press(true), None);
        assert!(!t.execute(EVENT_BUTTON_PRESS, 1));
        assert!(t.execute(SOURCE_TEST, 1));
        assert_eq!(t.last_executed(), Some(1));
    }

    #[test]
    fn test_variable_changed_event() {
        let event = TriggerEventModel::new(EVENT_VARIABLE_CHANGED, options(json!({ "variableId": "custom:mode" })));
        let t = trigger(enabled_model(vec![event]));
        let hit: HashSet<String> = ["custom:mode".to_string()].into_iter().collect();
        let miss: HashSet<String> = ["custom:other".to_string()].into_iter().collect();
        assert_eq!(t.on_variables_changed(&hit), Some(EVENT_VARIABLE_CHANGED));
        assert_eq!(t.on_variables_changed(&miss), None);
    }

    #[test]
    fn test_condition_blocks_execution_and_edges_fire() {
        let condition = FeedbackEntity::new("c1", "flag", EntityOptions::new());
        let condition_id = condition.id.clone();
        let mut model = enabled_model(vec![
            TriggerEventModel::new(EVENT_BUTTON_PRESS, EntityOptions::new()),
            TriggerEventModel::new(EVENT_CONDITION_TRUE, EntityOptions::new()),
        ]);
        model.condition = vec![condition];
        let mut t = trigger(model);

        assert_eq!(t.on_condition_changed(), None);
        assert!(!t.execute(EVENT_BUTTON_PRESS, 10));

        t.condition_mut()
            .update_feedback_values("c1", &[(condition_id, json!(true))]);
        assert_eq!(t.on_condition_changed(), Some(EVENT_CONDITION_TRUE));
        assert_eq!(t.on_condition_changed(), None);
        assert!(t.execute(EVENT_BUTTON_PRESS, 20));
        assert_eq!(t.to_runtime_json().last_executed, Some(20));
    }

    #[test]
    fn test_event_crud_round_trips_through_model() {
        let mut t = trigger(enabled_model(vec![]));
        let id = t.event_add(EVENT_INTERVAL, options(json!({ "seconds": 10 })));
        assert!(t.event_set_option(&id, "seconds", json!(20)));
        assert!(t.event_enabled(&id, false));
        assert!(t.options_set_field("name", &json!("Renamed")));
        assert!(!t.options_set_field("enabled", &json!("yes")));

        let ControlModel::Trigger(model) = t.to_json() else {
            panic!("trigger serialised as another type");
        };
        assert_eq!(model.options.name, "Renamed");
        assert_eq!(model.events[0].options["seconds"], json!(20));
        assert!(!model.events[0].enabled);
        assert!(t.event_remove(&id));
        assert!(!t.event_remove(&id));
    }
}
