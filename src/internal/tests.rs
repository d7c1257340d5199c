use super::*;
use crate::connections::{ConnectionCallbacks, ConsoleConnection};
use crate::controls::model::{ButtonModel, ControlModel, StepModel, TriggerModel, INTERNAL_CONNECTION};
use crate::controls::ControlDeps;
use crate::hub::HubHandle;
use crate::surface::EmulatorPanel;
use chrono::TimeZone;
use serde_json::json;
use std::sync::Arc;

struct Fixture {
    internal: InternalController,
    controls: ControlsController,
    variables: VariablesController,
    pages: PageStore,
    surfaces: SurfaceController,
    connections: Arc<ConnectionRegistry>,
}

impl Fixture {
    fn new() -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        connections.register(
            Arc::new(ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop())),
            true,
        );
        let (hub, _rx) = HubHandle::channel();
        let mut surfaces = SurfaceController::new(&[], 1);
        surfaces.add_surface(Arc::new(EmulatorPanel::new("emu", 8, 4)), None);
        Self {
            internal: InternalController::new(),
            controls: ControlsController::new(ControlDeps::new(hub, connections.clone())),
            variables: VariablesController::new(),
            pages: PageStore::new(3, 4, 8),
            surfaces,
            connections,
        }
    }

    /// Run one internal action as if pressed on `emu`
    fn run(&mut self, definition_id: &str, options: Value) -> (bool, InternalEffects) {
        let action = ActionEntity::new(INTERNAL_CONNECTION, definition_id, opts(options));
        let mut extras = RunActionExtras::new("bank:self");
        extras.surface_id = Some("emu".to_string());
        extras.location = Some(ControlLocation::new(1, 0, 0));
        let mut ctx = InternalContext {
            controls: &mut self.controls,
            variables: &mut self.variables,
            pages: &self.pages,
            surfaces: &mut self.surfaces,
            connections: &self.connections,
            effects: InternalEffects::default(),
        };
        let handled = self.internal.execute_action(&action, &extras, &mut ctx);
        (handled, ctx.effects)
    }

    fn sync(&mut self, control_id: &str, feedbacks: Vec<FeedbackEntity>) -> Vec<FeedbackValueUpdate> {
        let ctx = FeedbackContext {
            controls: &self.controls,
            variables: &self.variables,
            pages: &self.pages,
            surfaces: &self.surfaces,
            connections: &self.connections,
            now: Local::now(),
        };
        self.internal.sync_control_feedbacks(control_id, feedbacks, &ctx)
    }

    fn variables_changed(&mut self, changed: &HashSet<String>) -> Vec<FeedbackValueUpdate> {
        let ctx = FeedbackContext {
            controls: &self.controls,
            variables: &self.variables,
            pages: &self.pages,
            surfaces: &self.surfaces,
            connections: &self.connections,
            now: Local::now(),
        };
        self.internal.on_variables_changed(changed, &ctx)
    }
}

fn opts(value: Value) -> EntityOptions {
    value.as_object().cloned().unwrap_or_default()
}

fn internal_feedback(definition_id: &str, options: Value) -> FeedbackEntity {
    FeedbackEntity::new(INTERNAL_CONNECTION, definition_id, opts(options))
}

#[test]
fn test_fragment_order_is_fixed() {
    let internal = InternalController::new();
    assert_eq!(
        internal.fragment_names(),
        vec![
            "action_recorder",
            "instance",
            "time",
            "controls",
            "custom_variables",
            "page",
            "surface",
            "system",
            "triggers",
            "variables",
            "building_blocks"
        ]
    );
}

#[test]
fn test_unknown_action_is_not_handled() {
    let mut f = Fixture::new();
    let (handled, effects) = f.run("does_not_exist", json!({}));
    assert!(!handled);
    assert!(effects.changed_variables.is_empty());
}

#[test]
fn test_custom_variable_actions_report_changes() {
    let mut f = Fixture::new();
    assert!(f.variables.create_custom_variable("counter", json!(1)));

    let (handled, effects) = f.run(
        "custom_variable_set_expression",
        json!({ "name": "counter", "expression": "$(custom:counter) + 41" }),
    );
    assert!(handled);
    assert!(effects.changed_variables.contains("custom:counter"));
    assert_eq!(f.variables.get_value("custom:counter"), Some(&json!(42)));

    let (_, effects) = f.run("custom_variable_reset_to_default", json!({ "name": "counter" }));
    assert!(effects.changed_variables.contains("custom:counter"));
    assert_eq!(f.variables.get_value("custom:counter"), Some(&json!(1)));
}

#[test]
fn test_math_operation_upgrade_keeps_id() {
    let internal = InternalController::new();
    let action = ActionEntity::new(
        INTERNAL_CONNECTION,
        "custom_variable_math_operation",
        opts(json!({ "variable": "counter", "operation": "multiply", "value": 3 })),
    );

    let upgraded = internal.upgrade_action(&action).unwrap();
    assert_eq!(upgraded.id, action.id);
    assert_eq!(upgraded.definition_id, "custom_variable_set_expression");
    assert_eq!(upgraded.options["expression"], json!("$(custom:counter) * 3"));

    let foreign = ActionEntity::new("c1", "custom_variable_math_operation", EntityOptions::new());
    assert!(internal.upgrade_action(&foreign).is_none());
}

#[test]
fn test_math_operation_upgrade_handles_operand_first() {
    let internal = InternalController::new();
    let math = |operation: &str| {
        ActionEntity::new(
            INTERNAL_CONNECTION,
            "custom_variable_math_operation",
            opts(json!({ "variable": "counter", "operation": operation, "value": "10" })),
        )
    };

    let upgraded = internal.upgrade_action(&math("divide_opposite")).unwrap();
    assert_eq!(upgraded.options["expression"], json!("10 / $(custom:counter)"));
    let upgraded = internal.upgrade_action(&math("minus_opposite")).unwrap();
    assert_eq!(upgraded.options["expression"], json!("10 - $(custom:counter)"));
    assert!(internal.upgrade_action(&math("modulo")).is_none());
}

#[test]
fn test_reference_fields_by_definition() {
    assert_eq!(
        reference_fields("instance_control"),
        &[("instance_id", ReferenceField::ConnectionId)]
    );
    assert!(reference_fields("variable_variable")
        .iter()
        .any(|(k, f)| *k == "variable2" && *f == ReferenceField::VariableName));
    assert!(reference_fields("button_press").is_empty());
}

#[test]
fn test_variable_change_recomputes_only_readers() {
    let mut f = Fixture::new();
    f.variables
        .set_variable_values("console", [("level".to_string(), json!(5))]);

    let watches_level = internal_feedback("variable_value", json!({ "variable": "console:level", "op": "gt", "value": "3" }));
    let watches_other = internal_feedback("variable_value", json!({ "variable": "console:other", "value": "x" }));
    let initial = f.sync("bank:a", vec![watches_level.clone(), watches_other.clone()]);
    assert_eq!(initial.len(), 2);
    assert_eq!(f.internal.cached_feedback_count(), 2);

    let changed = f
        .variables
        .set_variable_values("console", [("level".to_string(), json!(1))]);
    let updates = f.variables_changed(&changed);
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, watches_level.id);
    assert_eq!(updates[0].value, json!(false));

    // Same value again: nothing to push
    let unchanged = f.variables_changed(&changed);
    assert!(unchanged.is_empty());
}

#[test]
fn test_set_page_and_increment_wrap() {
    let mut f = Fixture::new();
    let (handled, effects) = f.run("set_page", json!({ "page": "3" }));
    assert!(handled);
    assert!(effects.redraw_surfaces.contains("emu"));
    assert_eq!(f.surfaces.page_of("emu"), Some(3));

    f.run("inc_page", json!({}));
    assert_eq!(f.surfaces.page_of("emu"), Some(1));
    f.run("dec_page", json!({}));
    assert_eq!(f.surfaces.page_of("emu"), Some(3));
}

#[test]
fn test_bank_current_step_by_location() {
    let mut f = Fixture::new();
    let mut model = ButtonModel::default();
    model.steps.insert("1".to_string(), StepModel::empty(false));
    f.controls
        .create_control("bank:b", ControlModel::Button(model), None)
        .unwrap();
    f.pages
        .set_control_id_at(ControlLocation::new(2, 1, 3), Some("bank:b".to_string()));

    let (_, effects) = f.run("bank_current_step", json!({ "location": "2/1/3", "step": 2 }));
    assert!(effects.recheck.contains("bank_current_step"));
    let button = f.controls.get("bank:b").and_then(|c| c.as_button()).unwrap();
    assert_eq!(button.current_step_id(), "1");
}

#[test]
fn test_trigger_enabled_toggles() {
    let mut f = Fixture::new();
    f.controls
        .create_control("trigger:t", ControlModel::Trigger(TriggerModel::default()), None)
        .unwrap();

    let (_, effects) = f.run("trigger_enabled", json!({ "trigger_id": "trigger:t", "enable": "toggle" }));
    assert!(effects.recheck.contains("trigger_enabled"));
    let trigger = f.controls.get("trigger:t").and_then(|c| c.as_trigger()).unwrap();
    assert!(trigger.is_enabled());

    let updates = f.sync("bank:a", vec![internal_feedback("trigger_enabled", json!({ "trigger_id": "trigger:t" }))]);
    assert_eq!(updates[0].value, json!(true));
}

#[test]
fn test_lockout_rechecks_surface_feedback() {
    let mut f = Fixture::new();
    let (_, effects) = f.run("lockout_device", json!({}));
    assert!(effects.recheck.contains("surface_locked"));
    assert!(f.surfaces.is_locked("emu"));

    let updates = f.sync(
        "bank:a",
        vec![internal_feedback("surface_locked", json!({ "surface": "emu" }))],
    );
    assert_eq!(updates[0].value, json!(true));

    f.run("unlockout_all", json!({}));
    assert!(!f.surfaces.is_locked("emu"));
}

#[test]
fn test_time_variables_are_zero_padded() {
    let f = Fixture::new();
    let ctx = FeedbackContext {
        controls: &f.controls,
        variables: &f.variables,
        pages: &f.pages,
        surfaces: &f.surfaces,
        connections: &f.connections,
        now: Local.with_ymd_and_hms(2026, 5, 1, 7, 4, 9).unwrap(),
    };
    let values: HashMap<String, Value> = f.internal.variable_values(&ctx).into_iter().collect();
    assert_eq!(values["time_hms"], json!("07:04:09"));
    assert_eq!(values["date_iso"], json!("2026-05-01"));
}
