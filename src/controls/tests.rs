//! Controller-level tests: press state machine, hold timing, triggers, import

use super::model::{
    ActionSetId, ButtonModel, ButtonOptions, ControlModel, EntityOptions, FeedbackEntity, StepModel,
    TriggerEventModel, TriggerModel, TriggerOptions, INTERNAL_CONNECTION,
};
use super::trigger::EVENT_BUTTON_PRESS;
use super::*;
use crate::connections::{ConnectionCallbacks, ConnectionRegistry, ConsoleConnection};
use crate::error::ControlError;
use crate::hub::{HubCommand, HubHandle};
use crate::internal::InternalController;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

struct Fixture {
    controls: ControlsController,
    console: Arc<ConsoleConnection>,
    rx: UnboundedReceiver<HubCommand>,
}

fn fixture() -> Fixture {
    let registry = Arc::new(ConnectionRegistry::new());
    let console = Arc::new(ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop()));
    registry.register(console.clone(), true);
    let (hub, rx) = HubHandle::channel();
    Fixture {
        controls: ControlsController::new(ControlDeps::new(hub, registry)),
        console,
        rx,
    }
}

fn log(message: &str) -> ActionEntity {
    let mut options = EntityOptions::new();
    options.insert("message".to_string(), json!(message));
    ActionEntity::new("c1", "log", options)
}

fn button(sets: Vec<(ActionSetId, &str)>, run_while_held: Vec<u64>, auto_progress: bool) -> ControlModel {
    let mut step = StepModel::empty(false);
    for (set_id, message) in sets {
        step.action_sets.entry(set_id).or_default().push(log(message));
    }
    step.options.run_while_held = run_while_held;
    let mut model = ButtonModel {
        options: ButtonOptions {
            rotary_actions: false,
            step_auto_progress: auto_progress,
        },
        ..Default::default()
    };
    model.steps.insert("0".to_string(), step);
    ControlModel::Button(model)
}

fn messages(console: &ConsoleConnection) -> Vec<String> {
    console
        .executed_actions()
        .iter()
        .filter_map(|a| a.options.get("message").and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_press_release_runs_down_then_up() {
    let mut f = fixture();
    let model = button(vec![(ActionSetId::Down, "down"), (ActionSetId::Up, "up")], vec![], false);
    f.controls.create_control("bank:a", model, None).unwrap();

    f.controls.press_control("bank:a", true, None, false, None);
    settle().await;
    f.controls.press_control("bank:a", false, None, false, None);
    settle().await;

    assert_eq!(messages(&f.console), vec!["down", "up"]);
}

#[tokio::test]
async fn test_repeated_press_without_change_is_ignored_unless_forced() {
    let mut f = fixture();
    let model = button(vec![(ActionSetId::Down, "down")], vec![], false);
    f.controls.create_control("bank:a", model, None).unwrap();

    f.controls.press_control("bank:a", true, None, false, None);
    f.controls.press_control("bank:a", true, None, false, None);
    settle().await;
    assert_eq!(messages(&f.console).len(), 1);

    f.controls.press_control("bank:a", true, None, true, None);
    settle().await;
    assert_eq!(messages(&f.console).len(), 2);
}

#[tokio::test]
async fn test_release_advances_step_when_auto_progress() {
    let mut f = fixture();
    let mut model = button(vec![(ActionSetId::Down, "first")], vec![], true);
    if let ControlModel::Button(m) = &mut model {
        let mut second = StepModel::empty(false);
        second.action_sets.insert(ActionSetId::Down, vec![log("second")]);
        m.steps.insert("1".to_string(), second);
    }
    f.controls.create_control("bank:a", model, None).unwrap();

    for _ in 0..3 {
        f.controls.press_control("bank:a", true, None, false, None);
        f.controls.press_control("bank:a", false, None, false, None);
    }
    settle().await;

    assert_eq!(messages(&f.console), vec!["first", "second", "first"]);
    let b = f.controls.get("bank:a").and_then(|c| c.as_button()).unwrap();
    assert_eq!(b.current_step_id(), "1");
}

#[tokio::test(start_paused = true)]
async fn test_long_press_selects_duration_set() {
    let mut f = fixture();
    let model = button(
        vec![
            (ActionSetId::Up, "short"),
            (ActionSetId::Duration(1000), "long"),
            (ActionSetId::Duration(3000), "longer"),
        ],
        vec![],
        false,
    );
    f.controls.create_control("bank:a", model, None).unwrap();

    f.controls.press_control("bank:a", true, Some("emu"), false, None);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    f.controls.press_control("bank:a", false, Some("emu"), false, None);
    settle().await;
    assert_eq!(messages(&f.console), vec!["long"]);

    f.controls.press_control("bank:a", true, Some("emu"), false, None);
    tokio::time::sleep(Duration::from_millis(200)).await;
    f.controls.press_control("bank:a", false, Some("emu"), false, None);
    settle().await;
    assert_eq!(messages(&f.console), vec!["long", "short"]);
}

#[tokio::test(start_paused = true)]
async fn test_run_while_held_fires_during_hold_only() {
    let mut f = fixture();
    let model = button(vec![(ActionSetId::Duration(500), "held")], vec![500], false);
    f.controls.create_control("bank:a", model, None).unwrap();

    f.controls.press_control("bank:a", true, Some("emu"), false, None);
    tokio::time::sleep(Duration::from_millis(600)).await;

    let mut fired = false;
    while let Ok(cmd) = f.rx.try_recv() {
        if let HubCommand::HoldTimerElapsed {
            control_id,
            surface_id,
            token,
            set_id,
        } = cmd
        {
            f.controls.on_hold_timer(&control_id, &surface_id, token, &set_id, None);
            fired = true;
        }
    }
    assert!(fired);
    settle().await;
    assert_eq!(messages(&f.console), vec!["held"]);

    f.controls.press_control("bank:a", false, Some("emu"), false, None);
    settle().await;
    assert_eq!(messages(&f.console), vec!["held"]);
}

#[tokio::test(start_paused = true)]
async fn test_stale_hold_timer_is_ignored() {
    let mut f = fixture();
    let model = button(vec![(ActionSetId::Duration(500), "held")], vec![500], false);
    f.controls.create_control("bank:a", model, None).unwrap();

    f.controls.press_control("bank:a", true, Some("emu"), false, None);
    f.controls.press_control("bank:a", false, Some("emu"), false, None);
    // A completion carrying the old token arrives after release
    f.controls
        .on_hold_timer("bank:a", "emu", 1, &ActionSetId::Duration(500), None);
    settle().await;
    assert!(messages(&f.console).is_empty());
}

#[tokio::test]
async fn test_duplicate_control_id_is_rejected() {
    let mut f = fixture();
    f.controls
        .create_control("bank:a", ControlModel::Button(Default::default()), None)
        .unwrap();
    let err = f
        .controls
        .create_control("bank:a", ControlModel::PageUp, None)
        .unwrap_err();
    assert_eq!(err, ControlError::DuplicateId("bank:a".to_string()));
}

#[tokio::test]
async fn test_button_press_fires_trigger() {
    let mut f = fixture();
    f.controls
        .create_control("bank:a", ControlModel::Button(Default::default()), None)
        .unwrap();
    let trigger = TriggerModel {
        options: TriggerOptions {
            name: "on press".to_string(),
            enabled: true,
            sort_order: 0,
        },
        actions: vec![log("triggered")],
        events: vec![TriggerEventModel::new(EVENT_BUTTON_PRESS, EntityOptions::new())],
        ..Default::default()
    };
    f.controls
        .create_control("trigger:t", ControlModel::Trigger(trigger), None)
        .unwrap();

    f.controls.press_control("bank:a", true, None, false, None);
    f.controls.press_control("bank:a", false, None, false, None);
    settle().await;

    assert_eq!(messages(&f.console), vec!["triggered"]);
    let t = f.controls.get("trigger:t").and_then(|c| c.as_trigger()).unwrap();
    assert!(t.last_executed().is_some());
}

#[tokio::test]
async fn test_import_remaps_connections_and_upgrades() {
    let mut f = fixture();
    let mut math = EntityOptions::new();
    math.insert("variable".to_string(), json!("counter"));
    math.insert("operation".to_string(), json!("plus"));
    math.insert("value".to_string(), json!(2));
    let upgraded = ActionEntity::new(INTERNAL_CONNECTION, "custom_variable_math_operation", math);
    let upgraded_id = upgraded.id.clone();

    let mut foreign = log("remapped");
    foreign.connection_id = "old".to_string();

    let mut step = StepModel::empty(false);
    step.action_sets.insert(ActionSetId::Down, vec![foreign, upgraded]);
    let mut model = ButtonModel::default();
    model.steps.insert("0".to_string(), step);

    let remap = HashMap::from([("old".to_string(), "c1".to_string())]);
    f.controls
        .import_control("bank:i", ControlModel::Button(model), remap, &InternalController::new())
        .unwrap();

    let actions: Vec<ActionEntity> = f
        .controls
        .get("bank:i")
        .unwrap()
        .all_actions()
        .into_iter()
        .cloned()
        .collect();
    assert!(actions.iter().any(|a| a.connection_id == "c1" && a.definition_id == "log"));
    let replaced = actions.iter().find(|a| a.id == upgraded_id).unwrap();
    assert_eq!(replaced.definition_id, "custom_variable_set_expression");
}

#[tokio::test]
async fn test_preset_control_is_created_once() {
    let mut f = fixture();
    let id = f.controls.create_preset_control("c1", "toggle_flag").unwrap();
    assert_eq!(id, "preset:c1:toggle_flag");
    assert_eq!(f.controls.create_preset_control("c1", "toggle_flag").unwrap(), id);
    assert!(f.controls.get(&id).and_then(|c| c.as_button()).unwrap().is_preset());

    let err = f.controls.create_preset_control("c1", "missing").unwrap_err();
    assert!(matches!(err, ControlError::PresetNotFound { .. }));
}

#[tokio::test]
async fn test_forget_connection_reports_changed_controls() {
    let mut f = fixture();
    let model = button(vec![(ActionSetId::Down, "down")], vec![], false);
    f.controls.create_control("bank:a", model, None).unwrap();
    f.controls
        .create_control("bank:b", ControlModel::Button(Default::default()), None)
        .unwrap();

    assert_eq!(f.controls.forget_connection("c1"), vec!["bank:a".to_string()]);
    assert!(f.controls.forget_connection("c1").is_empty());
}

fn flag_feedback(flag: &str) -> FeedbackEntity {
    let mut options = EntityOptions::new();
    options.insert("flag".to_string(), json!(flag));
    FeedbackEntity::new("c1", "flag", options)
}

#[tokio::test]
async fn test_last_step_cannot_be_removed() {
    let mut f = fixture();
    f.controls
        .create_control("bank:a", button(vec![(ActionSetId::Down, "one")], vec![], true), None)
        .unwrap();
    let control = f.controls.get_mut("bank:a").unwrap().as_button_mut().unwrap();

    assert!(!control.step_remove("0"));
    assert_eq!(control.step_ids(), vec!["0".to_string()]);
    assert_eq!(control.current_step_id(), "0");

    let second = control.step_add().unwrap();
    assert!(control.step_select_current("0"));
    assert!(control.step_remove("0"));
    assert_eq!(control.step_ids(), vec![second.clone()]);
    assert_eq!(control.current_step_id(), second);
    assert!(!control.step_remove(&second));
}

#[tokio::test]
async fn test_button_model_survives_rebuild() {
    let f = fixture();

    let mut first = StepModel::empty(true);
    first.action_sets.get_mut(&ActionSetId::Down).unwrap().push(log("down"));
    first.action_sets.get_mut(&ActionSetId::RotateLeft).unwrap().push(log("left"));
    first.action_sets.insert(ActionSetId::Duration(500), vec![log("short hold")]);
    first.action_sets.insert(ActionSetId::Duration(2000), vec![log("long hold")]);
    first.options.run_while_held = vec![2000];
    let mut second = StepModel::empty(true);
    second.action_sets.get_mut(&ActionSetId::Up).unwrap().push(log("up"));
    second.options.name = Some("Second".to_string());

    let mut any = FeedbackEntity::new(INTERNAL_CONNECTION, "logic_or", EntityOptions::new());
    any.children = vec![flag_feedback("a"), flag_feedback("b")];
    let mut all = FeedbackEntity::new(INTERNAL_CONNECTION, "logic_and", EntityOptions::new());
    all.is_inverted = true;
    all.children = vec![any, flag_feedback("c")];

    let mut model = ButtonModel {
        options: ButtonOptions {
            rotary_actions: true,
            step_auto_progress: false,
        },
        feedbacks: vec![all, flag_feedback("d")],
        ..Default::default()
    };
    model.style.text = "Rebuilt".to_string();
    model.steps.clear();
    model.steps.insert("0".to_string(), first);
    model.steps.insert("1".to_string(), second);

    let built = Control::from_model("bank:a", ControlModel::Button(model), None, f.controls.deps()).unwrap();
    let saved = built.to_json();
    let rebuilt = Control::from_model("bank:a", saved.clone(), None, f.controls.deps()).unwrap();
    assert_eq!(rebuilt.to_json(), saved);

    let ControlModel::Button(saved_button) = &saved else {
        panic!("expected a button model");
    };
    assert_eq!(saved_button.steps.len(), 2);
    assert_eq!(saved_button.feedbacks[0].children[0].children.len(), 2);
    assert!(saved_button.options.rotary_actions);

    let json = serde_json::to_value(&saved).unwrap();
    assert!(!json.to_string().contains("currentStepId"));
    let runtime = rebuilt.to_runtime_json().unwrap();
    assert_eq!(runtime.current_step_id.as_deref(), Some("0"));
}
