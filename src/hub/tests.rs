use super::*;
use crate::config::GroupConfig;
use crate::connections::ConsoleConnection;
use crate::controls::model::{ActionEntity, ActionSetId, ButtonModel, FeedbackEntity, StepModel};
use crate::store::{ControlStore, PersistenceActor};
use crate::surface::{EmulatorPanel, SurfaceInputEvent};
use serde_json::json;
use tempfile::tempdir;

struct Fixture {
    hub: Hub,
    rx: mpsc::UnboundedReceiver<HubCommand>,
    emulator: Arc<EmulatorPanel>,
    console: Arc<ConsoleConnection>,
}

impl Fixture {
    fn new(groups: &[GroupConfig], store: Option<PersistenceActorHandle>) -> Self {
        let (handle, rx) = HubHandle::channel();
        let connections = Arc::new(ConnectionRegistry::new());
        let console = Arc::new(ConsoleConnection::new("c1", "console", handle.connection_callbacks()));
        connections.register(console.clone(), true);

        let mut hub = Hub::new(
            handle,
            connections,
            PageStore::new(3, 4, 8),
            SurfaceController::new(groups, 1),
            store,
        );
        let emulator = Arc::new(EmulatorPanel::new("emu", 8, 4));
        let config = groups.first().map(|g| SurfaceConfig {
            id: "emu".to_string(),
            name: None,
            group: Some(g.id.clone()),
            brightness: 100,
            columns: 8,
            rows: 4,
        });
        hub.add_surface(emulator.clone(), config.as_ref());
        Self {
            hub,
            rx,
            emulator,
            console,
        }
    }

    /// Let spawned work report back, then handle everything it sent
    async fn pump(&mut self) {
        for _ in 0..10 {
            tokio::task::yield_now().await;
            while let Ok(cmd) = self.rx.try_recv() {
                self.hub.handle_turn(cmd, &mut self.rx);
            }
        }
    }

    fn press(&mut self, x: i32, y: i32, pressed: bool) {
        self.hub.handle_command(HubCommand::SurfaceInput {
            surface_id: "emu".to_string(),
            event: SurfaceInputEvent::Press { x, y, pressed },
        });
    }

    fn text_at(&self, x: i32, y: i32) -> Option<String> {
        match self.emulator.key(x, y)?.style? {
            DrawStyle::Button(face) => Some(face.style.text),
            _ => None,
        }
    }
}

fn action(connection_id: &str, definition_id: &str, options: Value) -> ActionEntity {
    ActionEntity::new(connection_id, definition_id, options.as_object().cloned().unwrap_or_default())
}

fn button(text: &str, down: Vec<ActionEntity>) -> ControlModel {
    let mut model = ButtonModel::default();
    model.style.text = text.to_string();
    let mut step = StepModel::empty(false);
    step.action_sets.insert(ActionSetId::Down, down);
    model.steps.insert("0".to_string(), step);
    ControlModel::Button(model)
}

fn pin_group() -> GroupConfig {
    GroupConfig {
        id: "desk".to_string(),
        name: "Desk".to_string(),
        startup_page: 1,
        pin: Some("42".to_string()),
        pin_timeout_secs: Some(30),
    }
}

#[tokio::test]
async fn test_surface_press_runs_actions_and_draws() {
    let mut f = Fixture::new(&[], None);
    let model = button("Hi", vec![action("c1", "log", json!({ "message": "hello" }))]);
    f.hub.create_control_at(ControlLocation::new(1, 0, 0), model).unwrap();
    f.hub.settle();
    assert_eq!(f.text_at(0, 0).as_deref(), Some("Hi"));

    f.press(0, 0, true);
    f.press(0, 0, false);
    f.pump().await;

    let executed = f.console.executed_actions();
    assert_eq!(executed.len(), 1);
    assert_eq!(executed[0].options["message"], json!("hello"));
}

#[tokio::test]
async fn test_button_text_is_published_as_variable() {
    let mut f = Fixture::new(&[], None);
    f.hub
        .create_control_at(ControlLocation::new(1, 2, 3), button("Mixer", vec![]))
        .unwrap();
    f.hub.settle();
    assert_eq!(
        f.hub.variables().get_value("internal:b_text_1_2_3"),
        Some(&json!("Mixer"))
    );
}

#[tokio::test]
async fn test_internal_set_page_redraws_surface() {
    let mut f = Fixture::new(&[], None);
    let go = button("Go", vec![action(INTERNAL_CONNECTION, "set_page", json!({ "page": "2" }))]);
    f.hub.create_control_at(ControlLocation::new(1, 0, 0), go).unwrap();
    f.hub
        .create_control_at(ControlLocation::new(2, 0, 0), button("Two", vec![]))
        .unwrap();
    f.hub.settle();

    f.press(0, 0, true);
    f.pump().await;

    assert_eq!(f.hub.surfaces().page_of("emu"), Some(2));
    assert_eq!(f.text_at(0, 0).as_deref(), Some("Two"));
}

#[tokio::test]
async fn test_variable_change_redraws_dependent_text() {
    let mut f = Fixture::new(&[], None);
    f.hub
        .create_control_at(ControlLocation::new(1, 0, 1), button("$(console:level)", vec![]))
        .unwrap();
    f.hub.settle();

    f.hub.handle_command(HubCommand::SetVariableValues {
        connection_id: "c1".to_string(),
        values: vec![("level".to_string(), json!(7))],
    });
    f.hub.settle();

    assert_eq!(f.hub.variables().get_value("console:level"), Some(&json!(7)));
    assert_eq!(f.text_at(1, 0).as_deref(), Some("7"));
}

#[tokio::test]
async fn test_page_up_button_moves_surface() {
    let mut f = Fixture::new(&[], None);
    f.hub
        .create_control_at(ControlLocation::new(1, 0, 7), ControlModel::PageUp)
        .unwrap();
    f.hub.settle();

    f.press(7, 0, true);
    f.pump().await;
    assert_eq!(f.hub.surfaces().page_of("emu"), Some(2));
}

#[tokio::test]
async fn test_create_at_invalid_location_fails() {
    let mut f = Fixture::new(&[], None);
    let err = f
        .hub
        .create_control_at(ControlLocation::new(9, 0, 0), button("x", vec![]))
        .unwrap_err();
    assert_eq!(err, ControlError::InvalidLocation("9/0/0".to_string()));
}

#[tokio::test]
async fn test_delete_control_blanks_slot() {
    let mut f = Fixture::new(&[], None);
    let id = f
        .hub
        .create_control_at(ControlLocation::new(1, 1, 1), button("Bye", vec![]))
        .unwrap();
    f.hub.settle();
    assert!(f.text_at(1, 1).is_some());

    assert!(f.hub.delete_control(&id));
    assert!(f.hub.pages().get_control_id_at(&ControlLocation::new(1, 1, 1)).is_none());
    assert!(f.emulator.key(1, 1).map(|i| i.is_blank()).unwrap_or(false));
    assert!(!f.hub.delete_control(&id));
}

#[tokio::test]
async fn test_remove_connection_forgets_its_variables() {
    let mut f = Fixture::new(&[], None);
    f.hub.handle_command(HubCommand::SetVariableValues {
        connection_id: "c1".to_string(),
        values: vec![("level".to_string(), json!(3))],
    });
    assert!(f.hub.remove_connection("c1"));
    assert!(f.hub.variables().get_value("console:level").is_none());
    assert!(!f.hub.remove_connection("c1"));
}

#[tokio::test(start_paused = true)]
async fn test_tick_locks_idle_pin_group() {
    let mut f = Fixture::new(&[pin_group()], None);
    let model = button("Hi", vec![action("c1", "log", json!({ "message": "locked out" }))]);
    f.hub.create_control_at(ControlLocation::new(1, 0, 0), model).unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    f.hub.handle_command(HubCommand::Tick);
    f.hub.settle();
    assert!(f.hub.surfaces().is_locked("emu"));

    f.press(0, 0, true);
    f.pump().await;
    assert!(f.console.executed_actions().is_empty());

    assert!(!f.hub.unlock_surface("emu", Some("0")));
    assert!(f.hub.unlock_surface("emu", Some("42")));
    assert!(!f.hub.surfaces().is_locked("emu"));
}

#[tokio::test]
async fn test_changes_persist_and_reload() {
    let temp = tempdir().unwrap();
    let store = ControlStore::open(temp.path().join("db")).unwrap();
    let persistence = PersistenceActor::spawn(store.clone(), 0);

    let mut f = Fixture::new(&[], Some(persistence.clone()));
    let id = f
        .hub
        .create_control_at(ControlLocation::new(2, 1, 0), button("Kept", vec![]))
        .unwrap();
    assert!(f.hub.create_custom_variable("mode", json!("live")));
    f.hub.settle();
    persistence.flush().await.unwrap();

    let state = store.load().unwrap();
    assert!(state.controls.iter().any(|(cid, _, _)| *cid == id));
    assert_eq!(state.pages[&2].controls.values().next(), Some(&id));
    assert!(state.custom_variables.contains_key("mode"));

    let mut reloaded = Fixture::new(&[], None);
    reloaded.hub.load(state);
    let style = reloaded.hub.draw_style_at(ControlLocation::new(2, 1, 0));
    assert!(matches!(style, Some(DrawStyle::Button(face)) if face.style.text == "Kept"));
    assert_eq!(
        reloaded.hub.variables().get_value("custom:mode"),
        Some(&json!("live"))
    );
}

#[tokio::test]
async fn test_load_upgrades_deprecated_internal_actions() {
    let math = action(
        INTERNAL_CONNECTION,
        "custom_variable_math_operation",
        json!({ "variable": "count", "operation": "plus", "value": 2 }),
    );
    let math_id = math.id.clone();
    let state = StoredState {
        controls: vec![("bank:upgrade".to_string(), button("Count", vec![math]), None)],
        ..Default::default()
    };

    let mut f = Fixture::new(&[], None);
    f.hub.load(state);
    f.hub.start();

    let control = f.hub.controls().get("bank:upgrade").unwrap();
    let actions = control.all_actions();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].id, math_id);
    assert_eq!(actions[0].definition_id, "custom_variable_set_expression");
    assert_eq!(actions[0].options["expression"], json!("$(custom:count) + 2"));
}

#[tokio::test]
async fn test_label_rename_resubscribes_connection_feedbacks() {
    let mut f = Fixture::new(&[], None);
    let mut model = ButtonModel::default();
    let feedback = FeedbackEntity::new(
        "c1",
        "flag",
        json!({ "flag": "$(console:x)" }).as_object().cloned().unwrap(),
    );
    let feedback_id = feedback.id.clone();
    model.feedbacks.push(feedback);
    f.hub
        .create_control_at(ControlLocation::new(1, 0, 0), ControlModel::Button(model))
        .unwrap();
    f.pump().await;
    assert_eq!(
        f.console.subscribed_options(&feedback_id).unwrap()["flag"],
        json!("$(console:x)")
    );

    assert!(f.hub.rename_connection_label("c1", "desk"));
    f.pump().await;

    assert_eq!(
        f.console.subscribed_options(&feedback_id).unwrap()["flag"],
        json!("$(desk:x)")
    );
}
