//! ActionRunner - executes resolved action sets
//!
//! Actions run in one detached task per invocation, ordered by their delay.
//! Delays are absolute offsets from the start of the run; an internal `wait`
//! action shifts every later action by its duration. Connection actions are
//! awaited in order; internal actions are handed back to the hub.

use super::model::{ActionEntity, ControlId, SurfaceId};
use crate::connections::ConnectionRegistry;
use crate::hub::HubHandle;
use crate::page::ControlLocation;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Context an action runs with
#[derive(Debug, Clone, PartialEq)]
pub struct RunActionExtras {
    pub control_id: ControlId,
    pub surface_id: Option<SurfaceId>,
    pub location: Option<ControlLocation>,
}

impl RunActionExtras {
    pub fn new(control_id: impl Into<ControlId>) -> Self {
        Self {
            control_id: control_id.into(),
            surface_id: None,
            location: None,
        }
    }
}

/// Milliseconds a `wait` action pauses for
pub fn wait_duration_ms(action: &ActionEntity) -> u64 {
    match action.options.get("time") {
        Some(Value::Number(n)) => n.as_f64().map(|f| f.max(0.0) as u64).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<f64>().map(|f| f.max(0.0) as u64).unwrap_or(0),
        _ => 0,
    }
}

/// Runs action lists and tracks the tasks per control for `panic`
#[derive(Clone)]
pub struct ActionRunner {
    connections: Arc<ConnectionRegistry>,
    hub: HubHandle,
    running: Arc<DashMap<ControlId, Vec<AbortHandle>>>,
}

impl ActionRunner {
    pub fn new(connections: Arc<ConnectionRegistry>, hub: HubHandle) -> Self {
        Self {
            connections,
            hub,
            running: Arc::new(DashMap::new()),
        }
    }

    /// Run the enabled actions of a set
    pub fn run_multiple(&self, actions: &[ActionEntity], extras: RunActionExtras) {
        let mut actions: Vec<ActionEntity> = actions.iter().filter(|a| !a.disabled).cloned().collect();
        if actions.is_empty() {
            return;
        }
        actions.sort_by_key(|a| a.delay);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, skipping {} action(s)", actions.len());
            return;
        };

        trace!(control_id = %extras.control_id, count = actions.len(), "Running actions");

        let connections = self.connections.clone();
        let hub = self.hub.clone();
        let control_id = extras.control_id.clone();
        let task = runtime.spawn(async move {
            let start = Instant::now();
            let mut offset = 0u64;
            for action in actions {
                let due = start + Duration::from_millis(action.delay + offset);
                tokio::time::sleep_until(due).await;

                if action.is_internal() {
                    if action.definition_id == "wait" {
                        offset += wait_duration_ms(&action);
                        continue;
                    }
                    hub.execute_internal_action(action, extras.clone());
                    continue;
                }

                match connections.get_child(&action.connection_id) {
                    Some(instance) => {
                        if let Err(e) = instance.execute_action(&action, &extras).await {
                            warn!(
                                "Action '{}' on connection '{}' failed: {}",
                                action.definition_id, action.connection_id, e
                            );
                        }
                    }
                    None => debug!(
                        "Connection '{}' not available, skipping action '{}'",
                        action.connection_id, action.definition_id
                    ),
                }
            }
        });

        self.running.retain(|_, handles| {
            handles.retain(|h| !h.is_finished());
            !handles.is_empty()
        });
        self.running.entry(control_id).or_default().push(task.abort_handle());
    }

    /// Abort every in-flight run of a control; returns how many were stopped
    pub fn abort_control(&self, control_id: &str) -> usize {
        let Some((_, handles)) = self.running.remove(control_id) else {
            return 0;
        };
        let mut stopped = 0;
        for handle in handles {
            if !handle.is_finished() {
                handle.abort();
                stopped += 1;
            }
        }
        if stopped > 0 {
            debug!("Aborted {} running action task(s) for {}", stopped, control_id);
        }
        stopped
    }

    /// Abort every in-flight run of every control
    pub fn abort_all(&self) -> usize {
        let ids: Vec<ControlId> = self.running.iter().map(|e| e.key().clone()).collect();
        ids.iter().map(|id| self.abort_control(id)).sum()
    }

    /// Whether a control still has actions pending
    pub fn is_running(&self, control_id: &str) -> bool {
        self.running
            .get(control_id)
            .map(|handles| handles.iter().any(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::{ConnectionCallbacks, ConsoleConnection};
    use crate::controls::model::{EntityOptions, INTERNAL_CONNECTION};
    use crate::hub::HubCommand;
    use serde_json::json;

    fn log_action(message: &str, delay: u64) -> ActionEntity {
        let mut options = EntityOptions::new();
        options.insert("message".to_string(), json!(message));
        let mut action = ActionEntity::new("c1", "log", options);
        action.delay = delay;
        action
    }

    fn setup() -> (ActionRunner, Arc<ConsoleConnection>, tokio::sync::mpsc::UnboundedReceiver<HubCommand>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let console = Arc::new(ConsoleConnection::new("c1", "console", ConnectionCallbacks::noop()));
        registry.register(console.clone(), true);
        let (hub, rx) = HubHandle::channel();
        (ActionRunner::new(registry, hub), console, rx)
    }

    fn messages(console: &ConsoleConnection) -> Vec<String> {
        console
            .executed_actions()
            .iter()
            .map(|a| a.options["message"].as_str().unwrap_or("").to_string())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_actions_run_in_delay_order() {
        let (runner, console, _rx) = setup();
        let actions = vec![log_action("late", 200), log_action("early", 0), log_action("mid", 100)];
        runner.run_multiple(&actions, RunActionExtras::new("bank:a"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(messages(&console), vec!["early"]);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(messages(&console), vec!["early", "mid", "late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_runs_are_forgotten() {
        let (runner, console, _rx) = setup();
        runner.run_multiple(&[log_action("a", 0)], RunActionExtras::new("bank:a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(messages(&console), vec!["a"]);

        runner.run_multiple(&[log_action("b", 1000)], RunActionExtras::new("bank:b"));
        assert!(!runner.running.contains_key("bank:a"));
        assert!(runner.running.contains_key("bank:b"));
        assert_eq!(runner.abort_control("bank:b"), 1);
        assert!(runner.running.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_shifts_later_actions() {
        let (runner, console, _rx) = setup();
        let mut wait_options = EntityOptions::new();
        wait_options.insert("time".to_string(), json!(500));
        let mut wait = ActionEntity::new(INTERNAL_CONNECTION, "wait", wait_options);
        wait.delay = 10;

        let actions = vec![log_action("first", 0), wait, log_action("second", 20)];
        runner.run_multiple(&actions, RunActionExtras::new("bank:a"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(messages(&console), vec!["first"]);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(messages(&console), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_control_stops_pending_actions() {
        let (runner, console, _rx) = setup();
        runner.run_multiple(&[log_action("never", 1000)], RunActionExtras::new("bank:a"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(runner.is_running("bank:a"));

        assert_eq!(runner.abort_control("bank:a"), 1);
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(console.executed_actions().is_empty());
    }

    #[tokio::test]
    async fn test_internal_actions_go_to_hub() {
        let (runner, _console, mut rx) = setup();
        let action = ActionEntity::new(INTERNAL_CONNECTION, "set_page", EntityOptions::new());
        runner.run_multiple(&[action], RunActionExtras::new("bank:a"));

        match rx.recv().await {
            Some(HubCommand::ExecuteInternalAction { action, extras }) => {
                assert_eq!(action.definition_id, "set_page");
                assert_eq!(extras.control_id, "bank:a");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disabled_actions_are_skipped() {
        let (runner, console, _rx) = setup();
        let mut action = log_action("off", 0);
        action.disabled = true;
        runner.run_multiple(&[action], RunActionExtras::new("bank:a"));
        tokio::task::yield_now().await;
        assert!(console.executed_actions().is_empty());
        assert!(!runner.is_running("bank:a"));
    }
}
