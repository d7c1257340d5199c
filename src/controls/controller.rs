//! ControlsController - registry of live controls
//!
//! Owns every control by id. Input (press, rotate, hold timers) and state
//! reports (feedback values, variable changes) are routed from here; the
//! returned id lists tell the hub which faces to redraw.

use super::model::{ActionEntity, ActionSetId, ControlId, ControlModel, FeedbackEntity, RuntimeModel};
use super::preset::preset_to_model;
use super::{preset_control_id, Control, ControlDeps};
use crate::connections::FeedbackValueUpdate;
use crate::error::ControlError;
use crate::internal::InternalController;
use crate::page::ControlLocation;
use crate::references::{ReferencesCollector, ReferencesUpdater};
use chrono::{DateTime, Local, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::task::JoinSet;
use tracing::{debug, info, trace, warn};

pub struct ControlsController {
    controls: HashMap<ControlId, Control>,
    deps: ControlDeps,
}

impl ControlsController {
    pub fn new(deps: ControlDeps) -> Self {
        Self {
            controls: HashMap::new(),
            deps,
        }
    }

    pub fn deps(&self) -> &ControlDeps {
        &self.deps
    }

    pub fn get(&self, control_id: &str) -> Option<&Control> {
        self.controls.get(control_id)
    }

    pub fn get_mut(&mut self, control_id: &str) -> Option<&mut Control> {
        self.controls.get_mut(control_id)
    }

    pub fn contains(&self, control_id: &str) -> bool {
        self.controls.contains_key(control_id)
    }

    pub fn ids(&self) -> Vec<ControlId> {
        let mut ids: Vec<ControlId> = self.controls.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ControlId, &Control)> {
        self.controls.iter()
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build and register a control, subscribing its entities
    pub fn create_control(
        &mut self,
        control_id: &str,
        model: ControlModel,
        runtime: Option<RuntimeModel>,
    ) -> Result<(), ControlError> {
        if self.controls.contains_key(control_id) {
            return Err(ControlError::DuplicateId(control_id.to_string()));
        }
        let control = Control::from_model(control_id, model, runtime, &self.deps)?;
        control.subscribe_all();
        debug!("Created {} control {}", control.type_name(), control_id);
        self.controls.insert(control_id.to_string(), control);
        Ok(())
    }

    /// Register every stored control; failures are logged and skipped
    pub fn load(&mut self, stored: Vec<(ControlId, ControlModel, Option<RuntimeModel>)>) -> usize {
        let mut loaded = 0;
        for (control_id, model, runtime) in stored {
            match self.create_control(&control_id, model, runtime) {
                Ok(()) => loaded += 1,
                Err(e) => warn!("Skipping stored control {}: {}", control_id, e),
            }
        }
        info!("📦 Loaded {} control(s)", loaded);
        loaded
    }

    /// Destroy and drop a control; returns whether it existed
    pub fn delete_control(&mut self, control_id: &str) -> bool {
        let Some(mut control) = self.controls.remove(control_id) else {
            return false;
        };
        control.abort();
        control.destroy();
        debug!("Deleted control {}", control_id);
        true
    }

    /// Import a control model built elsewhere
    ///
    /// Connection ids are rewritten through `remap` before the control exists,
    /// deprecated internal entities are upgraded in place, then every action is
    /// announced to its connection.
    pub fn import_control(
        &mut self,
        control_id: &str,
        model: ControlModel,
        remap: HashMap<String, String>,
        internal: &InternalController,
    ) -> Result<(), ControlError> {
        if self.controls.contains_key(control_id) {
            return Err(ControlError::DuplicateId(control_id.to_string()));
        }
        let mut control = Control::from_model(control_id, model, None, &self.deps)?;

        if !remap.is_empty() {
            let mut updater = ReferencesUpdater::new(remap, HashMap::new());
            control.visit_references(&mut updater);
            trace!(control_id, changed = updater.changed(), "Import references rewritten");
        }

        upgrade_internal_entities(&mut control, internal);

        self.controls.insert(control_id.to_string(), control);
        self.post_process_import(control_id);
        Ok(())
    }

    /// Upgrade deprecated internal entities of every registered control
    ///
    /// Returns the controls that changed; their models need persisting.
    pub fn upgrade_internal_entities(&mut self, internal: &InternalController) -> Vec<ControlId> {
        self.controls
            .iter_mut()
            .filter_map(|(id, control)| upgrade_internal_entities(control, internal).then(|| id.clone()))
            .collect()
    }

    /// Announce every imported entity; failures are collected and logged
    fn post_process_import(&self, control_id: &str) {
        let Some(control) = self.controls.get(control_id) else {
            return;
        };
        let notifier = self.deps.notifier();
        for feedback in control.all_feedbacks() {
            notifier.feedback_update(feedback, control_id);
        }

        let calls: Vec<_> = control
            .all_actions()
            .into_iter()
            .filter(|a| !a.disabled && !a.is_internal())
            .filter_map(|a| {
                self.deps
                    .connections
                    .get_child(&a.connection_id)
                    .map(|instance| (instance, a.clone()))
            })
            .collect();
        if calls.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            trace!("No runtime, skipping import post-processing");
            return;
        };

        let control_id = control_id.to_string();
        runtime.spawn(async move {
            let mut tasks = JoinSet::new();
            for (instance, action) in calls {
                let control_id = control_id.clone();
                tasks.spawn(async move {
                    instance
                        .action_update(&action, &control_id)
                        .await
                        .map_err(|e| (action.id.clone(), e))
                });
            }
            let mut failures = Vec::new();
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err((action_id, e))) => failures.push(format!("{}: {}", action_id, e)),
                    Err(e) => failures.push(e.to_string()),
                }
            }
            if !failures.is_empty() {
                warn!(
                    "Import of {} left {} action(s) unsubscribed: {}",
                    control_id,
                    failures.len(),
                    failures.join(", ")
                );
            }
        });
    }

    /// Materialise (or reuse) the preset button for a connection preset
    pub fn create_preset_control(&mut self, connection_id: &str, preset_id: &str) -> Result<ControlId, ControlError> {
        let control_id = preset_control_id(connection_id, preset_id);
        if self.controls.contains_key(&control_id) {
            return Ok(control_id);
        }
        let preset = self
            .deps
            .connections
            .presets(connection_id)
            .into_iter()
            .find(|p| p.id == preset_id)
            .ok_or_else(|| ControlError::PresetNotFound {
                connection_id: connection_id.to_string(),
                preset_id: preset_id.to_string(),
            })?;
        self.create_control(&control_id, preset_to_model(&preset), None)?;
        Ok(control_id)
    }

    // =========================================================================
    // Input
    // =========================================================================

    fn triggers_in_order(&self) -> Vec<ControlId> {
        let mut triggers: Vec<(i64, &ControlId)> = self
            .controls
            .iter()
            .filter_map(|(id, c)| c.as_trigger().map(|t| (t.options().sort_order, id)))
            .collect();
        triggers.sort();
        triggers.into_iter().map(|(_, id)| id.clone()).collect()
    }

    fn run_trigger_source(&mut self, control_id: &str, source: &'static str) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        self.controls
            .get_mut(control_id)
            .and_then(|c| c.as_trigger_mut())
            .map(|t| t.execute(source, now_ms))
            .unwrap_or(false)
    }

    /// Press or release a control; triggers with button events follow
    pub fn press_control(
        &mut self,
        control_id: &str,
        pressed: bool,
        surface_id: Option<&str>,
        force: bool,
        location: Option<ControlLocation>,
    ) -> bool {
        let Some(control) = self.controls.get_mut(control_id) else {
            trace!("Press for unknown control {}", control_id);
            return false;
        };
        control.press_control(pressed, surface_id, force, location);

        for trigger_id in self.triggers_in_order() {
            let source = self
                .controls
                .get(&trigger_id)
                .and_then(|c| c.as_trigger())
                .and_then(|t| t.on_button_press(pressed));
            if let Some(source) = source {
                self.run_trigger_source(&trigger_id, source);
            }
        }
        true
    }

    pub fn rotate_control(
        &mut self,
        control_id: &str,
        right: bool,
        surface_id: Option<&str>,
        location: Option<ControlLocation>,
    ) -> bool {
        match self.controls.get_mut(control_id) {
            Some(control) => {
                control.rotate_control(right, surface_id, location);
                true
            }
            None => false,
        }
    }

    pub fn on_hold_timer(
        &mut self,
        control_id: &str,
        surface_id: &str,
        token: u64,
        set_id: &ActionSetId,
        location: Option<ControlLocation>,
    ) {
        if let Some(button) = self.controls.get_mut(control_id).and_then(|c| c.as_button_mut()) {
            button.on_hold_timer(surface_id, token, set_id, location);
        }
    }

    pub fn abort_control(&mut self, control_id: &str) -> bool {
        match self.controls.get_mut(control_id) {
            Some(control) => {
                control.abort();
                true
            }
            None => false,
        }
    }

    /// Stop hold timers and delayed actions of every control
    pub fn abort_all(&mut self) {
        for control in self.controls.values_mut() {
            control.abort();
        }
        self.deps.runner.abort_all();
    }

    // =========================================================================
    // State fan-out
    // =========================================================================

    /// Route feedback values to their controls; returns the faces that changed
    ///
    /// Triggers whose condition changed may fire their edge events.
    pub fn update_feedback_values(&mut self, connection_id: &str, updates: &[FeedbackValueUpdate]) -> Vec<ControlId> {
        let mut by_control: HashMap<&str, Vec<(String, Value)>> = HashMap::new();
        for update in updates {
            by_control
                .entry(update.control_id.as_str())
                .or_default()
                .push((update.id.clone(), update.value.clone()));
        }

        let mut redraw = Vec::new();
        let mut edges = Vec::new();
        for (control_id, values) in by_control {
            let Some(control) = self.controls.get_mut(control_id) else {
                continue;
            };
            if !control.update_feedback_values(connection_id, &values) {
                continue;
            }
            match control.as_trigger_mut() {
                Some(trigger) => {
                    if let Some(source) = trigger.on_condition_changed() {
                        edges.push((control_id.to_string(), source));
                    }
                }
                None => redraw.push(control_id.to_string()),
            }
        }
        for (trigger_id, source) in edges {
            self.run_trigger_source(&trigger_id, source);
        }
        redraw
    }

    /// Controls whose face used a changed variable; fires `variable_changed` triggers
    pub fn on_variables_changed(&mut self, changed: &HashSet<String>) -> Vec<ControlId> {
        if changed.is_empty() {
            return Vec::new();
        }
        let mut redraw: Vec<ControlId> = self
            .controls
            .iter()
            .filter(|(_, c)| c.on_variables_changed(changed))
            .map(|(id, _)| id.clone())
            .collect();
        redraw.sort();

        for trigger_id in self.triggers_in_order() {
            let source = self
                .controls
                .get(&trigger_id)
                .and_then(|c| c.as_trigger())
                .and_then(|t| t.on_variables_changed(changed));
            if let Some(source) = source {
                self.run_trigger_source(&trigger_id, source);
            }
        }
        redraw
    }

    // =========================================================================
    // Triggers
    // =========================================================================

    /// Once per second: interval and time-of-day events
    pub fn on_tick(&mut self, now: DateTime<Local>) {
        for trigger_id in self.triggers_in_order() {
            let Some(trigger) = self.controls.get_mut(&trigger_id).and_then(|c| c.as_trigger_mut()) else {
                continue;
            };
            if let Some(source) = trigger.on_tick(now) {
                trigger.execute(source, now.timestamp_millis());
            }
        }
    }

    pub fn on_startup(&self) {
        for trigger_id in self.triggers_in_order() {
            if let Some(trigger) = self.controls.get(&trigger_id).and_then(|c| c.as_trigger()) {
                trigger.on_startup();
            }
        }
    }

    pub fn execute_trigger(&mut self, control_id: &str, source: &'static str) -> bool {
        self.run_trigger_source(control_id, source)
    }

    // =========================================================================
    // Connections and references
    // =========================================================================

    /// Drop every entity of a connection that is going away
    pub fn forget_connection(&mut self, connection_id: &str) -> Vec<ControlId> {
        self.controls
            .iter_mut()
            .filter_map(|(id, c)| c.forget_connection(connection_id).then(|| id.clone()))
            .collect()
    }

    /// Drop entities of connections that do not exist
    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> Vec<ControlId> {
        self.controls
            .iter_mut()
            .filter_map(|(id, c)| c.verify_connection_ids(known).then(|| id.clone()))
            .collect()
    }

    /// Rewrite `$(old:...)` references to `$(new:...)`
    ///
    /// Connection feedbacks whose options changed are sent to their connection
    /// again. Controls with a changed internal feedback are listed separately
    /// so the hub only resyncs those.
    pub fn rename_connection_label(&mut self, old: &str, new: &str) -> RenamedReferences {
        let labels = HashMap::from([(old.to_string(), new.to_string())]);
        let notifier = self.deps.notifier();
        let mut renamed = RenamedReferences::default();
        for (id, control) in self.controls.iter_mut() {
            let mut updater = ReferencesUpdater::new(HashMap::new(), labels.clone());
            control.visit_references(&mut updater);
            if !updater.changed() {
                continue;
            }
            let changed_feedbacks = updater.changed_feedback_ids();
            let mut internal_changed = false;
            for feedback in control.all_feedbacks() {
                if !changed_feedbacks.contains(&feedback.id) {
                    continue;
                }
                if feedback.is_internal() {
                    internal_changed = true;
                } else {
                    notifier.feedback_update(feedback, id);
                }
            }
            if internal_changed {
                renamed.internal.push(id.clone());
            }
            renamed.controls.push(id.clone());
        }
        if !renamed.controls.is_empty() {
            info!("🔗 Label '{}' -> '{}' rewritten in {} control(s)", old, new, renamed.controls.len());
        }
        renamed
    }

    /// Everything a control refers to
    pub fn collect_references(&mut self, control_id: &str) -> Option<ReferencesCollector> {
        let control = self.controls.get_mut(control_id)?;
        let mut collector = ReferencesCollector::default();
        control.visit_references(&mut collector);
        Some(collector)
    }

    /// Enabled internal feedbacks per control
    pub fn all_internal_feedbacks(&self) -> Vec<(ControlId, Vec<FeedbackEntity>)> {
        self.controls
            .iter()
            .map(|(id, c)| (id.clone(), c.internal_feedbacks()))
            .filter(|(_, feedbacks)| !feedbacks.is_empty())
            .collect()
    }

    pub fn apply_learned_options(&mut self, control_id: &str, action_id: &str, options: super::model::EntityOptions) -> bool {
        self.controls
            .get_mut(control_id)
            .map(|c| c.apply_learned_options(action_id, options))
            .unwrap_or(false)
    }
}

/// Controls touched by a label rename
#[derive(Debug, Default)]
pub struct RenamedReferences {
    /// Every control with a rewritten reference
    pub controls: Vec<ControlId>,
    /// Controls whose internal feedbacks changed options
    pub internal: Vec<ControlId>,
}

/// Replace deprecated internal actions and feedbacks in place
fn upgrade_internal_entities(control: &mut Control, internal: &InternalController) -> bool {
    let action_upgrades: Vec<ActionEntity> = control
        .all_actions()
        .into_iter()
        .filter_map(|a| internal.upgrade_action(a))
        .collect();
    for action in &action_upgrades {
        control.action_replace(action);
    }
    let feedback_upgrades: Vec<FeedbackEntity> = control
        .all_feedbacks()
        .into_iter()
        .filter_map(|f| internal.upgrade_feedback(f))
        .collect();
    for feedback in &feedback_upgrades {
        control.feedback_replace(feedback);
    }
    if action_upgrades.is_empty() && feedback_upgrades.is_empty() {
        return false;
    }
    debug!(
        control_id = control.control_id(),
        actions = action_upgrades.len(),
        feedbacks = feedback_upgrades.len(),
        "Upgraded internal entities"
    );
    true
}
