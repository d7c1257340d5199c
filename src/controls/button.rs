//! ButtonControl - stepped button with feedbacks
//!
//! # Press state machine
//!
//! `pushed` toggles between idle and pressed; `current_step_id` advances
//! independently on release when `stepAutoProgress` is set. A press with a
//! surface id snapshots a `SurfaceHoldState`; the matching release recovers
//! how long the button was held and which step was active when it went down.
//!
//! - press: run `down`, then arm one timer per `runWhileHeld` duration
//! - release: run the greatest duration set strictly below the hold time,
//!   else `up`; a set that already fired while held is skipped
//!
//! Preset buttons share this type but refuse every edit.

use super::action_sets::{ActionSetCollection, CommitChange};
use super::feedbacks::{FeedbackTree, TextContext};
use super::hold::HoldTracker;
use super::model::{
    ActionEntity, ActionSetId, ButtonModel, ButtonOptions, ControlId, ControlModel, EntityOptions,
    LocalVariableModel, RuntimeModel, StepModel, TYPE_BUTTON, TYPE_PRESET_BUTTON,
};
use super::runner::RunActionExtras;
use super::style::{ButtonDrawStyle, DrawStyle};
use super::{ControlDeps, PRESET_PREFIX};
use crate::error::ControlError;
use crate::page::ControlLocation;
use crate::references::{visit_control_parts, ControlParts, ReferenceVisitor};
use crate::variables::{VariableOverrides, VariablesController, INTERNAL_LABEL, RECURSION_GUARD_VALUE};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, trace};

/// Whether a button is user-configured or materialised from a preset
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonKind {
    Normal,
    Preset {
        connection_id: String,
        preset_id: String,
    },
}

pub struct ButtonControl {
    control_id: ControlId,
    kind: ButtonKind,
    options: ButtonOptions,
    steps: BTreeMap<String, ActionSetCollection>,
    current_step_id: String,
    pushed: bool,
    holds: HoldTracker,
    feedbacks: FeedbackTree,
    local_variables: Vec<LocalVariableModel>,
    /// Variables read while evaluating local variables on the last draw
    local_referenced: HashSet<String>,
    deps: ControlDeps,
    commit: CommitChange,
}

fn step_sort_key(id: &str) -> (u64, String) {
    (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string())
}

fn preset_kind_from_id(control_id: &str) -> ButtonKind {
    let rest = control_id.strip_prefix(PRESET_PREFIX).unwrap_or(control_id);
    let (connection_id, preset_id) = rest.split_once(':').unwrap_or((rest, ""));
    ButtonKind::Preset {
        connection_id: connection_id.to_string(),
        preset_id: preset_id.to_string(),
    }
}

impl ButtonControl {
    /// Build from a persisted model; the model must be a button or preset button
    pub fn from_model(
        control_id: &str,
        model: ControlModel,
        runtime: Option<RuntimeModel>,
        deps: &ControlDeps,
    ) -> Result<Self, ControlError> {
        let (kind, model) = match model {
            ControlModel::Button(m) => (ButtonKind::Normal, m),
            ControlModel::PresetButton(m) => (preset_kind_from_id(control_id), m),
            other => {
                return Err(ControlError::TypeMismatch {
                    control_id: control_id.to_string(),
                    expected: TYPE_BUTTON,
                    actual: other.type_name().to_string(),
                })
            }
        };
        Self::new(control_id, kind, model, runtime, deps)
    }

    pub fn new(
        control_id: &str,
        kind: ButtonKind,
        model: ButtonModel,
        runtime: Option<RuntimeModel>,
        deps: &ControlDeps,
    ) -> Result<Self, ControlError> {
        if model.steps.is_empty() {
            return Err(ControlError::NoSteps(control_id.to_string()));
        }
        let commit = deps.commit_for(control_id);
        let notifier = deps.notifier();

        let mut steps = BTreeMap::new();
        for (step_id, step) in model.steps {
            let mut collection = ActionSetCollection::new(control_id, step, notifier.clone(), commit.clone());
            collection.set_rotary(model.options.rotary_actions);
            steps.insert(step_id, collection);
        }

        let feedbacks = FeedbackTree::new(control_id, model.feedbacks, model.style, notifier, commit.clone());

        let mut button = Self {
            control_id: control_id.to_string(),
            kind,
            options: model.options,
            steps,
            current_step_id: String::new(),
            pushed: false,
            holds: HoldTracker::new(),
            feedbacks,
            local_variables: model.local_variables,
            local_referenced: HashSet::new(),
            deps: deps.clone(),
            commit,
        };

        let ids = button.step_ids();
        button.current_step_id = runtime
            .and_then(|r| r.current_step_id)
            .filter(|id| ids.contains(id))
            .or_else(|| ids.first().cloned())
            .unwrap_or_default();
        Ok(button)
    }

    pub fn control_id(&self) -> &str {
        &self.control_id
    }

    pub fn kind(&self) -> &ButtonKind {
        &self.kind
    }

    pub fn is_preset(&self) -> bool {
        matches!(self.kind, ButtonKind::Preset { .. })
    }

    pub fn type_name(&self) -> &'static str {
        if self.is_preset() {
            TYPE_PRESET_BUTTON
        } else {
            TYPE_BUTTON
        }
    }

    pub fn options(&self) -> &ButtonOptions {
        &self.options
    }

    pub fn pushed(&self) -> bool {
        self.pushed
    }

    pub fn current_step_id(&self) -> &str {
        &self.current_step_id
    }

    pub fn holds(&self) -> &HoldTracker {
        &self.holds
    }

    /// Step ids in press order ("0", "1", ..., "10")
    pub fn step_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.steps.keys().cloned().collect();
        ids.sort_by_key(|id| step_sort_key(id));
        ids
    }

    pub fn step(&self, step_id: &str) -> Option<&ActionSetCollection> {
        self.steps.get(step_id)
    }

    /// Step for editing; presets are read-only
    pub fn editable_step(&mut self, step_id: &str) -> Option<&mut ActionSetCollection> {
        if self.is_preset() {
            return None;
        }
        self.steps.get_mut(step_id)
    }

    pub fn feedbacks(&self) -> &FeedbackTree {
        &self.feedbacks
    }

    /// Feedback tree for value updates; edits go through `editable_feedbacks`
    pub fn feedbacks_mut(&mut self) -> &mut FeedbackTree {
        &mut self.feedbacks
    }

    pub fn editable_feedbacks(&mut self) -> Option<&mut FeedbackTree> {
        if self.is_preset() {
            return None;
        }
        Some(&mut self.feedbacks)
    }

    pub fn all_actions(&self) -> Vec<&ActionEntity> {
        self.steps.values().flat_map(|s| s.all_actions()).collect()
    }

    pub fn to_json(&self) -> ControlModel {
        let model = ButtonModel {
            style: self.feedbacks.base_style().clone(),
            options: self.options.clone(),
            feedbacks: self.feedbacks.to_model(),
            steps: self
                .steps
                .iter()
                .map(|(id, step)| (id.clone(), step.to_model()))
                .collect(),
            local_variables: self.local_variables.clone(),
        };
        if self.is_preset() {
            ControlModel::PresetButton(model)
        } else {
            ControlModel::Button(model)
        }
    }

    pub fn to_runtime_json(&self) -> RuntimeModel {
        RuntimeModel {
            current_step_id: Some(self.current_step_id.clone()),
            last_executed: None,
        }
    }

    pub fn subscribe_all(&self) {
        for step in self.steps.values() {
            step.subscribe_all();
        }
        self.feedbacks.subscribe_all();
    }

    pub fn destroy(&mut self) {
        self.abort_running();
        for step in self.steps.values() {
            step.destroy();
        }
        self.feedbacks.destroy();
    }

    // =========================================================================
    // Press / rotate
    // =========================================================================

    fn set_pushed(&mut self, pushed: bool) -> bool {
        if self.pushed == pushed {
            return false;
        }
        self.pushed = pushed;
        self.deps.hub.trigger_redraw(&self.control_id);
        true
    }

    fn set_current_step(&mut self, step_id: String) {
        if self.current_step_id == step_id {
            return;
        }
        self.current_step_id = step_id;
        self.deps.hub.runtime_props_changed(&self.control_id);
        self.deps.hub.trigger_redraw(&self.control_id);
    }

    /// Current step, falling back to the first one, and the step after it
    fn current_and_next_step(&mut self) -> (String, String) {
        let ids = self.step_ids();
        let index = ids
            .iter()
            .position(|id| *id == self.current_step_id)
            .unwrap_or(0);
        let current = ids.get(index).cloned().unwrap_or_default();
        let next = ids.get((index + 1) % ids.len().max(1)).cloned().unwrap_or_default();
        if current != self.current_step_id {
            debug!(control_id = %self.control_id, "Current step '{}' is gone, using '{}'", self.current_step_id, current);
            self.current_step_id = current.clone();
        }
        (current, next)
    }

    fn extras(&self, surface_id: Option<&str>, location: Option<ControlLocation>) -> RunActionExtras {
        RunActionExtras {
            control_id: self.control_id.clone(),
            surface_id: surface_id.map(str::to_string),
            location,
        }
    }

    pub fn press_control(
        &mut self,
        pressed: bool,
        surface_id: Option<&str>,
        force: bool,
        location: Option<ControlLocation>,
    ) {
        let (current, next) = self.current_and_next_step();

        let mut pressed_duration = 0;
        let mut pressed_step = None;
        if let Some(surface) = surface_id {
            if pressed {
                self.holds.begin(surface, &current);
            } else if let Some(state) = self.holds.take(surface) {
                pressed_duration = state.held_ms();
                pressed_step = Some(state.step_id.clone());
            }
        }

        if !self.set_pushed(pressed) && !force {
            return;
        }

        let action_step = pressed_step.clone().unwrap_or_else(|| current.clone());

        if !pressed
            && self.options.step_auto_progress
            && pressed_step.as_deref().map_or(true, |s| s == current)
        {
            self.set_current_step(next);
        }

        let extras = self.extras(surface_id, location);
        let Some(step) = self.steps.get(&action_step) else {
            trace!(control_id = %self.control_id, "Step '{}' no longer exists", action_step);
            return;
        };

        if pressed {
            if let Some(actions) = step.get_action_set(&ActionSetId::Down) {
                self.deps.runner.run_multiple(actions, extras);
            }
            if let Some(surface) = surface_id {
                let durations = step.run_while_held();
                self.holds
                    .schedule_timers(surface, &durations, &self.control_id, &self.deps.hub);
            }
            return;
        }

        let set_id = step.select_release_set(pressed_duration);
        if let Some(ms) = set_id.duration() {
            if step.run_while_held().contains(&ms) {
                trace!(control_id = %self.control_id, "Set {} already ran while held", ms);
                return;
            }
        }
        trace!(control_id = %self.control_id, held_ms = pressed_duration, "Release runs '{}'", set_id);
        if let Some(actions) = step.get_action_set(&set_id) {
            self.deps.runner.run_multiple(actions, extras);
        }
    }

    /// A run-while-held timer fired; ignored when the hold it belongs to is over
    pub fn on_hold_timer(
        &mut self,
        surface_id: &str,
        token: u64,
        set_id: &ActionSetId,
        location: Option<ControlLocation>,
    ) {
        let Some(state) = self.holds.current(surface_id, token) else {
            trace!(control_id = %self.control_id, surface_id, "Stale hold timer ignored");
            return;
        };
        let Some(step) = self.steps.get(&state.step_id) else {
            return;
        };
        if let Some(actions) = step.get_action_set(set_id) {
            self.deps
                .runner
                .run_multiple(actions, self.extras(Some(surface_id), location));
        }
    }

    pub fn rotate_control(&mut self, right: bool, surface_id: Option<&str>, location: Option<ControlLocation>) {
        let (current, _) = self.current_and_next_step();
        let set_id = if right {
            ActionSetId::RotateRight
        } else {
            ActionSetId::RotateLeft
        };
        if let Some(actions) = self.steps.get(&current).and_then(|s| s.get_action_set(&set_id)) {
            self.deps.runner.run_multiple(actions, self.extras(surface_id, location));
        }
    }

    /// Cancel hold timers for one surface or all of them
    pub fn abort_running_hold_timers(&mut self, surface_id: Option<&str>) {
        self.holds.abort(surface_id);
    }

    /// Cancel hold timers and pending delayed actions
    pub fn abort_running(&mut self) {
        self.holds.abort(None);
        self.deps.runner.abort_control(&self.control_id);
    }

    // =========================================================================
    // Drawing
    // =========================================================================

    fn draw_overrides(&mut self, variables: &VariablesController, location: Option<&ControlLocation>) -> VariableOverrides {
        let ids = self.step_ids();
        let step_index = ids.iter().position(|id| *id == self.current_step_id).unwrap_or(0) + 1;

        let mut overrides = VariableOverrides::new();
        overrides.insert("this:step".to_string(), Value::from(step_index));
        overrides.insert("this:step_count".to_string(), Value::from(ids.len()));
        overrides.insert("this:pushed".to_string(), Value::from(self.pushed));
        if let Some(loc) = location {
            overrides.insert("this:page".to_string(), Value::from(loc.page_number));
            overrides.insert("this:row".to_string(), Value::from(loc.row));
            overrides.insert("this:column".to_string(), Value::from(loc.column));
            overrides.insert(
                format!(
                    "{}:b_text_{}_{}_{}",
                    INTERNAL_LABEL, loc.page_number, loc.row, loc.column
                ),
                Value::from(RECURSION_GUARD_VALUE),
            );
        }

        self.local_referenced.clear();
        for local in &self.local_variables {
            let value = match variables.execute_expression(&local.expression, &overrides) {
                Ok(result) => {
                    self.local_referenced.extend(result.variable_ids);
                    result.value
                }
                Err(e) => {
                    debug!(control_id = %self.control_id, "Local variable '{}' failed: {}", local.name, e);
                    Value::Null
                }
            };
            overrides.insert(format!("local:{}", local.name), value);
        }
        overrides
    }

    pub fn get_draw_style(&mut self, variables: &VariablesController, location: Option<&ControlLocation>) -> DrawStyle {
        let overrides = self.draw_overrides(variables, location);
        let ids = self.step_ids();
        let step_current = ids.iter().position(|id| *id == self.current_step_id).unwrap_or(0) + 1;
        let ctx = TextContext { variables, overrides };
        let style = self.feedbacks.get_draw_style(&ctx);
        DrawStyle::Button(ButtonDrawStyle {
            style,
            pushed: self.pushed,
            step_current,
            step_count: ids.len(),
        })
    }

    pub fn on_variables_changed(&self, changed: &HashSet<String>) -> bool {
        self.feedbacks.on_variables_changed(changed) || !self.local_referenced.is_disjoint(changed)
    }

    // =========================================================================
    // Steps
    // =========================================================================

    fn new_collection(&self, model: StepModel) -> ActionSetCollection {
        ActionSetCollection::new(
            self.control_id.clone(),
            model,
            self.deps.notifier(),
            self.commit.clone(),
        )
    }

    /// Append an empty step; returns its id
    pub fn step_add(&mut self) -> Option<String> {
        if self.is_preset() {
            return None;
        }
        let next = self
            .steps
            .keys()
            .filter_map(|id| id.parse::<u64>().ok())
            .max()
            .map(|max| max + 1)
            .unwrap_or(0)
            .to_string();
        let collection = self.new_collection(StepModel::empty(self.options.rotary_actions));
        self.steps.insert(next.clone(), collection);
        (self.commit)(true);
        Some(next)
    }

    /// Copy a step right after the original; later steps shift up by one
    pub fn step_duplicate(&mut self, step_id: &str) -> bool {
        if self.is_preset() {
            return false;
        }
        let Some(source) = self.steps.get(step_id) else {
            return false;
        };
        let copy = self.new_collection(source.duplicate_model());
        copy.subscribe_all();

        let ids = self.step_ids();
        let mut ordered: Vec<(String, ActionSetCollection)> = Vec::with_capacity(ids.len() + 1);
        let mut copy = Some(copy);
        for id in ids {
            let Some(collection) = self.steps.remove(&id) else {
                continue;
            };
            let is_source = id == step_id;
            ordered.push((id, collection));
            if is_source {
                if let Some(c) = copy.take() {
                    ordered.push((String::new(), c));
                }
            }
        }

        let mut new_current = self.current_step_id.clone();
        for (index, (old_id, collection)) in ordered.into_iter().enumerate() {
            let new_id = index.to_string();
            if !old_id.is_empty() && old_id == self.current_step_id {
                new_current = new_id.clone();
            }
            self.steps.insert(new_id, collection);
        }
        if new_current != self.current_step_id {
            self.current_step_id = new_current;
            self.deps.hub.runtime_props_changed(&self.control_id);
        }
        (self.commit)(true);
        true
    }

    /// Remove a step; the last one cannot be removed
    pub fn step_remove(&mut self, step_id: &str) -> bool {
        if self.is_preset() || self.steps.len() <= 1 {
            return false;
        }
        let ids = self.step_ids();
        let Some(index) = ids.iter().position(|id| id == step_id) else {
            return false;
        };
        if let Some(removed) = self.steps.remove(step_id) {
            removed.destroy();
        }
        if self.current_step_id == step_id {
            let remaining = self.step_ids();
            let fallback = remaining
                .get(index.min(remaining.len().saturating_sub(1)))
                .cloned()
                .unwrap_or_default();
            self.set_current_step(fallback);
        }
        (self.commit)(true);
        true
    }

    pub fn step_swap(&mut self, a: &str, b: &str) -> bool {
        if self.is_preset() || a == b || !self.steps.contains_key(a) || !self.steps.contains_key(b) {
            return false;
        }
        let (Some(first), Some(second)) = (self.steps.remove(a), self.steps.remove(b)) else {
            return false;
        };
        self.steps.insert(a.to_string(), second);
        self.steps.insert(b.to_string(), first);
        (self.commit)(true);
        true
    }

    pub fn step_select_current(&mut self, step_id: &str) -> bool {
        if !self.steps.contains_key(step_id) {
            return false;
        }
        self.set_current_step(step_id.to_string());
        true
    }

    /// Move the current step by `delta`, wrapping in both directions
    pub fn step_advance_delta(&mut self, delta: i64) -> bool {
        let ids = self.step_ids();
        if ids.is_empty() {
            return false;
        }
        let index = ids.iter().position(|id| *id == self.current_step_id).unwrap_or(0) as i64;
        let target = (index + delta).rem_euclid(ids.len() as i64) as usize;
        self.set_current_step(ids[target].clone());
        true
    }

    pub fn step_rename(&mut self, step_id: &str, name: Option<String>) -> bool {
        match self.editable_step(step_id) {
            Some(step) => {
                step.set_name(name.filter(|n| !n.is_empty()));
                true
            }
            None => false,
        }
    }

    /// Set `rotaryActions` or `stepAutoProgress`
    pub fn options_set_field(&mut self, key: &str, value: &Value) -> bool {
        if self.is_preset() {
            return false;
        }
        let Some(flag) = value.as_bool() else {
            return false;
        };
        match key {
            "rotaryActions" => {
                self.options.rotary_actions = flag;
                for step in self.steps.values_mut() {
                    step.set_rotary(flag);
                }
            }
            "stepAutoProgress" => self.options.step_auto_progress = flag,
            _ => return false,
        }
        (self.commit)(true);
        true
    }

    // =========================================================================
    // Local variables
    // =========================================================================

    pub fn local_variables(&self) -> &[LocalVariableModel] {
        &self.local_variables
    }

    /// Create or update a local variable expression
    pub fn local_variable_set(&mut self, name: &str, expression: &str) -> bool {
        if self.is_preset() || name.is_empty() {
            return false;
        }
        match self.local_variables.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.expression = expression.to_string(),
            None => self.local_variables.push(LocalVariableModel {
                name: name.to_string(),
                expression: expression.to_string(),
            }),
        }
        (self.commit)(true);
        true
    }

    pub fn local_variable_remove(&mut self, name: &str) -> bool {
        let before = self.local_variables.len();
        self.local_variables.retain(|v| v.name != name);
        if self.local_variables.len() == before {
            return false;
        }
        (self.commit)(true);
        true
    }

    // =========================================================================
    // Entities across steps
    // =========================================================================

    /// Ask the connection for the current values of an action's options
    ///
    /// The request runs detached; learnt options come back to the hub as a
    /// command, so the action is only touched once the connection answered.
    pub fn action_learn(&self, step_id: &str, set_id: &ActionSetId, action_id: &str) -> bool {
        if self.is_preset() {
            return false;
        }
        let Some(action) = self
            .steps
            .get(step_id)
            .and_then(|s| s.get_action_set(set_id))
            .and_then(|actions| actions.iter().find(|a| a.id == action_id))
            .cloned()
        else {
            return false;
        };
        let Some(instance) = self.deps.connections.get_child(&action.connection_id) else {
            return false;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let hub = self.deps.hub.clone();
        let control_id = self.control_id.clone();
        runtime.spawn(async move {
            let learned = instance.action_learn_values(&action, &control_id).await;
            match learned {
                Ok(Some(options)) => hub.apply_learned_options(control_id, action.id, options),
                Ok(None) => trace!("Connection had nothing to learn for '{}'", action.definition_id),
                Err(e) => debug!("Learning '{}' failed: {}", action.definition_id, e),
            }
        });
        true
    }

    pub fn apply_learned_options(&mut self, action_id: &str, options: EntityOptions) -> bool {
        self.steps
            .values_mut()
            .any(|step| step.apply_learned_options(action_id, options.clone()))
    }

    /// Replace an upgraded action wherever it lives
    pub fn action_replace(&mut self, replacement: &ActionEntity) -> bool {
        self.steps.values_mut().any(|step| step.action_replace(replacement))
    }

    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        let mut changed = false;
        for step in self.steps.values_mut() {
            changed |= step.forget_connection(connection_id);
        }
        changed |= self.feedbacks.forget_connection(connection_id);
        if changed {
            (self.commit)(true);
        }
        changed
    }

    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        let mut changed = false;
        for step in self.steps.values_mut() {
            changed |= step.verify_connection_ids(known);
        }
        changed |= self.feedbacks.verify_connection_ids(known);
        if changed {
            (self.commit)(true);
        }
        changed
    }

    pub fn visit_references(&mut self, visitor: &mut dyn ReferenceVisitor) {
        let (style, feedbacks) = self.feedbacks.parts_mut();
        let actions = self.steps.values_mut().flat_map(|s| s.all_actions_mut()).collect();
        visit_control_parts(
            visitor,
            ControlParts {
                style: Some(style),
                actions,
                feedbacks,
                events: Vec::new(),
                local_variables: &mut self.local_variables,
            },
        );
    }
}
