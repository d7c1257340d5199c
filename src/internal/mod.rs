//! Internal pseudo-connection
//!
//! Actions and feedbacks whose connection id is `internal` are served by a
//! fixed, ordered list of fragments. Dispatch is first-match-wins: the first
//! fragment that handles an action (or returns a value for a feedback) ends
//! the search.
//!
//! Feedback values are cached per feedback id together with the variables
//! the computation read, so a variable change only recomputes the feedbacks
//! that used it.

mod action_recorder;
pub mod building_blocks;
mod controls;
mod custom_variables;
mod instance;
mod page;
mod surface;
mod system;
mod time;
mod triggers;
mod variables;

use crate::connections::{ConnectionRegistry, FeedbackValueUpdate};
use crate::controls::model::{ActionEntity, ControlId, EntityOptions, FeedbackEntity, StylePatch};
use crate::controls::{ControlsController, RunActionExtras};
use crate::page::{ControlLocation, PageStore};
use crate::references::ReferenceField;
use crate::surface::SurfaceController;
use crate::variables::{VariableOverrides, VariablesController};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace, warn};

/// Option keys of one internal definition that hold references
pub type ReferenceFields = &'static [(&'static str, ReferenceField)];

type ReferenceTable = &'static [(&'static str, ReferenceFields)];

/// An action, feedback or variable offered by a fragment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InternalDefinition {
    pub id: &'static str,
    pub label: &'static str,
}

pub(crate) const fn def(id: &'static str, label: &'static str) -> InternalDefinition {
    InternalDefinition { id, label }
}

/// Result of computing one internal feedback
#[derive(Debug, Clone, PartialEq)]
pub enum FeedbackOutcome {
    Bool(bool),
    Style(StylePatch),
    Tracked {
        value: Value,
        referenced_variables: HashSet<String>,
    },
}

impl FeedbackOutcome {
    fn into_parts(self) -> (Value, HashSet<String>) {
        match self {
            FeedbackOutcome::Bool(b) => (Value::Bool(b), HashSet::new()),
            FeedbackOutcome::Style(patch) => (Value::Object(patch), HashSet::new()),
            FeedbackOutcome::Tracked {
                value,
                referenced_variables,
            } => (value, referenced_variables),
        }
    }
}

/// Side effects collected while running internal actions
#[derive(Debug, Default)]
pub struct InternalEffects {
    pub changed_variables: HashSet<String>,
    /// Feedback definition ids to recompute
    pub recheck: HashSet<&'static str>,
    /// Surfaces whose page or lock state changed
    pub redraw_surfaces: HashSet<String>,
}

/// Mutable view of the hub for internal actions
pub struct InternalContext<'a> {
    pub controls: &'a mut ControlsController,
    pub variables: &'a mut VariablesController,
    pub pages: &'a PageStore,
    pub surfaces: &'a mut SurfaceController,
    pub connections: &'a ConnectionRegistry,
    pub effects: InternalEffects,
}

/// Read-only view of the hub for internal feedbacks and variables
pub struct FeedbackContext<'a> {
    pub controls: &'a ControlsController,
    pub variables: &'a VariablesController,
    pub pages: &'a PageStore,
    pub surfaces: &'a SurfaceController,
    pub connections: &'a ConnectionRegistry,
    pub now: DateTime<Local>,
}

/// One slice of the internal connection
///
/// Every method is optional; the default handles nothing.
pub trait InternalFragment: Send {
    fn name(&self) -> &'static str;

    fn action_definitions(&self) -> &'static [InternalDefinition] {
        &[]
    }

    fn feedback_definitions(&self) -> &'static [InternalDefinition] {
        &[]
    }

    fn variable_definitions(&self) -> &'static [InternalDefinition] {
        &[]
    }

    /// Current values of this fragment's `internal:` variables
    fn variable_values(&self, _ctx: &FeedbackContext<'_>) -> Vec<(String, Value)> {
        Vec::new()
    }

    /// Run an action; returns whether this fragment handled it
    fn execute_action(
        &mut self,
        _action: &ActionEntity,
        _extras: &RunActionExtras,
        _ctx: &mut InternalContext<'_>,
    ) -> bool {
        false
    }

    fn execute_feedback(
        &self,
        _feedback: &FeedbackEntity,
        _control_id: &str,
        _ctx: &FeedbackContext<'_>,
    ) -> Option<FeedbackOutcome> {
        None
    }

    /// Replacement for a deprecated action
    fn action_upgrade(&self, _action: &ActionEntity) -> Option<ActionEntity> {
        None
    }

    /// Replacement for a deprecated feedback
    fn feedback_upgrade(&self, _feedback: &FeedbackEntity) -> Option<FeedbackEntity> {
        None
    }
}

const REFERENCE_TABLES: &[ReferenceTable] = &[
    action_recorder::REFERENCE_FIELDS,
    instance::REFERENCE_FIELDS,
    variables::REFERENCE_FIELDS,
];

/// Option keys of an internal definition that hold connection ids or variable names
pub fn reference_fields(definition_id: &str) -> ReferenceFields {
    REFERENCE_TABLES
        .iter()
        .flat_map(|table| table.iter())
        .find(|(id, _)| *id == definition_id)
        .map(|(_, fields)| *fields)
        .unwrap_or(&[])
}

// =============================================================================
// Option helpers shared by the fragments
// =============================================================================

pub(crate) fn option_str<'a>(options: &'a EntityOptions, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

pub(crate) fn option_f64(options: &EntityOptions, key: &str) -> Option<f64> {
    match options.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// `true`/`false`/`toggle` style option applied to the current state
pub(crate) fn option_toggle(options: &EntityOptions, key: &str, current: bool) -> bool {
    match options.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(current),
        Some(Value::String(s)) => match s.as_str() {
            "toggle" => !current,
            "true" | "on" | "enable" | "1" => true,
            "false" | "off" | "disable" | "0" => false,
            _ => current,
        },
        _ => !current,
    }
}

/// `surface` option: a surface id, or `self` for the surface that ran the action
pub(crate) fn target_surface(options: &EntityOptions, extras: &RunActionExtras) -> Option<String> {
    match option_str(options, "surface").map(str::trim) {
        None | Some("") | Some("self") => extras.surface_id.clone(),
        Some(id) => Some(id.to_string()),
    }
}

fn location_overrides(own: Option<&ControlLocation>) -> VariableOverrides {
    let mut overrides = VariableOverrides::new();
    if let Some(loc) = own {
        overrides.insert("this:page".to_string(), Value::from(loc.page_number));
        overrides.insert("this:row".to_string(), Value::from(loc.row));
        overrides.insert("this:column".to_string(), Value::from(loc.column));
    }
    overrides
}

/// Resolve a `location` option
///
/// Accepts `this`, `row/column` on the own page or `page/row/column`, each
/// part possibly a variable. Page `0` means the own page. Returns the
/// variables the text used alongside the location.
pub(crate) fn resolve_location(
    options: &EntityOptions,
    own: Option<&ControlLocation>,
    variables: &VariablesController,
) -> (Option<ControlLocation>, HashSet<String>) {
    let raw = option_str(options, "location").unwrap_or("this").trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("this") {
        return (own.copied(), HashSet::new());
    }

    let parsed = variables.parse_variables(raw, &location_overrides(own));
    let parts: Option<Vec<i64>> = parsed
        .text
        .split('/')
        .map(|p| p.trim().parse::<i64>().ok())
        .collect();
    let location = match parts.as_deref() {
        Some([row, column]) => own.map(|o| ControlLocation::new(o.page_number, *row as i32, *column as i32)),
        Some([page, row, column]) => {
            let page = if *page == 0 {
                own.map(|o| o.page_number)
            } else {
                u32::try_from(*page).ok()
            };
            page.map(|p| ControlLocation::new(p, *row as i32, *column as i32))
        }
        _ => None,
    };
    (location, parsed.variable_ids)
}

/// Control id at a resolved location
pub(crate) fn control_at(pages: &PageStore, location: Option<ControlLocation>) -> Option<ControlId> {
    location.and_then(|loc| pages.get_control_id_at(&loc).cloned())
}

// =============================================================================
// InternalController
// =============================================================================

struct CachedFeedback {
    control_id: ControlId,
    entity: FeedbackEntity,
    value: Option<Value>,
    referenced: HashSet<String>,
}

pub struct InternalController {
    fragments: Vec<Box<dyn InternalFragment>>,
    feedbacks: HashMap<String, CachedFeedback>,
}

impl Default for InternalController {
    fn default() -> Self {
        Self::new()
    }
}

impl InternalController {
    pub fn new() -> Self {
        let fragments: Vec<Box<dyn InternalFragment>> = vec![
            Box::new(action_recorder::ActionRecorder::default()),
            Box::new(instance::Instance),
            Box::new(time::Time),
            Box::new(controls::Controls),
            Box::new(custom_variables::CustomVariables),
            Box::new(page::Page),
            Box::new(surface::Surface),
            Box::new(system::System),
            Box::new(triggers::Triggers),
            Box::new(variables::Variables),
            Box::new(building_blocks::BuildingBlocks),
        ];
        Self {
            fragments,
            feedbacks: HashMap::new(),
        }
    }

    pub fn fragment_names(&self) -> Vec<&'static str> {
        self.fragments.iter().map(|f| f.name()).collect()
    }

    pub fn action_definitions(&self) -> Vec<InternalDefinition> {
        self.fragments
            .iter()
            .flat_map(|f| f.action_definitions().iter().cloned())
            .collect()
    }

    pub fn feedback_definitions(&self) -> Vec<InternalDefinition> {
        self.fragments
            .iter()
            .flat_map(|f| f.feedback_definitions().iter().cloned())
            .collect()
    }

    pub fn variable_definitions(&self) -> Vec<InternalDefinition> {
        self.fragments
            .iter()
            .flat_map(|f| f.variable_definitions().iter().cloned())
            .collect()
    }

    /// Values of every `internal:` variable, named without the label
    pub fn variable_values(&self, ctx: &FeedbackContext<'_>) -> Vec<(String, Value)> {
        self.fragments
            .iter()
            .flat_map(|f| f.variable_values(ctx))
            .collect()
    }

    pub fn execute_action(
        &mut self,
        action: &ActionEntity,
        extras: &RunActionExtras,
        ctx: &mut InternalContext<'_>,
    ) -> bool {
        for fragment in self.fragments.iter_mut() {
            if fragment.execute_action(action, extras, ctx) {
                trace!(
                    control_id = %extras.control_id,
                    "Internal action '{}' handled by {}",
                    action.definition_id,
                    fragment.name()
                );
                return true;
            }
        }
        warn!("Unknown internal action '{}'", action.definition_id);
        false
    }

    /// Replacement for a deprecated action; the id is kept
    pub fn upgrade_action(&self, action: &ActionEntity) -> Option<ActionEntity> {
        if !action.is_internal() {
            return None;
        }
        let mut replacement = self.fragments.iter().find_map(|f| f.action_upgrade(action))?;
        replacement.id = action.id.clone();
        debug!(
            "Upgraded internal action '{}' -> '{}'",
            action.definition_id, replacement.definition_id
        );
        Some(replacement)
    }

    /// Replacement for a deprecated feedback; the id is kept
    pub fn upgrade_feedback(&self, feedback: &FeedbackEntity) -> Option<FeedbackEntity> {
        if !feedback.is_internal() {
            return None;
        }
        let mut replacement = self.fragments.iter().find_map(|f| f.feedback_upgrade(feedback))?;
        replacement.id = feedback.id.clone();
        Some(replacement)
    }

    fn compute(&self, entity: &FeedbackEntity, control_id: &str, ctx: &FeedbackContext<'_>) -> Option<(Value, HashSet<String>)> {
        self.fragments
            .iter()
            .find_map(|f| f.execute_feedback(entity, control_id, ctx))
            .map(FeedbackOutcome::into_parts)
    }

    /// Recompute the cached entries matching `select`; returns the values that changed
    fn recompute(
        &mut self,
        ctx: &FeedbackContext<'_>,
        select: impl Fn(&str, &CachedFeedback) -> bool,
    ) -> Vec<FeedbackValueUpdate> {
        let ids: Vec<String> = self
            .feedbacks
            .iter()
            .filter(|(id, entry)| select(id, entry))
            .map(|(id, _)| id.clone())
            .collect();

        let mut updates = Vec::new();
        for id in ids {
            let Some(entry) = self.feedbacks.get(&id) else {
                continue;
            };
            let Some((value, referenced)) = self.compute(&entry.entity, &entry.control_id, ctx) else {
                continue;
            };
            let Some(entry) = self.feedbacks.get_mut(&id) else {
                continue;
            };
            entry.referenced = referenced;
            if entry.value.as_ref() != Some(&value) {
                entry.value = Some(value.clone());
                updates.push(FeedbackValueUpdate {
                    id,
                    control_id: entry.control_id.clone(),
                    value,
                });
            }
        }
        updates
    }

    /// Replace the cached internal feedbacks of a control and compute them all
    pub fn sync_control_feedbacks(
        &mut self,
        control_id: &str,
        feedbacks: Vec<FeedbackEntity>,
        ctx: &FeedbackContext<'_>,
    ) -> Vec<FeedbackValueUpdate> {
        self.forget_control(control_id);
        let ids: HashSet<String> = feedbacks.iter().map(|f| f.id.clone()).collect();
        for entity in feedbacks {
            self.feedbacks.insert(
                entity.id.clone(),
                CachedFeedback {
                    control_id: control_id.to_string(),
                    entity,
                    value: None,
                    referenced: HashSet::new(),
                },
            );
        }
        self.recompute(ctx, |id, _| ids.contains(id))
    }

    pub fn forget_control(&mut self, control_id: &str) {
        self.feedbacks.retain(|_, entry| entry.control_id != control_id);
    }

    /// Recompute feedbacks of the given definition ids (all when empty)
    pub fn check_feedbacks(&mut self, types: &[&str], ctx: &FeedbackContext<'_>) -> Vec<FeedbackValueUpdate> {
        self.recompute(ctx, |_, entry| {
            types.is_empty() || types.contains(&entry.entity.definition_id.as_str())
        })
    }

    pub fn check_feedbacks_by_id(&mut self, ids: &HashSet<String>, ctx: &FeedbackContext<'_>) -> Vec<FeedbackValueUpdate> {
        self.recompute(ctx, |id, _| ids.contains(id))
    }

    /// Recompute feedbacks that read any of the changed variables
    pub fn on_variables_changed(
        &mut self,
        changed: &HashSet<String>,
        ctx: &FeedbackContext<'_>,
    ) -> Vec<FeedbackValueUpdate> {
        if changed.is_empty() {
            return Vec::new();
        }
        self.recompute(ctx, |_, entry| !entry.referenced.is_disjoint(changed))
    }

    pub fn cached_feedback_count(&self) -> usize {
        self.feedbacks.len()
    }
}

#[cfg(test)]
mod tests;
