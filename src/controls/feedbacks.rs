//! FeedbackTree - feedbacks that style one control
//!
//! Entities are stored in a flat arena keyed by id; parents keep an ordered
//! list of child ids. Only internal logic feedbacks (`logic_and`, `logic_or`,
//! `logic_xor`) have children.
//!
//! The last value reported for every leaf feedback is cached here. The merged
//! style is recomputed from the cache on every draw; there is no dirty flag.

use super::action_sets::CommitChange;
use super::entity::EntityNotifier;
use super::model::{new_id, ButtonStyle, ControlId, FeedbackEntity, StylePatch};
use crate::internal::building_blocks::{evaluate_logic, is_logic_feedback};
use crate::variables::{is_truthy, parse, value_to_text, VariableOverrides, VariablesController};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Text rendered when a text expression fails
pub const ERROR_TEXT: &str = "ERR";

#[derive(Debug, Clone)]
struct FeedbackNode {
    /// Entity with `children` left empty; the arena holds the structure
    entity: FeedbackEntity,
    parent: Option<String>,
    children: Vec<String>,
}

/// Variables and injected values used to resolve button text
pub struct TextContext<'a> {
    pub variables: &'a VariablesController,
    pub overrides: VariableOverrides,
}

pub struct FeedbackTree {
    control_id: ControlId,
    nodes: HashMap<String, FeedbackNode>,
    roots: Vec<String>,
    values: HashMap<String, Value>,
    base_style: ButtonStyle,
    last_referenced_variables: HashSet<String>,
    notifier: EntityNotifier,
    commit_change: CommitChange,
}

impl FeedbackTree {
    pub fn new(
        control_id: impl Into<ControlId>,
        feedbacks: Vec<FeedbackEntity>,
        base_style: ButtonStyle,
        notifier: EntityNotifier,
        commit_change: CommitChange,
    ) -> Self {
        let mut tree = Self {
            control_id: control_id.into(),
            nodes: HashMap::new(),
            roots: Vec::new(),
            values: HashMap::new(),
            base_style,
            last_referenced_variables: HashSet::new(),
            notifier,
            commit_change,
        };
        for feedback in feedbacks {
            let id = tree.insert_subtree(feedback, None);
            tree.roots.push(id);
        }
        tree
    }

    /// Insert an entity and its children into the arena; returns its id
    fn insert_subtree(&mut self, mut feedback: FeedbackEntity, parent: Option<String>) -> String {
        let children = std::mem::take(&mut feedback.children);
        let id = feedback.id.clone();
        let can_have_children = feedback.is_internal() && is_logic_feedback(&feedback.definition_id);
        if !children.is_empty() && !can_have_children {
            debug!(feedback_id = %id, "Dropping children of a feedback that cannot have any");
        }

        self.nodes.insert(
            id.clone(),
            FeedbackNode {
                entity: feedback,
                parent,
                children: Vec::new(),
            },
        );
        if can_have_children {
            let child_ids: Vec<String> = children
                .into_iter()
                .map(|c| self.insert_subtree(c, Some(id.clone())))
                .collect();
            if let Some(node) = self.nodes.get_mut(&id) {
                node.children = child_ids;
            }
        }
        id
    }

    fn build_entity(&self, id: &str) -> Option<FeedbackEntity> {
        let node = self.nodes.get(id)?;
        let mut entity = node.entity.clone();
        entity.children = node
            .children
            .iter()
            .filter_map(|c| self.build_entity(c))
            .collect();
        Some(entity)
    }

    /// Persisted form of the whole tree
    pub fn to_model(&self) -> Vec<FeedbackEntity> {
        self.roots.iter().filter_map(|id| self.build_entity(id)).collect()
    }

    pub fn base_style(&self) -> &ButtonStyle {
        &self.base_style
    }

    pub fn entity(&self, id: &str) -> Option<&FeedbackEntity> {
        self.nodes.get(id).map(|n| &n.entity)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Every entity, parents before their children
    pub fn flatten(&self) -> Vec<&FeedbackEntity> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&String> = self.roots.iter().rev().collect();
        while let Some(id) = stack.pop() {
            if let Some(node) = self.nodes.get(id) {
                out.push(&node.entity);
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut FeedbackEntity> {
        self.nodes.values_mut().map(|n| &mut n.entity)
    }

    /// Base style and every entity, borrowed together for reference visiting
    pub fn parts_mut(&mut self) -> (&mut ButtonStyle, Vec<&mut FeedbackEntity>) {
        let entities = self.nodes.values_mut().map(|n| &mut n.entity).collect();
        (&mut self.base_style, entities)
    }

    /// Enabled internal leaf feedbacks, computed by the internal controller
    pub fn internal_feedbacks(&self) -> Vec<FeedbackEntity> {
        self.flatten()
            .into_iter()
            .filter(|fb| fb.is_internal() && !fb.disabled && !is_logic_feedback(&fb.definition_id))
            .cloned()
            .collect()
    }

    pub fn last_referenced_variables(&self) -> &HashSet<String> {
        &self.last_referenced_variables
    }

    /// Subscribe every enabled entity with its connection
    pub fn subscribe_all(&self) {
        for fb in self.flatten() {
            self.notifier.feedback_update(fb, &self.control_id);
        }
    }

    /// Release every entity
    pub fn destroy(&self) {
        for fb in self.flatten() {
            self.notifier.feedback_delete(fb);
        }
    }

    fn commit(&self) {
        (self.commit_change)(true);
    }

    // =========================================================================
    // Values
    // =========================================================================

    /// Store values reported by one connection; returns whether any changed
    pub fn update_feedback_values(&mut self, connection_id: &str, updates: &[(String, Value)]) -> bool {
        let mut changed = false;
        for (id, value) in updates {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.entity.connection_id != connection_id {
                continue;
            }
            if self.values.get(id) != Some(value) {
                self.values.insert(id.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    pub fn cached_value(&self, id: &str) -> Option<&Value> {
        self.values.get(id)
    }

    /// Boolean result of a node with its invert flag applied
    fn node_bool(&self, id: &str) -> bool {
        let Some(node) = self.nodes.get(id) else {
            return false;
        };
        let entity = &node.entity;
        if entity.is_internal() && is_logic_feedback(&entity.definition_id) {
            let child_values: Vec<bool> = node
                .children
                .iter()
                .filter(|c| self.nodes.get(*c).map(|n| !n.entity.disabled).unwrap_or(false))
                .map(|c| self.node_bool(c))
                .collect();
            return evaluate_logic(&entity.definition_id, &child_values, entity.is_inverted)
                .unwrap_or(false);
        }
        let raw = self.values.get(id).map(is_truthy).unwrap_or(false);
        raw != entity.is_inverted
    }

    /// All enabled top-level feedbacks are true (vacuously true when empty)
    pub fn check_all_true(&self) -> bool {
        self.roots
            .iter()
            .filter(|id| self.nodes.get(*id).map(|n| !n.entity.disabled).unwrap_or(false))
            .all(|id| self.node_bool(id))
    }

    /// Base style with every enabled feedback applied in order
    pub fn merged_style(&self) -> ButtonStyle {
        let mut style = self.base_style.clone();
        for id in &self.roots {
            let Some(node) = self.nodes.get(id) else {
                continue;
            };
            if node.entity.disabled {
                continue;
            }
            match self.values.get(id) {
                Some(Value::Object(patch)) if node.children.is_empty() => style.apply_patch(patch),
                _ => {
                    if let Some(patch) = &node.entity.style {
                        if self.node_bool(id) {
                            style.apply_patch(patch);
                        }
                    }
                }
            }
        }
        style
    }

    /// Merged style with its text resolved; records the variables it used
    pub fn get_draw_style(&mut self, ctx: &TextContext<'_>) -> ButtonStyle {
        let mut style = self.merged_style();
        let referenced = if style.text_expression {
            match ctx.variables.execute_expression(&style.text, &ctx.overrides) {
                Ok(result) => {
                    style.text = value_to_text(&result.value);
                    result.variable_ids
                }
                Err(e) => {
                    debug!(control_id = %self.control_id, "Text expression failed: {}", e);
                    let ids = parse::variable_ids_in(&style.text).into_iter().collect();
                    style.text = ERROR_TEXT.to_string();
                    ids
                }
            }
        } else {
            let parsed = ctx.variables.parse_variables(&style.text, &ctx.overrides);
            style.text = parsed.text;
            parsed.variable_ids
        };
        self.last_referenced_variables = referenced;
        style
    }

    /// Whether a variable change affects the last drawn text
    pub fn on_variables_changed(&self, changed: &HashSet<String>) -> bool {
        !self.last_referenced_variables.is_disjoint(changed)
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    fn accepts_children(&self, id: &str) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.entity.is_internal() && is_logic_feedback(&n.entity.definition_id))
            .unwrap_or(false)
    }

    fn siblings_mut(&mut self, parent: Option<&str>) -> Option<&mut Vec<String>> {
        match parent {
            Some(p) => self.nodes.get_mut(p).map(|n| &mut n.children),
            None => Some(&mut self.roots),
        }
    }

    fn subtree_ids(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get(&current) {
                stack.extend(node.children.iter().cloned());
            }
            out.push(current);
        }
        out
    }

    fn subscribe_subtree(&self, id: &str) {
        for sub_id in self.subtree_ids(id) {
            if let Some(node) = self.nodes.get(&sub_id) {
                self.notifier.feedback_update(&node.entity, &self.control_id);
            }
        }
    }

    /// Add a feedback at the end of the root list or of a logic parent
    pub fn feedback_add(&mut self, feedback: FeedbackEntity, parent_id: Option<&str>) -> bool {
        if let Some(parent) = parent_id {
            if !self.accepts_children(parent) {
                return false;
            }
        }
        if self.nodes.contains_key(&feedback.id) {
            return false;
        }
        let id = self.insert_subtree(feedback, parent_id.map(str::to_string));
        if let Some(siblings) = self.siblings_mut(parent_id) {
            siblings.push(id.clone());
        }
        self.subscribe_subtree(&id);
        self.commit();
        true
    }

    /// Deep-clone a feedback right after the original; returns the new id
    pub fn feedback_duplicate(&mut self, id: &str) -> Option<String> {
        let parent = self.nodes.get(id)?.parent.clone();
        let copy = self.build_entity(id)?.clone_with_new_ids();
        let new_id = self.insert_subtree(copy, parent.clone());

        let siblings = self.siblings_mut(parent.as_deref())?;
        let index = siblings.iter().position(|s| s == id).map(|i| i + 1).unwrap_or(siblings.len());
        siblings.insert(index, new_id.clone());

        self.subscribe_subtree(&new_id);
        self.commit();
        Some(new_id)
    }

    pub fn feedback_enabled(&mut self, id: &str, enabled: bool) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.entity.disabled = !enabled;
        if enabled {
            self.notifier.feedback_update(&node.entity, &self.control_id);
        } else {
            self.notifier.feedback_delete(&node.entity);
        }
        self.commit();
        true
    }

    pub fn feedback_headline(&mut self, id: &str, headline: String) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.entity.headline = (!headline.is_empty()).then_some(headline);
        self.commit();
        true
    }

    pub fn feedback_set_inverted(&mut self, id: &str, inverted: bool) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.entity.is_inverted = inverted;
        self.commit();
        true
    }

    pub fn feedback_set_option(&mut self, id: &str, key: &str, value: Value) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        node.entity.options.insert(key.to_string(), value);
        self.notifier.feedback_update(&node.entity, &self.control_id);
        self.commit();
        true
    }

    /// Choose which style fields a boolean feedback sets; new fields start from the base style
    pub fn feedback_set_style_selection(&mut self, id: &str, selected: &[String]) -> bool {
        let base = self.base_style.clone();
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        let old = node.entity.style.take().unwrap_or_default();
        let mut style = StylePatch::new();
        for key in selected {
            if let Some(value) = old.get(key).cloned().or_else(|| base.field_value(key)) {
                style.insert(key.clone(), value);
            }
        }
        node.entity.style = Some(style);
        self.commit();
        true
    }

    /// Set one selected style field of a boolean feedback
    pub fn feedback_set_style_value(&mut self, id: &str, key: &str, value: Value) -> bool {
        let Some(node) = self.nodes.get_mut(id) else {
            return false;
        };
        let Some(style) = node.entity.style.as_mut() else {
            return false;
        };
        if !style.contains_key(key) {
            return false;
        }
        style.insert(key.to_string(), value);
        self.commit();
        true
    }

    fn detach(&mut self, id: &str) -> Option<Vec<FeedbackNode>> {
        let parent = self.nodes.get(id)?.parent.clone();
        if let Some(siblings) = self.siblings_mut(parent.as_deref()) {
            siblings.retain(|s| s != id);
        }
        let removed = self
            .subtree_ids(id)
            .into_iter()
            .filter_map(|sub| {
                self.values.remove(&sub);
                self.nodes.remove(&sub)
            })
            .collect();
        Some(removed)
    }

    pub fn feedback_remove(&mut self, id: &str) -> bool {
        let Some(removed) = self.detach(id) else {
            return false;
        };
        for node in &removed {
            self.notifier.feedback_delete(&node.entity);
        }
        self.commit();
        true
    }

    fn is_descendant_or_self(&self, candidate: &str, ancestor: &str) -> bool {
        let mut current = Some(candidate.to_string());
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent.clone());
        }
        false
    }

    /// Move a feedback under another parent (or to the root list) at an index
    pub fn feedback_move_to(&mut self, id: &str, new_parent: Option<&str>, index: usize) -> bool {
        if !self.nodes.contains_key(id) {
            return false;
        }
        if let Some(parent) = new_parent {
            if !self.accepts_children(parent) || self.is_descendant_or_self(parent, id) {
                return false;
            }
        }

        let old_parent = self.nodes.get(id).and_then(|n| n.parent.clone());
        if let Some(siblings) = self.siblings_mut(old_parent.as_deref()) {
            siblings.retain(|s| s != id);
        }
        if let Some(siblings) = self.siblings_mut(new_parent) {
            let index = index.min(siblings.len());
            siblings.insert(index, id.to_string());
        }
        if let Some(node) = self.nodes.get_mut(id) {
            node.parent = new_parent.map(str::to_string);
        }
        self.commit();
        true
    }

    /// Replace definition and options of the feedback with this id
    pub fn feedback_replace(&mut self, replacement: &FeedbackEntity) -> bool {
        let Some(node) = self.nodes.get_mut(&replacement.id) else {
            return false;
        };
        node.entity.definition_id = replacement.definition_id.clone();
        node.entity.options = replacement.options.clone();
        node.entity.upgrade_index = None;
        self.notifier.feedback_update(&node.entity, &self.control_id);
        self.commit();
        true
    }

    fn remove_matching(&mut self, mut matches: impl FnMut(&FeedbackEntity) -> bool) -> bool {
        let targets: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, n)| matches(&n.entity))
            .map(|(id, _)| id.clone())
            .collect();
        let mut changed = false;
        for id in targets {
            changed |= self.detach(&id).is_some();
        }
        changed
    }

    /// Drop every feedback of a connection that is being deleted
    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        self.remove_matching(|fb| fb.connection_id == connection_id)
    }

    /// Drop feedbacks of connections that do not exist; connections are not notified
    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        self.remove_matching(|fb| !fb.is_internal() && !known.contains(&fb.connection_id))
    }

    /// Update fields of the base style
    pub fn style_set_fields(&mut self, diff: &StylePatch) -> bool {
        if diff.is_empty() {
            return false;
        }
        self.base_style.apply_patch(diff);
        self.commit();
        true
    }
}
