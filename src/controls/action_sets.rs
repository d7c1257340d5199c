//! ActionSetCollection - action sets of one step
//!
//! Owns `set id → ordered actions` plus the step options. Every content
//! mutation ends with `commit_change(false)`: the change is persisted but
//! does not force a redraw, since actions do not affect the button face.

use super::entity::EntityNotifier;
use super::model::{new_id, ActionEntity, ActionSetId, ControlId, StepModel, StepOptions};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Persist callback; the flag says whether the face must be redrawn
pub type CommitChange = Arc<dyn Fn(bool) + Send + Sync>;

/// Interval between generated duration sets
pub const DURATION_SET_STEP_MS: u64 = 1000;

pub struct ActionSetCollection {
    control_id: ControlId,
    action_sets: BTreeMap<ActionSetId, Vec<ActionEntity>>,
    options: StepOptions,
    notifier: EntityNotifier,
    commit_change: CommitChange,
}

impl ActionSetCollection {
    pub fn new(
        control_id: impl Into<ControlId>,
        model: StepModel,
        notifier: EntityNotifier,
        commit_change: CommitChange,
    ) -> Self {
        let mut collection = Self {
            control_id: control_id.into(),
            action_sets: model.action_sets,
            options: model.options,
            notifier,
            commit_change,
        };
        if collection.action_sets.is_empty() {
            collection.action_sets.insert(ActionSetId::Down, Vec::new());
            collection.action_sets.insert(ActionSetId::Up, Vec::new());
        }
        collection
    }

    pub fn to_model(&self) -> StepModel {
        StepModel {
            action_sets: self.action_sets.clone(),
            options: self.options.clone(),
        }
    }

    /// Copy of this step with fresh action ids
    pub fn duplicate_model(&self) -> StepModel {
        let mut model = self.to_model();
        for actions in model.action_sets.values_mut() {
            for action in actions.iter_mut() {
                action.id = new_id();
            }
        }
        model
    }

    pub fn options(&self) -> &StepOptions {
        &self.options
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.options.name = name;
        (self.commit_change)(true);
    }

    pub fn action_set_ids(&self) -> Vec<ActionSetId> {
        self.action_sets.keys().cloned().collect()
    }

    pub fn get_action_set(&self, set_id: &ActionSetId) -> Option<&Vec<ActionEntity>> {
        self.action_sets.get(set_id)
    }

    /// Every action of every set
    pub fn all_actions(&self) -> impl Iterator<Item = &ActionEntity> {
        self.action_sets.values().flatten()
    }

    pub fn all_actions_mut(&mut self) -> impl Iterator<Item = &mut ActionEntity> {
        self.action_sets.values_mut().flatten()
    }

    pub fn find_action(&self, action_id: &str) -> Option<(&ActionSetId, &ActionEntity)> {
        self.action_sets
            .iter()
            .find_map(|(set_id, actions)| actions.iter().find(|a| a.id == action_id).map(|a| (set_id, a)))
    }

    /// Subscribe every enabled action (control load)
    pub fn subscribe_all(&self) {
        for action in self.all_actions() {
            self.notifier.action_update(action, &self.control_id);
        }
    }

    /// Release every action (control or step destroyed)
    pub fn destroy(&self) {
        for action in self.all_actions() {
            self.notifier.action_delete(action);
        }
    }

    fn action_mut(&mut self, set_id: &ActionSetId, action_id: &str) -> Option<&mut ActionEntity> {
        self.action_sets
            .get_mut(set_id)?
            .iter_mut()
            .find(|a| a.id == action_id)
    }

    fn commit(&self) {
        (self.commit_change)(false);
    }

    // =========================================================================
    // Action CRUD
    // =========================================================================

    /// Add an action to an existing set
    pub fn action_add(&mut self, set_id: &ActionSetId, action: ActionEntity) -> bool {
        let Some(actions) = self.action_sets.get_mut(set_id) else {
            return false;
        };
        self.notifier.action_update(&action, &self.control_id);
        actions.push(action);
        self.commit();
        true
    }

    pub fn action_append(&mut self, set_id: &ActionSetId, new_actions: Vec<ActionEntity>) -> bool {
        let Some(actions) = self.action_sets.get_mut(set_id) else {
            return false;
        };
        for action in &new_actions {
            self.notifier.action_update(action, &self.control_id);
        }
        actions.extend(new_actions);
        self.commit();
        true
    }

    /// Clone an action right after the original; returns the new id
    pub fn action_duplicate(&mut self, set_id: &ActionSetId, action_id: &str) -> Option<String> {
        let actions = self.action_sets.get_mut(set_id)?;
        let index = actions.iter().position(|a| a.id == action_id)?;

        let mut copy = actions[index].clone();
        copy.id = new_id();
        let new_id = copy.id.clone();
        self.notifier.action_update(&copy, &self.control_id);
        actions.insert(index + 1, copy);
        self.commit();
        Some(new_id)
    }

    pub fn action_enabled(&mut self, set_id: &ActionSetId, action_id: &str, enabled: bool) -> bool {
        let control_id = self.control_id.clone();
        let notifier = self.notifier.clone();
        let Some(action) = self.action_mut(set_id, action_id) else {
            return false;
        };
        action.disabled = !enabled;
        if enabled {
            notifier.action_update(action, &control_id);
        } else {
            notifier.action_delete(action);
        }
        self.commit();
        true
    }

    pub fn action_headline(&mut self, set_id: &ActionSetId, action_id: &str, headline: String) -> bool {
        let Some(action) = self.action_mut(set_id, action_id) else {
            return false;
        };
        action.headline = (!headline.is_empty()).then_some(headline);
        self.commit();
        true
    }

    pub fn action_remove(&mut self, set_id: &ActionSetId, action_id: &str) -> bool {
        let Some(actions) = self.action_sets.get_mut(set_id) else {
            return false;
        };
        let Some(index) = actions.iter().position(|a| a.id == action_id) else {
            return false;
        };
        let removed = actions.remove(index);
        self.notifier.action_delete(&removed);
        self.commit();
        true
    }

    /// Replace definition and options of the action with this id, in any set
    pub fn action_replace(&mut self, replacement: &ActionEntity) -> bool {
        let control_id = self.control_id.clone();
        let notifier = self.notifier.clone();
        let Some(action) = self.all_actions_mut().find(|a| a.id == replacement.id) else {
            return false;
        };
        action.definition_id = replacement.definition_id.clone();
        action.options = replacement.options.clone();
        action.upgrade_index = None;
        notifier.action_update(action, &control_id);
        self.commit();
        true
    }

    pub fn action_replace_all(&mut self, set_id: &ActionSetId, new_actions: Vec<ActionEntity>) -> bool {
        let Some(actions) = self.action_sets.get_mut(set_id) else {
            return false;
        };
        for old in actions.iter() {
            self.notifier.action_delete(old);
        }
        for action in &new_actions {
            self.notifier.action_update(action, &self.control_id);
        }
        *actions = new_actions;
        self.commit();
        true
    }

    pub fn action_set_delay(&mut self, set_id: &ActionSetId, action_id: &str, delay: u64) -> bool {
        let Some(action) = self.action_mut(set_id, action_id) else {
            return false;
        };
        action.delay = delay;
        self.commit();
        true
    }

    pub fn action_set_option(
        &mut self,
        set_id: &ActionSetId,
        action_id: &str,
        key: &str,
        value: Value,
    ) -> bool {
        let control_id = self.control_id.clone();
        let notifier = self.notifier.clone();
        let Some(action) = self.action_mut(set_id, action_id) else {
            return false;
        };
        action.options.insert(key.to_string(), value);
        notifier.action_update(action, &control_id);
        self.commit();
        true
    }

    /// Move an action, possibly into another set of this step
    pub fn action_reorder(
        &mut self,
        drag_set_id: &ActionSetId,
        drag_action_id: &str,
        drop_set_id: &ActionSetId,
        drop_index: usize,
    ) -> bool {
        if !self.action_sets.contains_key(drop_set_id) {
            return false;
        }
        let Some(source) = self.action_sets.get_mut(drag_set_id) else {
            return false;
        };
        let Some(index) = source.iter().position(|a| a.id == drag_action_id) else {
            return false;
        };
        let action = source.remove(index);

        let Some(target) = self.action_sets.get_mut(drop_set_id) else {
            return false;
        };
        let index = drop_index.min(target.len());
        target.insert(index, action);
        self.commit();
        true
    }

    /// Options learnt from the connection; applied to the action with this id
    pub fn apply_learned_options(&mut self, action_id: &str, options: crate::controls::model::EntityOptions) -> bool {
        let control_id = self.control_id.clone();
        let notifier = self.notifier.clone();
        let Some(action) = self.all_actions_mut().find(|a| a.id == action_id) else {
            return false;
        };
        action.options = options;
        notifier.action_update(action, &control_id);
        self.commit();
        true
    }

    /// Drop every action of a connection that is being deleted
    pub fn forget_connection(&mut self, connection_id: &str) -> bool {
        let mut changed = false;
        for actions in self.action_sets.values_mut() {
            let before = actions.len();
            actions.retain(|a| a.connection_id != connection_id);
            changed |= actions.len() != before;
        }
        changed
    }

    /// Drop actions of connections that do not exist; connections are not notified
    pub fn verify_connection_ids(&mut self, known: &HashSet<String>) -> bool {
        let mut changed = false;
        for actions in self.action_sets.values_mut() {
            let before = actions.len();
            actions.retain(|a| a.is_internal() || known.contains(&a.connection_id));
            changed |= actions.len() != before;
        }
        changed
    }

    // =========================================================================
    // Action set management
    // =========================================================================

    /// Add a duration set 1s after the longest one; returns its id
    pub fn action_set_add(&mut self) -> ActionSetId {
        let next = self
            .action_sets
            .keys()
            .filter_map(|k| k.duration())
            .max()
            .map(|max| max + DURATION_SET_STEP_MS)
            .unwrap_or(DURATION_SET_STEP_MS);
        let id = ActionSetId::Duration(next);
        self.action_sets.insert(id.clone(), Vec::new());
        self.commit();
        id
    }

    /// Remove a set; refused for unknown ids and for the last remaining set
    pub fn action_set_remove(&mut self, set_id: &ActionSetId) -> bool {
        if !self.action_sets.contains_key(set_id) || self.action_sets.len() <= 1 {
            return false;
        }
        if let Some(actions) = self.action_sets.remove(set_id) {
            for action in &actions {
                self.notifier.action_delete(action);
            }
        }
        if let Some(ms) = set_id.duration() {
            self.options.run_while_held.retain(|d| *d != ms);
        }
        self.commit();
        true
    }

    /// Rename a duration set; both ids must be numeric and `new` must be free
    pub fn action_set_rename(&mut self, old_id: &ActionSetId, new_id: &ActionSetId) -> bool {
        let (Some(old_ms), Some(new_ms)) = (old_id.duration(), new_id.duration()) else {
            return false;
        };
        if self.action_sets.contains_key(new_id) {
            return false;
        }
        let Some(actions) = self.action_sets.remove(old_id) else {
            return false;
        };
        self.action_sets.insert(new_id.clone(), actions);

        if let Some(pos) = self.options.run_while_held.iter().position(|d| *d == old_ms) {
            self.options.run_while_held[pos] = new_ms;
        }
        self.commit();
        true
    }

    /// Mark a duration set to fire while the button is still held
    pub fn action_set_run_while_held(&mut self, set_id: &ActionSetId, run_while_held: bool) -> bool {
        let Some(ms) = set_id.duration() else {
            return false;
        };
        if !self.action_sets.contains_key(set_id) {
            return false;
        }
        let listed = self.options.run_while_held.contains(&ms);
        if run_while_held && !listed {
            self.options.run_while_held.push(ms);
        } else if !run_while_held && listed {
            self.options.run_while_held.retain(|d| *d != ms);
        }
        self.commit();
        true
    }

    /// Create or drop the rotate sets; returns whether anything changed
    pub fn set_rotary(&mut self, rotary: bool) -> bool {
        let mut changed = false;
        for id in [ActionSetId::RotateLeft, ActionSetId::RotateRight] {
            if rotary {
                if !self.action_sets.contains_key(&id) {
                    self.action_sets.insert(id, Vec::new());
                    changed = true;
                }
            } else if let Some(actions) = self.action_sets.remove(&id) {
                for action in &actions {
                    self.notifier.action_delete(action);
                }
                changed = true;
            }
        }
        if changed {
            debug!(control_id = %self.control_id, rotary, "Rotate sets updated");
        }
        changed
    }

    // =========================================================================
    // Execution data
    // =========================================================================

    /// Distinct run-while-held durations that have a set, ascending
    pub fn run_while_held(&self) -> Vec<u64> {
        let mut durations: Vec<u64> = self
            .options
            .run_while_held
            .iter()
            .copied()
            .filter(|ms| self.action_sets.contains_key(&ActionSetId::Duration(*ms)))
            .collect();
        durations.sort_unstable();
        durations.dedup();
        durations
    }

    /// Set to run on release after a hold of `pressed_duration_ms`
    ///
    /// The greatest duration key strictly below the hold time wins; with no
    /// hold time or no qualifying key the plain `up` set is used.
    pub fn select_release_set(&self, pressed_duration_ms: u64) -> ActionSetId {
        if pressed_duration_ms == 0 {
            return ActionSetId::Up;
        }
        select_threshold(
            self.action_sets.keys().filter_map(|k| k.duration()),
            pressed_duration_ms,
        )
        .map(ActionSetId::Duration)
        .unwrap_or(ActionSetId::Up)
    }
}

/// Greatest threshold strictly below `duration`
pub fn select_threshold(thresholds: impl Iterator<Item = u64>, duration: u64) -> Option<u64> {
    thresholds.filter(|t| *t < duration).max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connections::ConnectionRegistry;
    use crate::controls::model::EntityOptions;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn collection() -> (ActionSetCollection, Arc<AtomicUsize>) {
        let commits = Arc::new(AtomicUsize::new(0));
        let counter = commits.clone();
        let commit: CommitChange = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let notifier = EntityNotifier::new(Arc::new(ConnectionRegistry::new()));
        (
            ActionSetCollection::new("bank:test", StepModel::empty(false), notifier, commit),
            commits,
        )
    }

    fn action(name: &str) -> ActionEntity {
        ActionEntity::new("c1", name, EntityOptions::new())
    }

    fn ids(c: &ActionSetCollection, set: &ActionSetId) -> Vec<String> {
        c.get_action_set(set).unwrap().iter().map(|a| a.id.clone()).collect()
    }

    #[test]
    fn test_add_requires_existing_set() {
        let (mut c, commits) = collection();
        assert!(!c.action_add(&ActionSetId::Duration(500), action("a")));
        assert_eq!(commits.load(Ordering::SeqCst), 0);

        assert!(c.action_add(&ActionSetId::Down, action("a")));
        assert_eq!(commits.load(Ordering::SeqCst), 1);
        assert!(c.get_action_set(&ActionSetId::Duration(500)).is_none());
    }

    #[test]
    fn test_duplicate_inserts_after_original() {
        let (mut c, _) = collection();
        let (a, b, d) = (action("a"), action("b"), action("d"));
        let (a_id, b_id, d_id) = (a.id.clone(), b.id.clone(), d.id.clone());
        c.action_append(&ActionSetId::Down, vec![a, b, d]);

        let copy_id = c.action_duplicate(&ActionSetId::Down, &b_id).unwrap();
        assert_ne!(copy_id, b_id);
        assert_eq!(ids(&c, &ActionSetId::Down), vec![a_id, b_id, copy_id.clone(), d_id]);

        let copy = c.find_action(&copy_id).unwrap().1;
        assert_eq!(copy.definition_id, "b");
        assert!(c.action_duplicate(&ActionSetId::Down, "missing").is_none());
    }

    #[test]
    fn test_replace_matches_across_sets() {
        let (mut c, _) = collection();
        let mut up_action = action("old");
        up_action.upgrade_index = Some(2);
        let id = up_action.id.clone();
        c.action_add(&ActionSetId::Up, up_action);

        let mut replacement = action("new");
        replacement.id = id.clone();
        assert!(c.action_replace(&replacement));

        let (set, found) = c.find_action(&id).unwrap();
        assert_eq!(set, &ActionSetId::Up);
        assert_eq!(found.definition_id, "new");
        assert_eq!(found.upgrade_index, None);
    }

    #[test]
    fn test_reorder_moves_between_sets() {
        let (mut c, _) = collection();
        let a = action("a");
        let a_id = a.id.clone();
        c.action_add(&ActionSetId::Down, a);
        c.action_add(&ActionSetId::Up, action("b"));

        assert!(c.action_reorder(&ActionSetId::Down, &a_id, &ActionSetId::Up, 0));
        assert!(c.get_action_set(&ActionSetId::Down).unwrap().is_empty());
        assert_eq!(ids(&c, &ActionSetId::Up)[0], a_id);
        assert_eq!(c.all_actions().count(), 2);
    }

    #[test]
    fn test_set_remove_refuses_last_set() {
        let commits = Arc::new(AtomicUsize::new(0));
        let notifier = EntityNotifier::new(Arc::new(ConnectionRegistry::new()));
        let mut model = StepModel::default();
        model.action_sets.insert(ActionSetId::Down, Vec::new());
        let counter = commits.clone();
        let mut c = ActionSetCollection::new(
            "bank:test",
            model,
            notifier,
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(!c.action_set_remove(&ActionSetId::Down));
        assert_eq!(c.action_set_ids(), vec![ActionSetId::Down]);
    }

    #[test]
    fn test_set_add_and_remove_updates_run_while_held() {
        let (mut c, _) = collection();
        let first = c.action_set_add();
        let second = c.action_set_add();
        assert_eq!(first, ActionSetId::Duration(1000));
        assert_eq!(second, ActionSetId::Duration(2000));

        assert!(c.action_set_run_while_held(&second, true));
        assert_eq!(c.run_while_held(), vec![2000]);
        assert!(!c.action_set_run_while_held(&ActionSetId::Up, true));

        assert!(c.action_set_remove(&second));
        assert!(c.run_while_held().is_empty());
        assert!(!c.action_set_remove(&ActionSetId::Duration(9999)));
    }

    #[test]
    fn test_set_rename_rules() {
        let (mut c, _) = collection();
        let first = c.action_set_add();
        let second = c.action_set_add();
        c.action_set_run_while_held(&first, true);

        assert!(!c.action_set_rename(&first, &second));
        assert!(!c.action_set_rename(&ActionSetId::Down, &ActionSetId::Duration(300)));
        assert!(!c.action_set_rename(&first, &ActionSetId::Up));
        assert_eq!(c.action_set_ids().len(), 4);

        assert!(c.action_set_rename(&first, &ActionSetId::Duration(300)));
        assert!(c.get_action_set(&ActionSetId::Duration(300)).is_some());
        assert!(c.get_action_set(&first).is_none());
        assert_eq!(c.run_while_held(), vec![300]);
    }

    #[test]
    fn test_forget_connection_is_idempotent() {
        let (mut c, _) = collection();
        c.action_add(&ActionSetId::Down, action("a"));
        c.action_add(&ActionSetId::Up, ActionEntity::new("c2", "b", EntityOptions::new()));

        assert!(c.forget_connection("c1"));
        assert!(!c.forget_connection("c1"));
        assert_eq!(c.all_actions().count(), 1);
    }

    #[test]
    fn test_verify_connection_ids_keeps_internal() {
        let (mut c, _) = collection();
        c.action_add(&ActionSetId::Down, action("a"));
        c.action_add(
            &ActionSetId::Down,
            ActionEntity::new(crate::controls::model::INTERNAL_CONNECTION, "wait", EntityOptions::new()),
        );
        let known: HashSet<String> = HashSet::new();
        assert!(c.verify_connection_ids(&known));
        assert_eq!(c.all_actions().count(), 1);
    }

    #[test]
    fn test_release_set_selection() {
        let (mut c, _) = collection();
        c.action_sets.insert(ActionSetId::Duration(500), Vec::new());
        c.action_sets.insert(ActionSetId::Duration(1500), Vec::new());

        assert_eq!(c.select_release_set(0), ActionSetId::Up);
        assert_eq!(c.select_release_set(1600), ActionSetId::Duration(1500));
        assert_eq!(c.select_release_set(1500), ActionSetId::Duration(500));
        assert_eq!(c.select_release_set(500), ActionSetId::Up);
    }

    #[test]
    fn test_rotary_sets_follow_option() {
        let (mut c, _) = collection();
        assert!(c.set_rotary(true));
        assert!(c.get_action_set(&ActionSetId::RotateLeft).is_some());
        assert!(!c.set_rotary(true));
        assert!(c.set_rotary(false));
        assert!(c.get_action_set(&ActionSetId::RotateRight).is_none());
    }

    proptest! {
        #[test]
        fn prop_threshold_is_greatest_strictly_below(
            thresholds in proptest::collection::vec(1u64..10_000, 0..8),
            duration in 0u64..12_000,
        ) {
            let selected = select_threshold(thresholds.iter().copied(), duration);
            match selected {
                Some(t) => {
                    prop_assert!(t < duration);
                    prop_assert!(thresholds.iter().all(|x| *x >= duration || *x <= t));
                }
                None => prop_assert!(thresholds.iter().all(|x| *x >= duration)),
            }
        }
    }
}
