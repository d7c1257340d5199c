//! Variable values, text substitution and expression evaluation
//!
//! Values are keyed by connection label and variable name; the full id of a
//! variable is `label:name`. Custom (user-defined) variables live under the
//! `custom` label. Every setter returns the set of full ids that changed, so
//! the caller can fan the change out to controls and feedbacks.

pub mod expression;
pub mod parse;

use crate::error::ExpressionError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, trace};

pub use expression::{is_truthy, value_to_text};
pub use parse::{ParsedText, RECURSION_GUARD_VALUE, UNKNOWN_VALUE};

/// Label used by user-defined variables
pub const CUSTOM_LABEL: &str = "custom";

/// Label used by variables of the internal pseudo-connection
pub const INTERNAL_LABEL: &str = "internal";

/// Values injected for one evaluation (`this:`, `local:`, recursion guards)
pub type VariableOverrides = HashMap<String, Value>;

/// Result of an expression evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionResult {
    pub value: Value,
    pub variable_ids: HashSet<String>,
}

/// User-defined variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomVariable {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub default_value: Value,
    #[serde(default)]
    pub persist_current_value: bool,
}

fn split_id(id: &str) -> Option<(&str, &str)> {
    id.split_once(':')
}

/// Owned store of every variable value
#[derive(Debug, Default)]
pub struct VariablesController {
    values: HashMap<String, HashMap<String, Value>>,
    custom: BTreeMap<String, CustomVariable>,
}

impl VariablesController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `label:name`
    pub fn get_value(&self, id: &str) -> Option<&Value> {
        let (label, name) = split_id(id)?;
        self.values.get(label)?.get(name)
    }

    /// Set values for one label. `Value::Null` unsets a variable.
    pub fn set_variable_values<I>(&mut self, label: &str, values: I) -> HashSet<String>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        let mut changed = HashSet::new();
        let store = self.values.entry(label.to_string()).or_default();
        for (name, value) in values {
            let differs = if value.is_null() {
                store.remove(&name).is_some()
            } else {
                store.insert(name.clone(), value.clone()).as_ref() != Some(&value)
            };
            if differs {
                changed.insert(format!("{}:{}", label, name));
            }
        }
        if !changed.is_empty() {
            trace!("{} variable(s) changed for '{}'", changed.len(), label);
        }
        changed
    }

    /// Drop every variable of a label (connection removed)
    pub fn forget_label(&mut self, label: &str) -> HashSet<String> {
        self.values
            .remove(label)
            .map(|vars| {
                vars.into_keys()
                    .map(|name| format!("{}:{}", label, name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Move every variable of `old` to `new` (connection label renamed)
    pub fn rename_label(&mut self, old: &str, new: &str) -> HashSet<String> {
        let Some(vars) = self.values.remove(old) else {
            return HashSet::new();
        };
        let mut changed = HashSet::new();
        for name in vars.keys() {
            changed.insert(format!("{}:{}", old, name));
            changed.insert(format!("{}:{}", new, name));
        }
        self.values.entry(new.to_string()).or_default().extend(vars);
        debug!("Renamed variable label '{}' -> '{}'", old, new);
        changed
    }

    fn lookup(&self, id: &str, overrides: &VariableOverrides) -> Option<Value> {
        overrides
            .get(id)
            .cloned()
            .or_else(|| self.get_value(id).cloned())
    }

    /// Substitute `$(label:name)` references in a string
    pub fn parse_variables(&self, text: &str, overrides: &VariableOverrides) -> ParsedText {
        parse::substitute(text, &mut |id| {
            self.lookup(id, overrides).map(|v| value_to_text(&v))
        })
    }

    /// Evaluate an expression, recording the variables it read
    pub fn execute_expression(
        &self,
        input: &str,
        overrides: &VariableOverrides,
    ) -> Result<ExpressionResult, ExpressionError> {
        let expr = expression::parse(input)?;
        let mut variable_ids = HashSet::new();
        let value = expression::evaluate(&expr, &mut |id| {
            variable_ids.insert(id.to_string());
            self.lookup(id, overrides).unwrap_or(Value::Null)
        })?;
        Ok(ExpressionResult {
            value,
            variable_ids,
        })
    }

    // =========================================================================
    // Custom variables
    // =========================================================================

    pub fn custom_variables(&self) -> &BTreeMap<String, CustomVariable> {
        &self.custom
    }

    pub fn is_custom_variable(&self, name: &str) -> bool {
        self.custom.contains_key(name)
    }

    /// Restore definitions and (for persisted ones) their last value
    pub fn load_custom_variables(
        &mut self,
        definitions: BTreeMap<String, CustomVariable>,
        stored_values: HashMap<String, Value>,
    ) -> HashSet<String> {
        let mut initial = Vec::new();
        for (name, def) in &definitions {
            let value = if def.persist_current_value {
                stored_values
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| def.default_value.clone())
            } else {
                def.default_value.clone()
            };
            initial.push((name.clone(), value));
        }
        self.custom = definitions;
        self.set_variable_values(CUSTOM_LABEL, initial)
    }

    /// Create a custom variable; refused when the name is taken or invalid
    pub fn create_custom_variable(&mut self, name: &str, default_value: Value) -> bool {
        if name.is_empty()
            || !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
            || self.custom.contains_key(name)
        {
            return false;
        }
        self.custom.insert(
            name.to_string(),
            CustomVariable {
                description: String::new(),
                default_value: default_value.clone(),
                persist_current_value: false,
            },
        );
        self.set_variable_values(CUSTOM_LABEL, [(name.to_string(), default_value)]);
        true
    }

    pub fn delete_custom_variable(&mut self, name: &str) -> HashSet<String> {
        if self.custom.remove(name).is_none() {
            return HashSet::new();
        }
        self.set_variable_values(CUSTOM_LABEL, [(name.to_string(), Value::Null)])
    }

    /// Set the current value; `None` when the variable does not exist
    pub fn set_custom_variable_value(
        &mut self,
        name: &str,
        value: Value,
    ) -> Option<HashSet<String>> {
        if !self.custom.contains_key(name) {
            return None;
        }
        Some(self.set_variable_values(CUSTOM_LABEL, [(name.to_string(), value)]))
    }

    pub fn reset_custom_variable(&mut self, name: &str) -> Option<HashSet<String>> {
        let default = self.custom.get(name)?.default_value.clone();
        Some(self.set_variable_values(CUSTOM_LABEL, [(name.to_string(), default)]))
    }

    pub fn set_custom_variable_persistence(&mut self, name: &str, persist: bool) -> bool {
        match self.custom.get_mut(name) {
            Some(def) => {
                def.persist_current_value = persist;
                true
            }
            None => false,
        }
    }

    /// Current values of custom variables that persist across restarts
    pub fn persisted_custom_values(&self) -> HashMap<String, Value> {
        self.custom
            .iter()
            .filter(|(_, def)| def.persist_current_value)
            .filter_map(|(name, _)| {
                self.get_value(&format!("{}:{}", CUSTOM_LABEL, name))
                    .map(|v| (name.clone(), v.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_values_reports_changes_only() {
        let mut vars = VariablesController::new();
        let changed = vars.set_variable_values("obs", [("scene".to_string(), json!("Wide"))]);
        assert!(changed.contains("obs:scene"));

        let changed = vars.set_variable_values("obs", [("scene".to_string(), json!("Wide"))]);
        assert!(changed.is_empty());

        let changed = vars.set_variable_values("obs", [("scene".to_string(), Value::Null)]);
        assert!(changed.contains("obs:scene"));
        assert!(vars.get_value("obs:scene").is_none());
    }

    #[test]
    fn test_overrides_take_priority() {
        let mut vars = VariablesController::new();
        vars.set_variable_values("this", [("page".to_string(), json!(1))]);
        let mut overrides = VariableOverrides::new();
        overrides.insert("this:page".to_string(), json!(3));

        let parsed = vars.parse_variables("P$(this:page)", &overrides);
        assert_eq!(parsed.text, "P3");
    }

    #[test]
    fn test_expression_records_variables() {
        let mut vars = VariablesController::new();
        vars.create_custom_variable("count", json!(2));
        let result = vars
            .execute_expression("$(custom:count) + 1", &VariableOverrides::new())
            .unwrap();
        assert_eq!(result.value, json!(3));
        assert!(result.variable_ids.contains("custom:count"));
    }

    #[test]
    fn test_custom_variable_lifecycle() {
        let mut vars = VariablesController::new();
        assert!(vars.create_custom_variable("level", json!(0)));
        assert!(!vars.create_custom_variable("level", json!(1)));
        assert!(!vars.create_custom_variable("bad name", json!(1)));

        let changed = vars.set_custom_variable_value("level", json!(5)).unwrap();
        assert!(changed.contains("custom:level"));
        assert!(vars.set_custom_variable_value("missing", json!(5)).is_none());

        vars.reset_custom_variable("level");
        assert_eq!(vars.get_value("custom:level"), Some(&json!(0)));

        let removed = vars.delete_custom_variable("level");
        assert!(removed.contains("custom:level"));
        assert!(!vars.is_custom_variable("level"));
    }

    #[test]
    fn test_persisted_custom_values_restore() {
        let mut vars = VariablesController::new();
        let mut defs = BTreeMap::new();
        defs.insert(
            "kept".to_string(),
            CustomVariable {
                description: String::new(),
                default_value: json!(0),
                persist_current_value: true,
            },
        );
        defs.insert(
            "fresh".to_string(),
            CustomVariable {
                description: String::new(),
                default_value: json!("x"),
                persist_current_value: false,
            },
        );
        let mut stored = HashMap::new();
        stored.insert("kept".to_string(), json!(42));
        stored.insert("fresh".to_string(), json!("stale"));

        vars.load_custom_variables(defs, stored);
        assert_eq!(vars.get_value("custom:kept"), Some(&json!(42)));
        assert_eq!(vars.get_value("custom:fresh"), Some(&json!("x")));
        assert_eq!(vars.persisted_custom_values().len(), 1);
    }

    #[test]
    fn test_rename_label_moves_values() {
        let mut vars = VariablesController::new();
        vars.set_variable_values("cam1", [("zoom".to_string(), json!(3))]);
        let changed = vars.rename_label("cam1", "camA");
        assert!(changed.contains("cam1:zoom"));
        assert!(changed.contains("camA:zoom"));
        assert_eq!(vars.get_value("camA:zoom"), Some(&json!(3)));
    }
}
