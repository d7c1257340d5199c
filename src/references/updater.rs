use super::ReferenceVisitor;
use crate::variables::parse::replace_label;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Rewrites connection ids and variable labels in place
///
/// Used when a connection is renamed and when importing a control whose
/// connections map to different ids here.
#[derive(Debug, Default)]
pub struct ReferencesUpdater {
    connection_ids: HashMap<String, String>,
    labels: HashMap<String, String>,
    changed: bool,
    changed_feedback_ids: HashSet<String>,
}

impl ReferencesUpdater {
    pub fn new(connection_ids: HashMap<String, String>, labels: HashMap<String, String>) -> Self {
        Self {
            connection_ids,
            labels,
            ..Default::default()
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Feedbacks whose options changed; their connection must re-evaluate them
    pub fn changed_feedback_ids(&self) -> &HashSet<String> {
        &self.changed_feedback_ids
    }

    fn mark(&mut self, feedback_id: Option<&str>) {
        self.changed = true;
        if let Some(id) = feedback_id {
            self.changed_feedback_ids.insert(id.to_string());
        }
    }
}

impl ReferenceVisitor for ReferencesUpdater {
    fn visit_connection_id(&mut self, value: &mut String, feedback_id: Option<&str>) {
        if let Some(new_id) = self.connection_ids.get(value.as_str()) {
            *value = new_id.clone();
            self.mark(feedback_id);
        }
    }

    fn visit_connection_id_array(&mut self, values: &mut Vec<Value>, feedback_id: Option<&str>) {
        let mut changed = false;
        for item in values.iter_mut() {
            if let Some(new_id) = item.as_str().and_then(|id| self.connection_ids.get(id)) {
                *item = Value::from(new_id.clone());
                changed = true;
            }
        }
        if changed {
            self.mark(feedback_id);
        }
    }

    fn visit_string(&mut self, value: &mut String, feedback_id: Option<&str>) {
        let mut text = value.clone();
        for (old, new) in &self.labels {
            text = replace_label(&text, old, new);
        }
        if text != *value {
            *value = text;
            self.mark(feedback_id);
        }
    }

    fn visit_variable_name(&mut self, value: &mut String, feedback_id: Option<&str>) {
        let Some((label, name)) = value.split_once(':') else {
            return;
        };
        if let Some(new_label) = self.labels.get(label) {
            *value = format!("{}:{}", new_label, name);
            self.mark(feedback_id);
        }
    }
}
