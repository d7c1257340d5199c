use super::ReferenceVisitor;
use crate::variables::parse::variable_ids_in;
use serde_json::Value;
use std::collections::HashSet;

/// Records every connection and variable a control mentions
#[derive(Debug, Default)]
pub struct ReferencesCollector {
    pub connection_ids: HashSet<String>,
    pub connection_labels: HashSet<String>,
    pub variable_ids: HashSet<String>,
}

impl ReferencesCollector {
    fn add_variable(&mut self, id: &str) {
        if let Some((label, _)) = id.split_once(':') {
            self.connection_labels.insert(label.to_string());
            self.variable_ids.insert(id.to_string());
        }
    }
}

impl ReferenceVisitor for ReferencesCollector {
    fn visit_connection_id(&mut self, value: &mut String, _feedback_id: Option<&str>) {
        self.connection_ids.insert(value.clone());
    }

    fn visit_connection_id_array(&mut self, values: &mut Vec<Value>, _feedback_id: Option<&str>) {
        self.connection_ids
            .extend(values.iter().filter_map(Value::as_str).map(str::to_string));
    }

    fn visit_string(&mut self, value: &mut String, _feedback_id: Option<&str>) {
        for id in variable_ids_in(value) {
            self.add_variable(&id);
        }
    }

    fn visit_variable_name(&mut self, value: &mut String, _feedback_id: Option<&str>) {
        self.add_variable(value);
    }
}
