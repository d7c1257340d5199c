//! Connection host: the third-party integrations actions run against
//!
//! Every connection implements [`Connection`]. The [`ConnectionRegistry`] holds
//! at most one live instance per connection id and is the single lookup used by
//! controls (`get_child`).

use crate::controls::model::{ActionEntity, EntityOptions, FeedbackEntity, PresetDefinition};
use crate::controls::runner::RunActionExtras;
use crate::error::ConnectionError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub mod console;

pub use console::ConsoleConnection;

/// A feedback value computed by a connection
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackValueUpdate {
    pub id: String,
    pub control_id: String,
    pub value: Value,
}

/// Reported health of a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Ok,
    Warning,
    Error,
    Disabled,
}

/// Callback for computed feedback values: `(connection_id, updates)`
pub type FeedbackValuesCallback = Arc<dyn Fn(String, Vec<FeedbackValueUpdate>) + Send + Sync>;

/// Callback for published variables: `(connection_id, [(name, value)])`
pub type VariableValuesCallback = Arc<dyn Fn(String, Vec<(String, Value)>) + Send + Sync>;

/// Callback for status changes: `(connection_id, status)`
pub type StatusCallback = Arc<dyn Fn(String, ConnectionStatus) + Send + Sync>;

/// Channels a connection uses to report back to the hub
#[derive(Clone)]
pub struct ConnectionCallbacks {
    pub feedback_values: FeedbackValuesCallback,
    pub variable_values: VariableValuesCallback,
    pub status: StatusCallback,
}

impl ConnectionCallbacks {
    /// Callbacks that drop everything
    pub fn noop() -> Self {
        Self {
            feedback_values: Arc::new(|_, _| {}),
            variable_values: Arc::new(|_, _| {}),
            status: Arc::new(|_, _| {}),
        }
    }
}

/// Connection trait - all integrations implement this
///
/// All methods take `&self` to support `Arc<dyn Connection>`; implementations
/// use interior mutability for their state.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Stable connection id
    fn id(&self) -> &str;

    /// Label used in variable references (`$(label:name)`)
    fn label(&self) -> &str;

    /// Run one action
    async fn execute_action(
        &self,
        action: &ActionEntity,
        extras: &RunActionExtras,
    ) -> Result<(), ConnectionError>;

    /// An action was added or changed on a control
    async fn action_update(
        &self,
        _action: &ActionEntity,
        _control_id: &str,
    ) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// An action was removed or disabled
    async fn action_delete(&self, _action: &ActionEntity) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Ask the connection for option values matching its current state
    async fn action_learn_values(
        &self,
        _action: &ActionEntity,
        _control_id: &str,
    ) -> Result<Option<EntityOptions>, ConnectionError> {
        Ok(None)
    }

    /// A feedback was added or changed; the connection should (re)compute it
    async fn feedback_update(
        &self,
        _feedback: &FeedbackEntity,
        _control_id: &str,
    ) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// A feedback was removed or disabled
    async fn feedback_delete(&self, _feedback: &FeedbackEntity) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Button presets published by this connection
    fn presets(&self) -> Vec<PresetDefinition> {
        Vec::new()
    }

    fn status(&self) -> ConnectionStatus {
        ConnectionStatus::Ok
    }
}

struct ConnectionEntry {
    instance: Arc<dyn Connection>,
    label: String,
    enabled: bool,
}

/// Registry of live connection instances, at most one per id
#[derive(Default)]
pub struct ConnectionRegistry {
    children: DashMap<String, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance, replacing any previous instance with the same id
    pub fn register(&self, instance: Arc<dyn Connection>, enabled: bool) {
        let id = instance.id().to_string();
        let label = instance.label().to_string();
        info!("🔌 Connection '{}' registered (label: {})", id, label);
        self.children.insert(
            id,
            ConnectionEntry {
                instance,
                label,
                enabled,
            },
        );
    }

    pub fn unregister(&self, connection_id: &str) -> bool {
        let removed = self.children.remove(connection_id).is_some();
        if removed {
            debug!("Connection '{}' unregistered", connection_id);
        }
        removed
    }

    /// Live instance for a connection id, if it exists and is enabled
    pub fn get_child(&self, connection_id: &str) -> Option<Arc<dyn Connection>> {
        self.children
            .get(connection_id)
            .filter(|entry| entry.enabled)
            .map(|entry| entry.instance.clone())
    }

    pub fn contains(&self, connection_id: &str) -> bool {
        self.children.contains_key(connection_id)
    }

    /// Ids of every registered connection (enabled or not)
    pub fn ids(&self) -> HashSet<String> {
        self.children.iter().map(|e| e.key().clone()).collect()
    }

    pub fn is_enabled(&self, connection_id: &str) -> bool {
        self.children
            .get(connection_id)
            .map(|e| e.enabled)
            .unwrap_or(false)
    }

    /// Enable or disable a connection; returns whether it changed
    pub fn set_enabled(&self, connection_id: &str, enabled: bool) -> bool {
        match self.children.get_mut(connection_id) {
            Some(mut entry) if entry.enabled != enabled => {
                entry.enabled = enabled;
                info!(
                    "Connection '{}' {}",
                    connection_id,
                    if enabled { "enabled" } else { "disabled" }
                );
                true
            }
            _ => false,
        }
    }

    pub fn label_of(&self, connection_id: &str) -> Option<String> {
        self.children.get(connection_id).map(|e| e.label.clone())
    }

    pub fn id_for_label(&self, label: &str) -> Option<String> {
        self.children
            .iter()
            .find(|e| e.label == label)
            .map(|e| e.key().clone())
    }

    /// Rename a connection label; returns the previous label
    pub fn set_label(&self, connection_id: &str, label: impl Into<String>) -> Option<String> {
        let mut entry = self.children.get_mut(connection_id)?;
        Some(std::mem::replace(&mut entry.label, label.into()))
    }

    pub fn status(&self, connection_id: &str) -> Option<ConnectionStatus> {
        self.children.get(connection_id).map(|e| {
            if e.enabled {
                e.instance.status()
            } else {
                ConnectionStatus::Disabled
            }
        })
    }

    pub fn presets(&self, connection_id: &str) -> Vec<PresetDefinition> {
        self.get_child(connection_id)
            .map(|c| c.presets())
            .unwrap_or_default()
    }
}
