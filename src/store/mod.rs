//! ControlStore - sled-backed tables for controls, pages and custom variables
//!
//! Each table is its own sled tree holding JSON values keyed by id. Reads
//! happen once at startup through [`ControlStore::load`]; every later write
//! goes through the debounced [`PersistenceActor`].

pub mod persistence_actor;

pub use persistence_actor::{PersistenceActor, PersistenceActorHandle, PersistenceCommand, DEFAULT_DEBOUNCE_MS};

use crate::controls::model::{ControlId, ControlModel, RuntimeModel};
use crate::page::PageModel;
use crate::variables::CustomVariable;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use tracing::{debug, info, warn};

/// One table of the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreTree {
    Controls,
    Runtime,
    Pages,
    CustomVariables,
}

impl StoreTree {
    pub const ALL: [StoreTree; 4] = [
        StoreTree::Controls,
        StoreTree::Runtime,
        StoreTree::Pages,
        StoreTree::CustomVariables,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StoreTree::Controls => "controls",
            StoreTree::Runtime => "runtime",
            StoreTree::Pages => "pages",
            StoreTree::CustomVariables => "custom_variables",
        }
    }
}

impl fmt::Display for StoreTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Custom variable definition plus its last value when it persists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCustomVariable {
    #[serde(flatten)]
    pub definition: CustomVariable,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<Value>,
}

/// Everything restored at startup
#[derive(Debug, Default)]
pub struct StoredState {
    pub controls: Vec<(ControlId, ControlModel, Option<RuntimeModel>)>,
    pub pages: BTreeMap<u32, PageModel>,
    pub custom_variables: BTreeMap<String, CustomVariable>,
    pub custom_values: HashMap<String, Value>,
}

/// Handle to the sled database
///
/// Cheap to clone; sled trees are internally reference counted.
#[derive(Clone)]
pub struct ControlStore {
    db: sled::Db,
}

impl ControlStore {
    /// Open (or create) the database directory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path)
            .with_context(|| format!("Failed to open sled database at: {}", path.display()))?;
        info!("Store opened at: {}", path.display());
        Ok(Self { db })
    }

    fn tree(&self, tree: StoreTree) -> Result<sled::Tree> {
        self.db
            .open_tree(tree.name())
            .with_context(|| format!("Failed to open sled tree '{}'", tree))
    }

    pub fn put(&self, tree: StoreTree, key: &str, value: &[u8]) -> Result<()> {
        self.tree(tree)?
            .insert(key.as_bytes(), value)
            .with_context(|| format!("Failed to write '{}' into '{}'", key, tree))?;
        Ok(())
    }

    pub fn remove(&self, tree: StoreTree, key: &str) -> Result<()> {
        self.tree(tree)?
            .remove(key.as_bytes())
            .with_context(|| format!("Failed to remove '{}' from '{}'", key, tree))?;
        Ok(())
    }

    /// Apply a set of writes (`None` deletes) and flush to disk
    pub fn apply(&self, writes: Vec<((StoreTree, String), Option<Vec<u8>>)>) -> Result<usize> {
        let mut batches: BTreeMap<StoreTree, sled::Batch> = BTreeMap::new();
        let count = writes.len();
        for ((tree, key), value) in writes {
            let batch = batches.entry(tree).or_default();
            match value {
                Some(bytes) => batch.insert(key.as_bytes(), bytes),
                None => batch.remove(key.as_bytes()),
            }
        }
        for (tree, batch) in batches {
            self.tree(tree)?
                .apply_batch(batch)
                .with_context(|| format!("Failed to apply batch to '{}'", tree))?;
        }
        self.flush()?;
        Ok(count)
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush().context("Failed to flush sled database")?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, tree: StoreTree, key: &str) -> Result<Option<T>> {
        let Some(bytes) = self.tree(tree)?.get(key.as_bytes())? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Corrupt entry '{}' in '{}'", key, tree))?;
        Ok(Some(value))
    }

    /// Every decodable entry of a tree; corrupt entries are logged and skipped
    fn read_tree<T: DeserializeOwned>(&self, tree: StoreTree) -> Result<Vec<(String, T)>> {
        let mut entries = Vec::new();
        for item in self.tree(tree)?.iter() {
            let (key, bytes) = item.with_context(|| format!("Failed to iterate '{}'", tree))?;
            let key = String::from_utf8_lossy(&key).into_owned();
            match serde_json::from_slice::<T>(&bytes) {
                Ok(value) => entries.push((key, value)),
                Err(e) => warn!("Skipping corrupt entry '{}' in '{}': {}", key, tree, e),
            }
        }
        Ok(entries)
    }

    /// Load every table
    pub fn load(&self) -> Result<StoredState> {
        let mut runtime: HashMap<String, RuntimeModel> = self.read_tree(StoreTree::Runtime)?.into_iter().collect();
        let controls = self
            .read_tree::<ControlModel>(StoreTree::Controls)?
            .into_iter()
            .map(|(id, model)| {
                let rt = runtime.remove(&id);
                (id, model, rt)
            })
            .collect::<Vec<_>>();

        let mut pages = BTreeMap::new();
        for (key, page) in self.read_tree::<PageModel>(StoreTree::Pages)? {
            match key.parse::<u32>() {
                Ok(number) => {
                    pages.insert(number, page);
                }
                Err(_) => warn!("Skipping page with invalid number '{}'", key),
            }
        }

        let mut custom_variables = BTreeMap::new();
        let mut custom_values = HashMap::new();
        for (name, stored) in self.read_tree::<StoredCustomVariable>(StoreTree::CustomVariables)? {
            if let Some(value) = stored.current_value {
                custom_values.insert(name.clone(), value);
            }
            custom_variables.insert(name, stored.definition);
        }

        debug!(
            controls = controls.len(),
            pages = pages.len(),
            custom_variables = custom_variables.len(),
            "Store loaded"
        );
        Ok(StoredState {
            controls,
            pages,
            custom_variables,
            custom_values,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::model::ButtonModel;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_load_pairs_runtime_with_controls() {
        let temp = tempdir().unwrap();
        let store = ControlStore::open(temp.path().join("db")).unwrap();

        let model = serde_json::to_vec(&ControlModel::Button(ButtonModel::default())).unwrap();
        let runtime = serde_json::to_vec(&RuntimeModel {
            current_step_id: Some("0".to_string()),
            last_executed: None,
        })
        .unwrap();
        store
            .apply(vec![
                ((StoreTree::Controls, "bank:a".to_string()), Some(model.clone())),
                ((StoreTree::Controls, "bank:b".to_string()), Some(model)),
                ((StoreTree::Runtime, "bank:a".to_string()), Some(runtime)),
            ])
            .unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.controls.len(), 2);
        let a = state.controls.iter().find(|(id, _, _)| id == "bank:a").unwrap();
        assert_eq!(a.2.as_ref().and_then(|r| r.current_step_id.as_deref()), Some("0"));
        let b = state.controls.iter().find(|(id, _, _)| id == "bank:b").unwrap();
        assert!(b.2.is_none());
    }

    #[test]
    fn test_corrupt_entries_are_skipped() {
        let temp = tempdir().unwrap();
        let store = ControlStore::open(temp.path().join("db")).unwrap();
        store.put(StoreTree::Controls, "bank:bad", b"not json").unwrap();
        store.put(StoreTree::Pages, "one", b"{}").unwrap();

        let state = store.load().unwrap();
        assert!(state.controls.is_empty());
        assert!(state.pages.is_empty());
    }

    #[test]
    fn test_custom_variable_value_only_when_stored() {
        let temp = tempdir().unwrap();
        let store = ControlStore::open(temp.path().join("db")).unwrap();
        let kept = StoredCustomVariable {
            definition: CustomVariable {
                description: String::new(),
                default_value: json!(0),
                persist_current_value: true,
            },
            current_value: Some(json!(7)),
        };
        store
            .put(StoreTree::CustomVariables, "counter", &serde_json::to_vec(&kept).unwrap())
            .unwrap();

        let state = store.load().unwrap();
        assert!(state.custom_variables["counter"].persist_current_value);
        assert_eq!(state.custom_values.get("counter"), Some(&json!(7)));
    }

    #[test]
    fn test_apply_deletes() {
        let temp = tempdir().unwrap();
        let store = ControlStore::open(temp.path().join("db")).unwrap();
        store.put(StoreTree::Pages, "1", br#"{"name":"ONE"}"#).unwrap();
        store.apply(vec![((StoreTree::Pages, "1".to_string()), None)]).unwrap();
        assert!(store.get::<PageModel>(StoreTree::Pages, "1").unwrap().is_none());
    }
}
