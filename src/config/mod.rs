//! Configuration management for deckhub
//!
//! Handles loading, parsing, validation and hot-reloading of the YAML
//! configuration file. Controls, pages and custom variables are not part of
//! the file; they live in the store and are edited at runtime.

pub mod watcher;

use anyhow::{Context, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::fs;

pub use watcher::ConfigWatcher;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    pub grid: GridConfig,
    pub pages: PagesConfig,
    /// Overrides the platform data directory for the store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    pub logging: LoggingConfig,
    pub api: ApiConfig,
    pub connections: Vec<ConnectionConfig>,
    pub surfaces: Vec<SurfaceConfig>,
    pub groups: Vec<GroupConfig>,
    pub persistence: PersistenceConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            grid: GridConfig::default(),
            pages: PagesConfig::default(),
            data_dir: None,
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            connections: vec![ConnectionConfig {
                id: "console".to_string(),
                label: "console".to_string(),
                kind: ConnectionKind::Console,
                enabled: true,
            }],
            surfaces: vec![SurfaceConfig {
                id: "emulator".to_string(),
                name: Some("Emulator".to_string()),
                group: None,
                brightness: default_brightness(),
                columns: default_columns(),
                rows: default_rows(),
            }],
            groups: Vec::new(),
            persistence: PersistenceConfig::default(),
        }
    }
}

/// Button grid dimensions shared by every page
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct GridConfig {
    #[serde(default = "default_rows")]
    pub rows: i32,
    #[serde(default = "default_columns")]
    pub columns: i32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            rows: default_rows(),
            columns: default_columns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PagesConfig {
    #[serde(default = "default_page_count")]
    pub count: u32,
    /// Page shown by surfaces outside any configured group
    #[serde(default = "default_startup_page")]
    pub startup_page: u32,
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            count: default_page_count(),
            startup_page: default_startup_page(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the compact format
    #[serde(default)]
    pub json: bool,
    /// Also write daily rolling files here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_bind")]
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_api_bind(),
        }
    }
}

/// Kind of connection to instantiate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionKind {
    Console,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct ConnectionConfig {
    pub id: String,
    /// Prefix of the connection's variables (`$(label:name)`)
    pub label: String,
    #[serde(default = "default_connection_kind")]
    pub kind: ConnectionKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// One surface (emulator panel)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct SurfaceConfig {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Group sharing page and lock; ungrouped surfaces get their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default = "default_columns")]
    pub columns: i32,
    #[serde(default = "default_rows")]
    pub rows: i32,
}

/// Surfaces that share a page and a lockout
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct GroupConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_startup_page")]
    pub startup_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin: Option<String>,
    /// Lock after this many idle seconds (requires a PIN)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pin_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PersistenceConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file with validation
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;
        Self::parse(&contents).with_context(|| format!("Invalid config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = if contents.trim().is_empty() {
            AppConfig::default()
        } else {
            serde_yaml::from_str(contents).context("Failed to parse YAML config")?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;
        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path))?;
        Ok(())
    }

    /// JSON schema of the configuration file
    pub fn json_schema() -> Result<String> {
        let schema = schemars::schema_for!(AppConfig);
        serde_json::to_string_pretty(&schema).context("Failed to serialize config schema")
    }

    /// Validate configuration for correctness and consistency
    pub fn validate(&self) -> Result<()> {
        if self.grid.rows < 1 || self.grid.columns < 1 {
            anyhow::bail!(
                "Grid must have at least one row and column (got {}x{})",
                self.grid.columns,
                self.grid.rows
            );
        }
        if self.pages.count < 1 {
            anyhow::bail!("At least one page must be defined");
        }
        self.check_page("pages.startup_page", self.pages.startup_page)?;

        let mut ids = HashSet::new();
        let mut labels = HashSet::new();
        for connection in &self.connections {
            if connection.id.is_empty() {
                anyhow::bail!("Connection id cannot be empty");
            }
            if connection.id == crate::controls::model::INTERNAL_CONNECTION {
                anyhow::bail!("Connection id '{}' is reserved", connection.id);
            }
            if !ids.insert(&connection.id) {
                anyhow::bail!("Duplicate connection id '{}'", connection.id);
            }
            if !is_valid_label(&connection.label) {
                anyhow::bail!(
                    "Connection '{}' has invalid label '{}' (letters, digits, '-' and '_' only)",
                    connection.id,
                    connection.label
                );
            }
            if matches!(
                connection.label.as_str(),
                crate::variables::INTERNAL_LABEL | crate::variables::CUSTOM_LABEL
            ) {
                anyhow::bail!("Connection label '{}' is reserved", connection.label);
            }
            if !labels.insert(&connection.label) {
                anyhow::bail!("Duplicate connection label '{}'", connection.label);
            }
        }

        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if group.id.is_empty() {
                anyhow::bail!("Group id cannot be empty");
            }
            if !group_ids.insert(&group.id) {
                anyhow::bail!("Duplicate group id '{}'", group.id);
            }
            self.check_page(&format!("groups.{}.startup_page", group.id), group.startup_page)?;
            if group.pin_timeout_secs.is_some() && group.pin.as_deref().unwrap_or("").is_empty() {
                anyhow::bail!("Group '{}' sets pin_timeout_secs without a pin", group.id);
            }
        }

        let mut surface_ids = HashSet::new();
        for surface in &self.surfaces {
            if surface.id.is_empty() {
                anyhow::bail!("Surface id cannot be empty");
            }
            if !surface_ids.insert(&surface.id) {
                anyhow::bail!("Duplicate surface id '{}'", surface.id);
            }
            if surface.brightness > 100 {
                anyhow::bail!(
                    "Surface '{}' has invalid brightness {} (must be 0-100)",
                    surface.id,
                    surface.brightness
                );
            }
            if surface.columns < 1 || surface.rows < 1 {
                anyhow::bail!("Surface '{}' must have at least one key", surface.id);
            }
            if let Some(group) = &surface.group {
                if !group_ids.contains(group) {
                    anyhow::bail!("Surface '{}' refers to unknown group '{}'", surface.id, group);
                }
            }
        }

        Ok(())
    }

    fn check_page(&self, field: &str, page: u32) -> Result<()> {
        if page < 1 || page > self.pages.count {
            anyhow::bail!("{} is {} but pages run from 1 to {}", field, page, self.pages.count);
        }
        Ok(())
    }

    pub fn surface(&self, surface_id: &str) -> Option<&SurfaceConfig> {
        self.surfaces.iter().find(|s| s.id == surface_id)
    }
}

fn is_valid_label(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// Default value functions
fn default_true() -> bool { true }
fn default_rows() -> i32 { 4 }
fn default_columns() -> i32 { 8 }
fn default_page_count() -> u32 { 99 }
fn default_startup_page() -> u32 { 1 }
fn default_log_level() -> String { "info".to_string() }
fn default_api_bind() -> String { "127.0.0.1:8000".to_string() }
fn default_connection_kind() -> ConnectionKind { ConnectionKind::Console }
fn default_brightness() -> u8 { 100 }
fn default_debounce_ms() -> u64 { crate::store::DEFAULT_DEBOUNCE_MS }
