//! Application path management for portable and installed modes.
//!
//! - **Portable mode**: a `.portable` marker next to the executable keeps the
//!   config, store and logs in that directory.
//! - **Installed mode** (default): everything lives under the platform data
//!   directory (`~/.local/share/deckhub`, `%APPDATA%\deckhub`, ...).
//!
//! The config file's `data_dir` moves the store and logs elsewhere.

use crate::config::AppConfig;
use anyhow::Context;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Application name used for directories in installed mode
const APP_NAME: &str = "deckhub";

const CONFIG_FILE: &str = "deckhub.yaml";

/// Application paths for config, state, and logs.
#[derive(Debug, Clone, PartialEq)]
pub struct AppPaths {
    pub config: PathBuf,
    /// Holds the sled database
    pub state_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub is_portable: bool,
}

impl AppPaths {
    /// Detect the appropriate paths based on environment.
    ///
    /// In debug builds a `deckhub.yaml` in the current directory wins, so
    /// `cargo run` uses the checkout's config.
    ///
    /// Called before logging is initialized; diagnostics go to stderr.
    pub fn detect() -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        #[cfg(debug_assertions)]
        {
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            if cwd.join(CONFIG_FILE).exists() {
                eprintln!("[paths] Running in DEV mode ({} found in {})", CONFIG_FILE, cwd.display());
                return Self::portable(&cwd);
            }
        }

        if exe_dir.join(".portable").exists() {
            #[cfg(debug_assertions)]
            eprintln!("[paths] Running in PORTABLE mode (.portable marker found)");
            return Self::portable(&exe_dir);
        }

        let app_data = dirs::data_dir()
            .unwrap_or_else(|| {
                eprintln!("[paths] WARNING: no platform data directory, falling back to exe dir");
                exe_dir.clone()
            })
            .join(APP_NAME);

        Self {
            config: app_data.join(CONFIG_FILE),
            state_dir: app_data.join("state"),
            logs_dir: app_data.join("logs"),
            is_portable: false,
        }
    }

    /// Everything inside one directory
    pub fn portable(dir: &Path) -> Self {
        Self {
            config: dir.join(CONFIG_FILE),
            state_dir: dir.join(".state"),
            logs_dir: dir.join("logs"),
            is_portable: true,
        }
    }

    /// Use an explicit config file; state stays where detection put it
    pub fn with_config(mut self, config: impl Into<PathBuf>) -> Self {
        self.config = config.into();
        self
    }

    /// Apply the config's `data_dir` override
    pub fn with_data_dir(mut self, data_dir: Option<&Path>) -> Self {
        if let Some(dir) = data_dir {
            self.state_dir = dir.join("state");
            self.logs_dir = dir.join("logs");
        }
        self
    }

    /// Create the state and logs directories and a default config if missing.
    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.state_dir, &self.logs_dir] {
            if !dir.exists() {
                debug!("Creating directory: {}", dir.display());
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
            }
        }

        if !self.config.exists() {
            if let Some(parent) = self.config.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
            }
            let yaml = serde_yaml::to_string(&AppConfig::default()).context("Failed to serialize default config")?;
            std::fs::write(&self.config, yaml)
                .with_context(|| format!("Failed to write default config to {}", self.config.display()))?;
            info!("Wrote default config to {}", self.config.display());
        }
        Ok(())
    }

    /// sled database path (within state_dir)
    pub fn sled_db_path(&self) -> PathBuf {
        self.state_dir.join("sled")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_portable_layout() {
        let paths = AppPaths::portable(Path::new("test"));
        assert!(paths.is_portable);
        assert_eq!(paths.config, PathBuf::from("test/deckhub.yaml"));
        assert_eq!(paths.sled_db_path(), PathBuf::from("test/.state/sled"));
    }

    #[test]
    fn test_data_dir_override() {
        let paths = AppPaths::portable(Path::new("a")).with_data_dir(Some(Path::new("/var/deckhub")));
        assert_eq!(paths.state_dir, PathBuf::from("/var/deckhub/state"));
        assert_eq!(paths.config, PathBuf::from("a/deckhub.yaml"));
    }

    #[test]
    fn test_ensure_directories_writes_default_config() {
        let temp = tempdir().unwrap();
        let paths = AppPaths::portable(temp.path());
        paths.ensure_directories().unwrap();

        assert!(paths.state_dir.is_dir());
        let written = std::fs::read_to_string(&paths.config).unwrap();
        assert_eq!(AppConfig::parse(&written).unwrap(), AppConfig::default());
    }
}
