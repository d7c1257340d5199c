//! Configuration file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::AppConfig;

/// Wait for writes to settle before re-reading
const RELOAD_DELAY: Duration = Duration::from_millis(100);

/// Config watcher that monitors file changes and sends reloaded configs
///
/// A file that fails to parse or validate is logged and skipped; the previous
/// configuration stays in effect.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<AppConfig>,
}

impl ConfigWatcher {
    /// Load the file and start watching it
    pub async fn new(config_path: String) -> Result<(Self, Arc<AppConfig>)> {
        let (tx, rx) = mpsc::channel(10);

        let initial_config = AppConfig::load(&config_path)
            .await
            .context("Failed to load initial config")?;
        let initial_config = Arc::new(initial_config);

        let config_path_clone = config_path.clone();

        // notify callbacks run on their own OS thread
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    debug!("Config file changed: {:?}", event.paths);
                    let config_path = config_path_clone.clone();
                    let tx = tx.clone();

                    runtime_handle.spawn(async move {
                        tokio::time::sleep(RELOAD_DELAY).await;
                        match AppConfig::load(&config_path).await {
                            Ok(new_config) => {
                                info!("Configuration reloaded");
                                if let Err(e) = tx.send(new_config).await {
                                    error!("Failed to send config update: {}", e);
                                }
                            }
                            Err(e) => {
                                warn!("Failed to reload config (keeping old config): {:#}", e);
                            }
                        }
                    });
                }
            }
            Err(e) => {
                error!("Watch error: {}", e);
            }
        })?;

        watcher
            .watch(Path::new(&config_path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch config file: {}", config_path))?;

        info!("Config file watcher started for: {}", config_path);

        Ok((Self { _watcher: watcher, rx }, initial_config))
    }

    /// Wait for the next config update
    ///
    /// Returns `None` once the watcher has been closed.
    pub async fn next_config(&mut self) -> Option<AppConfig> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_watcher_reloads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("deckhub.yaml");

        fs::write(
            &config_path,
            r#"
surfaces:
  - id: emu
    brightness: 50
"#,
        )?;

        let (mut watcher, config) = ConfigWatcher::new(config_path.to_string_lossy().to_string()).await?;
        assert_eq!(config.surfaces[0].brightness, 50);

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(
            &config_path,
            r#"
surfaces:
  - id: emu
    brightness: 80
"#,
        )?;

        let new_config = tokio::time::timeout(Duration::from_secs(2), watcher.next_config()).await?;
        if let Some(new_config) = new_config {
            assert_eq!(new_config.surfaces[0].brightness, 80);
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("absent.yaml");
        assert!(ConfigWatcher::new(missing.to_string_lossy().to_string()).await.is_err());
    }
}
