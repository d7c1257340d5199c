//! deckhub - control-surface automation hub
//!
//! Loads the config, restores the store, attaches emulator surfaces and runs
//! the hub until CTRL+C.

use anyhow::{Context, Result};
use clap::Parser;
use deckhub::api::{self, ApiState};
use deckhub::cli::Args;
use deckhub::config::{AppConfig, ConfigWatcher, ConnectionKind};
use deckhub::connections::{ConnectionRegistry, ConsoleConnection};
use deckhub::hub::{Hub, HubHandle};
use deckhub::logging::init_logging;
use deckhub::page::PageStore;
use deckhub::paths::AppPaths;
use deckhub::store::{ControlStore, PersistenceActor};
use deckhub::surface::{EmulatorPanel, SurfaceController};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if args.print_schema {
        println!("{}", AppConfig::json_schema()?);
        return Ok(());
    }

    let mut paths = AppPaths::detect();
    if let Some(config) = &args.config {
        paths = paths.with_config(config);
    }
    paths.ensure_directories()?;

    let config_path = paths.config.to_string_lossy().to_string();
    let (mut config_watcher, initial_config) = ConfigWatcher::new(config_path.clone()).await?;
    if args.check_config {
        println!("{}: ok", config_path);
        return Ok(());
    }
    let mut config = (*initial_config).clone();

    let _log_guard = init_logging(&config.logging, args.log_level.as_deref())?;
    info!("Starting deckhub v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path);

    let paths = paths.with_data_dir(config.data_dir.as_deref());
    std::fs::create_dir_all(&paths.state_dir)
        .with_context(|| format!("Failed to create state directory: {}", paths.state_dir.display()))?;

    let store = ControlStore::open(paths.sled_db_path())?;
    let stored = store.load().context("Failed to load the store")?;
    let persistence = PersistenceActor::spawn(store, config.persistence.debounce_ms);

    let (handle, cmd_rx) = HubHandle::channel();
    let connections = Arc::new(ConnectionRegistry::new());
    for connection in &config.connections {
        match connection.kind {
            ConnectionKind::Console => connections.register(
                Arc::new(ConsoleConnection::new(
                    connection.id.clone(),
                    connection.label.clone(),
                    handle.connection_callbacks(),
                )),
                connection.enabled,
            ),
        }
    }

    let mut hub = Hub::new(
        handle.clone(),
        connections.clone(),
        PageStore::new(config.pages.count, config.grid.rows, config.grid.columns),
        SurfaceController::new(&config.groups, config.pages.startup_page),
        Some(persistence),
    );
    hub.load(stored);

    let mut emulators = Vec::new();
    for surface in &config.surfaces {
        let panel = Arc::new(EmulatorPanel::new(surface.id.clone(), surface.columns, surface.rows));
        hub.add_surface(panel.clone(), Some(surface));
        emulators.push(panel);
    }
    hub.start();
    let hub_task = hub.spawn(cmd_rx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api_task = if config.api.enabled {
        let state = Arc::new(ApiState::new(handle.clone(), emulators));
        let bind = config.api.bind.clone();
        let mut rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = api::start_server(state, &bind, shutdown).await {
                warn!("API server stopped: {:#}", e);
            }
        }))
    } else {
        None
    };

    info!("deckhub running, press CTRL+C to stop");
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to listen for CTRL+C: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
            reloaded = config_watcher.next_config() => {
                let Some(new_config) = reloaded else {
                    warn!("Config watcher closed, hot reload disabled");
                    continue;
                };
                apply_reload(&config, &new_config, &handle, &connections).await;
                config = new_config;
            }
        }
    }

    let _ = shutdown_tx.send(true);
    handle.shutdown();
    if let Err(e) = hub_task.await {
        warn!("Hub task failed: {}", e);
    }
    if let Some(task) = api_task {
        let _ = task.await;
    }

    info!("deckhub shutdown complete");
    Ok(())
}

/// Apply the parts of a reloaded config that can change at runtime
async fn apply_reload(old: &AppConfig, new: &AppConfig, hub: &HubHandle, connections: &ConnectionRegistry) {
    if old.grid != new.grid || old.pages != new.pages || old.data_dir != new.data_dir {
        warn!("Grid, page or data_dir changes take effect after a restart");
    }

    for connection in &new.connections {
        if !connections.contains(&connection.id) {
            warn!("New connection '{}' is added after a restart", connection.id);
            continue;
        }
        connections.set_enabled(&connection.id, connection.enabled);
        if connections.label_of(&connection.id).as_deref() != Some(connection.label.as_str()) {
            let id = connection.id.clone();
            let label = connection.label.clone();
            hub.invoke(move |hub| hub.rename_connection_label(&id, &label)).await;
        }
    }
    for connection in &old.connections {
        if !new.connections.iter().any(|c| c.id == connection.id) {
            let id = connection.id.clone();
            hub.invoke(move |hub| hub.remove_connection(&id)).await;
            info!("Connection '{}' removed", connection.id);
        }
    }

    let surfaces = new.surfaces.clone();
    hub.invoke(move |hub| hub.apply_surface_configs(&surfaces)).await;
}
