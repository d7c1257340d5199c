//! Persistence actor for debounced writes to the control store
//!
//! Writes are queued per `(tree, key)` and flushed together once the debounce
//! window has passed without a new write. Within the window the last write to
//! a key wins, so a control edited many times in a burst hits the disk once.
//!
//! ```ignore
//! let store = ControlStore::open("./data/deckhub.sled")?;
//! let handle = PersistenceActor::spawn(store, 500);
//!
//! handle.save_control("bank:abc", &model);
//! handle.flush().await?;
//! handle.shutdown();
//! ```

use super::{ControlStore, StoreTree, StoredCustomVariable};
use crate::controls::model::{ControlModel, RuntimeModel};
use crate::page::PageModel;
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{error, info, trace, warn};

/// Default debounce window in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

type WriteKey = (StoreTree, String);

/// Commands sent to the persistence actor
#[derive(Debug)]
pub enum PersistenceCommand {
    /// Queue a value (debounced)
    Put {
        tree: StoreTree,
        key: String,
        value: Vec<u8>,
    },
    /// Queue a removal (debounced)
    Delete { tree: StoreTree, key: String },
    /// Write everything pending now
    Flush(oneshot::Sender<Result<()>>),
    Shutdown,
}

pub struct PersistenceActor {
    store: ControlStore,
    command_rx: mpsc::UnboundedReceiver<PersistenceCommand>,
    /// `None` marks a pending removal
    pending: BTreeMap<WriteKey, Option<Vec<u8>>>,
    last_write_ts: Instant,
    debounce_ms: u64,
    write_count: u64,
}

/// Handle to the persistence actor
///
/// Cheap to clone. Queueing never blocks; writes to a stopped actor are
/// dropped with a warning.
#[derive(Clone)]
pub struct PersistenceActorHandle {
    cmd_tx: mpsc::UnboundedSender<PersistenceCommand>,
}

impl PersistenceActor {
    /// Spawn the actor on the current runtime (`debounce_ms == 0` writes through)
    pub fn spawn(store: ControlStore, debounce_ms: u64) -> PersistenceActorHandle {
        let (cmd_tx, command_rx) = mpsc::unbounded_channel();
        let actor = PersistenceActor {
            store,
            command_rx,
            pending: BTreeMap::new(),
            last_write_ts: Instant::now(),
            debounce_ms,
            write_count: 0,
        };
        tokio::spawn(actor.run());
        PersistenceActorHandle { cmd_tx }
    }

    async fn run(mut self) {
        info!("Persistence actor started (debounce: {}ms)", self.debounce_ms);

        let tick_interval = if self.debounce_ms > 0 { self.debounce_ms } else { 1000 };
        let mut ticker = tokio::time::interval(Duration::from_millis(tick_interval));

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Every handle dropped
                        self.flush_pending().await;
                        return;
                    };
                    match cmd {
                        PersistenceCommand::Put { tree, key, value } => {
                            trace!("Queued write {}/{}", tree, key);
                            self.pending.insert((tree, key), Some(value));
                            self.queued().await;
                        }
                        PersistenceCommand::Delete { tree, key } => {
                            trace!("Queued delete {}/{}", tree, key);
                            self.pending.insert((tree, key), None);
                            self.queued().await;
                        }
                        PersistenceCommand::Flush(response_tx) => {
                            let result = self.flush_pending().await;
                            let _ = response_tx.send(result);
                        }
                        PersistenceCommand::Shutdown => {
                            info!("Persistence actor shutting down, flushing pending writes");
                            if let Err(e) = self.flush_pending().await {
                                error!("Final flush failed: {:#}", e);
                            }
                            info!("Persistence actor shutdown complete (total writes: {})", self.write_count);
                            return;
                        }
                    }
                }
                _ = ticker.tick() => {
                    if !self.pending.is_empty()
                        && self.debounce_ms > 0
                        && self.last_write_ts.elapsed() >= Duration::from_millis(self.debounce_ms)
                    {
                        trace!("Debounce window expired, flushing {} write(s)", self.pending.len());
                        if let Err(e) = self.flush_pending().await {
                            error!("Debounced flush failed: {:#}", e);
                        }
                    }
                }
            }
        }
    }

    async fn queued(&mut self) {
        self.last_write_ts = Instant::now();
        if self.debounce_ms == 0 {
            if let Err(e) = self.flush_pending().await {
                error!("Write-through failed: {:#}", e);
            }
        }
    }

    /// Write every pending entry in one blocking batch
    async fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let writes: Vec<(WriteKey, Option<Vec<u8>>)> = std::mem::take(&mut self.pending).into_iter().collect();
        let store = self.store.clone();

        // Failed writes are dropped; the next change of the same key rewrites it
        let written = tokio::task::spawn_blocking(move || store.apply(writes))
            .await
            .context("Persistence write task panicked")??;
        self.write_count += written as u64;
        trace!("Flushed {} write(s) (total {})", written, self.write_count);
        Ok(())
    }
}

impl PersistenceActorHandle {
    fn send(&self, cmd: PersistenceCommand) {
        if self.cmd_tx.send(cmd).is_err() {
            warn!("Persistence actor stopped, write dropped");
        }
    }

    /// Queue a JSON value
    pub fn put_json<T: Serialize>(&self, tree: StoreTree, key: &str, value: &T) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.send(PersistenceCommand::Put {
                tree,
                key: key.to_string(),
                value: bytes,
            }),
            Err(e) => error!("Failed to serialize {}/{}: {}", tree, key, e),
        }
    }

    pub fn delete(&self, tree: StoreTree, key: &str) {
        self.send(PersistenceCommand::Delete {
            tree,
            key: key.to_string(),
        });
    }

    pub fn save_control(&self, control_id: &str, model: &ControlModel) {
        self.put_json(StoreTree::Controls, control_id, model);
    }

    pub fn save_runtime(&self, control_id: &str, runtime: &RuntimeModel) {
        self.put_json(StoreTree::Runtime, control_id, runtime);
    }

    /// Drop a control and its runtime state
    pub fn delete_control(&self, control_id: &str) {
        self.delete(StoreTree::Controls, control_id);
        self.delete(StoreTree::Runtime, control_id);
    }

    pub fn save_page(&self, number: u32, page: &PageModel) {
        self.put_json(StoreTree::Pages, &number.to_string(), page);
    }

    pub fn save_custom_variable(&self, name: &str, stored: &StoredCustomVariable) {
        self.put_json(StoreTree::CustomVariables, name, stored);
    }

    pub fn delete_custom_variable(&self, name: &str) {
        self.delete(StoreTree::CustomVariables, name);
    }

    /// Write every pending entry now
    ///
    /// Use this before shutdown to make sure everything reached the disk.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(PersistenceCommand::Flush(tx))
            .context("Failed to send flush command: actor shut down")?;
        rx.await.context("Failed to receive flush response")?
    }

    /// Signal the actor to flush and stop (fire-and-forget)
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(PersistenceCommand::Shutdown);
    }
}
