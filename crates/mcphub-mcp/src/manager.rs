//! Hub-wide lifecycle: one supervisor per configured server, kept in step
//! with the configuration store.

use crate::registry::ServerRegistry;
use crate::supervisor::{self, SupervisorCommand, SupervisorHandle, SupervisorSettings};
use crate::transport::TransportFactory;
use futures_util::future::join_all;
use indexmap::IndexMap;
use mcphub_config::{ConfigDiff, ConfigStore};
use mcphub_core::{HubError, HubResult};
use mcphub_logs::LogHub;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared handles every hub component is built from.
#[derive(Clone)]
pub struct HubContext {
    /// Merged configuration.
    pub store: Arc<ConfigStore>,
    /// Published server snapshots.
    pub registry: Arc<ServerRegistry>,
    /// Operational events.
    pub logs: Arc<LogHub>,
}

impl HubContext {
    /// Context with a fresh, empty registry.
    pub fn new(store: Arc<ConfigStore>, logs: Arc<LogHub>) -> Self {
        Self {
            store,
            registry: Arc::new(ServerRegistry::new()),
            logs,
        }
    }
}

/// Owns every supervisor and turns control requests into durable config
/// writes plus supervisor commands.
pub struct HubManager {
    ctx: HubContext,
    factory: Arc<dyn TransportFactory>,
    settings: SupervisorSettings,
    supervisors: Mutex<IndexMap<String, SupervisorHandle>>,
    /// Serializes persist-then-send per server so the file and the
    /// supervisor see toggles in the same order.
    toggles: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    root: CancellationToken,
    reconciler: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl HubManager {
    /// A manager with no supervisors yet; see [`HubManager::start`].
    pub fn new(
        ctx: HubContext,
        factory: Arc<dyn TransportFactory>,
        settings: SupervisorSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            factory,
            settings,
            supervisors: Mutex::new(IndexMap::new()),
            toggles: parking_lot::Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
            reconciler: parking_lot::Mutex::new(None),
        })
    }

    /// Shared handles.
    pub fn context(&self) -> &HubContext {
        &self.ctx
    }

    /// Server snapshots.
    pub fn registry(&self) -> &Arc<ServerRegistry> {
        &self.ctx.registry
    }

    /// Merged configuration.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.ctx.store
    }

    /// The hub's log.
    pub fn logs(&self) -> &Arc<LogHub> {
        &self.ctx.logs
    }

    /// Whether [`HubManager::shutdown`] has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.root.is_cancelled()
    }

    /// Spawn a supervisor for every configured server and follow config
    /// changes from then on.
    pub async fn start(self: &Arc<Self>) {
        let diffs = self.ctx.store.subscribe();
        self.resync().await;

        let manager = Arc::downgrade(self);
        let cancel = self.root.child_token();
        let task = tokio::spawn(reconcile_loop(manager, diffs, cancel));
        if let Some(old) = self.reconciler.lock().replace(task) {
            old.abort();
        }

        let count = self.ctx.registry.len();
        self.ctx.logs.hub(format!("Supervising {count} server(s)"));
    }

    /// Apply one config diff.
    pub async fn reconcile(&self, diff: &ConfigDiff) {
        let mut supervisors = self.supervisors.lock().await;

        let mut retired = Vec::new();
        for name in &diff.removed {
            if self.ctx.store.contains(name) {
                continue;
            }
            if let Some(handle) = supervisors.shift_remove(name) {
                self.ctx.registry.remove(name);
                self.ctx.logs.info(name, "Removed from configuration");
                retired.push(handle);
            }
        }

        for name in &diff.added {
            let Some(entry) = self.ctx.store.entry(name) else { continue };
            if let Some(handle) = supervisors.get(name) {
                let _ = handle.send(SupervisorCommand::Reconfigure(entry)).await;
            } else {
                self.ctx.logs.info(name, "Added to configuration");
                let handle = self.spawn_supervisor(entry);
                supervisors.insert(name.clone(), handle);
            }
        }

        for name in &diff.changed {
            let (Some(entry), Some(handle)) = (self.ctx.store.entry(name), supervisors.get(name))
            else {
                continue;
            };
            if handle.send(SupervisorCommand::Reconfigure(entry)).await.is_err() {
                warn!(server = %name, "Supervisor gone, configuration change dropped");
            }
        }
        drop(supervisors);

        join_all(retired.into_iter().map(SupervisorHandle::shutdown)).await;
    }

    /// Bring the supervisor set in line with the store from scratch.
    async fn resync(&self) {
        let entries = self.ctx.store.entries();
        let present: Vec<String> = self.supervisors.lock().await.keys().cloned().collect();

        let removed = present
            .iter()
            .filter(|name| !self.ctx.store.contains(name))
            .cloned()
            .collect();
        let (changed, added): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .map(|e| e.name)
            .partition(|name| present.contains(name));

        self.reconcile(&ConfigDiff {
            added,
            removed,
            changed,
            generation: self.ctx.store.generation(),
        })
        .await;
    }

    fn spawn_supervisor(&self, entry: mcphub_config::ServerConfigEntry) -> SupervisorHandle {
        let writer = self.ctx.registry.register(supervisor::initial_state(&entry));
        supervisor::spawn(
            entry,
            writer,
            self.factory.clone(),
            self.ctx.logs.clone(),
            self.settings.clone(),
            &self.root,
        )
    }

    async fn send(&self, name: &str, command: SupervisorCommand) -> HubResult<()> {
        if self.root.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        let supervisors = self.supervisors.lock().await;
        let handle = supervisors
            .get(name)
            .ok_or_else(|| HubError::UnknownServer(name.to_string()))?;
        handle.send(command).await
    }

    async fn toggle_guard(&self, name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .toggles
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    fn known(&self, name: &str) -> HubResult<mcphub_config::ServerConfigEntry> {
        self.ctx
            .store
            .entry(name)
            .ok_or_else(|| HubError::UnknownServer(name.to_string()))
    }

    /// Enable and connect a server, clearing its persisted `disabled` flag
    /// first when set.
    pub async fn start_server(&self, name: &str) -> HubResult<()> {
        self.known(name)?;
        let _toggle = self.toggle_guard(name).await;
        let entry = self.known(name)?;
        if entry.disabled {
            self.ctx.store.persist_disabled(name, false).await?;
        }
        self.ctx.logs.info(name, "Start requested");
        self.send(name, SupervisorCommand::Enable).await
    }

    /// Stop a server. With `disable` the flag is persisted before the
    /// supervisor is told, so the server stays off across restarts.
    pub async fn stop_server(&self, name: &str, disable: bool) -> HubResult<()> {
        self.known(name)?;
        let _toggle = self.toggle_guard(name).await;
        let entry = self.known(name)?;
        if disable {
            if !entry.disabled {
                self.ctx.store.persist_disabled(name, true).await?;
            }
            self.ctx.logs.info(name, "Disable requested");
            self.send(name, SupervisorCommand::Disable).await
        } else {
            self.ctx.logs.info(name, "Stop requested");
            self.send(name, SupervisorCommand::Stop).await
        }
    }

    /// Re-fetch a server's capabilities (or retry it if it failed).
    pub async fn refresh_server(&self, name: &str) -> HubResult<()> {
        self.known(name)?;
        self.send(name, SupervisorCommand::Refresh).await
    }

    /// Soft restart: re-read every source, then replace every supervisor.
    pub async fn restart(&self) -> HubResult<()> {
        if self.root.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }
        self.ctx.logs.hub("Restarting all servers");
        let diff = self.ctx.store.reload().await?;
        self.reconcile(&diff).await;

        let old: Vec<SupervisorHandle> = {
            let mut supervisors = self.supervisors.lock().await;
            supervisors.drain(..).map(|(_, handle)| handle).collect()
        };
        let grace = self.restart_grace();
        if tokio::time::timeout(grace, join_all(old.into_iter().map(SupervisorHandle::shutdown)))
            .await
            .is_err()
        {
            warn!(
                grace_ms = grace.as_millis() as u64,
                "Restart grace period elapsed, not waiting for old supervisors"
            );
        }
        if self.root.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let mut supervisors = self.supervisors.lock().await;
        for entry in self.ctx.store.entries() {
            // A config change may have spawned it while the lock was free.
            if supervisors.contains_key(&entry.name) {
                continue;
            }
            let name = entry.name.clone();
            let handle = self.spawn_supervisor(entry);
            supervisors.insert(name, handle);
        }
        self.ctx
            .logs
            .hub(format!("Restarted {} server(s)", supervisors.len()));
        Ok(())
    }

    /// How long a restart waits for the old supervisors: one close grace for
    /// the transports plus the same again for the tasks to wind down.
    fn restart_grace(&self) -> Duration {
        self.settings.close_grace * 2
    }

    /// Cancel every supervisor and wait up to `grace` for their transports
    /// to close.
    pub async fn shutdown(&self, grace: Duration) {
        self.ctx.logs.hub("Shutting down");
        self.root.cancel();
        if let Some(task) = self.reconciler.lock().take() {
            task.abort();
        }

        let handles: Vec<SupervisorHandle> = {
            let mut supervisors = self.supervisors.lock().await;
            supervisors.drain(..).map(|(_, handle)| handle).collect()
        };
        let count = handles.len();
        let all = join_all(handles.into_iter().map(SupervisorHandle::shutdown));
        if tokio::time::timeout(grace, all).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "Shutdown grace period elapsed");
        }
        info!(servers = count, "All supervisors stopped");
        self.ctx.logs.flush().await;
    }
}

async fn reconcile_loop(
    manager: std::sync::Weak<HubManager>,
    mut diffs: broadcast::Receiver<ConfigDiff>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = diffs.recv() => received,
        };
        let Some(manager) = manager.upgrade() else { break };
        match received {
            Ok(diff) => manager.reconcile(&diff).await,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Config diffs lagged, resynchronizing");
                manager.resync().await;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
