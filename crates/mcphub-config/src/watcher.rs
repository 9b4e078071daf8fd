//! Config hot-reload watcher.
//!
//! Watches the directories holding every configuration source and, after a
//! debounce window, asks the [`ConfigStore`] to reload. Directories rather
//! than files are watched because editors commonly save by renaming a new
//! file over the old one, which would silently end a per-file watch.

use crate::store::ConfigStore;
use mcphub_core::{HubError, HubResult};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Watcher tuning.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    /// Quiet period after the last file event before reloading.
    pub debounce: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

/// Keeps the file-system watch and the reload task alive.
///
/// Dropping it stops watching.
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl ConfigWatcher {
    /// Start watching every source of `store`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(store: Arc<ConfigStore>, settings: WatchSettings) -> HubResult<Self> {
        let targets: HashSet<PathBuf> = store.sources().iter().map(|p| normalize(p)).collect();
        let dirs: HashSet<PathBuf> = targets
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        let watched = targets.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else { return };
            let relevant = matches!(
                event.kind,
                EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
            ) && event.paths.iter().any(|p| watched.contains(&normalize(p)));
            if relevant {
                let _ = tx.send(());
            }
        })
        .map_err(|e| HubError::config(first_dir(&dirs), format!("Failed to create file watcher: {e}")))?;

        for dir in &dirs {
            watcher
                .watch(dir, RecursiveMode::NonRecursive)
                .map_err(|e| HubError::config(dir, format!("Failed to watch directory: {e}")))?;
        }

        let task = tokio::spawn(reload_loop(store, settings.debounce, rx));

        tracing::info!(sources = targets.len(), "Config hot-reload watcher started");
        Ok(Self {
            _watcher: watcher,
            task,
        })
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn reload_loop(
    store: Arc<ConfigStore>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<()>,
) {
    while rx.recv().await.is_some() {
        let mut observed = store.generation();
        loop {
            tokio::time::sleep(debounce).await;
            // Collapse a burst of writes into one reload.
            while rx.try_recv().is_ok() {}

            match store.reload_if_unchanged(observed).await {
                Ok(Some(diff)) => {
                    tracing::debug!(generation = diff.generation, empty = diff.is_empty(), "Config reloaded");
                    break;
                }
                Ok(None) => {
                    // A local write landed while we were reading; the sources
                    // now include it, so recompute against the new generation.
                    observed = store.generation();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to reload config, keeping last good configuration");
                    break;
                }
            }
        }
    }
    tracing::debug!("Config watcher task exiting");
}

fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    // The file may be mid-rename; canonicalize the directory instead.
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        })
        .map(|dir| dir.join(name))
        .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}

fn first_dir(dirs: &HashSet<PathBuf>) -> PathBuf {
    dirs.iter().next().cloned().unwrap_or_else(|| PathBuf::from("."))
}
