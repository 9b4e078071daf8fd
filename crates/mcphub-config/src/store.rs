//! Layered configuration store.
//!
//! Sources are JSON files read in order; for each server name the last
//! source that defines it wins in full. The store remembers which source owns
//! each merged entry so that runtime enable/disable toggles are written back
//! to exactly that file.
//!
//! Reloads and local writes are ordered by a generation counter: a reload
//! computed against an older generation than the current one is discarded,
//! so a watcher that read a source just before a local write can never undo
//! that write.

use crate::entry::{parse_entry, ServerConfigEntry};
use indexmap::IndexMap;
use mcphub_core::{HubError, HubResult};
use mcphub_logs::LogHub;
use parking_lot::RwLock;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

const LOG_SOURCE: &str = "config";

/// Names that differ between two merged configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConfigDiff {
    /// Names that appeared.
    pub added: Vec<String>,
    /// Names that are gone.
    pub removed: Vec<String>,
    /// Names whose entry differs.
    pub changed: Vec<String>,
    /// Store generation after the change was applied.
    pub generation: u64,
}

impl ConfigDiff {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

#[derive(Debug, Clone)]
struct MergedEntry {
    entry: ServerConfigEntry,
    /// Index into `ConfigStore::sources` of the source that owns the entry.
    owner: usize,
}

type Merged = IndexMap<String, MergedEntry>;

struct StoreState {
    merged: Merged,
    generation: u64,
}

/// The merged, live view of every configuration source.
pub struct ConfigStore {
    sources: Vec<PathBuf>,
    state: RwLock<StoreState>,
    /// Serializes every mutation (local writes and reload application).
    write_lock: Mutex<()>,
    diffs: broadcast::Sender<ConfigDiff>,
    logs: Arc<LogHub>,
}

impl ConfigStore {
    /// Read and merge `sources` in order.
    ///
    /// Fails if any source cannot be read or is not a JSON object with an
    /// optional `mcpServers` object. Individual malformed entries are logged
    /// and skipped.
    pub async fn load(sources: Vec<PathBuf>, logs: Arc<LogHub>) -> HubResult<Self> {
        let merged = read_and_merge(&sources, &logs).await?;
        logs.info(
            LOG_SOURCE,
            format!(
                "Loaded {} server(s) from {} source(s)",
                merged.len(),
                sources.len()
            ),
        );
        let (diffs, _) = broadcast::channel(64);
        Ok(Self {
            sources,
            state: RwLock::new(StoreState {
                merged,
                generation: 1,
            }),
            write_lock: Mutex::new(()),
            diffs,
            logs,
        })
    }

    /// Source files in merge order.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Merged entries in listing order.
    pub fn entries(&self) -> Vec<ServerConfigEntry> {
        self.state
            .read()
            .merged
            .values()
            .map(|m| m.entry.clone())
            .collect()
    }

    /// Merged entry for `name`.
    pub fn entry(&self, name: &str) -> Option<ServerConfigEntry> {
        self.state.read().merged.get(name).map(|m| m.entry.clone())
    }

    /// Whether any source defines `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.state.read().merged.contains_key(name)
    }

    /// The source that last defines `name`.
    pub fn owner(&self, name: &str) -> Option<PathBuf> {
        let state = self.state.read();
        state
            .merged
            .get(name)
            .and_then(|m| self.sources.get(m.owner).cloned())
    }

    /// Bumped by every reload and every persisted toggle.
    pub fn generation(&self) -> u64 {
        self.state.read().generation
    }

    /// Subscribe to configuration diffs.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigDiff> {
        self.diffs.subscribe()
    }

    /// Re-read every source and apply the result unconditionally.
    pub async fn reload(&self) -> HubResult<ConfigDiff> {
        let _guard = self.write_lock.lock().await;
        let merged = read_and_merge(&self.sources, &self.logs).await?;
        Ok(self.apply(merged))
    }

    /// Re-read every source, applying the result only if no other change
    /// landed since `observed` was read from [`ConfigStore::generation`].
    ///
    /// Returns `Ok(None)` when the reload was stale and discarded.
    pub async fn reload_if_unchanged(&self, observed: u64) -> HubResult<Option<ConfigDiff>> {
        let merged = read_and_merge(&self.sources, &self.logs).await?;
        let _guard = self.write_lock.lock().await;
        if self.generation() != observed {
            debug!(
                observed,
                current = self.generation(),
                "Discarding stale config reload"
            );
            return Ok(None);
        }
        Ok(Some(self.apply(merged)))
    }

    fn apply(&self, merged: Merged) -> ConfigDiff {
        let mut state = self.state.write();
        let mut diff = diff_merged(&state.merged, &merged);
        if diff.is_empty() {
            // Ownership may still have moved between sources.
            state.merged = merged;
            diff.generation = state.generation;
            return diff;
        }
        state.generation += 1;
        state.merged = merged;
        diff.generation = state.generation;
        drop(state);

        self.logs.hub(format!(
            "Configuration changed: {} added, {} removed, {} changed",
            diff.added.len(),
            diff.removed.len(),
            diff.changed.len()
        ));
        let _ = self.diffs.send(diff.clone());
        diff
    }

    /// Durably set `disabled` for `name` in the source that owns it.
    ///
    /// Only `mcpServers.<name>.disabled` is rewritten; the rest of the
    /// document keeps its keys and their order. The file is replaced
    /// atomically. A no-op when the flag already has the requested value.
    /// On error the in-memory entry is left untouched.
    pub async fn persist_disabled(&self, name: &str, disabled: bool) -> HubResult<()> {
        let _guard = self.write_lock.lock().await;

        let (owner, current) = {
            let state = self.state.read();
            let merged = state
                .merged
                .get(name)
                .ok_or_else(|| HubError::UnknownServer(name.to_string()))?;
            let owner = self
                .sources
                .get(merged.owner)
                .cloned()
                .ok_or_else(|| HubError::UnknownServer(name.to_string()))?;
            (owner, merged.entry.disabled)
        };
        if current == disabled {
            return Ok(());
        }

        let text = tokio::fs::read_to_string(&owner)
            .await
            .map_err(|e| HubError::persistence(&owner, format!("read failed: {e}")))?;
        let mut doc: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| HubError::persistence(&owner, format!("source is no longer valid JSON: {e}")))?;
        let entry = doc
            .get_mut("mcpServers")
            .and_then(|servers| servers.get_mut(name))
            .and_then(serde_json::Value::as_object_mut)
            .ok_or_else(|| {
                HubError::persistence(&owner, format!("entry '{name}' is no longer defined here"))
            })?;
        entry.insert("disabled".to_string(), serde_json::Value::Bool(disabled));

        let mut rendered = serde_json::to_string_pretty(&doc)?;
        rendered.push('\n');
        write_atomic(&owner, rendered).await?;

        {
            let mut state = self.state.write();
            if let Some(merged) = state.merged.get_mut(name) {
                merged.entry.disabled = disabled;
            }
            state.generation += 1;
        }

        info!(server = %name, disabled, source = %owner.display(), "Persisted server toggle");
        self.logs.info(
            name,
            format!(
                "Persisted disabled={disabled} to {}",
                owner.display()
            ),
        );
        Ok(())
    }
}

async fn write_atomic(path: &Path, contents: String) -> HubResult<()> {
    let target = path.to_path_buf();
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    tokio::task::spawn_blocking(move || -> HubResult<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| HubError::persistence(&target, format!("temp file: {e}")))?;
        if let Ok(meta) = std::fs::metadata(&target) {
            let _ = tmp.as_file().set_permissions(meta.permissions());
        }
        tmp.write_all(contents.as_bytes())
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| HubError::persistence(&target, format!("write failed: {e}")))?;
        tmp.persist(&target)
            .map_err(|e| HubError::persistence(&target, format!("replace failed: {}", e.error)))?;
        Ok(())
    })
    .await
    .map_err(|e| HubError::persistence(path, format!("writer task failed: {e}")))?
}

async fn read_and_merge(sources: &[PathBuf], logs: &LogHub) -> HubResult<Merged> {
    let mut merged = Merged::new();
    for (index, source) in sources.iter().enumerate() {
        let text = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| HubError::config(source, format!("cannot read source: {e}")))?;
        for entry in parse_source(source, &text, logs)? {
            // IndexMap::insert keeps the position of an existing key, so the
            // listing order is the order of first appearance.
            merged.insert(entry.name.clone(), MergedEntry { entry, owner: index });
        }
    }
    Ok(merged)
}

/// Parse one source document into its valid entries, logging the rest.
pub fn parse_source(source: &Path, text: &str, logs: &LogHub) -> HubResult<Vec<ServerConfigEntry>> {
    let doc: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| HubError::config(source, format!("invalid JSON: {e}")))?;
    let root = doc
        .as_object()
        .ok_or_else(|| HubError::config(source, "top level must be a JSON object"))?;

    let Some(servers) = root.get("mcpServers") else {
        logs.warn(
            LOG_SOURCE,
            format!("{} defines no 'mcpServers'", source.display()),
        );
        return Ok(Vec::new());
    };
    let servers = servers
        .as_object()
        .ok_or_else(|| HubError::config(source, "'mcpServers' must be an object"))?;

    let mut entries = Vec::with_capacity(servers.len());
    for (name, value) in servers {
        match parse_entry(source, name, value) {
            Ok(parsed) => {
                for var in &parsed.unresolved {
                    logs.warn(
                        name,
                        format!("Environment variable '{var}' is not set; substituted an empty string"),
                    );
                }
                entries.push(parsed.entry);
            }
            Err(e) => logs.error(LOG_SOURCE, format!("Skipping entry: {e}")),
        }
    }
    Ok(entries)
}

fn diff_merged(old: &Merged, new: &Merged) -> ConfigDiff {
    let mut diff = ConfigDiff::default();
    for (name, merged) in new {
        match old.get(name) {
            None => diff.added.push(name.clone()),
            Some(prev) if prev.entry != merged.entry => diff.changed.push(name.clone()),
            Some(_) => {}
        }
    }
    for name in old.keys() {
        if !new.contains_key(name) {
            diff.removed.push(name.clone());
        }
    }
    diff
}
