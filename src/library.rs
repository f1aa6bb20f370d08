//! Importing snippet library files into the store, once or on every change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::unbounded;
use notify::event::AccessKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{debug, error, info};

use crate::errors::{ConfigError, Result};
use crate::parser::{parse_library, LibraryRule};
use crate::store::{get_or_default, KeyValueStore, SNIPPETS_KEY};

/// Adds `rules` to the stored mapping; later rules overwrite earlier ones
/// and existing entries with the same key.
pub fn merge_rules(existing: Option<Value>, rules: &[LibraryRule]) -> Result<Map<String, Value>> {
    let mut snippets = match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    for rule in rules {
        snippets.insert(rule.shortcut.clone(), serde_json::to_value(&rule.template)?);
    }
    Ok(snippets)
}

/// Parses the library at `path` and merges it into the snippet mapping.
/// Returns the number of rules read.
pub async fn import_library(path: &Path, store: &dyn KeyValueStore) -> Result<usize> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadConfig {
        path: path.to_path_buf(),
        source,
    })?;
    let rules = parse_library(&raw)?;

    let existing = get_or_default(store, SNIPPETS_KEY).await;
    let snippets = merge_rules(existing, &rules)?;

    let mut entry = Map::new();
    entry.insert(SNIPPETS_KEY.to_string(), Value::Object(snippets));
    store.set(entry).await?;

    info!("Imported {} rules from {}", rules.len(), path.display());
    Ok(rules.len())
}

/// Keeps a library file imported until dropped.
pub struct LibraryWatcher {
    path: PathBuf,
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
}

impl LibraryWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stops watching and waits for an import in progress to finish.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.watcher.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Library watcher thread panicked");
            }
        }
    }
}

impl Drop for LibraryWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Re-imports `path` whenever it is created, written or replaced. The
/// store's change event then rebuilds any shortcut index listening to it.
pub fn watch_library(
    path: &Path,
    store: Arc<dyn KeyValueStore>,
    runtime: Handle,
) -> Result<LibraryWatcher> {
    let path = path.to_path_buf();
    let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, rx) = unbounded();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        match res {
            Ok(event) => {
                let relevant = event.kind.is_modify()
                    || event.kind.is_create()
                    || matches!(event.kind, EventKind::Access(AccessKind::Close(_)));
                if relevant && event.paths.iter().any(|p| p.file_name() == Some(file_name.as_os_str())) {
                    debug!("Library watcher event: {:?}", event.kind);
                    let _ = tx.send(());
                }
            }
            Err(e) => error!("Library watcher error: {:?}", e),
        }
    })?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    info!("Watching {} for library changes", path.display());

    let watched = path.clone();
    let worker = thread::spawn(move || {
        while rx.recv().is_ok() {
            // Editors emit bursts of events per save.
            while rx.try_recv().is_ok() {}
            if !watched.exists() {
                continue;
            }
            match runtime.block_on(import_library(&watched, store.as_ref())) {
                Ok(count) => info!("Library reloaded ({} rules)", count),
                Err(e) => error!("Failed to reload library {}: {}", watched.display(), e),
            }
        }
        debug!("Library watcher thread finished");
    });

    Ok(LibraryWatcher { path, watcher: Some(watcher), worker: Some(worker) })
}
