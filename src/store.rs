//! Persistent key-value storage with change subscriptions.
//!
//! Two reserved keys matter to the expander: [`SNIPPETS_KEY`] holds the
//! shortcut → template mapping and `snippet:last:<shortcut>` holds the last
//! values entered in a placeholder dialog.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::errors::StoreError;

pub const SNIPPETS_KEY: &str = "snippets";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreScope {
    Local,
    Session,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
    pub scope: StoreScope,
}

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    fn scope(&self) -> StoreScope;

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Writes every entry; subscribers hear about keys whose value changed.
    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError>;

    fn subscribe(&self) -> Receiver<StoreChange>;
}

/// Reads `key`, treating storage failures as missing.
pub async fn get_or_default(store: &dyn KeyValueStore, key: &str) -> Option<Value> {
    match store.get(key).await {
        Ok(value) => value,
        Err(e) => {
            warn!("Store read of {} failed: {}", key, e);
            None
        }
    }
}

/// Session store first, then the local one.
pub async fn get_layered(
    session: Option<&dyn KeyValueStore>,
    local: &dyn KeyValueStore,
    key: &str,
) -> Option<Value> {
    if let Some(session) = session {
        if let Some(value) = get_or_default(session, key).await {
            return Some(value);
        }
    }
    get_or_default(local, key).await
}

#[derive(Default)]
struct Subscribers(Mutex<Vec<Sender<StoreChange>>>);

impl Subscribers {
    fn add(&self) -> Receiver<StoreChange> {
        let (tx, rx) = unbounded();
        self.0.lock().push(tx);
        rx
    }

    fn publish(&self, changes: Vec<StoreChange>) {
        if changes.is_empty() {
            return;
        }
        let mut subscribers = self.0.lock();
        subscribers.retain(|tx| changes.iter().all(|c| tx.send(c.clone()).is_ok()));
    }
}

/// Applies `entries` to `data` and reports what actually changed.
fn apply(
    data: &mut BTreeMap<String, Value>,
    entries: Map<String, Value>,
    scope: StoreScope,
) -> Vec<StoreChange> {
    let mut changes = Vec::new();
    for (key, value) in entries {
        let old = data.insert(key.clone(), value.clone());
        if old.as_ref() != Some(&value) {
            changes.push(StoreChange { key, old_value: old, new_value: Some(value), scope });
        }
    }
    changes
}

/// In-memory store, used for the session scope and in tests.
pub struct MemoryStore {
    scope: StoreScope,
    data: RwLock<BTreeMap<String, Value>>,
    subscribers: Subscribers,
}

impl MemoryStore {
    pub fn new(scope: StoreScope) -> Self {
        Self { scope, data: RwLock::new(BTreeMap::new()), subscribers: Subscribers::default() }
    }

    pub fn local() -> Self {
        Self::new(StoreScope::Local)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    fn scope(&self) -> StoreScope {
        self.scope
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let changes = apply(&mut self.data.write(), entries, self.scope);
        self.subscribers.publish(changes);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        self.subscribers.add()
    }
}

/// JSON object on disk, rewritten atomically on every `set`.
pub struct FileStore {
    path: PathBuf,
    data: RwLock<BTreeMap<String, Value>>,
    subscribers: Subscribers,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|source| StoreError::Io { path: path.clone(), source })?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|source| StoreError::Corrupt { path: path.clone(), source })?
            }
        } else {
            BTreeMap::new()
        };
        info!("Opened store {} ({} keys)", path.display(), data.len());
        Ok(Self { path, data: RwLock::new(data), subscribers: Subscribers::default() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(|source| StoreError::Io { path: dir.to_path_buf(), source })?;

        let encoded = serde_json::to_vec_pretty(data)?;
        let mut tmp = NamedTempFile::new_in(dir)
            .map_err(|source| StoreError::Io { path: dir.to_path_buf(), source })?;
        tmp.write_all(&encoded)
            .map_err(|source| StoreError::Io { path: tmp.path().to_path_buf(), source })?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::Persist { path: self.path.clone(), source: e.error })?;
        debug!("Persisted {} keys to {}", data.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    fn scope(&self) -> StoreScope {
        StoreScope::Local
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<(), StoreError> {
        let changes = {
            let mut data = self.data.write();
            let mut next = data.clone();
            let changes = apply(&mut next, entries, StoreScope::Local);
            if !changes.is_empty() {
                self.persist(&next)?;
                *data = next;
            }
            changes
        };
        self.subscribers.publish(changes);
        Ok(())
    }

    fn subscribe(&self) -> Receiver<StoreChange> {
        self.subscribers.add()
    }
}
