//! Bookkeeping for event listeners attached on behalf of a session.
//!
//! Each session owns a [`ListenerScope`]; aborting or dropping the scope
//! releases everything it registered, so the registry's live count returns
//! to its baseline after every open/close cycle.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    KeyDown,
    Input,
    PointerDown,
    Cancel,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    live: HashMap<ListenerId, ListenerKind>,
}

#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self) -> ListenerScope {
        ListenerScope { registry: self.clone(), ids: Vec::new() }
    }

    /// Number of listeners currently attached.
    pub fn active(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn active_of(&self, kind: ListenerKind) -> usize {
        self.inner.lock().live.values().filter(|k| **k == kind).count()
    }

    fn attach(&self, kind: ListenerKind) -> ListenerId {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = ListenerId(inner.next_id);
        inner.live.insert(id, kind);
        id
    }

    fn detach(&self, ids: &[ListenerId]) {
        let mut inner = self.inner.lock();
        for id in ids {
            inner.live.remove(id);
        }
    }
}

/// Listeners that live and die together.
#[derive(Debug)]
pub struct ListenerScope {
    registry: ListenerRegistry,
    ids: Vec<ListenerId>,
}

impl ListenerScope {
    pub fn add(&mut self, kind: ListenerKind) -> ListenerId {
        let id = self.registry.attach(kind);
        self.ids.push(id);
        id
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Detaches everything; safe to call more than once.
    pub fn abort(&mut self) {
        if self.ids.is_empty() {
            return;
        }
        trace!("Aborting {} listeners", self.ids.len());
        self.registry.detach(&self.ids);
        self.ids.clear();
    }
}

impl Drop for ListenerScope {
    fn drop(&mut self) {
        self.abort();
    }
}
