//! Page-wide modal state: at most one dialog or assistant panel at a time.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModalKind {
    PlaceholderDialog,
    AssistantPanel,
}

#[derive(Debug, Default)]
struct ModalState {
    issued: u64,
    active: Option<(SessionToken, ModalKind)>,
}

/// Hands out exclusive modal guards. Cloning shares the same state.
#[derive(Debug, Clone, Default)]
pub struct ModalCoordinator {
    state: Arc<Mutex<ModalState>>,
}

impl ModalCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().active.is_some()
    }

    pub fn active(&self) -> Option<(SessionToken, ModalKind)> {
        self.state.lock().active
    }

    /// `None` while another modal session holds the page.
    pub fn try_acquire(&self, kind: ModalKind) -> Option<ModalGuard> {
        let mut state = self.state.lock();
        if let Some((token, open)) = state.active {
            debug!("Modal {:?} refused: {:?} {:?} is open", kind, open, token);
            return None;
        }
        state.issued += 1;
        let token = SessionToken(state.issued);
        state.active = Some((token, kind));
        Some(ModalGuard { coordinator: self.clone(), token, kind })
    }

    /// Page teardown: forgets whatever session is open.
    pub fn force_release(&self) {
        if let Some((token, kind)) = self.state.lock().active.take() {
            warn!("Force-released {:?} session {:?}", kind, token);
        }
    }

    fn release(&self, token: SessionToken) {
        let mut state = self.state.lock();
        if matches!(state.active, Some((active, _)) if active == token) {
            state.active = None;
        }
    }
}

/// Holds the modal slot until dropped.
#[derive(Debug)]
pub struct ModalGuard {
    coordinator: ModalCoordinator,
    token: SessionToken,
    kind: ModalKind,
}

impl ModalGuard {
    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn kind(&self) -> ModalKind {
        self.kind
    }
}

impl Drop for ModalGuard {
    fn drop(&mut self) {
        self.coordinator.release(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_one_modal_at_a_time() {
        let modal = ModalCoordinator::new();
        let guard = modal.try_acquire(ModalKind::PlaceholderDialog).unwrap();
        assert!(modal.is_open());
        assert!(modal.try_acquire(ModalKind::AssistantPanel).is_none());

        drop(guard);
        assert!(!modal.is_open());
        assert!(modal.try_acquire(ModalKind::AssistantPanel).is_some());
    }

    #[test]
    fn test_stale_guard_does_not_release_newer_session() {
        let modal = ModalCoordinator::new();
        let old = modal.try_acquire(ModalKind::PlaceholderDialog).unwrap();
        modal.force_release();
        let fresh = modal.try_acquire(ModalKind::PlaceholderDialog).unwrap();
        assert_ne!(old.token(), fresh.token());

        drop(old);
        assert_eq!(modal.active(), Some((fresh.token(), ModalKind::PlaceholderDialog)));
    }
}
