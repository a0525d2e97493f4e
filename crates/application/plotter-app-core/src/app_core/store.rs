use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;

use crate::domain::ReconciledState;

use super::{events::SyncEvent, reducer::reduce};

/// Holds the current `ReconciledState` and broadcasts every replacement.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<Mutex<Arc<ReconciledState>>>,
    watch: Arc<watch::Sender<Arc<ReconciledState>>>,
}

impl SyncStore {
    pub fn new(state: ReconciledState) -> Self {
        let state = Arc::new(state);
        let (watch, _) = watch::channel(state.clone());
        Self {
            inner: Arc::new(Mutex::new(state)),
            watch: Arc::new(watch),
        }
    }

    pub fn state(&self) -> Arc<ReconciledState> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reduce `ev` into a fresh snapshot. Observers never see a partially applied event.
    pub fn apply(&self, ev: SyncEvent) -> Arc<ReconciledState> {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(reduce((**guard).clone(), ev));
        *guard = next.clone();
        self.watch.send_replace(next.clone());
        next
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ReconciledState>> {
        self.watch.subscribe()
    }
}

impl Default for SyncStore {
    fn default() -> Self {
        Self::new(ReconciledState::default())
    }
}
