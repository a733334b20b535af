//! Peer status aggregation.
//!
//! `PeerStatusState` is an immutable snapshot of what this instance knows
//! about its peers and the sync progress of each note. `PeerStatusStore` owns
//! the current snapshot, replaces it on every change and hands the new
//! snapshot to subscribers.
//!
//! Thread-safe for use in multi-threaded Tokio runtime. Wrap the store in
//! `Arc` to enable subscriptions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeerStatus {
    Discovering,
    Connecting,
    Connected,
    Disconnected,
}

impl PeerStatus {
    /// Case-insensitive parse. Anything unrecognised is `Disconnected`.
    pub fn normalize(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "DISCOVERING" => PeerStatus::Discovering,
            "CONNECTING" => PeerStatus::Connecting,
            "CONNECTED" => PeerStatus::Connected,
            _ => PeerStatus::Disconnected,
        }
    }

    fn is_in_progress(&self) -> bool {
        matches!(self, PeerStatus::Connecting | PeerStatus::Discovering)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub peer_id: String,
    pub ws_url: String,
    pub status: PeerStatus,
    pub note_ids: BTreeSet<String>,
}

impl PeerInfo {
    pub fn new(peer_id: impl Into<String>, ws_url: impl Into<String>, status: PeerStatus) -> Self {
        Self {
            peer_id: peer_id.into(),
            ws_url: ws_url.into(),
            status,
            note_ids: BTreeSet::new(),
        }
    }

    pub fn with_note_ids<I, T>(mut self, note_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.note_ids = note_ids.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Offline,
    Syncing,
    Connected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub note_id: String,
    pub peer_count: usize,
    pub state: SyncState,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerStatusState {
    pub active_note_id: String,
    pub peers: BTreeMap<String, PeerInfo>,
    pub syncing_by_note_id: BTreeSet<String>,
    pub error_by_note_id: BTreeMap<String, String>,
}

impl PeerStatusState {
    pub fn new(active_note_id: impl Into<String>) -> Self {
        Self {
            active_note_id: active_note_id.into(),
            ..Self::default()
        }
    }
}

/// Peers sharing `note_id`. The empty id selects every peer.
pub fn peers_for_note<'a>(state: &'a PeerStatusState, note_id: &str) -> Vec<&'a PeerInfo> {
    state
        .peers
        .values()
        .filter(|peer| note_id.is_empty() || peer.note_ids.contains(note_id))
        .collect()
}

/// Sync status of a note. Precedence: error, then syncing (explicit flag or
/// any peer still connecting), then connected, then offline.
pub fn derive_sync_status(state: &PeerStatusState, note_id: &str) -> SyncStatus {
    let peers = peers_for_note(state, note_id);
    let connected = peers
        .iter()
        .filter(|peer| peer.status == PeerStatus::Connected)
        .count();
    let connecting = peers.iter().any(|peer| peer.status.is_in_progress());

    let has_error = state
        .error_by_note_id
        .get(note_id)
        .is_some_and(|message| !message.is_empty());

    let sync_state = if has_error {
        SyncState::Error
    } else if state.syncing_by_note_id.contains(note_id) || connecting {
        SyncState::Syncing
    } else if connected > 0 {
        SyncState::Connected
    } else {
        SyncState::Offline
    };

    SyncStatus {
        note_id: note_id.to_string(),
        peer_count: connected,
        state: sync_state,
    }
}

type Listener = Arc<dyn Fn(&Arc<PeerStatusState>) + Send + Sync>;

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    store: Weak<PeerStatusStore>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

pub struct PeerStatusStore {
    initial_note_id: String,
    state: RwLock<Arc<PeerStatusState>>,
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_id: AtomicUsize,
}

impl Default for PeerStatusStore {
    fn default() -> Self {
        Self::new("")
    }
}

impl PeerStatusStore {
    /// `initial_note_id` is the active note after construction and after `reset`.
    pub fn new(initial_note_id: impl Into<String>) -> Self {
        let initial_note_id = initial_note_id.into();
        Self {
            state: RwLock::new(Arc::new(PeerStatusState::new(initial_note_id.clone()))),
            initial_note_id,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> Arc<PeerStatusState> {
        Arc::clone(&self.state.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Call `listener` with the current snapshot now and after every change.
    pub fn subscribe(
        self: &Arc<Self>,
        listener: impl Fn(&Arc<PeerStatusState>) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(listener);
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::clone(&listener)));
        listener(&self.snapshot());
        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }

    /// Replace the snapshot if `change` produces a new one, then notify.
    fn update(&self, change: impl FnOnce(&PeerStatusState) -> Option<PeerStatusState>) {
        let next = {
            let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
            match change(&guard) {
                Some(next) => {
                    let next = Arc::new(next);
                    *guard = Arc::clone(&next);
                    next
                }
                None => return,
            }
        };

        // Cloned so a listener may subscribe or mutate the store
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&next);
        }
    }

    pub fn set_active_note(&self, note_id: &str) {
        self.update(|current| {
            Some(PeerStatusState {
                active_note_id: note_id.to_string(),
                ..current.clone()
            })
        });
    }

    pub fn upsert_peer(&self, peer: PeerInfo) {
        self.update(|current| {
            let mut next = current.clone();
            next.peers.insert(peer.peer_id.clone(), peer);
            Some(next)
        });
    }

    pub fn set_peer_status(&self, peer_id: &str, status: PeerStatus) {
        self.update_peer(peer_id, |peer| peer.status = status);
    }

    pub fn set_peer_note_ids<I, T>(&self, peer_id: &str, note_ids: I)
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let note_ids: BTreeSet<String> = note_ids.into_iter().map(Into::into).collect();
        self.update_peer(peer_id, |peer| peer.note_ids = note_ids);
    }

    fn update_peer(&self, peer_id: &str, change: impl FnOnce(&mut PeerInfo)) {
        self.update(|current| {
            let mut next = current.clone();
            change(next.peers.get_mut(peer_id)?);
            Some(next)
        });
    }

    pub fn remove_peer(&self, peer_id: &str) {
        self.update(|current| {
            if !current.peers.contains_key(peer_id) {
                return None;
            }
            let mut next = current.clone();
            next.peers.remove(peer_id);
            Some(next)
        });
    }

    /// Also clears any error recorded for the note.
    pub fn mark_sync_started(&self, note_id: &str) {
        self.update(|current| {
            let mut next = current.clone();
            next.syncing_by_note_id.insert(note_id.to_string());
            next.error_by_note_id.remove(note_id);
            Some(next)
        });
    }

    pub fn mark_sync_completed(&self, note_id: &str) {
        self.update(|current| {
            let mut next = current.clone();
            next.syncing_by_note_id.remove(note_id);
            Some(next)
        });
    }

    /// Also clears the syncing flag for the note.
    pub fn mark_sync_error(&self, note_id: &str, message: impl Into<String>) {
        let message = message.into();
        self.update(|current| {
            let mut next = current.clone();
            next.syncing_by_note_id.remove(note_id);
            next.error_by_note_id.insert(note_id.to_string(), message);
            Some(next)
        });
    }

    pub fn clear_sync_error(&self, note_id: &str) {
        self.update(|current| {
            let mut next = current.clone();
            next.error_by_note_id.remove(note_id);
            Some(next)
        });
    }

    /// Status of `note_id`, or of the active note when `None`.
    pub fn sync_status(&self, note_id: Option<&str>) -> SyncStatus {
        let state = self.snapshot();
        derive_sync_status(&state, note_id.unwrap_or(&state.active_note_id))
    }

    /// Peers sharing `note_id`, or the active note when `None`.
    pub fn peers_for_note(&self, note_id: Option<&str>) -> Vec<PeerInfo> {
        let state = self.snapshot();
        peers_for_note(&state, note_id.unwrap_or(&state.active_note_id))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn reset(&self) {
        let initial = self.initial_note_id.clone();
        self.update(|_| Some(PeerStatusState::new(initial)));
    }
}
