//! Open notes held by the daemon.
//!
//! Every active note is loaded into a Loro-backed text document at startup.
//! Local edits and applied peer updates refresh `updatedAt` and schedule a
//! debounced save through `NotePersistence`.

use anyhow::{anyhow, Result};
use hypernote_core::container;
use hypernote_core::note::UNTITLED;
use hypernote_core::{
    LoroTextDocument, NoteMeta, NotePersistence, NoteSnapshot, NoteStore, PeerId, TextBridge,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

struct OpenNote {
    meta: NoteMeta,
    bridge: TextBridge<LoroTextDocument>,
}

impl OpenNote {
    fn snapshot(&self) -> Result<NoteSnapshot> {
        let state = self.bridge.encode_state_as_update(None)?;
        Ok(NoteSnapshot::new(self.meta.clone(), state))
    }
}

pub struct NoteWorkspace<S> {
    persistence: NotePersistence<S>,
    peer_id: PeerId,
    notes: BTreeMap<String, OpenNote>,
}

impl<S: NoteStore + 'static> NoteWorkspace<S> {
    pub fn new(persistence: NotePersistence<S>, peer_id: PeerId) -> Self {
        Self {
            persistence,
            peer_id,
            notes: BTreeMap::new(),
        }
    }

    /// Open every active note in storage. Notes that fail to open are logged
    /// and left out.
    pub async fn load(persistence: NotePersistence<S>, peer_id: PeerId) -> Result<Self> {
        let mut workspace = Self::new(persistence, peer_id);

        let entries = workspace.persistence.store().list_containers().await?;
        for entry in entries {
            let decoded = match container::decode(&entry.bytes) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(note_id = %entry.id, "Failed to open note: {}", e);
                    continue;
                }
            };
            // Trash and sweep address notes by storage id
            if decoded.meta.id != entry.id {
                warn!(
                    note_id = %entry.id,
                    meta_id = %decoded.meta.id,
                    "Skipping container whose metadata names another note"
                );
                continue;
            }
            let snapshot = NoteSnapshot::new(decoded.meta, decoded.body);
            if let Err(e) = workspace.insert_snapshot(snapshot) {
                warn!(note_id = %entry.id, "Failed to load note state: {}", e);
            }
        }

        info!("Loaded {} note(s)", workspace.notes.len());
        Ok(workspace)
    }

    fn insert_snapshot(&mut self, snapshot: NoteSnapshot) -> Result<()> {
        let NoteSnapshot { mut meta, state } = snapshot;
        let doc = LoroTextDocument::from_state(self.peer_id, &state)?;
        let mut bridge = TextBridge::new(doc);

        // Containers from before CRDT bodies carry their text inline
        if state.is_empty() {
            if let Some(body) = meta.body.take() {
                debug!(note_id = %meta.id, "Seeding document from legacy body");
                bridge.set_text(&body)?;
            }
        }

        self.notes.insert(meta.id.clone(), OpenNote { meta, bridge });
        Ok(())
    }

    pub fn persistence(&self) -> &NotePersistence<S> {
        &self.persistence
    }

    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.notes.contains_key(note_id)
    }

    /// Open note ids in id order.
    pub fn note_ids(&self) -> Vec<String> {
        self.notes.keys().cloned().collect()
    }

    pub fn text(&self, note_id: &str) -> Option<String> {
        self.notes.get(note_id).map(|note| note.bridge.text())
    }

    pub fn meta(&self, note_id: &str) -> Option<&NoteMeta> {
        self.notes.get(note_id).map(|note| &note.meta)
    }

    /// Create an empty note and schedule its first save. Returns the new id.
    pub fn create_note(&mut self, title: &str) -> Result<String> {
        let title = if title.trim().is_empty() { UNTITLED } else { title };
        let meta = NoteMeta::create(title, self.persistence.now_millis());
        let id = meta.id.clone();
        let bridge = TextBridge::new(LoroTextDocument::with_peer_id(self.peer_id)?);

        self.notes.insert(id.clone(), OpenNote { meta, bridge });
        self.schedule_save(&id);
        info!(note_id = %id, "Created note");
        Ok(id)
    }

    /// Replace a note's text. Returns the update to send to peers, or `None`
    /// when the text is unchanged.
    pub fn edit(&mut self, note_id: &str, text: &str) -> Result<Option<Vec<u8>>> {
        let now = self.persistence.now_millis();
        let note = self.note_mut(note_id)?;
        let Some(update) = note.bridge.set_text(text)? else {
            return Ok(None);
        };
        note.meta.updated_at = now;
        self.schedule_save(note_id);
        Ok(Some(update))
    }

    /// Make sure a note first seen on a peer has a local replica. Returns
    /// whether one was created.
    pub fn ensure_replica(&mut self, note_id: &str) -> Result<bool> {
        if self.notes.contains_key(note_id) {
            return Ok(false);
        }
        let meta = NoteMeta::with_id(note_id, UNTITLED, self.persistence.now_millis());
        let bridge = TextBridge::new(LoroTextDocument::with_peer_id(self.peer_id)?);
        self.notes.insert(note_id.to_string(), OpenNote { meta, bridge });
        debug!(note_id, "Created replica for peer note");
        Ok(true)
    }

    pub fn state_vector(&self, note_id: &str) -> Option<Vec<u8>> {
        self.notes
            .get(note_id)
            .map(|note| note.bridge.encode_state_vector())
    }

    /// Everything a peer holding `state_vector` is missing.
    pub fn update_since(&self, note_id: &str, state_vector: &[u8]) -> Result<Vec<u8>> {
        let note = self
            .notes
            .get(note_id)
            .ok_or_else(|| anyhow!("Unknown note: {note_id}"))?;
        Ok(note.bridge.encode_state_as_update(Some(state_vector))?)
    }

    /// Merge a peer update. Returns whether the note changed; only then is a
    /// save scheduled.
    pub fn apply_remote(&mut self, note_id: &str, update: &[u8]) -> Result<bool> {
        let now = self.persistence.now_millis();
        let note = self.note_mut(note_id)?;
        if !note.bridge.apply_peer_update(update)? {
            return Ok(false);
        }
        note.meta.updated_at = now;
        self.schedule_save(note_id);
        Ok(true)
    }

    /// Write every open note now, replacing pending debounced saves.
    pub async fn flush_all(&self) -> Result<()> {
        let mut failed = 0;
        for (id, note) in &self.notes {
            let result = match note.snapshot() {
                Ok(snapshot) => self.persistence.flush(&snapshot).await.map_err(Into::into),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(note_id = %id, "Failed to flush note: {}", e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(anyhow!("{failed} note(s) could not be flushed"));
        }
        Ok(())
    }

    fn note_mut(&mut self, note_id: &str) -> Result<&mut OpenNote> {
        self.notes
            .get_mut(note_id)
            .ok_or_else(|| anyhow!("Unknown note: {note_id}"))
    }

    fn schedule_save(&self, note_id: &str) {
        let Some(note) = self.notes.get(note_id) else {
            return;
        };
        match note.snapshot() {
            Ok(snapshot) => self.persistence.schedule_save(snapshot),
            Err(e) => warn!(note_id, "Could not snapshot note for saving: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hypernote_core::{CrdtDocument, InMemoryStore, ManualClock};
    use std::sync::Arc;
    use std::time::Duration;

    fn persistence(store: &Arc<InMemoryStore>) -> NotePersistence<InMemoryStore> {
        NotePersistence::new(Arc::clone(store))
            .with_quiet_window(Duration::from_millis(100))
            .with_clock(Arc::new(ManualClock::new(1_000)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_schedules_save() {
        let store = Arc::new(InMemoryStore::new());
        let mut workspace = NoteWorkspace::new(persistence(&store), PeerId::from(1));

        let id = workspace.create_note("").unwrap();
        assert_eq!(workspace.meta(&id).unwrap().title, "Untitled");

        let update = workspace.edit(&id, "hello").unwrap();
        assert!(update.is_some());
        assert!(workspace.edit(&id, "hello").unwrap().is_none());
        assert!(!store.contains(&id));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.contains(&id));

        let reloaded = NoteWorkspace::load(persistence(&store), PeerId::from(2))
            .await
            .unwrap();
        assert_eq!(reloaded.text(&id).as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_load_skips_corrupt_and_seeds_legacy_body() {
        let store = Arc::new(InMemoryStore::new());
        let mut legacy = NoteMeta::with_id("legacy", "Old", 10);
        legacy.body = Some("inline text".to_string());
        store.insert_raw("legacy", container::encode(&legacy, &[]).unwrap());
        store.insert_raw("broken", b"not a container".to_vec());

        let workspace = NoteWorkspace::load(persistence(&store), PeerId::from(1))
            .await
            .unwrap();

        assert_eq!(workspace.note_ids(), vec!["legacy".to_string()]);
        assert_eq!(workspace.text("legacy").as_deref(), Some("inline text"));
        assert_eq!(workspace.meta("legacy").unwrap().body, None);
    }

    #[tokio::test]
    async fn test_load_skips_container_named_for_another_note() {
        let store = Arc::new(InMemoryStore::new());
        let mut stray = NoteMeta::with_id("other", "Stray", 10);
        stray.body = Some("text".to_string());
        store.insert_raw("alias", container::encode(&stray, &[]).unwrap());
        let kept = NoteMeta::with_id("kept", "Kept", 10);
        store.insert_raw("kept", container::encode(&kept, &[]).unwrap());

        let workspace = NoteWorkspace::load(persistence(&store), PeerId::from(1))
            .await
            .unwrap();

        assert_eq!(workspace.note_ids(), vec!["kept".to_string()]);
        assert!(!workspace.contains("other"));
        assert!(!workspace.contains("alias"));
    }

    #[tokio::test]
    async fn test_replica_sync_and_flush() {
        let store_a = Arc::new(InMemoryStore::new());
        let store_b = Arc::new(InMemoryStore::new());
        let mut a = NoteWorkspace::new(persistence(&store_a), PeerId::from(1));
        let mut b = NoteWorkspace::new(persistence(&store_b), PeerId::from(2));

        let id = a.create_note("Shared").unwrap();
        a.edit(&id, "from a").unwrap();

        assert!(b.ensure_replica(&id).unwrap());
        assert!(!b.ensure_replica(&id).unwrap());

        let sv = b.state_vector(&id).unwrap();
        let update = a.update_since(&id, &sv).unwrap();
        assert!(b.apply_remote(&id, &update).unwrap());
        assert!(!b.apply_remote(&id, &update).unwrap());
        assert_eq!(b.text(&id).as_deref(), Some("from a"));

        b.flush_all().await.unwrap();
        assert!(store_b.contains(&id));
        assert!(!b.persistence().scheduler().is_pending(&id));

        let snapshot = b.persistence().open(&id).await.unwrap();
        let doc = LoroTextDocument::from_state(PeerId::from(3), &snapshot.state).unwrap();
        assert_eq!(doc.text(), "from a");
    }

    #[tokio::test]
    async fn test_unknown_note_errors() {
        let store = Arc::new(InMemoryStore::new());
        let mut workspace = NoteWorkspace::new(persistence(&store), PeerId::from(1));

        assert!(workspace.edit("missing", "x").is_err());
        assert!(workspace.apply_remote("missing", &[]).is_err());
        assert!(workspace.update_since("missing", &[]).is_err());
        assert!(workspace.state_vector("missing").is_none());
    }
}
