//! Note persistence: debounced saves, open, listing and the trash lifecycle.
//!
//! `NotePersistence` sits on top of a `NoteStore` and owns encoding of note
//! snapshots into containers. Trash handling stamps `deletedAt` into the
//! container so that `sweep_trash` can later garbage collect old entries.

use crate::clock::{Clock, SystemClock};
use crate::container::{self, ContainerError};
use crate::index::{self, MetadataIndex};
use crate::note::{NoteMeta, NoteSnapshot};
use crate::scheduler::SaveScheduler;
use crate::store::{NoteStore, StoreError};
use crate::trash::TrashMover;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_TRASH_RETENTION_DAYS: u32 = 30;

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Container error: {0}")]
    Container(#[from] ContainerError),
}

pub type Result<T> = std::result::Result<T, PersistenceError>;

pub struct NotePersistence<S> {
    store: Arc<S>,
    scheduler: SaveScheduler,
    index: MetadataIndex<S>,
    trash: TrashMover<S>,
    clock: Arc<dyn Clock>,
}

impl<S> Clone for NotePersistence<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            scheduler: self.scheduler.clone(),
            index: self.index.clone(),
            trash: self.trash.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<S: NoteStore + 'static> NotePersistence<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            index: MetadataIndex::new(Arc::clone(&store)),
            trash: TrashMover::new(Arc::clone(&store)),
            scheduler: SaveScheduler::default(),
            clock: Arc::new(SystemClock),
            store,
        }
    }

    pub fn with_scheduler(mut self, scheduler: SaveScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_quiet_window(self, quiet_window: Duration) -> Self {
        self.with_scheduler(SaveScheduler::new(quiet_window))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn scheduler(&self) -> &SaveScheduler {
        &self.scheduler
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Save once the note has been quiet for the scheduler window. A failed
    /// deferred write is logged; there is no caller left to report it to.
    pub fn schedule_save(&self, snapshot: NoteSnapshot) {
        let this = self.clone();
        let note_id = snapshot.meta.id.clone();
        self.scheduler.schedule(note_id.clone(), async move {
            if let Err(e) = this.save_now(&snapshot).await {
                warn!(note_id = %note_id, "Deferred save failed: {}", e);
            }
        });
    }

    pub async fn save_now(&self, snapshot: &NoteSnapshot) -> Result<()> {
        let bytes = container::encode(&snapshot.meta, &snapshot.state)?;
        self.store.write_container(&snapshot.meta.id, &bytes).await?;
        debug!(note_id = %snapshot.meta.id, size = bytes.len(), "Saved note");
        Ok(())
    }

    /// Drop any pending debounced save for the note and write it right away.
    pub async fn flush(&self, snapshot: &NoteSnapshot) -> Result<()> {
        self.scheduler.cancel(&snapshot.meta.id);
        self.save_now(snapshot).await
    }

    pub async fn open(&self, note_id: &str) -> Result<NoteSnapshot> {
        let bytes = self.store.read_container(note_id).await?;
        let decoded = container::decode(&bytes)?;
        Ok(NoteSnapshot::new(decoded.meta, decoded.body))
    }

    pub async fn list_metadata(&self) -> Result<Vec<NoteMeta>> {
        Ok(self.index.list().await?)
    }

    pub async fn move_to_trash(&self, note_id: &str) -> Result<()> {
        // A late debounced write would recreate the note in active storage
        self.scheduler.cancel(note_id);

        let deleted_at = self.clock.now_millis();
        if let Err(e) = self.restamp(note_id, Some(deleted_at)).await {
            warn!(note_id, "Could not stamp deletedAt before trashing: {}", e);
        }

        self.trash.move_to_trash(note_id).await?;
        info!(note_id, "Moved note to trash");
        Ok(())
    }

    /// Trashed notes, most recently deleted first. Entries without a stamp
    /// sort as if deleted at the epoch.
    pub async fn list_trash_metadata(&self) -> Result<Vec<NoteMeta>> {
        let entries = self.store.list_trash_containers().await?;
        let mut metas = index::decode_entries(entries, "trash");
        metas.sort_by(|a, b| b.deleted_at.unwrap_or(0).cmp(&a.deleted_at.unwrap_or(0)));
        Ok(metas)
    }

    pub async fn restore_from_trash(&self, note_id: &str) -> Result<()> {
        self.store.restore_from_trash(note_id).await?;

        if let Err(e) = self.restamp(note_id, None).await {
            warn!(note_id, "Could not clear deletedAt after restore: {}", e);
        }
        info!(note_id, "Restored note from trash");
        Ok(())
    }

    /// Permanently delete trash entries stamped more than `max_age_days` ago.
    /// Returns the ids that were removed.
    pub async fn sweep_trash(&self, max_age_days: u32) -> Result<Vec<String>> {
        let cutoff = i64::from(max_age_days) * MILLIS_PER_DAY;
        let now = self.clock.now_millis();
        let mut removed = Vec::new();

        for entry in self.store.list_trash_containers().await? {
            let meta = match container::decode_metadata(&entry.bytes) {
                Ok(meta) => meta,
                Err(e) => {
                    debug!(note_id = %entry.id, "Skipping malformed trash entry: {}", e);
                    continue;
                }
            };

            let Some(deleted_at) = meta.deleted_at else {
                continue;
            };
            if now.saturating_sub(deleted_at) <= cutoff {
                continue;
            }

            match self.store.permanent_delete_from_trash(&entry.id).await {
                Ok(()) => removed.push(entry.id),
                Err(e) => warn!(note_id = %entry.id, "Failed to purge trash entry: {}", e),
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), max_age_days, "Swept trash");
        }
        Ok(removed)
    }

    /// Rewrite an active container with a new `deletedAt`. Skips the write
    /// when the stamp already matches.
    async fn restamp(&self, note_id: &str, deleted_at: Option<i64>) -> Result<()> {
        let bytes = self.store.read_container(note_id).await?;
        let decoded = container::decode(&bytes)?;
        if decoded.meta.deleted_at == deleted_at {
            return Ok(());
        }

        let meta = NoteMeta {
            deleted_at,
            ..decoded.meta
        };
        let bytes = container::encode(&meta, &decoded.body)?;
        self.store.write_container(note_id, &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    const NOW: i64 = 1_700_000_000_000;

    fn setup() -> (Arc<InMemoryStore>, Arc<ManualClock>, NotePersistence<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW));
        let persistence = NotePersistence::new(Arc::clone(&store))
            .with_quiet_window(Duration::from_millis(500))
            .with_clock(clock.clone());
        (store, clock, persistence)
    }

    fn snapshot(id: &str, updated_at: i64) -> NoteSnapshot {
        let mut meta = NoteMeta::with_id(id, format!("Note {id}"), 0);
        meta.updated_at = updated_at;
        NoteSnapshot::new(meta, vec![7, 7, 7])
    }

    fn trashed(id: &str, deleted_at: Option<i64>) -> Vec<u8> {
        let mut meta = NoteMeta::with_id(id, id, 0);
        meta.deleted_at = deleted_at;
        container::encode(&meta, &[]).unwrap()
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    // ==================== Save / open ====================

    #[tokio::test]
    async fn test_save_and_open() {
        let (_, _, persistence) = setup();
        let note = snapshot("a", 10);
        persistence.save_now(&note).await.unwrap();
        assert_eq!(persistence.open("a").await.unwrap(), note);
    }

    #[tokio::test]
    async fn test_open_missing_propagates() {
        let (_, _, persistence) = setup();
        assert!(matches!(
            persistence.open("nope").await,
            Err(PersistenceError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_open_corrupt_propagates() {
        let (store, _, persistence) = setup();
        store.insert_raw("bad", vec![0; 32]);
        assert!(matches!(
            persistence.open("bad").await,
            Err(PersistenceError::Container(ContainerError::BadMagic))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_save_writes_last_snapshot() {
        let (store, _, persistence) = setup();

        persistence.schedule_save(snapshot("a", 1));
        tokio::time::advance(Duration::from_millis(200)).await;
        persistence.schedule_save(snapshot("a", 2));
        tokio::time::advance(Duration::from_millis(499)).await;
        settle().await;
        assert!(!store.contains("a"));

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(persistence.open("a").await.unwrap().meta.updated_at, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_cancels_pending_save() {
        let (_, _, persistence) = setup();

        persistence.schedule_save(snapshot("a", 1));
        persistence.flush(&snapshot("a", 2)).await.unwrap();
        assert!(!persistence.scheduler().is_pending("a"));

        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;
        assert_eq!(persistence.open("a").await.unwrap().meta.updated_at, 2);
    }

    // ==================== Listing ====================

    #[tokio::test]
    async fn test_list_metadata_sorted_and_skips_garbage() {
        let (store, _, persistence) = setup();
        persistence.save_now(&snapshot("old", 100)).await.unwrap();
        persistence.save_now(&snapshot("new", 200)).await.unwrap();
        store.insert_raw("junk", b"garbage".to_vec());

        let ids: Vec<_> = persistence
            .list_metadata()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    // ==================== Trash ====================

    #[tokio::test]
    async fn test_move_to_trash_stamps_deleted_at() {
        let (store, _, persistence) = setup();
        persistence.save_now(&snapshot("a", 1)).await.unwrap();

        persistence.move_to_trash("a").await.unwrap();
        assert!(!store.contains("a"));

        let trash = persistence.list_trash_metadata().await.unwrap();
        assert_eq!(trash.len(), 1);
        assert_eq!(trash[0].deleted_at, Some(NOW));
    }

    #[tokio::test]
    async fn test_move_to_trash_survives_unreadable_container() {
        let (store, _, persistence) = setup();
        store.insert_raw("raw", b"not a container".to_vec());

        persistence.move_to_trash("raw").await.unwrap();
        assert!(store.contains_in_trash("raw"));
    }

    #[tokio::test]
    async fn test_move_missing_to_trash_fails() {
        let (_, _, persistence) = setup();
        assert!(matches!(
            persistence.move_to_trash("ghost").await,
            Err(PersistenceError::Store(StoreError::NotFound(_)))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_to_trash_cancels_pending_save() {
        let (store, _, persistence) = setup();
        persistence.save_now(&snapshot("a", 1)).await.unwrap();
        persistence.schedule_save(snapshot("a", 2));

        persistence.move_to_trash("a").await.unwrap();
        tokio::time::advance(Duration::from_millis(600)).await;
        settle().await;

        assert!(!store.contains("a"));
        assert!(store.contains_in_trash("a"));
    }

    #[tokio::test]
    async fn test_trash_listing_order() {
        let (store, _, persistence) = setup();
        store.insert_raw_trash("never", trashed("never", None));
        store.insert_raw_trash("early", trashed("early", Some(10)));
        store.insert_raw_trash("late", trashed("late", Some(20)));
        store.insert_raw_trash("broken", vec![1, 2, 3]);

        let ids: Vec<_> = persistence
            .list_trash_metadata()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["late", "early", "never"]);
    }

    #[tokio::test]
    async fn test_restore_clears_stamp() {
        let (_, clock, persistence) = setup();
        persistence.save_now(&snapshot("a", 1)).await.unwrap();
        persistence.move_to_trash("a").await.unwrap();

        clock.advance(1_000);
        persistence.restore_from_trash("a").await.unwrap();
        let note = persistence.open("a").await.unwrap();
        assert_eq!(note.meta.deleted_at, None);
        assert!(persistence.list_trash_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_missing_fails() {
        let (_, _, persistence) = setup();
        assert!(persistence.restore_from_trash("ghost").await.is_err());
    }

    // ==================== Sweep ====================

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let (store, _, persistence) = setup();
        let thirty_one_days = 31 * MILLIS_PER_DAY;
        store.insert_raw_trash("old", trashed("old", Some(NOW - thirty_one_days)));
        store.insert_raw_trash("fresh", trashed("fresh", Some(NOW - 1_000)));
        store.insert_raw_trash("unstamped", trashed("unstamped", None));
        store.insert_raw_trash("broken", b"xx".to_vec());

        let removed = persistence
            .sweep_trash(DEFAULT_TRASH_RETENTION_DAYS)
            .await
            .unwrap();
        assert_eq!(removed, vec!["old"]);
        assert!(!store.contains_in_trash("old"));
        assert!(store.contains_in_trash("fresh"));
        assert!(store.contains_in_trash("unstamped"));
        assert!(store.contains_in_trash("broken"));
    }

    #[tokio::test]
    async fn test_sweep_cutoff_is_strict() {
        let (store, _, persistence) = setup();
        let exactly = NOW - MILLIS_PER_DAY;
        store.insert_raw_trash("edge", trashed("edge", Some(exactly)));

        assert!(persistence.sweep_trash(1).await.unwrap().is_empty());
        store.insert_raw_trash("past", trashed("past", Some(exactly - 1)));
        assert_eq!(persistence.sweep_trash(1).await.unwrap(), vec!["past"]);
    }

    #[tokio::test]
    async fn test_sweep_extreme_timestamps() {
        let (store, _, persistence) = setup();
        store.insert_raw_trash("ancient", trashed("ancient", Some(i64::MIN)));
        store.insert_raw_trash("future", trashed("future", Some(i64::MAX)));

        assert_eq!(persistence.sweep_trash(30).await.unwrap(), vec!["ancient"]);
        assert!(store.contains_in_trash("future"));
    }

    #[tokio::test]
    async fn test_sweep_after_clock_advance() {
        let (_, clock, persistence) = setup();
        persistence.save_now(&snapshot("a", 1)).await.unwrap();
        persistence.move_to_trash("a").await.unwrap();

        clock.advance(30 * MILLIS_PER_DAY);
        assert!(persistence.sweep_trash(30).await.unwrap().is_empty());
        clock.advance(1);
        assert_eq!(persistence.sweep_trash(30).await.unwrap(), vec!["a"]);
    }
}
