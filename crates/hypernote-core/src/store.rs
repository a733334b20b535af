//! NoteStore trait abstraction over durable container storage.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and ephemeral peers
//! - `FsNoteStore` (in hypernote-daemon) - One file per note under `notes/` and `trash/`
//!
//! Stores deal in opaque container bytes keyed by note id; encoding and
//! decoding is the persistence layer's job.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Note not found: {0}")]
    NotFound(String),

    #[error("Invalid note id: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A stored container together with the key it was found under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEntry {
    pub id: String,
    pub bytes: Vec<u8>,
}

impl ContainerEntry {
    pub fn new(id: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            bytes,
        }
    }
}

/// Durable storage for note containers, split into active and trash areas.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Every container in active storage, in storage enumeration order
    async fn list_containers(&self) -> Result<Vec<ContainerEntry>>;

    /// Read one active container
    async fn read_container(&self, note_id: &str) -> Result<Vec<u8>>;

    /// Create or replace an active container
    async fn write_container(&self, note_id: &str, bytes: &[u8]) -> Result<()>;

    /// Move a container from active storage to trash
    async fn move_container_to_trash(&self, note_id: &str) -> Result<()>;

    /// Every container in trash, in storage enumeration order
    async fn list_trash_containers(&self) -> Result<Vec<ContainerEntry>>;

    /// Remove a container from trash for good
    async fn permanent_delete_from_trash(&self, note_id: &str) -> Result<()>;

    /// Move a container from trash back to active storage
    async fn restore_from_trash(&self, note_id: &str) -> Result<()>;
}

#[async_trait]
impl<T: NoteStore + ?Sized> NoteStore for Arc<T> {
    async fn list_containers(&self) -> Result<Vec<ContainerEntry>> {
        (**self).list_containers().await
    }

    async fn read_container(&self, note_id: &str) -> Result<Vec<u8>> {
        (**self).read_container(note_id).await
    }

    async fn write_container(&self, note_id: &str, bytes: &[u8]) -> Result<()> {
        (**self).write_container(note_id, bytes).await
    }

    async fn move_container_to_trash(&self, note_id: &str) -> Result<()> {
        (**self).move_container_to_trash(note_id).await
    }

    async fn list_trash_containers(&self) -> Result<Vec<ContainerEntry>> {
        (**self).list_trash_containers().await
    }

    async fn permanent_delete_from_trash(&self, note_id: &str) -> Result<()> {
        (**self).permanent_delete_from_trash(note_id).await
    }

    async fn restore_from_trash(&self, note_id: &str) -> Result<()> {
        (**self).restore_from_trash(note_id).await
    }
}

/// In-memory store, enumerated in note id order.
#[derive(Default)]
pub struct InMemoryStore {
    notes: RwLock<BTreeMap<String, Vec<u8>>>,
    trash: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place raw bytes in active storage, bypassing any encoding
    pub fn insert_raw(&self, note_id: &str, bytes: Vec<u8>) {
        self.notes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(note_id.to_string(), bytes);
    }

    /// Place raw bytes in trash, bypassing any encoding
    pub fn insert_raw_trash(&self, note_id: &str, bytes: Vec<u8>) {
        self.trash
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(note_id.to_string(), bytes);
    }

    pub fn contains(&self, note_id: &str) -> bool {
        self.notes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(note_id)
    }

    pub fn contains_in_trash(&self, note_id: &str) -> bool {
        self.trash
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(note_id)
    }

    fn entries(map: &RwLock<BTreeMap<String, Vec<u8>>>) -> Vec<ContainerEntry> {
        map.read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, bytes)| ContainerEntry::new(id.clone(), bytes.clone()))
            .collect()
    }

    fn relocate(
        from: &RwLock<BTreeMap<String, Vec<u8>>>,
        to: &RwLock<BTreeMap<String, Vec<u8>>>,
        note_id: &str,
    ) -> Result<()> {
        let bytes = from
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(note_id)
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))?;
        to.write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(note_id.to_string(), bytes);
        Ok(())
    }
}

#[async_trait]
impl NoteStore for InMemoryStore {
    async fn list_containers(&self) -> Result<Vec<ContainerEntry>> {
        Ok(Self::entries(&self.notes))
    }

    async fn read_container(&self, note_id: &str) -> Result<Vec<u8>> {
        self.notes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(note_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))
    }

    async fn write_container(&self, note_id: &str, bytes: &[u8]) -> Result<()> {
        self.insert_raw(note_id, bytes.to_vec());
        Ok(())
    }

    async fn move_container_to_trash(&self, note_id: &str) -> Result<()> {
        Self::relocate(&self.notes, &self.trash, note_id)
    }

    async fn list_trash_containers(&self) -> Result<Vec<ContainerEntry>> {
        Ok(Self::entries(&self.trash))
    }

    async fn permanent_delete_from_trash(&self, note_id: &str) -> Result<()> {
        self.trash
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(note_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(note_id.to_string()))
    }

    async fn restore_from_trash(&self, note_id: &str) -> Result<()> {
        Self::relocate(&self.trash, &self.notes, note_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read() {
        let store = InMemoryStore::new();
        store.write_container("a", b"bytes").await.unwrap();
        assert_eq!(store.read_container("a").await.unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_read_missing() {
        let store = InMemoryStore::new();
        assert_eq!(
            store.read_container("nope").await,
            Err(StoreError::NotFound("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_list_is_ordered_by_id() {
        let store = InMemoryStore::new();
        store.write_container("b", b"2").await.unwrap();
        store.write_container("a", b"1").await.unwrap();

        let ids: Vec<_> = store
            .list_containers()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_trash_round_trip() {
        let store = InMemoryStore::new();
        store.write_container("a", b"1").await.unwrap();

        store.move_container_to_trash("a").await.unwrap();
        assert!(!store.contains("a"));
        assert!(store.contains_in_trash("a"));
        assert_eq!(store.list_trash_containers().await.unwrap().len(), 1);

        store.restore_from_trash("a").await.unwrap();
        assert!(store.contains("a"));
        assert!(!store.contains_in_trash("a"));
    }

    #[tokio::test]
    async fn test_missing_relocations_fail() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.move_container_to_trash("x").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.restore_from_trash("x").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.permanent_delete_from_trash("x").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_arc_store_delegates() {
        let store = Arc::new(InMemoryStore::new());
        let shared: Arc<InMemoryStore> = Arc::clone(&store);
        shared.write_container("a", b"1").await.unwrap();
        assert!(store.contains("a"));
    }
}
