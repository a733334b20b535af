use crate::store::{NoteStore, Result};
use std::sync::Arc;

/// Relocates notes from active storage into trash.
pub struct TrashMover<S> {
    store: Arc<S>,
}

impl<S> Clone for TrashMover<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: NoteStore> TrashMover<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Fails with `StoreError::NotFound` when the note is not active.
    pub async fn move_to_trash(&self, note_id: &str) -> Result<()> {
        self.store.move_container_to_trash(note_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryStore, StoreError};

    #[tokio::test]
    async fn test_move_relocates() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_raw("n", vec![1]);

        TrashMover::new(Arc::clone(&store)).move_to_trash("n").await.unwrap();
        assert!(!store.contains("n"));
        assert!(store.contains_in_trash("n"));
    }

    #[tokio::test]
    async fn test_move_missing_is_not_found() {
        let mover = TrashMover::new(Arc::new(InMemoryStore::new()));
        assert_eq!(
            mover.move_to_trash("ghost").await,
            Err(StoreError::NotFound("ghost".to_string()))
        );
    }
}
