//! Listing of active notes from container metadata.

use crate::container;
use crate::note::NoteMeta;
use crate::store::{ContainerEntry, NoteStore, Result};
use std::sync::Arc;
use tracing::debug;

pub struct MetadataIndex<S> {
    store: Arc<S>,
}

impl<S> Clone for MetadataIndex<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: NoteStore> MetadataIndex<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Metadata of every readable active container, most recently updated
    /// first. Ties keep storage enumeration order.
    pub async fn list(&self) -> Result<Vec<NoteMeta>> {
        let entries = self.store.list_containers().await?;
        let mut metas = decode_entries(entries, "active");
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }
}

/// Decode metadata of each entry, dropping the ones that fail.
pub(crate) fn decode_entries(entries: Vec<ContainerEntry>, area: &str) -> Vec<NoteMeta> {
    entries
        .into_iter()
        .filter_map(|entry| match container::decode_metadata(&entry.bytes) {
            Ok(meta) => Some(meta),
            Err(e) => {
                debug!(note_id = %entry.id, area, "Skipping unreadable container: {}", e);
                None
            }
        })
        .collect()
}
