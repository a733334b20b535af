//! Note metadata and snapshots.
//!
//! `NoteMeta` is the JSON object stored in every container header. Field
//! names are camelCase on the wire so containers written by other Hypernote
//! builds decode unchanged.

use serde::{Deserialize, Serialize};

/// Title given to notes created without one.
pub const UNTITLED: &str = "Untitled";

/// Metadata stored in a note container header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteMeta {
    /// Stable note identifier (also the storage key)
    pub id: String,
    /// Human readable title
    pub title: String,
    /// Creation time in milliseconds since epoch
    pub created_at: i64,
    /// Last modification time in milliseconds since epoch
    pub updated_at: i64,
    /// When the note was moved to trash (None = active)
    pub deleted_at: Option<i64>,
    /// Legacy inline content from containers written before CRDT bodies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl NoteMeta {
    /// Create metadata for a brand new note with a random id.
    pub fn create(title: impl Into<String>, now_ms: i64) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), title, now_ms)
    }

    /// Create metadata for a note whose id is already known (e.g. a replica
    /// of a note first seen on a peer).
    pub fn with_id(id: impl Into<String>, title: impl Into<String>, now_ms: i64) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now_ms,
            updated_at: now_ms,
            deleted_at: None,
            body: None,
        }
    }

    pub fn is_trashed(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A note as persisted: metadata plus the opaque CRDT document state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSnapshot {
    pub meta: NoteMeta,
    pub state: Vec<u8>,
}

impl NoteSnapshot {
    pub fn new(meta: NoteMeta, state: Vec<u8>) -> Self {
        Self { meta, state }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_camel_case() {
        let meta = NoteMeta::with_id("note-1", "Test", 1);
        let json = serde_json::to_string(&meta).unwrap();

        assert!(json.contains("\"createdAt\":1"));
        assert!(json.contains("\"updatedAt\":1"));
        // Active notes still carry an explicit null
        assert!(json.contains("\"deletedAt\":null"));
        // Legacy body is omitted unless present
        assert!(!json.contains("\"body\""));
    }

    #[test]
    fn test_missing_deleted_at_reads_as_active() {
        let json = r#"{"id":"n","title":"t","createdAt":1,"updatedAt":2}"#;
        let meta: NoteMeta = serde_json::from_str(json).unwrap();
        assert!(!meta.is_trashed());
    }

    #[test]
    fn test_legacy_body_is_preserved() {
        let json = r#"{"id":"n","title":"t","createdAt":1,"updatedAt":2,"deletedAt":null,"body":"old"}"#;
        let meta: NoteMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.body.as_deref(), Some("old"));
    }

    #[test]
    fn test_create_generates_unique_ids() {
        let a = NoteMeta::create(UNTITLED, 10);
        let b = NoteMeta::create(UNTITLED, 10);
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
    }
}
