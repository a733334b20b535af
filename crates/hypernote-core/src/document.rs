//! CRDT document collaborator.
//!
//! The sync engine never looks inside CRDT updates: it only needs to edit
//! plain text, exchange state vectors and updates, and learn about changes.
//! `CrdtDocument` is that seam; `LoroTextDocument` implements it over a
//! Loro document holding a single text container.
//!
//! `TextBridge` turns whole-text replacements (what an editor widget hands
//! over) into the minimal CRDT edit.

use crate::PeerId;
use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
use thiserror::Error;

/// Name of the text container holding the note body.
pub const TEXT_CONTAINER: &str = "content";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Loro error: {0}")]
    Loro(String),

    #[error("Invalid state vector: {0}")]
    InvalidStateVector(String),

    #[error("Document destroyed")]
    Destroyed,
}

pub type Result<T> = std::result::Result<T, DocumentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateOrigin {
    /// Edit made on this instance
    Local,
    /// Update received from a peer
    Remote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentUpdate {
    pub origin: UpdateOrigin,
    pub bytes: Vec<u8>,
}

pub type UpdateListener = Box<dyn Fn(&DocumentUpdate) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(usize);

/// Replicated text document.
///
/// Offsets and lengths count Unicode scalar values.
pub trait CrdtDocument: Send {
    fn text(&self) -> String;

    fn insert(&mut self, offset: usize, text: &str) -> Result<()>;

    fn delete(&mut self, offset: usize, len: usize) -> Result<()>;

    /// Seal pending edits into one update. Returns `None` when nothing changed
    /// since the last commit.
    fn commit(&mut self, origin: UpdateOrigin) -> Result<Option<Vec<u8>>>;

    fn encode_state_vector(&self) -> Vec<u8>;

    /// Everything the holder of `state_vector` is missing, or the full state
    /// when `None`.
    fn encode_state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>>;

    /// Merge an update. Returns whether the document learned anything new.
    fn apply_update(&mut self, update: &[u8], origin: UpdateOrigin) -> Result<bool>;

    fn subscribe(&mut self, listener: UpdateListener) -> ListenerId;

    fn unsubscribe(&mut self, id: ListenerId) -> bool;

    /// Drop listeners and refuse any further operation.
    fn destroy(&mut self);
}

pub struct LoroTextDocument {
    doc: LoroDoc,
    text: LoroText,
    /// Version before the first uncommitted edit
    pending_from: Option<VersionVector>,
    listeners: Vec<(ListenerId, UpdateListener)>,
    next_listener: usize,
    destroyed: bool,
}

impl LoroTextDocument {
    pub fn new() -> Self {
        let doc = LoroDoc::new();
        let text = doc.get_text(TEXT_CONTAINER);
        Self {
            doc,
            text,
            pending_from: None,
            listeners: Vec::new(),
            next_listener: 0,
            destroyed: false,
        }
    }

    /// Fresh document whose local edits are attributed to `peer_id`.
    pub fn with_peer_id(peer_id: PeerId) -> Result<Self> {
        let this = Self::new();
        this.doc
            .set_peer_id(peer_id.as_u64())
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(this)
    }

    /// Rebuild a document from persisted state. Empty state yields an empty
    /// document.
    pub fn from_state(peer_id: PeerId, state: &[u8]) -> Result<Self> {
        let this = Self::with_peer_id(peer_id)?;
        if !state.is_empty() {
            this.doc
                .import(state)
                .map_err(|e| DocumentError::Loro(e.to_string()))?;
        }
        Ok(this)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.destroyed {
            return Err(DocumentError::Destroyed);
        }
        Ok(())
    }

    fn mark_pending(&mut self) {
        if self.pending_from.is_none() {
            self.pending_from = Some(self.doc.oplog_vv());
        }
    }

    fn emit(&self, update: &DocumentUpdate) {
        for (_, listener) in &self.listeners {
            listener(update);
        }
    }
}

impl Default for LoroTextDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl CrdtDocument for LoroTextDocument {
    fn text(&self) -> String {
        self.text.to_string()
    }

    fn insert(&mut self, offset: usize, text: &str) -> Result<()> {
        self.ensure_live()?;
        if text.is_empty() {
            return Ok(());
        }
        self.mark_pending();
        self.text
            .insert(offset, text)
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    fn delete(&mut self, offset: usize, len: usize) -> Result<()> {
        self.ensure_live()?;
        if len == 0 {
            return Ok(());
        }
        self.mark_pending();
        self.text
            .delete(offset, len)
            .map_err(|e| DocumentError::Loro(e.to_string()))
    }

    fn commit(&mut self, origin: UpdateOrigin) -> Result<Option<Vec<u8>>> {
        self.ensure_live()?;
        let Some(from) = self.pending_from.take() else {
            return Ok(None);
        };
        self.doc.commit();

        let bytes = self
            .doc
            .export(ExportMode::updates(&from))
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        let update = DocumentUpdate { origin, bytes };
        self.emit(&update);
        Ok(Some(update.bytes))
    }

    fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.oplog_vv().encode()
    }

    fn encode_state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let mode = match state_vector {
            None => None,
            Some(bytes) => Some(
                VersionVector::decode(bytes)
                    .map_err(|e| DocumentError::InvalidStateVector(e.to_string()))?,
            ),
        };
        let exported = match &mode {
            None => self.doc.export(ExportMode::Snapshot),
            Some(from) => self.doc.export(ExportMode::updates(from)),
        };
        exported.map_err(|e| DocumentError::Loro(e.to_string()))
    }

    fn apply_update(&mut self, update: &[u8], origin: UpdateOrigin) -> Result<bool> {
        self.ensure_live()?;
        let before = self.doc.oplog_vv();
        self.doc
            .import(update)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        let changed = self.doc.oplog_vv() != before;
        if changed {
            self.emit(&DocumentUpdate {
                origin,
                bytes: update.to_vec(),
            });
        }
        Ok(changed)
    }

    fn subscribe(&mut self, listener: UpdateListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(i, _)| *i != id);
        self.listeners.len() != before
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.pending_from = None;
        self.listeners.clear();
    }
}

// ==================== Text bridge ====================

/// A single replace operation turning one text into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub offset: usize,
    pub delete_len: usize,
    pub insert: String,
}

/// Smallest edit that keeps the common prefix and suffix of both texts.
/// `None` when they are equal. Counts in chars.
pub fn minimal_edit(current: &str, next: &str) -> Option<TextEdit> {
    if current == next {
        return None;
    }
    let current: Vec<char> = current.chars().collect();
    let next: Vec<char> = next.chars().collect();

    let prefix = current
        .iter()
        .zip(&next)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = current.len().min(next.len()) - prefix;
    let suffix = current
        .iter()
        .rev()
        .zip(next.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    Some(TextEdit {
        offset: prefix,
        delete_len: current.len() - prefix - suffix,
        insert: next[prefix..next.len() - suffix].iter().collect(),
    })
}

/// Plain text view over a CRDT document.
pub struct TextBridge<D> {
    doc: D,
}

impl<D: CrdtDocument> TextBridge<D> {
    pub fn new(doc: D) -> Self {
        Self { doc }
    }

    pub fn text(&self) -> String {
        self.doc.text()
    }

    /// Replace the whole text, returning the local update to broadcast.
    pub fn set_text(&mut self, next: &str) -> Result<Option<Vec<u8>>> {
        let Some(edit) = minimal_edit(&self.doc.text(), next) else {
            return Ok(None);
        };
        self.doc.delete(edit.offset, edit.delete_len)?;
        self.doc.insert(edit.offset, &edit.insert)?;
        self.doc.commit(UpdateOrigin::Local)
    }

    pub fn apply_peer_update(&mut self, update: &[u8]) -> Result<bool> {
        self.doc.apply_update(update, UpdateOrigin::Remote)
    }

    pub fn encode_state_vector(&self) -> Vec<u8> {
        self.doc.encode_state_vector()
    }

    pub fn encode_state_as_update(&self, state_vector: Option<&[u8]>) -> Result<Vec<u8>> {
        self.doc.encode_state_as_update(state_vector)
    }

    pub fn document(&self) -> &D {
        &self.doc
    }

    pub fn document_mut(&mut self) -> &mut D {
        &mut self.doc
    }
}
