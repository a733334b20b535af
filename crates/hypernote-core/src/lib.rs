//! hypernote-core: sync and durable storage engine for Hypernote peers.
//!
//! This crate provides the core functionality for:
//! - Framing and admission of peer-to-peer sync traffic (`protocol`)
//! - The checksummed binary note container (`container`)
//! - Debounced persistence and the trash lifecycle (`persistence`)
//! - Peer and per-note sync status aggregation (`peer_status`)
//! - The CRDT document seam, backed by Loro (`document`)
//!
//! Platform independent: storage arrives through the `NoteStore` trait and
//! transports live in the daemon crate.

pub mod clock;
pub mod container;
pub mod display_name;
pub mod document;
pub mod index;
pub mod note;
pub mod peer_id;
pub mod peer_status;
pub mod persistence;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod target;
pub mod trash;

pub use clock::{Clock, ManualClock, SystemClock};
pub use container::{ContainerError, DecodedContainer};
pub use display_name::peer_display_name;
pub use document::{CrdtDocument, DocumentError, LoroTextDocument, TextBridge, UpdateOrigin};
pub use index::MetadataIndex;
pub use note::{NoteMeta, NoteSnapshot};
pub use peer_id::{PeerId, PeerIdError};
pub use peer_status::{PeerInfo, PeerStatus, PeerStatusState, PeerStatusStore, SyncState, SyncStatus};
pub use persistence::{NotePersistence, PersistenceError};
pub use scheduler::SaveScheduler;
pub use store::{ContainerEntry, InMemoryStore, NoteStore, StoreError};
pub use target::{JoinTarget, TargetError};
pub use trash::TrashMover;
