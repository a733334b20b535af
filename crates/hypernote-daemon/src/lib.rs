//! hypernote-daemon library: the pieces of the headless peer.
//!
//! Exposed as a library so the integration tests can drive real hosts.

pub mod config;
pub mod connection;
pub mod fs_store;
pub mod host;
pub mod workspace;

// Re-export key types for convenience
pub use config::{Args, DaemonConfig, InboundPolicy};
pub use connection::{ConnectionEvent, InboundMessage, PeerConnection};
pub use fs_store::FsNoteStore;
pub use host::SyncHost;
pub use workspace::NoteWorkspace;
