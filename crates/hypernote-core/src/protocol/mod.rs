//! Wire protocol for peer communication.
//!
//! - `frame`: JSON frames exchanged over the transport, with typed payloads
//! - `join`: admission state machine gating which frames a peer may send

pub mod frame;
pub mod join;

pub use frame::{
    create_frame, decode, is_valid_frame, serialize, BinaryPayload, ErrorPayload, Frame,
    FrameError, FramePayload, FrameType, HelloPayload, NoteListPayload, PresencePayload, RawFrame,
    WireFrame,
};
pub use join::{JoinDirection, JoinEvent, JoinLifecycle, JoinPeerState};

/// Current protocol version.
///
/// Frames carrying any other version are rejected on decode.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum inbound message size (50 MiB). Full snapshot updates of large
/// notes travel in a single frame.
pub const MAX_MESSAGE_SIZE: usize = 50 * 1024 * 1024;

/// Error codes carried in `error` frames.
pub mod error_code {
    /// The host declined the join request
    pub const JOIN_REJECTED: &str = "join_rejected";
    /// A frame could not be decoded
    pub const BAD_FRAME: &str = "bad_frame";
    /// A sync update could not be applied
    pub const SYNC_FAILED: &str = "sync_failed";
}
