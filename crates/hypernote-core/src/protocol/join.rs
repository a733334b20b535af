//! Join admission state machine.
//!
//! Every transport connection carries a `JoinPeerState`. Inbound connections
//! wait for the local host to approve them; outbound connections wait for the
//! remote host to answer with its `hello`. Until a connection is approved only
//! control frames are admitted, and no sync traffic is sent.
//!
//! The machine is pure. Unlisted (state, event) pairs leave the state as is.

use super::frame::FrameType;
use crate::peer_status::PeerStatus;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinDirection {
    /// A remote peer connected to us
    Inbound,
    /// We connected to a remote host
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinLifecycle {
    Disconnected,
    PendingInboundApproval,
    PendingOutboundApproval,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinEvent {
    HostApproved,
    HostRejected,
    HostHello,
    TransportClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JoinPeerState {
    pub direction: JoinDirection,
    pub lifecycle: JoinLifecycle,
}

impl JoinPeerState {
    pub fn new(direction: JoinDirection) -> Self {
        let lifecycle = match direction {
            JoinDirection::Inbound => JoinLifecycle::PendingInboundApproval,
            JoinDirection::Outbound => JoinLifecycle::PendingOutboundApproval,
        };
        Self {
            direction,
            lifecycle,
        }
    }

    pub fn transition(self, event: JoinEvent) -> Self {
        use JoinEvent::*;
        use JoinLifecycle::*;

        let lifecycle = match (self.lifecycle, event) {
            (Disconnected, _) => Disconnected,
            (_, TransportClosed) => Disconnected,

            (PendingInboundApproval, HostApproved) => Approved,
            (PendingInboundApproval, HostRejected) => Rejected,

            (PendingOutboundApproval, HostApproved | HostHello) => Approved,
            (PendingOutboundApproval, HostRejected) => Rejected,

            (Approved, HostRejected) => Rejected,

            (current, _) => current,
        };
        Self { lifecycle, ..self }
    }

    /// Whether a frame of `frame_type` from the remote side may be processed.
    pub fn allows_inbound_frame(&self, frame_type: FrameType) -> bool {
        match self.lifecycle {
            JoinLifecycle::Approved => true,
            JoinLifecycle::PendingOutboundApproval => {
                matches!(frame_type, FrameType::Hello | FrameType::Error)
            }
            JoinLifecycle::PendingInboundApproval => frame_type == FrameType::Error,
            JoinLifecycle::Rejected | JoinLifecycle::Disconnected => false,
        }
    }

    pub fn allows_outbound_sync(&self) -> bool {
        self.is_approved()
    }

    pub fn peer_status(&self) -> PeerStatus {
        match self.lifecycle {
            JoinLifecycle::PendingInboundApproval | JoinLifecycle::PendingOutboundApproval => {
                PeerStatus::Connecting
            }
            JoinLifecycle::Approved => PeerStatus::Connected,
            JoinLifecycle::Rejected | JoinLifecycle::Disconnected => PeerStatus::Disconnected,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.lifecycle == JoinLifecycle::Approved
    }

    pub fn is_pending_inbound_approval(&self) -> bool {
        self.lifecycle == JoinLifecycle::PendingInboundApproval
    }
}
