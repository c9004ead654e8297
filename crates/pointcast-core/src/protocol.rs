//! Replication protocol messages
//!
//! Messages are serialized with postcard and carried over a channel.
//!
//! ## Message Flow
//!
//! ```text
//! Participant                       Facilitator
//!   |                                   |
//!   |--- Join {id, name} -------------->|
//!   |<-- StateSync {session} -----------|   (first receipt resolves join)
//!   |                                   |
//!   |--- CastVote {id, value} --------->|
//!   |<-- StateSync {session} -----------|   (broadcast to every spoke)
//!   |                                   |
//!   |--- Leave {id} ------------------->|
//!   |<-- SessionClosed ----------------|   (facilitator shut the room)
//! ```
//!
//! Intents flow upstream only; broadcasts flow downstream only. Every
//! broadcast carries a complete snapshot, so a spoke that misses one
//! still converges on the next.

use serde::{Deserialize, Serialize};

use crate::code::ParticipantId;
use crate::types::Session;

/// Addressed failure codes carried on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Voter cap reached; the join was refused
    SessionFull,
    /// No session bound at the requested address
    SessionNotFound,
    /// Session code already bound elsewhere
    CodeTaken,
    /// Any other transport-layer failure
    PeerError,
}

/// Intent messages, participant -> facilitator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IntentMessage {
    /// Enroll, or no-op if already enrolled
    Join {
        /// The joining participant's id
        participant_id: ParticipantId,
        /// Name to show on the board
        display_name: String,
    },
    /// Record a vote if a round is open
    CastVote {
        /// The voting participant's id
        participant_id: ParticipantId,
        /// The estimate
        value: u32,
    },
    /// Remove this participant from the roster
    Leave {
        /// The leaving participant's id
        participant_id: ParticipantId,
    },
}

impl IntentMessage {
    /// Get the participant id this intent is about
    pub fn participant_id(&self) -> &ParticipantId {
        match self {
            IntentMessage::Join { participant_id, .. } => participant_id,
            IntentMessage::CastVote { participant_id, .. } => participant_id,
            IntentMessage::Leave { participant_id } => participant_id,
        }
    }
}

/// Broadcast messages, facilitator -> participants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BroadcastMessage {
    /// Replace the local mirror wholesale
    StateSync {
        /// Complete current session snapshot
        session: Session,
    },
    /// The facilitator closed the room
    SessionClosed,
    /// Addressed failure for one connection attempt
    Error {
        /// Why the request was refused
        code: ErrorCode,
    },
}

/// Either direction of the protocol, for the versioned envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    /// Upstream intent
    Intent(IntentMessage),
    /// Downstream broadcast
    Broadcast(BroadcastMessage),
}

/// Wrapper for versioned messages (future-proofing)
///
/// Decoding validates the version tag before any payload is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Protocol version 1
    V1(PeerMessage),
}

impl WireMessage {
    /// Wrap an intent message
    pub fn intent(msg: IntentMessage) -> Self {
        WireMessage::V1(PeerMessage::Intent(msg))
    }

    /// Wrap a broadcast message
    pub fn broadcast(msg: BroadcastMessage) -> Self {
        WireMessage::V1(PeerMessage::Broadcast(msg))
    }

    /// Encode to bytes using postcard
    pub fn encode(&self) -> Result<Vec<u8>, postcard::Error> {
        postcard::to_allocvec(self)
    }

    /// Decode from bytes using postcard
    pub fn decode(data: &[u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(data)
    }

    /// Unwrap the inner message
    pub fn into_inner(self) -> PeerMessage {
        match self {
            WireMessage::V1(msg) => msg,
        }
    }

    /// Get the protocol version
    pub fn version(&self) -> u8 {
        match self {
            WireMessage::V1(_) => 1,
        }
    }
}
