//! Session event types for observers
//!
//! The core never reaches into presentation. UI layers subscribe to a
//! broadcast receiver from the lifecycle controller and react to these
//! events instead of injecting callbacks.

use crate::code::ParticipantId;
use crate::types::Session;

/// Events emitted during a session's life
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Authoritative state changed; mirrors were replaced wholesale
    StateChanged {
        /// The new complete snapshot
        session: Session,
    },
    /// A voter enrolled (emitted on the facilitator side)
    ParticipantJoined {
        /// The new participant's id
        participant_id: ParticipantId,
        /// The new participant's display name
        display_name: String,
    },
    /// A voter left or its channel dropped (facilitator side)
    ParticipantLeft {
        /// The departed participant's id
        participant_id: ParticipantId,
    },
    /// The facilitator closed the room
    SessionClosed,
    /// The connection to the facilitator was lost unexpectedly
    ConnectionLost {
        /// Human-readable reason
        message: String,
    },
}

impl SessionEvent {
    /// Get the participant id associated with this event, if any
    pub fn participant_id(&self) -> Option<&ParticipantId> {
        match self {
            SessionEvent::ParticipantJoined { participant_id, .. } => Some(participant_id),
            SessionEvent::ParticipantLeft { participant_id } => Some(participant_id),
            _ => None,
        }
    }
}
