//! Core types for Pointcast

use serde::{Deserialize, Serialize};

use crate::code::{ParticipantId, SessionCode};
use crate::roster::Roster;

/// Lifecycle status of a voting round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Between rounds; votes are cleared
    Waiting,
    /// A round is open; voters may cast hidden votes
    Voting,
    /// Votes are shown and frozen until a new round resets them
    Revealed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::Voting => write!(f, "voting"),
            SessionStatus::Revealed => write!(f, "revealed"),
        }
    }
}

/// One attendee of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Opaque id, assigned once at join time
    pub id: ParticipantId,
    /// Human-readable name shown on the board
    pub display_name: String,
    /// Hidden vote for the current round, if cast
    pub vote: Option<u32>,
    /// Whether this participant holds write authority
    pub is_facilitator: bool,
}

impl Participant {
    /// Create a non-facilitator participant with no vote
    pub fn voter(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            vote: None,
            is_facilitator: false,
        }
    }

    /// Create the facilitator entry
    pub fn facilitator(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            vote: None,
            is_facilitator: true,
        }
    }
}

/// The shared record of one estimation room
///
/// The facilitator's copy is the single writable original. Every
/// participant's copy is a disposable mirror replaced wholesale on each
/// `state_sync`, never merged field-by-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Immutable 4-character code; the hub address derives from it
    pub code: SessionCode,
    /// Id of the one participant with write authority
    pub facilitator_id: ParticipantId,
    /// Facilitator's display name
    pub facilitator_name: String,
    /// Current round status
    pub status: SessionStatus,
    /// The item being estimated
    pub current_item: String,
    /// Ordered roster; exactly one entry has `is_facilitator = true`
    pub participants: Roster,
    /// Unix timestamp of creation
    pub created_at: i64,
}

impl Session {
    /// Create a new session with just the facilitator enrolled
    pub fn new(code: SessionCode, facilitator_name: impl Into<String>) -> Self {
        let facilitator_name = facilitator_name.into();
        let facilitator_id = ParticipantId::new();
        let mut participants = Roster::new();
        participants.seed_facilitator(Participant::facilitator(
            facilitator_id,
            facilitator_name.clone(),
        ));
        Self {
            code,
            facilitator_id,
            facilitator_name,
            status: SessionStatus::Waiting,
            current_item: String::new(),
            participants,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Which side of the star this process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Holds the authoritative session and the hub
    Facilitator,
    /// Holds a mirror and one spoke connection
    Voter,
}

/// The durable local credential ("me")
///
/// Written once at create/join time, read once at process start for
/// restoration, deleted on leave/close. Lets a rejoining process reclaim
/// its place without re-announcing from scratch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// This process's participant id
    pub participant_id: ParticipantId,
    /// Display name used at join time
    pub display_name: String,
    /// Role held when the record was written
    pub role: Role,
    /// Code of the session this identity belongs to
    pub session_code: SessionCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_starts_waiting() {
        let code = SessionCode::parse("ABCD").unwrap();
        let session = Session::new(code.clone(), "Dana");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.code, code);
        assert!(session.current_item.is_empty());
    }

    #[test]
    fn test_new_session_enrolls_facilitator() {
        let code = SessionCode::parse("ABCD").unwrap();
        let session = Session::new(code, "Dana");
        assert_eq!(session.participants.len(), 1);
        let facilitator = session.participants.get(&session.facilitator_id).unwrap();
        assert!(facilitator.is_facilitator);
        assert_eq!(facilitator.display_name, "Dana");
        assert_eq!(facilitator.vote, None);
    }

    #[test]
    fn test_status_display() {
        assert_eq!(format!("{}", SessionStatus::Waiting), "waiting");
        assert_eq!(format!("{}", SessionStatus::Voting), "voting");
        assert_eq!(format!("{}", SessionStatus::Revealed), "revealed");
    }
}
