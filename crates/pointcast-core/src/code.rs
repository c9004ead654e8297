//! Identifier generation: session codes and participant ids
//!
//! Session codes are short enough to read out loud or type from a
//! whiteboard, so the alphabet excludes glyph pairs that are easy to
//! confuse (`0`/`O`, `1`/`I`). Participant ids are ULIDs: opaque,
//! time-ordered, and assigned exactly once at join time.

use rand::Rng;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::SessionError;

/// Characters allowed in a session code. No `0`/`O`, no `1`/`I`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a session code
pub const CODE_LEN: usize = 4;

/// A short human-typeable session code
///
/// Immutable after creation; the facilitator's channel address is derived
/// from it, so the code is all a participant needs to join.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionCode(String);

impl SessionCode {
    /// Generate a new random code from the restricted alphabet
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Parse a user-supplied code, uppercasing and validating it
    pub fn parse(input: &str) -> Result<Self, SessionError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(SessionError::EmptyCode);
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.len() != CODE_LEN {
            return Err(SessionError::InvalidCode(format!(
                "expected {} characters, got {}",
                CODE_LEN,
                upper.len()
            )));
        }
        if !upper.bytes().all(|b| CODE_ALPHABET.contains(&b)) {
            return Err(SessionError::InvalidCode(upper));
        }
        Ok(Self(upper))
    }

    /// Get the code as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The channel address the facilitator's hub binds for this code
    pub fn address(&self) -> String {
        format!("pointcast/{}", self.0)
    }
}

impl std::fmt::Display for SessionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a participant
///
/// Stable for the lifetime of one process run; never reused by a
/// different human within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub Ulid);

impl ParticipantId {
    /// Create a new ParticipantId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for ParticipantId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peer_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_code_length_and_alphabet() {
        for _ in 0..100 {
            let code = SessionCode::generate();
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn test_alphabet_excludes_ambiguous_glyphs() {
        for banned in [b'0', b'O', b'1', b'I'] {
            assert!(!CODE_ALPHABET.contains(&banned));
        }
    }

    #[test]
    fn test_parse_uppercases() {
        let code = SessionCode::parse("abcd").unwrap();
        assert_eq!(code.as_str(), "ABCD");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(
            SessionCode::parse("   "),
            Err(SessionError::EmptyCode)
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert!(matches!(
            SessionCode::parse("ABCDE"),
            Err(SessionError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_parse_rejects_ambiguous_characters() {
        assert!(matches!(
            SessionCode::parse("AB0D"),
            Err(SessionError::InvalidCode(_))
        ));
    }

    #[test]
    fn test_address_includes_code() {
        let code = SessionCode::parse("WXYZ").unwrap();
        assert_eq!(code.address(), "pointcast/WXYZ");
    }

    #[test]
    fn test_participant_id_unique() {
        let a = ParticipantId::new();
        let b = ParticipantId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_participant_id_display() {
        let id = ParticipantId::new();
        assert!(format!("{}", id).starts_with("peer_"));
    }
}
