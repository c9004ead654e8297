//! Membership store: the ordered participant list and its invariants
//!
//! Pure data, no I/O. The roster enforces id uniqueness and the voter
//! capacity cap; round/status rules live in the state machine.

use serde::{Deserialize, Serialize};

use crate::code::ParticipantId;
use crate::types::Participant;

/// Maximum number of non-facilitator participants per session
pub const DEFAULT_VOTER_CAP: usize = 8;

/// Result of attempting to add a participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// Participant was appended with a null vote
    Added,
    /// Id already enrolled; roster unchanged (duplicate-join on reconnect)
    AlreadyPresent,
    /// Voter count already at the cap; roster unchanged
    CapacityExceeded,
}

/// Ordered list of participants with vote state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    entries: Vec<Participant>,
}

impl Roster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the facilitator entry at creation time
    ///
    /// The facilitator does not count against the voter cap.
    pub fn seed_facilitator(&mut self, facilitator: Participant) {
        debug_assert!(facilitator.is_facilitator);
        debug_assert!(!self.entries.iter().any(|p| p.is_facilitator));
        self.entries.insert(0, facilitator);
    }

    /// Add a voter, enforcing id uniqueness and the capacity cap
    pub fn add_voter(
        &mut self,
        id: ParticipantId,
        display_name: impl Into<String>,
        cap: usize,
    ) -> AddOutcome {
        if self.entries.iter().any(|p| p.id == id) {
            return AddOutcome::AlreadyPresent;
        }
        if self.voter_count() >= cap {
            return AddOutcome::CapacityExceeded;
        }
        self.entries.push(Participant::voter(id, display_name));
        AddOutcome::Added
    }

    /// Remove a participant by id; no-op if absent
    ///
    /// Returns true if an entry was removed.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|p| &p.id != id);
        self.entries.len() != before
    }

    /// Look up a participant by id
    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.entries.iter().find(|p| &p.id == id)
    }

    /// Record a vote for a participant; returns false if absent
    pub fn set_vote(&mut self, id: &ParticipantId, value: u32) -> bool {
        match self.entries.iter_mut().find(|p| &p.id == id) {
            Some(p) => {
                p.vote = Some(value);
                true
            }
            None => false,
        }
    }

    /// Clear every vote (round boundary)
    pub fn reset_votes(&mut self) {
        for p in &mut self.entries {
            p.vote = None;
        }
    }

    /// Number of non-facilitator participants
    pub fn voter_count(&self) -> usize {
        self.entries.iter().filter(|p| !p.is_facilitator).count()
    }

    /// Total roster length including the facilitator
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the roster is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over participants in join order (facilitator first)
    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.entries.iter()
    }
}
