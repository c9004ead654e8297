//! Session state machine: the single writable copy of a session
//!
//! Owns one `Session` record and every mutating operation on it. All
//! transitions are facilitator-only by construction: only the hub holds a
//! `SessionStateMachine`. Mutation and propagation are coupled by
//! contract; callers that mutate must broadcast the resulting snapshot.
//!
//! Round lifecycle: `Waiting -> Voting -> Revealed -> Waiting -> ...`

use tracing::debug;

use crate::code::ParticipantId;
use crate::roster::AddOutcome;
use crate::types::{Session, SessionStatus};

/// Owner of the authoritative session record
#[derive(Debug)]
pub struct SessionStateMachine {
    session: Session,
    voter_cap: usize,
}

impl SessionStateMachine {
    /// Wrap a session with the given voter capacity
    pub fn new(session: Session, voter_cap: usize) -> Self {
        Self { session, voter_cap }
    }

    /// The current authoritative state
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Clone the current state as a broadcastable snapshot
    pub fn snapshot(&self) -> Session {
        self.session.clone()
    }

    /// Open a round: set the item if given, reset every vote, go to Voting
    ///
    /// Valid from any state.
    pub fn launch_vote(&mut self, item: Option<&str>) {
        if let Some(item) = item {
            self.session.current_item = item.to_string();
        }
        self.session.participants.reset_votes();
        self.session.status = SessionStatus::Voting;
        debug!(code = %self.session.code, item = %self.session.current_item, "Vote launched");
    }

    /// Show the votes
    ///
    /// Only meaningful from Voting, but never fails from other states; it
    /// simply sets the status.
    pub fn reveal_votes(&mut self) {
        self.session.status = SessionStatus::Revealed;
        debug!(code = %self.session.code, "Votes revealed");
    }

    /// Return to Waiting and clear all votes
    pub fn new_round(&mut self) {
        self.session.status = SessionStatus::Waiting;
        self.session.participants.reset_votes();
        debug!(code = %self.session.code, "New round");
    }

    /// Change the current item without touching status or votes
    pub fn update_item(&mut self, text: &str) {
        self.session.current_item = text.to_string();
    }

    /// Record a vote
    ///
    /// Returns false, with no mutation, unless a round is open, the
    /// caller is not the facilitator, and the participant is enrolled.
    /// Re-voting overwrites.
    pub fn cast_vote(&mut self, participant_id: &ParticipantId, value: u32) -> bool {
        if self.session.status != SessionStatus::Voting {
            debug!(%participant_id, status = %self.session.status, "Vote rejected: no round open");
            return false;
        }
        if participant_id == &self.session.facilitator_id {
            debug!(%participant_id, "Vote rejected: facilitator does not vote");
            return false;
        }
        let recorded = self.session.participants.set_vote(participant_id, value);
        if recorded {
            debug!(%participant_id, value, "Vote recorded");
        }
        recorded
    }

    /// Enroll a voter
    ///
    /// Idempotent when the id is already present; reports
    /// `CapacityExceeded` when the voter cap is reached.
    pub fn add_participant(
        &mut self,
        id: ParticipantId,
        display_name: &str,
    ) -> AddOutcome {
        let outcome = self
            .session
            .participants
            .add_voter(id, display_name, self.voter_cap);
        debug!(%id, name = display_name, ?outcome, "Add participant");
        outcome
    }

    /// Remove a participant by id; no-op if absent
    ///
    /// Returns true if the roster changed.
    pub fn remove_participant(&mut self, id: &ParticipantId) -> bool {
        let removed = self.session.participants.remove(id);
        if removed {
            debug!(%id, "Participant removed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::SessionCode;
    use crate::roster::DEFAULT_VOTER_CAP;

    fn machine() -> SessionStateMachine {
        let code = SessionCode::parse("ABCD").unwrap();
        SessionStateMachine::new(Session::new(code, "Dana"), DEFAULT_VOTER_CAP)
    }

    fn machine_with_voter() -> (SessionStateMachine, ParticipantId) {
        let mut m = machine();
        let id = ParticipantId::new();
        assert_eq!(m.add_participant(id, "Alice"), AddOutcome::Added);
        (m, id)
    }

    #[test]
    fn test_launch_vote_sets_item_and_status() {
        let mut m = machine();
        m.launch_vote(Some("Story 1"));
        assert_eq!(m.session().status, SessionStatus::Voting);
        assert_eq!(m.session().current_item, "Story 1");
    }

    #[test]
    fn test_launch_vote_without_item_keeps_existing() {
        let mut m = machine();
        m.update_item("Story 1");
        m.launch_vote(None);
        assert_eq!(m.session().current_item, "Story 1");
    }

    #[test]
    fn test_launch_vote_resets_votes() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        assert!(m.cast_vote(&id, 5));
        m.launch_vote(Some("Story 2"));
        assert_eq!(m.session().participants.get(&id).unwrap().vote, None);
    }

    #[test]
    fn test_cast_vote_rejected_outside_voting() {
        let (mut m, id) = machine_with_voter();
        assert!(!m.cast_vote(&id, 5));
        m.launch_vote(None);
        m.reveal_votes();
        assert!(!m.cast_vote(&id, 5));
        assert_eq!(m.session().participants.get(&id).unwrap().vote, None);
    }

    #[test]
    fn test_cast_vote_rejected_for_facilitator() {
        let mut m = machine();
        m.launch_vote(None);
        let facilitator_id = m.session().facilitator_id;
        assert!(!m.cast_vote(&facilitator_id, 5));
    }

    #[test]
    fn test_cast_vote_rejected_for_unknown_participant() {
        let mut m = machine();
        m.launch_vote(None);
        assert!(!m.cast_vote(&ParticipantId::new(), 5));
    }

    #[test]
    fn test_revote_overwrites() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        assert!(m.cast_vote(&id, 3));
        assert!(m.cast_vote(&id, 8));
        assert_eq!(m.session().participants.get(&id).unwrap().vote, Some(8));
    }

    #[test]
    fn test_reveal_preserves_votes() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        m.cast_vote(&id, 5);
        m.reveal_votes();
        assert_eq!(m.session().status, SessionStatus::Revealed);
        assert_eq!(m.session().participants.get(&id).unwrap().vote, Some(5));
    }

    #[test]
    fn test_reveal_from_waiting_does_not_panic() {
        let mut m = machine();
        m.reveal_votes();
        assert_eq!(m.session().status, SessionStatus::Revealed);
    }

    #[test]
    fn test_new_round_resets() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        m.cast_vote(&id, 5);
        m.reveal_votes();
        m.new_round();
        assert_eq!(m.session().status, SessionStatus::Waiting);
        assert_eq!(m.session().participants.get(&id).unwrap().vote, None);
    }

    #[test]
    fn test_update_item_leaves_status_and_votes() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        m.cast_vote(&id, 5);
        m.update_item("Story 9");
        assert_eq!(m.session().status, SessionStatus::Voting);
        assert_eq!(m.session().participants.get(&id).unwrap().vote, Some(5));
        assert_eq!(m.session().current_item, "Story 9");
    }

    #[test]
    fn test_exactly_one_facilitator_across_mutations() {
        let (mut m, id) = machine_with_voter();
        m.launch_vote(None);
        m.cast_vote(&id, 2);
        m.remove_participant(&id);
        let facilitators: Vec<_> = m
            .session()
            .participants
            .iter()
            .filter(|p| p.is_facilitator)
            .collect();
        assert_eq!(facilitators.len(), 1);
        assert_eq!(facilitators[0].id, m.session().facilitator_id);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut m = machine();
        for i in 0..DEFAULT_VOTER_CAP {
            assert_eq!(
                m.add_participant(ParticipantId::new(), &format!("P{}", i)),
                AddOutcome::Added
            );
        }
        assert_eq!(
            m.add_participant(ParticipantId::new(), "Ninth"),
            AddOutcome::CapacityExceeded
        );
        assert_eq!(m.session().participants.len(), DEFAULT_VOTER_CAP + 1);
    }
}
