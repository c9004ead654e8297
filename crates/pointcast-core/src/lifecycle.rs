//! Session lifecycle orchestration
//!
//! Composes the identifier generator, state machine, hub/spoke, and
//! storage into the five operations a front end actually calls: create,
//! join, restore, close, leave. All failures come back as typed
//! `SessionError` values; the caller decides whether to retry.

use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{info, warn};

use crate::code::{ParticipantId, SessionCode};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::hub::ReplicationHub;
use crate::roster::DEFAULT_VOTER_CAP;
use crate::session::SessionStateMachine;
use crate::spoke::ReplicationSpoke;
use crate::storage::Storage;
use crate::transport::{Switchboard, TransportError};
use crate::types::{IdentityRecord, Role, Session};

/// Attempts at generating an unbound session code before giving up
const MAX_CODE_ATTEMPTS: usize = 5;

/// Wait before the single re-bind retry during facilitator restore
const REBIND_BACKOFF: Duration = Duration::from_secs(3);

/// Capacity for the session event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// What a successful restore brought back
#[derive(Debug)]
pub enum RestoredRole {
    /// This process is the facilitator again, hub re-bound to the code
    Facilitator {
        /// The reclaimed session code
        code: SessionCode,
        /// The recovered authoritative state
        session: Session,
    },
    /// This process rejoined as a voter
    Voter {
        /// The mirror received on rejoin
        session: Session,
    },
}

enum ActiveRole {
    Facilitator {
        hub: ReplicationHub,
        code: SessionCode,
    },
    Voter {
        spoke: ReplicationSpoke,
        code: SessionCode,
    },
}

/// Orchestrates create/join/restore/leave/close for one process
pub struct SessionLifecycleController {
    board: Switchboard,
    storage: Storage,
    event_tx: broadcast::Sender<SessionEvent>,
    role: Option<ActiveRole>,
}

impl SessionLifecycleController {
    /// Create a controller over a switchboard and a storage instance
    pub fn new(board: Switchboard, storage: Storage) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            board,
            storage,
            event_tx,
            role: None,
        }
    }

    /// Subscribe to session events (state changes, joins, closure)
    ///
    /// Multiple subscribers can exist; events are broadcast to all.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Create a session and become its facilitator
    ///
    /// Generates a fresh code per attempt; a code whose address is
    /// already bound counts as a collision and is retried, up to
    /// `MAX_CODE_ATTEMPTS` total. On success the session snapshot and
    /// identity record are persisted and the hub starts accepting.
    pub async fn create_session(&mut self, facilitator_name: &str) -> SessionResult<SessionCode> {
        self.create_session_with(facilitator_name, SessionCode::generate)
            .await
    }

    /// Create a session with an injected code source
    ///
    /// `next_code` is called once per attempt; collision handling is
    /// identical to `create_session`.
    pub async fn create_session_with(
        &mut self,
        facilitator_name: &str,
        mut next_code: impl FnMut() -> SessionCode,
    ) -> SessionResult<SessionCode> {
        let facilitator_name = facilitator_name.trim();
        if facilitator_name.is_empty() {
            return Err(SessionError::EmptyName);
        }

        let mut last_code = None;
        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let code = next_code();
            let listener = match self.board.bind(&code.address()) {
                Ok(listener) => listener,
                Err(TransportError::AddrInUse(_)) => {
                    warn!(%code, attempt, "Session code collision, regenerating");
                    last_code = Some(code);
                    continue;
                }
                Err(other) => return Err(SessionError::PeerError(other.to_string())),
            };

            let session = Session::new(code.clone(), facilitator_name);
            self.storage.save_session(&session)?;
            self.storage.save_identity(&IdentityRecord {
                participant_id: session.facilitator_id,
                display_name: facilitator_name.to_string(),
                role: Role::Facilitator,
                session_code: code.clone(),
            })?;

            let machine = SessionStateMachine::new(session, DEFAULT_VOTER_CAP);
            let hub = ReplicationHub::spawn(
                listener,
                machine,
                self.storage.clone(),
                self.event_tx.clone(),
            );
            self.role = Some(ActiveRole::Facilitator {
                hub,
                code: code.clone(),
            });
            info!(%code, "Session created");
            return Ok(code);
        }

        let code = last_code.expect("at least one attempt was made");
        Err(SessionError::CodeTaken(code.to_string()))
    }

    /// Join an existing session as a voter
    ///
    /// Validates inputs before any network attempt. Succeeds only once
    /// the facilitator's snapshot enrolling us has arrived.
    pub async fn join_session(
        &mut self,
        display_name: &str,
        code_input: &str,
    ) -> SessionResult<Session> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        let code = SessionCode::parse(code_input)?;

        let participant_id = ParticipantId::new();
        let spoke = ReplicationSpoke::connect(
            &self.board,
            &code,
            participant_id,
            display_name,
            self.event_tx.clone(),
        )
        .await?;

        self.storage.save_identity(&IdentityRecord {
            participant_id,
            display_name: display_name.to_string(),
            role: Role::Voter,
            session_code: code.clone(),
        })?;

        let session = spoke.session();
        self.role = Some(ActiveRole::Voter { spoke, code });
        Ok(session)
    }

    /// Reclaim a previous role after an unexpected process restart
    ///
    /// Facilitator: reload the persisted snapshot and re-bind the same
    /// code, retrying exactly once after a backoff if the old binding has
    /// not yet been released. Voter: re-run the join with the persisted
    /// identity; if the facilitator has vanished, the stale identity is
    /// cleared and `SessionNotFound` surfaces.
    pub async fn restore_session(&mut self) -> SessionResult<RestoredRole> {
        let identity = self
            .storage
            .load_identity()?
            .ok_or(SessionError::NoIdentity)?;
        let code = identity.session_code.clone();

        match identity.role {
            Role::Facilitator => {
                let session = self
                    .storage
                    .load_session(&code)?
                    .ok_or_else(|| SessionError::SnapshotMissing(code.to_string()))?;

                let listener = match self.board.bind(&code.address()) {
                    Ok(listener) => listener,
                    Err(TransportError::AddrInUse(_)) => {
                        info!(%code, "Address still bound, retrying after backoff");
                        tokio::time::sleep(REBIND_BACKOFF).await;
                        match self.board.bind(&code.address()) {
                            Ok(listener) => listener,
                            Err(TransportError::AddrInUse(_)) => {
                                return Err(SessionError::CodeTaken(code.to_string()))
                            }
                            Err(other) => return Err(SessionError::PeerError(other.to_string())),
                        }
                    }
                    Err(other) => return Err(SessionError::PeerError(other.to_string())),
                };

                let machine = SessionStateMachine::new(session.clone(), DEFAULT_VOTER_CAP);
                let hub = ReplicationHub::spawn(
                    listener,
                    machine,
                    self.storage.clone(),
                    self.event_tx.clone(),
                );
                self.role = Some(ActiveRole::Facilitator {
                    hub,
                    code: code.clone(),
                });
                info!(%code, "Facilitator session restored");
                Ok(RestoredRole::Facilitator { code, session })
            }
            Role::Voter => {
                let result = ReplicationSpoke::connect(
                    &self.board,
                    &code,
                    identity.participant_id,
                    &identity.display_name,
                    self.event_tx.clone(),
                )
                .await;
                match result {
                    Ok(spoke) => {
                        let session = spoke.session();
                        self.role = Some(ActiveRole::Voter { spoke, code });
                        Ok(RestoredRole::Voter { session })
                    }
                    Err(SessionError::SessionNotFound(code)) => {
                        // The facilitator is gone; the identity is stale.
                        warn!(%code, "Facilitator vanished, clearing stale identity");
                        self.storage.clear_identity()?;
                        Err(SessionError::SessionNotFound(code))
                    }
                    Err(other) => Err(other),
                }
            }
        }
    }

    /// Close the session (facilitator only)
    ///
    /// Broadcasts closure, tears down every channel and the address
    /// binding, and deletes the persisted session and identity.
    pub async fn close_session(&mut self) -> SessionResult<()> {
        match self.role.take() {
            Some(ActiveRole::Facilitator { mut hub, code }) => {
                hub.broadcast_close().await;
                self.storage.delete_session(&code)?;
                self.storage.clear_identity()?;
                info!(%code, "Session closed");
                Ok(())
            }
            other => {
                self.role = other;
                Err(SessionError::NotFacilitator("close".to_string()))
            }
        }
    }

    /// Leave the session (voter only)
    ///
    /// Sends the leave intent, tears down the channel, and deletes the
    /// persisted identity.
    pub async fn leave_session(&mut self) -> SessionResult<()> {
        match self.role.take() {
            Some(ActiveRole::Voter { spoke, code }) => {
                spoke.leave().await;
                self.storage.clear_identity()?;
                info!(%code, "Left session");
                Ok(())
            }
            other => {
                self.role = other;
                Err(SessionError::NotJoined("leave".to_string()))
            }
        }
    }

    /// Current session view: authoritative for the facilitator, the
    /// mirror for a voter
    pub async fn session(&self) -> SessionResult<Session> {
        match &self.role {
            Some(ActiveRole::Facilitator { hub, .. }) => Ok(hub.snapshot().await),
            Some(ActiveRole::Voter { spoke, .. }) => Ok(spoke.session()),
            None => Err(SessionError::NotJoined("session".to_string())),
        }
    }

    /// Open a round (facilitator only)
    pub async fn launch_vote(&self, item: Option<&str>) -> SessionResult<()> {
        self.hub()?.launch_vote(item).await;
        Ok(())
    }

    /// Show the votes (facilitator only)
    pub async fn reveal_votes(&self) -> SessionResult<()> {
        self.hub()?.reveal_votes().await;
        Ok(())
    }

    /// Reset for the next item (facilitator only)
    pub async fn new_round(&self) -> SessionResult<()> {
        self.hub()?.new_round().await;
        Ok(())
    }

    /// Change the current item (facilitator only)
    pub async fn update_item(&self, text: &str) -> SessionResult<()> {
        self.hub()?.update_item(text).await;
        Ok(())
    }

    /// Remove a participant (facilitator only)
    pub async fn remove_participant(&self, participant_id: &ParticipantId) -> SessionResult<()> {
        self.hub()?.remove_participant(participant_id).await;
        Ok(())
    }

    /// Cast a vote (voter only)
    pub async fn cast_vote(&self, value: u32) -> SessionResult<()> {
        match &self.role {
            Some(ActiveRole::Voter { spoke, .. }) => spoke.cast_vote(value).await,
            _ => Err(SessionError::NotJoined("cast_vote".to_string())),
        }
    }

    fn hub(&self) -> SessionResult<&ReplicationHub> {
        match &self.role {
            Some(ActiveRole::Facilitator { hub, .. }) => Ok(hub),
            _ => Err(SessionError::NotFacilitator("hub operation".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::CODE_LEN;
    use tempfile::TempDir;

    fn controller(board: &Switchboard) -> (SessionLifecycleController, TempDir) {
        let temp = TempDir::new().unwrap();
        let storage = Storage::new(temp.path().join("node.redb")).unwrap();
        (
            SessionLifecycleController::new(board.clone(), storage),
            temp,
        )
    }

    #[tokio::test]
    async fn test_create_rejects_empty_name() {
        let board = Switchboard::new();
        let (mut host, _temp) = controller(&board);
        assert!(matches!(
            host.create_session("   ").await,
            Err(SessionError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_create_returns_valid_code_and_persists() {
        let board = Switchboard::new();
        let (mut host, _temp) = controller(&board);
        let code = host.create_session("Dana").await.unwrap();
        assert_eq!(code.as_str().len(), CODE_LEN);

        let session = host.session().await.unwrap();
        assert_eq!(session.facilitator_name, "Dana");
        assert_eq!(session.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_join_rejects_empty_name_before_network() {
        let board = Switchboard::new();
        let (mut voter, _temp) = controller(&board);
        assert!(matches!(
            voter.join_session("", "ABCD").await,
            Err(SessionError::EmptyName)
        ));
    }

    #[tokio::test]
    async fn test_join_rejects_empty_code_before_network() {
        let board = Switchboard::new();
        let (mut voter, _temp) = controller(&board);
        assert!(matches!(
            voter.join_session("Alice", "  ").await,
            Err(SessionError::EmptyCode)
        ));
    }

    #[tokio::test]
    async fn test_join_unknown_code_is_not_found() {
        let board = Switchboard::new();
        let (mut voter, _temp) = controller(&board);
        assert!(matches!(
            voter.join_session("Alice", "WXYZ").await,
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_restore_without_identity_fails() {
        let board = Switchboard::new();
        let (mut node, _temp) = controller(&board);
        assert!(matches!(
            node.restore_session().await,
            Err(SessionError::NoIdentity)
        ));
    }

    #[tokio::test]
    async fn test_close_requires_facilitator() {
        let board = Switchboard::new();
        let (mut node, _temp) = controller(&board);
        assert!(matches!(
            node.close_session().await,
            Err(SessionError::NotFacilitator(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_requires_voter() {
        let board = Switchboard::new();
        let (mut host, _temp) = controller(&board);
        host.create_session("Dana").await.unwrap();
        assert!(matches!(
            host.leave_session().await,
            Err(SessionError::NotJoined(_))
        ));
    }
}
