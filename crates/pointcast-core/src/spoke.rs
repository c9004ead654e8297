//! Replication spoke: the participant's side of the star
//!
//! Maintains exactly one channel to the facilitator's address and a
//! read-only mirror of the session. The mirror is disposable: every
//! inbound `state_sync` replaces it wholesale, never merging fields.
//!
//! Joining resolves only when a snapshot arrives that actually enrolls
//! this participant; snapshots sent before the facilitator processed the
//! join (the onboarding sync) show the room but not yet our seat, and a
//! capacity refusal can still follow them. Waiting for enrollment keeps
//! the `SESSION_FULL` failure distinguishable from success.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::code::{ParticipantId, SessionCode};
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvent;
use crate::protocol::{BroadcastMessage, ErrorCode, IntentMessage, PeerMessage, WireMessage};
use crate::transport::{ChannelReceiver, ChannelSender, Switchboard, TransportError};
use crate::types::{Session, SessionStatus};

/// How long to wait for the enrolling snapshot before giving up on a join
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Participant-side replication endpoint
pub struct ReplicationSpoke {
    participant_id: ParticipantId,
    mirror: Arc<RwLock<Session>>,
    /// True between an optimistic local vote and the next authoritative
    /// snapshot that reconciles it
    tentative_vote: Arc<AtomicBool>,
    sender: ChannelSender,
    recv_task: JoinHandle<()>,
}

impl ReplicationSpoke {
    /// Dial the facilitator, announce ourselves, and wait to be enrolled
    ///
    /// Fails with `SessionNotFound` when nothing is bound at the code's
    /// address, `SessionFull` when the facilitator refuses on capacity,
    /// and `PeerError` for everything else, including the join timeout.
    /// A failed join releases the channel before returning.
    pub async fn connect(
        board: &Switchboard,
        code: &SessionCode,
        participant_id: ParticipantId,
        display_name: &str,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> SessionResult<Self> {
        let channel = board.connect(&code.address()).await.map_err(|e| match e {
            TransportError::NotFound(_) => SessionError::SessionNotFound(code.to_string()),
            other => SessionError::PeerError(other.to_string()),
        })?;
        let (sender, mut receiver) = channel.split();

        let join = WireMessage::intent(IntentMessage::Join {
            participant_id,
            display_name: display_name.to_string(),
        });
        sender
            .send(
                join.encode()
                    .map_err(|e| SessionError::PeerError(e.to_string()))?,
            )
            .await
            .map_err(|e| SessionError::PeerError(e.to_string()))?;

        let initial = tokio::time::timeout(
            JOIN_TIMEOUT,
            Self::await_enrollment(&mut receiver, &participant_id),
        )
        .await
        .map_err(|_| SessionError::PeerError("timed out waiting for state sync".to_string()))??;

        info!(%participant_id, code = %code, "Joined session");

        let mirror = Arc::new(RwLock::new(initial));
        let tentative_vote = Arc::new(AtomicBool::new(false));

        let task_mirror = mirror.clone();
        let task_tentative = tentative_vote.clone();
        let recv_task = tokio::spawn(async move {
            Self::recv_loop(receiver, task_mirror, task_tentative, event_tx).await;
        });

        Ok(Self {
            participant_id,
            mirror,
            tentative_vote,
            sender,
            recv_task,
        })
    }

    /// Wait for the first snapshot that includes us, or a refusal
    async fn await_enrollment(
        receiver: &mut ChannelReceiver,
        participant_id: &ParticipantId,
    ) -> SessionResult<Session> {
        loop {
            let Some(bytes) = receiver.recv().await else {
                return Err(SessionError::PeerError(
                    "connection closed during join".to_string(),
                ));
            };
            let wire = match WireMessage::decode(&bytes) {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(error = %e, "Undecodable frame during join, ignoring");
                    continue;
                }
            };
            match wire.into_inner() {
                PeerMessage::Broadcast(BroadcastMessage::StateSync { session }) => {
                    if session.participants.get(participant_id).is_some() {
                        return Ok(session);
                    }
                    // Onboarding snapshot from before our join was applied.
                    debug!("Pre-enrollment snapshot, waiting for our seat");
                }
                PeerMessage::Broadcast(BroadcastMessage::Error { code }) => {
                    return Err(match code {
                        ErrorCode::SessionFull => SessionError::SessionFull,
                        other => SessionError::PeerError(format!("{:?}", other)),
                    });
                }
                PeerMessage::Broadcast(BroadcastMessage::SessionClosed) => {
                    return Err(SessionError::PeerError(
                        "session closed during join".to_string(),
                    ));
                }
                PeerMessage::Intent(_) => {
                    warn!("Intent frame on a downstream channel, ignoring");
                }
            }
        }
    }

    /// Apply broadcasts until the channel closes or the session ends
    async fn recv_loop(
        mut receiver: ChannelReceiver,
        mirror: Arc<RwLock<Session>>,
        tentative_vote: Arc<AtomicBool>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) {
        while let Some(bytes) = receiver.recv().await {
            let wire = match WireMessage::decode(&bytes) {
                Ok(wire) => wire,
                Err(e) => {
                    warn!(error = %e, "Undecodable frame, ignoring");
                    continue;
                }
            };
            match wire.into_inner() {
                PeerMessage::Broadcast(BroadcastMessage::StateSync { session }) => {
                    // Wholesale replacement reconciles any optimistic vote
                    // unconditionally; no field merging.
                    *mirror.write() = session.clone();
                    tentative_vote.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(SessionEvent::StateChanged { session });
                }
                PeerMessage::Broadcast(BroadcastMessage::SessionClosed) => {
                    info!("Session closed by facilitator");
                    let _ = event_tx.send(SessionEvent::SessionClosed);
                    return;
                }
                PeerMessage::Broadcast(BroadcastMessage::Error { code }) => {
                    warn!(?code, "Addressed error after join");
                }
                PeerMessage::Intent(_) => {
                    warn!("Intent frame on a downstream channel, ignoring");
                }
            }
        }
        debug!("Channel to facilitator closed");
        let _ = event_tx.send(SessionEvent::ConnectionLost {
            message: "channel to facilitator closed".to_string(),
        });
    }

    /// This spoke's participant id
    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Clone the current local mirror
    pub fn session(&self) -> Session {
        self.mirror.read().clone()
    }

    /// Whether a locally cast vote has not yet been confirmed
    pub fn vote_is_tentative(&self) -> bool {
        self.tentative_vote.load(Ordering::SeqCst)
    }

    /// Cast a vote: optimistic local update, then the upstream intent
    ///
    /// The local mirror shows the vote immediately, marked tentative; the
    /// next authoritative snapshot overwrites it either way (the
    /// facilitator may have rejected it). The optimistic write only
    /// happens while the mirror shows an open round: a vote the hub is
    /// certain to reject produces no broadcast, so nothing would ever
    /// reconcile the mirror. The intent still goes upstream in case the
    /// mirror is behind.
    pub async fn cast_vote(&self, value: u32) -> SessionResult<()> {
        {
            let mut mirror = self.mirror.write();
            if mirror.status == SessionStatus::Voting {
                mirror.participants.set_vote(&self.participant_id, value);
                self.tentative_vote.store(true, Ordering::SeqCst);
            }
        }

        let intent = WireMessage::intent(IntentMessage::CastVote {
            participant_id: self.participant_id,
            value,
        });
        self.sender
            .send(
                intent
                    .encode()
                    .map_err(|e| SessionError::PeerError(e.to_string()))?,
            )
            .await
            .map_err(|e| SessionError::PeerError(e.to_string()))
    }

    /// Announce departure and tear the channel down
    pub async fn leave(self) {
        let intent = WireMessage::intent(IntentMessage::Leave {
            participant_id: self.participant_id,
        });
        if let Ok(frame) = intent.encode() {
            // The facilitator may already be gone; channel teardown below
            // covers removal either way.
            if let Err(e) = self.sender.send(frame).await {
                debug!(error = %e, "Leave intent not delivered");
            }
        }
        self.recv_task.abort();
    }
}

impl Drop for ReplicationSpoke {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}
