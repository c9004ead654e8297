//! Replication hub: the facilitator's side of the star
//!
//! Every participant channel terminates here, and this is the only place
//! authoritative state is broadcast from. The whole apply-intent ->
//! persist -> broadcast sequence runs under one mutex, so a snapshot is
//! never sent while the state it captures is being re-mutated.
//!
//! Onboarding is a full `state_sync` sent the moment a channel is
//! accepted; there is no partial or delta sync. Channels that fail a send
//! are treated as disconnected and dropped; the next successful broadcast
//! carries current truth to everyone else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::code::ParticipantId;
use crate::events::SessionEvent;
use crate::protocol::{BroadcastMessage, ErrorCode, IntentMessage, PeerMessage, WireMessage};
use crate::roster::AddOutcome;
use crate::session::SessionStateMachine;
use crate::storage::Storage;
use crate::transport::{ChannelReceiver, ChannelSender, Listener};
use crate::types::Session;

/// Whether a channel task should keep reading after an intent
enum Flow {
    Continue,
    Close,
}

/// One participant channel as the hub sees it
struct PeerLink {
    sender: ChannelSender,
    /// Set once the peer announces itself with a join intent
    participant: Option<ParticipantId>,
}

/// State shared by the accept loop and every channel task
struct HubCore {
    machine: SessionStateMachine,
    links: HashMap<u64, PeerLink>,
    storage: Storage,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl HubCore {
    /// Persist the current snapshot, then send it to every open channel
    ///
    /// Never fatal: a failed or backlogged send drops that channel and
    /// removes its participant; the remaining sends proceed. Sends never
    /// wait for queue space, so one slow peer cannot stall the hub while
    /// the mutex is held.
    fn broadcast_state(&mut self) {
        let snapshot = self.machine.snapshot();
        if let Err(e) = self.storage.save_session(&snapshot) {
            warn!(code = %snapshot.code, error = %e, "Failed to persist snapshot");
        }

        let frame = match WireMessage::broadcast(BroadcastMessage::StateSync {
            session: snapshot.clone(),
        })
        .encode()
        {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Failed to encode snapshot");
                return;
            }
        };

        let mut dead = Vec::new();
        for (link_id, link) in &self.links {
            if !link.sender.is_open() {
                // Skipped, not queued; the next broadcast carries truth.
                dead.push(*link_id);
                continue;
            }
            if let Err(e) = link.sender.try_send(frame.clone()) {
                warn!(link_id, error = %e, "Send failed, treating channel as disconnected");
                dead.push(*link_id);
            }
        }
        for link_id in dead {
            if let Some(link) = self.links.remove(&link_id) {
                if let Some(pid) = link.participant {
                    if !self.claimed_elsewhere(&pid) {
                        self.machine.remove_participant(&pid);
                        let _ = self.event_tx.send(SessionEvent::ParticipantLeft {
                            participant_id: pid,
                        });
                    }
                }
            }
        }

        let _ = self
            .event_tx
            .send(SessionEvent::StateChanged { session: snapshot });
    }

    /// Apply one intent from a channel
    fn handle_intent(&mut self, link_id: u64, intent: IntentMessage) -> Flow {
        match intent {
            IntentMessage::Join {
                participant_id,
                display_name,
            } => match self.machine.add_participant(participant_id, &display_name) {
                AddOutcome::Added => {
                    if let Some(link) = self.links.get_mut(&link_id) {
                        link.participant = Some(participant_id);
                    }
                    info!(%participant_id, name = %display_name, "Participant joined");
                    let _ = self.event_tx.send(SessionEvent::ParticipantJoined {
                        participant_id,
                        display_name,
                    });
                    self.broadcast_state();
                    Flow::Continue
                }
                AddOutcome::AlreadyPresent => {
                    // Reconnect with the same identity; re-own the link and
                    // re-sync so the new channel is guaranteed fresh state.
                    if let Some(link) = self.links.get_mut(&link_id) {
                        link.participant = Some(participant_id);
                    }
                    debug!(%participant_id, "Duplicate join, roster unchanged");
                    self.broadcast_state();
                    Flow::Continue
                }
                AddOutcome::CapacityExceeded => {
                    warn!(%participant_id, "Join refused: session full");
                    if let Some(link) = self.links.remove(&link_id) {
                        let frame = WireMessage::broadcast(BroadcastMessage::Error {
                            code: ErrorCode::SessionFull,
                        })
                        .encode();
                        if let Ok(frame) = frame {
                            let _ = link.sender.try_send(frame);
                        }
                    }
                    Flow::Close
                }
            },
            IntentMessage::CastVote {
                participant_id,
                value,
            } => {
                // Broadcast only if the vote actually mutated state.
                if self.machine.cast_vote(&participant_id, value) {
                    self.broadcast_state();
                }
                Flow::Continue
            }
            IntentMessage::Leave { participant_id } => {
                self.links.remove(&link_id);
                if self.machine.remove_participant(&participant_id) {
                    info!(%participant_id, "Participant left");
                    let _ = self.event_tx.send(SessionEvent::ParticipantLeft {
                        participant_id,
                    });
                    self.broadcast_state();
                }
                Flow::Close
            }
        }
    }

    /// Whether a live link other than the one just removed owns this id
    ///
    /// A participant that reconnected before its old channel was noticed
    /// dead is claimed by the new link; the stale disconnect must not
    /// remove it.
    fn claimed_elsewhere(&self, pid: &ParticipantId) -> bool {
        self.links
            .values()
            .any(|link| link.participant.as_ref() == Some(pid))
    }

    /// A channel closed or errored: identical to an explicit leave
    fn handle_disconnect(&mut self, link_id: u64) {
        let Some(link) = self.links.remove(&link_id) else {
            return;
        };
        if let Some(pid) = link.participant {
            if self.claimed_elsewhere(&pid) {
                debug!(participant_id = %pid, "Stale channel closed after reconnect");
                return;
            }
            if self.machine.remove_participant(&pid) {
                info!(participant_id = %pid, "Participant disconnected");
                let _ = self.event_tx.send(SessionEvent::ParticipantLeft {
                    participant_id: pid,
                });
                self.broadcast_state();
            }
        } else {
            debug!(link_id, "Unannounced channel closed");
        }
    }
}

/// Facilitator-side replication endpoint
///
/// Accepts spokes, onboards each with a full snapshot, folds their
/// intents into the authoritative state machine, and broadcasts every
/// mutation. Also exposes the facilitator's own mutating operations so
/// mutation and propagation stay coupled.
pub struct ReplicationHub {
    core: Arc<Mutex<HubCore>>,
    accept_task: JoinHandle<()>,
}

impl ReplicationHub {
    /// Start the hub on a bound listener
    pub fn spawn(
        listener: Listener,
        machine: SessionStateMachine,
        storage: Storage,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let core = Arc::new(Mutex::new(HubCore {
            machine,
            links: HashMap::new(),
            storage,
            event_tx,
        }));

        let accept_core = core.clone();
        let accept_task = tokio::spawn(async move {
            Self::accept_loop(listener, accept_core).await;
        });

        Self { core, accept_task }
    }

    /// Accept inbound channels until the listener closes
    async fn accept_loop(mut listener: Listener, core: Arc<Mutex<HubCore>>) {
        let next_link_id = AtomicU64::new(0);
        while let Some(channel) = listener.accept().await {
            let link_id = next_link_id.fetch_add(1, Ordering::Relaxed);
            let (sender, receiver) = channel.split();

            let mut guard = core.lock().await;
            // Onboard with the entire current session before anything else
            // can mutate it; this is the only sync mechanism there is.
            let snapshot = guard.machine.snapshot();
            let frame = WireMessage::broadcast(BroadcastMessage::StateSync { session: snapshot })
                .encode();
            match frame {
                Ok(frame) => {
                    // The channel is brand new, so its queue is empty.
                    if sender.try_send(frame).is_err() {
                        debug!(link_id, "Channel gone before onboarding");
                        continue;
                    }
                }
                Err(e) => {
                    warn!(link_id, error = %e, "Failed to encode onboarding snapshot");
                    continue;
                }
            }
            guard.links.insert(
                link_id,
                PeerLink {
                    sender,
                    participant: None,
                },
            );
            drop(guard);
            debug!(link_id, "Channel accepted and onboarded");

            let task_core = core.clone();
            tokio::spawn(async move {
                Self::channel_task(link_id, receiver, task_core).await;
            });
        }
        debug!("Accept loop ended");
    }

    /// Read intents from one channel until it closes
    async fn channel_task(link_id: u64, mut receiver: ChannelReceiver, core: Arc<Mutex<HubCore>>) {
        while let Some(bytes) = receiver.recv().await {
            let intent = match WireMessage::decode(&bytes) {
                Ok(wire) => match wire.into_inner() {
                    PeerMessage::Intent(intent) => intent,
                    PeerMessage::Broadcast(_) => {
                        warn!(link_id, "Broadcast frame on an inbound channel, ignoring");
                        continue;
                    }
                },
                Err(e) => {
                    warn!(link_id, error = %e, "Undecodable frame, ignoring");
                    continue;
                }
            };

            let flow = core.lock().await.handle_intent(link_id, intent);
            if matches!(flow, Flow::Close) {
                return;
            }
        }
        core.lock().await.handle_disconnect(link_id);
    }

    /// Clone the current authoritative snapshot
    pub async fn snapshot(&self) -> Session {
        self.core.lock().await.machine.snapshot()
    }

    /// Open a round, optionally setting the item
    pub async fn launch_vote(&self, item: Option<&str>) {
        let mut core = self.core.lock().await;
        core.machine.launch_vote(item);
        core.broadcast_state();
    }

    /// Show the votes
    pub async fn reveal_votes(&self) {
        let mut core = self.core.lock().await;
        core.machine.reveal_votes();
        core.broadcast_state();
    }

    /// Reset votes and return to Waiting
    pub async fn new_round(&self) {
        let mut core = self.core.lock().await;
        core.machine.new_round();
        core.broadcast_state();
    }

    /// Change the current item
    pub async fn update_item(&self, text: &str) {
        let mut core = self.core.lock().await;
        core.machine.update_item(text);
        core.broadcast_state();
    }

    /// Facilitator-initiated removal of a participant
    ///
    /// Also drops that participant's channel if one is registered.
    pub async fn remove_participant(&self, participant_id: &ParticipantId) {
        let mut core = self.core.lock().await;
        core.links
            .retain(|_, link| link.participant.as_ref() != Some(participant_id));
        if core.machine.remove_participant(participant_id) {
            let _ = core.event_tx.send(SessionEvent::ParticipantLeft {
                participant_id: *participant_id,
            });
            core.broadcast_state();
        }
    }

    /// Tell every spoke the session is over, then close every channel
    ///
    /// Returns only after the accept task has stopped, which drops the
    /// listener and releases the address binding. The code is reusable the
    /// moment this returns.
    pub async fn broadcast_close(&mut self) {
        {
            let mut core = self.core.lock().await;
            info!(code = %core.machine.session().code, "Closing session");
            if let Ok(frame) = WireMessage::broadcast(BroadcastMessage::SessionClosed).encode() {
                for link in core.links.values() {
                    let _ = link.sender.try_send(frame.clone());
                }
            }
            core.links.clear();
        }
        self.accept_task.abort();
        let _ = (&mut self.accept_task).await;
    }
}

impl Drop for ReplicationHub {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
