//! Pointcast Core Library
//!
//! Planning-poker session replication over a hub-and-spoke star.
//!
//! ## Overview
//!
//! One participant acts as facilitator and holds the single writable copy
//! of the session. Everyone else connects a spoke to the facilitator's
//! address (derived from a short human-typeable code), announces itself,
//! and mirrors the session by replacing its local copy wholesale on every
//! `state_sync` broadcast. Participant actions flow upstream as small
//! intent messages; the facilitator folds them into authoritative state
//! and re-broadcasts.
//!
//! ## Core Principles
//!
//! - **Single writer**: only the facilitator's state machine mutates
//!   authoritative state
//! - **Snapshot replication**: full-state broadcasts, never deltas or
//!   field merges
//! - **Coupled mutation and propagation**: every successful mutation is
//!   persisted and broadcast as one sequence
//!
//! ## Quick Start
//!
//! ```ignore
//! use pointcast_core::{SessionLifecycleController, Storage, Switchboard};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let board = Switchboard::new();
//!
//!     let storage = Storage::new("facilitator.redb")?;
//!     let mut host = SessionLifecycleController::new(board.clone(), storage);
//!     let code = host.create_session("Dana").await?;
//!
//!     let storage = Storage::new("alice.redb")?;
//!     let mut alice = SessionLifecycleController::new(board, storage);
//!     alice.join_session("Alice", code.as_str()).await?;
//!
//!     host.launch_vote(Some("Story 1")).await?;
//!     alice.cast_vote(5).await?;
//!     host.reveal_votes().await?;
//!     Ok(())
//! }
//! ```

pub mod code;
pub mod error;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod protocol;
pub mod roster;
pub mod session;
pub mod spoke;
pub mod storage;
pub mod transport;
pub mod types;

// Re-exports
pub use code::{ParticipantId, SessionCode, CODE_ALPHABET, CODE_LEN};
pub use error::{SessionError, SessionResult};
pub use events::SessionEvent;
pub use hub::ReplicationHub;
pub use lifecycle::{RestoredRole, SessionLifecycleController};
pub use protocol::{BroadcastMessage, ErrorCode, IntentMessage, PeerMessage, WireMessage};
pub use roster::{AddOutcome, Roster, DEFAULT_VOTER_CAP};
pub use session::SessionStateMachine;
pub use spoke::ReplicationSpoke;
pub use storage::Storage;
pub use transport::{Channel, ChannelReceiver, ChannelSender, Listener, Switchboard, TransportError};
pub use types::{IdentityRecord, Participant, Role, Session, SessionStatus};
