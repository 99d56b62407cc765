//! # Spy Sync
//!
//! Peer-to-peer state synchronization for a "find the spy" party game.
//!
//! Every client holds a full copy of the [`GameState`]. Local actions are
//! applied immediately and the whole snapshot is published to the other
//! clients of the same game; inbound snapshots are folded in with a
//! last-writer-wins rule gated on a monotonically increasing revision. There
//! is no server and no authority.
//!
//! ## Features
//!
//! - **Pure core**: [`GameState::apply`](state::GameState::apply) and
//!   [`reconcile::merge`] are plain functions over values
//! - **Transport-agnostic**: implement the [`Transport`] trait for any
//!   delivery mechanism
//! - **Built-in transports**: an in-process broadcast bus, a polled slot
//!   store (memory or `file-slot` feature), and a fan-in combinator
//! - **Event-driven**: receive typed [`SyncEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), spy_sync::SyncError> {
//! use spy_sync::identity::{GameId, LocalIdentity};
//! use spy_sync::transports::BroadcastHub;
//! use spy_sync::{StateStore, SyncClient, SyncConfig};
//!
//! let hub = BroadcastHub::default();
//! let game = GameId::generate();
//!
//! let alice = StateStore::new(LocalIdentity::new(game.clone()));
//! let (alice, _alice_events) = SyncClient::start(hub.transport(), alice, SyncConfig::new());
//! let bob = StateStore::new(LocalIdentity::new(game));
//! let (bob, _bob_events) = SyncClient::start(hub.transport(), bob, SyncConfig::new());
//!
//! alice.add_player("Alice").await?;
//! bob.add_player("Bob").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod event;
pub mod identity;
pub mod protocol;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use client::{SyncClient, SyncConfig};
pub use error::SyncError;
pub use event::SyncEvent;
pub use identity::{GameId, IdentityFile, JoinMode, LocalIdentity};
pub use protocol::{Player, PlayerId, Revision, SnapshotPatch, Stage};
pub use reconcile::MergeOutcome;
pub use state::{Action, GameState};
pub use store::{Clock, Role, StateStore, SystemClock};
pub use transport::Transport;
