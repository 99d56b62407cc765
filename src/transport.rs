//! Transport abstraction for exchanging game snapshots between peers.
//!
//! The [`Transport`] trait is the only way snapshots leave or enter a client.
//! Payloads are complete JSON snapshots (see [`protocol`](crate::protocol)).
//! Delivery is best effort: a payload may be lost, duplicated or delivered
//! out of order, and the reconciliation step tolerates all three.
//!
//! Several delivery mechanisms can be combined into one logical inbound
//! stream with [`FanInTransport`](crate::transports::FanInTransport).
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use spy_sync::error::SyncError;
//! use spy_sync::identity::GameId;
//! use spy_sync::transport::Transport;
//!
//! struct MyTransport { /* ... */ }
//!
//! #[async_trait]
//! impl Transport for MyTransport {
//!     async fn subscribe(&mut self, game_id: &GameId) -> Result<(), SyncError> {
//!         // Start listening on the channel named by game_id.channel_name()
//!         todo!()
//!     }
//!
//!     async fn publish(&mut self, game_id: &GameId, payload: String) -> Result<(), SyncError> {
//!         // Hand the snapshot to every other peer, fire and forget
//!         todo!()
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, SyncError>> {
//!         // Wait for the next snapshot from a peer
//!         // Return None when the transport is closed
//!         todo!()
//!     }
//!
//!     async fn close(&mut self) -> Result<(), SyncError> {
//!         todo!()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SyncError;
use crate::identity::GameId;

/// A best-effort snapshot channel shared by every peer in one game.
///
/// # Object Safety
///
/// This trait is object-safe, so `Box<dyn Transport>` works for dynamic
/// dispatch; a blanket impl forwards through the box.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is used inside
/// `tokio::select!`. If `recv` is cancelled before completion, calling it again
/// must not lose a payload that was already taken off the wire.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Start receiving snapshots published for `game_id`.
    ///
    /// Called once, before any other method.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] if the mechanism is not
    /// supported in this environment.
    async fn subscribe(&mut self, game_id: &GameId) -> Result<(), SyncError>;

    /// Publish a snapshot payload to peers in `game_id`.
    ///
    /// Returning `Ok` does not imply anyone received it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportPublish`] if the payload could not be
    /// handed off.
    async fn publish(&mut self, game_id: &GameId, payload: String) -> Result<(), SyncError>;

    /// Receive the next snapshot payload from a peer.
    ///
    /// Returns:
    /// - `Some(Ok(payload))`: a payload arrived
    /// - `Some(Err(e))`: the transport failed (e.g. [`SyncError::TransportReceive`])
    /// - `None`: the transport was closed
    async fn recv(&mut self) -> Option<Result<String, SyncError>>;

    /// Stop receiving and release resources.
    ///
    /// # Errors
    ///
    /// Returns an error if a graceful close fails. Implementations should
    /// still release resources in that case.
    async fn close(&mut self) -> Result<(), SyncError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn subscribe(&mut self, game_id: &GameId) -> Result<(), SyncError> {
        (**self).subscribe(game_id).await
    }

    async fn publish(&mut self, game_id: &GameId, payload: String) -> Result<(), SyncError> {
        (**self).publish(game_id, payload).await
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        (**self).close().await
    }
}
