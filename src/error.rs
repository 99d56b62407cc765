//! Error types for the spy-sync core.

use thiserror::Error;

/// Errors that can occur while synchronizing game state between peers.
///
/// Precondition failures on game operations (starting with fewer than two
/// players, voting outside the voting stage, ...) are not errors: those
/// operations are silent no-ops and report whether they applied.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to publish a snapshot through the transport.
    #[error("transport publish error: {0}")]
    TransportPublish(String),

    /// Failed to receive a snapshot from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The delivery mechanism is not available in this environment.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The transport was closed unexpectedly.
    #[error("transport closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a snapshot or identity record.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation on a sync client whose loop has stopped.
    #[error("sync client is not running")]
    NotRunning,

    /// A game identifier was empty or contained unsupported characters.
    #[error("invalid game id: {0:?}")]
    InvalidGameId(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for spy-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
