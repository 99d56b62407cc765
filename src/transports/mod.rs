//! Concrete [`Transport`](crate::Transport) implementations.
//!
//! | Transport            | Delivery                                   | Latency | Survives reload |
//! |----------------------|--------------------------------------------|---------|-----------------|
//! | [`BroadcastTransport`] | live listeners of a [`BroadcastHub`] channel | low     | no              |
//! | [`PollingTransport`]   | shared [`SlotStore`] polled on an interval | ~1 s    | yes             |
//! | [`FanInTransport`]     | both of the above as one stream            | lowest  | yes             |
//!
//! `FileSlotStore` requires the `file-slot` feature (enabled by default).
//!
//! # Example
//!
//! ```rust
//! use spy_sync::transports::{BroadcastHub, FanInTransport, MemorySlotStore, PollingTransport};
//!
//! let hub = BroadcastHub::default();
//! let slots = MemorySlotStore::new();
//! let transport = FanInTransport::new(hub.transport(), PollingTransport::new(slots));
//! # let _ = transport;
//! ```

pub mod broadcast;
pub mod fan_in;
pub mod polling;

pub use broadcast::{BroadcastHub, BroadcastTransport};
pub use fan_in::FanInTransport;
#[cfg(feature = "file-slot")]
pub use polling::FileSlotStore;
pub use polling::{MemorySlotStore, PollingTransport, SlotStore, DEFAULT_POLL_INTERVAL};
