//! One logical snapshot stream over two delivery mechanisms.
//!
//! [`FanInTransport`] publishes every payload through both legs and yields
//! whatever either leg receives first. A leg that fails to subscribe, errors
//! on receive, or closes is disabled and the transport keeps running on the
//! remaining leg; only when both are gone does the stream end.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::identity::GameId;
use crate::transport::Transport;

struct Leg<T> {
    name: &'static str,
    transport: T,
    enabled: bool,
}

impl<T: Transport> Leg<T> {
    fn new(name: &'static str, transport: T) -> Self {
        Self {
            name,
            transport,
            enabled: true,
        }
    }

    fn disable(&mut self, reason: &str) {
        if self.enabled {
            warn!(leg = self.name, "disabling delivery mechanism: {reason}");
            self.enabled = false;
        }
    }
}

enum Side {
    Primary,
    Secondary,
}

/// A [`Transport`] that fans two transports into one stream.
///
/// Typical use pairs a low-latency [`BroadcastTransport`](super::BroadcastTransport)
/// (primary) with a robust [`PollingTransport`](super::PollingTransport)
/// (secondary).
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe as long as both legs are.
pub struct FanInTransport<A, B> {
    primary: Leg<A>,
    secondary: Leg<B>,
}

impl<A: Transport, B: Transport> FanInTransport<A, B> {
    /// Combine `primary` and `secondary`.
    pub fn new(primary: A, secondary: B) -> Self {
        Self {
            primary: Leg::new("primary", primary),
            secondary: Leg::new("secondary", secondary),
        }
    }

    /// Returns `(primary_enabled, secondary_enabled)`.
    pub fn legs_enabled(&self) -> (bool, bool) {
        (self.primary.enabled, self.secondary.enabled)
    }
}

impl<A, B> std::fmt::Debug for FanInTransport<A, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanInTransport")
            .field("primary_enabled", &self.primary.enabled)
            .field("secondary_enabled", &self.secondary.enabled)
            .finish()
    }
}

#[async_trait]
impl<A: Transport, B: Transport> Transport for FanInTransport<A, B> {
    async fn subscribe(&mut self, game_id: &GameId) -> Result<(), SyncError> {
        if let Err(e) = self.primary.transport.subscribe(game_id).await {
            self.primary.disable(&e.to_string());
        }
        if let Err(e) = self.secondary.transport.subscribe(game_id).await {
            self.secondary.disable(&e.to_string());
        }
        if !self.primary.enabled && !self.secondary.enabled {
            return Err(SyncError::TransportUnavailable(
                "no delivery mechanism could subscribe".into(),
            ));
        }
        debug!(
            primary = self.primary.enabled,
            secondary = self.secondary.enabled,
            "fan-in subscribed"
        );
        Ok(())
    }

    async fn publish(&mut self, game_id: &GameId, payload: String) -> Result<(), SyncError> {
        let mut delivered = false;
        let mut last_error = None;
        if self.primary.enabled {
            match self.primary.transport.publish(game_id, payload.clone()).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(leg = self.primary.name, "publish failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        if self.secondary.enabled {
            match self.secondary.transport.publish(game_id, payload).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(leg = self.secondary.name, "publish failed: {e}");
                    last_error = Some(e);
                }
            }
        }
        match (delivered, last_error) {
            (true, _) => Ok(()),
            (false, Some(e)) => Err(e),
            (false, None) => Err(SyncError::TransportClosed),
        }
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        let Self { primary, secondary } = self;
        loop {
            let (side, item) = tokio::select! {
                item = primary.transport.recv(), if primary.enabled => (Side::Primary, item),
                item = secondary.transport.recv(), if secondary.enabled => (Side::Secondary, item),
                else => return None,
            };
            let leg_name = match side {
                Side::Primary => primary.name,
                Side::Secondary => secondary.name,
            };
            let reason = match item {
                Some(Ok(payload)) => return Some(Ok(payload)),
                Some(Err(e)) => e.to_string(),
                None => "closed".to_string(),
            };
            debug!(leg = leg_name, "leg stopped delivering: {reason}");
            match side {
                Side::Primary => primary.disable(&reason),
                Side::Secondary => secondary.disable(&reason),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        let primary = self.primary.transport.close().await;
        let secondary = self.secondary.transport.close().await;
        self.primary.enabled = false;
        self.secondary.enabled = false;
        primary.and(secondary)
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::transports::{BroadcastHub, MemorySlotStore, PollingTransport, SlotStore};
    use std::time::Duration;

    /// Transport that is never available.
    struct Unsupported;

    #[async_trait]
    impl Transport for Unsupported {
        async fn subscribe(&mut self, _game_id: &GameId) -> Result<(), SyncError> {
            Err(SyncError::TransportUnavailable("not in this environment".into()))
        }

        async fn publish(&mut self, _game_id: &GameId, _payload: String) -> Result<(), SyncError> {
            Err(SyncError::TransportUnavailable("not in this environment".into()))
        }

        async fn recv(&mut self) -> Option<Result<String, SyncError>> {
            None
        }

        async fn close(&mut self) -> Result<(), SyncError> {
            Ok(())
        }
    }

    fn game() -> GameId {
        GameId::parse("fanin01").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn payload_arrives_through_either_leg() {
        let hub = BroadcastHub::default();
        let slots = MemorySlotStore::new();
        let mut a = FanInTransport::new(hub.transport(), PollingTransport::new(slots.clone()));
        let mut b = FanInTransport::new(hub.transport(), PollingTransport::new(slots.clone()));
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();

        a.publish(&game(), "snap".into()).await.unwrap();
        // Delivered once per leg.
        assert_eq!(b.recv().await.unwrap().unwrap(), "snap");
        assert_eq!(b.recv().await.unwrap().unwrap(), "snap");
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_leg_degrades_to_the_other() {
        let slots = MemorySlotStore::new();
        let mut a = FanInTransport::new(Unsupported, PollingTransport::new(slots.clone()));
        let mut b = FanInTransport::new(Unsupported, PollingTransport::new(slots.clone()));
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();
        assert_eq!(a.legs_enabled(), (false, true));

        a.publish(&game(), "via-slot".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), "via-slot");
    }

    #[tokio::test]
    async fn both_legs_unavailable_fails_subscribe() {
        let mut t = FanInTransport::new(Unsupported, Unsupported);
        assert!(matches!(
            t.subscribe(&game()).await,
            Err(SyncError::TransportUnavailable(_))
        ));
        assert!(t.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn closed_leg_is_dropped_from_recv() {
        let hub = BroadcastHub::default();
        let slots = MemorySlotStore::new();
        let mut broadcast = hub.transport();
        broadcast.close().await.unwrap();
        let mut t = FanInTransport::new(broadcast, PollingTransport::new(slots.clone()));
        // Closed broadcast refuses to subscribe; the slot leg carries on.
        t.subscribe(&game()).await.unwrap();

        slots.write(&game().channel_name(), "late").unwrap();
        let got = tokio::time::timeout(Duration::from_secs(3), t.recv()).await;
        assert_eq!(got.unwrap().unwrap().unwrap(), "late");
        assert_eq!(t.legs_enabled(), (false, true));
    }
}
