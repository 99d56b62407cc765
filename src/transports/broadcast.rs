//! Low-latency delivery to every live listener of a named channel.
//!
//! [`BroadcastHub`] plays the role of a same-origin broadcast bus: every
//! [`BroadcastTransport`] created from one hub can reach the others through
//! channels named after the game id. Payloads published while nobody is
//! listening are lost, and a publisher never receives its own payloads.
//! A channel is dropped from the hub once its last listener closes.
//!
//! # Example
//!
//! ```rust
//! # async fn example() -> Result<(), spy_sync::SyncError> {
//! use spy_sync::identity::GameId;
//! use spy_sync::transports::BroadcastHub;
//! use spy_sync::Transport;
//!
//! let hub = BroadcastHub::default();
//! let game = GameId::parse("abc1234")?;
//! let mut tab_a = hub.transport();
//! let mut tab_b = hub.transport();
//! tab_a.subscribe(&game).await?;
//! tab_b.subscribe(&game).await?;
//!
//! tab_a.publish(&game, r#"{"revision": 1}"#.to_string()).await?;
//! assert_eq!(tab_b.recv().await.transpose()?.as_deref(), Some(r#"{"revision": 1}"#));
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::identity::GameId;
use crate::transport::Transport;

/// Default number of payloads buffered per channel before slow listeners lag.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    payload: String,
}

/// Registry of named broadcast channels shared by all transports of a process.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Envelope>>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl BroadcastHub {
    /// Create a hub whose channels buffer `capacity` payloads.
    /// Values below 1 are clamped to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Create a transport attached to this hub.
    pub fn transport(&self) -> BroadcastTransport {
        BroadcastTransport {
            hub: self.clone(),
            origin: Uuid::new_v4(),
            rx: None,
            channel: None,
            closed: false,
        }
    }

    /// Number of live listeners on the channel for `game_id`.
    pub fn listener_count(&self, game_id: &GameId) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&game_id.channel_name())
            .map_or(0, broadcast::Sender::receiver_count)
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn existing_sender(&self, channel: &str) -> Option<broadcast::Sender<Envelope>> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(channel)
            .cloned()
    }

    /// Forget `channel` if nobody listens to it anymore.
    fn release(&self, channel: &str) {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        if channels
            .get(channel)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(channel);
            trace!(channel, "broadcast channel released");
        }
    }
}

/// A [`Transport`] over a [`BroadcastHub`] channel.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: it only awaits
/// [`broadcast::Receiver::recv`], which is itself cancel-safe.
#[derive(Debug)]
pub struct BroadcastTransport {
    hub: BroadcastHub,
    origin: Uuid,
    rx: Option<broadcast::Receiver<Envelope>>,
    channel: Option<String>,
    closed: bool,
}

impl BroadcastTransport {
    fn unsubscribe(&mut self) {
        self.rx = None;
        if let Some(channel) = self.channel.take() {
            self.hub.release(&channel);
        }
    }
}

impl Drop for BroadcastTransport {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[async_trait]
impl Transport for BroadcastTransport {
    async fn subscribe(&mut self, game_id: &GameId) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        self.unsubscribe();
        let channel = game_id.channel_name();
        self.rx = Some(self.hub.sender(&channel).subscribe());
        debug!(channel = %channel, "broadcast subscribed");
        self.channel = Some(channel);
        Ok(())
    }

    async fn publish(&mut self, game_id: &GameId, payload: String) -> Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        let envelope = Envelope {
            origin: self.origin,
            payload,
        };
        let channel = game_id.channel_name();
        let delivered = self
            .hub
            .existing_sender(&channel)
            .is_some_and(|tx| tx.send(envelope).is_ok());
        if !delivered {
            trace!(channel = %channel, "no live listeners, payload dropped");
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        if self.closed {
            return None;
        }
        let Some(rx) = self.rx.as_mut() else {
            return Some(Err(SyncError::TransportReceive(
                "broadcast transport is not subscribed".into(),
            )));
        };
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.origin == self.origin => {
                    // Own payload echoed back by the channel.
                }
                Ok(envelope) => return Some(Ok(envelope.payload)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "broadcast listener lagged, older payloads skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed = true;
        self.unsubscribe();
        Ok(())
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
    use std::time::Duration;

    fn game() -> GameId {
        GameId::parse("bcast01").unwrap()
    }

    #[test]
    fn broadcast_transport_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<BroadcastTransport>();
    }

    #[tokio::test]
    async fn publisher_does_not_hear_itself() {
        let hub = BroadcastHub::default();
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();

        a.publish(&game(), "one".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), "one");

        let own = tokio::time::timeout(Duration::from_millis(20), a.recv()).await;
        assert!(own.is_err(), "publisher should not receive its own payload");
    }

    #[tokio::test]
    async fn channels_are_isolated_per_game() {
        let hub = BroadcastHub::default();
        let other = GameId::parse("other01").unwrap();
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&other).await.unwrap();

        a.publish(&game(), "hello".into()).await.unwrap();
        let heard = tokio::time::timeout(Duration::from_millis(20), b.recv()).await;
        assert!(heard.is_err());
    }

    #[tokio::test]
    async fn publish_without_listeners_is_ok() {
        let hub = BroadcastHub::default();
        let mut a = hub.transport();
        a.publish(&game(), "lost".into()).await.unwrap();
        assert_eq!(hub.listener_count(&game()), 0);
    }

    #[tokio::test]
    async fn recv_before_subscribe_is_an_error() {
        let mut a = BroadcastHub::default().transport();
        assert!(matches!(
            a.recv().await,
            Some(Err(SyncError::TransportReceive(_)))
        ));
    }

    #[tokio::test]
    async fn lagged_listener_keeps_receiving() {
        let hub = BroadcastHub::with_capacity(2);
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();

        for i in 0..5 {
            a.publish(&game(), format!("p{i}")).await.unwrap();
        }
        assert_eq!(b.recv().await.unwrap().unwrap(), "p3");
        assert_eq!(b.recv().await.unwrap().unwrap(), "p4");
    }

    #[tokio::test]
    async fn close_ends_stream_and_drops_listener() {
        let hub = BroadcastHub::default();
        let mut a = hub.transport();
        a.subscribe(&game()).await.unwrap();
        assert_eq!(hub.listener_count(&game()), 1);

        a.close().await.unwrap();
        assert!(a.recv().await.is_none());
        assert_eq!(hub.listener_count(&game()), 0);
        assert!(matches!(
            a.publish(&game(), "x".into()).await,
            Err(SyncError::TransportClosed)
        ));
    }

    #[tokio::test]
    async fn channel_is_released_with_its_last_listener() {
        let hub = BroadcastHub::default();
        let mut a = hub.transport();
        let mut b = hub.transport();
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();

        a.close().await.unwrap();
        assert_eq!(hub.channels.lock().unwrap().len(), 1);
        drop(b);
        assert!(hub.channels.lock().unwrap().is_empty());

        // Publishing to a released channel does not bring it back.
        let mut c = hub.transport();
        c.publish(&game(), "late".into()).await.unwrap();
        assert!(hub.channels.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resubscribing_releases_the_previous_channel() {
        let hub = BroadcastHub::default();
        let other = GameId::parse("other01").unwrap();
        let mut a = hub.transport();
        a.subscribe(&game()).await.unwrap();
        a.subscribe(&other).await.unwrap();

        assert_eq!(hub.listener_count(&game()), 0);
        assert_eq!(hub.listener_count(&other), 1);
        assert_eq!(hub.channels.lock().unwrap().len(), 1);
    }
}
