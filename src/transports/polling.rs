//! Delivery through a shared persisted slot that every peer polls.
//!
//! Each game has one slot (keyed by [`GameId::channel_name`]). Publishing
//! overwrites the slot; receiving polls it on an interval and yields the
//! contents whenever they differ from what this transport last wrote or read.
//! Slower than broadcast, but the slot survives reloads, so a restarted
//! client picks up the latest snapshot on its first poll.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Result, SyncError};
use crate::identity::GameId;
use crate::transport::Transport;

/// Default interval between two reads of the slot.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// ── Slot stores ─────────────────────────────────────────────────────

/// Key-value storage holding the latest snapshot per game.
///
/// Every peer may write any key at any time; there is no locking.
pub trait SlotStore: Send + Sync + 'static {
    /// Read the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Replace the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory [`SlotStore`]. Clones share the same slots.
#[derive(Debug, Clone, Default)]
pub struct MemorySlotStore {
    slots: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySlotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SlotStore for MemorySlotStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(slots.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// [`SlotStore`] keeping one `<key>.json` file per slot in a directory.
#[cfg(feature = "file-slot")]
#[derive(Debug, Clone)]
pub struct FileSlotStore {
    dir: std::path::PathBuf,
}

#[cfg(feature = "file-slot")]
impl FileSlotStore {
    /// Store slots under `dir`, creating it on first write.
    pub fn new(dir: impl Into<std::path::PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> std::path::PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

#[cfg(feature = "file-slot")]
impl SlotStore for FileSlotStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        // Write-then-rename so pollers never observe a half-written slot.
        let tmp = self.dir.join(format!("{key}.json.{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, self.path(key))?;
        Ok(())
    }
}

// ── PollingTransport ────────────────────────────────────────────────

/// A [`Transport`] that exchanges snapshots through a [`SlotStore`].
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is cancel-safe: a cancelled poll leaves the slot
/// untouched and the next call reads it again.
pub struct PollingTransport {
    slots: Arc<dyn SlotStore>,
    poll_interval: Duration,
    key: Option<String>,
    ticker: Option<Interval>,
    last_seen: Option<String>,
    closed: bool,
}

impl PollingTransport {
    /// Poll `slots` every [`DEFAULT_POLL_INTERVAL`].
    pub fn new(slots: impl SlotStore) -> Self {
        Self {
            slots: Arc::new(slots),
            poll_interval: DEFAULT_POLL_INTERVAL,
            key: None,
            ticker: None,
            last_seen: None,
            closed: false,
        }
    }

    /// Set the interval between polls. Zero is clamped to one millisecond.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// The configured poll interval.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl fmt::Debug for PollingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTransport")
            .field("key", &self.key)
            .field("poll_interval", &self.poll_interval)
            .field("closed", &self.closed)
            .finish()
    }
}

#[async_trait]
impl Transport for PollingTransport {
    async fn subscribe(&mut self, game_id: &GameId) -> std::result::Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.key = Some(game_id.channel_name());
        debug!(slot = %game_id.channel_name(), interval = ?self.poll_interval, "slot polling started");
        Ok(())
    }

    async fn publish(
        &mut self,
        game_id: &GameId,
        payload: String,
    ) -> std::result::Result<(), SyncError> {
        if self.closed {
            return Err(SyncError::TransportClosed);
        }
        self.slots
            .write(&game_id.channel_name(), &payload)
            .map_err(|e| SyncError::TransportPublish(e.to_string()))?;
        self.last_seen = Some(payload);
        Ok(())
    }

    async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
        if self.closed {
            return None;
        }
        let (Some(ticker), Some(key)) = (self.ticker.as_mut(), self.key.as_deref()) else {
            return Some(Err(SyncError::TransportReceive(
                "polling transport is not subscribed".into(),
            )));
        };
        loop {
            ticker.tick().await;
            match self.slots.read(key) {
                Ok(Some(value)) if self.last_seen.as_ref() != Some(&value) => {
                    self.last_seen = Some(value.clone());
                    return Some(Ok(value));
                }
                Ok(_) => {}
                Err(e) => warn!(slot = %key, "failed to read snapshot slot: {e}"),
            }
        }
    }

    async fn close(&mut self) -> std::result::Result<(), SyncError> {
        self.closed = true;
        self.ticker = None;
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

    fn game() -> GameId {
        GameId::parse("poll001").unwrap()
    }

    /// Slot store whose reads always fail.
    struct BrokenSlots;

    impl SlotStore for BrokenSlots {
        fn read(&self, _key: &str) -> Result<Option<String>> {
            Err(std::io::Error::other("disk on fire").into())
        }

        fn write(&self, _key: &str, _value: &str) -> Result<()> {
            Err(std::io::Error::other("disk on fire").into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn peer_write_is_picked_up_on_next_poll() {
        let slots = MemorySlotStore::new();
        let mut a = PollingTransport::new(slots.clone());
        let mut b = PollingTransport::new(slots.clone());
        a.subscribe(&game()).await.unwrap();
        b.subscribe(&game()).await.unwrap();

        a.publish(&game(), "snap-1".into()).await.unwrap();
        assert_eq!(b.recv().await.unwrap().unwrap(), "snap-1");
    }

    #[tokio::test(start_paused = true)]
    async fn own_write_is_not_echoed() {
        let slots = MemorySlotStore::new();
        let mut a = PollingTransport::new(slots);
        a.subscribe(&game()).await.unwrap();
        a.publish(&game(), "mine".into()).await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_secs(5), a.recv()).await;
        assert!(echoed.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_slot_is_delivered_once() {
        let slots = MemorySlotStore::new();
        slots.write(&game().channel_name(), "persisted").unwrap();
        let mut a = PollingTransport::new(slots);
        a.subscribe(&game()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().unwrap(), "persisted");
        let again = tokio::time::timeout(Duration::from_secs(5), a.recv()).await;
        assert!(again.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_are_logged_not_fatal() {
        let mut a = PollingTransport::new(BrokenSlots);
        a.subscribe(&game()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(3), a.recv()).await;
        assert!(result.is_err(), "recv should keep polling through read errors");
    }

    #[tokio::test]
    async fn write_errors_surface_as_publish_errors() {
        let mut a = PollingTransport::new(BrokenSlots);
        assert!(matches!(
            a.publish(&game(), "x".into()).await,
            Err(SyncError::TransportPublish(_))
        ));
    }

    #[test]
    fn zero_poll_interval_is_clamped() {
        let transport =
            PollingTransport::new(MemorySlotStore::new()).with_poll_interval(Duration::ZERO);
        assert_eq!(transport.poll_interval(), Duration::from_millis(1));
    }

    #[cfg(feature = "file-slot")]
    #[tokio::test(start_paused = true)]
    async fn file_slots_survive_a_new_transport() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = PollingTransport::new(FileSlotStore::new(dir.path()));
        a.subscribe(&game()).await.unwrap();
        a.publish(&game(), "on-disk".into()).await.unwrap();
        a.close().await.unwrap();

        let mut reloaded = PollingTransport::new(FileSlotStore::new(dir.path()));
        reloaded.subscribe(&game()).await.unwrap();
        assert_eq!(reloaded.recv().await.unwrap().unwrap(), "on-disk");
    }
}
