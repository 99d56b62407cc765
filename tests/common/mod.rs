#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for Spy Sync integration tests.
//!
//! Provides a scripted [`MockTransport`], a controllable [`ManualClock`], and
//! helper functions for constructing stores and snapshot JSON strings.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use spy_sync::identity::{GameId, LocalIdentity};
use spy_sync::protocol::{self, Player, Revision, Stage};
use spy_sync::state::GameState;
use spy_sync::store::{Clock, StateStore};
use spy_sync::{SyncError, Transport};

// ── MockTransport ───────────────────────────────────────────────────

/// A mock transport for integration testing.
///
/// Scripted inbound payloads are consumed in order by `recv()`.
/// All payloads published by the client are recorded in `published`.
pub struct MockTransport {
    /// Scripted inbound payloads (consumed in order by `recv`).
    incoming: VecDeque<Option<Result<String, SyncError>>>,
    /// Recorded outbound payloads.
    pub published: Arc<StdMutex<Vec<String>>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

impl MockTransport {
    /// Create a new mock transport with the given scripted inbound payloads.
    ///
    /// Returns the transport plus shared handles for inspecting published
    /// payloads and whether close was called.
    pub fn new(
        incoming: Vec<Option<Result<String, SyncError>>>,
    ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
        let published = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            incoming: VecDeque::from(incoming),
            published: Arc::clone(&published),
            closed: Arc::clone(&closed),
        };
        (transport, published, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn subscribe(&mut self, _game_id: &GameId) -> Result<(), SyncError> {
        Ok(())
    }

    async fn publish(&mut self, _game_id: &GameId, payload: String) -> Result<(), SyncError> {
        self.published.lock().unwrap().push(payload);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, SyncError>> {
        if let Some(item) = self.incoming.pop_front() {
            item
        } else {
            // No more scripted payloads; hang so the sync loop stays alive
            // until shutdown is called.
            std::future::pending().await
        }
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

// ── ManualClock ─────────────────────────────────────────────────────

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn at(millis: Revision) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn set(&self, millis: Revision) {
        self.0.store(millis, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> Revision {
        self.0.load(Ordering::Relaxed)
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// The game id shared by every helper.
pub fn game_id() -> GameId {
    GameId::parse("tst0001").expect("valid game id")
}

/// A seeded store in [`game_id`] whose clock is frozen at `now`.
pub fn store_at(now: Revision) -> StateStore {
    StateStore::new(LocalIdentity::new(game_id()))
        .with_clock(ManualClock::at(now))
        .with_seed(42)
}

/// A lobby state holding players `ids` (named `name-<id>`) at `revision`.
pub fn lobby(ids: &[&str], revision: Revision) -> GameState {
    let mut state = GameState {
        stage: Stage::Lobby,
        revision,
        ..Default::default()
    };
    for id in ids {
        state
            .players
            .insert((*id).to_string(), Player::new(*id, format!("name-{id}")));
    }
    state
}

/// JSON payload for the full `state`.
pub fn snapshot_json(state: &GameState) -> String {
    protocol::encode_snapshot(state).expect("snapshot_json serialization")
}
