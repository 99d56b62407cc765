//! Async driver that keeps a [`StateStore`] in sync with its peers.
//!
//! [`SyncClient`] is a thin handle over a shared [`StateStore`] and a
//! background sync loop task. Local mutations are applied immediately under
//! the store lock and the resulting snapshot is queued to the loop over an
//! unbounded MPSC channel. The loop reports and publishes queued snapshots, republishes
//! the full state on a fixed interval, and merges every inbound snapshot.
//! Events are emitted on a bounded channel ([`tokio::sync::mpsc::Receiver<SyncEvent>`])
//! returned from [`SyncClient::start`].
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), spy_sync::SyncError> {
//! use spy_sync::identity::{GameId, LocalIdentity};
//! use spy_sync::transports::{BroadcastHub, FanInTransport, MemorySlotStore, PollingTransport};
//! use spy_sync::{StateStore, SyncClient, SyncConfig, SyncEvent};
//!
//! let hub = BroadcastHub::default();
//! let transport = FanInTransport::new(hub.transport(), PollingTransport::new(MemorySlotStore::new()));
//! let store = StateStore::new(LocalIdentity::new(GameId::parse("abc1234")?));
//! let (mut client, mut events) = SyncClient::start(transport, store, SyncConfig::new());
//!
//! client.add_player("Alice").await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SyncEvent::StateChanged { state, .. } => { /* render state.stage */ }
//!         SyncEvent::Stopped { .. } => break,
//!         _ => {}
//!     }
//! }
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::error::{Result, SyncError};
use crate::event::SyncEvent;
use crate::identity::{GameId, IdentityFile};
use crate::protocol::{self, Player, PlayerId, Stage};
use crate::reconcile::MergeOutcome;
use crate::state::GameState;
use crate::store::{Role, StateStore};
use crate::transport::Transport;

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default interval between two full-state republications.
pub const DEFAULT_PUBLISH_INTERVAL: Duration = Duration::from_secs(2);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`SyncClient`].
///
/// # Example
///
/// ```
/// use spy_sync::client::SyncConfig;
/// use std::time::Duration;
///
/// let config = SyncConfig::new()
///     .with_publish_interval(Duration::from_millis(500))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.publish_interval, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Interval at which the full state is republished, so that peers that
    /// missed a delivery (or joined late) converge.
    ///
    /// Defaults to **2 seconds**. Zero is clamped to one millisecond.
    pub publish_interval: Duration,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up, events are dropped (with a warning
    /// logged) to avoid blocking the sync loop. The `Stopped` event is always
    /// delivered regardless of capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// Defaults to **1 second**. A zero timeout aborts the sync loop
    /// immediately.
    pub shutdown_timeout: Duration,
    /// Where to persist the local identity whenever it changes.
    pub identity_file: Option<IdentityFile>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self {
            publish_interval: DEFAULT_PUBLISH_INTERVAL,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            identity_file: None,
        }
    }

    /// Set the republication interval.
    #[must_use]
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the capacity of the bounded event channel.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Persist the local identity to `file` whenever it changes.
    #[must_use]
    pub fn with_identity_file(mut self, file: IdentityFile) -> Self {
        self.identity_file = Some(file);
        self
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Work handed from the client handle to the sync loop.
enum Command {
    /// A local mutation applied; report it and publish `payload`.
    Publish {
        payload: String,
        state: Box<GameState>,
    },
}

/// State shared between the client handle and the sync loop.
struct Shared {
    running: AtomicBool,
    store: Mutex<StateStore>,
}

// ── Client handle ───────────────────────────────────────────────────

/// Async handle to a synchronized game.
///
/// Created via [`SyncClient::start`]. Mutating methods apply the change
/// locally right away, report whether it applied, and queue the new
/// snapshot for publication without waiting for delivery.
pub struct SyncClient {
    game_id: GameId,
    /// Sender half of the command channel to the sync loop.
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    identity_file: Option<IdentityFile>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl SyncClient {
    /// Start the sync loop for `store`'s game and return a handle plus event
    /// receiver.
    ///
    /// The loop subscribes the transport to the game named by the store's
    /// identity, announces the local player if there is one, and then runs
    /// until shutdown or until the transport ends.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl Transport,
        store: StateStore,
        config: SyncConfig,
    ) -> (Self, mpsc::Receiver<SyncEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<SyncEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        let game_id = store.identity().game_id.clone();
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            store: Mutex::new(store),
        });

        let task = tokio::spawn(sync_loop(
            transport,
            game_id.clone(),
            cmd_rx,
            event_tx,
            Arc::clone(&shared),
            shutdown_rx,
            config.publish_interval.max(Duration::from_millis(1)),
        ));

        let client = Self {
            game_id,
            cmd_tx,
            shared,
            identity_file: config.identity_file,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Join with a display name. Returns the new player's id, or `None` if
    /// the name is blank.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn add_player(&self, name: &str) -> Result<Option<PlayerId>> {
        self.mutate(|store| store.add_player(name, None)).await
    }

    /// Add a player under an explicit id, e.g. one announced by a peer.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn add_player_with_id(&self, name: &str, id: PlayerId) -> Result<Option<PlayerId>> {
        self.mutate(|store| store.add_player(name, Some(id))).await
    }

    /// Remove a player.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn remove_player(&self, id: &str) -> Result<bool> {
        self.mutate(|store| store.remove_player(id)).await
    }

    /// Start a round. `Ok(false)` if fewer than two players are present.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn start_game(&self) -> Result<bool> {
        self.mutate(StateStore::start_game).await
    }

    /// Move from reveal to gameplay.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn start_gameplay(&self) -> Result<bool> {
        self.mutate(StateStore::start_gameplay).await
    }

    /// Move from gameplay to voting.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn start_voting(&self) -> Result<bool> {
        self.mutate(StateStore::start_voting).await
    }

    /// Cast the local player's vote.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn submit_vote(&self, target: &str) -> Result<bool> {
        self.mutate(|store| store.submit_vote(target)).await
    }

    /// Return to the lobby.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotRunning`] if the sync loop has stopped.
    pub async fn reset_game(&self) -> Result<bool> {
        self.mutate(StateStore::reset_game).await
    }

    /// Shut down the client, closing the transport and stopping the loop.
    ///
    /// After calling this method, the event receiver yields a final
    /// [`Stopped`](SyncEvent::Stopped) event and then `None`.
    pub async fn shutdown(&mut self) {
        debug!("SyncClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout; abort it if it does not exit in time.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("sync loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("sync loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("sync loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.running.store(false, Ordering::Release);
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// The game this client synchronizes.
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    /// Returns `true` while the sync loop is running.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Copy of the current state.
    pub async fn state(&self) -> GameState {
        self.shared.store.lock().await.state().clone()
    }

    /// The local player, if joined.
    pub async fn local_player(&self) -> Option<Player> {
        self.shared.store.lock().await.local_player().cloned()
    }

    /// All players.
    pub async fn players(&self) -> Vec<Player> {
        let store = self.shared.store.lock().await;
        store.players().into_iter().cloned().collect()
    }

    /// The player with strictly the most votes.
    pub async fn most_voted_player(&self) -> Option<Player> {
        self.shared.store.lock().await.most_voted_player().cloned()
    }

    /// Returns `true` once enough players have joined to start.
    pub async fn is_game_ready(&self) -> bool {
        self.shared.store.lock().await.is_game_ready()
    }

    /// Returns `true` when every player has a recorded vote.
    pub async fn is_voting_complete(&self) -> bool {
        self.shared.store.lock().await.is_voting_complete()
    }

    /// The screen the UI should show.
    pub async fn screen(&self) -> Stage {
        self.shared.store.lock().await.screen()
    }

    /// The local player's role in the running round.
    pub async fn local_role(&self) -> Option<Role> {
        self.shared.store.lock().await.local_role()
    }

    /// Run `f` against the store under its lock.
    pub async fn with_store<R>(&self, f: impl FnOnce(&StateStore) -> R) -> R {
        f(&*self.shared.store.lock().await)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Apply `f` to the store. If the revision moved, hand the new snapshot
    /// to the sync loop; if the identity changed, persist it.
    async fn mutate<R>(&self, f: impl FnOnce(&mut StateStore) -> R) -> Result<R> {
        if !self.is_running() {
            return Err(SyncError::NotRunning);
        }
        let mut store = self.shared.store.lock().await;
        let revision = store.revision();
        let identity = store.identity().clone();

        let result = f(&mut *store);

        if store.identity() != &identity {
            if let Some(file) = &self.identity_file {
                if let Err(e) = file.save(store.identity()) {
                    warn!(path = %file.path().display(), "failed to persist identity: {e}");
                }
            }
        }
        if store.revision() != revision {
            let command = Command::Publish {
                payload: protocol::encode_snapshot(store.state())?,
                state: Box::new(store.state().clone()),
            };
            self.cmd_tx
                .send(command)
                .map_err(|_| SyncError::NotRunning)?;
        }
        Ok(result)
    }
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("game_id", &self.game_id)
            .field("running", &self.is_running())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        // No executor context to drive a graceful close here; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Sync loop ───────────────────────────────────────────────────────

/// Background loop multiplexing outbound snapshots, the republication tick,
/// inbound snapshots and shutdown via `tokio::select!`.
///
/// Exits when:
/// - The shutdown signal fires or the client handle is dropped
/// - The transport fails to subscribe, returns an error, or closes
async fn sync_loop(
    mut transport: impl Transport,
    game_id: GameId,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<SyncEvent>,
    shared: Arc<Shared>,
    mut shutdown_rx: tokio::sync::oneshot::Receiver<()>,
    publish_interval: Duration,
) {
    debug!(game_id = %game_id, "sync loop started");

    if let Err(e) = transport.subscribe(&game_id).await {
        error!("transport subscribe error: {e}");
        emit_stopped(&event_tx, &shared, Some(format!("transport subscribe error: {e}"))).await;
        return;
    }
    emit_event(&event_tx, SyncEvent::Started);

    let announcement = {
        let mut store = shared.store.lock().await;
        store.announcement()
    };
    if let Some(patch) = announcement {
        match protocol::encode_patch(&patch) {
            Ok(payload) => publish(&mut transport, &game_id, payload).await,
            Err(e) => error!("failed to encode announcement: {e}"),
        }
        // Peers that took the partial snapshot still need the rest of ours.
        publish_state(&mut transport, &game_id, &shared).await;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + publish_interval, publish_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Queued mutations are flushed before a shutdown is honored.
            biased;

            // Branch 1: snapshot queued by a local mutation
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Publish { payload, state }) => {
                        emit_event(&event_tx, SyncEvent::StateChanged { state, remote: false });
                        publish(&mut transport, &game_id, payload).await;
                    }
                    // Client handle dropped.
                    None => {
                        debug!("command channel closed, shutting down sync loop");
                        let _ = transport.close().await;
                        emit_stopped(&event_tx, &shared, Some("client dropped".into())).await;
                        break;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let _ = transport.close().await;
                emit_stopped(&event_tx, &shared, None).await;
                break;
            }

            // Branch 3: snapshot from a peer
            inbound = transport.recv() => {
                match inbound {
                    Some(Ok(payload)) => receive(&payload, &event_tx, &shared).await,
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        let _ = transport.close().await;
                        emit_stopped(
                            &event_tx,
                            &shared,
                            Some(format!("transport receive error: {e}")),
                        ).await;
                        break;
                    }
                    None => {
                        debug!("transport closed");
                        emit_stopped(&event_tx, &shared, Some("transport closed".into())).await;
                        break;
                    }
                }
            }

            // Branch 4: periodic republication
            _ = ticker.tick() => {
                publish_state(&mut transport, &game_id, &shared).await;
            }
        }
    }

    debug!("sync loop exited");
}

/// Publish best effort: failures are logged and otherwise ignored.
async fn publish(transport: &mut impl Transport, game_id: &GameId, payload: String) {
    if let Err(e) = transport.publish(game_id, payload).await {
        warn!(game_id = %game_id, "failed to publish snapshot: {e}");
    }
}

/// Publish the full local state, unless nothing has happened yet.
async fn publish_state(transport: &mut impl Transport, game_id: &GameId, shared: &Shared) {
    let payload = {
        let store = shared.store.lock().await;
        (store.revision() > 0).then(|| protocol::encode_snapshot(store.state()))
    };
    match payload {
        Some(Ok(payload)) => publish(transport, game_id, payload).await,
        Some(Err(e)) => error!("failed to encode snapshot: {e}"),
        None => {}
    }
}

/// Decode and merge one inbound payload.
async fn receive(payload: &str, event_tx: &mpsc::Sender<SyncEvent>, shared: &Shared) {
    let patch = match protocol::decode_snapshot(payload) {
        Ok(patch) => patch,
        Err(e) => {
            warn!("dropping malformed snapshot: {e}");
            emit_event(
                event_tx,
                SyncEvent::SnapshotDropped {
                    reason: e.to_string(),
                },
            );
            return;
        }
    };

    let mut store = shared.store.lock().await;
    match store.merge_remote(&patch) {
        MergeOutcome::Applied(state) => {
            emit_event(event_tx, SyncEvent::changed(&state, true));
        }
        MergeOutcome::Stale { remote, local } => {
            debug!(?remote, local, "ignoring stale snapshot");
            emit_event(event_tx, SyncEvent::SnapshotRejected { remote, local });
        }
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking.
fn emit_event(event_tx: &mpsc::Sender<SyncEvent>, event: SyncEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Stopped`](SyncEvent::Stopped) event and mark the client stopped.
///
/// Uses `send().await` because `Stopped` is always the last event on the
/// channel and must never be dropped.
async fn emit_stopped(event_tx: &mpsc::Sender<SyncEvent>, shared: &Shared, reason: Option<String>) {
    shared.running.store(false, Ordering::Release);
    if event_tx.send(SyncEvent::Stopped { reason }).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::identity::LocalIdentity;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    /// A mock transport that records published payloads and replays
    /// scripted inbound ones.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, SyncError>>>,
        published: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
        fail_subscribe: bool,
    }

    impl MockTransport {
        fn new(
            incoming: Vec<Option<std::result::Result<String, SyncError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let published = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let transport = Self {
                incoming: VecDeque::from(incoming),
                published: Arc::clone(&published),
                closed: Arc::clone(&closed),
                fail_subscribe: false,
            };
            (transport, published, closed)
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn subscribe(&mut self, _game_id: &GameId) -> std::result::Result<(), SyncError> {
            if self.fail_subscribe {
                return Err(SyncError::TransportUnavailable("mock".into()));
            }
            Ok(())
        }

        async fn publish(
            &mut self,
            _game_id: &GameId,
            payload: String,
        ) -> std::result::Result<(), SyncError> {
            self.published.lock().unwrap().push(payload);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, SyncError>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Hang so the loop stays alive until shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), SyncError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    fn store() -> StateStore {
        StateStore::new(LocalIdentity::new(GameId::parse("client1").unwrap())).with_seed(3)
    }

    fn remote_json(revision: u64) -> String {
        let mut state = GameState {
            stage: Stage::Lobby,
            revision,
            ..Default::default()
        };
        state
            .players
            .insert("peer".into(), Player::new("peer", "Peer"));
        protocol::encode_snapshot(&state).unwrap()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn started_is_first_event() {
        let (transport, _published, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        assert_eq!(events.recv().await.unwrap(), SyncEvent::Started);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn local_mutation_is_published_and_reported() {
        let (transport, published, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());
        let _ = events.recv().await; // Started

        let id = client.add_player("Alice").await.unwrap().unwrap();
        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::StateChanged { remote: false, .. }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let payloads = published.lock().unwrap();
            let last: GameState = serde_json::from_str(payloads.last().unwrap()).unwrap();
            assert!(last.players.contains_key(&id));
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn noop_mutation_is_not_published() {
        let (transport, published, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());
        let _ = events.recv().await; // Started

        assert!(!client.start_game().await.unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(published.lock().unwrap().is_empty());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn inbound_snapshot_is_merged() {
        let (transport, _published, _closed) =
            MockTransport::new(vec![Some(Ok(remote_json(10)))]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        let _ = events.recv().await; // Started
        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::StateChanged { remote: true, .. }));
        assert_eq!(client.state().await.revision, 10);
        assert_eq!(client.players().await.len(), 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_snapshot_is_rejected() {
        let (transport, _published, _closed) = MockTransport::new(vec![
            Some(Ok(remote_json(10))),
            Some(Ok(remote_json(10))),
        ]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        let _ = events.recv().await; // Started
        let _ = events.recv().await; // StateChanged
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SyncEvent::SnapshotRejected {
                remote: Some(10),
                local: 10
            }
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn malformed_snapshot_is_dropped() {
        let (transport, _published, _closed) = MockTransport::new(vec![
            Some(Ok("{ not json".into())),
            Some(Ok(remote_json(4))),
        ]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        let _ = events.recv().await; // Started
        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::SnapshotDropped { .. }));
        // The loop survives and keeps merging.
        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::StateChanged { .. }));
        assert!(client.is_running());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn announcement_is_published_for_existing_local_player() {
        let mut seeded = store();
        seeded.add_player("Alice", Some("me".into()));
        let (transport, published, _closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = SyncClient::start(transport, seeded, SyncConfig::new());
        let _ = events.recv().await; // Started

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let payloads = published.lock().unwrap();
            let first = protocol::decode_snapshot(&payloads[0]).unwrap();
            assert!(first.stage.is_none());
            assert_eq!(first.players.unwrap().len(), 1);
            let second = protocol::decode_snapshot(&payloads[1]).unwrap();
            assert!(second.stage.is_some());
            assert!(second.revision.unwrap() > first.revision.unwrap());
        }

        client.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn state_is_republished_on_interval() {
        let mut seeded = store();
        seeded.add_player("Alice", Some("me".into()));
        let (transport, published, _closed) = MockTransport::new(vec![]);
        let config = SyncConfig::new().with_publish_interval(Duration::from_secs(2));
        let (mut client, mut events) = SyncClient::start(transport, seeded, config);
        let _ = events.recv().await; // Started

        tokio::time::sleep(Duration::from_millis(4_500)).await;
        // Announcement, the full state behind it, and two ticks.
        assert_eq!(published.lock().unwrap().len(), 4);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn subscribe_failure_stops_client() {
        let (mut transport, _published, _closed) = MockTransport::new(vec![]);
        transport.fail_subscribe = true;
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::Stopped { reason: Some(_) }));
        assert!(!client.is_running());
        assert!(matches!(
            client.add_player("Alice").await,
            Err(SyncError::NotRunning)
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn transport_close_stops_loop() {
        let (transport, _published, _closed) = MockTransport::new(vec![None]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());

        let _ = events.recv().await; // Started
        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            SyncEvent::Stopped {
                reason: Some("transport closed".into())
            }
        );
        assert!(!client.is_running());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_emits_stopped_and_closes_transport() {
        let (transport, _published, closed) = MockTransport::new(vec![]);
        let (mut client, mut events) = SyncClient::start(transport, store(), SyncConfig::new());
        let _ = events.recv().await; // Started

        client.shutdown().await;

        assert_eq!(
            events.recv().await.unwrap(),
            SyncEvent::Stopped { reason: None }
        );
        assert!(closed.load(Ordering::Relaxed));
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (transport, _published, _closed) = MockTransport::new(vec![]);
        let (mut client, _events) = SyncClient::start(transport, store(), SyncConfig::new());
        client.shutdown().await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn identity_is_persisted_on_join() {
        let dir = tempfile::tempdir().unwrap();
        let file = IdentityFile::new(dir.path().join("identity.json"));
        let (transport, _published, _closed) = MockTransport::new(vec![]);
        let config = SyncConfig::new().with_identity_file(file.clone());
        let (mut client, _events) = SyncClient::start(transport, store(), config);

        let id = client.add_player("Alice").await.unwrap().unwrap();
        let saved = file.load().unwrap().unwrap();
        assert_eq!(saved.local_player_id, Some(id));
        assert_eq!(saved.game_id.as_str(), "client1");

        client.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_join_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let file = IdentityFile::new(dir.path().join("identity.json"));
        let (transport, published, _closed) = MockTransport::new(vec![]);
        let config = SyncConfig::new().with_identity_file(file.clone());
        let (mut client, _events) = SyncClient::start(transport, store(), config);

        let added = client.add_player_with_id("Bob", String::new()).await.unwrap();
        assert_eq!(added, None);
        assert!(client.local_player().await.is_none());
        assert!(file.load().unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(published.lock().unwrap().is_empty());

        client.shutdown().await;
    }

    #[test]
    fn config_defaults_and_clamping() {
        let config = SyncConfig::new();
        assert_eq!(config.publish_interval, Duration::from_secs(2));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert!(config.identity_file.is_none());

        let config = SyncConfig::new()
            .with_event_channel_capacity(0)
            .with_publish_interval(Duration::ZERO);
        assert_eq!(config.event_channel_capacity, 1);
        assert_eq!(config.publish_interval, Duration::from_millis(1));
    }

    #[tokio::test]
    async fn debug_impl_for_client() {
        let (transport, _published, _closed) = MockTransport::new(vec![]);
        let (mut client, _events) = SyncClient::start(transport, store(), SyncConfig::new());
        let debug_str = format!("{client:?}");
        assert!(debug_str.contains("SyncClient"));
        assert!(debug_str.contains("client1"));
        client.shutdown().await;
    }
}
