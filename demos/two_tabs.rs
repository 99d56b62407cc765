//! # Two Tabs Example
//!
//! Simulates two browser tabs playing one round of the spy game:
//!
//! 1. Resolve a game id (from `SPY_SYNC_LINK`, or generate one)
//! 2. Connect both tabs through a fan-in of broadcast and a persisted slot
//! 3. Join, start a round, describe, vote
//! 4. Print the result and shut down gracefully
//!
//! ## Running
//!
//! ```sh
//! cargo run --example two_tabs
//!
//! # Join an existing game and watch the sync traffic:
//! SPY_SYNC_LINK='https://play.example/#abc1234' RUST_LOG=debug cargo run --example two_tabs
//! ```

use std::time::Duration;

use spy_sync::identity::{GameId, LocalIdentity};
use spy_sync::state::GameState;
use spy_sync::store::Role;
use spy_sync::transports::{BroadcastHub, FanInTransport, MemorySlotStore, PollingTransport};
use spy_sync::{StateStore, SyncClient, SyncConfig, SyncEvent};
use tokio::sync::mpsc::Receiver;

/// How long to wait for a peer's change before giving up.
const PROPAGATION_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Initialize tracing. Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Game id ─────────────────────────────────────────────────────
    let link = std::env::var("SPY_SYNC_LINK").ok();
    let (identity, mode) = LocalIdentity::resolve(link.as_deref(), None)?;
    let game = identity.game_id.clone();
    tracing::info!(?mode, "share this link: {}", game.share_link("https://play.example/"));

    // ── Two tabs ────────────────────────────────────────────────────
    let hub = BroadcastHub::default();
    let slots = MemorySlotStore::new();
    let config = SyncConfig::new().with_publish_interval(Duration::from_millis(500));
    let (mut alice, mut alice_events) = open_tab(&hub, &slots, &game, config.clone());
    let (mut bob, mut bob_events) = open_tab(&hub, &slots, &game, config);

    // ── Lobby ───────────────────────────────────────────────────────
    let alice_id = alice.add_player("Alice").await?.unwrap_or_default();
    wait_for(&mut bob_events, |s| s.players.contains_key(&alice_id)).await?;
    bob.add_player("Bob").await?;
    wait_for(&mut alice_events, |s| s.players.len() == 2).await?;
    tracing::info!("lobby ready with {} players", alice.players().await.len());

    // ── Round ───────────────────────────────────────────────────────
    alice.start_game().await?;
    let round = wait_for(&mut bob_events, |s| s.stage.in_round()).await?;
    for (name, tab) in [("Alice", &alice), ("Bob", &bob)] {
        match tab.local_role().await {
            Some(Role::Spy) => tracing::info!("{name} is the spy"),
            Some(Role::Citizen { word }) => tracing::info!("{name} sees the word {word}"),
            None => tracing::warn!("{name} has no role"),
        }
    }

    bob.start_gameplay().await?;
    wait_for(&mut alice_events, |s| s.stage == spy_sync::Stage::Gameplay).await?;
    alice.start_voting().await?;
    wait_for(&mut bob_events, |s| s.stage == spy_sync::Stage::Voting).await?;

    // Both suspect whoever is not themselves, starting with Alice.
    let suspect = round
        .players
        .keys()
        .find(|id| **id != alice_id)
        .cloned()
        .unwrap_or_default();
    alice.submit_vote(&suspect).await?;
    wait_for(&mut bob_events, |s| !s.current_votes.is_empty()).await?;
    bob.submit_vote(&suspect).await?;
    wait_for(&mut alice_events, |s| s.stage == spy_sync::Stage::Results).await?;

    // ── Results ─────────────────────────────────────────────────────
    let voted = alice.most_voted_player().await.map(|p| p.name);
    let caught = alice.with_store(StateStore::is_spy_caught).await;
    tracing::info!(?voted, caught, "round over");

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

fn open_tab(
    hub: &BroadcastHub,
    slots: &MemorySlotStore,
    game: &GameId,
    config: SyncConfig,
) -> (SyncClient, Receiver<SyncEvent>) {
    let transport = FanInTransport::new(
        hub.transport(),
        PollingTransport::new(slots.clone()).with_poll_interval(Duration::from_millis(250)),
    );
    let store = StateStore::new(LocalIdentity::new(game.clone()));
    SyncClient::start(transport, store, config)
}

/// Consume events until one reports a state matching `pred`.
async fn wait_for(
    events: &mut Receiver<SyncEvent>,
    pred: impl Fn(&GameState) -> bool,
) -> Result<GameState, Box<dyn std::error::Error>> {
    let found = tokio::time::timeout(PROPAGATION_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            match event {
                SyncEvent::StateChanged { state, .. } if pred(&state) => return Some(*state),
                SyncEvent::Stopped { reason } => {
                    tracing::warn!(?reason, "tab stopped");
                    return None;
                }
                _ => {}
            }
        }
        None
    })
    .await?;
    found.ok_or_else(|| "tab stopped before the change arrived".into())
}
