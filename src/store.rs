//! The per-client authority over local game state.
//!
//! [`StateStore`] is the only thing that mutates a client's [`GameState`].
//! Every mutation goes through [`GameState::apply`] with a freshly bumped
//! revision; merges of remote snapshots go through [`reconcile::merge`].
//!
//! Operations whose preconditions do not hold are silent no-ops and report
//! `false` (or `None`). Callers are expected to gate the UI instead.

use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::identity::LocalIdentity;
use crate::protocol::{Player, PlayerId, Revision, SnapshotPatch, Stage};
use crate::reconcile::{self, MergeOutcome};
use crate::state::{Action, GameState, DEFAULT_WORDS};

// ── Clock ───────────────────────────────────────────────────────────

/// Source of wall-clock time for revisions.
pub trait Clock: Send + Sync + 'static {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> Revision;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> Revision {
        u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

/// Revision for the next local mutation: the current time, or one past the
/// current revision when the clock is coarse, behind, or was overtaken by a
/// merged peer revision.
pub fn next_revision(current: Revision, now: Revision) -> Revision {
    now.max(current.saturating_add(1))
}

// ── Role ────────────────────────────────────────────────────────────

/// What the local player sees on the reveal screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The local player is the spy and does not know the word.
    Spy,
    /// The local player knows the secret word.
    Citizen { word: String },
}

// ── StateStore ──────────────────────────────────────────────────────

/// Holds one client's [`GameState`] and [`LocalIdentity`].
pub struct StateStore {
    state: GameState,
    identity: LocalIdentity,
    words: Vec<String>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
}

impl StateStore {
    /// Create an empty store for `identity` using the system clock, OS
    /// randomness and [`DEFAULT_WORDS`].
    pub fn new(identity: LocalIdentity) -> Self {
        Self {
            state: GameState::default(),
            identity,
            words: DEFAULT_WORDS.iter().map(|w| (*w).to_string()).collect(),
            clock: Arc::new(SystemClock),
            rng: StdRng::from_os_rng(),
        }
    }

    /// Replace the secret-word vocabulary. An empty list keeps the current one.
    #[must_use]
    pub fn with_vocabulary<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words
            .into_iter()
            .map(Into::into)
            .filter(|w| !w.trim().is_empty())
            .collect();
        if !words.is_empty() {
            self.words = words;
        }
        self
    }

    /// Use a custom clock for revisions.
    #[must_use]
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Seed the random source used for spy and word selection.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Start from an existing state, e.g. one restored from a persisted slot.
    #[must_use]
    pub fn with_state(mut self, state: GameState) -> Self {
        self.state = state;
        self
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The current game state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// This client's identity.
    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    /// The current revision.
    pub fn revision(&self) -> Revision {
        self.state.revision
    }

    /// The configured secret-word vocabulary.
    pub fn vocabulary(&self) -> &[String] {
        &self.words
    }

    /// The full state as an outbound snapshot.
    pub fn snapshot(&self) -> SnapshotPatch {
        SnapshotPatch::from(&self.state)
    }

    /// A partial snapshot announcing the local player to peers, stamped with
    /// a new revision. `None` until the client has joined.
    ///
    /// The local state is bumped once more past the announcement, so the
    /// next full snapshot always outranks it at every peer.
    pub fn announcement(&mut self) -> Option<SnapshotPatch> {
        let player = self.local_player()?.clone();
        let revision = self.bump();
        self.bump();
        Some(SnapshotPatch::announcement(player, revision))
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Add a player named `name` (trimmed), generating an id unless one is
    /// given. The first player added on a client without a local player
    /// becomes the local player.
    ///
    /// Returns the player's id, or `None` if the name is blank or the player
    /// could not be added.
    pub fn add_player(&mut self, name: &str, id: Option<PlayerId>) -> Option<PlayerId> {
        let name = name.trim();
        if name.is_empty() {
            debug!("add_player ignored: blank name");
            return None;
        }
        let id = id.unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        // An identical re-insert is a no-op but still names a roster entry.
        if !self.dispatch(Action::AddPlayer(Player::new(id.clone(), name)))
            && !self.state.players.contains_key(&id)
        {
            debug!(player_id = %id, "add_player ignored: rejected player");
            return None;
        }
        if self.identity.local_player_id.is_none() {
            debug!(player_id = %id, "adopted local player");
            self.identity.local_player_id = Some(id.clone());
        }
        Some(id)
    }

    /// Remove a player. Removing the local player clears the local identity.
    pub fn remove_player(&mut self, id: &str) -> bool {
        let applied = self.dispatch(Action::RemovePlayer(id.to_string()));
        if applied && self.identity.local_player_id.as_deref() == Some(id) {
            debug!(player_id = %id, "local player left");
            self.identity.local_player_id = None;
        }
        applied
    }

    /// Start a round: pick a random spy and a random word, move to reveal.
    ///
    /// No-op unless at least two players are present and no round is running.
    pub fn start_game(&mut self) -> bool {
        let ids: Vec<PlayerId> = self.state.players.keys().cloned().collect();
        if !self.state.is_game_ready() || self.words.is_empty() {
            debug!(players = ids.len(), "start_game ignored: not enough players");
            return false;
        }
        let spy = ids.get(self.rng.random_range(0..ids.len())).cloned();
        let word = self
            .words
            .get(self.rng.random_range(0..self.words.len()))
            .cloned();
        match (spy, word) {
            (Some(spy), Some(word)) => self.dispatch(Action::StartGame { spy, word }),
            _ => false,
        }
    }

    /// Move from reveal to gameplay.
    pub fn start_gameplay(&mut self) -> bool {
        self.dispatch(Action::StartGameplay)
    }

    /// Move from gameplay to voting, clearing earlier votes.
    pub fn start_voting(&mut self) -> bool {
        self.dispatch(Action::StartVoting)
    }

    /// Cast the local player's vote. Moves to results once everyone voted.
    pub fn submit_vote(&mut self, target: &str) -> bool {
        let Some(voter) = self.identity.local_player_id.clone() else {
            debug!("submit_vote ignored: no local player");
            return false;
        };
        self.dispatch(Action::SubmitVote {
            voter,
            target: target.to_string(),
        })
    }

    /// Return to the lobby, keeping every player.
    pub fn reset_game(&mut self) -> bool {
        self.dispatch(Action::Reset)
    }

    /// Fold a remote snapshot into local state.
    pub fn merge_remote(&mut self, patch: &SnapshotPatch) -> MergeOutcome {
        let outcome = reconcile::merge(
            &self.state,
            self.identity.local_player_id.as_deref(),
            patch,
        );
        if let MergeOutcome::Applied(merged) = &outcome {
            debug!(
                from = self.state.revision,
                to = merged.revision,
                stage = ?merged.stage,
                "merged remote snapshot"
            );
            self.state = merged.clone();
        }
        outcome
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// The local player, if this client has joined and is in the roster.
    pub fn local_player(&self) -> Option<&Player> {
        self.identity
            .local_player_id
            .as_deref()
            .and_then(|id| self.state.player(id))
    }

    /// All players. The order carries no game meaning.
    pub fn players(&self) -> Vec<&Player> {
        self.state.players_vec()
    }

    /// The player with strictly the most votes.
    pub fn most_voted_player(&self) -> Option<&Player> {
        self.state.most_voted_player()
    }

    /// Returns `true` once enough players have joined to start.
    pub fn is_game_ready(&self) -> bool {
        self.state.is_game_ready()
    }

    /// Returns `true` when every player has a recorded vote.
    pub fn is_voting_complete(&self) -> bool {
        self.state.is_voting_complete()
    }

    /// Returns `true` if the most voted player is the spy.
    pub fn is_spy_caught(&self) -> bool {
        self.state.is_spy_caught()
    }

    /// The screen the UI should show: the join screen until a local player
    /// exists, then the current stage (with `join` shown as the lobby).
    pub fn screen(&self) -> Stage {
        match (self.local_player(), self.state.stage) {
            (None, _) => Stage::Join,
            (Some(_), Stage::Join) => Stage::Lobby,
            (Some(_), stage) => stage,
        }
    }

    /// The local player's role in the running round.
    ///
    /// Derived from the round's spy id rather than the player's own flags,
    /// which peers never overwrite.
    pub fn local_role(&self) -> Option<Role> {
        let local = self.local_player()?;
        if !self.state.stage.in_round() {
            return None;
        }
        let spy = self.state.spy_player_id.as_deref()?;
        if spy == local.id {
            Some(Role::Spy)
        } else {
            self.state
                .current_word
                .clone()
                .map(|word| Role::Citizen { word })
        }
    }

    // ── Internal helpers ────────────────────────────────────────────

    fn bump(&mut self) -> Revision {
        let revision = next_revision(self.state.revision, self.clock.now_millis());
        self.state.revision = revision;
        revision
    }

    fn dispatch(&mut self, action: Action) -> bool {
        let revision = next_revision(self.state.revision, self.clock.now_millis());
        match self.state.apply(&action, revision) {
            Some(next) => {
                debug!(?action, revision, stage = ?next.stage, "applied local action");
                self.state = next;
                true
            }
            None => {
                trace!(?action, stage = ?self.state.stage, "action not applicable");
                false
            }
        }
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("identity", &self.identity)
            .field("stage", &self.state.stage)
            .field("players", &self.state.players.len())
            .field("revision", &self.state.revision)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::identity::GameId;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Clock frozen at a fixed instant.
    struct FixedClock(AtomicU64);

    impl Clock for FixedClock {
        fn now_millis(&self) -> Revision {
            self.0.load(Ordering::Relaxed)
        }
    }

    fn store() -> StateStore {
        StateStore::new(LocalIdentity::new(GameId::parse("test123").unwrap()))
            .with_clock(FixedClock(AtomicU64::new(1_000)))
            .with_seed(7)
    }

    #[test]
    fn next_revision_is_strictly_increasing() {
        assert_eq!(next_revision(5, 100), 100);
        assert_eq!(next_revision(100, 100), 101);
        assert_eq!(next_revision(200, 100), 201);
    }

    #[test]
    fn frozen_clock_still_bumps_revision() {
        let mut store = store();
        store.add_player("Alice", None).unwrap();
        let first = store.revision();
        store.add_player("Bob", None).unwrap();
        assert!(store.revision() > first);
    }

    #[test]
    fn first_added_player_becomes_local() {
        let mut store = store();
        let alice = store.add_player("  Alice ", None).unwrap();
        store.add_player("Bob", Some("bob".into())).unwrap();
        assert_eq!(store.identity().local_player_id.as_deref(), Some(alice.as_str()));
        assert_eq!(store.local_player().unwrap().name, "Alice");
    }

    #[test]
    fn blank_name_is_ignored() {
        let mut store = store();
        assert!(store.add_player("   ", None).is_none());
        assert!(store.identity().local_player_id.is_none());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn noop_does_not_bump_revision() {
        let mut store = store();
        store.add_player("Alice", Some("p1".into()));
        let revision = store.revision();
        assert!(!store.start_game());
        store.add_player("Alice", Some("p1".into()));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn removing_local_player_clears_identity() {
        let mut store = store();
        let id = store.add_player("Alice", None).unwrap();
        assert!(store.remove_player(&id));
        assert!(store.identity().local_player_id.is_none());
        assert_eq!(store.screen(), Stage::Join);
    }

    #[test]
    fn screen_follows_local_player_and_stage() {
        let mut store = store();
        assert_eq!(store.screen(), Stage::Join);
        store.add_player("Alice", Some("p1".into()));
        assert_eq!(store.screen(), Stage::Lobby);
        store.add_player("Bob", Some("p2".into()));
        store.start_game();
        assert_eq!(store.screen(), Stage::Reveal);
    }

    #[test]
    fn local_role_matches_spy_assignment() {
        let mut store = store();
        store.add_player("Alice", Some("p1".into()));
        store.add_player("Bob", Some("p2".into()));
        assert!(store.local_role().is_none());
        assert!(store.start_game());

        let spy = store.state().spy_player_id.clone().unwrap();
        let role = store.local_role().unwrap();
        if spy == "p1" {
            assert_eq!(role, Role::Spy);
        } else {
            let word = store.state().current_word.clone().unwrap();
            assert_eq!(role, Role::Citizen { word });
        }
    }

    #[test]
    fn custom_vocabulary_is_used() {
        let mut store = store().with_vocabulary(["Lighthouse"]);
        store.add_player("Alice", Some("p1".into()));
        store.add_player("Bob", Some("p2".into()));
        assert!(store.start_game());
        assert_eq!(store.state().current_word.as_deref(), Some("Lighthouse"));
    }

    #[test]
    fn empty_vocabulary_keeps_default() {
        let store = store().with_vocabulary(Vec::<String>::new());
        assert_eq!(store.vocabulary().len(), DEFAULT_WORDS.len());
    }

    #[test]
    fn vote_without_local_player_is_ignored() {
        let mut store = store();
        assert!(!store.submit_vote("p1"));
    }

    #[test]
    fn empty_id_is_not_adopted() {
        let mut store = store();
        assert_eq!(store.add_player("Bob", Some(String::new())), None);
        assert!(store.identity().local_player_id.is_none());
        assert!(store.state().players.is_empty());
        assert_eq!(store.revision(), 0);
    }

    #[test]
    fn identical_readd_still_adopts_the_id() {
        let mut store = store().with_state(GameState {
            players: [("p1".to_string(), Player::new("p1", "Alice"))].into(),
            revision: 5,
            ..Default::default()
        });
        assert_eq!(store.add_player("Alice", Some("p1".into())), Some("p1".into()));
        assert_eq!(store.identity().local_player_id.as_deref(), Some("p1"));
        assert_eq!(store.revision(), 5);
    }

    #[test]
    fn announcement_carries_only_local_player() {
        let mut store = store();
        assert!(store.announcement().is_none());
        store.add_player("Alice", Some("p1".into()));
        store.add_player("Bob", Some("p2".into()));
        let before = store.revision();

        let patch = store.announcement().unwrap();
        let players = patch.players.unwrap();
        assert_eq!(players.len(), 1);
        assert!(players.contains_key("p1"));
        assert!(patch.revision.unwrap() > before);
        assert!(store.revision() > patch.revision.unwrap());
    }
}
