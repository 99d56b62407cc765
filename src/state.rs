//! The synchronized game aggregate and its pure transitions.
//!
//! [`GameState::apply`] never mutates in place: it returns the next state
//! stamped with the given revision, or `None` when the action's precondition
//! does not hold. A `None` is a silent no-op for callers, never an error.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::protocol::{Player, PlayerId, Revision, Stage};

/// Secret words a round picks from when no custom vocabulary is configured.
pub const DEFAULT_WORDS: &[&str] = &["S3", "Shayka", "Kaldırım"];

/// Minimum number of players required to start a round.
pub const MIN_PLAYERS: usize = 2;

/// Shared game data, identical in shape on every peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub players: BTreeMap<PlayerId, Player>,
    #[serde(default, rename = "gameStage")]
    pub stage: Stage,
    #[serde(default)]
    pub current_word: Option<String>,
    /// Voter id to target id.
    #[serde(default)]
    pub current_votes: BTreeMap<PlayerId, PlayerId>,
    #[serde(default)]
    pub spy_player_id: Option<PlayerId>,
    #[serde(default)]
    pub revision: Revision,
}

/// A local mutation of [`GameState`].
///
/// Random choices are made before an action is built, so applying an action
/// is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Insert or overwrite a player.
    AddPlayer(Player),
    /// Remove a player (explicit leave).
    RemovePlayer(PlayerId),
    /// Begin a round with the given spy and secret word.
    StartGame { spy: PlayerId, word: String },
    /// Leave the reveal screen.
    StartGameplay,
    /// Open voting, discarding earlier votes.
    StartVoting,
    /// Record `voter`'s vote against `target`.
    SubmitVote { voter: PlayerId, target: PlayerId },
    /// Return to the lobby, keeping the roster.
    Reset,
}

impl GameState {
    /// Apply `action`, returning the next state stamped with `revision`.
    ///
    /// Returns `None` when the precondition does not hold or the action
    /// would not change anything.
    pub fn apply(&self, action: &Action, revision: Revision) -> Option<GameState> {
        let mut next = self.clone();
        match action {
            Action::AddPlayer(player) => {
                if player.name.trim().is_empty() || player.id.is_empty() {
                    return None;
                }
                if self.players.get(&player.id) == Some(player) {
                    return None;
                }
                next.players.insert(player.id.clone(), player.clone());
            }
            Action::RemovePlayer(id) => {
                next.players.remove(id)?;
            }
            Action::StartGame { spy, word } => {
                if !matches!(self.stage, Stage::Join | Stage::Lobby)
                    || !self.is_game_ready()
                    || !self.players.contains_key(spy)
                {
                    return None;
                }
                next.stage = Stage::Reveal;
                next.current_word = Some(word.clone());
                next.spy_player_id = Some(spy.clone());
                next.current_votes.clear();
                for (id, player) in next.players.iter_mut() {
                    player.is_spy = Some(id == spy);
                    player.has_voted = None;
                }
            }
            Action::StartGameplay => {
                if self.stage != Stage::Reveal {
                    return None;
                }
                next.stage = Stage::Gameplay;
            }
            Action::StartVoting => {
                if self.stage != Stage::Gameplay {
                    return None;
                }
                next.stage = Stage::Voting;
                next.current_votes.clear();
                for player in next.players.values_mut() {
                    player.has_voted = None;
                }
            }
            Action::SubmitVote { voter, target } => {
                if self.stage != Stage::Voting || !self.players.contains_key(target) {
                    return None;
                }
                let player = next.players.get_mut(voter)?;
                if self.current_votes.get(voter) == Some(target) && player.has_voted() {
                    return None;
                }
                player.has_voted = Some(true);
                next.current_votes.insert(voter.clone(), target.clone());
                if next.is_voting_complete() {
                    next.stage = Stage::Results;
                }
            }
            Action::Reset => {
                next.stage = Stage::Lobby;
                next.current_word = None;
                next.spy_player_id = None;
                next.current_votes.clear();
                for player in next.players.values_mut() {
                    player.is_spy = None;
                    player.has_voted = None;
                }
                if next == *self {
                    return None;
                }
            }
        }
        next.revision = revision;
        Some(next)
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Look up a player by id.
    pub fn player(&self, id: &str) -> Option<&Player> {
        self.players.get(id)
    }

    /// All players, ordered by id. The order carries no game meaning.
    pub fn players_vec(&self) -> Vec<&Player> {
        self.players.values().collect()
    }

    /// Returns `true` once enough players have joined to start a round.
    pub fn is_game_ready(&self) -> bool {
        self.players.len() >= MIN_PLAYERS
    }

    /// Returns `true` when every known player has a recorded vote.
    pub fn is_voting_complete(&self) -> bool {
        !self.players.is_empty()
            && self
                .players
                .keys()
                .all(|id| self.current_votes.contains_key(id))
    }

    /// Votes received per target. Votes cast by or against players that are
    /// no longer in the roster are ignored.
    pub fn vote_counts(&self) -> BTreeMap<&PlayerId, usize> {
        let mut counts = BTreeMap::new();
        for (voter, target) in &self.current_votes {
            if self.players.contains_key(voter) && self.players.contains_key(target) {
                *counts.entry(target).or_insert(0) += 1;
            }
        }
        counts
    }

    /// The player with strictly the most votes.
    ///
    /// Ties go to the first target in id order; this tie-break is arbitrary.
    pub fn most_voted_player(&self) -> Option<&Player> {
        let mut best: Option<(&PlayerId, usize)> = None;
        for (target, count) in self.vote_counts() {
            if best.is_none_or(|(_, max)| count > max) {
                best = Some((target, count));
            }
        }
        best.and_then(|(id, _)| self.players.get(id))
    }

    /// The player assigned the spy role this round.
    pub fn spy_player(&self) -> Option<&Player> {
        self.spy_player_id
            .as_deref()
            .and_then(|id| self.players.get(id))
    }

    /// Returns `true` if the most voted player is the spy.
    pub fn is_spy_caught(&self) -> bool {
        match (self.most_voted_player(), self.spy_player_id.as_deref()) {
            (Some(player), Some(spy)) => player.id == spy,
            _ => false,
        }
    }
}
