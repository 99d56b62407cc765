//! Wire-compatible snapshot types exchanged between peers.
//!
//! Snapshots are JSON objects with camelCase keys:
//!
//! ```json
//! {
//!   "players": { "k3j9x0a": { "id": "k3j9x0a", "name": "Alice", "isReady": true, "isConnected": true } },
//!   "gameStage": "lobby",
//!   "currentWord": null,
//!   "currentVotes": {},
//!   "spyPlayerId": null,
//!   "revision": 1760000000000
//! }
//! ```
//!
//! Every field of an inbound snapshot is optional. A missing key means the
//! sender has no opinion about that field; an explicit `null` on a nullable
//! field means the sender holds no value for it (e.g. after a reset).
//! `lastUpdated` is accepted as an alias for `revision`.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::state::GameState;

// ── Type aliases ────────────────────────────────────────────────────

/// Opaque identifier for players, unique per join.
pub type PlayerId = String;

/// Logical timestamp used to order snapshots (milliseconds since the epoch,
/// bumped to stay strictly increasing per client).
pub type Revision = u64;

// ── Enums ───────────────────────────────────────────────────────────

/// Stage of a round. Each stage maps to one screen of the UI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Nobody has joined locally yet.
    #[default]
    Join,
    /// Waiting for players; the game can start with two or more.
    Lobby,
    /// Roles and the secret word are being shown.
    Reveal,
    /// Players describe the word without saying it.
    Gameplay,
    /// Everyone votes for who they think the spy is.
    Voting,
    /// Votes are in; the spy is revealed.
    Results,
}

impl Stage {
    /// Returns `true` while a round is in progress (word and spy assigned).
    pub fn in_round(self) -> bool {
        matches!(
            self,
            Stage::Reveal | Stage::Gameplay | Stage::Voting | Stage::Results
        )
    }
}

// ── Structs ─────────────────────────────────────────────────────────

/// A participant in the game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    /// Filled from the map key when a peer omits it.
    #[serde(default)]
    pub id: PlayerId,
    pub name: String,
    #[serde(default = "default_true")]
    pub is_ready: bool,
    #[serde(default = "default_true")]
    pub is_connected: bool,
    /// Set only while a round is active.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_spy: Option<bool>,
    /// Set only during voting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_voted: Option<bool>,
}

impl Player {
    /// Create a freshly joined player.
    pub fn new(id: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_ready: true,
            is_connected: true,
            is_spy: None,
            has_voted: None,
        }
    }

    /// Returns `true` if this player is flagged as the spy.
    ///
    /// Not authoritative: merges never touch a client's own entry, so the
    /// flag can outlive the round that set it. Read the role from
    /// [`GameState::spy_player_id`](crate::state::GameState::spy_player_id)
    /// (or [`StateStore::local_role`](crate::store::StateStore::local_role)).
    pub fn is_spy(&self) -> bool {
        self.is_spy.unwrap_or(false)
    }

    /// Returns `true` if this player is flagged as having voted.
    ///
    /// Not authoritative, for the same reason as [`Player::is_spy`]. Votes are
    /// counted from
    /// [`GameState::current_votes`](crate::state::GameState::current_votes).
    pub fn has_voted(&self) -> bool {
        self.has_voted.unwrap_or(false)
    }
}

fn default_true() -> bool {
    true
}

/// An inbound (or partial outbound) snapshot where every field is optional.
///
/// Nullable fields use a double `Option`: `None` means the key was absent,
/// `Some(None)` means the key was present and `null`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub players: Option<BTreeMap<PlayerId, Player>>,
    #[serde(
        default,
        rename = "gameStage",
        alias = "stage",
        skip_serializing_if = "Option::is_none"
    )]
    pub stage: Option<Stage>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_word: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_votes: Option<BTreeMap<PlayerId, PlayerId>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub spy_player_id: Option<Option<PlayerId>>,
    #[serde(
        default,
        alias = "lastUpdated",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision: Option<Revision>,
}

impl SnapshotPatch {
    /// A partial snapshot carrying only one player, used to announce the
    /// local player to peers when synchronization starts.
    pub fn announcement(player: Player, revision: Revision) -> Self {
        let mut players = BTreeMap::new();
        players.insert(player.id.clone(), player);
        Self {
            players: Some(players),
            revision: Some(revision),
            ..Default::default()
        }
    }
}

impl From<&GameState> for SnapshotPatch {
    fn from(state: &GameState) -> Self {
        Self {
            players: Some(state.players.clone()),
            stage: Some(state.stage),
            current_word: Some(state.current_word.clone()),
            current_votes: Some(state.current_votes.clone()),
            spy_player_id: Some(state.spy_player_id.clone()),
            revision: Some(state.revision),
        }
    }
}

/// Marks a key as present, so that `null` decodes to `Some(None)` instead of
/// collapsing into "absent".
fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

// ── Codec ───────────────────────────────────────────────────────────

/// Serialize the full state as a snapshot payload.
///
/// # Errors
///
/// Returns [`SyncError::Serialization`](crate::SyncError::Serialization) if
/// encoding fails.
pub fn encode_snapshot(state: &GameState) -> Result<String> {
    Ok(serde_json::to_string(state)?)
}

/// Serialize a partial snapshot payload.
///
/// # Errors
///
/// Returns [`SyncError::Serialization`](crate::SyncError::Serialization) if
/// encoding fails.
pub fn encode_patch(patch: &SnapshotPatch) -> Result<String> {
    Ok(serde_json::to_string(patch)?)
}

/// Decode a payload received from a peer.
///
/// # Errors
///
/// Returns [`SyncError::Serialization`](crate::SyncError::Serialization) if
/// the payload is not a JSON object or a present field has the wrong shape.
pub fn decode_snapshot(payload: &str) -> Result<SnapshotPatch> {
    Ok(serde_json::from_str(payload)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_null_are_distinguished() {
        let absent = decode_snapshot(r#"{"revision": 3}"#).unwrap();
        assert_eq!(absent.current_word, None);
        assert_eq!(absent.spy_player_id, None);

        let null = decode_snapshot(r#"{"revision": 3, "currentWord": null, "spyPlayerId": null}"#)
            .unwrap();
        assert_eq!(null.current_word, Some(None));
        assert_eq!(null.spy_player_id, Some(None));
    }

    #[test]
    fn last_updated_is_accepted_as_revision() {
        let patch = decode_snapshot(r#"{"players": {}, "lastUpdated": 1700000000000}"#).unwrap();
        assert_eq!(patch.revision, Some(1_700_000_000_000));
    }

    #[test]
    fn player_defaults_reserved_flags_to_true() {
        let patch =
            decode_snapshot(r#"{"players": {"p1": {"id": "p1", "name": "Alice"}}}"#).unwrap();
        let player = &patch.players.unwrap()["p1"];
        assert!(player.is_ready);
        assert!(player.is_connected);
        assert!(!player.is_spy());
        assert!(!player.has_voted());
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(decode_snapshot(r#"{"gameStage": "intermission", "revision": 1}"#).is_err());
    }

    #[test]
    fn non_object_payload_is_rejected() {
        assert!(decode_snapshot("[1, 2, 3]").is_err());
        assert!(decode_snapshot("not json").is_err());
    }

    #[test]
    fn announcement_only_carries_players_and_revision() {
        let json = encode_patch(&SnapshotPatch::announcement(Player::new("p1", "Alice"), 7))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(value["revision"], 7);
        assert_eq!(value["players"]["p1"]["name"], "Alice");
    }

    #[test]
    fn full_state_patch_encodes_cleared_fields_as_null() {
        let state = GameState::default();
        let json = encode_patch(&SnapshotPatch::from(&state)).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["currentWord"].is_null());
        assert!(value.as_object().unwrap().contains_key("spyPlayerId"));
    }
}
