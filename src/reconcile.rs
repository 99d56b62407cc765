//! Folding remote snapshots into local state.
//!
//! Peers are symmetric and there is no leader. Every snapshot carries a single
//! scalar revision and the whole snapshot is accepted only if that revision is
//! newer than the local one:
//!
//! 1. A snapshot whose revision is absent, equal to or older than the local
//!    revision is rejected and changes nothing. Duplicates and reordered
//!    deliveries are therefore harmless.
//! 2. An accepted snapshot is merged field by field. Players are unioned by
//!    id and the remote entry overwrites the local one, except for the merging
//!    client's own player, which a peer can never overwrite. `gameStage`,
//!    `currentWord`, `currentVotes` and `spyPlayerId` are replaced wholesale
//!    when present and kept when absent.
//! 3. The local revision adopts the remote revision.
//!
//! Two clients mutating different fields at the same instant lose one of the
//! updates: last writer wins at whole-field granularity. The same holds when
//! two clients start a round simultaneously; the round set up under the
//! higher revision survives and the other is discarded.

use crate::protocol::{Revision, SnapshotPatch};
use crate::state::GameState;

/// Result of merging one remote snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The snapshot was newer; this is the merged state.
    Applied(GameState),
    /// The snapshot was not newer than local state and was ignored.
    Stale {
        /// Revision carried by the snapshot, if any.
        remote: Option<Revision>,
        /// Local revision at the time of the merge.
        local: Revision,
    },
}

impl MergeOutcome {
    /// Returns `true` if the snapshot was accepted.
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied(_))
    }
}

/// Merge `remote` into `local` as seen by the client whose own player id is
/// `local_player`.
pub fn merge(
    local: &GameState,
    local_player: Option<&str>,
    remote: &SnapshotPatch,
) -> MergeOutcome {
    let revision = match remote.revision {
        Some(revision) if revision > local.revision => revision,
        remote_revision => {
            return MergeOutcome::Stale {
                remote: remote_revision,
                local: local.revision,
            };
        }
    };

    let mut merged = local.clone();

    if let Some(players) = &remote.players {
        for (id, player) in players {
            let own = local_player == Some(id.as_str());
            if own && merged.players.contains_key(id) {
                continue;
            }
            let mut player = player.clone();
            player.id.clone_from(id);
            merged.players.insert(id.clone(), player);
        }
    }
    if let Some(stage) = remote.stage {
        merged.stage = stage;
    }
    if let Some(word) = &remote.current_word {
        merged.current_word.clone_from(word);
    }
    if let Some(votes) = &remote.current_votes {
        merged.current_votes.clone_from(votes);
    }
    if let Some(spy) = &remote.spy_player_id {
        merged.spy_player_id.clone_from(spy);
    }
    merged.revision = revision;

    MergeOutcome::Applied(merged)
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
    use crate::protocol::{Player, Stage};

    fn state_with(ids: &[&str], revision: Revision) -> GameState {
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

    fn applied(outcome: MergeOutcome) -> GameState {
        match outcome {
            MergeOutcome::Applied(state) => state,
            other => panic!("expected Applied, got {other:?}"),
        }
    }

    #[test]
    fn missing_revision_is_stale() {
        let local = state_with(&["p1"], 1);
        let patch = SnapshotPatch {
            stage: Some(Stage::Results),
            ..Default::default()
        };
        assert_eq!(
            merge(&local, None, &patch),
            MergeOutcome::Stale {
                remote: None,
                local: 1
            }
        );
    }

    #[test]
    fn equal_revision_is_stale() {
        let local = state_with(&["p1"], 8);
        let patch = SnapshotPatch::from(&state_with(&["p2"], 8));
        assert!(!merge(&local, None, &patch).is_applied());
    }

    #[test]
    fn players_are_unioned() {
        let local = state_with(&["p1"], 1);
        let patch = SnapshotPatch::from(&state_with(&["p2"], 2));
        let merged = applied(merge(&local, None, &patch));
        assert_eq!(merged.players.len(), 2);
        assert_eq!(merged.revision, 2);
    }

    #[test]
    fn own_entry_is_never_overwritten() {
        let mut local = state_with(&["me", "p2"], 1);
        local.players.get_mut("me").unwrap().has_voted = Some(true);

        let mut remote = state_with(&["me", "p2"], 2);
        remote.players.get_mut("me").unwrap().name = "impostor".into();
        remote.players.get_mut("p2").unwrap().name = "renamed".into();

        let merged = applied(merge(&local, Some("me"), &SnapshotPatch::from(&remote)));
        assert_eq!(merged.players["me"], local.players["me"]);
        assert_eq!(merged.players["p2"].name, "renamed");
    }

    #[test]
    fn own_entry_is_restored_when_missing_locally() {
        let local = state_with(&["p2"], 1);
        let remote = state_with(&["me", "p2"], 2);
        let merged = applied(merge(&local, Some("me"), &SnapshotPatch::from(&remote)));
        assert!(merged.players.contains_key("me"));
    }

    #[test]
    fn absent_fields_keep_local_values() {
        let mut local = state_with(&["p1", "p2"], 1);
        local.stage = Stage::Gameplay;
        local.current_word = Some("S3".into());
        local.spy_player_id = Some("p1".into());

        let patch = SnapshotPatch::announcement(Player::new("p3", "Cleo"), 2);
        let merged = applied(merge(&local, None, &patch));
        assert_eq!(merged.stage, Stage::Gameplay);
        assert_eq!(merged.current_word.as_deref(), Some("S3"));
        assert_eq!(merged.spy_player_id.as_deref(), Some("p1"));
        assert_eq!(merged.players.len(), 3);
    }

    #[test]
    fn explicit_null_clears_round_fields() {
        let mut local = state_with(&["p1", "p2"], 1);
        local.stage = Stage::Results;
        local.current_word = Some("S3".into());
        local.spy_player_id = Some("p1".into());

        let patch = crate::protocol::decode_snapshot(
            r#"{"gameStage": "lobby", "currentWord": null, "spyPlayerId": null, "currentVotes": {}, "revision": 2}"#,
        )
        .unwrap();
        let merged = applied(merge(&local, None, &patch));
        assert_eq!(merged.stage, Stage::Lobby);
        assert!(merged.current_word.is_none());
        assert!(merged.spy_player_id.is_none());
    }

    #[test]
    fn player_id_is_normalized_from_key() {
        let local = state_with(&[], 1);
        let patch =
            crate::protocol::decode_snapshot(r#"{"players": {"p7": {"name": "Gus"}}, "revision": 2}"#)
                .unwrap();
        let merged = applied(merge(&local, None, &patch));
        assert_eq!(merged.players["p7"].id, "p7");
    }

    #[test]
    fn votes_are_replaced_wholesale() {
        let mut local = state_with(&["p1", "p2", "p3"], 1);
        local.current_votes.insert("p1".into(), "p2".into());
        let mut remote = local.clone();
        remote.revision = 2;
        remote.current_votes.clear();
        remote.current_votes.insert("p3".into(), "p1".into());

        let merged = applied(merge(&local, None, &SnapshotPatch::from(&remote)));
        assert_eq!(merged.current_votes.len(), 1);
        assert_eq!(merged.current_votes["p3"], "p1");
    }
}
