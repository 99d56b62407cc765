#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Snapshot reconciliation tests.
//!
//! Feeds synthetic snapshots (decoded from JSON, the way they arrive from
//! peers) into `reconcile::merge` and checks the last-writer-wins rules.

mod common;

use spy_sync::protocol::{self, Player, SnapshotPatch, Stage};
use spy_sync::reconcile::{merge, MergeOutcome};
use spy_sync::state::{Action, GameState};

use common::lobby;

fn applied(outcome: MergeOutcome) -> GameState {
    match outcome {
        MergeOutcome::Applied(state) => state,
        MergeOutcome::Stale { remote, local } => {
            panic!("expected Applied, got Stale {{ remote: {remote:?}, local: {local} }}")
        }
    }
}

fn round(revision: u64) -> GameState {
    lobby(&["p1", "p2", "p3"], revision - 1)
        .apply(
            &Action::StartGame {
                spy: "p2".into(),
                word: "Shayka".into(),
            },
            revision,
        )
        .expect("round starts")
}

// ════════════════════════════════════════════════════════════════════
// Revision gate
// ════════════════════════════════════════════════════════════════════

#[test]
fn merging_twice_equals_merging_once() {
    let local = lobby(&["p1"], 3);
    let remote = SnapshotPatch::from(&round(10));

    let once = applied(merge(&local, Some("p1"), &remote));
    let twice = match merge(&once, Some("p1"), &remote) {
        MergeOutcome::Applied(state) => state,
        MergeOutcome::Stale { .. } => once.clone(),
    };
    assert_eq!(once, twice);
}

#[test]
fn older_or_equal_revisions_never_change_state() {
    let local = round(50);
    for revision in [0, 1, 25, 49, 50] {
        let mut remote = SnapshotPatch::from(&lobby(&["x"], revision));
        remote.stage = Some(Stage::Results);
        assert_eq!(
            merge(&local, Some("p1"), &remote),
            MergeOutcome::Stale {
                remote: Some(revision),
                local: 50
            },
            "revision {revision} must be rejected"
        );
    }
}

#[test]
fn snapshot_without_revision_is_rejected() {
    let local = lobby(&["p1"], 3);
    let remote = protocol::decode_snapshot(r#"{"gameStage": "results"}"#).unwrap();
    assert_eq!(
        merge(&local, None, &remote),
        MergeOutcome::Stale {
            remote: None,
            local: 3
        }
    );
}

#[test]
fn last_updated_alias_is_honored() {
    let local = lobby(&["p1"], 3);
    let remote = protocol::decode_snapshot(r#"{"gameStage": "reveal", "lastUpdated": 4}"#).unwrap();
    let merged = applied(merge(&local, None, &remote));
    assert_eq!(merged.stage, Stage::Reveal);
    assert_eq!(merged.revision, 4);
}

// ════════════════════════════════════════════════════════════════════
// Field merging
// ════════════════════════════════════════════════════════════════════

#[test]
fn own_entry_is_never_overwritten() {
    let mut local = lobby(&["me", "p2"], 3);
    local.players.insert("me".into(), Player::new("me", "Original"));

    let payload = r#"{
        "players": {
            "me": { "id": "me", "name": "Impostor", "isReady": false, "isConnected": false },
            "p2": { "id": "p2", "name": "Renamed" }
        },
        "revision": 9
    }"#;
    let remote = protocol::decode_snapshot(payload).unwrap();
    let merged = applied(merge(&local, Some("me"), &remote));

    assert_eq!(merged.players["me"], Player::new("me", "Original"));
    assert_eq!(merged.players["p2"].name, "Renamed");
}

#[test]
fn missing_own_entry_is_restored_from_peer() {
    let local = lobby(&["p2"], 3);
    let remote = SnapshotPatch::from(&lobby(&["me", "p2"], 9));
    let merged = applied(merge(&local, Some("me"), &remote));
    assert!(merged.players.contains_key("me"));
}

#[test]
fn players_are_unioned_by_id() {
    let local = lobby(&["a", "b"], 3);
    let remote = SnapshotPatch::from(&lobby(&["b", "c"], 9));
    let merged = applied(merge(&local, None, &remote));
    let ids: Vec<&str> = merged.players.keys().map(String::as_str).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn absent_fields_keep_local_values() {
    let local = round(10);
    let remote = protocol::decode_snapshot(
        r#"{"players": {"p4": {"id": "p4", "name": "Late"}}, "revision": 11}"#,
    )
    .unwrap();
    let merged = applied(merge(&local, None, &remote));

    assert_eq!(merged.stage, Stage::Reveal);
    assert_eq!(merged.current_word.as_deref(), Some("Shayka"));
    assert_eq!(merged.spy_player_id.as_deref(), Some("p2"));
    assert_eq!(merged.players.len(), 4);
}

#[test]
fn explicit_nulls_clear_round_fields() {
    let local = round(10);
    let payload = r#"{
        "gameStage": "lobby",
        "currentWord": null,
        "spyPlayerId": null,
        "currentVotes": {},
        "revision": 12
    }"#;
    let remote = protocol::decode_snapshot(payload).unwrap();
    let merged = applied(merge(&local, None, &remote));

    assert_eq!(merged.stage, Stage::Lobby);
    assert_eq!(merged.current_word, None);
    assert_eq!(merged.spy_player_id, None);
}

#[test]
fn player_id_is_taken_from_the_map_key() {
    let local = GameState::default();
    let remote =
        protocol::decode_snapshot(r#"{"players": {"k1": {"name": "NoId"}}, "revision": 1}"#)
            .unwrap();
    let merged = applied(merge(&local, None, &remote));
    assert_eq!(merged.players["k1"].id, "k1");
    assert!(merged.players["k1"].is_ready);
}

#[test]
fn higher_revision_round_wins_a_simultaneous_start() {
    let base = lobby(&["p1", "p2"], 5);
    let a = base
        .apply(
            &Action::StartGame {
                spy: "p1".into(),
                word: "S3".into(),
            },
            100,
        )
        .unwrap();
    let b = base
        .apply(
            &Action::StartGame {
                spy: "p2".into(),
                word: "Kaldırım".into(),
            },
            101,
        )
        .unwrap();

    let a_after = applied(merge(&a, Some("p1"), &SnapshotPatch::from(&b)));
    assert!(!merge(&b, Some("p2"), &SnapshotPatch::from(&a)).is_applied());
    assert_eq!(a_after.spy_player_id.as_deref(), Some("p2"));
    assert_eq!(a_after.current_word.as_deref(), Some("Kaldırım"));
}

#[test]
fn malformed_payloads_fail_to_decode() {
    for payload in ["", "null", "42", "{ nope", r#"{"revision": "soon"}"#, r#"{"players": 3}"#] {
        assert!(
            protocol::decode_snapshot(payload).is_err(),
            "payload {payload:?} should be rejected"
        );
    }
}
