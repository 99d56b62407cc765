#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Game-rule tests for `StateStore` and `GameState`.
//!
//! Exercises the roster, round lifecycle, voting and result queries through
//! the public API, plus the two-client round hand-off via snapshot merges.

mod common;

use std::collections::BTreeSet;

use spy_sync::protocol::{Player, SnapshotPatch, Stage};
use spy_sync::state::{Action, GameState, DEFAULT_WORDS};
use spy_sync::store::Role;
use spy_sync::identity::LocalIdentity;
use spy_sync::{MergeOutcome, StateStore};

use common::{game_id, lobby, store_at, ManualClock};

// ════════════════════════════════════════════════════════════════════
// Helper: a round in the voting stage
// ════════════════════════════════════════════════════════════════════

/// Players p1..p4 in `voting`, with p4 as the spy.
fn voting_state() -> GameState {
    let state = lobby(&["p1", "p2", "p3", "p4"], 1);
    let state = state
        .apply(
            &Action::StartGame {
                spy: "p4".into(),
                word: "S3".into(),
            },
            2,
        )
        .expect("start");
    let state = state.apply(&Action::StartGameplay, 3).expect("gameplay");
    state.apply(&Action::StartVoting, 4).expect("voting")
}

fn vote(state: &GameState, voter: &str, target: &str, revision: u64) -> GameState {
    state
        .apply(
            &Action::SubmitVote {
                voter: voter.into(),
                target: target.into(),
            },
            revision,
        )
        .expect("vote applies")
}

// ════════════════════════════════════════════════════════════════════
// Roster
// ════════════════════════════════════════════════════════════════════

#[test]
fn player_count_equals_distinct_ids() {
    let mut store = store_at(100);
    let ids = ["a", "b", "a", "c", "b", "a"];
    for id in ids {
        store.add_player(&format!("name-{id}"), Some(id.to_string()));
    }
    let distinct: BTreeSet<&str> = ids.into_iter().collect();
    assert_eq!(store.players().len(), distinct.len());
}

#[test]
fn re_adding_an_id_overwrites_without_duplicating() {
    let mut store = store_at(100);
    store.add_player("Alice", Some("p1".into()));
    store.add_player("Alicia", Some("p1".into()));
    assert_eq!(store.players().len(), 1);
    assert_eq!(store.state().player("p1").unwrap().name, "Alicia");
}

#[test]
fn generated_ids_are_unique() {
    let mut store = store_at(100);
    let a = store.add_player("Alice", None).unwrap();
    let b = store.add_player("Alice", None).unwrap();
    assert_ne!(a, b);
    assert_eq!(store.players().len(), 2);
}

#[test]
fn local_player_drives_the_screen() {
    let mut store = store_at(100);
    assert_eq!(store.screen(), Stage::Join);
    store.add_player("Alice", None);
    assert_eq!(store.screen(), Stage::Lobby);
}

#[test]
fn removing_the_local_player_returns_to_join() {
    let mut store = store_at(100);
    let me = store.add_player("Alice", None).unwrap();
    store.add_player("Bob", Some("bob".into()));

    assert!(store.remove_player(&me));
    assert!(store.identity().local_player_id.is_none());
    assert_eq!(store.screen(), Stage::Join);
    assert!(!store.remove_player(&me));
}

// ════════════════════════════════════════════════════════════════════
// Round lifecycle
// ════════════════════════════════════════════════════════════════════

#[test]
fn start_game_is_noop_below_two_players() {
    let mut store = store_at(100);
    store.add_player("Alice", Some("p1".into()));
    let before = store.state().clone();

    assert!(!store.start_game());
    assert_eq!(store.state(), &before);
    assert_eq!(store.state().current_word, None);
    assert_eq!(store.state().spy_player_id, None);
}

#[test]
fn start_game_assigns_exactly_one_spy_and_a_vocabulary_word() {
    for seed_players in 2..=6 {
        let mut store = store_at(100);
        for i in 0..seed_players {
            store.add_player(&format!("P{i}"), Some(format!("p{i}")));
        }
        assert!(store.start_game());

        let state = store.state();
        assert_eq!(state.stage, Stage::Reveal);
        let spies: Vec<&Player> = state.players.values().filter(|p| p.is_spy()).collect();
        assert_eq!(spies.len(), 1);
        assert_eq!(state.spy_player_id.as_deref(), Some(spies[0].id.as_str()));
        let word = state.current_word.as_deref().unwrap();
        assert!(DEFAULT_WORDS.contains(&word), "unexpected word {word}");
    }
}

#[test]
fn custom_vocabulary_is_used() {
    let mut store = store_at(100).with_vocabulary(["Lighthouse"]);
    store.add_player("Alice", Some("p1".into()));
    store.add_player("Bob", Some("p2".into()));
    assert!(store.start_game());
    assert_eq!(store.state().current_word.as_deref(), Some("Lighthouse"));
}

#[test]
fn stage_transitions_follow_the_round_order() {
    let mut store = store_at(100);
    store.add_player("Alice", Some("p1".into()));
    store.add_player("Bob", Some("p2".into()));

    assert!(!store.start_voting());
    assert!(!store.start_gameplay());
    assert!(store.start_game());
    assert!(!store.start_game());
    assert!(!store.start_voting());
    assert!(store.start_gameplay());
    assert_eq!(store.screen(), Stage::Gameplay);
    assert!(store.start_voting());
    assert_eq!(store.screen(), Stage::Voting);
}

#[test]
fn reset_clears_the_round_and_keeps_the_roster() {
    let mut store = store_at(100);
    store.add_player("Alice", Some("p1".into()));
    store.add_player("Bob", Some("p2".into()));
    store.add_player("Cem", Some("p3".into()));
    let roster: Vec<(String, String)> = store
        .players()
        .iter()
        .map(|p| (p.id.clone(), p.name.clone()))
        .collect();

    store.start_game();
    store.start_gameplay();
    store.start_voting();
    store.submit_vote("p2");
    assert!(store.reset_game());

    let state = store.state();
    assert_eq!(state.stage, Stage::Lobby);
    assert_eq!(state.current_word, None);
    assert_eq!(state.spy_player_id, None);
    assert!(state.current_votes.is_empty());
    assert!(state
        .players
        .values()
        .all(|p| p.is_spy.is_none() && p.has_voted.is_none()));
    let after: Vec<(String, String)> = store
        .players()
        .iter()
        .map(|p| (p.id.clone(), p.name.clone()))
        .collect();
    assert_eq!(after, roster);
}

// ════════════════════════════════════════════════════════════════════
// Voting
// ════════════════════════════════════════════════════════════════════

#[test]
fn results_follow_the_last_vote_automatically() {
    let state = voting_state();
    let state = vote(&state, "p1", "p4", 5);
    let state = vote(&state, "p2", "p4", 6);
    let state = vote(&state, "p3", "p1", 7);
    assert_eq!(state.stage, Stage::Voting);
    assert!(!state.is_voting_complete());

    let state = vote(&state, "p4", "p1", 8);
    assert!(state.is_voting_complete());
    assert_eq!(state.stage, Stage::Results);
}

#[test]
fn most_voted_player_counts_votes() {
    let state = voting_state();
    let state = vote(&state, "p1", "p3", 5);
    let state = vote(&state, "p2", "p3", 6);
    let state = vote(&state, "p3", "p4", 7);

    assert_eq!(state.most_voted_player().unwrap().id, "p3");
    assert!(!state.is_spy_caught());
}

#[test]
fn spy_is_caught_when_most_voted() {
    let state = voting_state();
    let state = vote(&state, "p1", "p4", 5);
    let state = vote(&state, "p2", "p4", 6);
    assert!(state.is_spy_caught());
    assert_eq!(state.spy_player().unwrap().id, "p4");
}

#[test]
fn votes_for_unknown_players_are_refused() {
    let state = voting_state();
    assert!(state
        .apply(
            &Action::SubmitVote {
                voter: "p1".into(),
                target: "ghost".into(),
            },
            5,
        )
        .is_none());
}

#[test]
fn submit_vote_without_local_player_is_noop() {
    let mut store = store_at(100).with_state(voting_state());
    assert!(!store.submit_vote("p1"));
}

// ════════════════════════════════════════════════════════════════════
// Two clients handing over a round
// ════════════════════════════════════════════════════════════════════

#[test]
fn stale_client_adopts_newer_round_and_rejects_older_snapshot() {
    // Client A: revisions 7, 8, 9.
    let mut a = store_at(7);
    a.add_player("Alice", Some("p1".into()));
    a.add_player("Bob", Some("p2".into()));
    assert!(a.start_game());
    assert_eq!(a.state().stage, Stage::Reveal);
    assert_eq!(a.revision(), 9);
    let spies = a.players().iter().filter(|p| p.is_spy()).count();
    assert_eq!(spies, 1);

    // Client B sits on a stale snapshot.
    let stale = lobby(&["p1"], 5);
    let mut b = store_at(1).with_state(stale.clone());

    let outcome = b.merge_remote(&a.snapshot());
    assert!(outcome.is_applied());
    assert_eq!(b.state(), a.state());
    assert_eq!(b.state().spy_player_id, a.state().spy_player_id);

    let before = b.state().clone();
    let outcome = b.merge_remote(&SnapshotPatch::from(&stale));
    assert_eq!(
        outcome,
        MergeOutcome::Stale {
            remote: Some(5),
            local: 9
        }
    );
    assert_eq!(b.state(), &before);
}

#[test]
fn joined_peer_learns_its_role_from_the_round() {
    let mut a = store_at(7);
    a.add_player("Alice", Some("p1".into()));
    a.add_player("Bob", Some("p2".into()));

    let mut b = store_at(1);
    b.add_player("Bob", Some("p2".into()));
    assert_eq!(b.local_role(), None);

    a.start_game();
    assert!(b.merge_remote(&a.snapshot()).is_applied());

    let expected = if a.state().spy_player_id.as_deref() == Some("p2") {
        Role::Spy
    } else {
        Role::Citizen {
            word: a.state().current_word.clone().unwrap(),
        }
    };
    assert_eq!(b.local_role(), Some(expected));
    assert_eq!(b.screen(), Stage::Reveal);
}

#[test]
fn local_mutation_after_merge_outranks_peer_revision() {
    let mut a = store_at(1_000);
    a.add_player("Alice", Some("p1".into()));
    let mut b = store_at(10);
    b.add_player("Bob", Some("p2".into()));

    assert!(b.merge_remote(&a.snapshot()).is_applied());
    // B's clock is far behind, yet its next write must still win.
    assert!(b.start_game());
    assert!(b.revision() > 1_000);
    assert!(a.merge_remote(&b.snapshot()).is_applied());
    assert_eq!(a.state().stage, Stage::Reveal);
}

#[test]
fn restored_peer_converges_after_announcing() {
    let mut a = store_at(200).with_state(lobby(&["a", "b"], 100));
    a.add_player("name-a", Some("a".into()));
    assert!(a.start_game());
    assert_eq!(a.revision(), 200);

    // B comes back from a persisted slot holding the old lobby.
    let mut identity = LocalIdentity::new(game_id());
    identity.local_player_id = Some("b".into());
    let mut b = StateStore::new(identity)
        .with_clock(ManualClock::at(300))
        .with_state(lobby(&["a", "b"], 100));

    let hello = b.announcement().unwrap();
    assert!(a.merge_remote(&hello).is_applied());

    for _ in 0..3 {
        let from_a = a.snapshot();
        let from_b = b.snapshot();
        a.merge_remote(&from_b);
        b.merge_remote(&from_a);
    }
    // Each side keeps its own entry, so compare the round itself.
    let (sa, sb) = (a.state(), b.state());
    assert_eq!(sa.stage, sb.stage);
    assert_eq!(sa.current_word, sb.current_word);
    assert_eq!(sa.spy_player_id, sb.spy_player_id);
    assert_eq!(sa.current_votes, sb.current_votes);
    assert!(sa.players.keys().eq(sb.players.keys()));
    assert_eq!(sa.revision, sb.revision);
}

#[test]
fn role_follows_the_round_not_the_own_entry_flags() {
    let mut a = store_at(7);
    a.add_player("Alice", Some("p1".into()));
    a.add_player("Bob", Some("p2".into()));
    let mut b = store_at(1);
    b.add_player("Bob", Some("p2".into()));

    assert!(a.start_game());
    assert!(b.merge_remote(&a.snapshot()).is_applied());
    // B adopted the round while its own entry kept no flags.
    assert_eq!(b.local_player().unwrap().is_spy, None);
    assert!(b.local_role().is_some());

    a.reset_game();
    assert!(b.merge_remote(&a.snapshot()).is_applied());
    assert_eq!(b.local_role(), None);
    assert!(b.state().spy_player_id.is_none());
}
