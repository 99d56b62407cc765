#![no_main]

use libfuzzer_sys::fuzz_target;
use spy_sync::protocol::decode_snapshot;
use spy_sync::reconcile::merge;
use spy_sync::state::GameState;

fuzz_target!(|data: &[u8]| {
    let Ok(payload) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(patch) = decode_snapshot(payload) else {
        return;
    };

    // Whatever a peer sends, merging must not panic and must be idempotent.
    let local = GameState::default();
    if let spy_sync::MergeOutcome::Applied(once) = merge(&local, Some("me"), &patch) {
        assert!(!merge(&once, Some("me"), &patch).is_applied());
        let _ = once.most_voted_player();
        let _ = once.is_voting_complete();
    }
});
