//! Events emitted by a running [`SyncClient`](crate::SyncClient).

use crate::protocol::{Revision, Stage};
use crate::state::GameState;

/// Something the UI may want to react to.
///
/// Local mutations made through the client handle are reported as
/// [`StateChanged`](SyncEvent::StateChanged) too, so a UI can render solely
/// from this stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The transport is subscribed and the sync loop is running.
    Started,
    /// Local state changed, either by a local mutation or a merge.
    StateChanged {
        /// Copy of the state after the change (boxed to keep the enum small).
        state: Box<GameState>,
        /// `true` if the change came from a peer snapshot.
        remote: bool,
    },
    /// A peer snapshot was not newer than local state and was ignored.
    SnapshotRejected {
        /// Revision carried by the snapshot, if any.
        remote: Option<Revision>,
        /// Local revision at the time.
        local: Revision,
    },
    /// A peer payload could not be decoded and was dropped.
    SnapshotDropped {
        /// Decoder error message.
        reason: String,
    },
    /// The sync loop exited. Always the last event.
    Stopped {
        /// Why the loop stopped, if not a clean shutdown request.
        reason: Option<String>,
    },
}

impl SyncEvent {
    pub(crate) fn changed(state: &GameState, remote: bool) -> Self {
        SyncEvent::StateChanged {
            state: Box::new(state.clone()),
            remote,
        }
    }

    /// Stage carried by a [`StateChanged`](SyncEvent::StateChanged) event.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            SyncEvent::StateChanged { state, .. } => Some(state.stage),
            _ => None,
        }
    }
}
