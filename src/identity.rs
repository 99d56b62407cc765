//! Per-client identity: which game this client is in and which player it is.
//!
//! Identity is never exchanged with peers. It is persisted locally so that a
//! reload resumes the same game as the same player.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::protocol::PlayerId;

/// Alphabet used for generated game ids.
const GAME_ID_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of generated game ids.
const GAME_ID_LENGTH: usize = 7;

/// Prefix of the broadcast channel and persisted slot names.
const CHANNEL_PREFIX: &str = "game-sync-";

// ── GameId ──────────────────────────────────────────────────────────

/// Short opaque token naming one play session.
///
/// It namespaces the broadcast channel and the persisted snapshot slot, and is
/// carried in the fragment of the share link (`https://host/#k3j9x0a`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GameId(String);

impl GameId {
    /// Generate a fresh random game id.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let id = (0..GAME_ID_LENGTH)
            .filter_map(|_| GAME_ID_CHARS.get(rng.random_range(0..GAME_ID_CHARS.len())))
            .map(|&c| c as char)
            .collect();
        Self(id)
    }

    /// Validate a game id received from a link or from disk.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidGameId`] if `raw` is empty or contains
    /// anything other than ASCII alphanumerics, `-` or `_`.
    pub fn parse(raw: &str) -> Result<Self> {
        let valid = !raw.is_empty()
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(SyncError::InvalidGameId(raw.to_string()))
        }
    }

    /// Extract the game id from the fragment of a share link.
    ///
    /// Returns `Ok(None)` if the link has no fragment or an empty one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidGameId`] if the fragment is not a valid id.
    pub fn from_link(link: &str) -> Result<Option<Self>> {
        match link.split_once('#') {
            Some((_, fragment)) if !fragment.is_empty() => Self::parse(fragment).map(Some),
            _ => Ok(None),
        }
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the broadcast channel and persisted slot for this game.
    pub fn channel_name(&self) -> String {
        format!("{CHANNEL_PREFIX}{}", self.0)
    }

    /// Build the link other players open to join, replacing any existing
    /// fragment on `base_url`.
    pub fn share_link(&self, base_url: &str) -> String {
        let base = base_url.split_once('#').map_or(base_url, |(base, _)| base);
        format!("{base}#{}", self.0)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GameId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<GameId> for String {
    fn from(id: GameId) -> Self {
        id.0
    }
}

// ── LocalIdentity ───────────────────────────────────────────────────

/// How the client arrived at its game id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// The id came from a share link.
    Joined,
    /// The id was restored from the persisted identity.
    Resumed,
    /// A new id was generated; the caller should put it into the link.
    Created,
}

/// The client-local identity record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalIdentity {
    pub game_id: GameId,
    #[serde(default)]
    pub local_player_id: Option<PlayerId>,
}

impl LocalIdentity {
    /// A fresh identity in `game_id` with no local player yet.
    pub fn new(game_id: GameId) -> Self {
        Self {
            game_id,
            local_player_id: None,
        }
    }

    /// Decide which game to join.
    ///
    /// A game id in the link fragment wins. The persisted player id is kept
    /// only if it belongs to that same game. Without a fragment the persisted
    /// identity is resumed, and without either a new game is created.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidGameId`] if the link fragment is invalid.
    pub fn resolve(
        link: Option<&str>,
        persisted: Option<LocalIdentity>,
    ) -> Result<(Self, JoinMode)> {
        let linked = match link {
            Some(link) => GameId::from_link(link)?,
            None => None,
        };
        match (linked, persisted) {
            (Some(game_id), Some(persisted)) if persisted.game_id == game_id => {
                Ok((persisted, JoinMode::Joined))
            }
            (Some(game_id), _) => Ok((Self::new(game_id), JoinMode::Joined)),
            (None, Some(persisted)) => Ok((persisted, JoinMode::Resumed)),
            (None, None) => Ok((Self::new(GameId::generate()), JoinMode::Created)),
        }
    }
}

// ── IdentityFile ────────────────────────────────────────────────────

/// JSON file holding a [`LocalIdentity`] across restarts.
#[derive(Debug, Clone)]
pub struct IdentityFile {
    path: PathBuf,
}

impl IdentityFile {
    /// Use the identity file at `path`. Nothing is read until [`load`](Self::load).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted identity, or `None` if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] on read failure and
    /// [`SyncError::Serialization`] if the file is corrupt.
    pub fn load(&self) -> Result<Option<LocalIdentity>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(serde_json::from_str(&contents)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist `identity`, replacing the previous record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Io`] if the file cannot be written.
    pub fn save(&self, identity: &LocalIdentity) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(identity)?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), game_id = %identity.game_id, "identity saved");
        Ok(())
    }
}
