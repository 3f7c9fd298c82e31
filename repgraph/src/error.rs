//! Error types for the server-side send system.

use codec::{ConnectionId, GhostId, NetworkTick};
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors returned by [`crate::GhostServer`].
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error("unknown ghost type {raw}")]
    UnknownGhostType { raw: u32 },

    #[error("ghost {ghost} does not exist")]
    UnknownGhost { ghost: GhostId },

    #[error("ghost {ghost} already exists")]
    DuplicateGhost { ghost: GhostId },

    #[error("connection {connection} does not exist")]
    UnknownConnection { connection: ConnectionId },

    #[error("connection {connection} already exists")]
    DuplicateConnection { connection: ConnectionId },

    /// Snapshots are built at most once per connection per tick.
    #[error("snapshot for {connection} at tick {tick} already built")]
    TickAlreadyBuilt {
        connection: ConnectionId,
        tick: NetworkTick,
    },

    /// The id pool has no free id left.
    #[error("ghost ids exhausted")]
    IdsExhausted,

    /// A prespawn scene asked for more ghosts than its reserved range.
    #[error("prespawn scene {scene_hash:016X} has {requested} ghosts, range holds {capacity}")]
    PrespawnRangeExceeded {
        scene_hash: u64,
        requested: u32,
        capacity: u32,
    },

    /// Groups are one level deep: a child cannot be a parent.
    #[error("ghost {ghost} cannot join group {parent}")]
    InvalidGroup { ghost: GhostId, parent: GhostId },

    #[error(transparent)]
    Codec(#[from] codec::CodecError),
}
