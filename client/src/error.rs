//! Error types for the client-side receive system.

use codec::{CodecError, GhostId};
use thiserror::Error;

use crate::world::LocalEntity;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors returned by [`crate::GhostClient`].
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// The server runs a different registry. The caller should disconnect.
    #[error("protocol mismatch: expected schema 0x{expected:016X}, server sent 0x{found:016X}")]
    ProtocolMismatch { expected: u64, found: u64 },

    #[error("entity {entity} is not a ghost")]
    UnknownEntity { entity: LocalEntity },

    #[error("ghost {ghost} is not known locally")]
    UnknownGhost { ghost: GhostId },

    #[error(transparent)]
    Codec(CodecError),
}

impl ClientError {
    /// Returns `true` if the connection cannot continue.
    #[must_use]
    pub const fn is_protocol_fatal(&self) -> bool {
        matches!(self, Self::ProtocolMismatch { .. })
    }
}

impl From<CodecError> for ClientError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::SchemaMismatch { expected, found } => {
                Self::ProtocolMismatch { expected, found }
            }
            other => Self::Codec(other),
        }
    }
}
