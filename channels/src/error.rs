//! Error types for command and RPC channels.

use bitstream::BitError;
use codec::{CodecError, ConnectionId};
use thiserror::Error;
use wire::{DecodeError, EncodeError};

/// Result type for command operations.
pub type CommandResult<T> = Result<T, CommandError>;

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Errors produced while encoding or decoding command packets.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// The peer runs a different registry.
    #[error("protocol mismatch: expected schema 0x{expected:016X}, peer sent 0x{found:016X}")]
    ProtocolMismatch { expected: u64, found: u64 },

    #[error("packet flags 0x{flags:04X} do not mark a command packet")]
    NotCommandPacket { flags: u16 },

    #[error("command packet carries {count} frames, limit is {limit}")]
    TooManyFrames { count: usize, limit: usize },

    #[error("commands section has {remaining_bits} trailing bits")]
    TrailingData { remaining_bits: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Bits(#[from] BitError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Errors produced by the RPC registry, channels, and hub.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// The connection is disconnecting; nothing more is accepted for it.
    #[error("connection {connection} is closing")]
    ConnectionClosing { connection: ConnectionId },

    #[error("connection {connection} is unknown")]
    UnknownConnection { connection: ConnectionId },

    #[error("rpc `{name}` is not registered")]
    Unregistered { name: &'static str },

    #[error("rpc `{name}` registered twice")]
    DuplicateName { name: &'static str },

    #[error("too many rpc types: {count} (max {max})")]
    TooManyTypes { count: usize, max: usize },

    #[error("rpc kind {kind} is not registered")]
    UnknownKind { kind: u16 },

    /// The peer runs a different RPC registry.
    #[error("protocol mismatch: expected rpc hash 0x{expected:016X}, peer sent 0x{found:016X}")]
    ProtocolMismatch { expected: u64, found: u64 },

    #[error("{pending} unacknowledged rpcs for {connection}, limit is {limit}")]
    QueueFull {
        connection: ConnectionId,
        pending: usize,
        limit: usize,
    },

    #[error("rpc payload of {bytes} bytes exceeds {limit} bytes")]
    MessageTooLarge { bytes: usize, limit: usize },

    #[error("packet flags 0x{flags:04X} do not mark an rpc packet")]
    NotRpcPacket { flags: u16 },

    #[error("rpc section carries {count} messages, limit is {limit}")]
    TooManyMessages { count: usize, limit: usize },

    #[error("rpc section has {remaining_bits} trailing bits")]
    TrailingData { remaining_bits: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Bits(#[from] BitError),
}

impl RpcError {
    /// Returns `true` if the connection cannot continue.
    #[must_use]
    pub const fn is_protocol_fatal(&self) -> bool {
        matches!(self, Self::ProtocolMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closing_error_names_the_connection() {
        let err = RpcError::ConnectionClosing {
            connection: ConnectionId(7),
        };
        assert!(err.to_string().contains("conn7"));
        assert!(!err.is_protocol_fatal());
    }

    #[test]
    fn bit_errors_convert() {
        let err: CommandError = BitError::UnexpectedEof {
            requested: 8,
            available: 0,
        }
        .into();
        assert!(matches!(err, CommandError::Bits(_)));
    }
}
