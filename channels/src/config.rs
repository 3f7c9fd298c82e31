//! Channel configuration.

use std::num::NonZeroUsize;

use crate::command::{DEFAULT_COMMAND_BUFFER_CAPACITY, DEFAULT_COMMAND_REDUNDANCY};

/// Contains config properties of command buffers and command packets.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandConfig {
    /// Frames kept per buffer. The server's retained window is the same size.
    pub capacity: NonZeroUsize,
    /// Newest frames repeated in every command packet.
    pub redundancy: usize,
    /// Largest encoded single command in bytes.
    pub max_command_bytes: usize,
    /// Byte budget of one command packet, header included.
    pub max_packet_bytes: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_COMMAND_BUFFER_CAPACITY)
                .unwrap_or(NonZeroUsize::MIN),
            redundancy: DEFAULT_COMMAND_REDUNDANCY,
            max_command_bytes: 128,
            max_packet_bytes: 1200,
        }
    }
}

impl CommandConfig {
    /// Small buffers for tests.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            capacity: NonZeroUsize::new(16).unwrap_or(NonZeroUsize::MIN),
            max_command_bytes: 32,
            max_packet_bytes: 256,
            ..Self::default()
        }
    }
}

/// Contains config properties of RPC channels.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RpcConfig {
    /// Unacknowledged messages allowed per connection before sends fail.
    pub max_pending: usize,
    /// Largest serialized single rpc in bytes.
    pub max_message_bytes: usize,
    /// Byte budget of one rpc packet, header included.
    pub max_packet_bytes: usize,
    /// How far ahead of the next expected sequence a message may be buffered.
    pub max_reorder: u16,
    /// Ticks a received rpc waits in the inbox before it is dropped.
    pub stale_after_ticks: u32,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_pending: 256,
            max_message_bytes: 512,
            max_packet_bytes: 1200,
            max_reorder: 1024,
            stale_after_ticks: 1,
        }
    }
}

impl RpcConfig {
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            max_pending: 16,
            max_message_bytes: 64,
            max_packet_bytes: 256,
            max_reorder: 32,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CommandConfig::default();
        assert_eq!(config.capacity.get(), 64);
        assert_eq!(config.redundancy, 4);
        assert_eq!(RpcConfig::default().stale_after_ticks, 1);
        assert!(RpcConfig::for_testing().max_pending < RpcConfig::default().max_pending);
    }
}
