//! Reliable ordered delivery of rpcs over one connection.
//!
//! Every unacknowledged message is resent on each flush until the peer's
//! cumulative ack covers it. The receiving side buffers messages that arrive
//! ahead of a gap and releases them strictly in sequence order.

use std::collections::{BTreeMap, VecDeque};

use bitstream::{BitReader, BitWriter};
use codec::ConnectionId;
use log::{error, trace, warn};

use crate::config::RpcConfig;
use crate::error::{RpcError, RpcResult};
use crate::rpc::{RawRpc, RpcKind};
use crate::sequence::{sequence_greater_than, sequence_less_than, wrapping_diff};

/// Counters of one [`RpcChannel`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RpcChannelStats {
    pub sent: u64,
    pub resent: u64,
    pub delivered: u64,
    pub duplicates: u64,
    /// Messages too far ahead of the next expected sequence.
    pub dropped: u64,
}

#[derive(Debug, Clone)]
struct Pending {
    sequence: u16,
    rpc: RawRpc,
    sent: bool,
}

/// Send and receive state of reliable rpcs for one connection.
#[derive(Debug, Clone)]
pub struct RpcChannel {
    connection: ConnectionId,
    config: RpcConfig,
    next_send: u16,
    unacked: VecDeque<Pending>,
    next_expected: u16,
    reorder: BTreeMap<u16, RawRpc>,
    received: VecDeque<RawRpc>,
    ack_dirty: bool,
    stats: RpcChannelStats,
}

impl RpcChannel {
    #[must_use]
    pub fn new(connection: ConnectionId, config: RpcConfig) -> Self {
        Self {
            connection,
            config,
            next_send: 0,
            unacked: VecDeque::new(),
            next_expected: 0,
            reorder: BTreeMap::new(),
            received: VecDeque::new(),
            ack_dirty: false,
            stats: RpcChannelStats::default(),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> ConnectionId {
        self.connection
    }

    #[must_use]
    pub const fn stats(&self) -> RpcChannelStats {
        self.stats
    }

    /// Messages sent but not yet covered by the peer's ack.
    #[must_use]
    pub fn unacked_len(&self) -> usize {
        self.unacked.len()
    }

    /// `true` if the next flush has anything to say.
    #[must_use]
    pub fn has_outgoing(&self) -> bool {
        self.ack_dirty || !self.unacked.is_empty()
    }

    /// Queues `rpc` for reliable delivery.
    pub fn send(&mut self, rpc: RawRpc) -> RpcResult<()> {
        if rpc.payload.len() > self.config.max_message_bytes {
            error!(
                "dropping rpc kind {} to {}: {} bytes exceeds {} bytes",
                rpc.kind.0,
                self.connection,
                rpc.payload.len(),
                self.config.max_message_bytes
            );
            return Err(RpcError::MessageTooLarge {
                bytes: rpc.payload.len(),
                limit: self.config.max_message_bytes,
            });
        }
        if self.unacked.len() >= self.config.max_pending {
            return Err(RpcError::QueueFull {
                connection: self.connection,
                pending: self.unacked.len(),
                limit: self.config.max_pending,
            });
        }
        self.unacked.push_back(Pending {
            sequence: self.next_send,
            rpc,
            sent: false,
        });
        self.next_send = self.next_send.wrapping_add(1);
        Ok(())
    }

    /// Writes the ack and as many unacknowledged messages as fit in
    /// `budget` bytes, oldest first.
    pub fn write_section(&mut self, budget: usize) -> RpcResult<Vec<u8>> {
        // ack + count prefix
        let mut used = 2 + 3;
        let mut count = 0usize;
        for pending in &self.unacked {
            let len = 2 + 2 + 3 + pending.rpc.payload.len();
            if used + len > budget {
                break;
            }
            used += len;
            count += 1;
        }

        let mut writer = BitWriter::with_capacity(used);
        writer.write_u16_aligned(self.next_expected)?;
        writer.write_varu32(u32::try_from(count).unwrap_or(u32::MAX))?;
        for pending in self.unacked.iter_mut().take(count) {
            writer.write_u16_aligned(pending.sequence)?;
            writer.write_u16_aligned(pending.rpc.kind.0)?;
            writer.write_varu32(u32::try_from(pending.rpc.payload.len()).unwrap_or(u32::MAX))?;
            writer.write_bytes_aligned(&pending.rpc.payload)?;
            if pending.sent {
                self.stats.resent += 1;
            } else {
                pending.sent = true;
                self.stats.sent += 1;
            }
        }
        self.ack_dirty = false;
        Ok(writer.finish())
    }

    /// Applies a received rpc section. Nothing changes unless the whole
    /// section parses.
    pub fn read_section(&mut self, body: &[u8], max_messages: usize) -> RpcResult<()> {
        let mut reader = BitReader::new(body);
        let ack = reader.read_u16_aligned()?;
        let count = reader.read_varu32()? as usize;
        if count > max_messages {
            return Err(RpcError::TooManyMessages {
                count,
                limit: max_messages,
            });
        }
        let mut messages = Vec::with_capacity(count);
        for _ in 0..count {
            let sequence = reader.read_u16_aligned()?;
            let kind = RpcKind(reader.read_u16_aligned()?);
            let len = reader.read_varu32()? as usize;
            let payload = reader.read_bytes_aligned(len)?.to_vec();
            messages.push((sequence, RawRpc { kind, payload }));
        }
        if !reader.is_empty() {
            return Err(RpcError::TrailingData {
                remaining_bits: reader.bits_remaining(),
            });
        }

        while self
            .unacked
            .front()
            .is_some_and(|pending| sequence_less_than(pending.sequence, ack))
        {
            self.unacked.pop_front();
        }

        for (sequence, rpc) in messages {
            self.ack_dirty = true;
            if sequence_less_than(sequence, self.next_expected) {
                self.stats.duplicates += 1;
                continue;
            }
            if i32::from(wrapping_diff(self.next_expected, sequence))
                >= i32::from(self.config.max_reorder)
            {
                warn!(
                    "dropping rpc {sequence} from {}: too far ahead of {}",
                    self.connection, self.next_expected
                );
                self.stats.dropped += 1;
                continue;
            }
            if self.reorder.insert(sequence, rpc).is_some() {
                self.stats.duplicates += 1;
            }
        }

        while let Some(rpc) = self.reorder.remove(&self.next_expected) {
            trace!("delivering rpc {} from {}", self.next_expected, self.connection);
            self.received.push_back(rpc);
            self.stats.delivered += 1;
            self.next_expected = self.next_expected.wrapping_add(1);
        }
        Ok(())
    }

    /// Takes every message delivered in order so far.
    pub fn drain_received(&mut self) -> impl Iterator<Item = RawRpc> + '_ {
        self.received.drain(..)
    }

    /// `true` if `sequence` has already been handed to the application.
    #[must_use]
    pub fn is_delivered(&self, sequence: u16) -> bool {
        !sequence_greater_than(sequence, self.next_expected) && sequence != self.next_expected
    }
}
