//! Per-connection rpc routing.

use std::collections::BTreeMap;
use std::sync::Arc;

use codec::{ConnectionId, NetworkTick, WireLimits};
use log::{debug, error, warn};
use wire::{decode_packet, section_encoded_len, PacketFlags, PacketWriter, SectionTag, HEADER_SIZE};

use crate::channel::RpcChannel;
use crate::config::RpcConfig;
use crate::error::{RpcError, RpcResult};
use crate::inbox::{ReceivedRpc, RpcInbox};
use crate::rpc::{Rpc, RpcRegistry};

/// Where [`RpcHub::send`] delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcTarget {
    /// Every open connection.
    Broadcast,
    Connection(ConnectionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerState {
    Open,
    /// Rejects new rpcs; already buffered input still decodes.
    Closing,
}

#[derive(Debug)]
struct Peer {
    channel: RpcChannel,
    state: PeerState,
}

/// Reliable rpc channels for a set of connections plus the shared inbox.
#[derive(Debug)]
pub struct RpcHub {
    registry: Arc<RpcRegistry>,
    config: RpcConfig,
    limits: WireLimits,
    peers: BTreeMap<ConnectionId, Peer>,
    inbox: RpcInbox,
}

impl RpcHub {
    #[must_use]
    pub fn new(registry: Arc<RpcRegistry>, config: RpcConfig) -> Self {
        let inbox = RpcInbox::new(config.stale_after_ticks);
        Self {
            registry,
            config,
            limits: WireLimits::default(),
            peers: BTreeMap::new(),
            inbox,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: WireLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &RpcRegistry {
        &self.registry
    }

    /// Opens a channel for `connection`. Reconnecting starts from fresh
    /// sequence numbers.
    pub fn connect(&mut self, connection: ConnectionId) {
        debug!("rpc channel open for {connection}");
        self.peers.insert(
            connection,
            Peer {
                channel: RpcChannel::new(connection, self.config.clone()),
                state: PeerState::Open,
            },
        );
    }

    /// Stops accepting rpcs for `connection`. Packets that still arrive are
    /// decoded until [`RpcHub::remove`].
    pub fn disconnect(&mut self, connection: ConnectionId) -> RpcResult<()> {
        let peer = self
            .peers
            .get_mut(&connection)
            .ok_or(RpcError::UnknownConnection { connection })?;
        debug!("rpc channel closing for {connection}");
        peer.state = PeerState::Closing;
        Ok(())
    }

    pub fn remove(&mut self, connection: ConnectionId) {
        self.peers.remove(&connection);
    }

    #[must_use]
    pub fn is_open(&self, connection: ConnectionId) -> bool {
        self.peers
            .get(&connection)
            .is_some_and(|peer| peer.state == PeerState::Open)
    }

    #[must_use]
    pub fn channel(&self, connection: ConnectionId) -> Option<&RpcChannel> {
        self.peers.get(&connection).map(|peer| &peer.channel)
    }

    /// Queues `rpc` and returns how many connections it was queued for.
    ///
    /// A broadcast skips closing connections and logs per-connection
    /// failures; a targeted send reports them.
    pub fn send<R: Rpc>(&mut self, target: RpcTarget, rpc: &R) -> RpcResult<usize> {
        let raw = self.registry.encode(rpc)?;
        match target {
            RpcTarget::Connection(connection) => {
                let peer = self
                    .peers
                    .get_mut(&connection)
                    .ok_or(RpcError::UnknownConnection { connection })?;
                if peer.state == PeerState::Closing {
                    return Err(RpcError::ConnectionClosing { connection });
                }
                peer.channel.send(raw)?;
                Ok(1)
            }
            RpcTarget::Broadcast => {
                let mut queued = 0;
                for (connection, peer) in &mut self.peers {
                    if peer.state == PeerState::Closing {
                        continue;
                    }
                    match peer.channel.send(raw.clone()) {
                        Ok(()) => queued += 1,
                        Err(err) => warn!("broadcast `{}` to {connection} failed: {err}", R::NAME),
                    }
                }
                Ok(queued)
            }
        }
    }

    /// Builds this tick's rpc packets and expires stale inbox entries.
    pub fn flush(&mut self, tick: NetworkTick) -> Vec<(ConnectionId, Vec<u8>)> {
        self.inbox.expire(tick, &self.registry);

        let max_packet_bytes = self.config.max_packet_bytes;
        let framing = section_encoded_len(max_packet_bytes).map_or(8, |len| len - max_packet_bytes);
        let budget = max_packet_bytes.saturating_sub(HEADER_SIZE + framing);
        let hash = self.registry.hash();

        let mut packets = Vec::new();
        for (connection, peer) in &mut self.peers {
            if peer.state == PeerState::Closing || !peer.channel.has_outgoing() {
                continue;
            }
            let packet = peer.channel.write_section(budget).and_then(|body| {
                let mut writer = PacketWriter::new(PacketFlags::rpc(), hash, tick.value());
                writer.push_section(SectionTag::Rpc, &body)?;
                Ok(writer.finish(max_packet_bytes)?)
            });
            match packet {
                Ok(bytes) => packets.push((*connection, bytes)),
                Err(err) => error!("failed to build rpc packet for {connection}: {err}"),
            }
        }
        packets
    }

    /// Feeds a received rpc packet from `connection` into its channel and
    /// moves delivered messages to the inbox.
    ///
    /// Malformed packets are logged and dropped; the error is returned so
    /// the caller can disconnect on a protocol mismatch.
    pub fn receive(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
        tick: NetworkTick,
    ) -> RpcResult<usize> {
        let result = self.receive_inner(connection, bytes, tick);
        if let Err(err) = &result {
            if err.is_protocol_fatal() {
                error!("rpc packet from {connection} rejected: {err}");
            } else {
                warn!("dropping rpc packet from {connection}: {err}");
            }
        }
        result
    }

    fn receive_inner(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
        tick: NetworkTick,
    ) -> RpcResult<usize> {
        let peer = self
            .peers
            .get_mut(&connection)
            .ok_or(RpcError::UnknownConnection { connection })?;
        let packet = decode_packet(bytes, &self.limits)?;
        let header = packet.header;
        if !header.flags.is_rpc() {
            return Err(RpcError::NotRpcPacket {
                flags: header.flags.raw(),
            });
        }
        if header.schema_hash != self.registry.hash() {
            return Err(RpcError::ProtocolMismatch {
                expected: self.registry.hash(),
                found: header.schema_hash,
            });
        }
        let Some(body) = packet.section(SectionTag::Rpc) else {
            return Ok(0);
        };
        peer.channel.read_section(body, self.config.max_pending)?;

        let mut delivered = 0;
        for raw in peer.channel.drain_received() {
            if self.registry.name(raw.kind).is_none() {
                warn!("dropping rpc of unknown kind {} from {connection}", raw.kind.0);
                continue;
            }
            self.inbox.push(connection, tick, raw);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Removes and decodes every received rpc of type `R`.
    pub fn take<R: Rpc>(&mut self) -> RpcResult<Vec<ReceivedRpc<R>>> {
        self.inbox.take::<R>(&self.registry)
    }

    #[must_use]
    pub const fn inbox(&self) -> &RpcInbox {
        &self.inbox
    }
}
