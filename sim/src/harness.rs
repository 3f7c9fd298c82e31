//! One server and any number of clients wired through conditioned links.
//!
//! Each [`Harness::step`] runs one fixed tick in this order: clients send
//! commands, acks, and rpcs; the server drains its uplinks; the server builds
//! snapshots and rpc packets; clients drain their downlinks and update; the
//! server tick advances.

use std::collections::BTreeMap;
use std::sync::Arc;

use channels::{
    decode_commands, encode_commands, Command, CommandBuffer, CommandConfig, CommandReceiver,
    CommandStats, RpcConfig, RpcHub, RpcRegistry,
};
use client::{ClientConfig, GhostClient, MemoryWorld};
use codec::{ConnectionId, NetworkTick, WireLimits};
use log::{debug, error, warn};
use repgraph::{GhostServer, MemoryWorldView, ServerConfig};
use schema::GhostRegistry;
use serde::Serialize;
use wire::decode_packet;

use crate::conditioner::LinkConditioner;
use crate::error::{SimError, SimResult};
use crate::transport::{ConditionedLink, Transport};

/// Connection id clients use for the server.
pub const SERVER_CONNECTION: ConnectionId = ConnectionId(u32::MAX);

/// Contains config properties of a [`Harness`].
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub commands: CommandConfig,
    pub rpc: RpcConfig,
    /// Applied to both directions of every connection.
    pub link: LinkConditioner,
    pub seed: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
            commands: CommandConfig::default(),
            rpc: RpcConfig::default(),
            link: LinkConditioner::perfect(),
            seed: 1,
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::for_testing(),
            client: ClientConfig::for_testing(),
            ..Self::default()
        }
    }
}

/// Byte and drop counters across the whole simulation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HarnessStats {
    pub snapshot_bytes: u64,
    pub command_bytes: u64,
    pub rpc_bytes: u64,
    /// Packets rejected by a decoder.
    pub rejected_packets: u64,
}

/// Client half of a simulated connection.
#[derive(Debug)]
pub struct SimClient<C> {
    pub ghosts: GhostClient,
    pub world: MemoryWorld,
    pub commands: CommandBuffer<C>,
    pub rpc: RpcHub,
    uplink: ConditionedLink,
    downlink: ConditionedLink,
}

impl<C> SimClient<C> {
    /// Client to server direction.
    pub fn uplink_mut(&mut self) -> &mut ConditionedLink {
        &mut self.uplink
    }

    /// Server to client direction.
    pub fn downlink_mut(&mut self) -> &mut ConditionedLink {
        &mut self.downlink
    }

    #[must_use]
    pub const fn uplink(&self) -> &ConditionedLink {
        &self.uplink
    }

    #[must_use]
    pub const fn downlink(&self) -> &ConditionedLink {
        &self.downlink
    }
}

/// In-process server plus clients.
#[derive(Debug)]
pub struct Harness<C> {
    registry: Arc<GhostRegistry>,
    rpc_registry: Arc<RpcRegistry>,
    config: HarnessConfig,
    limits: WireLimits,
    pub server: GhostServer,
    pub server_world: MemoryWorldView,
    pub server_rpc: RpcHub,
    receivers: BTreeMap<ConnectionId, CommandReceiver<C>>,
    clients: BTreeMap<ConnectionId, SimClient<C>>,
    now_ms: u64,
    stats: HarnessStats,
}

impl<C: Command> Harness<C> {
    #[must_use]
    pub fn new(
        registry: Arc<GhostRegistry>,
        rpc_registry: Arc<RpcRegistry>,
        config: HarnessConfig,
    ) -> Self {
        let server = GhostServer::new(Arc::clone(&registry), config.server.clone());
        let server_rpc = RpcHub::new(Arc::clone(&rpc_registry), config.rpc.clone());
        Self {
            registry,
            rpc_registry,
            config,
            limits: WireLimits::default(),
            server,
            server_world: MemoryWorldView::new(),
            server_rpc,
            receivers: BTreeMap::new(),
            clients: BTreeMap::new(),
            now_ms: 0,
            stats: HarnessStats::default(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<GhostRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn now_ms(&self) -> u64 {
        self.now_ms
    }

    #[must_use]
    pub const fn tick(&self) -> NetworkTick {
        self.server.tick()
    }

    #[must_use]
    pub const fn stats(&self) -> HarnessStats {
        self.stats
    }

    fn tick_ms(&self) -> u64 {
        1000 / u64::from(self.config.server.tick_rate.max(1))
    }

    /// Adds a client whose local connection id is `connection`.
    pub fn connect(&mut self, connection: ConnectionId) -> SimResult<()> {
        self.server.connect(connection)?;
        self.server_rpc.connect(connection);
        self.receivers
            .insert(connection, CommandReceiver::new(&self.config.commands));

        let mut client_config = self.config.client.clone();
        client_config.local_connection = Some(connection);
        let mut rpc = RpcHub::new(Arc::clone(&self.rpc_registry), self.config.rpc.clone());
        rpc.connect(SERVER_CONNECTION);
        let seed = self.config.seed ^ (u64::from(connection.0) << 32);
        self.clients.insert(
            connection,
            SimClient {
                ghosts: GhostClient::new(Arc::clone(&self.registry), client_config),
                world: MemoryWorld::new(),
                commands: CommandBuffer::new(self.config.commands.capacity),
                rpc,
                uplink: ConditionedLink::new(self.config.link, seed),
                downlink: ConditionedLink::new(self.config.link, seed.wrapping_add(1)),
            },
        );
        debug!("sim: {connection} joined at tick {}", self.server.tick());
        Ok(())
    }

    /// Removes a client. Packets still in flight are lost.
    pub fn disconnect(&mut self, connection: ConnectionId) -> SimResult<()> {
        self.server.disconnect(connection)?;
        self.server_rpc.remove(connection);
        self.receivers.remove(&connection);
        self.clients.remove(&connection);
        Ok(())
    }

    #[must_use]
    pub fn client(&self, connection: ConnectionId) -> Option<&SimClient<C>> {
        self.clients.get(&connection)
    }

    pub fn client_mut(&mut self, connection: ConnectionId) -> Option<&mut SimClient<C>> {
        self.clients.get_mut(&connection)
    }

    /// Stores `command` for `tick` in the client's buffer.
    pub fn push_command_at(
        &mut self,
        connection: ConnectionId,
        tick: NetworkTick,
        command: C,
    ) -> SimResult<()> {
        let client = self
            .clients
            .get_mut(&connection)
            .ok_or(SimError::UnknownConnection { connection })?;
        client.commands.add(tick, command);
        Ok(())
    }

    /// Stores `command` for the client's predicted tick, or the server tick
    /// before the client has a time estimate. Returns the tick used.
    pub fn push_command(&mut self, connection: ConnectionId, command: C) -> SimResult<NetworkTick> {
        let fallback = self.server.tick();
        let client = self
            .clients
            .get_mut(&connection)
            .ok_or(SimError::UnknownConnection { connection })?;
        let tick = client.ghosts.time().predicted_tick().unwrap_or(fallback);
        client.commands.add(tick, command);
        Ok(tick)
    }

    /// The server's command for `tick`. Marks the tick processed.
    pub fn command_for_tick(&mut self, connection: ConnectionId, tick: NetworkTick) -> Option<&C> {
        self.receivers.get_mut(&connection)?.command_for_tick(tick)
    }

    #[must_use]
    pub fn command_stats(&self, connection: ConnectionId) -> Option<CommandStats> {
        self.receivers.get(&connection).map(CommandReceiver::stats)
    }

    pub fn run(&mut self, ticks: usize) -> SimResult<()> {
        for _ in 0..ticks {
            self.step()?;
        }
        Ok(())
    }

    /// Runs one tick.
    pub fn step(&mut self) -> SimResult<()> {
        let now = self.now_ms;
        let tick = self.server.tick();
        let hash = self.registry.hash();

        for client in self.clients.values_mut() {
            let ack = client.ghosts.ack(now as u32);
            let bytes = encode_commands(&client.commands, &ack, hash, &self.config.commands)?;
            self.stats.command_bytes += bytes.len() as u64;
            client.uplink.send(now, bytes);
            for (_, bytes) in client.rpc.flush(tick) {
                self.stats.rpc_bytes += bytes.len() as u64;
                client.uplink.send(now, bytes);
            }
        }

        for (&connection, client) in &mut self.clients {
            while let Some(bytes) = client.uplink.receive(now) {
                let Ok(packet) = decode_packet(&bytes, &self.limits) else {
                    warn!("sim: undecodable packet from {connection}");
                    self.stats.rejected_packets += 1;
                    continue;
                };
                let flags = packet.header.flags;
                if flags.is_command() {
                    let decoded = decode_commands::<C>(
                        &bytes,
                        hash,
                        &self.limits,
                        self.config.commands.redundancy.max(1),
                    );
                    match decoded {
                        Ok(packet) => {
                            if let Some(ack) = &packet.ack {
                                self.server.receive_ack(connection, ack)?;
                            }
                            if let Some(receiver) = self.receivers.get_mut(&connection) {
                                receiver.receive(packet);
                            }
                        }
                        Err(err) => {
                            warn!("sim: command packet from {connection} dropped: {err}");
                            self.stats.rejected_packets += 1;
                        }
                    }
                } else if flags.is_rpc() && self.server_rpc.receive(connection, &bytes, tick).is_err() {
                    self.stats.rejected_packets += 1;
                }
            }
        }

        for (&connection, client) in &mut self.clients {
            if let Some(bytes) = self.server.build_snapshot(connection, &self.server_world)? {
                self.stats.snapshot_bytes += bytes.len() as u64;
                client.downlink.send(now, bytes);
            }
        }
        for (connection, bytes) in self.server_rpc.flush(tick) {
            if let Some(client) = self.clients.get_mut(&connection) {
                self.stats.rpc_bytes += bytes.len() as u64;
                client.downlink.send(now, bytes);
            }
        }

        for (&connection, client) in &mut self.clients {
            while let Some(bytes) = client.downlink.receive(now) {
                let Ok(packet) = decode_packet(&bytes, &self.limits) else {
                    self.stats.rejected_packets += 1;
                    continue;
                };
                if packet.header.flags.is_snapshot() {
                    match client.ghosts.receive(&mut client.world, &bytes, now as u32) {
                        Ok(_) => {}
                        Err(err) if err.is_protocol_fatal() => {
                            error!("sim: {connection} cannot continue: {err}");
                            return Err(err.into());
                        }
                        Err(_) => self.stats.rejected_packets += 1,
                    }
                } else if packet.header.flags.is_rpc()
                    && client.rpc.receive(SERVER_CONNECTION, &bytes, tick).is_err()
                {
                    self.stats.rejected_packets += 1;
                }
            }
            client.ghosts.update(&mut client.world, 1.0)?;
        }

        self.server.advance_tick();
        self.now_ms += self.tick_ms();
        Ok(())
    }
}
