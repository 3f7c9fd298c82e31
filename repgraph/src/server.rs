//! The per-connection ghost send system.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bitstream::{BitWriter, ChangeMask};
use codec::{
    merge_masked, write_record, AckWindow, BaselineSource, CodecResult, ConnectionId, GhostId,
    GhostRecord, GhostRef, NetworkTick, QuantizedState, SnapshotAck, SnapshotBuilder,
    SnapshotHistory, SpawnInfo, TimeSync,
};
use schema::{GhostLayout, GhostRegistry, GhostTypeId, OptimizationMode};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::id_pool::{GhostIdPool, PrespawnRange, PrespawnRanges};
use crate::relevancy::Relevancy;
use crate::world::WorldView;

/// Ticks of a despawn notice kept while waiting for an ack.
const MAX_DESPAWN_SENDS: usize = 64;

/// A live ghost on the server.
#[derive(Debug, Clone)]
struct Ghost {
    ghost_type: GhostTypeId,
    spawn_tick: NetworkTick,
    owner: Option<ConnectionId>,
    parent: Option<GhostId>,
    children: Vec<GhostId>,
}

/// What one connection knows about one ghost.
#[derive(Debug, Clone)]
struct ConnGhost {
    /// States as sent, keyed by snapshot tick.
    history: SnapshotHistory<QuantizedState>,
    /// Newest sent tick the client acknowledged.
    acked: Option<NetworkTick>,
    last_sent: Option<NetworkTick>,
    first_considered: NetworkTick,
}

impl ConnGhost {
    fn new(config: &ServerConfig, tick: NetworkTick) -> Self {
        Self {
            history: SnapshotHistory::new(config.history_depth),
            acked: None,
            last_sent: None,
            first_considered: tick,
        }
    }

    /// Spawn info goes out until some packet carrying it is acknowledged.
    const fn spawn_acked(&self) -> bool {
        self.acked.is_some()
    }

    fn baseline(&self) -> Option<(NetworkTick, &QuantizedState)> {
        let tick = self.acked?;
        self.history.get(tick).map(|state| (tick, state))
    }
}

/// Counters for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub snapshots_built: u64,
    pub records_sent: u64,
    pub despawns_sent: u64,
    pub bytes_sent: u64,
    /// Records dropped because they could never fit a packet.
    pub oversized_skipped: u64,
}

#[derive(Debug)]
struct Connection {
    acks: AckWindow,
    ghosts: HashMap<GhostId, ConnGhost>,
    /// Despawn notices and the ticks of the packets that carried them.
    pending_despawns: BTreeMap<GhostId, Vec<NetworkTick>>,
    /// Client timestamp of the newest ack and the tick it arrived.
    pending_echo: Option<(u32, NetworkTick)>,
    last_built: Option<NetworkTick>,
    stats: ConnectionStats,
}

impl Connection {
    fn new() -> Self {
        Self {
            acks: AckWindow::new(),
            ghosts: HashMap::new(),
            pending_despawns: BTreeMap::new(),
            pending_echo: None,
            last_built: None,
            stats: ConnectionStats::default(),
        }
    }
}

struct Baselines<'a>(&'a HashMap<GhostId, ConnGhost>);

impl BaselineSource for Baselines<'_> {
    fn baseline(&self, ghost: GhostId, tick: NetworkTick) -> Option<&QuantizedState> {
        self.0.get(&ghost)?.history.get(tick)
    }
}

/// A record ready to be packed, with the states to remember once sent.
struct Prepared {
    root: GhostId,
    bits: BitWriter,
    sent: Vec<(GhostId, QuantizedState)>,
}

/// Server side of ghost replication.
///
/// Tracks live ghosts and, per connection, what was sent and acknowledged.
/// Call [`GhostServer::build_snapshot`] once per connection per tick, then
/// [`GhostServer::advance_tick`].
#[derive(Debug)]
pub struct GhostServer {
    registry: Arc<GhostRegistry>,
    config: ServerConfig,
    tick: NetworkTick,
    ghosts: BTreeMap<GhostId, Ghost>,
    connections: BTreeMap<ConnectionId, Connection>,
    relevancy: Relevancy,
    ids: GhostIdPool,
    prespawn: PrespawnRanges,
    /// Despawned ids not yet released to the pool.
    dying: Vec<GhostId>,
}

impl GhostServer {
    #[must_use]
    pub fn new(registry: Arc<GhostRegistry>, config: ServerConfig) -> Self {
        let ids = GhostIdPool::new(config.id_reuse_cooldown_ticks);
        let prespawn = PrespawnRanges::new(config.prespawn_range_size);
        Self {
            registry,
            config,
            tick: NetworkTick::new(0),
            ghosts: BTreeMap::new(),
            connections: BTreeMap::new(),
            relevancy: Relevancy::default(),
            ids,
            prespawn,
            dying: Vec::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<GhostRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> NetworkTick {
        self.tick
    }

    /// Moves to the next simulation tick.
    pub fn advance_tick(&mut self) {
        self.tick.increment();
        self.release_dead_ids();
    }

    #[must_use]
    pub const fn relevancy(&self) -> &Relevancy {
        &self.relevancy
    }

    pub fn relevancy_mut(&mut self) -> &mut Relevancy {
        &mut self.relevancy
    }

    // --- ghost lifecycle ---------------------------------------------------

    /// Spawns a ghost of `ghost_type` at the current tick.
    pub fn spawn_ghost(
        &mut self,
        ghost_type: GhostTypeId,
        owner: Option<ConnectionId>,
    ) -> ServerResult<GhostId> {
        self.layout(ghost_type)?;
        let id = self.ids.allocate(self.tick)?;
        self.insert_ghost(id, ghost_type, owner);
        Ok(id)
    }

    /// Reserves the id range of a prespawn scene. Loading the same scene
    /// again returns the same range.
    pub fn reserve_prespawn_scene(
        &mut self,
        scene_hash: u64,
        count: u32,
    ) -> ServerResult<PrespawnRange> {
        self.prespawn.reserve(scene_hash, count)
    }

    /// Spawns the `index`th ghost of a reserved prespawn scene.
    pub fn spawn_prespawned(
        &mut self,
        scene_hash: u64,
        index: u32,
        ghost_type: GhostTypeId,
    ) -> ServerResult<GhostId> {
        self.layout(ghost_type)?;
        let range = self
            .prespawn
            .get(scene_hash)
            .copied()
            .ok_or(ServerError::PrespawnRangeExceeded {
                scene_hash,
                requested: index + 1,
                capacity: 0,
            })?;
        let id = range.id(index).ok_or(ServerError::PrespawnRangeExceeded {
            scene_hash,
            requested: index + 1,
            capacity: range.len,
        })?;
        if self.ghosts.contains_key(&id) || self.dying.contains(&id) {
            return Err(ServerError::DuplicateGhost { ghost: id });
        }
        self.insert_ghost(id, ghost_type, None);
        Ok(id)
    }

    fn insert_ghost(&mut self, id: GhostId, ghost_type: GhostTypeId, owner: Option<ConnectionId>) {
        log::debug!("spawn ghost {id} type {} at {}", ghost_type.raw(), self.tick);
        self.ghosts.insert(
            id,
            Ghost {
                ghost_type,
                spawn_tick: self.tick,
                owner,
                parent: None,
                children: Vec::new(),
            },
        );
    }

    /// Destroys a ghost and its group children. Despawn notices go out with
    /// the next snapshots.
    pub fn despawn_ghost(&mut self, id: GhostId) -> ServerResult<()> {
        let ghost = self
            .ghosts
            .remove(&id)
            .ok_or(ServerError::UnknownGhost { ghost: id })?;
        log::debug!("despawn ghost {id} at {}", self.tick);
        if let Some(parent) = ghost.parent.and_then(|p| self.ghosts.get_mut(&p)) {
            parent.children.retain(|c| *c != id);
        }
        for child in ghost.children {
            if self.ghosts.remove(&child).is_some() {
                log::debug!("despawn group child {child} with {id}");
                self.relevancy.clear_ghost(child);
                self.dying.push(child);
            }
        }
        self.relevancy.clear_ghost(id);
        self.dying.push(id);
        Ok(())
    }

    pub fn set_owner(&mut self, id: GhostId, owner: Option<ConnectionId>) -> ServerResult<()> {
        self.ghost_mut(id)?.owner = owner;
        Ok(())
    }

    #[must_use]
    pub fn owner(&self, id: GhostId) -> Option<ConnectionId> {
        self.ghosts.get(&id)?.owner
    }

    /// Moves `child` into the group of `parent`, or out of any group.
    ///
    /// Groups are one level deep.
    pub fn set_group_parent(&mut self, child: GhostId, parent: Option<GhostId>) -> ServerResult<()> {
        let current = self.ghost(child)?;
        if let Some(parent) = parent {
            let invalid = ServerError::InvalidGroup {
                ghost: child,
                parent,
            };
            let p = self.ghost(parent)?;
            if parent == child || p.parent.is_some() || !current.children.is_empty() {
                return Err(invalid);
            }
        }
        if let Some(old) = current.parent {
            if let Some(old) = self.ghosts.get_mut(&old) {
                old.children.retain(|c| *c != child);
            }
        }
        if let Some(parent) = parent {
            if let Some(p) = self.ghosts.get_mut(&parent) {
                p.children.push(child);
            }
        }
        self.ghost_mut(child)?.parent = parent;
        Ok(())
    }

    /// Wire reference to a live ghost, for entity fields.
    #[must_use]
    pub fn ghost_ref(&self, id: GhostId) -> Option<GhostRef> {
        self.ghosts
            .get(&id)
            .map(|ghost| GhostRef::new(id, ghost.spawn_tick))
    }

    #[must_use]
    pub fn contains_ghost(&self, id: GhostId) -> bool {
        self.ghosts.contains_key(&id)
    }

    #[must_use]
    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    // --- connections -------------------------------------------------------

    pub fn connect(&mut self, connection: ConnectionId) -> ServerResult<()> {
        if self.connections.contains_key(&connection) {
            return Err(ServerError::DuplicateConnection { connection });
        }
        log::debug!("connect {connection}");
        self.connections.insert(connection, Connection::new());
        Ok(())
    }

    /// Drops every piece of per-connection state.
    pub fn disconnect(&mut self, connection: ConnectionId) -> ServerResult<()> {
        self.connections
            .remove(&connection)
            .ok_or(ServerError::UnknownConnection { connection })?;
        log::debug!("disconnect {connection}");
        self.relevancy.clear_connection(connection);
        for ghost in self.ghosts.values_mut() {
            if ghost.owner == Some(connection) {
                ghost.owner = None;
            }
        }
        self.release_dead_ids();
        Ok(())
    }

    #[must_use]
    pub fn is_connected(&self, connection: ConnectionId) -> bool {
        self.connections.contains_key(&connection)
    }

    #[must_use]
    pub fn stats(&self, connection: ConnectionId) -> Option<ConnectionStats> {
        self.connections.get(&connection).map(|c| c.stats)
    }

    /// `true` if `ghost` was sent to `connection` and not despawned since.
    #[must_use]
    pub fn is_known_to(&self, connection: ConnectionId, ghost: GhostId) -> bool {
        self.connections
            .get(&connection)
            .and_then(|c| c.ghosts.get(&ghost))
            .is_some_and(|g| g.last_sent.is_some())
    }

    /// `true` while a despawn of `ghost` waits for `connection` to ack it.
    #[must_use]
    pub fn is_despawn_pending(&self, connection: ConnectionId, ghost: GhostId) -> bool {
        self.connections
            .get(&connection)
            .is_some_and(|c| c.pending_despawns.contains_key(&ghost))
    }

    /// Merges a client acknowledgement.
    pub fn receive_ack(&mut self, connection: ConnectionId, ack: &SnapshotAck) -> ServerResult<()> {
        let tick = self.tick;
        let conn = self
            .connections
            .get_mut(&connection)
            .ok_or(ServerError::UnknownConnection { connection })?;
        conn.acks.merge(ack.latest, ack.received);
        conn.pending_echo = Some((ack.timestamp_ms, tick));

        let acks = &conn.acks;
        conn.pending_despawns.retain(|ghost, sent| {
            let acked = sent.iter().any(|t| acks.contains(*t));
            if acked {
                log::trace!("{connection} acked despawn of {ghost}");
            }
            !acked
        });
        for ghost in conn.ghosts.values_mut() {
            let newest = ghost
                .history
                .iter()
                .rev()
                .map(|(t, _)| t)
                .find(|t| acks.contains(*t));
            if let Some(newest) = newest {
                if ghost.acked.map_or(true, |old| newest.is_newer_than(old)) {
                    ghost.acked = Some(newest);
                }
            }
        }
        self.release_dead_ids();
        Ok(())
    }

    // --- snapshot building -------------------------------------------------

    /// Builds this tick's snapshot for `connection`.
    ///
    /// Returns `None` when there is nothing to send.
    pub fn build_snapshot(
        &mut self,
        connection: ConnectionId,
        world: &impl WorldView,
    ) -> ServerResult<Option<Vec<u8>>> {
        let tick = self.tick;
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let Some(conn) = self.connections.get_mut(&connection) else {
            return Err(ServerError::UnknownConnection { connection });
        };
        if conn.last_built == Some(tick) {
            return Err(ServerError::TickAlreadyBuilt { connection, tick });
        }
        conn.last_built = Some(tick);

        sweep_departed(conn, &self.ghosts, &self.relevancy, connection);

        let mut builder = SnapshotBuilder::new(&registry, tick, config.max_snapshot_bytes);
        if let Some((echo_ms, received)) = conn.pending_echo {
            let held = u64::try_from(tick.ticks_since(received)).unwrap_or(0);
            let hold_ms = held * 1000 / u64::from(config.tick_rate.max(1));
            builder.set_time_sync(TimeSync {
                echo_ms,
                hold_ms: u32::try_from(hold_ms).unwrap_or(u32::MAX),
            });
        }

        for (ghost, sent) in &mut conn.pending_despawns {
            if !builder.push_despawn(*ghost) {
                log::warn!("{connection}: despawn notices exceed the snapshot budget");
                break;
            }
            if sent.len() == MAX_DESPAWN_SENDS {
                sent.remove(0);
            }
            sent.push(tick);
            conn.stats.despawns_sent += 1;
        }

        let mut candidates = Vec::new();
        for (&id, ghost) in &self.ghosts {
            if ghost.parent.is_some()
                || conn.pending_despawns.contains_key(&id)
                || !self.relevancy.is_relevant(connection, id)
            {
                continue;
            }
            let Some(layout) = registry.ghost(ghost.ghost_type) else {
                continue;
            };
            if tick.value() % layout.send_interval(config.tick_rate) != 0 {
                continue;
            }
            for member in std::iter::once(id).chain(ghost.children.iter().copied()) {
                conn.ghosts
                    .entry(member)
                    .or_insert_with(|| ConnGhost::new(&config, tick));
            }
            let known = &conn.ghosts[&id];
            let since = known.last_sent.unwrap_or(known.first_considered);
            let age = u64::try_from(tick.ticks_since(since)).unwrap_or(0);
            let priority = u64::from(layout.importance) * (age + 1);
            candidates.push((priority, id));
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, id) in candidates {
            let prepared = match prepare(&registry, &self.ghosts, id, conn, connection, tick, world)
            {
                Ok(Some(prepared)) => prepared,
                Ok(None) => continue,
                Err(err) => {
                    log::error!("{connection}: ghost {id} skipped: {err}");
                    continue;
                }
            };
            if builder.try_push(&prepared.bits) {
                for (ghost, state) in prepared.sent {
                    if let Some(known) = conn.ghosts.get_mut(&ghost) {
                        // Only one build per tick, so inserts stay ordered.
                        if let Err(err) = known.history.insert(tick, state) {
                            log::error!("{connection}: ghost {ghost} history: {err}");
                        }
                        known.last_sent = Some(tick);
                    }
                }
                conn.stats.records_sent += 1;
            } else if !builder.fits_alone(&prepared.bits) {
                log::error!(
                    "{connection}: ghost {} record of {} bytes exceeds the {} byte snapshot budget",
                    prepared.root,
                    prepared.bits.byte_len(),
                    config.max_snapshot_bytes
                );
                conn.stats.oversized_skipped += 1;
            }
        }

        if builder.is_empty() && conn.pending_echo.is_none() {
            return Ok(None);
        }
        conn.pending_echo = None;
        let bytes = builder.finish()?;
        conn.stats.snapshots_built += 1;
        conn.stats.bytes_sent += bytes.len() as u64;
        Ok(Some(bytes))
    }

    fn release_dead_ids(&mut self) {
        let tick = self.tick;
        let connections = &self.connections;
        let ids = &mut self.ids;
        self.dying.retain(|&id| {
            let referenced = connections
                .values()
                .any(|c| c.ghosts.contains_key(&id) || c.pending_despawns.contains_key(&id));
            if referenced {
                return true;
            }
            if !id.is_prespawn() {
                log::trace!("release ghost id {id}");
                ids.release(id, tick);
            }
            false
        });
    }

    fn layout(&self, ghost_type: GhostTypeId) -> ServerResult<&GhostLayout> {
        self.registry
            .ghost(ghost_type)
            .ok_or(ServerError::UnknownGhostType {
                raw: ghost_type.raw(),
            })
    }

    fn ghost(&self, id: GhostId) -> ServerResult<&Ghost> {
        self.ghosts
            .get(&id)
            .ok_or(ServerError::UnknownGhost { ghost: id })
    }

    fn ghost_mut(&mut self, id: GhostId) -> ServerResult<&mut Ghost> {
        self.ghosts
            .get_mut(&id)
            .ok_or(ServerError::UnknownGhost { ghost: id })
    }
}

/// Queues despawns for ghosts the connection knows that were destroyed or
/// left relevancy.
fn sweep_departed(
    conn: &mut Connection,
    ghosts: &BTreeMap<GhostId, Ghost>,
    relevancy: &Relevancy,
    connection: ConnectionId,
) {
    let departed: Vec<GhostId> = conn
        .ghosts
        .keys()
        .copied()
        .filter(|id| {
            let root = ghosts.get(id).map(|g| g.parent.unwrap_or(*id));
            root.map_or(true, |root| {
                !ghosts.contains_key(&root) || !relevancy.is_relevant(connection, root)
            })
        })
        .collect();
    for id in departed {
        if let Some(known) = conn.ghosts.remove(&id) {
            if known.last_sent.is_some() {
                log::debug!("{connection}: despawn {id}");
                conn.pending_despawns.entry(id).or_default();
            }
        }
    }
}

/// Encodes the record of a top-level ghost with its group children.
///
/// Returns `None` for static ghosts with nothing new to say.
fn prepare(
    registry: &GhostRegistry,
    ghosts: &BTreeMap<GhostId, Ghost>,
    id: GhostId,
    conn: &Connection,
    connection: ConnectionId,
    tick: NetworkTick,
    world: &impl WorldView,
) -> CodecResult<Option<Prepared>> {
    let Some((mut record, parent_quiet)) =
        ghost_record(registry, ghosts, id, conn, connection, world)?
    else {
        return Ok(None);
    };
    let mut sent = vec![(id, record.state.clone())];
    let mut quiet = parent_quiet;
    if let Some(ghost) = ghosts.get(&id) {
        for &child in &ghost.children {
            if let Some((child_record, child_quiet)) =
                ghost_record(registry, ghosts, child, conn, connection, world)?
            {
                quiet &= child_quiet;
                sent.push((child, child_record.state.clone()));
                record.children.push(child_record);
            }
        }
    }
    let is_static = registry
        .ghost(record.ghost_type)
        .is_some_and(|l| l.optimization == OptimizationMode::Static);
    if is_static && quiet {
        return Ok(None);
    }

    let mut bits = BitWriter::new();
    write_record(&mut bits, registry, tick, &record, &Baselines(&conn.ghosts))?;
    Ok(Some(Prepared {
        root: id,
        bits,
        sent,
    }))
}

/// Builds one ghost's record against its acknowledged baseline. The flag is
/// `true` when the record would tell the client nothing new.
fn ghost_record(
    registry: &GhostRegistry,
    ghosts: &BTreeMap<GhostId, Ghost>,
    id: GhostId,
    conn: &Connection,
    connection: ConnectionId,
    world: &impl WorldView,
) -> CodecResult<Option<(GhostRecord, bool)>> {
    let (Some(ghost), Some(known)) = (ghosts.get(&id), conn.ghosts.get(&id)) else {
        return Ok(None);
    };
    let Some(layout) = registry.ghost(ghost.ghost_type) else {
        return Ok(None);
    };
    let Some(state) = world.state(id) else {
        log::trace!("ghost {id} has no world state this tick");
        return Ok(None);
    };
    let current = QuantizedState::from_state(layout, state)?;

    let default;
    let (baseline, base_state) = match known.baseline() {
        Some((tick, state)) => (Some(tick), state),
        None => {
            default = QuantizedState::default_for(layout);
            (None, &default)
        }
    };
    let is_owner = ghost.owner == Some(connection);
    let mask = eligible_changes(layout, &current, base_state, is_owner)?;
    let sent = merge_masked(base_state, &current, &mask);
    let spawn = (!known.spawn_acked()).then_some(SpawnInfo {
        spawn_tick: ghost.spawn_tick,
        owner: ghost.owner,
    });
    let quiet = spawn.is_none()
        && baseline.is_some()
        && !mask.any()
        && sent.enabled == base_state.enabled;

    Ok(Some((
        GhostRecord {
            ghost_id: id,
            ghost_type: ghost.ghost_type,
            spawn,
            baseline,
            mask,
            state: sent,
            children: Vec::new(),
        },
        quiet,
    )))
}

/// Changed bits of components the send rule lets this connection see.
fn eligible_changes(
    layout: &GhostLayout,
    current: &QuantizedState,
    baseline: &QuantizedState,
    is_owner: bool,
) -> CodecResult<ChangeMask> {
    let mut mask = current.diff(baseline);
    for (_, component) in layout.replicated_components() {
        if component.send_rule.sends_to(is_owner) {
            continue;
        }
        for i in 0..component.fields.len() {
            mask.set(component.field_bit(i), false)?;
        }
    }
    Ok(mask)
}
