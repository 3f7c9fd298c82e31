//! The client ghost receive system.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use codec::{
    decode_snapshot, AckWindow, BaselineSource, CodecLimits, ConnectionId, FieldValue, GhostId,
    GhostRecord, GhostRef, GhostState, HistoryError, NetworkTick, QuantizedState, SnapshotAck,
    SnapshotHistory, SpawnInfo, WireLimits, ACK_WINDOW_BITS,
};
use schema::{GhostLayout, GhostRegistry, GhostTypeId, Representation};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::interpolation::{blend_values, sample_state, PredictionSmoothing};
use crate::spawn::{NewGhost, PredictedSpawn, SpawnClassifier};
use crate::switching::{PredictionState, PredictionSwitchQueue, TransformBlend};
use crate::time::NetworkTime;
use crate::world::{GhostWorld, LocalEntity};

/// A ghost as the client knows it.
#[derive(Debug)]
struct ClientGhost {
    ghost_type: GhostTypeId,
    spawn_tick: NetworkTick,
    owner: Option<ConnectionId>,
    /// `None` while a prespawned ghost waits for its scene.
    entity: Option<LocalEntity>,
    history: SnapshotHistory<QuantizedState>,
    prediction: PredictionState,
    blend: Option<TransformBlend>,
    /// Newest snapshot written into a predicted entity.
    applied: Option<NetworkTick>,
}

/// Counters for the receive system.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub packets_received: u64,
    /// Packets rejected as a whole.
    pub packets_dropped: u64,
    pub ghosts_spawned: u64,
    pub ghosts_despawned: u64,
    pub predicted_spawns_claimed: u64,
    pub predicted_spawns_expired: u64,
}

struct Baselines<'a>(&'a BTreeMap<GhostId, ClientGhost>);

impl BaselineSource for Baselines<'_> {
    fn baseline(&self, ghost: GhostId, tick: NetworkTick) -> Option<&QuantizedState> {
        self.0.get(&ghost)?.history.get(tick)
    }
}

/// Client side of ghost replication.
///
/// Feed every snapshot packet to [`GhostClient::receive`], then call
/// [`GhostClient::update`] once per frame to advance time and write ghost
/// state into the [`GhostWorld`].
pub struct GhostClient {
    registry: Arc<GhostRegistry>,
    config: ClientConfig,
    wire_limits: WireLimits,
    codec_limits: CodecLimits,
    time: NetworkTime,
    acks: AckWindow,
    ghosts: BTreeMap<GhostId, ClientGhost>,
    by_entity: HashMap<LocalEntity, GhostId>,
    /// Recently despawned ids and the tick of the despawn.
    despawned: HashMap<GhostId, NetworkTick>,
    /// Scene entities waiting for their prespawned ghost.
    prespawn: HashMap<GhostId, LocalEntity>,
    pending_spawns: Vec<PredictedSpawn>,
    classifiers: Vec<Box<dyn SpawnClassifier>>,
    stats: ClientStats,
}

impl GhostClient {
    #[must_use]
    pub fn new(registry: Arc<GhostRegistry>, config: ClientConfig) -> Self {
        Self {
            registry,
            time: NetworkTime::new(config.clone()),
            config,
            wire_limits: WireLimits::default(),
            codec_limits: CodecLimits::default(),
            acks: AckWindow::new(),
            ghosts: BTreeMap::new(),
            by_entity: HashMap::new(),
            despawned: HashMap::new(),
            prespawn: HashMap::new(),
            pending_spawns: Vec::new(),
            classifiers: Vec::new(),
            stats: ClientStats::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, wire_limits: WireLimits, codec_limits: CodecLimits) -> Self {
        self.wire_limits = wire_limits;
        self.codec_limits = codec_limits;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<GhostRegistry> {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub const fn time(&self) -> &NetworkTime {
        &self.time
    }

    #[must_use]
    pub const fn stats(&self) -> ClientStats {
        self.stats
    }

    /// Records the connection id the server assigned to this client.
    pub fn set_local_connection(&mut self, connection: ConnectionId) {
        self.config.local_connection = Some(connection);
    }

    /// Appends a spawn classifier. Classifiers run in the order added.
    pub fn add_classifier(&mut self, classifier: Box<dyn SpawnClassifier>) {
        self.classifiers.push(classifier);
    }

    /// Registers an entity the client spawned ahead of the server.
    pub fn register_predicted_spawn(
        &mut self,
        entity: LocalEntity,
        ghost_type: GhostTypeId,
        spawn_tick: NetworkTick,
    ) {
        self.pending_spawns.push(PredictedSpawn {
            entity,
            ghost_type,
            spawn_tick,
        });
    }

    #[must_use]
    pub fn pending_predicted_spawns(&self) -> &[PredictedSpawn] {
        &self.pending_spawns
    }

    /// Binds the entities of a loaded scene to the prespawn ids starting at
    /// `first`, in scene order.
    pub fn register_prespawn_range(&mut self, first: GhostId, entities: &[LocalEntity]) {
        for (index, entity) in (0u32..).zip(entities) {
            let id = GhostId::new(first.raw().wrapping_add(index));
            self.prespawn.insert(id, *entity);
        }
        log::debug!(
            "registered {} prespawned entities from {first}",
            entities.len()
        );
    }

    /// Decodes a snapshot packet and stores its records.
    ///
    /// The packet is applied only if it decodes completely. Returns the
    /// snapshot tick.
    pub fn receive(
        &mut self,
        world: &mut impl GhostWorld,
        bytes: &[u8],
        now_ms: u32,
    ) -> ClientResult<NetworkTick> {
        let decoded = decode_snapshot(
            &self.registry,
            bytes,
            &self.wire_limits,
            &self.codec_limits,
            &Baselines(&self.ghosts),
        );
        let packet = match decoded {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.packets_dropped += 1;
                let err = ClientError::from(err);
                if err.is_protocol_fatal() {
                    log::error!("{err}");
                } else {
                    log::warn!("dropping snapshot: {err}");
                }
                return Err(err);
            }
        };
        self.stats.packets_received += 1;

        let tick = packet.tick;
        self.acks.record(tick);
        self.time.on_snapshot(tick);
        if let Some(sync) = packet.time_sync {
            let rtt = now_ms.wrapping_sub(sync.echo_ms).saturating_sub(sync.hold_ms);
            self.time.record_rtt(rtt as f32);
        }
        self.despawned
            .retain(|_, gone| tick.ticks_since(*gone) < 2 * ACK_WINDOW_BITS as i32);

        for ghost in packet.despawns {
            self.despawn(world, ghost, tick);
        }
        for mut record in packet.records {
            let children = std::mem::take(&mut record.children);
            self.apply_record(world, record, tick);
            for child in children {
                self.apply_record(world, child, tick);
            }
        }
        Ok(tick)
    }

    fn despawn(&mut self, world: &mut impl GhostWorld, id: GhostId, tick: NetworkTick) {
        let Some(ghost) = self.ghosts.get(&id) else {
            return;
        };
        let newest = ghost.history.last_tick();
        if newest.is_valid() && newest.is_newer_than(tick) {
            log::trace!("ignoring stale despawn of {id} at {tick}");
            return;
        }
        self.remove_ghost(world, id);
        self.despawned.insert(id, tick);
    }

    fn remove_ghost(&mut self, world: &mut impl GhostWorld, id: GhostId) {
        if let Some(ghost) = self.ghosts.remove(&id) {
            if let Some(entity) = ghost.entity {
                world.despawn(entity);
                self.by_entity.remove(&entity);
            }
            log::debug!("despawned ghost {id}");
            self.stats.ghosts_despawned += 1;
        }
    }

    fn apply_record(&mut self, world: &mut impl GhostWorld, record: GhostRecord, tick: NetworkTick) {
        let id = record.ghost_id;
        if let Some(&gone) = self.despawned.get(&id) {
            if !tick.is_newer_than(gone) {
                log::trace!("ignoring record of despawned ghost {id}");
                return;
            }
            self.despawned.remove(&id);
        }

        let reused = match (record.spawn, self.ghosts.get(&id)) {
            (Some(spawn), Some(known)) => {
                known.spawn_tick != spawn.spawn_tick || known.ghost_type != record.ghost_type
            }
            _ => false,
        };
        if reused {
            log::debug!("ghost id {id} reused, replacing");
            self.remove_ghost(world, id);
        }
        if !self.ghosts.contains_key(&id) {
            let Some(spawn) = record.spawn else {
                log::warn!("update for unknown ghost {id}");
                return;
            };
            self.spawn_ghost(world, id, record.ghost_type, spawn);
        }

        let Some(ghost) = self.ghosts.get_mut(&id) else {
            return;
        };
        match ghost.history.insert(tick, record.state) {
            Ok(()) => {}
            Err(HistoryError::OutOfOrder { last_tick, .. }) => {
                log::trace!("ghost {id}: record at {tick} older than {last_tick}");
            }
            Err(err) => log::warn!("ghost {id}: {err}"),
        }
    }

    fn spawn_ghost(
        &mut self,
        world: &mut impl GhostWorld,
        id: GhostId,
        ghost_type: GhostTypeId,
        spawn: SpawnInfo,
    ) {
        let registry = Arc::clone(&self.registry);
        let Some(layout) = registry.ghost(ghost_type) else {
            return;
        };
        let owned = spawn.owner.is_some() && spawn.owner == self.config.local_connection;
        let representation = layout.mode.representation(owned);

        let entity = if id.is_prespawn() {
            let entity = self.prespawn.remove(&id);
            if entity.is_none() {
                log::debug!("prespawned ghost {id} waits for its scene");
            }
            entity
        } else if representation == Representation::Predicted {
            let new = NewGhost {
                ghost_id: id,
                ghost_type,
                spawn_tick: spawn.spawn_tick,
            };
            self.claim_predicted_spawn(&new)
                .or_else(|| Some(world.spawn(layout, representation)))
        } else {
            Some(world.spawn(layout, representation))
        };
        if let Some(entity) = entity {
            world.set_representation(entity, layout, representation);
            self.by_entity.insert(entity, id);
        }

        let prediction = if representation == Representation::Predicted {
            PredictionState::predicted_from(spawn.spawn_tick)
        } else {
            PredictionState::default()
        };
        log::debug!("spawned ghost {id} ({}) as {representation:?}", layout.name);
        self.stats.ghosts_spawned += 1;
        self.ghosts.insert(
            id,
            ClientGhost {
                ghost_type,
                spawn_tick: spawn.spawn_tick,
                owner: spawn.owner,
                entity,
                history: SnapshotHistory::new(self.config.history_depth),
                prediction,
                blend: None,
                applied: None,
            },
        );
    }

    fn claim_predicted_spawn(&mut self, new: &NewGhost) -> Option<LocalEntity> {
        for classifier in &self.classifiers {
            let Some(index) = classifier.classify(new, &self.pending_spawns) else {
                continue;
            };
            if index < self.pending_spawns.len() {
                let claimed = self.pending_spawns.remove(index);
                log::debug!("ghost {} claimed predicted spawn {}", new.ghost_id, claimed.entity);
                self.stats.predicted_spawns_claimed += 1;
                return Some(claimed.entity);
            }
        }
        None
    }

    /// Advances time by `dt_ticks` and writes ghost state into `world`.
    ///
    /// Interpolated ghosts are sampled at the interpolation tick. Predicted
    /// ghosts receive each new snapshot once, as the base for local
    /// prediction.
    pub fn update(&mut self, world: &mut impl GhostWorld, dt_ticks: f32) -> ClientResult<()> {
        self.time.advance(dt_ticks);
        let Some(interpolation) = self.time.interpolation_tick() else {
            return Ok(());
        };
        self.bind_prespawns(world);
        self.expire_predicted_spawns(world, interpolation.tick);

        let live: HashMap<GhostId, NetworkTick> = self
            .ghosts
            .iter()
            .filter(|(_, g)| g.entity.is_some_and(|e| world.exists(e)))
            .map(|(id, g)| (*id, g.spawn_tick))
            .collect();
        let resolve = |r: GhostRef| live.get(&r.ghost_id) == Some(&r.spawn_tick);
        let max_extrapolation = self.time.max_extrapolation_ticks();
        let smoothing = self.config.prediction_smoothing;

        for (id, ghost) in &mut self.ghosts {
            let Some(entity) = ghost.entity else {
                continue;
            };
            let Some(layout) = self.registry.ghost(ghost.ghost_type) else {
                continue;
            };
            if !world.exists(entity) {
                continue;
            }
            match world.representation(entity) {
                Some(Representation::Predicted) => {
                    let Some((tick, latest)) = ghost.history.latest() else {
                        continue;
                    };
                    let mut state = GhostState::default_for(layout);
                    latest.apply_to(layout, &mut state)?;
                    let write = match ghost.applied {
                        Some(applied) if applied == tick => WriteMode::EntityRefs,
                        Some(_) => WriteMode::All(smoothing),
                        None => WriteMode::All(None),
                    };
                    write_state(world, entity, layout, &state, write, &resolve);
                    ghost.applied = Some(tick);
                }
                _ => {
                    let Some(state) =
                        sample_state(layout, &ghost.history, interpolation, max_extrapolation)?
                    else {
                        continue;
                    };
                    write_state(world, entity, layout, &state, WriteMode::All(None), &resolve);
                }
            }
            if let Some(blend) = &mut ghost.blend {
                if step_blend(world, entity, layout, blend) {
                    log::trace!("ghost {id}: transform blend finished");
                    ghost.blend = None;
                }
            }
        }
        Ok(())
    }

    fn bind_prespawns(&mut self, world: &mut impl GhostWorld) {
        for (id, ghost) in &mut self.ghosts {
            if ghost.entity.is_some() {
                continue;
            }
            let Some(entity) = self.prespawn.remove(id) else {
                continue;
            };
            let Some(layout) = self.registry.ghost(ghost.ghost_type) else {
                continue;
            };
            let owned = ghost.owner.is_some() && ghost.owner == self.config.local_connection;
            world.set_representation(entity, layout, layout.mode.representation(owned));
            ghost.entity = Some(entity);
            self.by_entity.insert(entity, *id);
            log::debug!("prespawned ghost {id} bound to {entity}");
        }
    }

    fn expire_predicted_spawns(&mut self, world: &mut impl GhostWorld, interpolation: NetworkTick) {
        let timeout = i64::from(self.config.predicted_spawn_timeout_ticks);
        let stats = &mut self.stats;
        self.pending_spawns.retain(|pending| {
            let age = i64::from(interpolation.ticks_since(pending.spawn_tick));
            if age <= timeout {
                return true;
            }
            log::debug!("predicted spawn {} was never confirmed", pending.entity);
            world.despawn(pending.entity);
            stats.predicted_spawns_expired += 1;
            false
        });
    }

    /// Applies queued representation switches in enqueue order.
    ///
    /// `tick` is the current prediction tick; a ghost switched to predicted
    /// never resimulates from before it.
    pub fn apply_prediction_switches(
        &mut self,
        world: &mut impl GhostWorld,
        queue: &mut PredictionSwitchQueue,
        tick: NetworkTick,
    ) {
        for request in queue.drain() {
            let Some(id) = self.by_entity.get(&request.entity) else {
                log::warn!("switch requested for {} which is not a ghost", request.entity);
                continue;
            };
            let Some(ghost) = self.ghosts.get_mut(id) else {
                continue;
            };
            let Some(layout) = self.registry.ghost(ghost.ghost_type) else {
                continue;
            };
            if world.representation(request.entity) == Some(request.target) {
                continue;
            }
            let before = layout.transform.and_then(|slot| {
                world
                    .field(request.entity, slot.component, slot.field)
                    .cloned()
            });
            world.set_representation(request.entity, layout, request.target);
            match request.target {
                Representation::Predicted => ghost.prediction.start(tick),
                Representation::Interpolated => ghost.prediction.stop(),
            }
            ghost.applied = None;
            ghost.blend = match before {
                Some(from) if request.duration_ticks > 0 => Some(TransformBlend {
                    from,
                    elapsed: 0,
                    duration: request.duration_ticks,
                }),
                _ => None,
            };
            log::debug!("ghost {id} switched to {:?}", request.target);
        }
    }

    /// The acknowledgement to send with the next command packet.
    #[must_use]
    pub fn ack(&self, timestamp_ms: u32) -> SnapshotAck {
        self.acks.to_ack(timestamp_ms)
    }

    #[must_use]
    pub fn entity(&self, ghost: GhostId) -> Option<LocalEntity> {
        self.ghosts.get(&ghost)?.entity
    }

    #[must_use]
    pub fn ghost_of(&self, entity: LocalEntity) -> Option<GhostId> {
        self.by_entity.get(&entity).copied()
    }

    /// Local entity of a reference, if the referent exists with the same
    /// spawn tick.
    #[must_use]
    pub fn resolve(&self, reference: GhostRef) -> Option<LocalEntity> {
        let ghost = self.ghosts.get(&reference.ghost_id)?;
        if ghost.spawn_tick != reference.spawn_tick {
            return None;
        }
        ghost.entity
    }

    #[must_use]
    pub fn ghost_count(&self) -> usize {
        self.ghosts.len()
    }

    #[must_use]
    pub fn prediction_state(&self, entity: LocalEntity) -> Option<PredictionState> {
        let id = self.by_entity.get(&entity)?;
        self.ghosts.get(id).map(|g| g.prediction)
    }

    /// Newest received state of a ghost, for prediction rollback.
    pub fn latest_snapshot(&self, ghost: GhostId) -> ClientResult<Option<(NetworkTick, GhostState)>> {
        let known = self
            .ghosts
            .get(&ghost)
            .ok_or(ClientError::UnknownGhost { ghost })?;
        let Some(layout) = self.registry.ghost(known.ghost_type) else {
            return Ok(None);
        };
        let Some((tick, latest)) = known.history.latest() else {
            return Ok(None);
        };
        let mut state = GhostState::default_for(layout);
        latest.apply_to(layout, &mut state)?;
        Ok(Some((tick, state)))
    }

    /// Drops every ghost and its entity, e.g. after a disconnect.
    pub fn clear(&mut self, world: &mut impl GhostWorld) {
        let ids: Vec<GhostId> = self.ghosts.keys().copied().collect();
        for id in ids {
            self.remove_ghost(world, id);
        }
        for pending in self.pending_spawns.drain(..) {
            world.despawn(pending.entity);
        }
        self.despawned.clear();
        self.acks = AckWindow::new();
    }
}

impl std::fmt::Debug for GhostClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GhostClient")
            .field("ghosts", &self.ghosts.len())
            .field("pending_spawns", &self.pending_spawns.len())
            .field("classifiers", &self.classifiers.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[derive(Clone, Copy)]
enum WriteMode {
    All(Option<PredictionSmoothing>),
    EntityRefs,
}

fn write_state(
    world: &mut impl GhostWorld,
    entity: LocalEntity,
    layout: &GhostLayout,
    state: &GhostState,
    write: WriteMode,
    resolve: &impl Fn(GhostRef) -> bool,
) {
    for (slot, component) in layout.components.iter().enumerate() {
        if !world.has_component(entity, slot) {
            continue;
        }
        let values = &state.components[slot];
        if component.enable_bit.is_some() && matches!(write, WriteMode::All(_)) {
            world.set_enabled(entity, slot, values.enabled);
        }
        if !component.replicated {
            continue;
        }
        for (i, def) in component.fields.iter().enumerate() {
            let mut value = values.fields[i].clone();
            if let FieldValue::Entity(Some(reference)) = value {
                if !resolve(reference) {
                    value = FieldValue::Entity(None);
                }
            } else if matches!(write, WriteMode::EntityRefs) {
                continue;
            }
            if let WriteMode::All(Some(smoothing)) = write {
                if let Some(local) = world.field(entity, slot, i) {
                    value = smoothing.apply(def, local, &value);
                }
            }
            world.set_field(entity, slot, i, value);
        }
    }
}

/// Blends the transform from its pre-switch value; returns `true` when done.
fn step_blend(
    world: &mut impl GhostWorld,
    entity: LocalEntity,
    layout: &GhostLayout,
    blend: &mut TransformBlend,
) -> bool {
    let Some(slot) = layout.transform else {
        return true;
    };
    let (weight, done) = blend.step();
    if let Some(target) = world.field(entity, slot.component, slot.field) {
        if let Some(value) = blend_values(&blend.from, target, weight) {
            world.set_field(entity, slot.component, slot.field, value);
        }
    }
    done
}
