use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use codec::{
    decode_snapshot, AckWindow, BaselineSource, CodecLimits, ConnectionId, FieldValue, GhostId,
    GhostState, NetworkTick, QuantizedState, SnapshotHistory, WireLimits,
};
use repgraph::{GhostServer, MemoryWorldView, RelevancyMode, ServerConfig};
use schema::{ComponentType, FieldDef, FieldKind, GhostRegistry, GhostTypeDef, GhostTypeId};

const CONN: ConnectionId = ConnectionId(7);

/// Minimal receiving end: per-ghost history plus the ack window.
#[derive(Default)]
struct Receiver {
    histories: HashMap<GhostId, SnapshotHistory<QuantizedState>>,
    acks: AckWindow,
    frames_seen: HashMap<GhostId, usize>,
    spawns: HashMap<GhostId, usize>,
}

impl BaselineSource for Receiver {
    fn baseline(&self, ghost: GhostId, tick: NetworkTick) -> Option<&QuantizedState> {
        self.histories.get(&ghost)?.get(tick)
    }
}

impl Receiver {
    /// Applies one snapshot and returns the ghosts it despawned.
    fn receive(&mut self, registry: &GhostRegistry, bytes: &[u8]) -> Vec<GhostId> {
        let packet = decode_snapshot(
            registry,
            bytes,
            &WireLimits::default(),
            &CodecLimits::default(),
            self,
        )
        .unwrap();
        for ghost in &packet.despawns {
            self.histories.remove(ghost);
        }
        for record in packet.records {
            if record.spawn.is_some() {
                self.histories.remove(&record.ghost_id);
                *self.spawns.entry(record.ghost_id).or_default() += 1;
            } else {
                assert!(
                    self.histories.contains_key(&record.ghost_id),
                    "delta for unknown ghost {}",
                    record.ghost_id
                );
            }
            *self.frames_seen.entry(record.ghost_id).or_default() += 1;
            self.histories
                .entry(record.ghost_id)
                .or_insert_with(SnapshotHistory::with_default_depth)
                .insert(packet.tick, record.state)
                .unwrap();
        }
        self.acks.record(packet.tick);
        packet.despawns
    }
}

fn registry() -> Arc<GhostRegistry> {
    Arc::new(
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Counter",
                vec![FieldDef::new("value", FieldKind::int32())],
            ))
            .ghost(GhostTypeDef::new("Counter").component("Counter"))
            .build()
            .unwrap(),
    )
}

fn counter(registry: &GhostRegistry, value: i64) -> GhostState {
    let mut state = GhostState::default_for(&registry.ghosts()[0]);
    state.set_field(0, 0, FieldValue::Int(value));
    state
}

/// Runs `ticks` server ticks, delivering each ack `ack_delay` ticks late.
fn run(
    ticks: u32,
    ack_delay: u32,
    server: &mut GhostServer,
    world: &MemoryWorldView,
    receiver: &mut Receiver,
    mut each: impl FnMut(u32, &mut GhostServer),
) {
    let registry = Arc::clone(server.registry());
    let mut in_flight = VecDeque::new();
    for tick in 0..ticks {
        while in_flight.front().is_some_and(|(due, _)| *due <= tick) {
            if let Some((_, ack)) = in_flight.pop_front() {
                server.receive_ack(CONN, &ack).unwrap();
            }
        }
        each(tick, server);
        if let Some(bytes) = server.build_snapshot(CONN, world).unwrap() {
            receiver.receive(&registry, &bytes);
            in_flight.push_back((tick + ack_delay, receiver.acks.to_ack(tick)));
        }
        server.advance_tick();
    }
}

#[test]
fn irrelevant_ghost_is_never_observed() {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = registry();
    let mut server = GhostServer::new(Arc::clone(&registry), ServerConfig::for_testing());
    server.connect(CONN).unwrap();
    server.relevancy_mut().set_mode(RelevancyMode::AllowList);

    let mut world = MemoryWorldView::new();
    let visible = server.spawn_ghost(GhostTypeId::new(0), None).unwrap();
    let hidden = server.spawn_ghost(GhostTypeId::new(0), None).unwrap();
    world.insert(visible, counter(&registry, 1));
    world.insert(hidden, counter(&registry, 2));
    server.relevancy_mut().insert(CONN, visible);

    let mut receiver = Receiver::default();
    run(20, 0, &mut server, &world, &mut receiver, |_, _| {});
    assert_eq!(receiver.frames_seen.get(&visible), Some(&20));
    assert!(!receiver.frames_seen.contains_key(&hidden));
}

#[test]
fn toggled_ghost_is_held_exactly_while_relevant() {
    let _ = env_logger::builder().is_test(true).try_init();
    let registry = registry();
    let mut server = GhostServer::new(Arc::clone(&registry), ServerConfig::for_testing());
    server.connect(CONN).unwrap();
    server.relevancy_mut().set_mode(RelevancyMode::AllowList);

    let mut world = MemoryWorldView::new();
    let id = server.spawn_ghost(GhostTypeId::new(0), None).unwrap();
    world.insert(id, counter(&registry, 5));

    let mut receiver = Receiver::default();
    let mut in_flight = VecDeque::new();
    // Starts irrelevant and flips every tick. Acks take two ticks, so each
    // despawn is still unacknowledged when the ghost becomes relevant again.
    let toggling = 64;
    for tick in 0..toggling + 16 {
        while in_flight.front().is_some_and(|(due, _)| *due <= tick) {
            if let Some((_, ack)) = in_flight.pop_front() {
                server.receive_ack(CONN, &ack).unwrap();
            }
        }
        let relevant = if tick < toggling {
            tick % 2 == 1
        } else {
            tick < toggling + 8
        };
        if relevant {
            server.relevancy_mut().insert(CONN, id);
        } else {
            server.relevancy_mut().remove(CONN, id);
        }

        let mut despawned = Vec::new();
        if let Some(bytes) = server.build_snapshot(CONN, &world).unwrap() {
            despawned = receiver.receive(&registry, &bytes);
            in_flight.push_back((tick + 2, receiver.acks.to_ack(tick)));
        }
        let held = receiver.histories.contains_key(&id);
        assert_eq!(
            held,
            relevant && !despawned.contains(&id),
            "tick {tick}: relevant {relevant}, despawned {despawned:?}"
        );
        server.advance_tick();
    }
    // One spawn every four ticks while toggling, plus the settled stretch.
    let spawns = receiver.spawns.get(&id).copied().unwrap_or(0);
    assert!(spawns >= toggling as usize / 4, "saw {spawns} spawns");
    assert!(!receiver.histories.contains_key(&id));
}

#[test]
fn deltas_track_a_changing_value() {
    let registry = registry();
    let mut server = GhostServer::new(Arc::clone(&registry), ServerConfig::for_testing());
    server.connect(CONN).unwrap();
    let mut world = MemoryWorldView::new();
    let id = server.spawn_ghost(GhostTypeId::new(0), None).unwrap();
    world.insert(id, counter(&registry, 0));

    let mut receiver = Receiver::default();
    let mut values = HashSet::new();
    for tick in 0..30 {
        world.insert(id, counter(&registry, i64::from(tick) * 3));
        if let Some(bytes) = server.build_snapshot(CONN, &world).unwrap() {
            receiver.receive(&registry, &bytes);
            // Every other ack is lost.
            if tick % 2 == 0 {
                server.receive_ack(CONN, &receiver.acks.to_ack(tick)).unwrap();
            }
        }
        let (_, latest) = receiver.histories[&id].latest().unwrap();
        values.insert(latest.fields[0].clone());
        assert_eq!(latest.fields[0], codec::Quantized::Int(i64::from(tick) * 3));
        server.advance_tick();
    }
    assert_eq!(values.len(), 30);
}
