use std::sync::Arc;

use client::{
    ClientConfig, ClientError, GhostClient, GhostWorld, LocalEntity, MemoryWorld,
    PredictionSwitchQueue, TickProximityClassifier,
};
use codec::{ConnectionId, FieldValue, GhostId, GhostState, NetworkTick};
use repgraph::{GhostServer, MemoryWorldView, RelevancyMode, ServerConfig};
use schema::{
    ComponentType, FieldDef, FieldKind, FieldPath, GhostMode, GhostRegistry, GhostTypeDef,
    GhostTypeId, Representation, Smoothing,
};

const CONN: ConnectionId = ConnectionId(3);
const UNIT: GhostTypeId = GhostTypeId::new(0);
const POINTER: GhostTypeId = GhostTypeId::new(1);
const BULLET: GhostTypeId = GhostTypeId::new(2);
const AVATAR: GhostTypeId = GhostTypeId::new(3);

fn registry() -> Arc<GhostRegistry> {
    Arc::new(
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Health",
                vec![FieldDef::new("hp", FieldKind::int32())],
            ))
            .component(ComponentType::single(
                "Link",
                vec![FieldDef::new("target", FieldKind::Entity)],
            ))
            .component(ComponentType::single(
                "Pos",
                vec![FieldDef::new("p", FieldKind::float3(100)).smoothing(Smoothing::Interpolate)],
            ))
            .ghost(GhostTypeDef::new("Unit").component("Health").component("Pos"))
            .ghost(GhostTypeDef::new("Pointer").component("Link"))
            .ghost(
                GhostTypeDef::new("Bullet")
                    .component("Pos")
                    .mode(GhostMode::Predicted),
            )
            .ghost(
                GhostTypeDef::new("Avatar")
                    .component("Health")
                    .component("Pos")
                    .mode(GhostMode::OwnerPredicted)
                    .transform(FieldPath::root("Pos", "p")),
            )
            .build()
            .unwrap(),
    )
}

struct Session {
    registry: Arc<GhostRegistry>,
    server: GhostServer,
    server_world: MemoryWorldView,
    client: GhostClient,
    world: MemoryWorld,
    now_ms: u32,
}

impl Session {
    fn new(client_config: ClientConfig) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let registry = registry();
        let mut server = GhostServer::new(Arc::clone(&registry), ServerConfig::for_testing());
        server.connect(CONN).unwrap();
        let client = GhostClient::new(Arc::clone(&registry), client_config);
        Self {
            registry,
            server,
            server_world: MemoryWorldView::new(),
            client,
            world: MemoryWorld::new(),
            now_ms: 0,
        }
    }

    fn spawn(&mut self, ghost_type: GhostTypeId, owner: Option<ConnectionId>) -> GhostId {
        let id = self.server.spawn_ghost(ghost_type, owner).unwrap();
        let layout = self.registry.ghost(ghost_type).unwrap();
        self.server_world.insert(id, GhostState::default_for(layout));
        id
    }

    fn set(&mut self, id: GhostId, slot: usize, value: FieldValue) {
        self.server_world.get_mut(id).unwrap().set_field(slot, 0, value);
    }

    fn step(&mut self) {
        if let Some(bytes) = self.server.build_snapshot(CONN, &self.server_world).unwrap() {
            self.client
                .receive(&mut self.world, &bytes, self.now_ms)
                .unwrap();
            let ack = self.client.ack(self.now_ms);
            self.server.receive_ack(CONN, &ack).unwrap();
        }
        self.client.update(&mut self.world, 1.0).unwrap();
        self.server.advance_tick();
        self.now_ms += 16;
    }

    fn run(&mut self, ticks: usize) {
        for _ in 0..ticks {
            self.step();
        }
    }

    fn client_field(&self, id: GhostId, slot: usize) -> Option<FieldValue> {
        let entity = self.client.entity(id)?;
        self.world.field(entity, slot, 0).cloned()
    }
}

#[test]
fn spawn_update_despawn() {
    let mut s = Session::new(ClientConfig::for_testing());
    let id = s.spawn(UNIT, None);
    s.set(id, 0, FieldValue::Int(100));
    s.run(2);
    assert_eq!(s.client_field(id, 0), Some(FieldValue::Int(100)));

    s.set(id, 0, FieldValue::Int(60));
    s.run(6);
    assert_eq!(s.client_field(id, 0), Some(FieldValue::Int(60)));

    let entity = s.client.entity(id).unwrap();
    s.server.despawn_ghost(id).unwrap();
    s.server_world.remove(id);
    s.run(2);
    assert!(!s.world.exists(entity));
    assert_eq!(s.client.ghost_count(), 0);
    assert_eq!(s.client.stats().ghosts_despawned, 1);
}

#[test]
fn entity_references_resolve_only_while_the_referent_exists() {
    let mut s = Session::new(ClientConfig::for_testing());
    s.server.relevancy_mut().set_mode(RelevancyMode::AllowList);
    let target = s.spawn(UNIT, None);
    let pointer = s.spawn(POINTER, None);
    let reference = s.server.ghost_ref(target).unwrap();
    s.set(pointer, 0, FieldValue::Entity(Some(reference)));
    s.server.relevancy_mut().insert(CONN, pointer);

    s.run(6);
    assert_eq!(s.client_field(pointer, 0), Some(FieldValue::Entity(None)));
    assert_eq!(s.client.resolve(reference), None);

    s.server.relevancy_mut().insert(CONN, target);
    s.run(6);
    assert_eq!(
        s.client_field(pointer, 0),
        Some(FieldValue::Entity(Some(reference)))
    );
    assert_eq!(s.client.resolve(reference), s.client.entity(target));

    s.server.despawn_ghost(target).unwrap();
    s.server_world.remove(target);
    s.run(2);
    assert_eq!(s.client_field(pointer, 0), Some(FieldValue::Entity(None)));
}

#[test]
fn prespawned_ghost_waits_for_its_scene() {
    let mut s = Session::new(ClientConfig::for_testing());
    let scene = 0xFEED;
    let range = s.server.reserve_prespawn_scene(scene, 2).unwrap();
    let id = s.server.spawn_prespawned(scene, 1, UNIT).unwrap();
    let layout = s.registry.ghost(UNIT).unwrap().clone();
    s.server_world.insert(id, GhostState::default_for(&layout));
    s.set(id, 0, FieldValue::Int(7));

    s.run(3);
    assert_eq!(s.client.ghost_count(), 1);
    assert_eq!(s.client.entity(id), None);

    let scene_entities: Vec<LocalEntity> = (0..2)
        .map(|_| s.world.spawn(&layout, Representation::Interpolated))
        .collect();
    s.client.register_prespawn_range(range.first, &scene_entities);
    s.run(1);
    assert_eq!(s.client.entity(id), Some(scene_entities[1]));
    assert_eq!(s.client_field(id, 0), Some(FieldValue::Int(7)));
}

#[test]
fn predicted_spawn_is_claimed_by_the_server_ghost() {
    let mut s = Session::new(ClientConfig::for_testing());
    s.client.add_classifier(Box::new(TickProximityClassifier {
        max_tick_distance: 3,
    }));
    let layout = s.registry.ghost(BULLET).unwrap().clone();
    let local = s.world.spawn(&layout, Representation::Predicted);
    s.client
        .register_predicted_spawn(local, BULLET, NetworkTick::new(1));

    let id = s.spawn(BULLET, None);
    s.run(2);
    assert_eq!(s.client.entity(id), Some(local));
    assert_eq!(s.client.stats().predicted_spawns_claimed, 1);
    assert!(s.client.pending_predicted_spawns().is_empty());
    assert_eq!(s.world.len(), 1);
}

#[test]
fn unclaimed_predicted_spawn_times_out() {
    let mut s = Session::new(ClientConfig::for_testing());
    let layout = s.registry.ghost(BULLET).unwrap().clone();
    let local = s.world.spawn(&layout, Representation::Predicted);
    s.client
        .register_predicted_spawn(local, BULLET, NetworkTick::new(0));

    let id = s.spawn(UNIT, None);
    s.set(id, 0, FieldValue::Int(1));
    s.run(12);
    assert!(!s.world.exists(local));
    assert_eq!(s.client.stats().predicted_spawns_expired, 1);
}

#[test]
fn owner_predicted_ghost_follows_ownership() {
    let mut config = ClientConfig::for_testing();
    config.local_connection = Some(CONN);
    let mut s = Session::new(config);
    let mine = s.spawn(AVATAR, Some(CONN));
    let theirs = s.spawn(AVATAR, Some(ConnectionId(99)));
    s.run(2);

    let mine_entity = s.client.entity(mine).unwrap();
    let theirs_entity = s.client.entity(theirs).unwrap();
    assert_eq!(
        s.world.representation(mine_entity),
        Some(Representation::Predicted)
    );
    assert_eq!(
        s.world.representation(theirs_entity),
        Some(Representation::Interpolated)
    );
    let state = s.client.prediction_state(mine_entity).unwrap();
    assert_eq!(state.predicted_since(), Some(NetworkTick::new(0)));
}

#[test]
fn switching_to_predicted_bounds_resimulation() {
    let mut s = Session::new(ClientConfig::for_testing());
    let id = s.spawn(AVATAR, None);
    s.set(id, 1, FieldValue::Float3([1.0, 2.0, 3.0]));
    s.run(4);
    let entity = s.client.entity(id).unwrap();

    let mut queue = PredictionSwitchQueue::new();
    queue.to_predicted(entity, 3);
    queue.to_interpolated(entity, 0);
    queue.to_predicted(entity, 3);
    s.client
        .apply_prediction_switches(&mut s.world, &mut queue, NetworkTick::new(20));
    assert_eq!(s.world.representation(entity), Some(Representation::Predicted));

    let state = s.client.prediction_state(entity).unwrap();
    assert_eq!(
        state.resimulation_start(NetworkTick::new(10)),
        Some(NetworkTick::new(20))
    );

    s.run(4);
    assert_eq!(
        s.client_field(id, 1),
        Some(FieldValue::Float3([1.0, 2.0, 3.0]))
    );
}

#[test]
fn duplicate_and_reordered_packets_are_harmless() {
    let mut s = Session::new(ClientConfig::for_testing());
    let id = s.spawn(UNIT, None);
    let mut packets = Vec::new();
    for hp in 0..4 {
        s.set(id, 0, FieldValue::Int(hp));
        let bytes = s
            .server
            .build_snapshot(CONN, &s.server_world)
            .unwrap()
            .unwrap();
        packets.push(bytes);
        s.server.advance_tick();
    }

    let mut world = MemoryWorld::new();
    for index in [0, 2, 2, 1, 3, 0] {
        s.client.receive(&mut world, &packets[index], 0).unwrap();
    }
    let (tick, state) = s.client.latest_snapshot(id).unwrap().unwrap();
    assert_eq!(tick, NetworkTick::new(3));
    assert_eq!(state.field(0, 0), Some(&FieldValue::Int(3)));
}

#[test]
fn schema_mismatch_is_protocol_fatal() {
    let mut s = Session::new(ClientConfig::for_testing());
    let other = Arc::new(
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Health",
                vec![FieldDef::new("hp", FieldKind::int64())],
            ))
            .ghost(GhostTypeDef::new("Unit").component("Health"))
            .build()
            .unwrap(),
    );
    let mut client = GhostClient::new(other, ClientConfig::for_testing());
    s.spawn(UNIT, None);
    let bytes = s
        .server
        .build_snapshot(CONN, &s.server_world)
        .unwrap()
        .unwrap();
    let err = client.receive(&mut s.world, &bytes, 0).unwrap_err();
    assert!(matches!(err, ClientError::ProtocolMismatch { .. }));
    assert_eq!(client.stats().packets_dropped, 1);
}
