use std::hint::black_box;
use std::sync::Arc;

use client::{ClientConfig, GhostClient, MemoryWorld};
use codec::{ConnectionId, FieldValue, GhostId, GhostState};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use repgraph::{GhostServer, MemoryWorldView, ServerConfig};
use schema::{ComponentType, FieldDef, FieldKind, GhostRegistry, GhostTypeDef, GhostTypeId};

const CONN: ConnectionId = ConnectionId(1);

fn registry() -> Arc<GhostRegistry> {
    Arc::new(
        GhostRegistry::builder()
            .component(ComponentType::single(
                "Transform",
                vec![
                    FieldDef::new("position", FieldKind::float3(100)),
                    FieldDef::new("rotation", FieldKind::quaternion(1000)),
                ],
            ))
            .component(ComponentType::single(
                "Health",
                vec![FieldDef::new("hp", FieldKind::int32())],
            ))
            .ghost(
                GhostTypeDef::new("Mover")
                    .component("Transform")
                    .component("Health"),
            )
            .build()
            .expect("registry"),
    )
}

struct Scene {
    server: GhostServer,
    world: MemoryWorldView,
    ghosts: Vec<GhostId>,
    client: GhostClient,
    client_world: MemoryWorld,
    step: u32,
}

impl Scene {
    fn new(count: usize) -> Self {
        let registry = registry();
        let config = ServerConfig {
            max_snapshot_bytes: 16 * 1024,
            ..ServerConfig::default()
        };
        let mut server = GhostServer::new(Arc::clone(&registry), config);
        server.connect(CONN).expect("connect");
        let layout = registry.ghost(GhostTypeId::new(0)).expect("layout").clone();
        let mut world = MemoryWorldView::new();
        let ghosts = (0..count)
            .map(|_| {
                let id = server.spawn_ghost(layout.id, None).expect("spawn");
                world.insert(id, GhostState::default_for(&layout));
                id
            })
            .collect();
        let client = GhostClient::new(registry, ClientConfig::default());
        Self {
            server,
            world,
            ghosts,
            client,
            client_world: MemoryWorld::new(),
            step: 0,
        }
    }

    /// Moves a quarter of the ghosts and builds one snapshot.
    fn build(&mut self) -> Vec<u8> {
        self.step += 1;
        for (i, id) in self.ghosts.iter().enumerate() {
            if (i as u32 + self.step) % 4 != 0 {
                continue;
            }
            if let Some(state) = self.world.get_mut(*id) {
                let x = self.step as f32 * 0.5 + i as f32;
                state.set_field(0, 0, FieldValue::Float3([x, 1.0, -x]));
            }
        }
        let bytes = self
            .server
            .build_snapshot(CONN, &self.world)
            .expect("build")
            .unwrap_or_default();
        self.server.advance_tick();
        bytes
    }

    fn deliver(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.client
            .receive(&mut self.client_world, bytes, self.step * 16)
            .expect("receive");
        let ack = self.client.ack(self.step * 16);
        self.server.receive_ack(CONN, &ack).expect("ack");
    }
}

fn bench_snapshots(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");
    for count in [16usize, 64, 256] {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("build", count), &count, |b, &count| {
            let mut scene = Scene::new(count);
            b.iter(|| {
                let bytes = scene.build();
                scene.deliver(black_box(&bytes));
            });
        });

        group.bench_with_input(BenchmarkId::new("receive", count), &count, |b, &count| {
            // A first snapshot spawns everything and needs no baselines.
            let mut scene = Scene::new(count);
            let bytes = scene.build();
            let registry = Arc::clone(scene.client.registry());
            b.iter(|| {
                let mut client = GhostClient::new(Arc::clone(&registry), ClientConfig::default());
                let mut world = MemoryWorld::new();
                client
                    .receive(&mut world, black_box(&bytes), 0)
                    .expect("receive");
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_snapshots);
criterion_main!(benches);
