use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bitstream::{BitReader, BitResult, BitWriter};
use channels::{Command, RpcRegistry};
use clap::Parser;
use codec::{ConnectionId, FieldValue, GhostId, GhostState};
use schema::{
    ComponentType, FieldDef, FieldKind, GhostRegistry, GhostTypeDef, SchemaDescriptor, Smoothing,
};
use serde::Serialize;
use sim::{Harness, HarnessConfig, HarnessStats, LinkConditioner, LinkStats};

#[derive(Parser)]
#[command(name = "ghostline-sim", version, about = "ghostline replication simulation")]
struct Cli {
    /// Number of replicated ghosts.
    #[arg(long, default_value_t = 64)]
    ghosts: u32,
    /// Number of connected clients.
    #[arg(long, default_value_t = 2)]
    clients: u32,
    /// Number of ticks to simulate.
    #[arg(long, default_value_t = 300)]
    ticks: u32,
    /// RNG seed for deterministic results.
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// One-way latency in milliseconds.
    #[arg(long, default_value_t = 0)]
    latency_ms: u32,
    /// Jitter in milliseconds.
    #[arg(long, default_value_t = 0)]
    jitter_ms: u32,
    /// Packet loss probability.
    #[arg(long, default_value_t = 0.0)]
    loss: f32,
    /// Fraction of ghosts that move each tick.
    #[arg(long, default_value_t = 0.25)]
    churn: f32,
    /// Output directory for summary.json and descriptor.json.
    #[arg(long, default_value = "target/ghostline-sim")]
    out_dir: PathBuf,
    /// Fail if the average snapshot exceeds this many bytes.
    #[arg(long)]
    max_avg_snapshot_bytes: Option<u64>,
}

#[derive(Debug, Clone)]
struct Buttons(u8);

impl Command for Buttons {
    fn write(&self, writer: &mut BitWriter) -> BitResult<()> {
        writer.write_bits(u64::from(self.0), 8)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(reader: &mut BitReader<'_>) -> BitResult<Self> {
        Ok(Self(reader.read_bits(8)? as u8))
    }
}

#[derive(Debug, Serialize)]
struct ClientSummary {
    connection: u32,
    ghosts_known: usize,
    packets_received: u64,
    packets_dropped: u64,
    downlink: LinkStats,
    uplink: LinkStats,
    commands_arrived: u64,
    commands_duplicated: u64,
}

#[derive(Debug, Serialize)]
struct Summary {
    ghosts: u32,
    ticks: u32,
    seed: u64,
    link: LinkConditioner,
    totals: HarnessStats,
    avg_snapshot_bytes: u64,
    clients: Vec<ClientSummary>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    fs::create_dir_all(&cli.out_dir)
        .with_context(|| format!("create output dir {}", cli.out_dir.display()))?;

    let registry = Arc::new(demo_registry().context("build registry")?);
    let rpc_registry = Arc::new(RpcRegistry::builder().build().context("build rpc registry")?);
    let config = HarnessConfig {
        link: link(&cli),
        seed: cli.seed,
        ..HarnessConfig::default()
    };
    let mut harness: Harness<Buttons> = Harness::new(Arc::clone(&registry), rpc_registry, config);

    let connections: Vec<ConnectionId> = (0..cli.clients).map(ConnectionId).collect();
    for &connection in &connections {
        harness.connect(connection)?;
    }

    let layout = registry
        .ghost(schema::GhostTypeId::new(0))
        .context("demo ghost type")?
        .clone();
    let mut ghosts: Vec<GhostId> = Vec::new();
    for _ in 0..cli.ghosts {
        let id = harness.server.spawn_ghost(layout.id, None)?;
        harness.server_world.insert(id, GhostState::default_for(&layout));
        ghosts.push(id);
    }

    let mut rng = fastrand::Rng::with_seed(cli.seed);
    for tick in 0..cli.ticks {
        for &id in &ghosts {
            if rng.f32() >= cli.churn {
                continue;
            }
            if let Some(state) = harness.server_world.get_mut(id) {
                let position = [rng.f32() * 100.0, 0.0, rng.f32() * 100.0];
                state.set_field(0, 0, FieldValue::Float3(position));
            }
        }
        for &connection in &connections {
            harness.push_command(connection, Buttons(tick.to_le_bytes()[0]))?;
        }
        harness.step()?;
    }

    let summary = summarize(&cli, &harness, &connections);
    if let Some(max) = cli.max_avg_snapshot_bytes {
        anyhow::ensure!(
            summary.avg_snapshot_bytes <= max,
            "average snapshot of {} bytes exceeds {max}",
            summary.avg_snapshot_bytes
        );
    }
    write_summary_json(&cli.out_dir, &summary)?;
    write_descriptor_json(&cli.out_dir, &registry)
}

fn demo_registry() -> schema::SchemaResult<GhostRegistry> {
    GhostRegistry::builder()
        .component(ComponentType::single(
            "Transform",
            vec![
                FieldDef::new("position", FieldKind::float3(100)).smoothing(Smoothing::Interpolate),
                FieldDef::new("rotation", FieldKind::quaternion(1000))
                    .smoothing(Smoothing::Interpolate),
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
}

fn summarize(cli: &Cli, harness: &Harness<Buttons>, connections: &[ConnectionId]) -> Summary {
    let totals = harness.stats();
    let snapshots: u64 = connections
        .iter()
        .filter_map(|&c| harness.server.stats(c))
        .map(|s| s.snapshots_built)
        .sum();
    let clients = connections
        .iter()
        .filter_map(|&connection| {
            let client = harness.client(connection)?;
            let commands = harness.command_stats(connection).unwrap_or_default();
            Some(ClientSummary {
                connection: connection.0,
                ghosts_known: client.ghosts.ghost_count(),
                packets_received: client.ghosts.stats().packets_received,
                packets_dropped: client.ghosts.stats().packets_dropped,
                downlink: client.downlink().stats(),
                uplink: client.uplink().stats(),
                commands_arrived: commands.arrivals,
                commands_duplicated: commands.duplicates,
            })
        })
        .collect();
    Summary {
        ghosts: cli.ghosts,
        ticks: cli.ticks,
        seed: cli.seed,
        link: link(cli),
        totals,
        avg_snapshot_bytes: totals.snapshot_bytes.checked_div(snapshots).unwrap_or(0),
        clients,
    }
}

const fn link(cli: &Cli) -> LinkConditioner {
    LinkConditioner {
        latency_ms: cli.latency_ms,
        jitter_ms: cli.jitter_ms,
        loss: cli.loss,
    }
}

fn write_summary_json(out_dir: &Path, summary: &Summary) -> Result<()> {
    let path = out_dir.join("summary.json");
    let contents = serde_json::to_string_pretty(summary).context("serialize summary")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn write_descriptor_json(out_dir: &Path, registry: &GhostRegistry) -> Result<()> {
    let path = out_dir.join("descriptor.json");
    let descriptor = SchemaDescriptor::from_registry(registry);
    let contents = serde_json::to_string_pretty(&descriptor).context("serialize descriptor")?;
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}
