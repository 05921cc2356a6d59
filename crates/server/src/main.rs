use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use voxmap_engine::world::node::content;
use voxmap_engine::world::{BlockPos, LightBank, MapNode, NodeDefs, NodePos};
use voxmap_server::config::{CliArgs, ServerConfig};
use voxmap_server::dashboard::{self, DashboardState, Metrics};
use voxmap_server::event_bus::{self, MapChangeBatch};
use voxmap_server::generator::TerrainGenerator;
use voxmap_server::server_map::{SaveScope, ServerMap};
use voxmap_server::storage::{FileStorage, MemoryStorage};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config_path = args.config_path();
    let mut config = ServerConfig::load(&config_path)?;
    config.apply_cli_overrides(&args);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if args.demo {
        return run_demo(&config);
    }

    tracing::info!("voxmap server, world {}", config.world_dir.display());
    if !config_path.exists() {
        config
            .save(&config_path)
            .context("writing default server config")?;
        tracing::info!("Wrote default config to {}", config_path.display());
    }

    // ── Open the map ───────────────────────────────────────────────────
    let defs = Arc::new(NodeDefs::builtin());
    let metrics = Arc::new(Metrics::new());
    let mut map = ServerMap::new(
        defs,
        Box::new(FileStorage::new(&config.world_dir)),
        Box::new(TerrainGenerator::default()),
        config.seed,
    )?
    .with_metrics(Arc::clone(&metrics));

    let r = config.spawn_radius;
    let start = Instant::now();
    let emerged = map.emerge_area(BlockPos::new(-r, -1, -r), BlockPos::new(r, 1, r), true)?;
    tracing::info!(
        "Spawn area ready: {} blocks emerged in {:.2?}, ground at {:?}",
        emerged,
        start.elapsed(),
        map.find_ground_level(0, 0)
    );

    // Start live dashboard (non-blocking, runs on its own tasks).
    let dashboard = Arc::new(DashboardState::new(metrics));
    dashboard.publish_stats(map.stats());
    let dash = Arc::clone(&dashboard);
    let port = config.dashboard_port;
    tokio::spawn(async move {
        dashboard::server::start(dash, port).await;
    });

    // Map-change event bus. Subscribers never borrow the map.
    let (bus_tx, mut bus_rx) = broadcast::channel::<MapChangeBatch>(event_bus::BUS_CAPACITY);
    event_bus::attach(map.map_mut(), bus_tx);
    tokio::spawn(async move {
        loop {
            match bus_rx.recv().await {
                Ok(batch) => tracing::trace!(
                    "map change {:?} at {:?}, {} blocks",
                    batch.kind,
                    batch.pos,
                    batch.blocks.len()
                ),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event bus subscriber lagged by {} batches", n)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // ── Tick loop with autosave and graceful shutdown ──────────────────
    let tick = Duration::from_millis(config.tick_ms.max(1));
    let mut ticker = tokio::time::interval(tick);
    let mut autosave = tokio::time::interval(Duration::from_secs(config.save_interval_secs.max(1)));
    autosave.tick().await; // first tick is immediate, skip it
    let mut last_tick = Instant::now();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let dtime = last_tick.elapsed().as_secs_f32();
                last_tick = Instant::now();
                map.step(dtime, config.unload_timeout_secs, config.max_liquid_per_tick);
                dashboard.publish_stats(map.stats());
            }
            _ = autosave.tick() => {
                tracing::debug!("Autosaving...");
                map.save(SaveScope::OnlyChanged);
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down...");
                break;
            }
        }
    }

    // ── Save on shutdown ───────────────────────────────────────────────
    tracing::info!("Saving map before exit...");
    let saved = map.save(SaveScope::All);
    tracing::info!("Shutdown save complete: {} blocks written", saved);
    Ok(())
}

/// Generates a small world in memory, edits it, meshes it on the client
/// side and unloads it again.
fn run_demo(config: &ServerConfig) -> Result<()> {
    use voxmap_engine::client::ClientMap;
    use voxmap_server::storage::{decode_block, encode_block};

    tracing::info!("voxmap demo, seed {}", config.seed);
    let defs = Arc::new(NodeDefs::builtin());
    let storage = MemoryStorage::new();
    let mut map = ServerMap::new(
        Arc::clone(&defs),
        Box::new(storage.clone()),
        Box::new(TerrainGenerator::default()),
        config.seed,
    )?;

    let start = Instant::now();
    let emerged = map.emerge_area(BlockPos::new(-2, -1, -2), BlockPos::new(1, 1, 1), true)?;
    tracing::info!("Generated {} blocks in {:.2?}", emerged, start.elapsed());

    // A torch on the ground at the origin.
    let ground = map.find_ground_level(0, 0).unwrap_or(0);
    let torch = NodePos::new(0, ground + 1, 0);
    if map.add_node(torch, MapNode::new(content::TORCH)) {
        let lit = map.map().get_node_no_ex(torch.offset(1, 0, 0));
        tracing::info!(
            "Placed torch at {:?}, neighbour light {}",
            torch,
            lit.light(LightBank::Night)
        );
    }

    // Mirror the spawn column onto a client and mesh it.
    let mut client = ClientMap::new(Arc::clone(&defs));
    client.start().context("starting mesh thread")?;
    let column: Vec<BlockPos> = (-1..=1).map(|y| BlockPos::new(0, y, 0)).collect();
    for &p in &column {
        if let Some(block) = map.map().get_block(p).filter(|b| !b.is_dummy()) {
            let copy = decode_block(p, &encode_block(block)?)?;
            client.map_mut().insert_block(copy);
        }
    }
    for &p in &column {
        client.add_update_mesh_task(p, true);
    }
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut acked = Vec::new();
    while acked.len() < column.len() && Instant::now() < deadline {
        acked.extend(client.install_meshes(16));
        std::thread::sleep(Duration::from_millis(5));
    }
    for &p in &column {
        let faces = client
            .map()
            .get_block(p)
            .and_then(|b| b.mesh_slot().lock().mesh.as_ref().map(|m| m.face_count()))
            .unwrap_or(0);
        tracing::info!("Block {:?}: {} faces", p, faces);
    }
    client.stop();

    let saved = map.save(SaveScope::OnlyChanged);
    let stats = map.step(config.unload_timeout_secs + 1.0, config.unload_timeout_secs, 0);
    tracing::info!(
        "Saved {} blocks, unloaded {}; storage now holds {}",
        saved,
        stats.blocks_unloaded,
        storage.len()
    );
    let snapshot = map.metrics().snapshot();
    tracing::info!("Metrics: {}", serde_json::to_string(&snapshot)?);
    Ok(())
}
