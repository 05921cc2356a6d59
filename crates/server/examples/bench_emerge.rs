//! Benchmark: generate vs load.
//!
//! Emerges a square of block columns from the generator, saves it, unloads
//! everything and emerges the same area again from storage.
//! Run with: `cargo run --release -p voxmap-server --example bench_emerge`

use std::sync::Arc;
use std::time::Instant;

use voxmap_engine::world::{BlockPos, NodeDefs};
use voxmap_server::generator::TerrainGenerator;
use voxmap_server::server_map::{SaveScope, ServerMap};
use voxmap_server::storage::MemoryStorage;

fn main() -> anyhow::Result<()> {
    let radius = 6;
    let min = BlockPos::new(-radius, -1, -radius);
    let max = BlockPos::new(radius - 1, 1, radius - 1);
    let side = 2 * radius;

    println!("=== voxmap: Emerge Benchmark ===\n");
    println!("  {}x{} columns, 3 blocks high ({} blocks)\n", side, side, side * side * 3);

    let storage = MemoryStorage::new();
    let mut map = ServerMap::new(
        Arc::new(NodeDefs::builtin()),
        Box::new(storage.clone()),
        Box::new(TerrainGenerator::default()),
        1234,
    )?;

    // --- Generate ---
    let t0 = Instant::now();
    let generated = map.emerge_area(min, max, true)?;
    let dt_gen = t0.elapsed();
    println!("  Generate: {:>6} blocks in {:>8.2?}", generated, dt_gen);

    // --- Save ---
    let t0 = Instant::now();
    let saved = map.save(SaveScope::All);
    let dt_save = t0.elapsed();
    println!("  Save:     {:>6} blocks in {:>8.2?}", saved, dt_save);

    let stats = map.step(1.0, 0.0, 0);
    println!("  Unload:   {:>6} blocks", stats.blocks_unloaded);

    // --- Load ---
    let t0 = Instant::now();
    let loaded = map.emerge_area(min, max, false)?;
    let dt_load = t0.elapsed();
    println!("  Load:     {:>6} blocks in {:>8.2?}", loaded, dt_load);

    if dt_load.as_secs_f64() > 0.0 {
        println!("\n  Load is {:.2}x faster than generate", dt_gen.as_secs_f64() / dt_load.as_secs_f64());
    }
    println!("  Storage holds {} blocks", storage.len());

    let m = map.metrics().snapshot();
    if m.blocks_loaded as usize == loaded && m.corrupt_blocks == 0 {
        println!("  Verification: PASS");
    } else {
        println!(
            "  Verification: FAIL (loaded {} of {}, {} corrupt)",
            m.blocks_loaded, loaded, m.corrupt_blocks
        );
    }
    Ok(())
}
