//! The authoritative map: blocks come from memory, storage or the
//! generator, and go back to storage before they are unloaded.

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use rayon::prelude::*;
use tracing::{debug, error, info, trace, warn};

use voxmap_engine::MapError;
use voxmap_engine::world::block::GroundLevel;
use voxmap_engine::world::{
    BlockPos, MAP_BLOCKSIZE, ManualMapVoxelManipulator, Map, MapBlock, MapEditEvent, MapEditEventKind, MapHooks,
    MapNode, MapSector, ModState, ModifiedBlocks, NodeDefs, NodePos, SectorPos, UnloadStats,
};

use crate::dashboard::{MapStats, Metrics};
use crate::generator::{BlockGenerator, BlockMakeData};
use crate::storage::{self, BlockStorage, LoadOutcome, MapMeta};

/// Persistence side of the server map.
pub struct ServerHooks {
    storage: Box<dyn BlockStorage>,
    saving_enabled: bool,
}

impl MapHooks for ServerHooks {
    fn persists(&self) -> bool {
        self.saving_enabled
    }

    fn save_block(&mut self, block: &MapBlock) -> Result<(), MapError> {
        let data = storage::encode_block(block)?;
        self.storage.write(block.pos(), &data)?;
        trace!("saved block {:?} ({} bytes)", block.pos(), data.len());
        Ok(())
    }

    fn block_unloaded(&mut self, pos: BlockPos) {
        trace!("unloaded block {:?}", pos);
    }
}

/// Where [`ServerMap::emerge_block`] found the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Already in memory.
    InMemory,
    Loaded,
    Generated,
    /// Nothing stored and generation not allowed: a placeholder without
    /// data now stands in for it.
    Dummy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveScope {
    /// Blocks at [`ModState::WriteNeeded`].
    OnlyChanged,
    All,
}

pub struct ServerMap {
    map: Map<ServerHooks>,
    generator: Box<dyn BlockGenerator>,
    seed: u64,
    meta_changed: bool,
    metrics: Arc<Metrics>,
}

impl ServerMap {
    /// Opens the map in `storage`. A stored seed wins over `seed`.
    pub fn new(
        defs: Arc<NodeDefs>,
        storage: Box<dyn BlockStorage>,
        generator: Box<dyn BlockGenerator>,
        seed: u64,
    ) -> Result<Self> {
        let meta = Self::load_map_meta(storage.as_ref())?;
        let (seed, meta_changed) = match meta {
            Some(meta) => {
                info!("Loaded map meta, seed {}", meta.seed);
                (meta.seed, false)
            }
            None => {
                info!("New map, seed {}", seed);
                (seed, true)
            }
        };
        let hooks = ServerHooks {
            storage,
            saving_enabled: true,
        };
        Ok(Self {
            map: Map::new(defs, hooks),
            generator,
            seed,
            meta_changed,
            metrics: Arc::new(Metrics::new()),
        })
    }

    /// Shares `metrics` with the dashboard.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn map(&self) -> &Map<ServerHooks> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Map<ServerHooks> {
        &mut self.map
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn is_saving_enabled(&self) -> bool {
        self.map.hooks().saving_enabled
    }

    /// With saving off, nothing is written and modified blocks are simply
    /// dropped when they time out.
    pub fn set_saving_enabled(&mut self, enabled: bool) {
        self.map.hooks_mut().saving_enabled = enabled;
    }

    // ── Creation ────────────────────────────────────────────────────

    pub fn create_sector(&mut self, p: SectorPos) -> &mut MapSector {
        self.map.create_sector(p)
    }

    /// The block at `p`, allocating an empty one (all unknown nodes) if it
    /// is missing or a dummy.
    pub fn create_block(&mut self, p: BlockPos) -> Result<&mut MapBlock, MapError> {
        if p.over_limit() {
            return Err(MapError::InvalidPosition(p.origin()));
        }
        let exists = self.map.get_block(p).is_some();
        if !exists {
            return Ok(self.map.insert_block(MapBlock::new(p)));
        }
        let block = self.map.get_block_mut(p).ok_or(MapError::NotFound(p))?;
        if block.is_dummy() {
            block.undummify();
        }
        Ok(block)
    }

    // ── Loading ─────────────────────────────────────────────────────

    /// Reads `p` from storage into memory. False if nothing usable was
    /// stored; corrupt data is logged and treated as absent.
    pub fn load_block(&mut self, p: BlockPos) -> bool {
        match storage::load_block(self.map.hooks().storage.as_ref(), p) {
            LoadOutcome::Present(block) => {
                let relight = block.lighting_expired();
                self.map.insert_block(block);
                if relight {
                    let mut modified = ModifiedBlocks::new();
                    self.map.update_lighting_both(&ModifiedBlocks::from([p]), &mut modified);
                }
                self.metrics.block_loaded();
                debug!("Loaded block {:?}", p);
                true
            }
            LoadOutcome::Corrupt(reason) => {
                warn!("Block {:?} is unreadable, regenerating: {}", p, reason);
                self.metrics.block_corrupt();
                false
            }
            LoadOutcome::Absent => false,
        }
    }

    // ── Generation ──────────────────────────────────────────────────

    /// Allocates `p` and emerges it with its neighbours for a generator.
    pub fn init_block_make(&mut self, p: BlockPos) -> Result<BlockMakeData, MapError> {
        self.create_block(p)?;
        let mut vmanip = ManualMapVoxelManipulator::new();
        vmanip.initial_emerge(&self.map, p.offset(-1, -1, -1), p.offset(1, 1, 1));
        Ok(BlockMakeData {
            blockpos: p,
            seed: self.seed,
            vmanip,
            underground: false,
        })
    }

    /// Writes generated nodes back, marks the block generated and lights it
    /// together with neighbours whose light is stale.
    pub fn finish_block_make(
        &mut self,
        mut data: BlockMakeData,
        modified: &mut ModifiedBlocks,
    ) -> Result<(), MapError> {
        let p = data.blockpos;
        data.vmanip.blit_back_all(&mut self.map, modified);

        let block = self.map.get_block_mut(p).ok_or(MapError::NotFound(p))?;
        block.set_underground(data.underground);
        block.set_generated(true);
        block.set_lighting_expired(true);

        let mut relight = ModifiedBlocks::from([p]);
        relight.extend(p.neighbors().into_iter().filter(|&q| {
            self.map
                .get_block(q)
                .is_some_and(|b| !b.is_dummy() && b.lighting_expired())
        }));
        self.map.update_lighting_both(&relight, modified);

        let mut event = MapEditEvent::new(MapEditEventKind::Other, p.origin());
        event.modified_blocks = modified.clone();
        self.map.dispatch_event(&event);
        Ok(())
    }

    pub fn generate_block(&mut self, p: BlockPos, modified: &mut ModifiedBlocks) -> Result<(), MapError> {
        let start = Instant::now();
        let mut data = self.init_block_make(p)?;
        self.generator.make_block(&mut data);
        self.finish_block_make(data, modified)?;
        self.metrics.block_generated();
        debug!("Generated block {:?} ({:.2?})", p, start.elapsed());
        Ok(())
    }

    /// Makes sure `p` is in memory: from memory, storage, or (if allowed)
    /// the generator. Otherwise leaves a dummy in its place.
    pub fn emerge_block(&mut self, p: BlockPos, allow_generate: bool) -> Result<BlockStatus, MapError> {
        if p.over_limit() {
            return Err(MapError::InvalidPosition(p.origin()));
        }
        if let Some(block) = self.map.get_block_mut(p).filter(|b| !b.is_dummy()) {
            block.reset_usage_timer();
            return Ok(BlockStatus::InMemory);
        }

        if self.load_block(p) {
            let generated = self.map.get_block(p).is_some_and(|b| b.is_generated());
            if generated || !allow_generate {
                return Ok(BlockStatus::Loaded);
            }
        }

        if allow_generate {
            let mut modified = ModifiedBlocks::new();
            self.generate_block(p, &mut modified)?;
            return Ok(BlockStatus::Generated);
        }

        if self.map.get_block(p).is_none() {
            self.map.insert_block(MapBlock::new_dummy(p));
        }
        Ok(BlockStatus::Dummy)
    }

    /// Emerges every block in `min..=max`. Returns how many were not
    /// already in memory.
    pub fn emerge_area(&mut self, min: BlockPos, max: BlockPos, allow_generate: bool) -> Result<usize, MapError> {
        let mut emerged = 0;
        for p in BlockPos::range_inclusive(min, max) {
            if self.emerge_block(p, allow_generate)? != BlockStatus::InMemory {
                emerged += 1;
            }
        }
        Ok(emerged)
    }

    // ── Saving ──────────────────────────────────────────────────────

    /// Writes every block that needs an immediate write (or, with
    /// [`SaveScope::All`], every non-dummy block). Blocks that only need a
    /// write at unload are left to the unload sweep. Blocks are encoded in
    /// parallel and written one by one; a failed write is logged and the
    /// block stays modified. Returns how many blocks were written.
    pub fn save(&mut self, scope: SaveScope) -> usize {
        if !self.is_saving_enabled() {
            debug!("Saving disabled, skipping save");
            return 0;
        }
        if self.meta_changed {
            if let Err(e) = self.save_map_meta() {
                error!("Saving map meta failed: {:#}", e);
            }
        }

        let start = Instant::now();
        let targets: Vec<&MapBlock> = self
            .map
            .blocks()
            .filter(|b| !b.is_dummy())
            .filter(|b| match scope {
                SaveScope::All => true,
                SaveScope::OnlyChanged => b.modified() == ModState::WriteNeeded,
            })
            .collect();
        if targets.is_empty() {
            debug!("Map save: nothing to save");
            return 0;
        }
        let encoded: Vec<(BlockPos, Result<Vec<u8>, MapError>)> = targets
            .par_iter()
            .map(|b| (b.pos(), storage::encode_block(b)))
            .collect();

        let mut saved = 0usize;
        let mut failed = 0usize;
        for (pos, data) in encoded {
            let written = data
                .with_context(|| format!("encoding block {pos:?}"))
                .and_then(|d| {
                    self.map
                        .hooks()
                        .storage
                        .write(pos, &d)
                        .with_context(|| format!("writing block {pos:?}"))
                });
            match written {
                Ok(()) => {
                    if let Some(block) = self.map.get_block_mut(pos) {
                        block.reset_modified();
                    }
                    saved += 1;
                }
                Err(e) => {
                    error!("Map save: {:#}", e);
                    failed += 1;
                }
            }
        }

        self.metrics.blocks_saved(saved as u64);
        self.metrics.save_failed(failed as u64);
        info!(
            "Map saved: {} blocks, {} failed ({:.2?})",
            saved,
            failed,
            start.elapsed()
        );
        saved
    }

    /// Writes one block now. False if it is not in memory or a dummy.
    pub fn save_block(&mut self, p: BlockPos) -> Result<bool> {
        let Some(block) = self.map.get_block(p).filter(|b| !b.is_dummy()) else {
            return Ok(false);
        };
        let data = storage::encode_block(block).with_context(|| format!("encoding block {p:?}"))?;
        self.map
            .hooks()
            .storage
            .write(p, &data)
            .with_context(|| format!("writing block {p:?}"))?;
        if let Some(block) = self.map.get_block_mut(p) {
            block.reset_modified();
        }
        self.metrics.blocks_saved(1);
        Ok(true)
    }

    pub fn save_map_meta(&mut self) -> Result<()> {
        let meta = MapMeta { seed: self.seed };
        let bytes = serde_json::to_vec_pretty(&meta).context("serializing map meta")?;
        self.map
            .hooks()
            .storage
            .write_meta(&bytes)
            .context("writing map meta")?;
        self.meta_changed = false;
        Ok(())
    }

    fn load_map_meta(storage: &dyn BlockStorage) -> Result<Option<MapMeta>> {
        let Some(bytes) = storage.read_meta().context("reading map meta")? else {
            return Ok(None);
        };
        let meta = serde_json::from_slice(&bytes).context("parsing map meta")?;
        Ok(Some(meta))
    }

    // ── Queries and edits ───────────────────────────────────────────

    /// Y of the highest ground node in column `(x, z)` among the loaded
    /// blocks, if any.
    pub fn find_ground_level(&self, x: i32, z: i32) -> Option<i32> {
        let column = NodePos::new(x, 0, z);
        let local = column.local();
        let sector = self.map.get_sector(column.block().sector())?;
        let mut blocks: Vec<&MapBlock> = sector.blocks().filter(|b| !b.is_dummy()).collect();
        blocks.sort_by_key(|b| Reverse(b.pos().y));

        let defs = self.map.defs();
        for block in blocks {
            let base = block.pos_relative().y;
            match block.get_ground_level(defs, local.x, local.z) {
                Ok(GroundLevel::AllAir) => continue,
                Ok(GroundLevel::AtTop) => return Some(base + MAP_BLOCKSIZE - 1),
                Ok(GroundLevel::At(y)) => return Some(base + y),
                Err(_) => continue,
            }
        }
        None
    }

    pub fn add_node(&mut self, p: NodePos, n: MapNode) -> bool {
        let placed = self.map.add_node_with_event(p, n);
        if placed {
            self.metrics.edit();
        }
        placed
    }

    pub fn remove_node(&mut self, p: NodePos) -> bool {
        let removed = self.map.remove_node_with_event(p);
        if removed {
            self.metrics.edit();
        }
        removed
    }

    // ── Ticking ─────────────────────────────────────────────────────

    /// One server step: metadata timers, queued liquid updates, then the
    /// unload sweep.
    pub fn step(&mut self, dtime: f32, unload_timeout: f32, max_liquid_nodes: usize) -> UnloadStats {
        self.map.node_metadata_step_with_events(dtime);

        let mut modified = ModifiedBlocks::new();
        self.map.transform_liquids(&mut modified, max_liquid_nodes);
        if let Some(&first) = modified.first() {
            let mut event = MapEditEvent::new(MapEditEventKind::Other, first.origin());
            event.modified_blocks = modified;
            self.map.dispatch_event(&event);
        }

        let start = Instant::now();
        let stats = self.map.timer_update(dtime, unload_timeout, None);
        self.metrics.record_sweep(&stats, start.elapsed());
        if stats.blocks_unloaded > 0 || stats.save_failures > 0 {
            info!(
                "Unloaded {} blocks, {} sectors ({} saved, {} failed)",
                stats.blocks_unloaded, stats.sectors_unloaded, stats.blocks_saved, stats.save_failures
            );
        }
        stats
    }

    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            seed: self.seed,
            sectors: self.map.sector_count(),
            liquid_queue: self.map.liquid_queue_len(),
            ..MapStats::default()
        };
        for block in self.map.blocks() {
            stats.blocks += 1;
            if block.is_dummy() {
                stats.dummies += 1;
            } else if block.modified() != ModState::Clean {
                stats.modified += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::TerrainGenerator;
    use crate::storage::MemoryStorage;
    use voxmap_engine::world::node::content;
    use voxmap_engine::world::{LIGHT_SUN, LightBank};

    fn flat_map(storage: &MemoryStorage) -> ServerMap {
        ServerMap::new(
            Arc::new(NodeDefs::builtin()),
            Box::new(storage.clone()),
            Box::new(TerrainGenerator::flat(4)),
            7,
        )
        .unwrap()
    }

    #[test]
    fn create_block_rejects_positions_past_the_limit() {
        let mut map = flat_map(&MemoryStorage::new());
        assert!(matches!(
            map.create_block(BlockPos::new(5000, 0, 0)),
            Err(MapError::InvalidPosition(_))
        ));
        assert!(map.create_block(BlockPos::new(1, 0, 0)).unwrap().is_valid());
    }

    #[test]
    fn generated_surface_is_sunlit() {
        let mut map = flat_map(&MemoryStorage::new());
        map.emerge_block(BlockPos::new(0, 0, 0), true).unwrap();
        let n = map.map().get_node(NodePos::new(3, 5, 3)).unwrap();
        assert_eq!(n.content, content::AIR);
        assert_eq!(n.light(LightBank::Day), LIGHT_SUN);
        assert_eq!(map.find_ground_level(3, 3), Some(4));
    }

    #[test]
    fn stored_seed_wins() {
        let storage = MemoryStorage::new();
        let mut first = flat_map(&storage);
        first.save(SaveScope::All);
        let second = ServerMap::new(
            Arc::new(NodeDefs::builtin()),
            Box::new(storage.clone()),
            Box::new(TerrainGenerator::flat(4)),
            99,
        )
        .unwrap();
        assert_eq!(second.seed(), 7);
    }

    #[test]
    fn disabled_saving_writes_nothing() {
        let storage = MemoryStorage::new();
        let mut map = flat_map(&storage);
        map.set_saving_enabled(false);
        map.emerge_block(BlockPos::new(0, 0, 0), true).unwrap();
        assert_eq!(map.save(SaveScope::All), 0);
        let stats = map.step(100.0, 1.0, 100);
        assert_eq!(stats.blocks_unloaded, 1);
        assert!(storage.is_empty());
    }
}
