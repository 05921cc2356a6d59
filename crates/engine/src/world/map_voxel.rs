//! Voxel manipulators that load from and write back to a [`Map`].

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use tracing::trace;

use super::event::ModifiedBlocks;
use super::hooks::MapHooks;
use super::map::Map;
use super::position::{BlockPos, NodePos};
use super::voxel::{VoxelArea, VoxelManipulator};

/// Pulls whole blocks into a staging buffer on demand.
///
/// Blocks the map does not have are flagged inexistent, so writes there
/// are never blitted back.
#[derive(Debug, Default)]
pub struct MapVoxelManipulator {
    vm: VoxelManipulator,
    /// Emerged blocks and whether the map had data for them.
    loaded_blocks: BTreeMap<BlockPos, bool>,
}

impl MapVoxelManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes sure every block overlapping `area` has been emerged.
    /// `caller_id` only tags the trace output.
    pub fn emerge<H: MapHooks>(&mut self, map: &Map<H>, area: VoxelArea, caller_id: Option<u32>) {
        if area.is_empty() {
            return;
        }
        let mut fetched = 0;
        for bp in BlockPos::range_inclusive(area.min.block(), area.max.block()) {
            if self.loaded_blocks.contains_key(&bp) {
                continue;
            }
            let exists = match map.get_block(bp) {
                Some(block) if !block.is_dummy() => {
                    block.copy_to(&mut self.vm);
                    true
                }
                _ => {
                    self.vm.mark_inexistent(VoxelArea::of_block(bp));
                    false
                }
            };
            self.loaded_blocks.insert(bp, exists);
            fetched += 1;
        }
        trace!("emerge {:?} for caller {:?}: {} new blocks", area, caller_id, fetched);
    }

    /// Writes every dirty voxel back to the block it came from, raising
    /// touched blocks to `WriteNeeded`. Voxels that were never present
    /// are skipped.
    pub fn blit_back<H: MapHooks>(&mut self, map: &mut Map<H>, modified: &mut ModifiedBlocks) {
        let dirty: Vec<NodePos> = self.vm.dirty_positions().collect();
        for p in dirty {
            let bp = p.block();
            if self.loaded_blocks.get(&bp) != Some(&true) {
                continue;
            }
            let Some(n) = self.vm.get(p) else {
                continue;
            };
            if let Some(block) = map.get_block_mut(bp) {
                if block.set_node(p.local(), n).is_ok() {
                    modified.insert(bp);
                }
            }
        }
        self.vm.clear_dirty();
    }

    pub fn loaded_blocks(&self) -> &BTreeMap<BlockPos, bool> {
        &self.loaded_blocks
    }
}

impl Deref for MapVoxelManipulator {
    type Target = VoxelManipulator;

    fn deref(&self) -> &VoxelManipulator {
        &self.vm
    }
}

impl DerefMut for MapVoxelManipulator {
    fn deref_mut(&mut self) -> &mut VoxelManipulator {
        &mut self.vm
    }
}

/// Staging buffer for generation: a fixed box of blocks is emerged up
/// front, and written back block by block at the end.
///
/// Blocks missing at emerge time stay flagged not backed by data, but a
/// block the map gained in the meantime (the one being generated) still
/// receives the voxels written to it.
#[derive(Debug, Default)]
pub struct ManualMapVoxelManipulator {
    vm: VoxelManipulator,
    loaded_blocks: BTreeMap<BlockPos, bool>,
}

impl ManualMapVoxelManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emerges every block in `min..=max` (block coordinates).
    pub fn initial_emerge<H: MapHooks>(&mut self, map: &Map<H>, min: BlockPos, max: BlockPos) {
        self.vm.add_area(VoxelArea::new(min.origin(), VoxelArea::of_block(max).max));
        for bp in BlockPos::range_inclusive(min, max) {
            if self.loaded_blocks.contains_key(&bp) {
                continue;
            }
            let exists = match map.get_block(bp) {
                Some(block) if !block.is_dummy() => {
                    block.copy_to(&mut self.vm);
                    true
                }
                _ => false,
            };
            self.loaded_blocks.insert(bp, exists);
        }
    }

    /// Writes the dirty voxels of every emerged block that now exists in
    /// the map. Touched blocks are raised to `WriteNeeded`.
    pub fn blit_back_all<H: MapHooks>(&mut self, map: &mut Map<H>, modified: &mut ModifiedBlocks) {
        let mut per_block: BTreeMap<BlockPos, Vec<NodePos>> = BTreeMap::new();
        for p in self.vm.dirty_positions() {
            let bp = p.block();
            if self.loaded_blocks.contains_key(&bp) {
                per_block.entry(bp).or_default().push(p);
            }
        }
        for (bp, positions) in per_block {
            let Some(block) = map.get_block_mut(bp).filter(|b| !b.is_dummy()) else {
                continue;
            };
            for p in positions {
                if let Some(n) = self.vm.get(p) {
                    let _ = block.set_node(p.local(), n);
                }
            }
            modified.insert(bp);
        }
        self.vm.clear_dirty();
    }

    pub fn loaded_blocks(&self) -> &BTreeMap<BlockPos, bool> {
        &self.loaded_blocks
    }
}

impl Deref for ManualMapVoxelManipulator {
    type Target = VoxelManipulator;

    fn deref(&self) -> &VoxelManipulator {
        &self.vm
    }
}

impl DerefMut for ManualMapVoxelManipulator {
    fn deref_mut(&mut self) -> &mut VoxelManipulator {
        &mut self.vm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::{MapBlock, ModState};
    use crate::world::node::{MapNode, NodeDefs, content};
    use std::sync::Arc;

    fn one_block_map() -> Map {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        let mut block = MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::new(content::STONE));
        block.reset_modified();
        map.insert_block(block);
        map
    }

    #[test]
    fn emerge_flags_missing_blocks() {
        let map = one_block_map();
        let mut vm = MapVoxelManipulator::new();
        vm.emerge(&map, VoxelArea::new(NodePos::new(10, 0, 0), NodePos::new(20, 0, 0)), Some(1));

        assert_eq!(vm.get(NodePos::new(10, 0, 0)).unwrap().content, content::STONE);
        assert_eq!(vm.get(NodePos::new(20, 0, 0)), None);
        assert_eq!(vm.loaded_blocks().get(&BlockPos::new(1, 0, 0)), Some(&false));
    }

    #[test]
    fn blit_back_writes_only_present_dirty_voxels() {
        let mut map = one_block_map();
        let mut vm = MapVoxelManipulator::new();
        vm.emerge(&map, VoxelArea::new(NodePos::new(0, 0, 0), NodePos::new(31, 0, 0)), None);

        vm.set(NodePos::new(3, 0, 0), MapNode::AIR);
        vm.set(NodePos::new(20, 0, 0), MapNode::AIR);
        let mut modified = ModifiedBlocks::new();
        vm.blit_back(&mut map, &mut modified);

        assert_eq!(map.get_node(NodePos::new(3, 0, 0)).unwrap().content, content::AIR);
        assert_eq!(map.get_node(NodePos::new(4, 0, 0)).unwrap().content, content::STONE);
        assert!(map.get_block(BlockPos::new(1, 0, 0)).is_none());
        assert_eq!(modified.into_iter().collect::<Vec<_>>(), vec![BlockPos::new(0, 0, 0)]);
        assert_eq!(
            map.get_block(BlockPos::new(0, 0, 0)).unwrap().modified(),
            ModState::WriteNeeded
        );
    }

    #[test]
    fn untouched_emerge_leaves_blocks_clean() {
        let mut map = one_block_map();
        let mut vm = MapVoxelManipulator::new();
        vm.emerge(&map, VoxelArea::new(NodePos::new(0, 0, 0), NodePos::new(15, 15, 15)), None);
        let mut modified = ModifiedBlocks::new();
        vm.blit_back(&mut map, &mut modified);
        assert!(modified.is_empty());
        assert_eq!(map.get_block(BlockPos::new(0, 0, 0)).unwrap().modified(), ModState::Clean);
    }

    #[test]
    fn manual_blit_reaches_blocks_created_after_emerge() {
        let mut map = one_block_map();
        let mut vm = ManualMapVoxelManipulator::new();
        vm.initial_emerge(&map, BlockPos::new(0, 0, 0), BlockPos::new(1, 0, 0));
        assert_eq!(vm.get(NodePos::new(17, 0, 0)), None);

        vm.set(NodePos::new(17, 0, 0), MapNode::new(content::DIRT));
        vm.set(NodePos::new(1, 0, 0), MapNode::new(content::GLASS));

        map.insert_block(MapBlock::new(BlockPos::new(1, 0, 0)));
        let mut modified = ModifiedBlocks::new();
        vm.blit_back_all(&mut map, &mut modified);

        assert_eq!(map.get_node(NodePos::new(17, 0, 0)).unwrap().content, content::DIRT);
        assert_eq!(map.get_node(NodePos::new(18, 0, 0)).unwrap(), MapNode::IGNORE);
        assert_eq!(map.get_node(NodePos::new(1, 0, 0)).unwrap().content, content::GLASS);
        assert_eq!(modified.len(), 2);
    }
}
