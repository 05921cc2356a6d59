//! Snapshots handed to the mesh worker.

use super::NodeModMap;
use crate::world::hooks::MapHooks;
use crate::world::map::Map;
use crate::world::position::BlockPos;
use crate::world::voxel::{VoxelArea, VoxelManipulator};

/// Everything the mesh worker needs to build one block, copied out of the
/// map so the worker never touches it.
#[derive(Debug, Clone)]
pub struct MeshMakeData {
    pub blockpos: BlockPos,
    /// The block plus a one-node border taken from its neighbours.
    pub vmanip: VoxelManipulator,
    /// 0 (night) ..= 1000 (day).
    pub daynight_ratio: u32,
    /// Drawing-only node mods in effect when the snapshot was taken.
    pub temp_mods: NodeModMap,
}

impl MeshMakeData {
    /// Snapshots `blockpos` from `map`. Border nodes in unloaded
    /// neighbours stay missing and are treated as unknown.
    pub fn fill<H: MapHooks>(map: &Map<H>, blockpos: BlockPos, daynight_ratio: u32) -> Self {
        let mut vmanip = VoxelManipulator::new();
        let core = VoxelArea::of_block(blockpos);
        let padded = core.pad(1);
        vmanip.add_area(padded);

        let mut temp_mods = NodeModMap::new();
        if let Some(block) = map.get_block(blockpos) {
            block.copy_to(&mut vmanip);
            temp_mods = block.copy_temp_mods();
        }
        for p in padded.positions().filter(|p| !core.contains(*p)) {
            if let Ok(n) = map.get_node(p) {
                vmanip.load(p, n);
            }
        }

        Self {
            blockpos,
            vmanip,
            daynight_ratio,
            temp_mods,
        }
    }

    /// A snapshot from an already filled buffer.
    pub fn from_parts(blockpos: BlockPos, vmanip: VoxelManipulator, daynight_ratio: u32) -> Self {
        Self {
            blockpos,
            vmanip,
            daynight_ratio,
            temp_mods: NodeModMap::new(),
        }
    }

    pub fn with_temp_mods(mut self, temp_mods: NodeModMap) -> Self {
        self.temp_mods = temp_mods;
        self
    }

    pub fn area(&self) -> VoxelArea {
        self.vmanip.area()
    }
}
