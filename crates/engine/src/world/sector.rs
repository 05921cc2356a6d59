use std::collections::HashMap;
use std::collections::hash_map::Entry;

use super::block::MapBlock;
use super::position::{BlockPos, SectorPos};

/// A column of blocks sharing one horizontal coordinate, keyed by block y.
///
/// Sparse: only blocks that were loaded, generated or cached as dummies are
/// stored.
#[derive(Debug)]
pub struct MapSector {
    pos: SectorPos,
    blocks: HashMap<i32, MapBlock>,
}

impl MapSector {
    pub fn new(pos: SectorPos) -> Self {
        Self {
            pos,
            blocks: HashMap::new(),
        }
    }

    pub const fn pos(&self) -> SectorPos {
        self.pos
    }

    pub fn get_block(&self, y: i32) -> Option<&MapBlock> {
        self.blocks.get(&y)
    }

    pub fn get_block_mut(&mut self, y: i32) -> Option<&mut MapBlock> {
        self.blocks.get_mut(&y)
    }

    /// Stores `block`, replacing whatever was at its height.
    pub fn insert_block(&mut self, block: MapBlock) -> &mut MapBlock {
        let pos = block.pos();
        debug_assert_eq!(pos.sector(), self.pos, "block {pos:?} inserted into wrong sector");
        match self.blocks.entry(pos.y) {
            Entry::Occupied(mut slot) => {
                slot.insert(block);
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(block),
        }
    }

    pub fn remove_block(&mut self, y: i32) -> Option<MapBlock> {
        self.blocks.remove(&y)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &MapBlock> {
        self.blocks.values()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut MapBlock> {
        self.blocks.values_mut()
    }

    pub fn block_positions(&self) -> impl Iterator<Item = BlockPos> + '_ {
        self.blocks.keys().map(|&y| self.pos.block(y))
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
