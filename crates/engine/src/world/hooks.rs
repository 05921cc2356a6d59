use super::block::MapBlock;
use super::event::ModifiedBlocks;
use super::position::BlockPos;
use crate::error::MapError;

/// What a concrete map (server or client) adds to the shared [`Map`].
///
/// The server persists blocks before they are unloaded; the client keeps
/// track of blocks whose geometry has to be rebuilt.
///
/// [`Map`]: super::map::Map
pub trait MapHooks {
    /// Whether modified blocks must be written out before unloading.
    fn persists(&self) -> bool {
        false
    }

    /// Writes one block. Only called when [`persists`](Self::persists) is
    /// true. On error the block stays in memory and keeps its modification
    /// level.
    fn save_block(&mut self, _block: &MapBlock) -> Result<(), MapError> {
        Ok(())
    }

    /// Called after an edit or a liquid/metadata step changed `blocks`.
    fn blocks_changed(&mut self, _blocks: &ModifiedBlocks) {}

    /// Called after a block was evicted from memory.
    fn block_unloaded(&mut self, _pos: BlockPos) {}
}

/// Hooks for a map that is neither saved nor rendered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl MapHooks for NoHooks {}
