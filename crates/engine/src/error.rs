use crate::world::position::{BlockPos, NodePos};

/// Everything that can go wrong while reading or writing the map.
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    /// The coordinate lies outside a block or outside the loaded map.
    #[error("invalid position {0:?}")]
    InvalidPosition(NodePos),

    /// A block was required but is not in memory.
    #[error("block {0:?} not found")]
    NotFound(BlockPos),

    /// The storage backend failed to read or write.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The block cannot hold any more static objects.
    #[error("block {0:?} already holds {1} static objects")]
    TooManyObjects(BlockPos, usize),

    /// Serialized block data could not be decoded.
    #[error("corrupt block data: {0}")]
    CorruptFormat(String),
}

impl MapError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptFormat(msg.into())
    }
}
