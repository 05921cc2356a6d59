//! Background mesh generation.
//!
//! The owning thread snapshots a block and its one-node border into a
//! [`MeshMakeData`] and queues it. A single worker thread turns snapshots
//! into [`BlockMesh`]es and hands them back for installation.

pub mod builder;
pub mod data;
pub mod queue;
pub mod thread;

use std::collections::HashMap;
use std::sync::Arc;

use crate::world::position::NodePos;

pub use builder::{BlockMesh, MeshVertex, make_block_mesh};
pub use data::MeshMakeData;
pub use queue::{MeshUpdateQueue, QueuedMeshUpdate};
pub use thread::{MeshUpdateResult, MeshUpdateThread};

/// A drawing-only change to one node. Never stored or sent anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMod {
    /// Dig progress overlay; higher levels are further along.
    Crack { level: u8 },
}

/// Temporary mods keyed by absolute node position.
pub type NodeModMap = HashMap<NodePos, NodeMod>;

/// Render-side state of one block, behind its own lock.
#[derive(Debug, Default)]
pub struct MeshSlot {
    pub mesh: Option<Arc<BlockMesh>>,
    /// The installed mesh no longer matches the block.
    pub expired: bool,
    /// Mods on this block's nodes and on its one-node border.
    pub temp_mods: NodeModMap,
}
