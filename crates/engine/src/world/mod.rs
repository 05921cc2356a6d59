//! The voxel map itself.
//!
//! Space is split into 16³ [`MapBlock`]s, grouped into vertical
//! [`MapSector`] columns owned by a [`Map`]. Blocks exist only where
//! something was loaded or generated; everything else reads as unknown.

pub mod block;
pub(crate) mod codec;
pub mod event;
pub mod hooks;
pub mod light;
pub mod lighting;
pub mod liquid;
pub mod map;
pub mod map_voxel;
pub mod metadata;
pub mod node;
pub mod position;
pub mod sector;
pub mod voxel;

pub use block::{MapBlock, ModState};
pub use event::{MapEditEvent, MapEditEventKind, MapEventReceiver, ModifiedBlocks, ReceiverId};
pub use hooks::{MapHooks, NoHooks};
pub use light::{LIGHT_MAX, LIGHT_SUN, LightBank, LightRules};
pub use map::{Map, UnloadStats};
pub use map_voxel::{ManualMapVoxelManipulator, MapVoxelManipulator};
pub use node::{Content, ContentFeatures, MapNode, NodeDefs};
pub use position::{BlockPos, MAP_BLOCKSIZE, NodePos, SectorPos};
pub use sector::MapSector;
pub use voxel::{VoxelArea, VoxelManipulator};
