//! Sparse voxel map engine.
//!
//! The world is stored as 16³ [`MapBlock`](world::block::MapBlock)s grouped
//! into vertical [`MapSector`](world::sector::MapSector) columns and owned
//! by a single [`Map`](world::map::Map). Edits go through the map, which
//! keeps the two light banks consistent and reports which blocks changed.
//! The client side turns changed blocks into meshes on a background thread
//! (see [`mesh`] and [`client`]).

pub mod client;
pub mod error;
pub mod mesh;
pub mod world;

pub use error::MapError;
