//! Persistent voxel map server.
//!
//! [`server_map::ServerMap`] owns the engine map and drives the block
//! lifecycle: emerge (load or generate), edit, periodic unload and save.
//! Blocks live in a [`storage::BlockStorage`]; new terrain comes from a
//! [`generator::BlockGenerator`].

pub mod config;
pub mod dashboard;
pub mod event_bus;
pub mod generator;
pub mod server_map;
pub mod storage;
