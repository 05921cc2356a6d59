//! The client-side map: a [`Map`] whose blocks carry render meshes built
//! by a background [`MeshUpdateThread`].

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::mesh::{MeshMakeData, MeshUpdateThread, NodeMod};
use crate::world::event::ModifiedBlocks;
use crate::world::hooks::MapHooks;
use crate::world::map::{Map, UnloadStats};
use crate::world::node::{MapNode, NodeDefs};
use crate::world::position::{BlockPos, NodePos};

/// Remembers which blocks were touched so their meshes can be rebuilt.
#[derive(Debug, Default)]
pub struct ClientHooks {
    changed: ModifiedBlocks,
}

impl ClientHooks {
    fn take_changed(&mut self) -> ModifiedBlocks {
        std::mem::take(&mut self.changed)
    }
}

impl MapHooks for ClientHooks {
    fn blocks_changed(&mut self, blocks: &ModifiedBlocks) {
        self.changed.extend(blocks.iter().copied());
    }

    fn block_unloaded(&mut self, pos: BlockPos) {
        self.changed.remove(&pos);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub fov: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            direction: [0.0, 0.0, 1.0],
            fov: 1.0,
        }
    }
}

pub struct ClientMap {
    map: Map<ClientHooks>,
    mesh_thread: MeshUpdateThread,
    daynight_ratio: u32,
    /// Written by the owning thread, read by the renderer.
    camera: Mutex<Camera>,
}

impl ClientMap {
    pub fn new(defs: Arc<NodeDefs>) -> Self {
        Self {
            mesh_thread: MeshUpdateThread::new(Arc::clone(&defs)),
            map: Map::new(defs, ClientHooks::default()),
            daynight_ratio: 1000,
            camera: Mutex::new(Camera::default()),
        }
    }

    pub fn start(&mut self) -> io::Result<()> {
        self.mesh_thread.start()
    }

    pub fn stop(&mut self) {
        self.mesh_thread.stop();
    }

    pub fn map(&self) -> &Map<ClientHooks> {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut Map<ClientHooks> {
        &mut self.map
    }

    pub fn mesh_thread(&self) -> &MeshUpdateThread {
        &self.mesh_thread
    }

    pub fn daynight_ratio(&self) -> u32 {
        self.daynight_ratio
    }

    /// Sets the sun level (`0..=1000`) meshes are lit with. Only blocks whose
    /// light differs between day and night need rebuilding after this.
    pub fn set_daynight_ratio(&mut self, ratio: u32) {
        let ratio = ratio.min(1000);
        if ratio != self.daynight_ratio {
            self.daynight_ratio = ratio;
            self.expire_meshes(true);
        }
    }

    pub fn update_camera(&self, position: [f32; 3], direction: [f32; 3], fov: f32) {
        *self.camera.lock() = Camera {
            position,
            direction,
            fov,
        };
    }

    pub fn camera(&self) -> Camera {
        *self.camera.lock()
    }

    // ── Mesh tasks ──────────────────────────────────────────────────

    /// Snapshots block `p` and queues a rebuild. Missing or dummy blocks
    /// are skipped.
    pub fn add_update_mesh_task(&mut self, p: BlockPos, ack_to_server: bool) {
        let Some(block) = self.map.get_block_mut(p) else {
            return;
        };
        if block.is_dummy() {
            return;
        }
        block.reset_usage_timer();
        let data = MeshMakeData::fill(&self.map, p, self.daynight_ratio);
        self.mesh_thread.queue().add_block(p, data, ack_to_server);
        trace!("queued mesh update for {:?}", p);
    }

    /// Also rebuilds the neighbours on the negative side, whose border faces
    /// look into `p`.
    pub fn add_update_mesh_task_with_edge(&mut self, p: BlockPos, ack_to_server: bool) {
        self.add_update_mesh_task(p, ack_to_server);
        for q in [p.offset(-1, 0, 0), p.offset(0, -1, 0), p.offset(0, 0, -1)] {
            self.add_update_mesh_task(q, false);
        }
    }

    /// Installs at most `max` finished meshes. Returns the blocks whose
    /// update has to be acknowledged to the server.
    pub fn install_meshes(&mut self, max: usize) -> Vec<BlockPos> {
        let mut acked = Vec::new();
        for _ in 0..max {
            let Some(result) = self.mesh_thread.try_recv() else {
                break;
            };
            match self.map.get_block_mut(result.pos) {
                Some(block) => {
                    block.reset_usage_timer();
                    let mut slot = block.mesh_slot().lock();
                    slot.mesh = Some(Arc::new(result.mesh));
                    slot.expired = false;
                }
                None => {
                    trace!("discarding mesh for unloaded block {:?}", result.pos);
                    continue;
                }
            }
            if result.ack_block_to_server {
                acked.push(result.pos);
            }
        }
        acked
    }

    /// Flags meshes as stale and queues their rebuild. With
    /// `only_daynight_diffed`, blocks lit identically by day and night keep
    /// their mesh.
    pub fn expire_meshes(&mut self, only_daynight_diffed: bool) {
        let stale: Vec<BlockPos> = self
            .map
            .blocks()
            .filter(|b| !b.is_dummy())
            .filter(|b| !only_daynight_diffed || self.map.day_night_diffed(b.pos()))
            .map(|b| b.pos())
            .collect();
        debug!("expiring {} meshes", stale.len());
        for p in stale {
            if let Some(block) = self.map.get_block(p) {
                block.set_mesh_expired(true);
            }
            self.add_update_mesh_task(p, false);
        }
    }

    fn flush_changed(&mut self, ack_to_server: bool) {
        let changed = self.map.hooks_mut().take_changed();
        for p in changed {
            if let Some(block) = self.map.get_block(p) {
                block.set_mesh_expired(true);
            }
            self.add_update_mesh_task_with_edge(p, ack_to_server);
        }
    }

    // ── Temporary mods ──────────────────────────────────────────────

    /// Blocks whose mesh can show node `p`: its own block and any block
    /// that has `p` on its border.
    fn blocks_showing(p: NodePos) -> Vec<BlockPos> {
        let mut out = vec![p.block()];
        for n in p.neighbors() {
            let b = n.block();
            if !out.contains(&b) {
                out.push(b);
            }
        }
        out
    }

    /// Applies a drawing-only mod to node `p` and queues the meshes that
    /// show it. Returns the blocks that changed.
    pub fn set_temp_mod(&mut self, p: NodePos, m: NodeMod) -> Vec<BlockPos> {
        let affected: Vec<BlockPos> = Self::blocks_showing(p)
            .into_iter()
            .filter(|&b| {
                self.map
                    .get_block(b)
                    .is_some_and(|block| !block.is_dummy() && block.set_temp_mod(p, m))
            })
            .collect();
        for &b in &affected {
            self.add_update_mesh_task_with_edge(b, false);
        }
        affected
    }

    pub fn clear_temp_mod(&mut self, p: NodePos) -> Vec<BlockPos> {
        let affected: Vec<BlockPos> = Self::blocks_showing(p)
            .into_iter()
            .filter(|&b| self.map.get_block(b).is_some_and(|block| block.clear_temp_mod(p)))
            .collect();
        for &b in &affected {
            self.add_update_mesh_task_with_edge(b, false);
        }
        affected
    }

    // ── Edits ───────────────────────────────────────────────────────

    /// Places a node and queues meshes for everything whose light changed.
    pub fn add_node(&mut self, p: NodePos, n: MapNode) -> bool {
        let placed = self.map.add_node_with_event(p, n);
        self.flush_changed(false);
        placed
    }

    pub fn remove_node(&mut self, p: NodePos) -> bool {
        let removed = self.map.remove_node_with_event(p);
        self.flush_changed(false);
        removed
    }

    /// Ages and unloads blocks like [`Map::timer_update`]. The meshes go
    /// away with their blocks; unloaded positions are appended to
    /// `unloaded` so the caller can tell the server.
    pub fn timer_update(
        &mut self,
        dtime: f32,
        unload_timeout: f32,
        unloaded: &mut Vec<BlockPos>,
    ) -> UnloadStats {
        self.map.timer_update(dtime, unload_timeout, Some(unloaded))
    }
}
