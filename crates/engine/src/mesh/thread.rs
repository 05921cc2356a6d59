//! The background mesh worker.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, trace};

use super::builder::{BlockMesh, make_block_mesh};
use super::queue::MeshUpdateQueue;
use crate::world::node::NodeDefs;
use crate::world::position::BlockPos;

#[derive(Debug)]
pub struct MeshUpdateResult {
    pub pos: BlockPos,
    pub mesh: BlockMesh,
    pub ack_block_to_server: bool,
}

/// Owns the input queue and the worker that drains it into a result
/// channel. Updates can be queued before the worker is started.
pub struct MeshUpdateThread {
    defs: Arc<NodeDefs>,
    queue: Arc<MeshUpdateQueue>,
    results_tx: Sender<MeshUpdateResult>,
    results_rx: Receiver<MeshUpdateResult>,
    handle: Option<JoinHandle<()>>,
}

impl MeshUpdateThread {
    pub fn new(defs: Arc<NodeDefs>) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            defs,
            queue: Arc::new(MeshUpdateQueue::new()),
            results_tx,
            results_rx,
            handle: None,
        }
    }

    pub fn queue(&self) -> &MeshUpdateQueue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the worker. Does nothing if it already runs.
    pub fn start(&mut self) -> io::Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        let queue = Arc::clone(&self.queue);
        let defs = Arc::clone(&self.defs);
        let tx = self.results_tx.clone();
        let handle = thread::Builder::new()
            .name("mesh-update".into())
            .spawn(move || {
                debug!("mesh worker started");
                while let Some(update) = queue.pop() {
                    let mesh = make_block_mesh(&update.data, &defs);
                    trace!("meshed {:?}: {} faces", update.pos, mesh.face_count());
                    let result = MeshUpdateResult {
                        pos: update.pos,
                        mesh,
                        ack_block_to_server: update.ack_block_to_server,
                    };
                    if tx.send(result).is_err() {
                        break;
                    }
                }
                debug!("mesh worker stopped");
            })?;
        self.handle = Some(handle);
        Ok(())
    }

    pub fn try_recv(&self) -> Option<MeshUpdateResult> {
        self.results_rx.try_recv().ok()
    }

    /// Closes the queue and waits for the worker to exit. Pending updates
    /// are dropped.
    pub fn stop(&mut self) {
        self.queue.close();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MeshUpdateThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::data::MeshMakeData;
    use crate::world::voxel::VoxelManipulator;
    use std::time::{Duration, Instant};

    #[test]
    fn results_come_back_through_the_channel() {
        let mut worker = MeshUpdateThread::new(Arc::new(NodeDefs::builtin()));
        let pos = BlockPos::new(2, 0, 0);
        worker
            .queue()
            .add_block(pos, MeshMakeData::from_parts(pos, VoxelManipulator::new(), 1000), true);
        worker.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let result = loop {
            if let Some(r) = worker.try_recv() {
                break r;
            }
            assert!(Instant::now() < deadline, "no mesh result");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert_eq!(result.pos, pos);
        assert!(result.ack_block_to_server);
        assert!(result.mesh.is_empty());

        worker.stop();
        assert!(!worker.is_running());
    }
}
