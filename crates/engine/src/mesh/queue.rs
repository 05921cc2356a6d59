//! Pending mesh builds, one per block, in arrival order.

use indexmap::IndexMap;
use parking_lot::{Condvar, Mutex};

use super::data::MeshMakeData;
use crate::world::position::BlockPos;

#[derive(Debug)]
pub struct QueuedMeshUpdate {
    pub pos: BlockPos,
    pub data: MeshMakeData,
    pub ack_block_to_server: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    items: IndexMap<BlockPos, QueuedMeshUpdate>,
    closed: bool,
}

/// FIFO of mesh builds keyed by block. Queueing a block that is already
/// waiting replaces its data in place and keeps its turn.
#[derive(Debug, Default)]
pub struct MeshUpdateQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl MeshUpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `data` for `pos`. The ack request is sticky: once any caller
    /// asked for it, the eventual result carries it.
    pub fn add_block(&self, pos: BlockPos, data: MeshMakeData, ack_block_to_server: bool) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        match state.items.get_mut(&pos) {
            Some(existing) => {
                existing.data = data;
                existing.ack_block_to_server |= ack_block_to_server;
            }
            None => {
                state.items.insert(
                    pos,
                    QueuedMeshUpdate {
                        pos,
                        data,
                        ack_block_to_server,
                    },
                );
            }
        }
        drop(state);
        self.ready.notify_one();
    }

    /// Blocks until an update is available. `None` once closed.
    pub fn pop(&self) -> Option<QueuedMeshUpdate> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some((_, update)) = state.items.shift_remove_index(0) {
                return Some(update);
            }
            self.ready.wait(&mut state);
        }
    }

    pub fn try_pop(&self) -> Option<QueuedMeshUpdate> {
        self.state.lock().items.shift_remove_index(0).map(|(_, u)| u)
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops everything pending and wakes all waiters.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.items.clear();
        drop(state);
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::voxel::VoxelManipulator;
    use std::sync::Arc;
    use std::thread;

    fn data(pos: BlockPos, ratio: u32) -> MeshMakeData {
        MeshMakeData::from_parts(pos, VoxelManipulator::new(), ratio)
    }

    #[test]
    fn requeue_replaces_data_and_keeps_position() {
        let q = MeshUpdateQueue::new();
        let a = BlockPos::new(0, 0, 0);
        let b = BlockPos::new(1, 0, 0);
        q.add_block(a, data(a, 100), false);
        q.add_block(b, data(b, 100), false);
        q.add_block(a, data(a, 900), true);
        q.add_block(a, data(a, 500), false);
        assert_eq!(q.len(), 2);

        let first = q.try_pop().unwrap();
        assert_eq!(first.pos, a);
        assert_eq!(first.data.daynight_ratio, 500);
        assert!(first.ack_block_to_server);
        assert_eq!(q.try_pop().unwrap().pos, b);
        assert!(q.try_pop().is_none());
    }

    #[test]
    fn close_wakes_blocked_pop() {
        let q = Arc::new(MeshUpdateQueue::new());
        let waiter = {
            let q = Arc::clone(&q);
            thread::spawn(move || q.pop().is_none())
        };
        q.close();
        assert!(waiter.join().unwrap());
        q.add_block(BlockPos::new(0, 0, 0), data(BlockPos::new(0, 0, 0), 0), false);
        assert!(q.is_empty());
    }
}
