//! Map-change event bus.
//!
//! A receiver registered on the map turns every [`MapEditEvent`] into a
//! [`MapChangeBatch`] on a shared `tokio::sync::broadcast` channel. Anything
//! interested (network sessions, the dashboard) subscribes without ever
//! borrowing the map.

use std::sync::Arc;

use tokio::sync::broadcast;
use voxmap_engine::world::{
    BlockPos, Map, MapEditEvent, MapEditEventKind, MapEventReceiver, MapHooks, MapNode, NodePos,
    ReceiverId,
};

/// 256 batches in flight handle bursty edits without lagging.
pub const BUS_CAPACITY: usize = 256;

/// One map edit as seen from outside.
///
/// `Arc<[...]>` so cloning per subscriber is a refcount bump.
#[derive(Clone, Debug)]
pub struct MapChangeBatch {
    pub kind: MapEditEventKind,
    pub pos: NodePos,
    pub node: MapNode,
    pub blocks: Arc<[BlockPos]>,
    pub already_known_by_peer: u16,
}

impl From<&MapEditEvent> for MapChangeBatch {
    fn from(event: &MapEditEvent) -> Self {
        Self {
            kind: event.kind,
            pos: event.pos,
            node: event.node,
            blocks: event.affected_blocks().into_iter().collect(),
            already_known_by_peer: event.already_known_by_peer,
        }
    }
}

/// A map receiver that forwards every event to `tx`.
pub fn forwarder(tx: broadcast::Sender<MapChangeBatch>) -> Box<dyn MapEventReceiver> {
    Box::new(move |event: &MapEditEvent| {
        // No subscribers is fine.
        let _ = tx.send(MapChangeBatch::from(event));
    })
}

/// Registers a forwarder on `map`. Drop it again with
/// [`Map::remove_event_receiver`].
pub fn attach<H: MapHooks>(map: &mut Map<H>, tx: broadcast::Sender<MapChangeBatch>) -> ReceiverId {
    map.add_event_receiver(forwarder(tx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use voxmap_engine::world::node::content;
    use voxmap_engine::world::{MapBlock, NodeDefs};

    #[test]
    fn edits_reach_subscribers() {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        map.insert_block(MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::AIR));
        let (tx, mut rx) = broadcast::channel(BUS_CAPACITY);
        let id = attach(&mut map, tx);

        let p = NodePos::new(3, 3, 3);
        assert!(map.add_node_with_event(p, MapNode::new(content::STONE)));
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.kind, MapEditEventKind::AddNode);
        assert_eq!(batch.pos, p);
        assert_eq!(batch.node.content, content::STONE);
        assert!(batch.blocks.contains(&BlockPos::new(0, 0, 0)));

        assert!(map.remove_event_receiver(id).is_some());
        assert!(map.remove_node_with_event(p));
        assert!(rx.try_recv().is_err());
    }
}
