use std::collections::BTreeSet;

use slotmap::new_key_type;

use super::node::MapNode;
use super::position::{BlockPos, NodePos};

new_key_type! {
    /// Handle of a registered [`MapEventReceiver`].
    pub struct ReceiverId;
}

/// Blocks touched by one edit, in position order.
pub type ModifiedBlocks = BTreeSet<BlockPos>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapEditEventKind {
    AddNode,
    RemoveNode,
    BlockNodeMetadataChanged,
    /// Anything else that touched `modified_blocks`.
    Other,
}

/// Notification sent to every receiver after the map changed.
#[derive(Debug, Clone)]
pub struct MapEditEvent {
    pub kind: MapEditEventKind,
    pub pos: NodePos,
    pub node: MapNode,
    pub modified_blocks: ModifiedBlocks,
    /// Id of a peer that already knows about this change and should not be
    /// told again. 0 means none.
    pub already_known_by_peer: u16,
}

impl MapEditEvent {
    pub fn new(kind: MapEditEventKind, pos: NodePos) -> Self {
        Self {
            kind,
            pos,
            node: MapNode::IGNORE,
            modified_blocks: ModifiedBlocks::new(),
            already_known_by_peer: 0,
        }
    }

    /// Every block that has to be resent or redrawn for this event.
    pub fn affected_blocks(&self) -> ModifiedBlocks {
        let mut blocks = self.modified_blocks.clone();
        if matches!(
            self.kind,
            MapEditEventKind::AddNode
                | MapEditEventKind::RemoveNode
                | MapEditEventKind::BlockNodeMetadataChanged
        ) {
            blocks.insert(self.pos.block());
        }
        blocks
    }
}

/// Observer of map edits. Receives a borrow valid only during dispatch.
pub trait MapEventReceiver: Send {
    fn on_map_edit_event(&mut self, event: &MapEditEvent);
}

impl<F> MapEventReceiver for F
where
    F: FnMut(&MapEditEvent) + Send,
{
    fn on_map_edit_event(&mut self, event: &MapEditEvent) {
        self(event)
    }
}
