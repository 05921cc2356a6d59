//! The sector/block cache and its node-level API.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexSet;
use slotmap::{SlotMap, new_key_type};
use tracing::{debug, warn};

use super::block::{MapBlock, ModState};
use super::event::{MapEditEvent, MapEditEventKind, MapEventReceiver, ModifiedBlocks, ReceiverId};
use super::hooks::{MapHooks, NoHooks};
use super::light::LightRules;
use super::metadata::NodeMetadata;
use super::node::{MapNode, NodeDefs};
use super::position::{BlockPos, NodePos, SectorPos};
use super::sector::MapSector;
use crate::error::MapError;

new_key_type! {
    /// Stable handle of a loaded sector.
    pub struct SectorId;
}

/// Outcome of one [`Map::timer_update`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnloadStats {
    pub blocks_unloaded: usize,
    pub sectors_unloaded: usize,
    pub blocks_saved: usize,
    /// Blocks that could not be written and were kept in memory.
    pub save_failures: usize,
}

/// All loaded sectors of one world.
///
/// Owned and mutated by a single thread. Blocks refer back to the map only
/// through their position; anything that has to look past a block's edge
/// takes the map as an argument.
pub struct Map<H: MapHooks = NoHooks> {
    defs: Arc<NodeDefs>,
    light: LightRules,
    sectors: SlotMap<SectorId, MapSector>,
    sector_index: HashMap<SectorPos, SectorId>,
    /// Last sector looked up.
    sector_cache: Cell<Option<(SectorPos, SectorId)>>,
    receivers: SlotMap<ReceiverId, Box<dyn MapEventReceiver>>,
    pub(crate) transforming_liquid: IndexSet<NodePos>,
    hooks: H,
}

impl Map<NoHooks> {
    /// A map that is neither persisted nor rendered.
    pub fn detached(defs: Arc<NodeDefs>) -> Self {
        Self::new(defs, NoHooks)
    }
}

impl<H: MapHooks> Map<H> {
    pub fn new(defs: Arc<NodeDefs>, hooks: H) -> Self {
        Self {
            defs,
            light: LightRules::default(),
            sectors: SlotMap::with_key(),
            sector_index: HashMap::new(),
            sector_cache: Cell::new(None),
            receivers: SlotMap::with_key(),
            transforming_liquid: IndexSet::new(),
            hooks,
        }
    }

    pub fn with_light_rules(mut self, rules: LightRules) -> Self {
        self.light = rules;
        self
    }

    pub fn defs(&self) -> &Arc<NodeDefs> {
        &self.defs
    }

    pub fn light_rules(&self) -> LightRules {
        self.light
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    // ── Events ──────────────────────────────────────────────────────

    pub fn add_event_receiver(&mut self, receiver: Box<dyn MapEventReceiver>) -> ReceiverId {
        self.receivers.insert(receiver)
    }

    pub fn remove_event_receiver(&mut self, id: ReceiverId) -> Option<Box<dyn MapEventReceiver>> {
        self.receivers.remove(id)
    }

    pub fn dispatch_event(&mut self, event: &MapEditEvent) {
        for receiver in self.receivers.values_mut() {
            receiver.on_map_edit_event(event);
        }
    }

    /// Tells the hooks and every receiver about a finished edit.
    pub(crate) fn finish_edit(&mut self, event: MapEditEvent) {
        self.hooks.blocks_changed(&event.modified_blocks);
        self.dispatch_event(&event);
    }

    // ── Sectors ─────────────────────────────────────────────────────

    fn sector_id(&self, p: SectorPos) -> Option<SectorId> {
        if let Some((cached, id)) = self.sector_cache.get() {
            if cached == p {
                return Some(id);
            }
        }
        let id = *self.sector_index.get(&p)?;
        self.sector_cache.set(Some((p, id)));
        Some(id)
    }

    pub fn get_sector(&self, p: SectorPos) -> Option<&MapSector> {
        let id = self.sector_id(p)?;
        self.sectors.get(id)
    }

    pub fn get_sector_mut(&mut self, p: SectorPos) -> Option<&mut MapSector> {
        let id = self.sector_id(p)?;
        self.sectors.get_mut(id)
    }

    /// Returns the sector at `p`, creating an empty one if needed.
    pub fn create_sector(&mut self, p: SectorPos) -> &mut MapSector {
        let id = match self.sector_id(p) {
            Some(id) => id,
            None => {
                let id = self.sectors.insert(MapSector::new(p));
                self.sector_index.insert(p, id);
                self.sector_cache.set(Some((p, id)));
                id
            }
        };
        &mut self.sectors[id]
    }

    /// Drops whole sectors with everything in them. Returns how many existed.
    pub fn delete_sectors(&mut self, list: &[SectorPos]) -> usize {
        self.sector_cache.set(None);
        let mut deleted = 0;
        for p in list {
            if let Some(id) = self.sector_index.remove(p) {
                self.sectors.remove(id);
                deleted += 1;
            }
        }
        deleted
    }

    pub fn sectors(&self) -> impl Iterator<Item = &MapSector> {
        self.sectors.values()
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    // ── Blocks ──────────────────────────────────────────────────────

    /// The block at `p`, dummy or not.
    pub fn get_block(&self, p: BlockPos) -> Option<&MapBlock> {
        self.get_sector(p.sector())?.get_block(p.y)
    }

    pub fn get_block_mut(&mut self, p: BlockPos) -> Option<&mut MapBlock> {
        self.get_sector_mut(p.sector())?.get_block_mut(p.y)
    }

    pub fn get_block_no_create(&self, p: BlockPos) -> Result<&MapBlock, MapError> {
        self.get_block(p).ok_or(MapError::NotFound(p))
    }

    /// Stores `block` (creating its sector), replacing any block already
    /// at that position.
    pub fn insert_block(&mut self, block: MapBlock) -> &mut MapBlock {
        let sector = self.create_sector(block.pos().sector());
        sector.insert_block(block)
    }

    pub fn remove_block(&mut self, p: BlockPos) -> Option<MapBlock> {
        self.get_sector_mut(p.sector())?.remove_block(p.y)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &MapBlock> {
        self.sectors.values().flat_map(|s| s.blocks())
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut MapBlock> {
        self.sectors.values_mut().flat_map(|s| s.blocks_mut())
    }

    pub fn block_count(&self) -> usize {
        self.sectors.values().map(|s| s.block_count()).sum()
    }

    /// Marks `blocks` as in use, restarting their unload countdown.
    pub fn touch_blocks<'a>(&mut self, blocks: impl IntoIterator<Item = &'a BlockPos>) {
        for &p in blocks {
            if let Some(block) = self.get_block_mut(p) {
                block.reset_usage_timer();
            }
        }
    }

    // ── Nodes ───────────────────────────────────────────────────────

    /// True if the node's block is loaded with data.
    pub fn is_valid_position(&self, p: NodePos) -> bool {
        self.get_block(p.block()).is_some_and(|b| !b.is_dummy())
    }

    pub fn get_node(&self, p: NodePos) -> Result<MapNode, MapError> {
        match self.get_block(p.block()) {
            Some(block) if !block.is_dummy() => block.get_node(p.local()),
            _ => Err(MapError::InvalidPosition(p)),
        }
    }

    /// Like [`get_node`](Self::get_node) but yields `CONTENT_IGNORE` when the
    /// node is not loaded.
    pub fn get_node_no_ex(&self, p: NodePos) -> MapNode {
        self.get_node(p).unwrap_or(MapNode::IGNORE)
    }

    /// Raw write: no lighting update, no events.
    pub fn set_node(&mut self, p: NodePos, n: MapNode) -> Result<(), MapError> {
        match self.get_block_mut(p.block()) {
            Some(block) if !block.is_dummy() => block.set_node(p.local(), n),
            _ => Err(MapError::InvalidPosition(p)),
        }
    }

    /// Reads node `rel` relative to block `block`, which may lie outside it.
    pub fn get_node_parent(&self, block: BlockPos, rel: NodePos) -> Result<MapNode, MapError> {
        let abs = block.origin() + rel;
        match self.get_block(abs.block()) {
            Some(b) if !b.is_dummy() => b.get_node(abs.local()),
            _ => Err(MapError::NotFound(abs.block())),
        }
    }

    pub fn set_node_parent(
        &mut self,
        block: BlockPos,
        rel: NodePos,
        n: MapNode,
    ) -> Result<(), MapError> {
        let abs = block.origin() + rel;
        match self.get_block_mut(abs.block()) {
            Some(b) if !b.is_dummy() => b.set_node(abs.local(), n),
            _ => Err(MapError::NotFound(abs.block())),
        }
    }

    pub fn is_node_underground(&self, p: NodePos) -> Result<bool, MapError> {
        Ok(self.get_block_no_create(p.block())?.is_underground())
    }

    // ── Node metadata ───────────────────────────────────────────────

    pub fn get_node_metadata(&self, p: NodePos) -> Option<&dyn NodeMetadata> {
        self.get_block(p.block())?.node_metadata().get(p.local())
    }

    pub fn get_node_metadata_mut(&mut self, p: NodePos) -> Option<&mut (dyn NodeMetadata + 'static)> {
        let block = self.get_block_mut(p.block())?;
        block.node_metadata().get(p.local())?;
        block.raise_modified(ModState::WriteNeeded);
        block.node_metadata_mut().get_mut(p.local())
    }

    pub fn set_node_metadata(
        &mut self,
        p: NodePos,
        meta: Box<dyn NodeMetadata>,
    ) -> Result<(), MapError> {
        match self.get_block_mut(p.block()) {
            Some(block) if !block.is_dummy() => {
                block.node_metadata_mut().set(p.local(), meta);
                block.raise_modified(ModState::WriteNeeded);
                Ok(())
            }
            _ => Err(MapError::InvalidPosition(p)),
        }
    }

    pub fn remove_node_metadata(&mut self, p: NodePos) -> Option<Box<dyn NodeMetadata>> {
        let block = self.get_block_mut(p.block())?;
        let removed = block.node_metadata_mut().remove(p.local());
        if removed.is_some() {
            block.raise_modified(ModState::WriteNeeded);
        }
        removed
    }

    /// Steps every metadata payload. Blocks whose payload changed are
    /// raised to `WriteNeeded` and added to `changed`.
    pub fn node_metadata_step(&mut self, dtime: f32, changed: &mut ModifiedBlocks) {
        for block in self.blocks_mut() {
            if block.node_metadata_mut().step(dtime) {
                block.raise_modified(ModState::WriteNeeded);
                changed.insert(block.pos());
            }
        }
    }

    /// [`node_metadata_step`](Self::node_metadata_step), then one
    /// `BlockNodeMetadataChanged` event per changed block.
    pub fn node_metadata_step_with_events(&mut self, dtime: f32) -> ModifiedBlocks {
        let mut changed = ModifiedBlocks::new();
        self.node_metadata_step(dtime, &mut changed);
        for &bp in &changed {
            let mut event = MapEditEvent::new(MapEditEventKind::BlockNodeMetadataChanged, bp.origin());
            event.modified_blocks.insert(bp);
            self.finish_edit(event);
        }
        changed
    }

    // ── Unloading ───────────────────────────────────────────────────

    /// Ages every block by `dtime` and evicts the ones unused for longer
    /// than `unload_timeout` seconds, saving them first if the hooks
    /// persist. Sectors left empty are dropped too.
    pub fn timer_update(
        &mut self,
        dtime: f32,
        unload_timeout: f32,
        mut unloaded: Option<&mut Vec<BlockPos>>,
    ) -> UnloadStats {
        let mut stats = UnloadStats::default();
        let persists = self.hooks.persists();
        let mut empty_sectors = Vec::new();

        let Self { sectors, hooks, .. } = self;
        for sector in sectors.values_mut() {
            let mut evict = Vec::new();
            for block in sector.blocks_mut() {
                block.increment_usage_timer(dtime);
                if block.usage_timer() <= unload_timeout {
                    continue;
                }
                if persists && block.modified() != ModState::Clean && !block.is_dummy() {
                    match hooks.save_block(block) {
                        Ok(()) => {
                            block.reset_modified();
                            stats.blocks_saved += 1;
                        }
                        Err(e) => {
                            warn!("keeping block {:?} in memory, save failed: {}", block.pos(), e);
                            stats.save_failures += 1;
                            continue;
                        }
                    }
                }
                evict.push(block.pos());
            }
            for pos in evict {
                sector.remove_block(pos.y);
                hooks.block_unloaded(pos);
                if let Some(out) = unloaded.as_deref_mut() {
                    out.push(pos);
                }
                stats.blocks_unloaded += 1;
            }
            if sector.is_empty() {
                empty_sectors.push(sector.pos());
            }
        }

        stats.sectors_unloaded = self.delete_sectors(&empty_sectors);
        if stats.blocks_unloaded > 0 {
            debug!(
                "unloaded {} blocks and {} sectors",
                stats.blocks_unloaded, stats.sectors_unloaded
            );
        }
        stats
    }
}
