//! Two-bank light propagation and the lighting-aware edit API.
//!
//! Light spreads breadth-first through nodes that let it through, losing
//! [`LightRules::step`](super::light::LightRules) per node. Removing light
//! works the other way round: everything that could have been lit by the
//! removed value is cleared, and whatever brighter light borders the
//! cleared region is spread back in.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use super::block::{ModState, local_from_index};
use super::event::{MapEditEvent, MapEditEventKind, ModifiedBlocks};
use super::hooks::MapHooks;
use super::light::{LIGHT_SUN, LightBank};
use super::map::Map;
use super::node::MapNode;
use super::position::{BlockPos, MAP_BLOCKSIZE, NodePos};
use crate::error::MapError;

const S: usize = MAP_BLOCKSIZE as usize;

fn on_block_border(p: NodePos) -> bool {
    let last = MAP_BLOCKSIZE - 1;
    p.x == 0 || p.y == 0 || p.z == 0 || p.x == last || p.y == last || p.z == last
}

impl<H: MapHooks> Map<H> {
    /// Writes `n` without touching anything else, recording its block.
    fn put_lit_node(&mut self, p: NodePos, n: MapNode, modified: &mut ModifiedBlocks) {
        if self.set_node(p, n).is_ok() {
            modified.insert(p.block());
        }
    }

    // ── Propagation primitives ──────────────────────────────────────

    /// Clears light that may have come from the nodes in `from_nodes`
    /// (position → light they had). Nodes that keep or emit their own
    /// light end up in `light_sources` for a following
    /// [`spread_light`](Self::spread_light).
    pub fn unspread_light(
        &mut self,
        bank: LightBank,
        from_nodes: &HashMap<NodePos, u8>,
        light_sources: &mut HashSet<NodePos>,
        modified: &mut ModifiedBlocks,
    ) {
        let defs = Arc::clone(self.defs());
        let mut current = from_nodes.clone();
        let mut rounds = 0usize;

        while !current.is_empty() {
            let mut next = HashMap::new();
            for (&pos, &oldlight) in &current {
                if oldlight == 0 {
                    continue;
                }
                for n2pos in pos.neighbors() {
                    let Ok(mut n2) = self.get_node(n2pos) else {
                        continue;
                    };
                    let l2 = n2.light(bank);
                    if l2 >= oldlight {
                        // Lit from elsewhere; spread it back in later.
                        light_sources.insert(n2pos);
                        continue;
                    }
                    let f = defs.get(n2.content);
                    let emitted = f.emitted_light();
                    if emitted > 0 {
                        if l2 > emitted {
                            n2.set_light(bank, emitted);
                            self.put_lit_node(n2pos, n2, modified);
                            next.insert(n2pos, l2);
                        }
                        light_sources.insert(n2pos);
                    } else if f.light_propagates && l2 != 0 {
                        n2.set_light(bank, 0);
                        self.put_lit_node(n2pos, n2, modified);
                        next.insert(n2pos, l2);
                    }
                }
            }
            current = next;
            rounds += 1;
        }
        trace!("unspread {:?} light from {} nodes in {} rounds", bank, from_nodes.len(), rounds);
    }

    /// Spreads light outwards from every node in `from_nodes` until
    /// nothing changes.
    pub fn spread_light(
        &mut self,
        bank: LightBank,
        from_nodes: &HashSet<NodePos>,
        modified: &mut ModifiedBlocks,
    ) {
        let defs = Arc::clone(self.defs());
        let rules = self.light_rules();
        let mut current = from_nodes.clone();
        let mut rounds = 0usize;

        while !current.is_empty() {
            let mut next = HashSet::new();
            for &pos in &current {
                let Ok(n) = self.get_node(pos) else {
                    continue;
                };
                let oldlight = n.light(bank);
                let newlight = rules.diminish(oldlight);
                for n2pos in pos.neighbors() {
                    let Ok(mut n2) = self.get_node(n2pos) else {
                        continue;
                    };
                    let l2 = n2.light(bank);
                    // A brighter neighbour may now be able to light us.
                    if l2 > rules.undiminish(oldlight) {
                        next.insert(n2pos);
                    }
                    if l2 < newlight && defs.get(n2.content).light_propagates {
                        n2.set_light(bank, newlight);
                        self.put_lit_node(n2pos, n2, modified);
                        next.insert(n2pos);
                    }
                }
            }
            current = next;
            rounds += 1;
        }
        trace!("spread {:?} light from {} nodes in {} rounds", bank, from_nodes.len(), rounds);
    }

    pub fn un_light_neighbors(
        &mut self,
        bank: LightBank,
        pos: NodePos,
        lightwas: u8,
        light_sources: &mut HashSet<NodePos>,
        modified: &mut ModifiedBlocks,
    ) {
        let from = HashMap::from([(pos, lightwas)]);
        self.unspread_light(bank, &from, light_sources, modified);
    }

    pub fn light_neighbors(&mut self, bank: LightBank, pos: NodePos, modified: &mut ModifiedBlocks) {
        let from = HashSet::from([pos]);
        self.spread_light(bank, &from, modified);
    }

    /// The loaded face neighbour of `p` with the most light in `bank`.
    pub fn get_brightest_neighbour(&self, bank: LightBank, p: NodePos) -> Option<NodePos> {
        p.neighbors()
            .into_iter()
            .filter_map(|n2pos| self.get_node(n2pos).ok().map(|n2| (n2pos, n2.light(bank))))
            .max_by_key(|&(_, light)| light)
            .map(|(n2pos, _)| n2pos)
    }

    /// Sets full sunlight downwards from `start` while nodes let it
    /// through, crossing block borders. Stops at an opaque node or an
    /// unloaded block. Returns the y of the lowest node lit (`start.y + 1`
    /// if not even `start` was).
    pub fn propagate_sunlight(&mut self, start: NodePos, modified: &mut ModifiedBlocks) -> i32 {
        let defs = Arc::clone(self.defs());
        let mut y = start.y;
        loop {
            let pos = NodePos::new(start.x, y, start.z);
            let Ok(mut n) = self.get_node(pos) else {
                break;
            };
            if !defs.get(n.content).sunlight_propagates {
                break;
            }
            n.set_light(LightBank::Day, LIGHT_SUN);
            self.put_lit_node(pos, n, modified);
            y -= 1;
        }
        y + 1
    }

    // ── Whole-block recomputation ───────────────────────────────────

    /// Recomputes `bank` for `blocks` from scratch, taking light only from
    /// already lit neighbour blocks. For the day bank sunlight is seeded
    /// per column and followed into lower blocks whose tops no longer
    /// agree with what comes from above.
    pub fn update_lighting(
        &mut self,
        bank: LightBank,
        blocks: &ModifiedBlocks,
        modified: &mut ModifiedBlocks,
    ) {
        let defs = Arc::clone(self.defs());
        let mut light_sources = HashSet::new();
        let mut unlight_from = HashMap::new();
        let mut processed = HashSet::new();

        for &start in blocks {
            let mut bp = start;
            loop {
                let sun_above = match bank {
                    LightBank::Day => match self.sun_entering_top(bp) {
                        Some(flags) => flags,
                        None => break,
                    },
                    LightBank::Night => [[false; S]; S],
                };

                let Some(block) = self.get_block_mut(bp) else {
                    break;
                };
                let origin = block.pos_relative();
                let Some(nodes) = block.nodes_mut() else {
                    break;
                };
                let mut changed = false;
                for (i, n) in nodes.iter_mut().enumerate() {
                    let local = local_from_index(i);
                    let old = n.light(bank);
                    let emitted = defs.get(n.content).emitted_light();
                    n.set_light(bank, emitted);
                    changed |= old != emitted;
                    if emitted > 0 {
                        light_sources.insert(origin + local);
                    }
                    if old > 0 && on_block_border(local) {
                        unlight_from.insert(origin + local, old);
                    }
                }
                if changed {
                    block.raise_modified(ModState::WriteNeeded);
                }
                modified.insert(bp);
                processed.insert(bp);

                if bank == LightBank::Day {
                    let sun_below = block.propagate_sunlight(&defs, &sun_above, &mut light_sources);
                    if !self.bottom_consistent(bp, &sun_below) {
                        bp = bp.offset(0, -1, 0);
                        continue;
                    }
                }
                break;
            }
        }

        self.unspread_light(bank, &unlight_from, &mut light_sources, modified);
        self.spread_light(bank, &light_sources, modified);

        for bp in processed {
            if let Some(block) = self.get_block_mut(bp) {
                block.set_lighting_expired(false);
            }
        }
        debug!("updated {:?} lighting of {} blocks", bank, blocks.len());
    }

    /// [`update_lighting`](Self::update_lighting) for both banks, then
    /// refreshes the day/night flags of everything touched.
    pub fn update_lighting_both(&mut self, blocks: &ModifiedBlocks, modified: &mut ModifiedBlocks) {
        for bank in LightBank::ALL {
            self.update_lighting(bank, blocks, modified);
        }
        self.update_day_night_diffs(modified);
    }

    /// Which columns of `bp` receive sunlight from above. `None` if the
    /// block is not loaded.
    fn sun_entering_top(&self, bp: BlockPos) -> Option<[[bool; S]; S]> {
        let block = self.get_block(bp).filter(|b| !b.is_dummy())?;
        let mut flags = [[false; S]; S];
        match self.get_block(bp.offset(0, 1, 0)).filter(|b| !b.is_dummy()) {
            Some(above) => {
                for x in 0..MAP_BLOCKSIZE {
                    for z in 0..MAP_BLOCKSIZE {
                        let n = above.get_node_no_ex(NodePos::new(x, 0, z));
                        flags[x as usize][z as usize] = n.light(LightBank::Day) == LIGHT_SUN;
                    }
                }
            }
            None => flags = [[!block.is_underground(); S]; S],
        }
        Some(flags)
    }

    /// Whether the top layer of the block below `bp` agrees with the
    /// sunlight leaving `bp`'s bottom. Missing blocks always agree.
    fn bottom_consistent(&self, bp: BlockPos, sun_below: &[[bool; S]; S]) -> bool {
        let Some(below) = self.get_block(bp.offset(0, -1, 0)).filter(|b| !b.is_dummy()) else {
            return true;
        };
        let defs = self.defs();
        for x in 0..MAP_BLOCKSIZE {
            for z in 0..MAP_BLOCKSIZE {
                let n = below.get_node_no_ex(NodePos::new(x, MAP_BLOCKSIZE - 1, z));
                let has_sun = n.light(LightBank::Day) == LIGHT_SUN;
                let should = sun_below[x as usize][z as usize] && defs.get(n.content).sunlight_propagates;
                if has_sun != should {
                    return false;
                }
            }
        }
        true
    }

    pub fn update_day_night_diffs(&mut self, blocks: &ModifiedBlocks) {
        for &bp in blocks {
            if let Some(block) = self.get_block_mut(bp) {
                block.update_day_night_diff();
            }
        }
    }

    /// Whether `bp` or any face neighbour is lit differently by day and by
    /// night, i.e. whether its mesh depends on the time of day.
    pub fn day_night_diffed(&self, bp: BlockPos) -> bool {
        std::iter::once(bp)
            .chain(bp.neighbors())
            .filter_map(|p| self.get_block(p))
            .any(|b| b.day_night_differs())
    }

    // ── Editing ─────────────────────────────────────────────────────

    /// Sunlight reaches `p` from straight above.
    fn under_sunlight(&self, p: NodePos) -> bool {
        match self.get_node(p.offset(0, 1, 0)) {
            Ok(top) => top.light(LightBank::Day) == LIGHT_SUN,
            Err(_) => self.is_node_underground(p).map(|u| !u).unwrap_or(false),
        }
    }

    /// Places `n` at `p` and brings both light banks up to date. Every
    /// block whose nodes changed is added to `modified`.
    pub fn add_node_and_update(
        &mut self,
        p: NodePos,
        n: MapNode,
        modified: &mut ModifiedBlocks,
    ) -> Result<(), MapError> {
        let defs = Arc::clone(self.defs());
        let old = self.get_node(p)?;
        let node_under_sunlight = self.under_sunlight(p);
        let mut n = n;
        let mut light_sources = HashSet::new();

        for bank in LightBank::ALL {
            self.un_light_neighbors(bank, p, old.light(bank), &mut light_sources, modified);
            n.set_light(bank, 0);
        }

        let f = defs.get(n.content);
        let emitted = f.emitted_light();
        if emitted > 0 {
            for bank in LightBank::ALL {
                n.set_light(bank, emitted);
            }
            light_sources.insert(p);
        }
        if node_under_sunlight && f.sunlight_propagates {
            n.set_light(LightBank::Day, LIGHT_SUN);
            light_sources.insert(p);
        }

        self.set_node(p, n)?;
        modified.insert(p.block());
        if old.content != n.content {
            self.remove_node_metadata(p);
        }

        if node_under_sunlight && f.sunlight_propagates && !defs.get(old.content).sunlight_propagates {
            // The column below was in our shadow.
            let below = p.offset(0, -1, 0);
            let ybottom = self.propagate_sunlight(below, modified);
            for y in ybottom..=below.y {
                light_sources.insert(NodePos::new(p.x, y, p.z));
            }
        }

        if node_under_sunlight && !f.sunlight_propagates {
            // Everything below that had direct sunlight is now shaded.
            let mut y = p.y - 1;
            loop {
                let n2pos = NodePos::new(p.x, y, p.z);
                match self.get_node(n2pos) {
                    Ok(n2) if n2.light(LightBank::Day) == LIGHT_SUN => {}
                    _ => break,
                }
                self.un_light_neighbors(LightBank::Day, n2pos, LIGHT_SUN, &mut light_sources, modified);
                let mut n2 = self.get_node(n2pos)?;
                n2.set_light(LightBank::Day, 0);
                self.put_lit_node(n2pos, n2, modified);
                y -= 1;
            }
        }

        for bank in LightBank::ALL {
            self.spread_light(bank, &light_sources, modified);
        }
        self.update_day_night_diffs(modified);
        self.queue_liquids_around(p);
        self.touch_blocks(modified.iter());
        Ok(())
    }

    /// Replaces the node at `p` with air and brings both light banks up
    /// to date.
    pub fn remove_node_and_update(
        &mut self,
        p: NodePos,
        modified: &mut ModifiedBlocks,
    ) -> Result<(), MapError> {
        let old = self.get_node(p)?;
        let node_under_sunlight = self.under_sunlight(p);
        let mut light_sources = HashSet::new();

        for bank in LightBank::ALL {
            self.un_light_neighbors(bank, p, old.light(bank), &mut light_sources, modified);
        }

        self.remove_node_metadata(p);
        self.set_node(p, MapNode::AIR)?;

        for bank in LightBank::ALL {
            self.spread_light(bank, &light_sources, modified);
        }
        modified.insert(p.block());

        if node_under_sunlight {
            let ybottom = self.propagate_sunlight(p, modified);
            for y in (ybottom..=p.y).rev() {
                self.light_neighbors(LightBank::Day, NodePos::new(p.x, y, p.z), modified);
            }
        }

        for bank in LightBank::ALL {
            if let Some(brightest) = self.get_brightest_neighbour(bank, p) {
                self.light_neighbors(bank, brightest, modified);
            }
        }

        self.update_day_night_diffs(modified);
        self.queue_liquids_around(p);
        self.touch_blocks(modified.iter());
        Ok(())
    }

    /// [`add_node_and_update`](Self::add_node_and_update), then an
    /// `AddNode` event. False if `p` is not loaded.
    pub fn add_node_with_event(&mut self, p: NodePos, n: MapNode) -> bool {
        let mut modified = ModifiedBlocks::new();
        if let Err(e) = self.add_node_and_update(p, n, &mut modified) {
            debug!("add_node at {:?} failed: {}", p, e);
            return false;
        }
        let mut event = MapEditEvent::new(MapEditEventKind::AddNode, p);
        event.node = n;
        event.modified_blocks = modified;
        self.finish_edit(event);
        true
    }

    /// [`remove_node_and_update`](Self::remove_node_and_update), then a
    /// `RemoveNode` event. False if `p` is not loaded.
    pub fn remove_node_with_event(&mut self, p: NodePos) -> bool {
        let mut modified = ModifiedBlocks::new();
        if let Err(e) = self.remove_node_and_update(p, &mut modified) {
            debug!("remove_node at {:?} failed: {}", p, e);
            return false;
        }
        let mut event = MapEditEvent::new(MapEditEventKind::RemoveNode, p);
        event.modified_blocks = modified;
        self.finish_edit(event);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::MapBlock;
    use crate::world::light::LightRules;
    use crate::world::node::{NodeDefs, content};

    fn dark_room() -> Map {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        let mut block = MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::new(content::STONE));
        block
            .drawbox(NodePos::new(4, 4, 4), NodePos::new(8, 8, 8), MapNode::AIR)
            .unwrap();
        block.set_underground(true);
        map.insert_block(block);
        map
    }

    #[test]
    fn spread_stops_at_opaque_nodes() {
        let mut map = dark_room();
        let src = NodePos::new(6, 6, 6);
        let mut n = map.get_node(src).unwrap();
        n.set_light(LightBank::Night, 10);
        map.set_node(src, n).unwrap();

        let mut modified = ModifiedBlocks::new();
        map.light_neighbors(LightBank::Night, src, &mut modified);

        assert_eq!(map.get_node(NodePos::new(7, 6, 6)).unwrap().light(LightBank::Night), 9);
        assert_eq!(map.get_node(NodePos::new(4, 4, 4)).unwrap().light(LightBank::Night), 4);
        assert_eq!(map.get_node(NodePos::new(3, 6, 6)).unwrap().light(LightBank::Night), 0);
        assert_eq!(map.get_node(src).unwrap().light(LightBank::Day), 0);
        assert!(modified.contains(&BlockPos::new(0, 0, 0)));
    }

    #[test]
    fn torch_lights_both_banks_and_leaves_no_trace() {
        let mut map = dark_room().with_light_rules(LightRules::new(2));
        let p = NodePos::new(8, 8, 8);
        let mut modified = ModifiedBlocks::new();
        map.add_node_and_update(p, MapNode::new(content::TORCH), &mut modified).unwrap();

        for bank in LightBank::ALL {
            assert_eq!(map.get_node(p).unwrap().light(bank), 13);
            assert_eq!(map.get_node(NodePos::new(9, 8, 8)).unwrap().light(bank), 11);
        }

        map.remove_node_and_update(p, &mut modified).unwrap();
        for bank in LightBank::ALL {
            for x in 4..12 {
                assert_eq!(map.get_node(NodePos::new(x, 8, 8)).unwrap().light(bank), 0);
            }
        }
    }

    #[test]
    fn sunlight_runs_down_a_column_until_stone() {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        for y in 0..2 {
            map.insert_block(MapBlock::filled(BlockPos::new(0, y, 0), MapNode::AIR));
        }
        map.set_node(NodePos::new(5, 12, 5), MapNode::new(content::STONE)).unwrap();

        let mut modified = ModifiedBlocks::new();
        let bottom = map.propagate_sunlight(NodePos::new(5, 31, 5), &mut modified);
        assert_eq!(bottom, 13);
        assert!(modified.contains(&BlockPos::new(0, 1, 0)));
        assert!(modified.contains(&BlockPos::new(0, 0, 0)));
        for y in 13..32 {
            assert_eq!(map.get_node(NodePos::new(5, y, 5)).unwrap().light(LightBank::Day), LIGHT_SUN);
        }
        assert_eq!(map.get_node(NodePos::new(5, 12, 5)).unwrap().light(LightBank::Day), 0);
        assert_eq!(map.get_node(NodePos::new(5, 11, 5)).unwrap().light(LightBank::Day), 0);

        // Without a stone the column ends where the loaded blocks do.
        assert_eq!(map.propagate_sunlight(NodePos::new(6, 31, 6), &mut modified), 0);

        // Starting inside stone lights nothing.
        let mut untouched = ModifiedBlocks::new();
        assert_eq!(map.propagate_sunlight(NodePos::new(5, 12, 5), &mut untouched), 13);
        assert!(untouched.is_empty());
    }

    #[test]
    fn brightest_neighbour_ignores_unloaded_nodes() {
        let map = dark_room();
        assert!(map.get_brightest_neighbour(LightBank::Day, NodePos::new(0, 0, 0)).is_some());
        assert!(map.get_brightest_neighbour(LightBank::Day, NodePos::new(100, 0, 0)).is_none());
    }
}
