//! Liquid spread and drainage.
//!
//! A source has strength `LIQUID_LEVEL_MAX + 1`; flowing liquid stores its
//! level (1..=7) in param2. Liquid falls first, then spreads sideways one
//! level weaker. Flowing liquid with nothing feeding it drains to air.
//! Changes go through the lighting-aware edit API, which queues the
//! neighbourhood again, so the queue drains itself over several calls.

use std::sync::Arc;

use tracing::trace;

use super::event::ModifiedBlocks;
use super::hooks::MapHooks;
use super::map::Map;
use super::node::{Content, LIQUID_FLOW_DOWN, LIQUID_LEVEL_MAX, LiquidKind, MapNode, NodeDefs};
use super::position::NodePos;

/// Default cap on nodes processed by one [`Map::transform_liquids`] call.
pub const LIQUID_LOOP_MAX: usize = 10_000;

const SOURCE_STRENGTH: u8 = LIQUID_LEVEL_MAX + 1;

#[derive(Clone, Copy)]
struct LiquidPair {
    source: Content,
    flowing: Content,
}

impl LiquidPair {
    fn of(defs: &NodeDefs, content: Content) -> Option<Self> {
        match defs.get(content).liquid {
            LiquidKind::Source { flowing } => Some(Self { source: content, flowing }),
            LiquidKind::Flowing { source } => Some(Self { source, flowing: content }),
            LiquidKind::None => None,
        }
    }

    fn strength(&self, n: MapNode) -> Option<u8> {
        if n.content == self.source {
            Some(SOURCE_STRENGTH)
        } else if n.content == self.flowing {
            Some(n.liquid_level())
        } else {
            None
        }
    }
}

fn horizontal_neighbors(p: NodePos) -> [NodePos; 4] {
    [
        p.offset(1, 0, 0),
        p.offset(-1, 0, 0),
        p.offset(0, 0, 1),
        p.offset(0, 0, -1),
    ]
}

impl<H: MapHooks> Map<H> {
    /// Schedules `p` for a liquid update. Already queued positions keep
    /// their place.
    pub fn queue_liquid(&mut self, p: NodePos) {
        self.transforming_liquid.insert(p);
    }

    pub fn liquid_queue_len(&self) -> usize {
        self.transforming_liquid.len()
    }

    /// Queues `p` and its face neighbours if they hold liquid.
    pub(crate) fn queue_liquids_around(&mut self, p: NodePos) {
        let defs = Arc::clone(self.defs());
        for q in std::iter::once(p).chain(p.neighbors()) {
            if let Ok(n) = self.get_node(q) {
                if defs.get(n.content).is_liquid() {
                    self.transforming_liquid.insert(q);
                }
            }
        }
    }

    /// Flowing liquid at `p` is fed from above or by a stronger
    /// horizontal neighbour.
    fn liquid_supported(&self, p: NodePos, level: u8, pair: LiquidPair) -> bool {
        if let Ok(above) = self.get_node(p.offset(0, 1, 0)) {
            if pair.strength(above).is_some() {
                return true;
            }
        }
        horizontal_neighbors(p).into_iter().any(|q| {
            self.get_node(q)
                .ok()
                .and_then(|n| pair.strength(n))
                .is_some_and(|s| s > level)
        })
    }

    /// Processes up to `max_nodes` queued liquid positions. Returns how
    /// many were taken off the queue.
    pub fn transform_liquids(&mut self, modified: &mut ModifiedBlocks, max_nodes: usize) -> usize {
        let defs = Arc::clone(self.defs());
        let mut processed = 0;

        while processed < max_nodes {
            let Some(p) = self.transforming_liquid.shift_remove_index(0) else {
                break;
            };
            processed += 1;

            let Ok(n0) = self.get_node(p) else {
                continue;
            };
            let Some(pair) = LiquidPair::of(&defs, n0.content) else {
                continue;
            };
            let Some(level) = pair.strength(n0) else {
                continue;
            };

            if n0.content == pair.flowing && !self.liquid_supported(p, level, pair) {
                trace!("liquid at {:?} drains", p);
                let _ = self.remove_node_and_update(p, modified);
                continue;
            }

            let below = p.offset(0, -1, 0);
            let falling = MapNode::with_param2(pair.flowing, LIQUID_LEVEL_MAX | LIQUID_FLOW_DOWN);
            if let Ok(nb) = self.get_node(below) {
                let refill = nb.content == pair.flowing && nb.param2 != falling.param2;
                if defs.get(nb.content).floodable || refill {
                    let _ = self.add_node_and_update(below, falling, modified);
                    continue;
                }
            }

            let spread = level.min(SOURCE_STRENGTH).saturating_sub(1);
            if spread == 0 {
                continue;
            }
            let flowing = MapNode::with_param2(pair.flowing, spread);
            for q in horizontal_neighbors(p) {
                let Ok(n2) = self.get_node(q) else {
                    continue;
                };
                let weaker = n2.content == pair.flowing
                    && n2.param2 & LIQUID_FLOW_DOWN == 0
                    && n2.liquid_level() < spread;
                if defs.get(n2.content).floodable || weaker {
                    let _ = self.add_node_and_update(q, flowing, modified);
                }
            }
        }
        processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::block::MapBlock;
    use crate::world::node::content;
    use crate::world::position::BlockPos;

    fn basin() -> Map {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        let mut block = MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::new(content::STONE));
        block
            .drawbox(NodePos::new(4, 5, 4), NodePos::new(6, 1, 6), MapNode::AIR)
            .unwrap();
        block.set_underground(true);
        map.insert_block(block);
        map
    }

    fn settle(map: &mut Map) {
        let mut modified = ModifiedBlocks::new();
        for _ in 0..200 {
            if map.liquid_queue_len() == 0 {
                return;
            }
            map.transform_liquids(&mut modified, LIQUID_LOOP_MAX);
        }
        panic!("liquid never settled");
    }

    #[test]
    fn source_floods_basin_with_falling_levels() {
        let mut map = basin();
        let mut modified = ModifiedBlocks::new();
        map.add_node_and_update(NodePos::new(6, 5, 6), MapNode::new(content::WATER_SOURCE), &mut modified)
            .unwrap();
        assert_eq!(map.liquid_queue_len(), 1);
        settle(&mut map);

        let level = |x, z| {
            let n = map.get_node(NodePos::new(x, 5, z)).unwrap();
            assert_eq!(n.content, content::WATER_FLOWING, "at ({x}, {z})");
            n.liquid_level()
        };
        assert_eq!(level(7, 6), 7);
        assert_eq!(level(8, 6), 6);
        assert_eq!(level(4, 4), 4);
        assert_eq!(level(9, 9), 2);
        assert_eq!(map.get_node(NodePos::new(6, 6, 6)).unwrap().content, content::STONE);
    }

    #[test]
    fn flowing_liquid_drains_without_source() {
        let mut map = basin();
        let mut modified = ModifiedBlocks::new();
        let src = NodePos::new(6, 5, 6);
        map.add_node_and_update(src, MapNode::new(content::WATER_SOURCE), &mut modified)
            .unwrap();
        settle(&mut map);

        map.remove_node_and_update(src, &mut modified).unwrap();
        settle(&mut map);

        for x in 4..10 {
            for z in 4..10 {
                assert_eq!(map.get_node(NodePos::new(x, 5, z)).unwrap().content, content::AIR);
            }
        }
    }

    #[test]
    fn liquid_falls_before_spreading() {
        let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
        let mut block = MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::AIR);
        block
            .drawbox(NodePos::new(0, 0, 0), NodePos::new(16, 1, 16), MapNode::new(content::STONE))
            .unwrap();
        block.set_underground(true);
        map.insert_block(block);

        let mut modified = ModifiedBlocks::new();
        map.add_node_and_update(NodePos::new(8, 3, 8), MapNode::new(content::WATER_SOURCE), &mut modified)
            .unwrap();
        map.transform_liquids(&mut modified, 1);

        let below = map.get_node(NodePos::new(8, 2, 8)).unwrap();
        assert_eq!(below.content, content::WATER_FLOWING);
        assert_ne!(below.param2 & LIQUID_FLOW_DOWN, 0);
        assert_eq!(map.get_node(NodePos::new(9, 3, 8)).unwrap().content, content::AIR);
    }
}
