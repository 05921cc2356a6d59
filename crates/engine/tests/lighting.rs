//! Light propagation through whole blocks, driven only through the public
//! map API.

use std::collections::HashSet;
use std::sync::Arc;

use voxmap_engine::world::{
    BlockPos, LightBank, LightRules, Map, MapBlock, MapNode, ModifiedBlocks, NodeDefs, NodePos,
};
use voxmap_engine::world::node::content;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A stone block with an air corridor along z at x = 8, y = 8.
fn corridor() -> Map {
    let mut map = Map::detached(Arc::new(NodeDefs::builtin())).with_light_rules(LightRules::new(2));
    let mut block = MapBlock::filled(BlockPos::new(0, 0, 0), MapNode::new(content::STONE));
    block
        .drawbox(NodePos::new(8, 8, 0), NodePos::new(1, 1, 16), MapNode::AIR)
        .unwrap();
    block.set_underground(true);
    map.insert_block(block);
    map
}

fn set_light(map: &mut Map, p: NodePos, bank: LightBank, level: u8) {
    let mut n = map.get_node(p).unwrap();
    n.set_light(bank, level);
    map.set_node(p, n).unwrap();
}

fn light_at(map: &Map, z: i32) -> u8 {
    map.get_node(NodePos::new(8, 8, z)).unwrap().light(LightBank::Night)
}

fn snapshot(map: &Map, bp: BlockPos) -> Vec<MapNode> {
    let origin = bp.origin();
    let mut out = Vec::new();
    for z in 0..16 {
        for y in 0..16 {
            for x in 0..16 {
                out.push(map.get_node(origin.offset(x, y, z)).unwrap());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Corridor scenarios
// ---------------------------------------------------------------------------

#[test]
fn corridor_light_falls_off_by_step() {
    let mut map = corridor();
    let src = NodePos::new(8, 8, 8);
    set_light(&mut map, src, LightBank::Night, 14);

    let mut modified = ModifiedBlocks::new();
    map.light_neighbors(LightBank::Night, src, &mut modified);

    let expected = [0, 0, 2, 4, 6, 8, 10, 12, 14, 12, 10, 8, 6, 4, 2, 0];
    for (z, want) in expected.into_iter().enumerate() {
        assert_eq!(light_at(&map, z as i32), want, "z = {z}");
    }
    // Walls never take light.
    assert_eq!(map.get_node(NodePos::new(9, 8, 8)).unwrap().light(LightBank::Night), 0);
    assert_eq!(map.get_node(NodePos::new(8, 9, 9)).unwrap().light(LightBank::Night), 0);
    assert!(modified.contains(&BlockPos::new(0, 0, 0)));
}

#[test]
fn removing_the_only_source_darkens_the_corridor() {
    let mut map = corridor();
    let src = NodePos::new(8, 8, 8);
    set_light(&mut map, src, LightBank::Night, 14);
    let mut modified = ModifiedBlocks::new();
    map.light_neighbors(LightBank::Night, src, &mut modified);

    set_light(&mut map, src, LightBank::Night, 0);
    let mut sources = HashSet::new();
    map.un_light_neighbors(LightBank::Night, src, 14, &mut sources, &mut modified);
    map.spread_light(LightBank::Night, &sources, &mut modified);

    for z in 0..16 {
        assert_eq!(light_at(&map, z), 0, "z = {z}");
    }
}

#[test]
fn removing_one_of_two_sources_keeps_the_other() {
    let mut map = corridor();
    let a = NodePos::new(8, 8, 2);
    let b = NodePos::new(8, 8, 13);
    let mut modified = ModifiedBlocks::new();
    for p in [a, b] {
        set_light(&mut map, p, LightBank::Night, 14);
        map.light_neighbors(LightBank::Night, p, &mut modified);
    }
    assert_eq!(light_at(&map, 8), 4);

    set_light(&mut map, b, LightBank::Night, 0);
    let mut sources = HashSet::new();
    map.un_light_neighbors(LightBank::Night, b, 14, &mut sources, &mut modified);
    map.spread_light(LightBank::Night, &sources, &mut modified);

    for z in 0..16i32 {
        let want = 14i32.saturating_sub(2 * (z - 2).abs()).max(0) as u8;
        assert_eq!(light_at(&map, z), want, "z = {z}");
    }
}

// ---------------------------------------------------------------------------
// Edits and whole-block updates
// ---------------------------------------------------------------------------

#[test]
fn add_then_remove_restores_sunlight() {
    let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
    let bp = BlockPos::new(0, 0, 0);
    map.insert_block(MapBlock::filled(bp, MapNode::AIR));
    let mut modified = ModifiedBlocks::new();
    map.update_lighting_both(&ModifiedBlocks::from([bp]), &mut modified);

    let before = snapshot(&map, bp);
    assert!(before.iter().all(|n| n.light(LightBank::Day) == 15 && n.light(LightBank::Night) == 0));

    let p = NodePos::new(8, 8, 8);
    map.add_node_and_update(p, MapNode::new(content::STONE), &mut modified).unwrap();
    assert!(map.get_node(NodePos::new(8, 3, 8)).unwrap().light(LightBank::Day) < 15);
    assert_eq!(map.get_node(NodePos::new(8, 9, 8)).unwrap().light(LightBank::Day), 15);

    map.remove_node_and_update(p, &mut modified).unwrap();
    assert_eq!(snapshot(&map, bp), before);
}

#[test]
fn sunlight_is_followed_into_lower_blocks() {
    let mut map = Map::detached(Arc::new(NodeDefs::builtin()));
    let top = BlockPos::new(0, 1, 0);
    let bottom = BlockPos::new(0, 0, 0);
    map.insert_block(MapBlock::filled(top, MapNode::AIR));
    map.insert_block(MapBlock::filled(bottom, MapNode::AIR));

    let mut modified = ModifiedBlocks::new();
    map.update_lighting_both(&ModifiedBlocks::from([top, bottom]), &mut modified);

    for p in [NodePos::new(0, 0, 0), NodePos::new(15, 15, 15), NodePos::new(7, 31, 3)] {
        assert_eq!(map.get_node(p).unwrap().light(LightBank::Day), 15);
    }
    assert!(!map.get_block(bottom).unwrap().lighting_expired());
    assert!(map.day_night_diffed(bottom));
}

#[test]
fn torch_in_the_corridor_lights_both_banks() {
    let mut map = corridor();
    let p = NodePos::new(8, 8, 8);
    let mut modified = ModifiedBlocks::new();
    map.add_node_and_update(p, MapNode::new(content::TORCH), &mut modified).unwrap();

    for bank in LightBank::ALL {
        assert_eq!(map.get_node(p.offset(0, 0, 1)).unwrap().light(bank), 11);
        assert_eq!(map.get_node(p.offset(0, 0, -6)).unwrap().light(bank), 1);
    }

    map.remove_node_and_update(p, &mut modified).unwrap();
    for z in 0..16 {
        assert_eq!(light_at(&map, z), 0);
    }
}
