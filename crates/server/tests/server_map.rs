use std::sync::Arc;

use tokio::sync::broadcast;
use voxmap_engine::MapError;
use voxmap_engine::world::node::content;
use voxmap_engine::world::{BlockPos, LIGHT_SUN, LightBank, MapEditEventKind, MapNode, ModState, NodeDefs, NodePos};
use voxmap_server::event_bus::{self, BUS_CAPACITY};
use voxmap_server::generator::TerrainGenerator;
use voxmap_server::server_map::{BlockStatus, SaveScope, ServerMap};
use voxmap_server::storage::{BlockStorage, FileStorage, MemoryStorage};

const ORIGIN: BlockPos = BlockPos::new(0, 0, 0);

fn open(storage: Box<dyn BlockStorage>, seed: u64) -> ServerMap {
    ServerMap::new(
        Arc::new(NodeDefs::builtin()),
        storage,
        Box::new(TerrainGenerator::flat(4)),
        seed,
    )
    .unwrap()
}

#[test]
fn emerge_without_generation_leaves_a_dummy() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);

    assert_eq!(map.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Dummy);
    assert!(map.map().get_block(ORIGIN).unwrap().is_dummy());
    assert_eq!(map.stats().dummies, 1);

    assert_eq!(map.emerge_block(ORIGIN, true).unwrap(), BlockStatus::Generated);
    let block = map.map().get_block(ORIGIN).unwrap();
    assert!(!block.is_dummy());
    assert!(block.is_generated());
    assert_eq!(map.stats().dummies, 0);

    assert_eq!(map.emerge_block(ORIGIN, true).unwrap(), BlockStatus::InMemory);
}

#[test]
fn emerge_past_the_generation_limit_fails() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);
    assert!(matches!(
        map.emerge_block(BlockPos::new(0, 2000, 0), true),
        Err(MapError::InvalidPosition(_))
    ));
}

#[test]
fn ground_level_spans_stacked_blocks() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);
    let emerged = map
        .emerge_area(BlockPos::new(0, -1, 0), BlockPos::new(0, 1, 0), true)
        .unwrap();
    assert_eq!(emerged, 3);
    assert_eq!(map.find_ground_level(7, 7), Some(4));
    assert_eq!(map.find_ground_level(100, 7), None);
    assert!(map.map().get_block(BlockPos::new(0, -1, 0)).unwrap().is_underground());
}

#[test]
fn edits_survive_unload_and_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let placed = NodePos::new(5, 10, 5);
    {
        let mut map = open(Box::new(FileStorage::new(dir.path())), 3);
        map.emerge_block(ORIGIN, true).unwrap();
        assert!(map.add_node(placed, MapNode::new(content::STONE)));

        let stats = map.step(100.0, 1.0, 0);
        assert_eq!(stats.blocks_unloaded, 1);
        assert_eq!(stats.blocks_saved, 1);
        assert_eq!(stats.sectors_unloaded, 1);
        assert!(map.map().get_block(ORIGIN).is_none());

        assert_eq!(map.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Loaded);
        assert_eq!(map.map().get_node(placed).unwrap().content, content::STONE);
        map.save(SaveScope::OnlyChanged);
    }

    let mut reopened = open(Box::new(FileStorage::new(dir.path())), 99);
    assert_eq!(reopened.seed(), 3);
    assert_eq!(reopened.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Loaded);
    assert_eq!(reopened.map().get_node(placed).unwrap().content, content::STONE);
    let above = reopened.map().get_node(placed.offset(0, 1, 0)).unwrap();
    assert_eq!(above.light(LightBank::Day), LIGHT_SUN);
    assert_eq!(reopened.metrics().snapshot().blocks_loaded, 1);
}

#[test]
fn modified_level_resets_only_after_a_successful_save() {
    let storage = MemoryStorage::new();
    let mut map = open(Box::new(storage.clone()), 1);
    map.emerge_block(ORIGIN, true).unwrap();
    assert_ne!(map.map().get_block(ORIGIN).unwrap().modified(), ModState::Clean);

    storage.set_fail_writes(true);
    assert_eq!(map.save(SaveScope::OnlyChanged), 0);
    assert_eq!(map.stats().modified, 1);
    assert!(map.metrics().snapshot().save_failures >= 1);

    // A block that cannot be written is not evicted.
    let stats = map.step(100.0, 1.0, 0);
    assert_eq!(stats.save_failures, 1);
    assert_eq!(stats.blocks_unloaded, 0);
    assert!(map.map().get_block(ORIGIN).is_some());

    storage.set_fail_writes(false);
    assert_eq!(map.save(SaveScope::OnlyChanged), 1);
    assert_eq!(map.map().get_block(ORIGIN).unwrap().modified(), ModState::Clean);
    assert!(storage.contains(ORIGIN));

    // Nothing left to write.
    assert_eq!(map.save(SaveScope::OnlyChanged), 0);
    assert_eq!(map.save(SaveScope::All), 1);
}

#[test]
fn corrupt_blocks_are_regenerated() {
    let storage = MemoryStorage::new();
    storage.put_raw(ORIGIN, b"definitely not a block".to_vec());
    let mut map = open(Box::new(storage.clone()), 1);

    assert_eq!(map.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Dummy);
    assert_eq!(map.emerge_block(ORIGIN, true).unwrap(), BlockStatus::Generated);
    assert_eq!(map.metrics().snapshot().corrupt_blocks, 2);
    assert_eq!(
        map.map().get_node(NodePos::new(0, 4, 0)).unwrap().content,
        content::GRASS
    );

    // The next save replaces the bad data.
    assert_eq!(map.save(SaveScope::OnlyChanged), 1);
    map.step(100.0, 1.0, 0);
    assert_eq!(map.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Loaded);
}

#[test]
fn event_bus_sees_generation_and_edits() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);
    let (tx, mut rx) = broadcast::channel(BUS_CAPACITY);
    event_bus::attach(map.map_mut(), tx);

    map.emerge_block(ORIGIN, true).unwrap();
    let generated = rx.try_recv().unwrap();
    assert_eq!(generated.kind, MapEditEventKind::Other);
    assert!(generated.blocks.contains(&ORIGIN));

    let p = NodePos::new(2, 5, 2);
    assert!(map.add_node(p, MapNode::new(content::GLASS)));
    let edit = rx.try_recv().unwrap();
    assert_eq!(edit.kind, MapEditEventKind::AddNode);
    assert_eq!(edit.pos, p);
    assert_eq!(edit.node.content, content::GLASS);
    assert_eq!(map.metrics().snapshot().edits, 1);
}

#[test]
fn water_spreads_over_the_step_loop() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);
    map.emerge_block(ORIGIN, true).unwrap();

    let source = NodePos::new(8, 5, 8);
    assert!(map.add_node(source, MapNode::new(content::WATER_SOURCE)));
    assert_eq!(map.stats().liquid_queue, 1);

    for _ in 0..50 {
        if map.stats().liquid_queue == 0 {
            break;
        }
        map.step(0.1, 1000.0, 10_000);
    }
    assert_eq!(map.stats().liquid_queue, 0);

    let next = map.map().get_node(source.offset(1, 0, 0)).unwrap();
    assert_eq!(next.content, content::WATER_FLOWING);
    assert_eq!(next.liquid_level(), 7);
    let far = map.map().get_node(source.offset(0, 0, 7)).unwrap();
    assert_eq!(far.content, content::WATER_FLOWING);
    assert_eq!(far.liquid_level(), 1);
}

#[test]
fn blocks_in_use_are_not_unloaded() {
    let storage = MemoryStorage::new();
    let mut map = open(Box::new(storage.clone()), 1);
    let idle = BlockPos::new(3, 0, 0);
    map.emerge_block(ORIGIN, true).unwrap();
    map.emerge_block(idle, true).unwrap();

    let p = NodePos::new(2, 10, 2);
    for i in 0..40 {
        map.step(1.0, 30.0, 0);
        assert_eq!(map.emerge_block(ORIGIN, true).unwrap(), BlockStatus::InMemory, "tick {i}");
        if i % 2 == 0 {
            assert!(map.add_node(p, MapNode::new(content::STONE)));
        } else {
            assert!(map.remove_node(p));
        }
    }

    assert!(map.map().get_block(idle).is_none());
    assert!(storage.contains(idle));
    assert_eq!(map.metrics().snapshot().blocks_loaded, 0);
}

#[test]
fn edits_restart_the_unload_countdown() {
    let mut map = open(Box::new(MemoryStorage::new()), 1);
    map.emerge_block(ORIGIN, true).unwrap();
    map.step(20.0, 30.0, 0);
    assert!(map.add_node(NodePos::new(1, 8, 1), MapNode::new(content::GLASS)));
    assert_eq!(map.map().get_block(ORIGIN).unwrap().usage_timer(), 0.0);

    let stats = map.step(20.0, 30.0, 0);
    assert_eq!(stats.blocks_unloaded, 0);
}

#[test]
fn periodic_save_leaves_write_at_unload_blocks_for_the_sweep() {
    let storage = MemoryStorage::new();
    let mut map = open(Box::new(storage.clone()), 1);
    map.emerge_block(ORIGIN, true).unwrap();
    assert_eq!(map.save(SaveScope::OnlyChanged), 1);

    map.map_mut().get_block_mut(ORIGIN).unwrap().set_timestamp(42);
    assert_eq!(map.map().get_block(ORIGIN).unwrap().modified(), ModState::WriteAtUnload);
    assert_eq!(map.save(SaveScope::OnlyChanged), 0);
    assert_eq!(map.map().get_block(ORIGIN).unwrap().modified(), ModState::WriteAtUnload);

    let stats = map.step(100.0, 1.0, 0);
    assert_eq!(stats.blocks_saved, 1);
    assert_eq!(stats.blocks_unloaded, 1);
    assert_eq!(map.emerge_block(ORIGIN, false).unwrap(), BlockStatus::Loaded);
    assert_eq!(map.map().get_block(ORIGIN).unwrap().timestamp(), 42);
}
