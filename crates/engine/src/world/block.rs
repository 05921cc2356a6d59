//! 16³ blocks of nodes.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use super::codec::{ByteReader, ByteWriter};
use super::hooks::MapHooks;
use super::light::{LIGHT_SUN, LightBank};
use super::map::Map;
use super::metadata::NodeMetadataList;
use super::node::{Content, MapNode, NodeDefs};
use super::position::{BlockPos, MAP_BLOCKSIZE, NodePos};
use super::voxel::{VoxelArea, VoxelManipulator};
use crate::error::MapError;
use crate::mesh::{MeshSlot, NodeMod, NodeModMap};

/// Number of nodes in one block.
pub const BLOCK_VOLUME: usize = (MAP_BLOCKSIZE * MAP_BLOCKSIZE * MAP_BLOCKSIZE) as usize;

/// Static objects one block can store; the disk format counts them in a u16.
pub const MAX_STATIC_OBJECTS: usize = u16::MAX as usize;

/// Current serialization format version. Anything else is rejected.
pub const SER_FMT_VER: u8 = 1;

/// Timestamp of a block that was never stamped.
pub const BLOCK_TIMESTAMP_UNDEFINED: u32 = u32::MAX;

const FLAG_UNDERGROUND: u8 = 0x01;
const FLAG_DAY_NIGHT_DIFFERS: u8 = 0x02;
const FLAG_LIGHTING_EXPIRED: u8 = 0x04;
const FLAG_GENERATED: u8 = 0x08;

/// How urgently a block has to reach the disk.
///
/// Only ever raised until a successful save resets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ModState {
    #[default]
    Clean,
    /// Save when the block is unloaded.
    WriteAtUnload,
    /// Save on the next persistence sweep.
    WriteNeeded,
}

/// Result of a downward ground search in one column of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroundLevel {
    /// No ground content in the column.
    AllAir,
    /// The topmost node is already ground; the surface is higher up.
    AtTop,
    /// Local y of the highest ground node.
    At(i32),
}

/// An object stored with the block while nothing simulates it.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticObject {
    pub kind: u8,
    pub pos: [f32; 3],
    pub data: Vec<u8>,
}

/// Per-column sunlight flags, indexed `[x][z]`.
pub type ColumnFlags = [[bool; MAP_BLOCKSIZE as usize]; MAP_BLOCKSIZE as usize];

#[inline]
const fn index(p: NodePos) -> usize {
    (p.z * MAP_BLOCKSIZE * MAP_BLOCKSIZE + p.y * MAP_BLOCKSIZE + p.x) as usize
}

/// A cube of `MAP_BLOCKSIZE³` nodes plus everything stored alongside them.
///
/// A dummy block has no node array. It marks a position that is known to
/// have no data so it is not looked up again.
#[derive(Debug)]
pub struct MapBlock {
    pos: BlockPos,
    data: Option<Box<[MapNode]>>,
    modified: ModState,
    is_underground: bool,
    lighting_expired: bool,
    day_night_differs: bool,
    generated: bool,
    timestamp: u32,
    usage_timer: f32,
    metadata: NodeMetadataList,
    static_objects: Vec<StaticObject>,
    mesh: Arc<Mutex<MeshSlot>>,
}

impl MapBlock {
    /// An allocated block filled with `CONTENT_IGNORE`.
    pub fn new(pos: BlockPos) -> Self {
        let mut block = Self::new_dummy(pos);
        block.reallocate();
        block
    }

    pub fn new_dummy(pos: BlockPos) -> Self {
        Self {
            pos,
            data: None,
            modified: ModState::Clean,
            is_underground: false,
            lighting_expired: true,
            day_night_differs: false,
            generated: false,
            timestamp: BLOCK_TIMESTAMP_UNDEFINED,
            usage_timer: 0.0,
            metadata: NodeMetadataList::new(),
            static_objects: Vec::new(),
            mesh: Arc::new(Mutex::new(MeshSlot::default())),
        }
    }

    /// An allocated block with every node set to `node`.
    pub fn filled(pos: BlockPos, node: MapNode) -> Self {
        let mut block = Self::new_dummy(pos);
        block.data = Some(vec![node; BLOCK_VOLUME].into_boxed_slice());
        block.modified = ModState::WriteNeeded;
        block
    }

    pub const fn pos(&self) -> BlockPos {
        self.pos
    }

    /// Absolute position of local node (0,0,0).
    pub const fn pos_relative(&self) -> NodePos {
        self.pos.origin()
    }

    pub fn area(&self) -> VoxelArea {
        VoxelArea::of_block(self.pos)
    }

    // ── Allocation ──────────────────────────────────────────────────

    pub fn is_dummy(&self) -> bool {
        self.data.is_none()
    }

    /// Replaces the node array with a fresh one full of `CONTENT_IGNORE`.
    pub fn reallocate(&mut self) {
        self.data = Some(vec![MapNode::IGNORE; BLOCK_VOLUME].into_boxed_slice());
        self.raise_modified(ModState::WriteNeeded);
    }

    /// Turns a dummy into a real (ignore-filled) block.
    pub fn undummify(&mut self) {
        debug_assert!(self.is_dummy(), "undummify on allocated block {:?}", self.pos);
        self.reallocate();
    }

    // ── Flags ───────────────────────────────────────────────────────

    pub fn modified(&self) -> ModState {
        self.modified
    }

    pub fn raise_modified(&mut self, level: ModState) {
        self.modified = self.modified.max(level);
    }

    /// Marks the block clean. Only call right after it was written out.
    pub fn reset_modified(&mut self) {
        self.modified = ModState::Clean;
    }

    pub fn is_underground(&self) -> bool {
        self.is_underground
    }

    pub fn set_underground(&mut self, underground: bool) {
        self.is_underground = underground;
        self.raise_modified(ModState::WriteNeeded);
    }

    pub fn lighting_expired(&self) -> bool {
        self.lighting_expired
    }

    pub fn set_lighting_expired(&mut self, expired: bool) {
        self.lighting_expired = expired;
        self.raise_modified(ModState::WriteNeeded);
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn set_generated(&mut self, generated: bool) {
        self.generated = generated;
        self.raise_modified(ModState::WriteNeeded);
    }

    pub fn day_night_differs(&self) -> bool {
        self.day_night_differs
    }

    /// Usable for rendering and simulation.
    pub fn is_valid(&self) -> bool {
        !self.lighting_expired && self.data.is_some()
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, time: u32) {
        self.timestamp = time;
        self.raise_modified(ModState::WriteAtUnload);
    }

    pub fn set_timestamp_no_changed_flag(&mut self, time: u32) {
        self.timestamp = time;
    }

    pub fn usage_timer(&self) -> f32 {
        self.usage_timer
    }

    pub fn increment_usage_timer(&mut self, dtime: f32) {
        self.usage_timer += dtime;
    }

    pub fn reset_usage_timer(&mut self) {
        self.usage_timer = 0.0;
    }

    // ── Node access ─────────────────────────────────────────────────

    pub fn is_valid_position(&self, p: NodePos) -> bool {
        self.data.is_some() && p.is_block_local()
    }

    pub fn get_node(&self, p: NodePos) -> Result<MapNode, MapError> {
        match &self.data {
            Some(data) if p.is_block_local() => Ok(data[index(p)]),
            _ => Err(MapError::InvalidPosition(p)),
        }
    }

    /// Like [`get_node`](Self::get_node) but yields `CONTENT_IGNORE` on failure.
    pub fn get_node_no_ex(&self, p: NodePos) -> MapNode {
        self.get_node(p).unwrap_or(MapNode::IGNORE)
    }

    pub fn set_node(&mut self, p: NodePos, n: MapNode) -> Result<(), MapError> {
        match &mut self.data {
            Some(data) if p.is_block_local() => {
                data[index(p)] = n;
                self.raise_modified(ModState::WriteNeeded);
                Ok(())
            }
            _ => Err(MapError::InvalidPosition(p)),
        }
    }

    /// Reads a node by block-relative position, asking `map` when the
    /// position lies outside this block.
    pub fn get_node_parent<H: MapHooks>(
        &self,
        map: &Map<H>,
        p: NodePos,
    ) -> Result<MapNode, MapError> {
        if p.is_block_local() {
            return self.get_node(p);
        }
        let abs = self.pos_relative() + p;
        let bp = abs.block();
        match map.get_block(bp) {
            Some(block) if !block.is_dummy() => block.get_node(abs.local()),
            _ => Err(MapError::NotFound(bp)),
        }
    }

    /// Sets every node of the box starting at local `min` with extent
    /// `size`, clipped to the block.
    pub fn drawbox(&mut self, min: NodePos, size: NodePos, node: MapNode) -> Result<(), MapError> {
        let Some(data) = &mut self.data else {
            return Err(MapError::NotFound(self.pos));
        };
        let lo = |v: i32| v.clamp(0, MAP_BLOCKSIZE);
        for z in lo(min.z)..lo(min.z + size.z) {
            for y in lo(min.y)..lo(min.y + size.y) {
                for x in lo(min.x)..lo(min.x + size.x) {
                    data[index(NodePos::new(x, y, z))] = node;
                }
            }
        }
        self.raise_modified(ModState::WriteNeeded);
        Ok(())
    }

    pub(crate) fn nodes(&self) -> Option<&[MapNode]> {
        self.data.as_deref()
    }

    pub(crate) fn nodes_mut(&mut self) -> Option<&mut [MapNode]> {
        self.data.as_deref_mut()
    }

    // ── Metadata & objects ──────────────────────────────────────────

    pub fn node_metadata(&self) -> &NodeMetadataList {
        &self.metadata
    }

    /// Mutable access to the metadata list. The caller raises the
    /// modification level if it changes anything.
    pub fn node_metadata_mut(&mut self) -> &mut NodeMetadataList {
        &mut self.metadata
    }

    pub fn static_objects(&self) -> &[StaticObject] {
        &self.static_objects
    }

    /// Stores `obj`. Fails once the block holds [`MAX_STATIC_OBJECTS`].
    pub fn add_static_object(&mut self, obj: StaticObject) -> Result<(), MapError> {
        if self.static_objects.len() >= MAX_STATIC_OBJECTS {
            return Err(MapError::TooManyObjects(self.pos, self.static_objects.len()));
        }
        self.static_objects.push(obj);
        self.raise_modified(ModState::WriteNeeded);
        Ok(())
    }

    /// Removes and returns all stored objects, e.g. to activate them.
    pub fn take_static_objects(&mut self) -> Vec<StaticObject> {
        if !self.static_objects.is_empty() {
            self.raise_modified(ModState::WriteNeeded);
        }
        std::mem::take(&mut self.static_objects)
    }

    // ── Mesh slot ───────────────────────────────────────────────────

    /// The render-side slot. Locked independently of the node data.
    pub fn mesh_slot(&self) -> &Arc<Mutex<MeshSlot>> {
        &self.mesh
    }

    pub fn set_mesh_expired(&self, expired: bool) {
        self.mesh.lock().expired = expired;
    }

    pub fn mesh_expired(&self) -> bool {
        self.mesh.lock().expired
    }

    /// Returns whether the mod at `p` changed.
    pub fn set_temp_mod(&self, p: NodePos, m: NodeMod) -> bool {
        self.mesh.lock().temp_mods.insert(p, m) != Some(m)
    }

    pub fn get_temp_mod(&self, p: NodePos) -> Option<NodeMod> {
        self.mesh.lock().temp_mods.get(&p).copied()
    }

    /// Returns whether there was a mod at `p`.
    pub fn clear_temp_mod(&self, p: NodePos) -> bool {
        self.mesh.lock().temp_mods.remove(&p).is_some()
    }

    /// Returns whether there were any mods.
    pub fn clear_temp_mods(&self) -> bool {
        let mut slot = self.mesh.lock();
        let had = !slot.temp_mods.is_empty();
        slot.temp_mods.clear();
        had
    }

    pub fn copy_temp_mods(&self) -> NodeModMap {
        self.mesh.lock().temp_mods.clone()
    }

    // ── Lighting helpers ────────────────────────────────────────────

    /// Sets `LIGHT_SUN` down every column whose flag in `sun_above` is
    /// set until a node stops sunlight. Lit nodes are added to
    /// `light_sources` (absolute positions). Returns which columns still
    /// carry sunlight out of the bottom of the block.
    ///
    /// Expects the day bank to have been cleared beforehand.
    pub fn propagate_sunlight(
        &mut self,
        defs: &NodeDefs,
        sun_above: &ColumnFlags,
        light_sources: &mut HashSet<NodePos>,
    ) -> ColumnFlags {
        let mut sun_below = [[false; MAP_BLOCKSIZE as usize]; MAP_BLOCKSIZE as usize];
        let origin = self.pos_relative();
        let Some(data) = &mut self.data else {
            return sun_below;
        };
        for x in 0..MAP_BLOCKSIZE {
            for z in 0..MAP_BLOCKSIZE {
                let mut sun = sun_above[x as usize][z as usize];
                for y in (0..MAP_BLOCKSIZE).rev() {
                    if !sun {
                        break;
                    }
                    let p = NodePos::new(x, y, z);
                    let n = &mut data[index(p)];
                    if defs.get(n.content).sunlight_propagates {
                        n.set_light(LightBank::Day, LIGHT_SUN);
                        light_sources.insert(origin + p);
                    } else {
                        sun = false;
                    }
                }
                sun_below[x as usize][z as usize] = sun;
            }
        }
        sun_below
    }

    /// Recomputes whether any node is lit differently by day and by night.
    pub fn update_day_night_diff(&mut self) {
        self.day_night_differs = self.data.as_deref().is_some_and(|data| {
            data.iter()
                .any(|n| n.light(LightBank::Day) != n.light(LightBank::Night))
        });
    }

    /// Highest ground node of column `(x, z)`.
    pub fn get_ground_level(&self, defs: &NodeDefs, x: i32, z: i32) -> Result<GroundLevel, MapError> {
        for y in (0..MAP_BLOCKSIZE).rev() {
            let n = self.get_node(NodePos::new(x, y, z))?;
            if defs.get(n.content).is_ground_content {
                if y == MAP_BLOCKSIZE - 1 {
                    return Ok(GroundLevel::AtTop);
                }
                return Ok(GroundLevel::At(y));
            }
        }
        Ok(GroundLevel::AllAir)
    }

    // ── Voxel manipulator exchange ──────────────────────────────────

    /// Copies every node into `vm`, growing it as needed.
    pub fn copy_to(&self, vm: &mut VoxelManipulator) {
        if let Some(data) = &self.data {
            vm.copy_from_block(self.area(), data);
        }
    }

    /// Takes every node `vm` holds data for inside this block.
    pub fn copy_from(&mut self, vm: &VoxelManipulator) {
        let origin = self.pos_relative();
        let Some(data) = &mut self.data else {
            return;
        };
        let mut changed = false;
        for (i, slot) in data.iter_mut().enumerate() {
            if let Some(n) = vm.get(origin + local_from_index(i)) {
                *slot = n;
                changed = true;
            }
        }
        if changed {
            self.raise_modified(ModState::WriteNeeded);
        }
    }

    // ── Serialization ───────────────────────────────────────────────

    /// Encodes flags, content and both light banks. Dummies cannot be
    /// serialized.
    pub fn serialize(&self) -> Result<Vec<u8>, MapError> {
        let mut w = ByteWriter::with_capacity(2 + BLOCK_VOLUME * 4);
        self.serialize_into(&mut w)?;
        Ok(w.into_inner())
    }

    fn serialize_into(&self, w: &mut ByteWriter) -> Result<(), MapError> {
        let data = self.data.as_deref().ok_or(MapError::NotFound(self.pos))?;
        w.u8(SER_FMT_VER);
        let mut flags = 0;
        if self.is_underground {
            flags |= FLAG_UNDERGROUND;
        }
        if self.day_night_differs {
            flags |= FLAG_DAY_NIGHT_DIFFERS;
        }
        if self.lighting_expired {
            flags |= FLAG_LIGHTING_EXPIRED;
        }
        if self.generated {
            flags |= FLAG_GENERATED;
        }
        w.u8(flags);
        for n in data {
            w.u16(n.content.0);
        }
        for n in data {
            w.u8(n.param1);
        }
        for n in data {
            w.u8(n.param2);
        }
        Ok(())
    }

    /// Decodes what [`serialize`](Self::serialize) produced. The block comes
    /// back clean.
    pub fn deserialize(pos: BlockPos, bytes: &[u8]) -> Result<Self, MapError> {
        Self::deserialize_from(pos, &mut ByteReader::new(bytes))
    }

    fn deserialize_from(pos: BlockPos, r: &mut ByteReader<'_>) -> Result<Self, MapError> {
        let version = r.u8()?;
        if version != SER_FMT_VER {
            return Err(MapError::corrupt(format!(
                "block {pos:?}: unsupported format version {version}"
            )));
        }
        let flags = r.u8()?;
        let content = r.bytes(BLOCK_VOLUME * 2)?;
        let param1 = r.bytes(BLOCK_VOLUME)?;
        let param2 = r.bytes(BLOCK_VOLUME)?;
        let data: Box<[MapNode]> = (0..BLOCK_VOLUME)
            .map(|i| MapNode {
                content: Content(u16::from_le_bytes([content[i * 2], content[i * 2 + 1]])),
                param1: param1[i],
                param2: param2[i],
            })
            .collect();

        let mut block = Self::new_dummy(pos);
        block.data = Some(data);
        block.is_underground = flags & FLAG_UNDERGROUND != 0;
        block.day_night_differs = flags & FLAG_DAY_NIGHT_DIFFERS != 0;
        block.lighting_expired = flags & FLAG_LIGHTING_EXPIRED != 0;
        block.generated = flags & FLAG_GENERATED != 0;
        Ok(block)
    }

    /// Data only the disk needs: metadata, static objects and timestamp.
    pub fn serialize_disk_extra(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        self.serialize_disk_extra_into(&mut w);
        w.into_inner()
    }

    fn serialize_disk_extra_into(&self, w: &mut ByteWriter) {
        self.metadata.serialize(w);
        w.u16(self.static_objects.len() as u16);
        for obj in &self.static_objects {
            w.u8(obj.kind);
            for c in obj.pos {
                w.f32(c);
            }
            w.bytes32(&obj.data);
        }
        w.u32(self.timestamp);
    }

    pub fn deserialize_disk_extra(&mut self, bytes: &[u8]) -> Result<(), MapError> {
        self.deserialize_disk_extra_from(&mut ByteReader::new(bytes))
    }

    fn deserialize_disk_extra_from(&mut self, r: &mut ByteReader<'_>) -> Result<(), MapError> {
        self.metadata = NodeMetadataList::deserialize(r)?;
        let count = r.u16()?;
        let mut objects = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let kind = r.u8()?;
            let pos = [r.f32()?, r.f32()?, r.f32()?];
            let data = r.bytes32()?.to_vec();
            objects.push(StaticObject { kind, pos, data });
        }
        self.static_objects = objects;
        self.timestamp = r.u32()?;
        Ok(())
    }

    /// Main data followed by the disk extra, as stored by the server.
    pub fn serialize_for_disk(&self) -> Result<Vec<u8>, MapError> {
        let mut w = ByteWriter::with_capacity(2 + BLOCK_VOLUME * 4 + 16);
        self.serialize_into(&mut w)?;
        self.serialize_disk_extra_into(&mut w);
        Ok(w.into_inner())
    }

    pub fn deserialize_from_disk(pos: BlockPos, bytes: &[u8]) -> Result<Self, MapError> {
        let mut r = ByteReader::new(bytes);
        let mut block = Self::deserialize_from(pos, &mut r)?;
        block.deserialize_disk_extra_from(&mut r)?;
        if r.remaining() != 0 {
            return Err(MapError::corrupt(format!(
                "block {pos:?}: {} trailing bytes",
                r.remaining()
            )));
        }
        Ok(block)
    }
}

/// Local position of linear node index `i`.
pub const fn local_from_index(i: usize) -> NodePos {
    let i = i as i32;
    let s = MAP_BLOCKSIZE;
    NodePos::new(i % s, (i / s) % s, i / (s * s))
}
