//! Flat staging buffers over box-shaped regions of nodes.

use super::node::MapNode;
use super::position::{BlockPos, MAP_BLOCKSIZE, NodePos};

/// The voxel has not been emerged from the map yet.
pub const VOXELFLAG_NOT_LOADED: u8 = 1 << 0;
/// Emerged, but the map has no data there.
pub const VOXELFLAG_INEXISTENT: u8 = 1 << 1;
/// Written since it was emerged.
pub const VOXELFLAG_DIRTY: u8 = 1 << 2;

/// Inclusive axis-aligned box of node positions. Empty if any `max`
/// component is below the matching `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoxelArea {
    pub min: NodePos,
    pub max: NodePos,
}

impl VoxelArea {
    pub const fn new(min: NodePos, max: NodePos) -> Self {
        Self { min, max }
    }

    pub const fn empty() -> Self {
        Self {
            min: NodePos::new(0, 0, 0),
            max: NodePos::new(-1, -1, -1),
        }
    }

    /// The nodes of block `bp`.
    pub const fn of_block(bp: BlockPos) -> Self {
        let o = bp.origin();
        Self::new(o, o.offset(MAP_BLOCKSIZE - 1, MAP_BLOCKSIZE - 1, MAP_BLOCKSIZE - 1))
    }

    pub const fn is_empty(&self) -> bool {
        self.max.x < self.min.x || self.max.y < self.min.y || self.max.z < self.min.z
    }

    pub const fn extent(&self) -> NodePos {
        if self.is_empty() {
            return NodePos::new(0, 0, 0);
        }
        NodePos::new(
            self.max.x - self.min.x + 1,
            self.max.y - self.min.y + 1,
            self.max.z - self.min.z + 1,
        )
    }

    pub const fn volume(&self) -> usize {
        let e = self.extent();
        e.x as usize * e.y as usize * e.z as usize
    }

    pub const fn contains(&self, p: NodePos) -> bool {
        !self.is_empty()
            && p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }

    pub const fn contains_area(&self, a: &VoxelArea) -> bool {
        a.is_empty() || (self.contains(a.min) && self.contains(a.max))
    }

    /// Smallest area covering both.
    pub fn union(&self, a: &VoxelArea) -> VoxelArea {
        if self.is_empty() {
            return *a;
        }
        if a.is_empty() {
            return *self;
        }
        VoxelArea::new(
            NodePos::new(
                self.min.x.min(a.min.x),
                self.min.y.min(a.min.y),
                self.min.z.min(a.min.z),
            ),
            NodePos::new(
                self.max.x.max(a.max.x),
                self.max.y.max(a.max.y),
                self.max.z.max(a.max.z),
            ),
        )
    }

    /// Grown by `d` nodes on every side.
    pub const fn pad(&self, d: i32) -> VoxelArea {
        VoxelArea::new(self.min.offset(-d, -d, -d), self.max.offset(d, d, d))
    }

    /// Linear index of `p`, x fastest. `p` must be inside.
    #[inline]
    pub const fn index(&self, p: NodePos) -> usize {
        let e = self.extent();
        let r = NodePos::new(p.x - self.min.x, p.y - self.min.y, p.z - self.min.z);
        (r.z * e.y * e.x + r.y * e.x + r.x) as usize
    }

    /// Every position, in index order.
    pub fn positions(&self) -> impl Iterator<Item = NodePos> + use<> {
        let a = *self;
        (a.min.z..=a.max.z).flat_map(move |z| {
            (a.min.y..=a.max.y).flat_map(move |y| (a.min.x..=a.max.x).map(move |x| NodePos::new(x, y, z)))
        })
    }
}

/// Nodes of a region copied out of the map, plus per-voxel flags.
///
/// Never holds references into block storage; changes only reach the map
/// when blitted back.
#[derive(Debug, Clone, Default)]
pub struct VoxelManipulator {
    area: VoxelArea,
    data: Vec<MapNode>,
    flags: Vec<u8>,
}

impl Default for VoxelArea {
    fn default() -> Self {
        Self::empty()
    }
}

impl VoxelManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn area(&self) -> VoxelArea {
        self.area
    }

    pub fn clear(&mut self) {
        self.area = VoxelArea::empty();
        self.data.clear();
        self.flags.clear();
    }

    /// Grows the buffer to also cover `a`. New voxels are `CONTENT_IGNORE`
    /// and flagged not loaded.
    pub fn add_area(&mut self, a: VoxelArea) {
        if a.is_empty() || self.area.contains_area(&a) {
            return;
        }
        let new_area = self.area.union(&a);
        let mut data = vec![MapNode::IGNORE; new_area.volume()];
        let mut flags = vec![VOXELFLAG_NOT_LOADED; new_area.volume()];
        for p in self.area.positions() {
            let old = self.area.index(p);
            let new = new_area.index(p);
            data[new] = self.data[old];
            flags[new] = self.flags[old];
        }
        self.area = new_area;
        self.data = data;
        self.flags = flags;
    }

    /// The node at `p` if the buffer holds map data for it.
    pub fn get(&self, p: NodePos) -> Option<MapNode> {
        if !self.area.contains(p) {
            return None;
        }
        let i = self.area.index(p);
        if self.flags[i] & (VOXELFLAG_NOT_LOADED | VOXELFLAG_INEXISTENT) != 0 {
            return None;
        }
        Some(self.data[i])
    }

    pub fn get_no_ex(&self, p: NodePos) -> MapNode {
        self.get(p).unwrap_or(MapNode::IGNORE)
    }

    /// Writes `n`, growing the buffer if needed, and marks it dirty.
    pub fn set(&mut self, p: NodePos, n: MapNode) {
        if !self.area.contains(p) {
            self.add_area(VoxelArea::new(p, p));
        }
        let i = self.area.index(p);
        self.data[i] = n;
        self.flags[i] = (self.flags[i] & !(VOXELFLAG_NOT_LOADED | VOXELFLAG_INEXISTENT)) | VOXELFLAG_DIRTY;
    }

    /// Flags for `p`; outside the buffer counts as not loaded.
    pub fn flags(&self, p: NodePos) -> u8 {
        if self.area.contains(p) {
            self.flags[self.area.index(p)]
        } else {
            VOXELFLAG_NOT_LOADED
        }
    }

    pub fn is_dirty(&self, p: NodePos) -> bool {
        self.flags(p) & VOXELFLAG_DIRTY != 0
    }

    /// Dirty voxels that hold data, in index order.
    pub fn dirty_positions(&self) -> impl Iterator<Item = NodePos> + '_ {
        self.area.positions().zip(self.flags.iter()).filter_map(|(p, &f)| {
            (f & VOXELFLAG_DIRTY != 0 && f & (VOXELFLAG_NOT_LOADED | VOXELFLAG_INEXISTENT) == 0)
                .then_some(p)
        })
    }

    pub fn clear_dirty(&mut self) {
        for f in &mut self.flags {
            *f &= !VOXELFLAG_DIRTY;
        }
    }

    /// Marks every voxel of `a` as emerged without backing data.
    pub fn mark_inexistent(&mut self, a: VoxelArea) {
        self.add_area(a);
        for p in a.positions() {
            let i = self.area.index(p);
            self.data[i] = MapNode::IGNORE;
            self.flags[i] = VOXELFLAG_INEXISTENT;
        }
    }

    /// Stores map data for `p` without marking it dirty.
    pub(crate) fn load(&mut self, p: NodePos, n: MapNode) {
        if !self.area.contains(p) {
            self.add_area(VoxelArea::new(p, p));
        }
        let i = self.area.index(p);
        self.data[i] = n;
        self.flags[i] = 0;
    }

    /// Loads a block's node array (`data` in block order) into area `a`.
    pub(crate) fn copy_from_block(&mut self, a: VoxelArea, data: &[MapNode]) {
        self.add_area(a);
        for (p, &n) in a.positions().zip(data) {
            let i = self.area.index(p);
            self.data[i] = n;
            self.flags[i] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::node::content;

    #[test]
    fn area_geometry() {
        let a = VoxelArea::new(NodePos::new(-1, 0, 0), NodePos::new(1, 1, 0));
        assert_eq!(a.extent(), NodePos::new(3, 2, 1));
        assert_eq!(a.volume(), 6);
        assert_eq!(a.index(NodePos::new(-1, 0, 0)), 0);
        assert_eq!(a.index(NodePos::new(0, 1, 0)), 4);
        assert!(VoxelArea::empty().is_empty());
        assert_eq!(VoxelArea::empty().volume(), 0);
        assert_eq!(a.positions().count(), 6);
    }

    #[test]
    fn growing_keeps_contents() {
        let mut vm = VoxelManipulator::new();
        vm.set(NodePos::new(0, 0, 0), MapNode::new(content::STONE));
        vm.add_area(VoxelArea::new(NodePos::new(-2, -2, -2), NodePos::new(2, 2, 2)));
        assert_eq!(vm.get(NodePos::new(0, 0, 0)).unwrap().content, content::STONE);
        assert!(vm.is_dirty(NodePos::new(0, 0, 0)));
        assert_eq!(vm.get(NodePos::new(1, 1, 1)), None);
        assert_eq!(vm.flags(NodePos::new(1, 1, 1)), VOXELFLAG_NOT_LOADED);
    }

    #[test]
    fn inexistent_voxels_read_as_missing() {
        let mut vm = VoxelManipulator::new();
        let a = VoxelArea::new(NodePos::new(0, 0, 0), NodePos::new(3, 3, 3));
        vm.mark_inexistent(a);
        assert_eq!(vm.get(NodePos::new(1, 1, 1)), None);
        assert_eq!(vm.get_no_ex(NodePos::new(1, 1, 1)), MapNode::IGNORE);
        assert_eq!(vm.dirty_positions().count(), 0);

        vm.set(NodePos::new(1, 1, 1), MapNode::AIR);
        assert_eq!(vm.dirty_positions().collect::<Vec<_>>(), vec![NodePos::new(1, 1, 1)]);
        vm.clear_dirty();
        assert_eq!(vm.dirty_positions().count(), 0);
    }
}
