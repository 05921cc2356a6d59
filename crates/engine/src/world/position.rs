use std::ops::{Add, Sub};

/// Edge length of a [`MapBlock`](super::block::MapBlock) in nodes.
pub const MAP_BLOCKSIZE: i32 = 16;

/// Nodes further than this from the origin on any axis are never generated.
pub const MAP_GENERATION_LIMIT: i32 = 31000;

/// Offsets of the six face neighbours.
pub const FACE_DIRS: [NodePos; 6] = [
    NodePos::new(0, 0, 1),
    NodePos::new(0, 1, 0),
    NodePos::new(1, 0, 0),
    NodePos::new(0, 0, -1),
    NodePos::new(0, -1, 0),
    NodePos::new(-1, 0, 0),
];

/// Absolute node position in the world.
///
/// Also used for block-relative coordinates, which may fall outside
/// `0..MAP_BLOCKSIZE` when a lookup has to leave the block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodePos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl NodePos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The block this node belongs to.
    pub const fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.div_euclid(MAP_BLOCKSIZE),
            self.y.div_euclid(MAP_BLOCKSIZE),
            self.z.div_euclid(MAP_BLOCKSIZE),
        )
    }

    /// Position relative to the owning block's origin (each axis in `0..16`).
    pub const fn local(&self) -> NodePos {
        NodePos::new(
            self.x.rem_euclid(MAP_BLOCKSIZE),
            self.y.rem_euclid(MAP_BLOCKSIZE),
            self.z.rem_euclid(MAP_BLOCKSIZE),
        )
    }

    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> NodePos {
        NodePos::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The six face neighbours.
    pub const fn neighbors(&self) -> [NodePos; 6] {
        [
            self.offset(0, 0, 1),
            self.offset(0, 1, 0),
            self.offset(1, 0, 0),
            self.offset(0, 0, -1),
            self.offset(0, -1, 0),
            self.offset(-1, 0, 0),
        ]
    }

    /// Whether all components lie in `0..MAP_BLOCKSIZE`.
    pub const fn is_block_local(&self) -> bool {
        self.x >= 0
            && self.x < MAP_BLOCKSIZE
            && self.y >= 0
            && self.y < MAP_BLOCKSIZE
            && self.z >= 0
            && self.z < MAP_BLOCKSIZE
    }
}

impl Add for NodePos {
    type Output = NodePos;

    fn add(self, rhs: NodePos) -> NodePos {
        NodePos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for NodePos {
    type Output = NodePos;

    fn sub(self, rhs: NodePos) -> NodePos {
        NodePos::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// Position of a 16³ block, in block units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// The vertical column this block is stacked in.
    pub const fn sector(&self) -> SectorPos {
        SectorPos::new(self.x, self.z)
    }

    /// Position of the block's lowest corner node.
    pub const fn origin(&self) -> NodePos {
        NodePos::new(
            self.x * MAP_BLOCKSIZE,
            self.y * MAP_BLOCKSIZE,
            self.z * MAP_BLOCKSIZE,
        )
    }

    pub const fn offset(&self, dx: i32, dy: i32, dz: i32) -> BlockPos {
        BlockPos::new(self.x + dx, self.y + dy, self.z + dz)
    }

    /// The six face-adjacent blocks.
    pub const fn neighbors(&self) -> [BlockPos; 6] {
        [
            self.offset(0, 0, 1),
            self.offset(0, 1, 0),
            self.offset(1, 0, 0),
            self.offset(0, 0, -1),
            self.offset(0, -1, 0),
            self.offset(-1, 0, 0),
        ]
    }

    /// True if any part of the block lies beyond [`MAP_GENERATION_LIMIT`].
    pub const fn over_limit(&self) -> bool {
        let lim = MAP_GENERATION_LIMIT / MAP_BLOCKSIZE;
        self.x < -lim
            || self.x > lim
            || self.y < -lim
            || self.y > lim
            || self.z < -lim
            || self.z > lim
    }

    /// Every block position in the inclusive box `min..=max`, x fastest.
    pub fn range_inclusive(min: BlockPos, max: BlockPos) -> impl Iterator<Item = BlockPos> {
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| BlockPos::new(x, y, z)))
        })
    }
}

/// Horizontal coordinate of a sector (a column of blocks).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SectorPos {
    pub x: i32,
    pub z: i32,
}

impl SectorPos {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub const fn block(&self, y: i32) -> BlockPos {
        BlockPos::new(self.x, y, self.z)
    }
}
