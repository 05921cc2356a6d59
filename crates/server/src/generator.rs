//! Deterministic terrain generation.
//!
//! A generator only ever sees a [`BlockMakeData`]: the block being made
//! plus its emerged neighbourhood in a staging buffer. It writes the nodes
//! of the target block and leaves lighting to the map.

use noise::{NoiseFn, Simplex};
use voxmap_engine::world::node::content;
use voxmap_engine::world::{BlockPos, ManualMapVoxelManipulator, MapNode, NodePos, VoxelArea};

/// Input and output of one block generation.
#[derive(Debug)]
pub struct BlockMakeData {
    pub blockpos: BlockPos,
    pub seed: u64,
    pub vmanip: ManualMapVoxelManipulator,
    /// Set by the generator when the whole block lies below the surface.
    pub underground: bool,
}

pub trait BlockGenerator: Send {
    /// Fills every node of `data.blockpos` in `data.vmanip`. Must be a pure
    /// function of the block position and the seed.
    fn make_block(&self, data: &mut BlockMakeData);
}

/// Rolling grassland over stone with water in the hollows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TerrainGenerator {
    pub base_height: i32,
    /// Maximum deviation from `base_height`, in nodes.
    pub amplitude: i32,
    /// Horizontal size of the broadest hills, in nodes.
    pub scale: i32,
    /// Simplex octaves layered on top of each other. Each one doubles the
    /// frequency and halves the amplitude of the previous.
    pub octaves: u32,
    pub water_level: i32,
}

impl Default for TerrainGenerator {
    fn default() -> Self {
        Self {
            base_height: 2,
            amplitude: 8,
            scale: 32,
            octaves: 3,
            water_level: 0,
        }
    }
}

impl TerrainGenerator {
    /// A world that is flat at `height`.
    pub fn flat(height: i32) -> Self {
        Self {
            base_height: height,
            amplitude: 0,
            scale: 1,
            octaves: 1,
            water_level: i32::MIN,
        }
    }

    /// Y of the topmost solid node of column `(x, z)`.
    pub fn surface_height(&self, seed: u64, x: i32, z: i32) -> i32 {
        self.surface_height_with(&noise_for(seed), x, z)
    }

    fn surface_height_with(&self, noise: &Simplex, x: i32, z: i32) -> i32 {
        if self.amplitude == 0 {
            return self.base_height;
        }
        let n = self.fbm(noise, x as f64, z as f64);
        self.base_height + (n * self.amplitude as f64).round() as i32
    }

    /// Layered simplex noise, normalised to `-1.0..=1.0`.
    fn fbm(&self, noise: &Simplex, x: f64, z: f64) -> f64 {
        let mut total = 0.0;
        let mut norm = 0.0;
        let mut frequency = 1.0 / self.scale.max(1) as f64;
        let mut amplitude = 1.0;
        for _ in 0..self.octaves.max(1) {
            total += noise.get([x * frequency, z * frequency]) * amplitude;
            norm += amplitude;
            frequency *= 2.0;
            amplitude *= 0.5;
        }
        (total / norm).clamp(-1.0, 1.0)
    }

    fn node_at(&self, y: i32, surface: i32) -> MapNode {
        if y > surface {
            if y <= self.water_level {
                MapNode::new(content::WATER_SOURCE)
            } else {
                MapNode::AIR
            }
        } else if y == surface {
            if surface < self.water_level {
                MapNode::new(content::DIRT)
            } else {
                MapNode::new(content::GRASS)
            }
        } else if y > surface - 3 {
            MapNode::new(content::DIRT)
        } else {
            MapNode::new(content::STONE)
        }
    }
}

impl BlockGenerator for TerrainGenerator {
    fn make_block(&self, data: &mut BlockMakeData) {
        let area = VoxelArea::of_block(data.blockpos);
        let noise = noise_for(data.seed);
        let mut underground = true;
        for z in area.min.z..=area.max.z {
            for x in area.min.x..=area.max.x {
                let surface = self.surface_height_with(&noise, x, z);
                if surface <= area.max.y || self.water_level > area.max.y {
                    underground = false;
                }
                for y in area.min.y..=area.max.y {
                    data.vmanip.set(NodePos::new(x, y, z), self.node_at(y, surface));
                }
            }
        }
        data.underground = underground;
    }
}

/// Folds the 64-bit map seed into the 32-bit simplex seed.
fn noise_for(seed: u64) -> Simplex {
    Simplex::new((seed ^ (seed >> 32)) as u32)
}
