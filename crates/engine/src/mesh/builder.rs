//! Face-culled cube meshing.

use super::NodeMod;
use super::data::MeshMakeData;
use crate::world::light::blend_light;
use crate::world::node::{Content, DrawType, MapNode, NodeDefs};
use crate::world::position::{FACE_DIRS, NodePos};
use crate::world::voxel::VoxelArea;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshVertex {
    /// Relative to the block origin.
    pub position: [f32; 3],
    pub normal: [i8; 3],
    /// Day/night blended light of the face, `0..=255`.
    pub light: u8,
    pub content: Content,
    /// Dig crack drawn over the face, if any.
    pub crack: Option<u8>,
}

/// Geometry of one block: quads as indexed triangles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMesh {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
}

impl BlockMesh {
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn face_count(&self) -> usize {
        self.indices.len() / 6
    }

    fn push_face(
        &mut self,
        local: NodePos,
        dir: NodePos,
        light: u8,
        content: Content,
        crack: Option<u8>,
    ) {
        let base = self.vertices.len() as u32;
        let origin = [local.x as f32, local.y as f32, local.z as f32];
        for corner in face_corners(dir) {
            self.vertices.push(MeshVertex {
                position: [
                    origin[0] + corner[0],
                    origin[1] + corner[1],
                    origin[2] + corner[2],
                ],
                normal: [dir.x as i8, dir.y as i8, dir.z as i8],
                light,
                content,
                crack,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
}

/// Unit-quad corners of the face of a cube pointing along `dir`,
/// counter-clockwise seen from outside.
fn face_corners(dir: NodePos) -> [[f32; 3]; 4] {
    let n = [dir.x, dir.y, dir.z];
    let axis = n.iter().position(|&c| c != 0).unwrap_or(0);
    let (u, v) = ((axis + 1) % 3, (axis + 2) % 3);
    let plane = if n[axis] > 0 { 1.0 } else { 0.0 };
    let mut out = [[0.0; 3]; 4];
    for (corner, (cu, cv)) in out
        .iter_mut()
        .zip([(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)])
    {
        corner[axis] = plane;
        corner[u] = cu;
        corner[v] = cv;
    }
    if n[axis] < 0 {
        out.reverse();
    }
    out
}

/// Whether the face of `n` towards `n2` is visible.
fn face_visible(defs: &NodeDefs, n: MapNode, n2: MapNode) -> bool {
    if n2.content == Content::IGNORE {
        return false;
    }
    let f = defs.get(n.content);
    let f2 = defs.get(n2.content);
    match f2.draw {
        DrawType::Normal => false,
        DrawType::Invisible => true,
        DrawType::Transparent | DrawType::Liquid => {
            n2.content != n.content || f.draw == DrawType::Normal
        }
    }
}

/// Builds the mesh of `data.blockpos` from its snapshot.
pub fn make_block_mesh(data: &MeshMakeData, defs: &NodeDefs) -> BlockMesh {
    let mut mesh = BlockMesh::default();
    let core = VoxelArea::of_block(data.blockpos);
    let origin = core.min;

    for p in core.positions() {
        let Some(n) = data.vmanip.get(p) else {
            continue;
        };
        if n.content == Content::IGNORE || defs.get(n.content).draw == DrawType::Invisible {
            continue;
        }
        let crack = match data.temp_mods.get(&p) {
            Some(NodeMod::Crack { level }) => Some(*level),
            None => None,
        };
        for dir in FACE_DIRS {
            let n2 = data.vmanip.get_no_ex(p + dir);
            if face_visible(defs, n, n2) {
                // Either side may carry the light, e.g. a lit water surface
                // under dark air.
                let light = blend_light(data.daynight_ratio, &n)
                    .max(blend_light(data.daynight_ratio, &n2));
                mesh.push_face(p - origin, dir, light, n.content, crack);
            }
        }
    }
    mesh
}
