//! Voxels and the content definition table.

use super::light::{LightBank, LIGHT_MAX};

/// Opaque content identifier. The engine only interprets it through
/// [`NodeDefs`]; two ids are reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Content(pub u16);

impl Content {
    /// Empty space.
    pub const AIR: Content = Content(0);
    /// "Not known / not loaded". Never stored in a generated block.
    pub const IGNORE: Content = Content(u16::MAX);

    pub const fn new(id: u16) -> Self {
        Self(id)
    }
}

/// Small built-in palette used by the bundled generator, the demo world and
/// tests. Games register their own content on top of it.
pub mod content {
    use super::Content;

    pub const AIR: Content = Content::AIR;
    pub const STONE: Content = Content(1);
    pub const DIRT: Content = Content(2);
    pub const GRASS: Content = Content(3);
    pub const GLASS: Content = Content(4);
    pub const TORCH: Content = Content(5);
    pub const WATER_SOURCE: Content = Content(6);
    pub const WATER_FLOWING: Content = Content(7);
    pub const LEAVES: Content = Content(8);
}

/// Liquid levels live in the low bits of param2.
pub const LIQUID_LEVEL_MASK: u8 = 0x07;
/// Set on flowing liquid that is falling straight down.
pub const LIQUID_FLOW_DOWN: u8 = 0x08;
/// Level of flowing liquid right next to a source.
pub const LIQUID_LEVEL_MAX: u8 = 7;

/// One voxel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapNode {
    pub content: Content,
    /// Day bank in the low nibble, night bank in the high nibble.
    pub param1: u8,
    pub param2: u8,
}

impl MapNode {
    pub const IGNORE: MapNode = MapNode::new(Content::IGNORE);
    pub const AIR: MapNode = MapNode::new(Content::AIR);

    pub const fn new(content: Content) -> Self {
        Self {
            content,
            param1: 0,
            param2: 0,
        }
    }

    pub const fn with_param2(content: Content, param2: u8) -> Self {
        Self {
            content,
            param1: 0,
            param2,
        }
    }

    #[inline]
    pub const fn light(&self, bank: LightBank) -> u8 {
        match bank {
            LightBank::Day => self.param1 & 0x0f,
            LightBank::Night => self.param1 >> 4,
        }
    }

    #[inline]
    pub fn set_light(&mut self, bank: LightBank, level: u8) {
        let level = level & 0x0f;
        self.param1 = match bank {
            LightBank::Day => (self.param1 & 0xf0) | level,
            LightBank::Night => (self.param1 & 0x0f) | (level << 4),
        };
    }

    pub const fn liquid_level(&self) -> u8 {
        self.param2 & LIQUID_LEVEL_MASK
    }
}

impl Default for MapNode {
    fn default() -> Self {
        Self::AIR
    }
}

/// How a content type is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawType {
    /// Nothing is drawn.
    Invisible,
    /// Full cube; hides the faces of neighbours behind it.
    Normal,
    /// Full cube that does not hide neighbour faces.
    Transparent,
    /// Drawn like `Transparent`; faces between equal liquids are culled.
    Liquid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidKind {
    None,
    Source { flowing: Content },
    Flowing { source: Content },
}

/// Static properties of one content id.
#[derive(Debug, Clone)]
pub struct ContentFeatures {
    pub name: String,
    pub draw: DrawType,
    /// Artificial and sun light can pass into this node.
    pub light_propagates: bool,
    /// Full-strength sunlight passes straight down through this node.
    pub sunlight_propagates: bool,
    /// Emitted light level; 0 for non-emitters.
    pub light_source: u8,
    /// Counts as terrain for ground-level searches.
    pub is_ground_content: bool,
    /// Liquids may flow into this node, replacing it.
    pub floodable: bool,
    pub liquid: LiquidKind,
}

impl ContentFeatures {
    /// An opaque solid cube.
    pub fn solid(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            draw: DrawType::Normal,
            light_propagates: false,
            sunlight_propagates: false,
            light_source: 0,
            is_ground_content: true,
            floodable: false,
            liquid: LiquidKind::None,
        }
    }

    /// Nothing at all: lets every kind of light through and is never drawn.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            draw: DrawType::Invisible,
            light_propagates: true,
            sunlight_propagates: true,
            light_source: 0,
            is_ground_content: false,
            floodable: true,
            liquid: LiquidKind::None,
        }
    }

    pub fn emitted_light(&self) -> u8 {
        self.light_source.min(LIGHT_MAX)
    }

    pub fn is_liquid(&self) -> bool {
        self.liquid != LiquidKind::None
    }
}

/// Content definition table, indexed by [`Content`] id.
///
/// Shared read-only between the map owner and the mesh worker.
#[derive(Debug, Clone)]
pub struct NodeDefs {
    defs: Vec<ContentFeatures>,
    unknown: ContentFeatures,
    ignore: ContentFeatures,
}

impl NodeDefs {
    /// A table that only knows air.
    pub fn new() -> Self {
        let mut ignore = ContentFeatures::empty("ignore");
        ignore.light_propagates = false;
        ignore.sunlight_propagates = false;
        ignore.floodable = false;
        Self {
            defs: vec![ContentFeatures::empty("air")],
            unknown: ContentFeatures::solid("unknown"),
            ignore,
        }
    }

    /// The table with the [`content`] palette registered.
    pub fn builtin() -> Self {
        let mut defs = Self::new();
        defs.register(content::STONE, ContentFeatures::solid("stone"));
        defs.register(content::DIRT, ContentFeatures::solid("dirt"));
        defs.register(content::GRASS, ContentFeatures::solid("grass"));
        defs.register(
            content::GLASS,
            ContentFeatures {
                draw: DrawType::Transparent,
                light_propagates: true,
                sunlight_propagates: true,
                is_ground_content: false,
                ..ContentFeatures::solid("glass")
            },
        );
        defs.register(
            content::TORCH,
            ContentFeatures {
                draw: DrawType::Transparent,
                light_propagates: true,
                sunlight_propagates: true,
                light_source: LIGHT_MAX - 1,
                is_ground_content: false,
                ..ContentFeatures::solid("torch")
            },
        );
        let water = ContentFeatures {
            draw: DrawType::Liquid,
            light_propagates: true,
            sunlight_propagates: false,
            is_ground_content: false,
            ..ContentFeatures::solid("water_source")
        };
        defs.register(
            content::WATER_SOURCE,
            ContentFeatures {
                liquid: LiquidKind::Source {
                    flowing: content::WATER_FLOWING,
                },
                ..water.clone()
            },
        );
        defs.register(
            content::WATER_FLOWING,
            ContentFeatures {
                name: "water_flowing".into(),
                floodable: false,
                liquid: LiquidKind::Flowing {
                    source: content::WATER_SOURCE,
                },
                ..water
            },
        );
        defs.register(
            content::LEAVES,
            ContentFeatures {
                draw: DrawType::Transparent,
                light_propagates: true,
                sunlight_propagates: false,
                is_ground_content: false,
                ..ContentFeatures::solid("leaves")
            },
        );
        defs
    }

    /// Define or redefine `id`. Ids between the last registered one and
    /// `id` are filled with unknown (solid) definitions.
    pub fn register(&mut self, id: Content, features: ContentFeatures) {
        assert!(id != Content::IGNORE, "the ignore id cannot be redefined");
        let idx = id.0 as usize;
        if idx >= self.defs.len() {
            self.defs.resize(idx + 1, self.unknown.clone());
        }
        self.defs[idx] = features;
    }

    #[inline]
    pub fn get(&self, id: Content) -> &ContentFeatures {
        if id == Content::IGNORE {
            return &self.ignore;
        }
        self.defs.get(id.0 as usize).unwrap_or(&self.unknown)
    }

    /// Finds a registered id by name.
    pub fn id_of(&self, name: &str) -> Option<Content> {
        self.defs
            .iter()
            .position(|f| f.name == name)
            .map(|i| Content(i as u16))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}

impl Default for NodeDefs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_nibbles_are_independent() {
        let mut n = MapNode::new(content::STONE);
        n.set_light(LightBank::Day, 15);
        n.set_light(LightBank::Night, 3);
        assert_eq!(n.light(LightBank::Day), 15);
        assert_eq!(n.light(LightBank::Night), 3);
        assert_eq!(n.param1, 0x3f);

        n.set_light(LightBank::Day, 0);
        assert_eq!(n.light(LightBank::Night), 3);
    }

    #[test]
    fn unknown_and_ignore_block_light() {
        let defs = NodeDefs::builtin();
        assert!(!defs.get(Content(999)).light_propagates);
        assert!(!defs.get(Content::IGNORE).light_propagates);
        assert!(defs.get(Content::AIR).sunlight_propagates);
        assert_eq!(defs.id_of("torch"), Some(content::TORCH));
    }

    #[test]
    fn register_fills_gaps_with_unknown() {
        let mut defs = NodeDefs::new();
        defs.register(Content(3), ContentFeatures::empty("mist"));
        assert_eq!(defs.len(), 4);
        assert_eq!(defs.get(Content(2)).name, "unknown");
        assert!(defs.get(Content(3)).light_propagates);
    }
}
