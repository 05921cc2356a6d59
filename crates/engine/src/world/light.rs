//! Light banks and attenuation rules.

use super::node::MapNode;

/// Brightest value artificial light can have.
pub const LIGHT_MAX: u8 = 14;
/// Direct sunlight. Only ever stored in the day bank.
pub const LIGHT_SUN: u8 = 15;

/// Which of the two per-node light values an operation works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LightBank {
    /// Sunlight plus artificial light.
    Day,
    /// Artificial light only.
    Night,
}

impl LightBank {
    pub const ALL: [LightBank; 2] = [LightBank::Day, LightBank::Night];
}

/// Per-map attenuation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LightRules {
    /// How much light is lost per node travelled.
    pub step: u8,
}

impl LightRules {
    pub const fn new(step: u8) -> Self {
        Self { step }
    }

    /// Light a neighbour receives from a node lit at `light`.
    /// Sunlight weakens to artificial strength after one step.
    #[inline]
    pub const fn diminish(&self, light: u8) -> u8 {
        let l = if light > LIGHT_MAX { LIGHT_MAX } else { light };
        l.saturating_sub(self.step)
    }

    /// The brightest a neighbour can be if it got its light from us.
    #[inline]
    pub const fn undiminish(&self, light: u8) -> u8 {
        if light == LIGHT_SUN {
            return light;
        }
        let l = light.saturating_add(self.step);
        if l > LIGHT_SUN { LIGHT_SUN } else { l }
    }
}

impl Default for LightRules {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Mixes the two banks of `node` for a day/night ratio in `0..=1000`
/// (1000 is full day) and scales the result to `0..=255`.
pub fn blend_light(daynight_ratio: u32, node: &MapNode) -> u8 {
    let ratio = daynight_ratio.min(1000);
    let day = node.light(LightBank::Day).min(LIGHT_MAX) as u32;
    let night = node.light(LightBank::Night).min(LIGHT_MAX) as u32;
    let mixed = (day * ratio + night * (1000 - ratio)) / 1000;
    // Never darker than the night bank: artificial light is always on.
    let level = mixed.max(night);
    (level * 255 / LIGHT_MAX as u32) as u8
}
