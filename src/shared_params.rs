/// Synthesis parameters shared by the mesh synthesizer, the worker pool and
/// the terrain node. Adding a field here propagates to all three.
use crate::tile_data::{MAX_LEVEL, ROOF_HEIGHT, SHADOW_FACTOR, WALL_HEIGHT};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SynthesisParams {
    /// Wall quad height, also the vertical spacing between building levels.
    pub wall_height: f32,
    /// Rise of an elevated roof corner.
    pub roof_height: f32,
    /// Building levels to synthesize, 1..=MAX_LEVEL.
    pub level_count: usize,
    /// Multiplier applied to each channel of a shadowed tile color.
    pub shadow_factor: f32,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            wall_height: WALL_HEIGHT,
            roof_height: ROOF_HEIGHT,
            level_count: MAX_LEVEL,
            shadow_factor: SHADOW_FACTOR,
        }
    }
}

impl SynthesisParams {
    pub fn levels(&self) -> std::ops::Range<usize> {
        0..self.level_count.clamp(1, MAX_LEVEL)
    }

    /// Vertical offset of building level `level`.
    pub fn level_offset(&self, level: usize) -> f32 {
        level as f32 * self.wall_height
    }
}
