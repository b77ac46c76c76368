//! Ground height queries used to place objects on the terrain.

use std::sync::Arc;

use crate::tile_data::TileGrid;

/// Bilinear height lookup over a fragment's normalized grid.
#[derive(Clone, Debug)]
pub struct ElevationSampler {
    grid: Arc<TileGrid>,
}

impl ElevationSampler {
    pub fn new(grid: Arc<TileGrid>) -> Self {
        Self { grid }
    }

    pub fn grid(&self) -> &TileGrid {
        &self.grid
    }

    /// Height of the ground at fragment-local (x, y).
    ///
    /// Coordinates wrap modulo the fragment size. A cell with a height
    /// override returns it verbatim; otherwise the four corner elevations
    /// are blended by the fractional offset inside the cell.
    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        let size = self.grid.size();
        if size == 0 {
            return self.grid.elevation(0, 0);
        }

        let xx = (x.floor() as i64).rem_euclid(size as i64) as usize;
        let yy = (y.floor() as i64).rem_euclid(size as i64) as usize;

        if let Some(height) = self.grid.tile(xx, yy).height_override {
            return height;
        }

        // The +1 neighbor clamps at the far edge instead of wrapping
        let xxp = if xx + 1 > size { xx } else { xx + 1 };
        let yyp = if yy + 1 > size { yy } else { yy + 1 };

        let fx = x - x.floor();
        let fy = y - y.floor();

        let p0 = self.grid.elevation(xx, yy);
        let p1 = self.grid.elevation(xxp, yy);
        let p2 = self.grid.elevation(xx, yyp);
        let p3 = self.grid.elevation(xxp, yyp);

        let h0 = p0 * (1.0 - fx) + p1 * fx;
        let h1 = p2 * (1.0 - fx) + p3 * fx;
        h0 * (1.0 - fy) + h1 * fy
    }
}
