use godot::prelude::*;

use crate::tile_data::TileGrid;

/// One shared vertex per grid point plus an (S+1)×(S+1) index lookup.
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedVertices {
    pub positions: Vec<Vector3>,
    side: usize,
    lookup: Vec<u32>,
}

impl PreparedVertices {
    /// Buffer index of grid vertex (x, y).
    pub fn index(&self, x: usize, y: usize) -> u32 {
        self.lookup[x * self.side + y]
    }

    pub fn position(&self, x: usize, y: usize) -> Vector3 {
        self.positions[self.index(x, y) as usize]
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Walk the grid once and emit a vertex at (x, elevation, y) for every point.
pub fn prepare_vertices(grid: &TileGrid) -> PreparedVertices {
    let side = grid.size() + 1;
    let mut positions = Vec::with_capacity(side * side);
    let mut lookup = vec![0u32; side * side];

    for x in 0..side {
        for y in 0..side {
            lookup[x * side + y] = positions.len() as u32;
            positions.push(Vector3::new(x as f32, grid.elevation(x, y), y as f32));
        }
    }

    PreparedVertices {
        positions,
        side,
        lookup,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_data::{HeightField, SHADOW_FACTOR};

    #[test]
    fn test_one_vertex_per_grid_point() {
        let grid = HeightField::new(4).normalize(SHADOW_FACTOR);
        let prepared = prepare_vertices(&grid);
        assert_eq!(prepared.len(), 25);
    }

    #[test]
    fn test_indices_are_stable_and_unique() {
        let grid = HeightField::new(3).normalize(SHADOW_FACTOR);
        let prepared = prepare_vertices(&grid);

        let mut seen = std::collections::HashSet::new();
        for x in 0..=3 {
            for y in 0..=3 {
                assert!(seen.insert(prepared.index(x, y)));
            }
        }
        assert_eq!(prepared.index(0, 0), 0);
        assert_eq!(prepared.index(0, 1), 1);
        assert_eq!(prepared.index(1, 0), 4);
    }

    #[test]
    fn test_position_uses_elevation_as_height() {
        let mut field = HeightField::new(2);
        field.set_elevation(1, 2, 3.5);
        let grid = field.normalize(SHADOW_FACTOR);
        let prepared = prepare_vertices(&grid);

        assert_eq!(prepared.position(1, 2), Vector3::new(1.0, 3.5, 2.0));
        assert_eq!(prepared.position(2, 1), Vector3::new(2.0, 0.0, 1.0));
    }
}
