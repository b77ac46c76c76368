use godot::prelude::*;

use super::normals::compute_normals;
use super::types::*;
use crate::debug_log::debug_log;
use crate::tile_data::{RoofDefinitions, TileGrid};

/// Roof tile corners, going around from the tile's own vertex:
/// A=(x,y), B=(x+1,y), C=(x+1,y+1), D=(x,y+1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corner {
    A = 0,
    B = 1,
    C = 2,
    D = 3,
}

impl Corner {
    pub const ALL: [Corner; 4] = [Corner::A, Corner::B, Corner::C, Corner::D];

    fn from_index(idx: usize) -> Self {
        Self::ALL[idx % 4]
    }

    pub fn next(self) -> Self {
        Self::from_index(self as usize + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagonal {
    AC,
    BD,
}

/// Roof cap shape selected by which corners are raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoofShape {
    /// No corner raised.
    Flat,
    /// Every corner raised: interior of a roof.
    Top,
    /// Single raised corner (convex peak).
    Peak(Corner),
    /// Three raised corners; holds the one that is not (concave notch).
    Notch(Corner),
    /// Raised edge from this corner to the next one around.
    Slope(Corner),
    /// Raised opposite corners. No template exists for these.
    Ridge(Diagonal),
}

/// One triangle of a roof template: corner indices and `QUAD_UVS` indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoofFace {
    pub corners: [usize; 3],
    pub uvs: [usize; 3],
}

const fn face(corners: [usize; 3], uvs: [usize; 3]) -> RoofFace {
    RoofFace { corners, uvs }
}

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;
const D: usize = 3;

const FLAT: [RoofFace; 2] = [face([A, B, C], [0, 1, 2]), face([C, D, A], [2, 3, 0])];

const PEAKS: [[RoofFace; 2]; 4] = [
    [face([A, B, C], [2, 1, 0]), face([C, D, A], [1, 0, 3])],
    [face([B, C, D], [2, 1, 0]), face([B, D, A], [3, 1, 0])],
    [face([A, B, C], [0, 1, 2]), face([C, D, A], [3, 0, 1])],
    [face([B, C, D], [1, 0, 3]), face([B, D, A], [0, 2, 1])],
];

const NOTCHES: [[RoofFace; 2]; 4] = [
    [face([A, B, C], [1, 2, 3]), face([C, D, A], [2, 3, 0])],
    [face([B, C, D], [1, 2, 3]), face([B, D, A], [0, 2, 3])],
    [face([A, B, C], [3, 2, 1]), face([C, D, A], [0, 3, 2])],
    [face([B, C, D], [2, 3, 0]), face([B, D, A], [3, 1, 2])],
];

const SLOPES: [[RoofFace; 2]; 4] = [
    [face([A, B, C], [3, 2, 1]), face([C, D, A], [1, 0, 3])],
    [face([A, B, C], [1, 2, 3]), face([C, D, A], [3, 0, 1])],
    [face([A, B, C], [1, 0, 3]), face([C, D, A], [3, 2, 1])],
    [face([A, B, C], [3, 0, 1]), face([C, D, A], [1, 2, 3])],
];

impl RoofShape {
    pub fn classify(elevated: [bool; 4]) -> Self {
        let raised: Vec<Corner> = Corner::ALL
            .iter()
            .copied()
            .filter(|c| elevated[*c as usize])
            .collect();

        match raised.as_slice() {
            [] => RoofShape::Flat,
            [corner] => RoofShape::Peak(*corner),
            [first, second] => {
                if first.next() == *second {
                    RoofShape::Slope(*first)
                } else if second.next() == *first {
                    // D & A wraps around
                    RoofShape::Slope(*second)
                } else if *first == Corner::A {
                    RoofShape::Ridge(Diagonal::AC)
                } else {
                    RoofShape::Ridge(Diagonal::BD)
                }
            }
            [_, _, _] => {
                let lowered = Corner::ALL
                    .iter()
                    .copied()
                    .find(|c| !elevated[*c as usize])
                    .unwrap_or(Corner::A);
                RoofShape::Notch(lowered)
            }
            _ => RoofShape::Top,
        }
    }

    pub fn elevated_count(self) -> usize {
        match self {
            RoofShape::Flat => 0,
            RoofShape::Peak(_) => 1,
            RoofShape::Slope(_) | RoofShape::Ridge(_) => 2,
            RoofShape::Notch(_) => 3,
            RoofShape::Top => 4,
        }
    }

    /// Triangulation and UV template, or `None` for unsupported shapes.
    pub fn template(self) -> Option<[RoofFace; 2]> {
        match self {
            RoofShape::Flat | RoofShape::Top => Some(FLAT),
            RoofShape::Peak(corner) => Some(PEAKS[corner as usize]),
            RoofShape::Notch(corner) => Some(NOTCHES[corner as usize]),
            RoofShape::Slope(corner) => Some(SLOPES[corner as usize]),
            RoofShape::Ridge(_) => None,
        }
    }
}

fn is_footprint(grid: &TileGrid, x: usize, y: usize, level: usize) -> bool {
    grid.tile(x, y)
        .building(level)
        .is_some_and(|b| b.is_footprint())
}

/// Which corners of cell (x, y) are shared by building footprint on all
/// three neighboring tiles. Left/up neighbors clamp at the grid edge.
pub fn elevated_corners(grid: &TileGrid, x: usize, y: usize, level: usize) -> [bool; 4] {
    let left = x.saturating_sub(1);
    let up = y.saturating_sub(1);
    let right = x + 1;
    let down = y + 1;
    let all = |tiles: [(usize, usize); 3]| {
        tiles
            .iter()
            .all(|&(tx, ty)| is_footprint(grid, tx, ty, level))
    };

    [
        all([(left, up), (x, up), (left, y)]),
        all([(right, up), (x, up), (right, y)]),
        all([(right, down), (right, y), (x, down)]),
        all([(left, down), (left, y), (x, down)]),
    ]
}

/// Emit a roof cap for every roofed tile at `level`.
///
/// Tiles whose raised corners sit diagonally opposite have no template and
/// are recorded in the diagnostics instead of producing faces.
pub fn synthesize_roofs(
    grid: &TileGrid,
    level: usize,
    level_offset: f32,
    roof_height: f32,
    definitions: &RoofDefinitions,
) -> SynthesizedMesh {
    let size = grid.size();
    let mut buffers = MeshBuffers::default();
    let mut materials = MaterialTable::new();
    let mut diagnostics = Diagnostics::default();

    for x in 0..size {
        for y in 0..size {
            let Some(roof) = grid
                .tile(x, y)
                .building(level)
                .and_then(|b| b.roof.as_deref())
            else {
                continue;
            };

            let Some(roof_type) = definitions.get(roof) else {
                debug_log(&format!(
                    "[synthesize_roofs] unknown roof type '{}' at ({}, {}) level {}",
                    roof, x, y, level
                ));
                diagnostics.unknown_roof_types.push(roof.to_string());
                continue;
            };

            let elevated = elevated_corners(grid, x, y, level);
            let shape = RoofShape::classify(elevated);
            let Some(template) = shape.template() else {
                debug_log(&format!(
                    "[synthesize_roofs] no roof shape for {:?} at ({}, {}) level {}",
                    shape, x, y, level
                ));
                diagnostics.unsupported_roofs.push(RoofGap { x, y, level });
                continue;
            };

            let texture = if shape == RoofShape::Top {
                roof_type.top.as_str()
            } else {
                roof_type.side.as_str()
            };
            let material = materials.slot_for(Some(texture), MaterialKind::Basic);

            let corner_points = [(x, y), (x + 1, y), (x + 1, y + 1), (x, y + 1)];
            let mut ids = [0u32; 4];
            for (i, &(cx, cy)) in corner_points.iter().enumerate() {
                let rise = if elevated[i] { roof_height } else { 0.0 };
                let height = grid.elevation(cx, cy) + level_offset + rise;
                ids[i] = buffers.push_vertex(Vector3::new(cx as f32, height, cy as f32));
            }

            for f in template {
                buffers.triangles.push(MeshTriangle::untinted(
                    f.corners.map(|c| ids[c]),
                    f.uvs.map(|u| QUAD_UVS[u]),
                    material,
                ));
            }
        }
    }

    compute_normals(&mut buffers);

    SynthesizedMesh {
        buffers,
        materials,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile_data::{BuildingRecord, HeightField, RoofType, SHADOW_FACTOR, WALL_HEIGHT};

    const LEVEL: usize = 1;
    const ROOF_RISE: f32 = 0.8;

    fn definitions() -> RoofDefinitions {
        let mut defs = RoofDefinitions::new();
        defs.insert("slate".into(), RoofType::new("slate-top.png", "slate-side.png"));
        defs
    }

    fn roofed_block(size: usize, min: usize, max: usize) -> HeightField {
        let mut field = HeightField::new(size);
        for x in min..=max {
            for y in min..=max {
                field.set_building(x, y, LEVEL, BuildingRecord::with_roof("slate"));
            }
        }
        field
    }

    /// Footprint tiles that carry no roof of their own.
    fn footprint(field: &mut HeightField, tiles: &[(usize, usize)]) {
        for &(x, y) in tiles {
            field.set_building(x, y, LEVEL, BuildingRecord::with_walls(Vec::new()));
        }
    }

    fn run(field: &HeightField) -> SynthesizedMesh {
        let grid = field.normalize(SHADOW_FACTOR);
        synthesize_roofs(&grid, LEVEL, LEVEL as f32 * WALL_HEIGHT, ROOF_RISE, &definitions())
    }

    fn ground_area(positions: &[Vector3], tri: &MeshTriangle) -> f32 {
        let [a, b, c] = tri.vertices.map(|i| positions[i as usize]);
        ((b.x - a.x) * (c.z - a.z) - (c.x - a.x) * (b.z - a.z)) * 0.5
    }

    #[test]
    fn test_classify_all_sixteen_combinations() {
        let mut counts = [0usize; 5];
        let mut unsupported = 0;
        for mask in 0..16u8 {
            let elevated = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0];
            let shape = RoofShape::classify(elevated);
            let raised = elevated.iter().filter(|e| **e).count();

            assert_eq!(shape.elevated_count(), raised, "mask {mask:04b} -> {shape:?}");
            counts[raised] += 1;
            if shape.template().is_none() {
                unsupported += 1;
                assert!(matches!(shape, RoofShape::Ridge(_)));
            }
        }
        assert_eq!(counts, [1, 4, 6, 4, 1]);
        assert_eq!(unsupported, 2);
    }

    #[test]
    fn test_classify_specific_shapes() {
        assert_eq!(RoofShape::classify([false; 4]), RoofShape::Flat);
        assert_eq!(RoofShape::classify([true; 4]), RoofShape::Top);
        assert_eq!(
            RoofShape::classify([false, false, true, false]),
            RoofShape::Peak(Corner::C)
        );
        assert_eq!(
            RoofShape::classify([true, false, true, true]),
            RoofShape::Notch(Corner::B)
        );
        assert_eq!(
            RoofShape::classify([true, true, false, false]),
            RoofShape::Slope(Corner::A)
        );
        assert_eq!(
            RoofShape::classify([true, false, false, true]),
            RoofShape::Slope(Corner::D)
        );
        assert_eq!(
            RoofShape::classify([true, false, true, false]),
            RoofShape::Ridge(Diagonal::AC)
        );
        assert_eq!(
            RoofShape::classify([false, true, false, true]),
            RoofShape::Ridge(Diagonal::BD)
        );
    }

    #[test]
    fn test_templates_cover_cell_once() {
        let unit = [
            Vector3::new(0.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(1.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, 1.0),
        ];
        for mask in 0..16u8 {
            let elevated = [mask & 1 != 0, mask & 2 != 0, mask & 4 != 0, mask & 8 != 0];
            let Some(template) = RoofShape::classify(elevated).template() else {
                continue;
            };
            let tris: Vec<MeshTriangle> = template
                .iter()
                .map(|f| {
                    MeshTriangle::untinted(f.corners.map(|c| c as u32), [Vector2::ZERO; 3], 0)
                })
                .collect();
            let total: f32 = tris.iter().map(|t| ground_area(&unit, t).abs()).sum();
            assert!((total - 1.0).abs() < 1e-6, "mask {mask:04b}");

            let shared = tris[0]
                .vertices
                .iter()
                .filter(|v| tris[1].vertices.contains(v))
                .count();
            assert_eq!(shared, 2, "mask {mask:04b}");
        }
    }

    #[test]
    fn test_enclosed_block_interior_is_flat_top() {
        let field = roofed_block(5, 1, 3);
        let grid = field.normalize(SHADOW_FACTOR);

        assert_eq!(elevated_corners(&grid, 2, 2, LEVEL), [true; 4]);
        assert_eq!(
            RoofShape::classify(elevated_corners(&grid, 2, 2, LEVEL)),
            RoofShape::Top
        );
        assert_eq!(
            RoofShape::classify(elevated_corners(&grid, 1, 1, LEVEL)),
            RoofShape::Peak(Corner::C)
        );
        assert_eq!(
            RoofShape::classify(elevated_corners(&grid, 2, 1, LEVEL)),
            RoofShape::Slope(Corner::C)
        );
        assert_eq!(
            RoofShape::classify(elevated_corners(&grid, 3, 3, LEVEL)),
            RoofShape::Peak(Corner::A)
        );
    }

    #[test]
    fn test_enclosed_block_materials_and_heights() {
        let field = roofed_block(5, 1, 3);
        let mesh = run(&field);

        assert_eq!(mesh.buffers.triangle_count(), 18);
        assert!(mesh.diagnostics.is_clean());
        let top = mesh.materials.slot("slate-top.png").unwrap();
        let side = mesh.materials.slot("slate-side.png").unwrap();

        // Tiles are visited x-major; (2,2) is the fifth roofed tile
        let interior = &mesh.buffers.triangles[8..10];
        assert!(interior.iter().all(|t| t.material == top));
        let side_count = mesh
            .buffers
            .triangles
            .iter()
            .filter(|t| t.material == side)
            .count();
        assert_eq!(side_count, 16);

        let expected = WALL_HEIGHT + ROOF_RISE;
        for v in interior[0].vertices {
            assert!((mesh.buffers.positions[v as usize].y - expected).abs() < 1e-6);
        }
    }

    #[test]
    fn test_corner_heights_follow_ground_elevation() {
        let mut field = roofed_block(3, 0, 0);
        field.set_elevation(1, 1, 2.0);
        let mesh = run(&field);

        assert_eq!(mesh.buffers.vertex_count(), 4);
        let c = mesh.buffers.positions[2];
        assert_eq!((c.x, c.z), (1.0, 1.0));
        assert!((c.y - (2.0 + WALL_HEIGHT)).abs() < 1e-6);
    }

    #[test]
    fn test_edge_clamp_counts_tile_itself() {
        // Roof at the grid origin: left/up clamp back onto row/column 0
        let field = roofed_block(3, 0, 1);
        let grid = field.normalize(SHADOW_FACTOR);

        let elevated = elevated_corners(&grid, 0, 0, LEVEL);
        assert_eq!(elevated, [true, true, true, true]);
    }

    #[test]
    fn test_opposite_ac_corners_emit_nothing() {
        let mut field = HeightField::new(5);
        field.set_building(2, 2, LEVEL, BuildingRecord::with_roof("slate"));
        footprint(&mut field, &[(1, 1), (2, 1), (1, 2), (3, 3), (3, 2), (2, 3)]);
        let grid = field.normalize(SHADOW_FACTOR);
        assert_eq!(elevated_corners(&grid, 2, 2, LEVEL), [true, false, true, false]);

        let mesh = run(&field);
        assert!(mesh.buffers.is_empty());
        assert_eq!(
            mesh.diagnostics.unsupported_roofs,
            vec![RoofGap { x: 2, y: 2, level: LEVEL }]
        );
    }

    #[test]
    fn test_opposite_bd_corners_emit_nothing() {
        let mut field = HeightField::new(5);
        field.set_building(2, 2, LEVEL, BuildingRecord::with_roof("slate"));
        footprint(&mut field, &[(3, 1), (2, 1), (3, 2), (1, 3), (1, 2), (2, 3)]);
        let grid = field.normalize(SHADOW_FACTOR);
        assert_eq!(elevated_corners(&grid, 2, 2, LEVEL), [false, true, false, true]);

        let mesh = run(&field);
        assert!(mesh.buffers.is_empty());
        assert_eq!(mesh.diagnostics.unsupported_roofs.len(), 1);
    }

    #[test]
    fn test_unknown_roof_type_is_recorded() {
        let mut field = HeightField::new(2);
        field.set_building(0, 0, LEVEL, BuildingRecord::with_roof("straw"));
        let mesh = run(&field);

        assert!(mesh.buffers.is_empty());
        assert_eq!(mesh.diagnostics.unknown_roof_types, vec!["straw".to_string()]);
    }

    #[test]
    fn test_other_levels_do_not_join() {
        let mut field = roofed_block(4, 0, 2);
        field.set_building(1, 1, LEVEL + 1, BuildingRecord::with_roof("slate"));
        let grid = field.normalize(SHADOW_FACTOR);

        let upper = synthesize_roofs(
            &grid,
            LEVEL + 1,
            2.0 * WALL_HEIGHT,
            ROOF_RISE,
            &definitions(),
        );
        assert_eq!(upper.buffers.triangle_count(), 2);
        assert!(upper.buffers.positions.iter().all(|p| (p.y - 2.0 * WALL_HEIGHT).abs() < 1e-6));
    }
}
