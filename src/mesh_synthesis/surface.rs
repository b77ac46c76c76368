use godot::prelude::*;

use super::normals::compute_normals;
use super::types::*;
use super::vertex::PreparedVertices;
use crate::tile_data::{DrawMode, Orientation, Tile, TileGrid};

/// Resolved vertex colors for the four corners of one cell.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CornerColors {
    pub c00: Color,
    pub c01: Color,
    pub c10: Color,
    pub c11: Color,
}

/// Pick which tile's color each corner of t00's cell shows.
///
/// Blend tiles bleed into their neighbors' corners; explicit tiles keep their
/// color. The shadow variant is chosen by the corner's own tile regardless of
/// where the color came from.
pub fn resolve_corner_colors(t00: &Tile, t01: &Tile, t10: &Tile, t11: &Tile) -> CornerColors {
    let (selected01, selected10, selected11) = if t00.is_explicit() {
        (t00, t00, t00)
    } else {
        let selected01 = if t01.is_explicit() { t00 } else { t01 };
        let selected10 = if t10.is_explicit() { t00 } else { t10 };
        let selected11 = if !t11.is_explicit() {
            t11
        } else if t10.is_explicit() && !t01.is_explicit() {
            t01
        } else if t01.is_explicit() && !t10.is_explicit() {
            t10
        } else {
            t00
        };
        (selected01, selected10, selected11)
    };

    CornerColors {
        c00: t00.colors.pick(t00.shadow),
        c01: selected01.colors.pick(t01.shadow),
        c10: selected10.colors.pick(t10.shadow),
        c11: selected11.colors.pick(t11.shadow),
    }
}

/// Emit two triangles per drawable cell over the shared grid vertices.
///
/// `materials` is normally `MaterialTable::with_vertex_color_default()`; pass a
/// table from an earlier pass to share slots across groups.
pub fn synthesize_surface(
    grid: &TileGrid,
    prepared: &PreparedVertices,
    mut materials: MaterialTable,
) -> SynthesizedMesh {
    let size = grid.size();
    let mut buffers = MeshBuffers {
        positions: prepared.positions.clone(),
        normals: Vec::new(),
        triangles: Vec::with_capacity(size * size * 2),
    };

    for x in 0..size {
        for y in 0..size {
            let tile = grid.tile(x, y);
            if tile.draw == DrawMode::None {
                continue;
            }

            let v00 = prepared.index(x, y);
            let v10 = prepared.index(x + 1, y);
            let v11 = prepared.index(x + 1, y + 1);
            let v01 = prepared.index(x, y + 1);

            let colors = resolve_corner_colors(
                tile,
                grid.tile(x, y + 1),
                grid.tile(x + 1, y),
                grid.tile(x + 1, y + 1),
            );

            let first_material = materials.slot_for(tile.texture.as_deref(), MaterialKind::Lambert);
            let second_material =
                materials.slot_for(tile.secondary_texture(), MaterialKind::Lambert);

            let (first, second) = match tile.orientation {
                Orientation::DiagA => (
                    MeshTriangle::new(
                        [v00, v01, v11],
                        [colors.c00, colors.c01, colors.c11],
                        DIAGA_UVS_0,
                        first_material,
                    ),
                    MeshTriangle::new(
                        [v00, v11, v10],
                        [colors.c00, colors.c11, colors.c10],
                        DIAGA_UVS_1,
                        second_material,
                    ),
                ),
                Orientation::DiagB => (
                    MeshTriangle::new(
                        [v00, v01, v10],
                        [colors.c00, colors.c01, colors.c10],
                        DIAGB_UVS_0,
                        first_material,
                    ),
                    MeshTriangle::new(
                        [v10, v01, v11],
                        [colors.c10, colors.c01, colors.c11],
                        DIAGB_UVS_1,
                        second_material,
                    ),
                ),
            };

            buffers.triangles.push(first);
            buffers.triangles.push(second);
        }
    }

    compute_normals(&mut buffers);

    SynthesizedMesh {
        buffers,
        materials,
        diagnostics: Diagnostics::default(),
    }
}
