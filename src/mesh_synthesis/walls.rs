use std::collections::HashMap;

use godot::prelude::*;

use super::normals::compute_normals;
use super::types::*;
use crate::debug_log::debug_log;
use crate::tile_data::{TileGrid, WallDefinitions, WallPosition};

/// Grid vertices spanned by a wall at `position` on tile (x, y), or `None`
/// when the far endpoint falls off the grid.
pub fn wall_endpoints(
    size: usize,
    x: usize,
    y: usize,
    position: WallPosition,
) -> Option<[(usize, usize); 2]> {
    match position {
        WallPosition::PlusX if x < size => Some([(x, y), (x + 1, y)]),
        WallPosition::PlusY if y < size => Some([(x, y), (x, y + 1)]),
        WallPosition::DiagA if x < size && y < size => Some([(x, y), (x + 1, y + 1)]),
        WallPosition::DiagB if x < size && y < size => Some([(x + 1, y), (x, y + 1)]),
        _ => None,
    }
}

/// Emit one vertical quad per polygon wall segment at `level`.
///
/// Quads are grouped by texture so each texture claims a single material slot.
pub fn synthesize_walls(
    grid: &TileGrid,
    level: usize,
    level_offset: f32,
    wall_height: f32,
    definitions: &WallDefinitions,
) -> SynthesizedMesh {
    let size = grid.size();
    let mut diagnostics = Diagnostics::default();

    // texture -> endpoint pairs, in first-seen order
    let mut order: Vec<&str> = Vec::new();
    let mut protofaces: HashMap<&str, Vec<[(usize, usize); 2]>> = HashMap::new();

    for x in 0..=size {
        for y in 0..=size {
            let Some(walls) = grid
                .tile(x, y)
                .building(level)
                .and_then(|b| b.walls.as_ref())
            else {
                continue;
            };

            for segment in walls {
                let Some(wall_type) = definitions.get(&segment.kind) else {
                    debug_log(&format!(
                        "[synthesize_walls] unknown wall type '{}' at ({}, {}) level {}",
                        segment.kind, x, y, level
                    ));
                    diagnostics.unknown_wall_types.push(segment.kind.clone());
                    continue;
                };
                if !wall_type.is_polygon {
                    continue;
                }
                let Some(endpoints) = wall_endpoints(size, x, y, segment.position) else {
                    continue;
                };

                let texture = wall_type.texture.as_str();
                protofaces
                    .entry(texture)
                    .or_insert_with(|| {
                        order.push(texture);
                        Vec::new()
                    })
                    .push(endpoints);
            }
        }
    }

    let mut buffers = MeshBuffers::default();
    let mut materials = MaterialTable::new();

    for texture in order {
        let material = materials.slot_for(Some(texture), MaterialKind::Basic);

        for [(x0, y0), (x1, y1)] in &protofaces[texture] {
            let base0 = grid.elevation(*x0, *y0) + level_offset;
            let base1 = grid.elevation(*x1, *y1) + level_offset;

            let i1 = buffers.push_vertex(Vector3::new(*x0 as f32, base0, *y0 as f32));
            let i2 = buffers.push_vertex(Vector3::new(*x0 as f32, base0 + wall_height, *y0 as f32));
            let i3 = buffers.push_vertex(Vector3::new(*x1 as f32, base1, *y1 as f32));
            let i4 = buffers.push_vertex(Vector3::new(*x1 as f32, base1 + wall_height, *y1 as f32));

            buffers
                .triangles
                .push(MeshTriangle::untinted([i1, i3, i2], DIAGB_UVS_0, material));
            buffers
                .triangles
                .push(MeshTriangle::untinted([i4, i3, i2], DIAGB_UVS_1, material));
        }
    }

    compute_normals(&mut buffers);

    SynthesizedMesh {
        buffers,
        materials,
        diagnostics,
    }
}
