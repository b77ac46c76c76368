use std::collections::HashMap;

use godot::prelude::*;

// =====================
// ===== Constants =====
// =====================

pub(super) const UV_0: Vector2 = Vector2::new(0.0, 0.0);
pub(super) const UV_1: Vector2 = Vector2::new(1.0, 0.0);
pub(super) const UV_2: Vector2 = Vector2::new(1.0, 1.0);
pub(super) const UV_3: Vector2 = Vector2::new(0.0, 1.0);

/// Quad corner UVs indexed by the roof templates.
pub(super) const QUAD_UVS: [Vector2; 4] = [UV_0, UV_1, UV_2, UV_3];

pub(super) const DIAGA_UVS_0: [Vector2; 3] = [UV_0, UV_2, UV_3];
pub(super) const DIAGA_UVS_1: [Vector2; 3] = [UV_1, UV_0, UV_2];
pub(super) const DIAGB_UVS_0: [Vector2; 3] = [UV_0, UV_1, UV_3];
pub(super) const DIAGB_UVS_1: [Vector2; 3] = [UV_2, UV_1, UV_3];

/// Vertex color for geometry whose material ignores vertex colors.
pub(super) const UNTINTED: Color = Color::from_rgba(1.0, 1.0, 1.0, 1.0);

// =====================
// ===== Types  ========
// =====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialKind {
    /// Lit, front-face only, vertex-colored when untextured.
    Lambert,
    /// Unlit, double-sided, alpha-tested.
    Basic,
}

impl MaterialKind {
    pub fn alpha_test(self) -> Option<f32> {
        match self {
            MaterialKind::Lambert => None,
            MaterialKind::Basic => Some(0.5),
        }
    }

    pub fn double_sided(self) -> bool {
        matches!(self, MaterialKind::Basic)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialSlot {
    /// `None` for the untextured vertex-colored default.
    pub texture: Option<String>,
    pub kind: MaterialKind,
}

impl MaterialSlot {
    /// Only the untextured slot takes its albedo from vertex colors; textured
    /// slots show the texture as-is.
    pub fn uses_vertex_colors(&self) -> bool {
        self.texture.is_none()
    }
}

/// Texture name to material slot mapping, scoped to the pass that fills it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterialTable {
    slots: Vec<MaterialSlot>,
    lookup: HashMap<String, u32>,
}

impl MaterialTable {
    /// Empty table; the first texture seen takes slot 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table whose slot 0 is the untextured vertex-colored surface material.
    pub fn with_vertex_color_default() -> Self {
        Self {
            slots: vec![MaterialSlot {
                texture: None,
                kind: MaterialKind::Lambert,
            }],
            lookup: HashMap::new(),
        }
    }

    /// Slot for `texture`, allocating the next one on first sight.
    /// A missing texture maps to slot 0.
    pub fn slot_for(&mut self, texture: Option<&str>, kind: MaterialKind) -> u32 {
        let Some(texture) = texture else {
            return 0;
        };
        if let Some(&slot) = self.lookup.get(texture) {
            return slot;
        }
        let slot = self.slots.len() as u32;
        self.slots.push(MaterialSlot {
            texture: Some(texture.to_string()),
            kind,
        });
        self.lookup.insert(texture.to_string(), slot);
        slot
    }

    pub fn slot(&self, texture: &str) -> Option<u32> {
        self.lookup.get(texture).copied()
    }

    pub fn slots(&self) -> &[MaterialSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshTriangle {
    pub vertices: [u32; 3],
    pub colors: [Color; 3],
    pub uvs: [Vector2; 3],
    pub material: u32,
    pub normal: Vector3,
}

impl MeshTriangle {
    pub fn new(vertices: [u32; 3], colors: [Color; 3], uvs: [Vector2; 3], material: u32) -> Self {
        Self {
            vertices,
            colors,
            uvs,
            material,
            normal: Vector3::ZERO,
        }
    }

    pub fn untinted(vertices: [u32; 3], uvs: [Vector2; 3], material: u32) -> Self {
        Self::new(vertices, [UNTINTED; 3], uvs, material)
    }
}

/// Indexed triangle buffer: shared positions, per-corner colors and UVs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshBuffers {
    pub positions: Vec<Vector3>,
    /// Filled by `compute_normals`, one per position.
    pub normals: Vec<Vector3>,
    pub triangles: Vec<MeshTriangle>,
}

impl MeshBuffers {
    pub fn push_vertex(&mut self, position: Vector3) -> u32 {
        self.positions.push(position);
        (self.positions.len() - 1) as u32
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Roof tile skipped because its raised corners sit on opposite corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoofGap {
    pub x: usize,
    pub y: usize,
    pub level: usize,
}

/// Non-fatal data gaps met during one synthesis pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    pub unsupported_roofs: Vec<RoofGap>,
    pub unknown_wall_types: Vec<String>,
    pub unknown_roof_types: Vec<String>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.unsupported_roofs.is_empty()
            && self.unknown_wall_types.is_empty()
            && self.unknown_roof_types.is_empty()
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.unsupported_roofs.extend(other.unsupported_roofs);
        self.unknown_wall_types.extend(other.unknown_wall_types);
        self.unknown_roof_types.extend(other.unknown_roof_types);
    }
}

/// Output of one synthesizer pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesizedMesh {
    pub buffers: MeshBuffers,
    pub materials: MaterialTable,
    pub diagnostics: Diagnostics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_untextured_slot_is_vertex_colored() {
        let mut table = MaterialTable::with_vertex_color_default();
        let grass = table.slot_for(Some("grass.png"), MaterialKind::Lambert);

        let slots = table.slots();
        assert!(slots[0].uses_vertex_colors());
        assert!(!slots[grass as usize].uses_vertex_colors());
    }

    #[test]
    fn test_wall_slots_ignore_vertex_colors() {
        let mut table = MaterialTable::new();
        let stone = table.slot_for(Some("stone.png"), MaterialKind::Basic);
        assert_eq!(stone, 0);
        assert!(!table.slots()[0].uses_vertex_colors());
    }
}
