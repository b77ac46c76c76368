//! Fragment assembly: synthesized meshes grouped into surface, walls and
//! roofs, positioned by fragment offset, and attached to a scene container.

use std::sync::Arc;

use godot::prelude::*;
use thiserror::Error;

use crate::debug_log::{debug_log, summarize_diagnostics};
use crate::elevation::ElevationSampler;
use crate::mesh_synthesis::{
    prepare_vertices, synthesize_roofs, synthesize_surface, synthesize_walls, Diagnostics,
    MaterialSlot, MaterialTable, MeshBuffers, SynthesizedMesh,
};
use crate::shared_params::SynthesisParams;
use crate::tile_data::{HeightField, RoofDefinitions, WallDefinitions};

/// Collaborators missing when synthesis was requested.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("texture resolver missing")]
    MissingTextureResolver,
    #[error("wall definitions missing")]
    MissingWallDefinitions,
    #[error("roof definitions missing")]
    MissingRoofDefinitions,
}

/// Maps texture names to engine handles. Never decodes image data itself.
pub trait TextureResolver {
    type Handle: Clone;

    fn resolve(&mut self, texture: &str) -> Self::Handle;
}

/// Receives and releases mesh groups. Calls are serialized by the owning
/// `TerrainMesh`; implementations need no locking of their own.
pub trait SceneContainer {
    type Handle;

    fn add_group(&mut self, group: &MeshGroup<Self::Handle>);
    fn remove_group(&mut self, group: &MeshGroup<Self::Handle>);
}

/// Fragment position in fragment units; tile-space origin is offset × size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentOffset {
    pub mx: i32,
    pub my: i32,
}

impl FragmentOffset {
    pub fn new(mx: i32, my: i32) -> Self {
        Self { mx, my }
    }

    pub fn key(&self) -> String {
        format!("{},{}", self.mx, self.my)
    }

    pub fn translation(&self, size: usize) -> Vector3 {
        Vector3::new(
            (self.mx * size as i32) as f32,
            0.0,
            (self.my * size as i32) as f32,
        )
    }
}

/// Unresolved synthesis output for one fragment. Holds no engine handles,
/// so it can be produced on a worker thread.
#[derive(Debug, Clone)]
pub struct FragmentMeshes {
    pub offset: Option<FragmentOffset>,
    pub size: usize,
    pub surface: SynthesizedMesh,
    /// Level 0 walls and roof caps.
    pub walls: Vec<SynthesizedMesh>,
    /// Walls and roof caps of every upper level.
    pub roofs: Vec<SynthesizedMesh>,
    pub sampler: ElevationSampler,
}

impl FragmentMeshes {
    pub fn diagnostics(&self) -> Diagnostics {
        let mut all = Diagnostics::default();
        for mesh in self.walls.iter().chain(self.roofs.iter()) {
            all.merge(mesh.diagnostics.clone());
        }
        all
    }

    pub fn label(&self) -> String {
        self.offset.map_or_else(|| "fragment".to_string(), |o| o.key())
    }
}

/// Normalize the raw grid and run every synthesizer over it.
pub fn synthesize_fragment(
    field: &HeightField,
    offset: Option<FragmentOffset>,
    walls: &WallDefinitions,
    roofs: &RoofDefinitions,
    params: &SynthesisParams,
) -> FragmentMeshes {
    let grid = Arc::new(field.normalize(params.shadow_factor));
    let prepared = prepare_vertices(&grid);
    let surface = synthesize_surface(&grid, &prepared, MaterialTable::with_vertex_color_default());

    let mut wall_group = Vec::new();
    let mut roof_group = Vec::new();
    for level in params.levels() {
        let level_offset = params.level_offset(level);
        let level_walls = synthesize_walls(&grid, level, level_offset, params.wall_height, walls);
        let level_roofs = synthesize_roofs(&grid, level, level_offset, params.roof_height, roofs);

        let target = if level == 0 {
            &mut wall_group
        } else {
            &mut roof_group
        };
        target.push(level_walls);
        target.push(level_roofs);
    }

    let fragment = FragmentMeshes {
        offset,
        size: grid.size(),
        surface,
        walls: wall_group,
        roofs: roof_group,
        sampler: ElevationSampler::new(grid),
    };

    if let Some(summary) = summarize_diagnostics(&fragment.label(), &fragment.diagnostics()) {
        debug_log(&summary);
    }
    fragment
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMaterial<H> {
    pub slot: MaterialSlot,
    /// `None` for the untextured vertex-colored slot.
    pub texture: Option<H>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMesh<H> {
    pub buffers: MeshBuffers,
    pub materials: Vec<ResolvedMaterial<H>>,
}

/// A named, positioned set of meshes attached and detached as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshGroup<H> {
    pub name: String,
    pub translation: Vector3,
    pub meshes: Vec<GroupMesh<H>>,
}

impl<H> MeshGroup<H> {
    pub fn triangle_count(&self) -> usize {
        self.meshes.iter().map(|m| m.buffers.triangle_count()).sum()
    }
}

fn resolve_mesh<R: TextureResolver>(
    mesh: SynthesizedMesh,
    resolver: &mut R,
) -> GroupMesh<R::Handle> {
    let materials = mesh
        .materials
        .slots()
        .iter()
        .map(|slot| ResolvedMaterial {
            slot: slot.clone(),
            texture: slot.texture.as_deref().map(|t| resolver.resolve(t)),
        })
        .collect();
    GroupMesh {
        buffers: mesh.buffers,
        materials,
    }
}

fn group_name(prefix: &str, offset: Option<FragmentOffset>) -> String {
    match offset {
        Some(o) => format!("{}-{}", prefix, o.key()),
        None => prefix.to_string(),
    }
}

/// Builds terrain meshes once its collaborators have been supplied.
pub struct MeshSynthesizer<R> {
    params: SynthesisParams,
    walls: Option<Arc<WallDefinitions>>,
    roofs: Option<Arc<RoofDefinitions>>,
    resolver: Option<R>,
}

impl<R: TextureResolver> MeshSynthesizer<R> {
    pub fn new(params: SynthesisParams) -> Self {
        Self {
            params,
            walls: None,
            roofs: None,
            resolver: None,
        }
    }

    pub fn use_wall_definitions(&mut self, walls: Arc<WallDefinitions>) {
        self.walls = Some(walls);
    }

    pub fn use_roof_definitions(&mut self, roofs: Arc<RoofDefinitions>) {
        self.roofs = Some(roofs);
    }

    pub fn use_texture_resolver(&mut self, resolver: R) {
        self.resolver = Some(resolver);
    }

    pub fn params(&self) -> &SynthesisParams {
        &self.params
    }

    /// Shared wall and roof dictionaries, for handing to worker threads.
    pub fn definitions(
        &self,
    ) -> Result<(Arc<WallDefinitions>, Arc<RoofDefinitions>), SynthesisError> {
        let walls = self
            .walls
            .clone()
            .ok_or(SynthesisError::MissingWallDefinitions)?;
        let roofs = self
            .roofs
            .clone()
            .ok_or(SynthesisError::MissingRoofDefinitions)?;
        Ok((walls, roofs))
    }

    fn ensure_ready(&self) -> Result<(), SynthesisError> {
        if self.resolver.is_none() {
            return Err(SynthesisError::MissingTextureResolver);
        }
        self.definitions().map(|_| ())
    }

    /// Synthesize and assemble one fragment on the calling thread.
    pub fn create_mesh<C>(
        &mut self,
        field: &HeightField,
        offset: Option<FragmentOffset>,
    ) -> Result<TerrainMesh<R::Handle, C>, SynthesisError> {
        self.ensure_ready()?;
        let (walls, roofs) = self.definitions()?;
        let fragment = synthesize_fragment(field, offset, &walls, &roofs, &self.params);
        self.assemble(fragment)
    }

    /// Resolve textures and position the groups of an already synthesized fragment.
    pub fn assemble<C>(
        &mut self,
        fragment: FragmentMeshes,
    ) -> Result<TerrainMesh<R::Handle, C>, SynthesisError> {
        let resolver = self
            .resolver
            .as_mut()
            .ok_or(SynthesisError::MissingTextureResolver)?;

        let diagnostics = fragment.diagnostics();
        let offset = fragment.offset;
        let translation = offset.map_or(Vector3::ZERO, |o| o.translation(fragment.size));
        let mut group = |prefix: &str, meshes: Vec<SynthesizedMesh>| MeshGroup {
            name: group_name(prefix, offset),
            translation,
            meshes: meshes
                .into_iter()
                .map(|m| resolve_mesh(m, resolver))
                .collect(),
        };

        let surface = group("mesh", vec![fragment.surface]);
        let walls = group("walls", fragment.walls);
        let roofs = group("roofs", fragment.roofs);

        Ok(TerrainMesh {
            offset,
            surface,
            walls,
            roofs,
            sampler: fragment.sampler,
            diagnostics,
            visibility: Visibility::Outdoors,
            attachment: SceneAttachment::Detached,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Roofs shown.
    #[default]
    Outdoors,
    /// Roofs removed from the scene.
    Indoors,
}

#[derive(Debug, Default)]
pub enum SceneAttachment<C> {
    #[default]
    Detached,
    Attached(C),
}

/// The three mesh groups of one fragment plus their scene state.
pub struct TerrainMesh<H, C> {
    offset: Option<FragmentOffset>,
    surface: MeshGroup<H>,
    walls: MeshGroup<H>,
    roofs: MeshGroup<H>,
    sampler: ElevationSampler,
    diagnostics: Diagnostics,
    visibility: Visibility,
    attachment: SceneAttachment<C>,
}

impl<H, C> TerrainMesh<H, C> {
    pub fn offset(&self) -> Option<FragmentOffset> {
        self.offset
    }

    pub fn surface(&self) -> &MeshGroup<H> {
        &self.surface
    }

    pub fn walls(&self) -> &MeshGroup<H> {
        &self.walls
    }

    pub fn roofs(&self) -> &MeshGroup<H> {
        &self.roofs
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn roofs_visible(&self) -> bool {
        self.visibility == Visibility::Outdoors
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.attachment, SceneAttachment::Attached(_))
    }

    pub fn container(&self) -> Option<&C> {
        match &self.attachment {
            SceneAttachment::Attached(c) => Some(c),
            SceneAttachment::Detached => None,
        }
    }

    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        self.sampler.height_at(x, y)
    }
}

impl<H, C: SceneContainer<Handle = H>> TerrainMesh<H, C> {
    /// Add the groups to `container`.
    ///
    /// # Panics
    /// If the mesh is already attached to a container.
    pub fn attach(&mut self, mut container: C) {
        if self.is_attached() {
            panic!("terrain mesh {:?} is already attached to a scene", self.surface.name);
        }
        container.add_group(&self.surface);
        container.add_group(&self.walls);
        if self.roofs_visible() {
            container.add_group(&self.roofs);
        }
        self.attachment = SceneAttachment::Attached(container);
    }

    /// Remove the groups from their container and hand it back.
    ///
    /// # Panics
    /// If the mesh is not attached.
    pub fn detach(&mut self) -> C {
        let SceneAttachment::Attached(mut container) =
            std::mem::replace(&mut self.attachment, SceneAttachment::Detached)
        else {
            panic!("terrain mesh {:?} is not attached to a scene", self.surface.name);
        };
        container.remove_group(&self.surface);
        container.remove_group(&self.walls);
        if self.roofs_visible() {
            container.remove_group(&self.roofs);
        }
        container
    }

    /// Indoors hides the roofs group, outdoors shows it again.
    pub fn set_indoor(&mut self, indoors: bool) {
        match (self.visibility, indoors) {
            (Visibility::Outdoors, true) => {
                if let SceneAttachment::Attached(container) = &mut self.attachment {
                    container.remove_group(&self.roofs);
                }
                self.visibility = Visibility::Indoors;
            }
            (Visibility::Indoors, false) => {
                if let SceneAttachment::Attached(container) = &mut self.attachment {
                    container.add_group(&self.roofs);
                }
                self.visibility = Visibility::Outdoors;
            }
            _ => {}
        }
    }

    pub fn toggle_roofs(&mut self) {
        self.set_indoor(self.roofs_visible());
    }
}
