use std::collections::HashMap;
use std::sync::Arc;

use godot::classes::base_material_3d::{CullMode, Flags, ShadingMode, TextureParam, Transparency};
use godot::classes::mesh::PrimitiveType;
use godot::classes::rendering_server::ArrayType;
use godot::classes::{
    ArrayMesh, INode3D, Material, MeshInstance3D, Node3D, ResourceLoader, StandardMaterial3D,
    Texture2D,
};
use godot::prelude::*;

use crate::debug_log::{compute_normal_stats, debug_log, init_debug_log, summarize_diagnostics};
use crate::mesh_synthesis::{MaterialKind, MaterialSlot};
use crate::mesh_worker::{FragmentRequest, FragmentResult, FragmentWorkerPool};
use crate::shared_params::SynthesisParams;
use crate::terrain_mesh::{
    FragmentOffset, GroupMesh, MeshGroup, MeshSynthesizer, SceneContainer, TerrainMesh,
    TextureResolver,
};
use crate::tile_data::{
    BuildingRecord, DrawMode, HeightField, Orientation, RawTile, Rgb, RoofDefinitions, RoofType,
    Secondary, WallDefinitions, WallPosition, WallSegment, WallType, GRID_SIZE, MAX_LEVEL,
    ROOF_HEIGHT, SHADOW_FACTOR, WALL_HEIGHT,
};

type VariantArray = Array<Variant>;

/// Texture handle as seen by the scene; `None` when the file could not be loaded.
pub type TextureHandle = Option<Gd<Texture2D>>;

type FragmentMesh = TerrainMesh<TextureHandle, NodeContainer>;

/// Loads textures through the engine's resource loader, once per name.
pub struct GodotTextureResolver {
    root: String,
    cache: HashMap<String, TextureHandle>,
}

impl GodotTextureResolver {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    fn load(&self, texture: &str) -> TextureHandle {
        let path = format!("{}{}", self.root, texture);
        let mut loader = ResourceLoader::singleton();
        if !loader.exists(path.as_str()) {
            godot_warn!("PixyTileTerrain: texture not found at {path}");
            return None;
        }
        let Some(resource) = loader.load(path.as_str()) else {
            godot_warn!("PixyTileTerrain: failed to load texture {path}");
            return None;
        };
        match resource.try_cast::<Texture2D>() {
            Ok(texture) => Some(texture),
            Err(_) => {
                godot_warn!("PixyTileTerrain: resource at {path} is not a Texture2D");
                None
            }
        }
    }
}

impl TextureResolver for GodotTextureResolver {
    type Handle = TextureHandle;

    fn resolve(&mut self, texture: &str) -> TextureHandle {
        if let Some(handle) = self.cache.get(texture) {
            return handle.clone();
        }
        let handle = self.load(texture);
        self.cache.insert(texture.to_string(), handle.clone());
        handle
    }
}

fn create_material(slot: &MaterialSlot, texture: &TextureHandle) -> Gd<Material> {
    let kind = slot.kind;
    let mut material = StandardMaterial3D::new_gd();
    material.set_flag(Flags::ALBEDO_FROM_VERTEX_COLOR, slot.uses_vertex_colors());
    if let Some(texture) = texture {
        material.set_texture(TextureParam::ALBEDO, texture);
    }
    if kind == MaterialKind::Basic {
        material.set_shading_mode(ShadingMode::UNSHADED);
    }
    if let Some(threshold) = kind.alpha_test() {
        material.set_transparency(Transparency::ALPHA_SCISSOR);
        material.set_alpha_scissor_threshold(threshold);
    }
    if kind.double_sided() {
        material.set_cull_mode(CullMode::DISABLED);
    }
    material.upcast()
}

/// One ArrayMesh surface per material slot that has triangles.
fn build_array_mesh(mesh: &GroupMesh<TextureHandle>) -> Option<Gd<ArrayMesh>> {
    let buffers = &mesh.buffers;
    if buffers.is_empty() {
        return None;
    }

    let mut array_mesh = ArrayMesh::new_gd();
    let num_arrays = ArrayType::MAX.ord() as usize;

    for (slot, material) in mesh.materials.iter().enumerate() {
        let mut vertices = PackedVector3Array::new();
        let mut normals = PackedVector3Array::new();
        let mut colors = PackedColorArray::new();
        let mut uvs = PackedVector2Array::new();

        for tri in buffers.triangles.iter().filter(|t| t.material as usize == slot) {
            for k in 0..3 {
                let v = tri.vertices[k] as usize;
                vertices.push(buffers.positions[v]);
                normals.push(buffers.normals.get(v).copied().unwrap_or(tri.normal));
                colors.push(tri.colors[k]);
                uvs.push(tri.uvs[k]);
            }
        }

        if vertices.is_empty() {
            continue;
        }

        let mut arrays: VariantArray = VariantArray::new();
        for i in 0..num_arrays {
            if i == ArrayType::VERTEX.ord() as usize {
                arrays.push(&vertices.to_variant());
            } else if i == ArrayType::NORMAL.ord() as usize {
                arrays.push(&normals.to_variant());
            } else if i == ArrayType::COLOR.ord() as usize {
                arrays.push(&colors.to_variant());
            } else if i == ArrayType::TEX_UV.ord() as usize {
                arrays.push(&uvs.to_variant());
            } else {
                arrays.push(&Variant::nil());
            }
        }

        array_mesh.add_surface_from_arrays(PrimitiveType::TRIANGLES, &arrays);
        let surface = array_mesh.get_surface_count() - 1;
        let material = create_material(&material.slot, &material.texture.clone().flatten());
        array_mesh.surface_set_material(surface, &material);
    }

    (array_mesh.get_surface_count() > 0).then_some(array_mesh)
}

fn build_group_node(group: &MeshGroup<TextureHandle>) -> Gd<Node3D> {
    let mut node = Node3D::new_alloc();
    node.set_name(group.name.as_str());
    node.set_position(group.translation);

    for (i, mesh) in group.meshes.iter().enumerate() {
        let Some(array_mesh) = build_array_mesh(mesh) else {
            continue;
        };
        let mut instance = MeshInstance3D::new_alloc();
        instance.set_name(format!("{}-{}", group.name, i).as_str());
        instance.set_mesh(&array_mesh);
        node.add_child(&instance);
    }
    node
}

/// Scene container backed by child nodes of the terrain node. Group nodes are
/// built on first attach and kept while detached so toggling roofs is cheap.
pub struct NodeContainer {
    parent: Gd<Node3D>,
    nodes: HashMap<String, Gd<Node3D>>,
}

impl NodeContainer {
    pub fn new(parent: Gd<Node3D>) -> Self {
        Self {
            parent,
            nodes: HashMap::new(),
        }
    }

    /// Free every group node this container built.
    pub fn release(self) {
        for (_, mut node) in self.nodes {
            if node.is_inside_tree() {
                node.queue_free();
            } else {
                node.free();
            }
        }
    }
}

impl SceneContainer for NodeContainer {
    type Handle = TextureHandle;

    fn add_group(&mut self, group: &MeshGroup<TextureHandle>) {
        let node = self
            .nodes
            .entry(group.name.clone())
            .or_insert_with(|| build_group_node(group));
        if node.get_parent().is_none() {
            self.parent.add_child(&*node);
        }
    }

    fn remove_group(&mut self, group: &MeshGroup<TextureHandle>) {
        if let Some(node) = self.nodes.get(&group.name) {
            if node.get_parent().is_some() {
                self.parent.remove_child(node);
            }
        }
    }
}

// =====================
// ===== Tile data =====
// =====================

fn dict_number(dict: &VarDictionary, key: &str) -> Option<f64> {
    let value = dict.get(key)?;
    value
        .try_to::<f64>()
        .ok()
        .or_else(|| value.try_to::<i64>().ok().map(|i| i as f64))
}

fn dict_string(dict: &VarDictionary, key: &str) -> Option<String> {
    dict.get(key)?
        .try_to::<GString>()
        .ok()
        .map(|s| s.to_string())
}

fn dict_dictionary(dict: &VarDictionary, key: &str) -> Option<VarDictionary> {
    dict.get(key)?.try_to::<VarDictionary>().ok()
}

fn dict_rgb(dict: &VarDictionary, key: &str) -> Option<Rgb> {
    let color = dict_dictionary(dict, key)?;
    let channel = |c: &str| dict_number(&color, c).unwrap_or(0.0);
    Some(Rgb::from_channels(channel("r"), channel("g"), channel("b")))
}

fn building_from_dict(dict: &VarDictionary) -> BuildingRecord {
    let walls = dict
        .get("walls")
        .and_then(|v| v.try_to::<VariantArray>().ok())
        .map(|walls| {
            walls
                .iter_shared()
                .filter_map(|wall| wall.try_to::<VarDictionary>().ok())
                .filter_map(|wall| {
                    let kind = dict_string(&wall, "type")?;
                    let position = dict_string(&wall, "position")?;
                    let Some(position) = WallPosition::from_name(&position) else {
                        godot_warn!("PixyTileTerrain: unknown wall position '{position}'");
                        return None;
                    };
                    Some(WallSegment::new(kind, position))
                })
                .collect()
        });

    BuildingRecord {
        roof: dict_string(dict, "roof"),
        walls,
    }
}

/// Map one tile dictionary (elevation, override, draw, orientation, color,
/// secondary, texture, shadow, buildings) onto a raw tile. Missing keys stay
/// unset and are defaulted by normalization.
fn raw_tile_from_dict(dict: &VarDictionary) -> RawTile {
    let mut tile = RawTile {
        elevation: dict_number(dict, "elevation").map(|e| e as f32),
        height_override: dict_number(dict, "override").map(|h| h as f32),
        draw: dict_string(dict, "draw").and_then(|d| DrawMode::from_name(&d)),
        orientation: dict_string(dict, "orientation").and_then(|o| Orientation::from_name(&o)),
        color: dict_rgb(dict, "color"),
        secondary: dict_dictionary(dict, "secondary").map(|s| Secondary {
            color: dict_rgb(&s, "color"),
            texture: dict_string(&s, "texture"),
        }),
        texture: dict_string(dict, "texture"),
        shadow: dict
            .get("shadow")
            .and_then(|v| v.try_to::<bool>().ok())
            .unwrap_or(false),
        ..Default::default()
    };

    if let Some(buildings) = dict_dictionary(dict, "buildings") {
        for (level, record) in buildings.iter_shared() {
            let Ok(record) = record.try_to::<VarDictionary>() else {
                continue;
            };
            let level = level.to_string();
            if !tile.set_building_named(&level, building_from_dict(&record)) {
                godot_warn!("PixyTileTerrain: unknown building level '{level}'");
            }
        }
    }
    tile
}

/// Tile-world terrain: synthesizes surface, wall and roof meshes per map
/// fragment and manages their visibility.
#[derive(GodotClass)]
#[class(base=Node3D, init, tool)]
pub struct PixyTileTerrain {
    base: Base<Node3D>,

    /// Directory prefix for every texture name in the tile data
    #[export]
    #[init(val = GString::from("res://textures/"))]
    texture_root: GString,

    /// Tiles per side of one fragment
    #[export]
    #[init(val = GRID_SIZE as i32)]
    fragment_size: i32,

    #[export]
    #[init(val = WALL_HEIGHT)]
    wall_height: f32,

    #[export]
    #[init(val = ROOF_HEIGHT)]
    roof_height: f32,

    #[export]
    #[init(val = MAX_LEVEL as i32)]
    level_count: i32,

    #[export]
    #[init(val = SHADOW_FACTOR)]
    shadow_factor: f32,

    /// Hide every roof group (player is inside a building)
    #[export]
    #[init(val = false)]
    indoors: bool,

    /// Synthesize fragments on worker threads
    #[export]
    #[init(val = true)]
    use_workers: bool,

    /// Write synthesis diagnostics to tile_terrain_debug.log
    #[export]
    #[init(val = false)]
    debug_logging: bool,

    wall_definitions: WallDefinitions,
    roof_definitions: RoofDefinitions,
    synthesizer: Option<MeshSynthesizer<GodotTextureResolver>>,
    worker_pool: Option<FragmentWorkerPool>,
    fragments: HashMap<FragmentOffset, FragmentMesh>,
}

#[godot_api]
impl INode3D for PixyTileTerrain {
    fn ready(&mut self) {
        if self.debug_logging {
            init_debug_log();
        }
        self.rebuild_synthesizer();
        godot_print!(
            "PixyTileTerrain ready! Fragment size: {}, levels: {}",
            self.fragment_size,
            self.level_count
        );
    }

    fn process(&mut self, _delta: f64) {
        self.collect_worker_results();
    }

    fn exit_tree(&mut self) {
        if let Some(pool) = self.worker_pool.as_mut() {
            pool.shutdown();
        }
    }
}

#[godot_api]
impl PixyTileTerrain {
    /// Register a wall type. Only `kind == "polygon"` walls become quads;
    /// other kinds are left to scenery placement.
    #[func]
    fn add_wall_type(&mut self, name: GString, kind: GString, texture: GString) {
        self.wall_definitions.insert(
            name.to_string(),
            WallType::from_kind(&kind.to_string(), texture.to_string()),
        );
        self.rebuild_synthesizer();
    }

    #[func]
    fn add_roof_type(&mut self, name: GString, top: GString, side: GString) {
        self.roof_definitions
            .insert(name.to_string(), RoofType::new(top.to_string(), side.to_string()));
        self.rebuild_synthesizer();
    }

    /// Load a fragment from a row-major (x * (size + 1) + y) elevation array.
    #[func]
    fn load_elevations(&mut self, mx: i32, my: i32, elevations: PackedFloat32Array) {
        let size = self.fragment_size.max(1) as usize;
        let expected = (size + 1) * (size + 1);
        if elevations.len() != expected {
            godot_error!(
                "PixyTileTerrain: fragment ({}, {}) needs {} elevations, got {}",
                mx,
                my,
                expected,
                elevations.len()
            );
            return;
        }

        let mut field = HeightField::new(size);
        for (i, elevation) in elevations.as_slice().iter().enumerate() {
            field.set_elevation(i / (size + 1), i % (size + 1), *elevation);
        }
        self.load_fragment(FragmentOffset::new(mx, my), field);
    }

    /// Load a fragment from (size + 1)² tile dictionaries in x-major order.
    #[func]
    fn load_tiles(&mut self, mx: i32, my: i32, tiles: VariantArray) {
        let size = self.fragment_size.max(1) as usize;
        let expected = (size + 1) * (size + 1);
        if tiles.len() != expected {
            godot_error!(
                "PixyTileTerrain: fragment ({}, {}) needs {} tiles, got {}",
                mx,
                my,
                expected,
                tiles.len()
            );
            return;
        }

        let mut field = HeightField::new(size);
        for (i, tile) in tiles.iter_shared().enumerate() {
            let Ok(dict) = tile.try_to::<VarDictionary>() else {
                godot_warn!(
                    "PixyTileTerrain: tile {} of fragment ({}, {}) is not a Dictionary",
                    i,
                    mx,
                    my
                );
                continue;
            };
            *field.tile_mut(i / (size + 1), i % (size + 1)) = raw_tile_from_dict(&dict);
        }
        self.load_fragment(FragmentOffset::new(mx, my), field);
    }

    #[func]
    fn pending_fragments(&self) -> i32 {
        self.worker_pool
            .as_ref()
            .map_or(0, |pool| (pool.queued_count() + pool.in_flight()) as i32)
    }

    #[func]
    fn unload(&mut self, mx: i32, my: i32) {
        self.unload_fragment(FragmentOffset::new(mx, my));
    }

    #[func]
    fn clear(&mut self) {
        if let Some(pool) = self.worker_pool.as_mut() {
            pool.shutdown();
        }
        let offsets: Vec<FragmentOffset> = self.fragments.keys().copied().collect();
        for offset in offsets {
            self.remove_installed(offset);
        }
        godot_print!("PixyTileTerrain: all fragments cleared");
    }

    #[func]
    fn set_indoor(&mut self, indoors: bool) {
        self.indoors = indoors;
        for mesh in self.fragments.values_mut() {
            mesh.set_indoor(indoors);
        }
    }

    #[func]
    fn toggle_roofs(&mut self) {
        self.set_indoor(!self.indoors);
    }

    /// Ground height at node-local (x, z), or 0 outside every loaded fragment.
    #[func]
    fn height_at(&self, x: f32, z: f32) -> f32 {
        let size = self.fragment_size.max(1) as f32;
        let offset = FragmentOffset::new((x / size).floor() as i32, (z / size).floor() as i32);
        self.fragments
            .get(&offset)
            .map_or(0.0, |mesh| mesh.height_at(x, z))
    }

    #[func]
    fn fragment_count(&self) -> i32 {
        self.fragments.len() as i32
    }
}

impl PixyTileTerrain {
    fn params(&self) -> SynthesisParams {
        SynthesisParams {
            wall_height: self.wall_height,
            roof_height: self.roof_height,
            level_count: self.level_count.max(1) as usize,
            shadow_factor: self.shadow_factor,
        }
    }

    fn rebuild_synthesizer(&mut self) {
        let mut synthesizer = MeshSynthesizer::new(self.params());
        synthesizer.use_wall_definitions(Arc::new(self.wall_definitions.clone()));
        synthesizer.use_roof_definitions(Arc::new(self.roof_definitions.clone()));
        synthesizer.use_texture_resolver(GodotTextureResolver::new(self.texture_root.to_string()));
        self.synthesizer = Some(synthesizer);
    }

    /// Synthesize a fragment, on a worker when enabled, and attach it.
    /// A later load of the same offset replaces an earlier one still in flight.
    fn load_fragment(&mut self, offset: FragmentOffset, field: HeightField) {
        if self.use_workers && self.ensure_worker_pool() {
            self.request_fragment(offset, field);
            return;
        }

        if let Some(pool) = self.worker_pool.as_mut() {
            pool.cancel(offset);
        }
        let Some(synthesizer) = self.synthesizer.as_mut() else {
            godot_error!("PixyTileTerrain: load_fragment called before ready");
            return;
        };
        match synthesizer.create_mesh(&field, Some(offset)) {
            Ok(mesh) => self.install(mesh),
            Err(e) => godot_error!("PixyTileTerrain: fragment {}: {}", offset.key(), e),
        }
    }

    fn ensure_worker_pool(&mut self) -> bool {
        if self.worker_pool.is_some() {
            return true;
        }
        match FragmentWorkerPool::new(0) {
            Ok(pool) => {
                godot_print!(
                    "PixyTileTerrain: fragment workers started ({} threads)",
                    pool.thread_count()
                );
                self.worker_pool = Some(pool);
                true
            }
            Err(e) => {
                godot_warn!("PixyTileTerrain: worker pool unavailable ({e}), loading inline");
                false
            }
        }
    }

    fn request_fragment(&mut self, offset: FragmentOffset, field: HeightField) {
        let Some(synthesizer) = self.synthesizer.as_ref() else {
            godot_error!("PixyTileTerrain: request_fragment called before ready");
            return;
        };
        let (walls, roofs) = match synthesizer.definitions() {
            Ok(definitions) => definitions,
            Err(e) => {
                godot_error!("PixyTileTerrain: fragment {}: {}", offset.key(), e);
                return;
            }
        };
        let request = FragmentRequest {
            offset,
            field: Arc::new(field),
            walls,
            roofs,
            params: *synthesizer.params(),
        };

        if let Some(pool) = self.worker_pool.as_mut() {
            pool.submit(request);
            pool.dispatch();
        }
    }

    fn collect_worker_results(&mut self) {
        let Some(pool) = self.worker_pool.as_mut() else {
            return;
        };
        let results: Vec<FragmentResult> = pool.collect();

        for FragmentResult { offset, meshes } in results {
            let Some(synthesizer) = self.synthesizer.as_mut() else {
                return;
            };
            match synthesizer.assemble(meshes) {
                Ok(mesh) => self.install(mesh),
                Err(e) => godot_error!("PixyTileTerrain: fragment {}: {}", offset.key(), e),
            }
        }
    }

    fn install(&mut self, mut mesh: FragmentMesh) {
        let Some(offset) = mesh.offset() else {
            return;
        };
        self.remove_installed(offset);

        if let Some(summary) = summarize_diagnostics(&offset.key(), mesh.diagnostics()) {
            godot_warn!("PixyTileTerrain: {}", summary);
        }

        mesh.set_indoor(self.indoors);
        mesh.attach(NodeContainer::new(self.base().clone()));

        let stats = mesh
            .surface()
            .meshes
            .first()
            .map(|m| compute_normal_stats(&m.buffers.normals));
        debug_log(&format!(
            "[install] fragment {} surface {} walls {} roofs {} triangles, surface normals {:?}",
            offset.key(),
            mesh.surface().triangle_count(),
            mesh.walls().triangle_count(),
            mesh.roofs().triangle_count(),
            stats
        ));
        self.fragments.insert(offset, mesh);
    }

    /// Drop the fragment at `offset`, including any load still in flight.
    fn unload_fragment(&mut self, offset: FragmentOffset) {
        if let Some(pool) = self.worker_pool.as_mut() {
            pool.cancel(offset);
        }
        self.remove_installed(offset);
    }

    fn remove_installed(&mut self, offset: FragmentOffset) {
        if let Some(mut mesh) = self.fragments.remove(&offset) {
            if mesh.is_attached() {
                mesh.detach().release();
            }
        }
    }
}
