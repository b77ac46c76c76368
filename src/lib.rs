use godot::prelude::*;

mod debug_log;
mod elevation;
mod mesh_synthesis;
mod mesh_worker;
mod shared_params;
mod terrain;
mod terrain_mesh;
mod tile_data;

struct TileTerrainExtension;

#[gdextension]
unsafe impl ExtensionLibrary for TileTerrainExtension {}
