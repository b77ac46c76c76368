use std::collections::HashMap;

use godot::prelude::*;

/// Tiles per side of one map fragment.
pub const GRID_SIZE: usize = 128;
/// Height of one building level, and of every wall quad.
pub const WALL_HEIGHT: f32 = 1.6;
/// Rise applied to an elevated roof corner.
pub const ROOF_HEIGHT: f32 = 0.8;
/// Number of stacked building levels (level0..level3).
pub const MAX_LEVEL: usize = 4;
/// Channel multiplier for the shadowed color variant.
pub const SHADOW_FACTOR: f32 = 0.7;

/// How a tile's surface color interacts with its neighbors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DrawMode {
    #[default]
    Blend,
    /// Painted tile: keeps its own color across the whole cell.
    Explicit,
    /// No surface is emitted for this cell.
    None,
}

impl DrawMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "blend" => Some(DrawMode::Blend),
            "explicit" => Some(DrawMode::Explicit),
            "none" => Some(DrawMode::None),
            _ => None,
        }
    }
}

/// Which diagonal splits a cell into two triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Orientation {
    /// (0,0)-(1,1)
    DiagA,
    /// (1,0)-(0,1)
    #[default]
    DiagB,
}

impl Orientation {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "diaga" => Some(Orientation::DiagA),
            "diagb" => Some(Orientation::DiagB),
            _ => None,
        }
    }
}

/// Edge of a tile a wall segment runs along.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallPosition {
    PlusX,
    PlusY,
    DiagA,
    DiagB,
}

impl WallPosition {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "plusx" => Some(WallPosition::PlusX),
            "plusy" => Some(WallPosition::PlusY),
            "diaga" => Some(WallPosition::DiagA),
            "diagb" => Some(WallPosition::DiagB),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Channels as loosely typed script numbers, clamped to 0..=255.
    pub fn from_channels(r: f64, g: f64, b: f64) -> Self {
        let channel = |c: f64| c.round().clamp(0.0, 255.0) as u8;
        Self::new(channel(r), channel(g), channel(b))
    }

    /// Full-intensity color in 0..1 channels.
    pub fn to_color(self) -> Color {
        self.scaled(1.0)
    }

    pub fn scaled(self, factor: f32) -> Color {
        Color::from_rgba(
            factor * self.r as f32 / 255.0,
            factor * self.g as f32 / 255.0,
            factor * self.b as f32 / 255.0,
            1.0,
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WallSegment {
    /// Key into the wall type dictionary.
    pub kind: String,
    pub position: WallPosition,
}

impl WallSegment {
    pub fn new(kind: impl Into<String>, position: WallPosition) -> Self {
        Self {
            kind: kind.into(),
            position,
        }
    }
}

/// One building level's annotations on a tile.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildingRecord {
    /// Key into the roof type dictionary.
    pub roof: Option<String>,
    pub walls: Option<Vec<WallSegment>>,
}

impl BuildingRecord {
    pub fn with_roof(roof: impl Into<String>) -> Self {
        Self {
            roof: Some(roof.into()),
            walls: None,
        }
    }

    pub fn with_walls(walls: Vec<WallSegment>) -> Self {
        Self {
            roof: None,
            walls: Some(walls),
        }
    }

    /// Part of a building footprint for roof joining purposes.
    pub fn is_footprint(&self) -> bool {
        self.roof.is_some() || self.walls.is_some()
    }
}

/// Color/texture override for the second triangle of a cell.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Secondary {
    pub color: Option<Rgb>,
    pub texture: Option<String>,
}

/// A tile as delivered by the data source. Every attribute may be missing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawTile {
    pub elevation: Option<f32>,
    /// Fixed surface height (water, platforms) that bypasses interpolation.
    pub height_override: Option<f32>,
    pub draw: Option<DrawMode>,
    pub orientation: Option<Orientation>,
    pub color: Option<Rgb>,
    pub secondary: Option<Secondary>,
    pub texture: Option<String>,
    pub shadow: bool,
    pub buildings: [Option<BuildingRecord>; MAX_LEVEL],
}

impl RawTile {
    /// Store `record` under a level key ("level0".."level3"). Returns false
    /// for keys outside the known levels.
    pub fn set_building_named(&mut self, level: &str, record: BuildingRecord) -> bool {
        match level_from_name(level) {
            Some(index) => {
                self.buildings[index] = Some(record);
                true
            }
            None => false,
        }
    }
}

/// Raw elevation grid for one map fragment: (size+1)² tiles, one per vertex.
#[derive(Clone, Debug)]
pub struct HeightField {
    size: usize,
    tiles: Vec<RawTile>,
}

impl HeightField {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            tiles: vec![RawTile::default(); (size + 1) * (size + 1)],
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    fn index(&self, x: usize, y: usize) -> usize {
        debug_assert!(x <= self.size && y <= self.size);
        x * (self.size + 1) + y
    }

    pub fn tile(&self, x: usize, y: usize) -> &RawTile {
        &self.tiles[self.index(x, y)]
    }

    pub fn tile_mut(&mut self, x: usize, y: usize) -> &mut RawTile {
        let idx = self.index(x, y);
        &mut self.tiles[idx]
    }

    pub fn set_elevation(&mut self, x: usize, y: usize, elevation: f32) {
        self.tile_mut(x, y).elevation = Some(elevation);
    }

    pub fn set_building(&mut self, x: usize, y: usize, level: usize, record: BuildingRecord) {
        self.tile_mut(x, y).buildings[level] = Some(record);
    }

    /// Produce the annotated grid used by synthesis. Missing attributes are
    /// defaulted and color variants derived here, once.
    pub fn normalize(&self, shadow_factor: f32) -> TileGrid {
        let tiles = self
            .tiles
            .iter()
            .map(|raw| Tile::from_raw(raw, shadow_factor))
            .collect();
        TileGrid {
            size: self.size,
            tiles,
        }
    }
}

/// Full and shadowed variants of one color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorVariants {
    pub full: Color,
    pub shadowed: Color,
}

impl ColorVariants {
    pub fn derive(rgb: Rgb, shadow_factor: f32) -> Self {
        Self {
            full: rgb.to_color(),
            shadowed: rgb.scaled(shadow_factor),
        }
    }

    pub fn pick(&self, shadow: bool) -> Color {
        if shadow {
            self.shadowed
        } else {
            self.full
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedSecondary {
    pub colors: Option<ColorVariants>,
    pub texture: Option<String>,
}

/// A tile with all defaults applied.
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    pub elevation: f32,
    pub height_override: Option<f32>,
    pub draw: DrawMode,
    pub orientation: Orientation,
    pub color: Rgb,
    pub colors: ColorVariants,
    pub secondary: Option<NormalizedSecondary>,
    pub texture: Option<String>,
    pub shadow: bool,
    pub buildings: [Option<BuildingRecord>; MAX_LEVEL],
}

impl Tile {
    fn from_raw(raw: &RawTile, shadow_factor: f32) -> Self {
        let color = raw.color.unwrap_or(Rgb::WHITE);
        let secondary = raw.secondary.as_ref().map(|s| NormalizedSecondary {
            colors: s.color.map(|c| ColorVariants::derive(c, shadow_factor)),
            texture: s.texture.clone(),
        });

        Self {
            elevation: raw.elevation.unwrap_or(0.0),
            height_override: raw.height_override,
            draw: raw.draw.unwrap_or_default(),
            orientation: raw.orientation.unwrap_or_default(),
            color,
            colors: ColorVariants::derive(color, shadow_factor),
            secondary,
            texture: raw.texture.clone(),
            shadow: raw.shadow,
            buildings: raw.buildings.clone(),
        }
    }

    pub fn is_explicit(&self) -> bool {
        self.draw == DrawMode::Explicit
    }

    pub fn building(&self, level: usize) -> Option<&BuildingRecord> {
        self.buildings.get(level).and_then(Option::as_ref)
    }

    /// Texture for the second triangle of the cell.
    pub fn secondary_texture(&self) -> Option<&str> {
        self.secondary
            .as_ref()
            .and_then(|s| s.texture.as_deref())
            .or(self.texture.as_deref())
    }
}

/// Normalized, read-only grid consumed by every synthesizer.
#[derive(Clone, Debug)]
pub struct TileGrid {
    size: usize,
    tiles: Vec<Tile>,
}

impl TileGrid {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn tile(&self, x: usize, y: usize) -> &Tile {
        debug_assert!(x <= self.size && y <= self.size);
        &self.tiles[x * (self.size + 1) + y]
    }

    pub fn elevation(&self, x: usize, y: usize) -> f32 {
        self.tile(x, y).elevation
    }
}

/// Wall type dictionary entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WallType {
    /// Polygon walls are synthesized here; others are placed as scenery models.
    pub is_polygon: bool,
    pub texture: String,
}

impl WallType {
    pub fn polygon(texture: impl Into<String>) -> Self {
        Self {
            is_polygon: true,
            texture: texture.into(),
        }
    }

    /// Entry from its data-source kind; only "polygon" walls become quads.
    pub fn from_kind(kind: &str, texture: impl Into<String>) -> Self {
        Self {
            is_polygon: kind == "polygon",
            texture: texture.into(),
        }
    }
}

/// Roof type dictionary entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoofType {
    /// Used when all four corners of a tile are raised.
    pub top: String,
    pub side: String,
}

impl RoofType {
    pub fn new(top: impl Into<String>, side: impl Into<String>) -> Self {
        Self {
            top: top.into(),
            side: side.into(),
        }
    }
}

pub type WallDefinitions = HashMap<String, WallType>;
pub type RoofDefinitions = HashMap<String, RoofType>;

/// Level index for a data-source level key ("level0".."level3").
pub fn level_from_name(name: &str) -> Option<usize> {
    name.strip_prefix("level")
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n < MAX_LEVEL)
}
