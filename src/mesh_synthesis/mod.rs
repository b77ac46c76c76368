// Terrain surface, wall and roof mesh synthesis over a normalized tile grid
mod normals;
mod roofs;
mod surface;
mod types;
mod vertex;
mod walls;

pub use normals::*;
pub use roofs::*;
pub use surface::*;
pub use types::*;
pub use vertex::*;
pub use walls::*;
