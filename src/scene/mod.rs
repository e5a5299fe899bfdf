pub mod loader;
pub mod vertex;
pub mod bounds;
pub mod meshlet;
pub mod lod;
pub mod mesh;
pub mod geometry;
pub mod instance;

pub use vertex::HalaVertex;
pub use bounds::{HalaBounds, HalaBoundingSphere};
pub use meshlet::{HalaMeshlet, HalaMeshletBuilder, HalaMeshletSet};
pub use lod::{HalaLodCascadeBuilder, HALA_LOD_TARGET_ERROR, HALA_MAX_LOD_COUNT};
pub use mesh::{HalaMesh, HalaMeshLod, HalaMeshSource};
pub use geometry::{HalaGeometry, HalaPreparedMesh, HALA_MESHLET_GROUP_SIZE};
pub use instance::{HalaInstance, HalaInstanceTable, HalaScatterDesc};
