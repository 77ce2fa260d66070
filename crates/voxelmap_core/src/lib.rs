//! The core data types for addressing voxels in a sparse, region-chunked 3D grid:
//! - `VoxelKey`: a region/local coordinate pair identifying one voxel
//! - `RegionGrid`: the point ↔ key arithmetic for a given resolution and region size
//! - `UpAxis`: a signed primary axis, used by consumers that collapse the grid

pub mod aabb;
pub mod axis;
pub mod grid;
pub mod key;

pub use aabb::Aabb;
pub use axis::UpAxis;
pub use grid::RegionGrid;
pub use key::{LocalCoord, RegionCoord, VoxelKey};

pub use nalgebra;

/// World-space points and vectors are double precision throughout.
pub type DVec3 = nalgebra::Vector3<f64>;

pub mod prelude {
    pub use super::{Aabb, DVec3, RegionGrid, UpAxis, VoxelKey};
}
