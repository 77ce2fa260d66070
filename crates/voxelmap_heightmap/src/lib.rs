//! Heightmap extraction.
//!
//! A heightmap collapses a 3D occupancy map along a signed up axis into a one-voxel-deep map of
//! supporting surfaces. Each 2D column is searched for its best *supporting voxel* — an occupied
//! voxel, or a free voxel resting on unobserved space when virtual surfaces are enabled — and
//! then walked upward for the first voxel with sufficient clearance. The result is written into
//! a dedicated [`OccupancyMap`](voxelmap_storage::OccupancyMap) whose occupancy values are the
//! surface markers and whose `heightmap` layer carries height, clearance and surface normal.

pub mod build;
pub mod voxel;
pub mod walker;

pub use build::{Heightmap, HeightmapError};
pub use voxel::{
    add_heightmap_layer, HeightmapVoxel, HeightmapVoxelType, HEIGHTMAP_SURFACE_VALUE,
    HEIGHTMAP_VACANT_VALUE, HEIGHTMAP_VIRTUAL_SURFACE_VALUE,
};
pub use walker::{PlaneFillWalker, PlaneWalker, Revisit};

pub mod prelude {
    pub use super::{Heightmap, HeightmapVoxel, HeightmapVoxelType, Revisit};
}
