//! A sparse, chunked, probabilistic 3D occupancy-grid engine with NDT voxels and heightmap
//! extraction.
//!
//! This library is organized into several crates:
//! - **core**: voxel key and region arithmetic on the chunked grid
//! - **storage**: layered voxel storage with retain/release pinning and background compression,
//!   plus the map type, map info and serialisation
//! - **mapper**: ray integration — DDA traversal, ray filters, the log-odds occupancy updater
//!   and the NDT voxel kernel
//! - **heightmap**: collapse of a 3D map into a 2D supporting-surface layer
//!
//! # Example
//!
//! ```
//! use voxelmap::prelude::*;
//!
//! let mut map = OccupancyMapBuilder::new(0.1)
//!     .region_dim([32, 32, 32])
//!     .flags(MapFlag::VOXEL_MEAN)
//!     .build()
//!     .unwrap();
//!
//! let rays = [(
//!     DVec3::new(0.0, 0.0, 0.0),
//!     DVec3::new(1.05, 0.0, 0.0),
//! )];
//! let mut mapper = OccupancyMapper::new(&mut map).unwrap();
//! let applied = mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::empty());
//! drop(mapper);
//! assert_eq!(applied, 1);
//!
//! let sample_key = map.voxel_key(DVec3::new(1.05, 0.0, 0.0));
//! assert!(map.occupancy(&sample_key) > 0.0);
//! ```

pub use voxelmap_core as core;
pub use voxelmap_heightmap as heightmap;
pub use voxelmap_mapper as mapper;
pub use voxelmap_storage as storage;

pub mod prelude {
    pub use super::core::prelude::*;
    pub use super::heightmap::prelude::*;
    pub use super::mapper::prelude::*;
    pub use super::storage::prelude::*;
}
