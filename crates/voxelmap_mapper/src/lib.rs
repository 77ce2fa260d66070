//! Ray integration for occupancy maps.
//!
//! A *ray* is an `(origin, sample)` segment in world coordinates, optionally carrying an
//! intensity and a timestamp. [`walk::GridRayWalk`] converts a segment into the ordered voxel
//! keys it crosses; [`OccupancyMapper`] applies the log-odds hit/miss rules along that walk and
//! [`NdtMapper`] replaces them with the normal-distributions-transform update, maintaining the
//! per-voxel covariance square root in [`CovarianceVoxel`].

pub mod covariance;
mod cursor;
pub mod filter;
pub mod incident;
pub mod ndt;
pub mod occupancy;
pub mod walk;

pub use covariance::CovarianceVoxel;
pub use filter::{RangeFilter, RayFilter, RayFilterFlags};
pub use ndt::{NdtMapper, NdtMode, NdtParams};
pub use occupancy::{OccupancyMapper, RayBatch, RayFlags};
pub use walk::{segment_keys, GridRayWalk};

pub mod prelude {
    pub use super::{
        segment_keys, CovarianceVoxel, NdtMapper, NdtMode, NdtParams, OccupancyMapper, RayBatch,
        RayFilter, RayFlags,
    };
}
