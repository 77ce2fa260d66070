//! Layered, compressible voxel storage.
//!
//! The storage model is a sparse set of fixed-size *regions*, each owning one byte buffer per
//! *layer* of the map's [`MapLayout`]. Buffers are reference counted for pinning: while any
//! [`VoxelBuffer`] retains a block its memory is guaranteed uncompressed; released blocks become
//! candidates for the background [compression coordinator](coordinator::CompressionCoordinator),
//! which keeps uncompressed memory between two tide watermarks.
//!
//! The top-level type is [`OccupancyMap`], which combines the region store with the occupancy
//! update parameters (hit/miss log-odds values, clamping bounds, the unobserved sentinel) and a
//! [`MapInfo`] metadata bag.

pub mod block;
pub mod compression;
pub mod coordinator;
pub mod error;
pub mod info;
pub mod layer;
pub mod layout;
pub mod map;
pub mod progress;
pub mod region;
pub mod serialise;
pub mod voxel;

pub use block::{VoxelBlock, VoxelBuffer};
pub use compression::{BytesCompression, CompressionBackend};
pub use coordinator::CompressionCoordinator;
pub use error::{SerialiseError, StoreError};
pub use info::{InfoValue, MapInfo};
pub use layer::{FieldKind, LayerFlags, MapLayer, VoxelField};
pub use layout::{layer_names, MapLayout};
pub use map::{
    probability_to_value, value_to_probability, MapFlag, OccupancyMap, OccupancyMapBuilder,
    OccupancyType, UNOBSERVED_OCCUPANCY,
};
pub use progress::{NoProgress, ProgressObserver};
pub use voxel::{HitMissCount, IntensityVoxel, VoxelMean};

pub mod prelude {
    pub use super::{
        probability_to_value, value_to_probability, MapFlag, MapInfo, MapLayout, NoProgress,
        OccupancyMap, OccupancyMapBuilder, OccupancyType, ProgressObserver, StoreError,
        VoxelBuffer, UNOBSERVED_OCCUPANCY,
    };
}
