//! The persisted map format.
//!
//! The stream is binary, little-endian and versioned:
//!
//! ```text
//! magic                  b"VXMP"
//! version                u32 major, u32 minor, u32 patch
//! resolution             f64
//! region_dim             u8 × 3
//! origin                 f64 × 3
//! hit/miss/threshold     f32 × 3 (log-odds values)
//! min/max voxel value    f32 × 2
//! saturation             u8 (bit 0 = min, bit 1 = max)
//! map flags              u32
//! stamp                  u64
//! region count           u64
//! map layout             layer count + per-layer descriptors
//! map info               entry count + typed entries
//! regions                coord i32 × 3, centre f64 × 3, touched_time f64,
//!                        per-layer touch stamps u64, then each serialised
//!                        layer's raw voxel bytes
//! ```
//!
//! Version 0 streams predate the layout and info blocks: they carry an interleaved
//! occupancy/clearance float pair per voxel, which the loader de-interleaves into the two layers.

mod read;
mod stream;
mod v0;
mod write;

pub use read::{load, load_from};
pub use write::{save, save_to};

/// Magic bytes opening every map stream.
pub const MAGIC: [u8; 4] = *b"VXMP";

/// The format version written by this build.
pub const CURRENT_VERSION: MapVersion = MapVersion {
    major: 0,
    minor: 3,
    patch: 0,
};

/// A `{major, minor, patch}` format version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MapVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl MapVersion {
    /// True when a stream of this version can be read by this build.
    pub fn supported(&self) -> bool {
        self.major == 0 && self.minor <= CURRENT_VERSION.minor
    }

    /// True for legacy streams carrying the interleaved occupancy/clearance block.
    pub fn is_legacy_interleaved(&self) -> bool {
        self.major == 0 && self.minor == 0
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
