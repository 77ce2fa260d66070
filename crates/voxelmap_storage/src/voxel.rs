//! The voxel structs of the recognised layers, and the packed sub-voxel mean encoding.

use bytemuck::{Pod, Zeroable};
use voxelmap_core::DVec3;

/// Bits of sub-voxel precision per axis in [`VoxelMean::coord`].
pub const SUB_VOXEL_BITS: u32 = 10;

const SUB_VOXEL_MASK: u32 = (1 << SUB_VOXEL_BITS) - 1;
const SUB_VOXEL_MAX: f64 = SUB_VOXEL_MASK as f64;

/// Voxel struct of the `mean` layer: a packed sub-voxel offset and the number of samples that
/// produced it.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct VoxelMean {
    /// Sub-voxel offset from the voxel centre, 10 bits per axis. See [`pack_sub_voxel_offset`].
    pub coord: u32,
    /// Number of samples accumulated into the mean.
    pub count: u32,
}

impl VoxelMean {
    /// The mean position as an offset from the voxel centre.
    #[inline]
    pub fn offset(&self, resolution: f64) -> DVec3 {
        unpack_sub_voxel_offset(self.coord, resolution)
    }

    /// Fold one sample, given as an offset from the voxel centre, into the running mean.
    pub fn update(&self, sample_offset: DVec3, resolution: f64) -> Self {
        let mean = self.offset(resolution);
        let count = self.count;
        let updated = mean + (sample_offset - mean) / f64::from(count + 1);
        Self {
            coord: pack_sub_voxel_offset(updated, resolution),
            count: count + 1,
        }
    }
}

/// Quantise an offset from the voxel centre into 10 bits per axis. The offset is clamped to the
/// voxel's half-extent box `[-resolution/2, resolution/2]` before quantisation.
pub fn pack_sub_voxel_offset(offset: DVec3, resolution: f64) -> u32 {
    let mut packed = 0u32;
    for axis in 0..3 {
        let normalised = (offset[axis] / resolution + 0.5).clamp(0.0, 1.0);
        let quantised = (normalised * SUB_VOXEL_MAX).round() as u32 & SUB_VOXEL_MASK;
        packed |= quantised << (SUB_VOXEL_BITS * axis as u32);
    }
    packed
}

/// Invert [`pack_sub_voxel_offset`].
pub fn unpack_sub_voxel_offset(coord: u32, resolution: f64) -> DVec3 {
    let mut offset = DVec3::zeros();
    for axis in 0..3 {
        let quantised = (coord >> (SUB_VOXEL_BITS * axis as u32)) & SUB_VOXEL_MASK;
        offset[axis] = (f64::from(quantised) / SUB_VOXEL_MAX - 0.5) * resolution;
    }
    offset
}

/// Voxel struct of the `intensity` layer: running mean and covariance of sample intensities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct IntensityVoxel {
    pub mean: f32,
    pub covariance: f32,
}

impl IntensityVoxel {
    /// Fold one intensity sample in, with `count` samples already accumulated.
    pub fn update(&self, intensity: f32, count: u32) -> Self {
        if count == 0 {
            return Self {
                mean: intensity,
                covariance: 0.0,
            };
        }
        let n = count as f32;
        let mean = self.mean + (intensity - self.mean) / (n + 1.0);
        let covariance = (n * self.covariance + (intensity - self.mean) * (intensity - mean)) / (n + 1.0);
        Self { mean, covariance }
    }
}

/// Voxel struct of the `hit_miss_count` layer.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct HitMissCount {
    pub hit_count: u32,
    pub miss_count: u32,
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
