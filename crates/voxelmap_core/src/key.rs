#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Signed coordinates of a region within the map. Each axis indexes one region-sized block of
/// voxels.
pub type RegionCoord = [i16; 3];

/// Unsigned coordinates of a voxel within its region, in `[0, region_dim)` per axis.
pub type LocalCoord = [u8; 3];

/// Identifies a single voxel as a pair of region coordinates and local coordinates within that
/// region.
///
/// Keys are cheap to copy, hashable and ordered per axis for stepping. The arithmetic that moves
/// keys around — stepping along an axis, converting to and from world points — lives on
/// [`RegionGrid`](crate::RegionGrid), since it needs to know the region dimensions.
///
/// A distinguished [null key](Self::NULL) exists for "no voxel" results. It compares unequal to
/// every real key and must not be fed back into key arithmetic.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct VoxelKey {
    region: RegionCoord,
    local: LocalCoord,
}

impl VoxelKey {
    /// The null key. Compares unequal to all real keys.
    pub const NULL: Self = Self {
        region: [i16::MIN; 3],
        local: [u8::MAX; 3],
    };

    #[inline]
    pub fn new(region: RegionCoord, local: LocalCoord) -> Self {
        Self { region, local }
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }

    #[inline]
    pub fn region(&self) -> RegionCoord {
        self.region
    }

    #[inline]
    pub fn local(&self) -> LocalCoord {
        self.local
    }

    /// The absolute voxel coordinate on `axis`, combining region and local parts.
    #[inline]
    pub fn axis_coord(&self, axis: usize, region_dim: [u8; 3]) -> i32 {
        i32::from(self.region[axis]) * i32::from(region_dim[axis]) + i32::from(self.local[axis])
    }

    /// Overwrite the region coordinate on one axis.
    #[inline]
    pub fn set_region_axis(&mut self, axis: usize, value: i16) {
        self.region[axis] = value;
    }

    /// Overwrite the local coordinate on one axis.
    #[inline]
    pub fn set_local_axis(&mut self, axis: usize, value: u8) {
        self.local[axis] = value;
    }

    /// True when this key lies within `[min, max]` on `axis`. The bounds are inclusive and must
    /// satisfy `min <= max` on that axis.
    pub fn is_bounded_on_axis(&self, axis: usize, min: &Self, max: &Self, region_dim: [u8; 3]) -> bool {
        let c = self.axis_coord(axis, region_dim);
        c >= min.axis_coord(axis, region_dim) && c <= max.axis_coord(axis, region_dim)
    }

    /// True when this key lies within `[min, max]` on every axis.
    pub fn is_bounded(&self, min: &Self, max: &Self, region_dim: [u8; 3]) -> bool {
        (0..3).all(|axis| self.is_bounded_on_axis(axis, min, max, region_dim))
    }

    /// Clamp this key into `[min, max]` on `axis`.
    pub fn clamp_to_axis(&mut self, axis: usize, min: &Self, max: &Self) {
        let min_c = (min.region[axis], min.local[axis]);
        let max_c = (max.region[axis], max.local[axis]);
        let c = (self.region[axis], self.local[axis]);
        let clamped = if c < min_c {
            min_c
        } else if c > max_c {
            max_c
        } else {
            c
        };
        self.region[axis] = clamped.0;
        self.local[axis] = clamped.1;
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_key_is_not_a_real_key() {
        let real = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        assert!(VoxelKey::NULL.is_null());
        assert!(!real.is_null());
        assert_ne!(real, VoxelKey::NULL);
    }

    #[test]
    fn axis_coord_combines_region_and_local() {
        let dim = [8, 8, 8];
        let key = VoxelKey::new([2, -1, 0], [3, 7, 0]);
        assert_eq!(key.axis_coord(0, dim), 19);
        assert_eq!(key.axis_coord(1, dim), -1);
        assert_eq!(key.axis_coord(2, dim), 0);
    }

    #[test]
    fn clamp_to_axis() {
        let min = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        let max = VoxelKey::new([1, 1, 1], [7, 7, 7]);

        let mut key = VoxelKey::new([-2, 0, 0], [5, 0, 0]);
        key.clamp_to_axis(0, &min, &max);
        assert_eq!(key, VoxelKey::new([0, 0, 0], [0, 0, 0]));

        let mut key = VoxelKey::new([3, 0, 0], [1, 0, 0]);
        key.clamp_to_axis(0, &min, &max);
        assert_eq!(key, VoxelKey::new([1, 0, 0], [7, 0, 0]));
    }

    #[test]
    fn bounded_checks_are_inclusive() {
        let dim = [8, 8, 8];
        let min = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        let max = VoxelKey::new([0, 0, 0], [7, 7, 7]);
        assert!(min.is_bounded(&min, &max, dim));
        assert!(max.is_bounded(&min, &max, dim));
        assert!(!VoxelKey::new([1, 0, 0], [0, 0, 0]).is_bounded(&min, &max, dim));
    }
}
