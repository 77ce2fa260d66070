use crate::{DVec3, VoxelKey};

/// The geometry shared by every map: a spatial origin, a voxel edge length and the voxel
/// dimensions of one region.
///
/// All point ↔ key conversions go through this type so that the face policy is applied in exactly
/// one place: a point lying on a voxel face always maps to the voxel whose lower face contains it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegionGrid {
    origin: DVec3,
    resolution: f64,
    region_dim: [u8; 3],
}

impl RegionGrid {
    pub fn new(origin: DVec3, resolution: f64, region_dim: [u8; 3]) -> Self {
        debug_assert!(resolution > 0.0);
        debug_assert!(region_dim.iter().all(|&d| d > 0));
        Self {
            origin,
            resolution,
            region_dim,
        }
    }

    #[inline]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    #[inline]
    pub fn region_dim(&self) -> [u8; 3] {
        self.region_dim
    }

    /// Spatial edge lengths of one region.
    #[inline]
    pub fn region_spatial_dim(&self) -> DVec3 {
        DVec3::new(
            self.resolution * f64::from(self.region_dim[0]),
            self.resolution * f64::from(self.region_dim[1]),
            self.resolution * f64::from(self.region_dim[2]),
        )
    }

    /// Number of voxels in one region.
    #[inline]
    pub fn region_voxel_count(&self) -> usize {
        usize::from(self.region_dim[0]) * usize::from(self.region_dim[1]) * usize::from(self.region_dim[2])
    }

    /// Row-major index of `key`'s voxel within its region buffer.
    #[inline]
    pub fn local_index(&self, key: &VoxelKey) -> usize {
        let local = key.local();
        usize::from(local[0])
            + usize::from(self.region_dim[0])
                * (usize::from(local[1]) + usize::from(self.region_dim[1]) * usize::from(local[2]))
    }

    /// Inverse of [`local_index`](Self::local_index).
    #[inline]
    pub fn local_from_index(&self, index: usize) -> [u8; 3] {
        let dx = usize::from(self.region_dim[0]);
        let dy = usize::from(self.region_dim[1]);
        [(index % dx) as u8, ((index / dx) % dy) as u8, (index / (dx * dy)) as u8]
    }

    /// The key of the voxel containing `point`.
    ///
    /// Local coordinates produced by floating point rounding at a region face are carried into the
    /// neighbouring region rather than clamped, keeping the mapping consistent across faces.
    pub fn voxel_key(&self, point: DVec3) -> VoxelKey {
        let rel = point - self.origin;
        let span = self.region_spatial_dim();

        let mut region = [0i16; 3];
        let mut local = [0u8; 3];
        for axis in 0..3 {
            let dim = i32::from(self.region_dim[axis]);
            let mut r = (rel[axis] / span[axis]).floor() as i32;
            let mut l = ((rel[axis] - f64::from(r) * span[axis]) / self.resolution).floor() as i32;
            if l < 0 {
                l += dim;
                r -= 1;
            } else if l >= dim {
                l -= dim;
                r += 1;
            }
            region[axis] = r as i16;
            local[axis] = l as u8;
        }

        VoxelKey::new(region, local)
    }

    /// The centre of the voxel identified by `key`, in world coordinates.
    pub fn voxel_centre(&self, key: &VoxelKey) -> DVec3 {
        let span = self.region_spatial_dim();
        let region = key.region();
        let local = key.local();
        DVec3::new(
            self.origin[0] + f64::from(region[0]) * span[0] + (f64::from(local[0]) + 0.5) * self.resolution,
            self.origin[1] + f64::from(region[1]) * span[1] + (f64::from(local[1]) + 0.5) * self.resolution,
            self.origin[2] + f64::from(region[2]) * span[2] + (f64::from(local[2]) + 0.5) * self.resolution,
        )
    }

    /// The spatial centre of the region with the given coordinates.
    pub fn region_centre(&self, region: [i16; 3]) -> DVec3 {
        let span = self.region_spatial_dim();
        DVec3::new(
            self.origin[0] + (f64::from(region[0]) + 0.5) * span[0],
            self.origin[1] + (f64::from(region[1]) + 0.5) * span[1],
            self.origin[2] + (f64::from(region[2]) + 0.5) * span[2],
        )
    }

    /// Move `key` by `steps` voxels along `axis`, carrying local overflow into the region
    /// coordinate. The carry uses floored division so that negative local coordinates wrap
    /// positive rather than truncating toward zero.
    pub fn step_key(&self, key: &mut VoxelKey, axis: usize, steps: i32) {
        let dim = i32::from(self.region_dim[axis]);
        let coord = i32::from(key.local()[axis]) + steps;
        let region_delta = coord.div_euclid(dim);
        let local = coord.rem_euclid(dim);

        key.set_region_axis(axis, (i32::from(key.region()[axis]) + region_delta) as i16);
        key.set_local_axis(axis, local as u8);
    }

    /// `stepped_key(k, axis, n)` is `k` stepped `n` voxels along `axis`.
    #[inline]
    pub fn stepped_key(&self, key: &VoxelKey, axis: usize, steps: i32) -> VoxelKey {
        let mut stepped = *key;
        self.step_key(&mut stepped, axis, steps);
        stepped
    }

    /// Signed voxel delta from `a` to `b` on each axis.
    pub fn range_between(&self, a: &VoxelKey, b: &VoxelKey) -> [i32; 3] {
        [
            b.axis_coord(0, self.region_dim) - a.axis_coord(0, self.region_dim),
            b.axis_coord(1, self.region_dim) - a.axis_coord(1, self.region_dim),
            b.axis_coord(2, self.region_dim) - a.axis_coord(2, self.region_dim),
        ]
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

    fn test_grid() -> RegionGrid {
        RegionGrid::new(DVec3::zeros(), 0.25, [16, 16, 16])
    }

    #[test]
    fn key_round_trip_stays_within_half_resolution() {
        let grid = test_grid();
        let points = [
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.1, -2.3, 0.77),
            DVec3::new(-10.01, 4.6, -0.125),
            DVec3::new(123.4, -56.7, 89.0),
        ];
        for p in points {
            let key = grid.voxel_key(p);
            let centre = grid.voxel_centre(&key);
            for axis in 0..3 {
                assert!(
                    (centre[axis] - p[axis]).abs() <= grid.resolution() * 0.5 + 1e-12,
                    "axis {} of {:?} mapped to centre {:?}",
                    axis,
                    p,
                    centre
                );
            }
        }
    }

    #[test]
    fn face_point_maps_to_voxel_with_lower_face() {
        let grid = test_grid();
        // Exactly on the face between voxel 0 and voxel 1 along X.
        let key = grid.voxel_key(DVec3::new(0.25, 0.1, 0.1));
        assert_eq!(key.local()[0], 1);
        // And on the origin itself.
        let key = grid.voxel_key(DVec3::zeros());
        assert_eq!(key, VoxelKey::new([0, 0, 0], [0, 0, 0]));
    }

    #[test]
    fn step_key_carries_into_neighbouring_regions() {
        let grid = test_grid();
        let mut key = VoxelKey::new([0, 0, 0], [15, 0, 0]);
        grid.step_key(&mut key, 0, 1);
        assert_eq!(key, VoxelKey::new([1, 0, 0], [0, 0, 0]));

        grid.step_key(&mut key, 0, -1);
        assert_eq!(key, VoxelKey::new([0, 0, 0], [15, 0, 0]));

        // Negative remainders must wrap positive.
        let mut key = VoxelKey::new([0, 0, 0], [0, 3, 0]);
        grid.step_key(&mut key, 1, -4);
        assert_eq!(key, VoxelKey::new([0, -1, 0], [0, 15, 0]));
    }

    #[test]
    fn step_then_range_between_is_consistent() {
        let grid = test_grid();
        let key = VoxelKey::new([-1, 2, 0], [7, 11, 3]);
        for axis in 0..3 {
            for n in [-100, -17, -1, 0, 1, 5, 16, 33, 250] {
                let stepped = grid.stepped_key(&key, axis, n);
                assert_eq!(grid.range_between(&key, &stepped)[axis], n);
            }
        }
    }

    #[test]
    fn local_index_round_trip() {
        let grid = test_grid();
        let key = VoxelKey::new([0, 0, 0], [3, 14, 9]);
        let index = grid.local_index(&key);
        assert_eq!(grid.local_from_index(index), [3, 14, 9]);
    }

    #[test]
    fn voxel_centres_are_exact() {
        let grid = RegionGrid::new(DVec3::new(-1.0, 0.0, 2.0), 1.0, [8, 8, 8]);
        let centre = grid.voxel_centre(&VoxelKey::new([0, 0, -1], [3, 0, 7]));
        assert_eq!(centre, DVec3::new(2.5, 0.5, 1.5));
    }
}
