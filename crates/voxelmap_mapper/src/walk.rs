use voxelmap_core::{DVec3, RegionGrid, VoxelKey};

/// Grid traversal by Amanatides and Woo, walking the ordered sequence of voxels a segment
/// crosses.
///
/// Yields `(key, t_enter, t_exit)` triples where the `t` values are distances along the segment
/// in metres. The walk always terminates at the sample voxel (inclusive); callers that exclude
/// the sample simply stop one item early.
pub struct GridRayWalk<'a> {
    grid: &'a RegionGrid,
    key: VoxelKey,
    end_key: VoxelKey,
    step: [i32; 3],
    t_delta: [f64; 3],
    t_max: [f64; 3],
    length: f64,
    t_enter: f64,
    // Steps remaining before the walk is cut off. Guards against the accumulated floating point
    // error that could otherwise walk past the sample voxel indefinitely.
    remaining: usize,
    done: bool,
}

impl<'a> GridRayWalk<'a> {
    pub fn new(grid: &'a RegionGrid, origin: DVec3, sample: DVec3) -> Self {
        let key = grid.voxel_key(origin);
        let end_key = grid.voxel_key(sample);
        let direction = sample - origin;
        let length = direction.norm();

        let mut step = [0i32; 3];
        let mut t_delta = [f64::INFINITY; 3];
        let mut t_max = [f64::INFINITY; 3];

        if length > 0.0 {
            let direction = direction / length;
            let resolution = grid.resolution();
            let centre = grid.voxel_centre(&key);
            for axis in 0..3 {
                if direction[axis] > 0.0 {
                    step[axis] = 1;
                    let boundary = centre[axis] + 0.5 * resolution;
                    t_delta[axis] = resolution / direction[axis];
                    t_max[axis] = (boundary - origin[axis]) / direction[axis];
                } else if direction[axis] < 0.0 {
                    step[axis] = -1;
                    let boundary = centre[axis] - 0.5 * resolution;
                    t_delta[axis] = resolution / -direction[axis];
                    t_max[axis] = (boundary - origin[axis]) / direction[axis];
                }
            }
        }

        let range = grid.range_between(&key, &end_key);
        let remaining = range.iter().map(|r| r.unsigned_abs() as usize).sum::<usize>() + 1;

        Self {
            grid,
            key,
            end_key,
            step,
            t_delta,
            t_max,
            length,
            t_enter: 0.0,
            remaining,
            done: false,
        }
    }

    /// The key of the sample voxel, where the walk terminates.
    #[inline]
    pub fn end_key(&self) -> VoxelKey {
        self.end_key
    }
}

impl Iterator for GridRayWalk<'_> {
    type Item = (VoxelKey, f64, f64);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let key = self.key;
        self.remaining -= 1;
        if key == self.end_key || self.remaining == 0 {
            self.done = true;
            return Some((key, self.t_enter, self.length));
        }

        // Advance along the axis with the nearest face crossing.
        let mut axis = 0;
        if self.t_max[1] < self.t_max[axis] {
            axis = 1;
        }
        if self.t_max[2] < self.t_max[axis] {
            axis = 2;
        }

        let t_exit = self.t_max[axis].min(self.length);
        let item = (key, self.t_enter, t_exit);

        self.grid.step_key(&mut self.key, axis, self.step[axis]);
        self.t_enter = t_exit;
        self.t_max[axis] += self.t_delta[axis];

        Some(item)
    }
}

/// The ordered keys crossed by the segment from `origin` to `sample`. The sample voxel is
/// included unless `include_sample` is false.
pub fn segment_keys(
    grid: &RegionGrid,
    origin: DVec3,
    sample: DVec3,
    include_sample: bool,
) -> Vec<VoxelKey> {
    let walk = GridRayWalk::new(grid, origin, sample);
    let end_key = walk.end_key();
    let mut keys: Vec<VoxelKey> = walk.map(|(key, _, _)| key).collect();
    if !include_sample && keys.last() == Some(&end_key) {
        keys.pop();
    }
    keys
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
    use approx::assert_relative_eq;

    fn unit_grid() -> RegionGrid {
        RegionGrid::new(DVec3::zeros(), 1.0, [8, 8, 8])
    }

    fn locals(keys: &[VoxelKey]) -> Vec<[u8; 3]> {
        keys.iter().map(VoxelKey::local).collect()
    }

    #[test]
    fn walks_along_the_x_axis() {
        let grid = unit_grid();
        let keys = segment_keys(&grid, DVec3::new(0.5, 0.5, 0.5), DVec3::new(3.5, 0.5, 0.5), true);
        assert_eq!(
            locals(&keys),
            [[0, 0, 0], [1, 0, 0], [2, 0, 0], [3, 0, 0]]
        );
    }

    #[test]
    fn excluding_the_sample_drops_the_last_key() {
        let grid = unit_grid();
        let keys = segment_keys(&grid, DVec3::new(0.5, 0.5, 0.5), DVec3::new(3.5, 0.5, 0.5), false);
        assert_eq!(locals(&keys), [[0, 0, 0], [1, 0, 0], [2, 0, 0]]);
    }

    #[test]
    fn walks_mixed_signs_across_all_axes() {
        let grid = unit_grid();
        let origin = DVec3::new(0.5, 0.5, 0.5);
        let sample = DVec3::new(1.5, -1.5, 3.5);
        let keys = segment_keys(&grid, origin, sample, true);

        // The walk is gap-free: consecutive keys differ by one step on one axis.
        for pair in keys.windows(2) {
            let range = grid.range_between(&pair[0], &pair[1]);
            assert_eq!(range.iter().map(|r| r.abs()).sum::<i32>(), 1);
        }
        assert_eq!(keys.first(), Some(&grid.voxel_key(origin)));
        assert_eq!(keys.last(), Some(&grid.voxel_key(sample)));
    }

    #[test]
    fn traversal_intervals_cover_the_segment() {
        let grid = unit_grid();
        let origin = DVec3::new(0.25, 0.3, 0.4);
        let sample = DVec3::new(4.75, 1.1, 2.3);
        let length = (sample - origin).norm();

        let mut previous_exit = 0.0;
        let mut total = 0.0;
        for (_, t_enter, t_exit) in GridRayWalk::new(&grid, origin, sample) {
            assert_relative_eq!(t_enter, previous_exit, epsilon = 1e-9);
            assert!(t_exit >= t_enter);
            total += t_exit - t_enter;
            previous_exit = t_exit;
        }
        assert_relative_eq!(total, length, epsilon = 1e-9);
    }

    #[test]
    fn zero_length_rays_visit_one_voxel() {
        let grid = unit_grid();
        let p = DVec3::new(0.5, 0.5, 0.5);
        let keys = segment_keys(&grid, p, p, true);
        assert_eq!(keys, vec![grid.voxel_key(p)]);
    }

    #[test]
    fn crosses_region_boundaries() {
        let grid = unit_grid();
        let keys = segment_keys(&grid, DVec3::new(6.5, 0.5, 0.5), DVec3::new(9.5, 0.5, 0.5), true);
        assert_eq!(keys.len(), 4);
        assert_eq!(keys[1].region(), [0, 0, 0]);
        assert_eq!(keys[2].region(), [1, 0, 0]);
        assert_eq!(keys[2].local(), [0, 0, 0]);
    }
}
