use std::collections::VecDeque;

use fnv::FnvHashMap;

use voxelmap_core::{RegionGrid, UpAxis, VoxelKey};

/// When a flood-fill column may be re-queued after it has already been visited through another
/// path.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Revisit {
    /// Never re-queue a visited column.
    None,
    /// Re-queue when the new seed sits lower along the up axis than the recorded visit.
    Lower,
    /// Re-queue when the new seed sits higher along the up axis than the recorded visit.
    #[default]
    Higher,
    /// Always re-queue.
    All,
}

/// A column's identity: its region and local coordinates on the two surface axes.
type ColumnId = (i16, i16, u8, u8);

fn column_id(key: &VoxelKey, axis_a: usize, axis_b: usize) -> ColumnId {
    let region = key.region();
    let local = key.local();
    (region[axis_a], region[axis_b], local[axis_a], local[axis_b])
}

/// Walks every 2D column of the bounded extraction extent exactly once, in row-major surface
/// order. The seed height in every column comes from the fixed plane key.
pub struct PlaneWalker<'g> {
    grid: &'g RegionGrid,
    pub min_ext_key: VoxelKey,
    pub max_ext_key: VoxelKey,
    axis_a: usize,
    axis_b: usize,
    plane_key: VoxelKey,
    steps_a: i32,
    steps_b: i32,
    index_a: i32,
    index_b: i32,
}

impl<'g> PlaneWalker<'g> {
    pub fn new(
        grid: &'g RegionGrid,
        min_ext_key: VoxelKey,
        max_ext_key: VoxelKey,
        up_axis: UpAxis,
        plane_key: &VoxelKey,
    ) -> Self {
        let range = grid.range_between(&min_ext_key, &max_ext_key);
        let axis_a = up_axis.surface_index_a();
        let axis_b = up_axis.surface_index_b();
        Self {
            grid,
            min_ext_key,
            max_ext_key,
            axis_a,
            axis_b,
            plane_key: *plane_key,
            steps_a: range[axis_a].max(0),
            steps_b: range[axis_b].max(0),
            index_a: 0,
            index_b: 0,
        }
    }

    fn key_at(&self, index_a: i32, index_b: i32) -> VoxelKey {
        // Start from the extent minimum on the surface axes, at the plane's height.
        let mut key = self.plane_key;
        let min = self.min_ext_key;
        key.set_region_axis(self.axis_a, min.region()[self.axis_a]);
        key.set_local_axis(self.axis_a, min.local()[self.axis_a]);
        key.set_region_axis(self.axis_b, min.region()[self.axis_b]);
        key.set_local_axis(self.axis_b, min.local()[self.axis_b]);
        self.grid.step_key(&mut key, self.axis_a, index_a);
        self.grid.step_key(&mut key, self.axis_b, index_b);
        key
    }

    /// Number of columns this walker will visit.
    pub fn column_count(&self) -> u64 {
        (self.steps_a as u64 + 1) * (self.steps_b as u64 + 1)
    }

    pub fn begin(&mut self) -> Option<VoxelKey> {
        self.index_a = 0;
        self.index_b = 0;
        Some(self.key_at(0, 0))
    }

    pub fn walk_next(&mut self) -> Option<VoxelKey> {
        self.index_a += 1;
        if self.index_a > self.steps_a {
            self.index_a = 0;
            self.index_b += 1;
            if self.index_b > self.steps_b {
                return None;
            }
        }
        Some(self.key_at(self.index_a, self.index_b))
    }
}

/// Walks 2D columns as a breadth-first flood fill out of a start column. Each processed column
/// seeds its eight neighbours at its own ground height, so the search adapts to the surface as it
/// spreads. A [`Revisit`] policy controls whether a column may be re-queued when reached again
/// through another path.
pub struct PlaneFillWalker<'g> {
    grid: &'g RegionGrid,
    pub min_ext_key: VoxelKey,
    pub max_ext_key: VoxelKey,
    up_axis: UpAxis,
    axis_a: usize,
    axis_b: usize,
    queue: VecDeque<VoxelKey>,
    /// Signed up-axis coordinate (increasing along "up") of the seed used when each column was
    /// last queued.
    visited: FnvHashMap<ColumnId, i32>,
}

impl<'g> PlaneFillWalker<'g> {
    pub fn new(
        grid: &'g RegionGrid,
        min_ext_key: VoxelKey,
        max_ext_key: VoxelKey,
        up_axis: UpAxis,
    ) -> Self {
        Self {
            grid,
            min_ext_key,
            max_ext_key,
            up_axis,
            axis_a: up_axis.surface_index_a(),
            axis_b: up_axis.surface_index_b(),
            queue: VecDeque::new(),
            visited: FnvHashMap::default(),
        }
    }

    fn up_coord(&self, key: &VoxelKey) -> i32 {
        let coord = key.axis_coord(self.up_axis.index(), self.grid.region_dim());
        if self.up_axis.is_positive() {
            coord
        } else {
            -coord
        }
    }

    fn in_bounds(&self, key: &VoxelKey) -> bool {
        key.is_bounded_on_axis(self.axis_a, &self.min_ext_key, &self.max_ext_key, self.grid.region_dim())
            && key.is_bounded_on_axis(
                self.axis_b,
                &self.min_ext_key,
                &self.max_ext_key,
                self.grid.region_dim(),
            )
    }

    pub fn begin(&mut self, start: VoxelKey) -> Option<VoxelKey> {
        self.queue.clear();
        self.visited.clear();
        if !self.in_bounds(&start) {
            return None;
        }
        self.visited
            .insert(column_id(&start, self.axis_a, self.axis_b), self.up_coord(&start));
        Some(start)
    }

    pub fn walk_next(&mut self) -> Option<VoxelKey> {
        self.queue.pop_front()
    }

    /// Queue the eight neighbour columns of `ground_key`, seeding each at the ground's height.
    /// Returns the number of columns queued.
    pub fn add_neighbours(&mut self, ground_key: &VoxelKey, revisit: Revisit) -> usize {
        let mut added = 0;
        for da in -1..=1 {
            for db in -1..=1 {
                if da == 0 && db == 0 {
                    continue;
                }
                let mut neighbour = *ground_key;
                self.grid.step_key(&mut neighbour, self.axis_a, da);
                self.grid.step_key(&mut neighbour, self.axis_b, db);
                if !self.in_bounds(&neighbour) {
                    continue;
                }

                let id = column_id(&neighbour, self.axis_a, self.axis_b);
                let height = self.up_coord(&neighbour);
                let requeue = match self.visited.get(&id) {
                    None => true,
                    Some(&previous) => match revisit {
                        Revisit::None => false,
                        Revisit::Lower => height < previous,
                        Revisit::Higher => height > previous,
                        Revisit::All => true,
                    },
                };
                if requeue {
                    self.visited.insert(id, height);
                    self.queue.push_back(neighbour);
                    added += 1;
                }
            }
        }
        added
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
    use voxelmap_core::DVec3;

    fn grid() -> RegionGrid {
        RegionGrid::new(DVec3::zeros(), 1.0, [8, 8, 8])
    }

    #[test]
    fn plane_walker_visits_every_column_once() {
        let grid = grid();
        let min = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        let max = VoxelKey::new([0, 0, 0], [4, 3, 7]);
        let plane = VoxelKey::new([0, 0, 0], [0, 0, 2]);

        let mut walker = PlaneWalker::new(&grid, min, max, UpAxis::Z, &plane);
        assert_eq!(walker.column_count(), 20);

        let mut seen = Vec::new();
        let mut key = walker.begin();
        while let Some(k) = key {
            // Every visited key sits at the plane height.
            assert_eq!(k.local()[2], 2);
            seen.push((k.local()[0], k.local()[1]));
            key = walker.walk_next();
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 20);
    }

    #[test]
    fn flood_fill_covers_the_extent_from_the_start_column() {
        let grid = grid();
        let min = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        let max = VoxelKey::new([0, 0, 0], [3, 3, 7]);

        let mut walker = PlaneFillWalker::new(&grid, min, max, UpAxis::Z);
        let start = VoxelKey::new([0, 0, 0], [1, 1, 0]);
        let mut visited = Vec::new();
        let mut key = walker.begin(start);
        while let Some(k) = key {
            visited.push((k.local()[0], k.local()[1]));
            walker.add_neighbours(&k, Revisit::None);
            key = walker.walk_next();
        }
        visited.sort_unstable();
        visited.dedup();
        assert_eq!(visited.len(), 16);
    }

    #[test]
    fn revisit_higher_requeues_columns_reached_from_above() {
        let grid = grid();
        let min = VoxelKey::new([0, 0, 0], [0, 0, 0]);
        let max = VoxelKey::new([0, 0, 0], [3, 3, 7]);

        let mut walker = PlaneFillWalker::new(&grid, min, max, UpAxis::Z);
        let start = VoxelKey::new([0, 0, 0], [1, 1, 0]);
        walker.begin(start);
        assert_eq!(walker.add_neighbours(&start, Revisit::None), 8);

        // A second pass from the same height adds nothing under `None` or `Higher`.
        assert_eq!(walker.add_neighbours(&start, Revisit::None), 0);
        assert_eq!(walker.add_neighbours(&start, Revisit::Higher), 0);

        // From a higher ground voxel, `Higher` requeues the same columns.
        let higher = VoxelKey::new([0, 0, 0], [1, 1, 5]);
        assert_eq!(walker.add_neighbours(&higher, Revisit::Higher), 8);
        // But `Lower` would not.
        assert_eq!(walker.add_neighbours(&higher, Revisit::Lower), 0);
    }
}
