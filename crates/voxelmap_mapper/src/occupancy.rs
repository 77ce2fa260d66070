use bitflags::bitflags;
use nalgebra::Vector3;
use tracing::trace;

use voxelmap_core::{DVec3, RegionGrid, VoxelKey};
use voxelmap_storage::{
    HitMissCount, IntensityVoxel, OccupancyMap, StoreError, VoxelMean, UNOBSERVED_OCCUPANCY,
};

use crate::cursor::LayerCursor;
use crate::filter::{RayFilter, RayFilterFlags};
use crate::incident::update_packed_normal;
use crate::walk::GridRayWalk;

bitflags! {
    /// Per-batch integration mode flags.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RayFlags: u32 {
        /// Do not touch the voxels along the ray; only the sample voxel receives its hit.
        const EXCLUDE_RAY = 1 << 0;
        /// Do not touch the sample voxel; only the ray voxels receive misses (erosion).
        const EXCLUDE_SAMPLE = 1 << 1;
    }
}

/// A batch of rays with optional parallel intensity and timestamp arrays.
#[derive(Clone, Copy)]
pub struct RayBatch<'a> {
    rays: &'a [(DVec3, DVec3)],
    intensities: Option<&'a [f32]>,
    timestamps: Option<&'a [f64]>,
}

impl<'a> RayBatch<'a> {
    pub fn new(rays: &'a [(DVec3, DVec3)]) -> Self {
        Self {
            rays,
            intensities: None,
            timestamps: None,
        }
    }

    pub fn with_intensities(mut self, intensities: &'a [f32]) -> Self {
        debug_assert_eq!(intensities.len(), self.rays.len());
        self.intensities = Some(intensities);
        self
    }

    pub fn with_timestamps(mut self, timestamps: &'a [f64]) -> Self {
        debug_assert_eq!(timestamps.len(), self.rays.len());
        self.timestamps = Some(timestamps);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.rays.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rays.is_empty()
    }

    #[inline]
    pub fn rays(&self) -> &'a [(DVec3, DVec3)] {
        self.rays
    }

    #[inline]
    pub fn intensities(&self) -> Option<&'a [f32]> {
        self.intensities
    }

    #[inline]
    pub fn timestamps(&self) -> Option<&'a [f64]> {
        self.timestamps
    }
}

/// Occupancy update parameters copied out of the map once per batch.
#[derive(Clone, Copy)]
pub(crate) struct UpdateParams {
    pub hit_value: f32,
    pub miss_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub saturate_at_min_value: bool,
    pub saturate_at_max_value: bool,
    pub resolution: f64,
}

impl UpdateParams {
    pub fn from_map(map: &OccupancyMap) -> Self {
        Self {
            hit_value: map.hit_value(),
            miss_value: map.miss_value(),
            min_value: map.min_voxel_value(),
            max_value: map.max_voxel_value(),
            saturate_at_min_value: map.saturate_at_min_value(),
            saturate_at_max_value: map.saturate_at_max_value(),
            resolution: map.resolution(),
        }
    }
}

/// Distance along the segment at which it enters the sample voxel's box, clamped to the segment.
/// Used when the traversal walk is skipped but the sample voxel's path length is still wanted.
pub(crate) fn sample_entry_distance(
    grid: &RegionGrid,
    key: &VoxelKey,
    origin: DVec3,
    sample: DVec3,
) -> f64 {
    let length = (sample - origin).norm();
    if length == 0.0 {
        return 0.0;
    }
    let direction = (sample - origin) / length;
    let centre = grid.voxel_centre(key);
    let half = 0.5 * grid.resolution();

    let mut t_enter: f64 = 0.0;
    for axis in 0..3 {
        if direction[axis] != 0.0 {
            let t0 = (centre[axis] - half - origin[axis]) / direction[axis];
            let t1 = (centre[axis] + half - origin[axis]) / direction[axis];
            t_enter = t_enter.max(t0.min(t1));
        }
    }
    t_enter.clamp(0.0, length)
}

/// True when saturation pins `value` against any further adjustment.
fn saturated(value: f32, params: &UpdateParams) -> bool {
    (params.saturate_at_min_value && value <= params.min_value)
        || (params.saturate_at_max_value && value >= params.max_value)
}

/// The standard miss rule. Returns `None` when saturation pins the value.
pub(crate) fn apply_miss(value: f32, params: &UpdateParams) -> Option<f32> {
    if value == UNOBSERVED_OCCUPANCY {
        return Some(params.miss_value.max(params.min_value));
    }
    if saturated(value, params) {
        return None;
    }
    Some((value + params.miss_value).max(params.min_value))
}

/// The standard hit rule. Returns `None` when saturation pins the value.
pub(crate) fn apply_hit(value: f32, params: &UpdateParams) -> Option<f32> {
    if value == UNOBSERVED_OCCUPANCY {
        return Some(params.hit_value.min(params.max_value));
    }
    if saturated(value, params) {
        return None;
    }
    Some((value + params.hit_value).min(params.max_value))
}

/// Integrates ray batches into a map using the plain log-odds occupancy rules.
///
/// Within one ray, the miss updates on the intermediate voxels complete before the hit update at
/// the sample. Auxiliary layers present in the map layout — traversal, intensity, hit and miss
/// counts, touch times, incident normals — are maintained alongside.
pub struct OccupancyMapper<'m> {
    cursor: LayerCursor<'m>,
    filter: Option<Box<dyn RayFilter>>,
}

impl<'m> OccupancyMapper<'m> {
    /// Wrap `map` for integration. The map must carry an `occupancy` layer.
    pub fn new(map: &'m mut OccupancyMap) -> Result<Self, StoreError> {
        Ok(Self {
            cursor: LayerCursor::new(map)?,
            filter: None,
        })
    }

    /// Install a ray filter applied ahead of every traversal.
    pub fn set_ray_filter(&mut self, filter: Box<dyn RayFilter>) {
        self.filter = Some(filter);
    }

    pub fn clear_ray_filter(&mut self) {
        self.filter = None;
    }

    /// Integrate a batch. Returns the number of rays actually applied after filtering.
    pub fn integrate_rays(&mut self, batch: &RayBatch<'_>, flags: RayFlags) -> usize {
        let params = UpdateParams::from_map(self.cursor.map());
        let grid = *self.cursor.map().grid();
        let mut applied = 0;

        for (ray_index, &(ray_origin, ray_sample)) in batch.rays.iter().enumerate() {
            let mut origin = ray_origin;
            let mut sample = ray_sample;
            let mut filter_flags = RayFilterFlags::empty();
            if let Some(filter) = &self.filter {
                filter_flags = filter.filter(&mut origin, &mut sample);
            }
            if filter_flags.contains(RayFilterFlags::REJECT_RAY) {
                continue;
            }
            applied += 1;

            let stamp = self.cursor.touch_map();
            let timestamp = batch.timestamps.map(|times| times[ray_index]);
            let touch = timestamp.map(|time| self.cursor.encode_touch_time(time));
            let intensity = batch.intensities.map(|values| values[ray_index]);
            let sample_rejected =
                filter_flags.intersects(RayFilterFlags::REJECT_SAMPLE | RayFilterFlags::CLIPPED_END);

            let sample_key = grid.voxel_key(sample);
            let mut sample_interval = (
                sample_entry_distance(&grid, &sample_key, origin, sample),
                (sample - origin).norm(),
            );

            if !flags.contains(RayFlags::EXCLUDE_RAY) {
                for (key, t_enter, t_exit) in GridRayWalk::new(&grid, origin, sample) {
                    if key == sample_key {
                        sample_interval = (t_enter, t_exit);
                        if !flags.contains(RayFlags::EXCLUDE_SAMPLE) && sample_rejected {
                            // The filter dropped the surface return; the sample voxel only sees
                            // the miss path.
                            self.miss_voxel(&key, t_exit - t_enter, touch, timestamp, stamp, &params);
                        }
                        break;
                    }
                    self.miss_voxel(&key, t_exit - t_enter, touch, timestamp, stamp, &params);
                }
            }

            if !flags.contains(RayFlags::EXCLUDE_SAMPLE) && !sample_rejected {
                self.hit_voxel(
                    &grid,
                    &sample_key,
                    origin,
                    sample,
                    sample_interval,
                    intensity,
                    touch,
                    timestamp,
                    stamp,
                    &params,
                );
            }
        }

        self.cursor.flush();
        self.cursor.map().notify_compression();
        trace!(applied, batch = batch.len(), "integrated occupancy rays");
        applied
    }

    fn miss_voxel(
        &mut self,
        key: &VoxelKey,
        length: f64,
        touch: Option<u32>,
        timestamp: Option<f64>,
        stamp: u64,
        params: &UpdateParams,
    ) {
        let index = self.cursor.seek(key);
        let layers = *self.cursor.layers();

        let value = self.cursor.occupancy().read::<f32>(index);
        if let Some(updated) = apply_miss(value, params) {
            self.cursor.occupancy().write(index, updated);
            self.cursor.note_write(layers.occupancy, index, stamp);
        }

        update_traversal(&mut self.cursor, index, length, stamp);
        bump_hit_miss(&mut self.cursor, index, false, stamp);
        update_touch_time(&mut self.cursor, index, touch, stamp);
        if let Some(time) = timestamp {
            self.cursor.note_time(time);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn hit_voxel(
        &mut self,
        grid: &RegionGrid,
        key: &VoxelKey,
        origin: DVec3,
        sample: DVec3,
        sample_interval: (f64, f64),
        intensity: Option<f32>,
        touch: Option<u32>,
        timestamp: Option<f64>,
        stamp: u64,
        params: &UpdateParams,
    ) {
        let index = self.cursor.seek(key);
        let layers = *self.cursor.layers();

        let value = self.cursor.occupancy().read::<f32>(index);
        if let Some(updated) = apply_hit(value, params) {
            self.cursor.occupancy().write(index, updated);
            self.cursor.note_write(layers.occupancy, index, stamp);
        }

        // The sample count ahead of this hit feeds the intensity and incident updates.
        let mut prior_count = 0;
        if let Some(layer) = layers.mean {
            if let Some(buffer) = self.cursor.mean() {
                let mean: VoxelMean = buffer.read(index);
                prior_count = mean.count;
                let offset = sample - grid.voxel_centre(key);
                buffer.write(index, mean.update(offset, params.resolution));
            }
            self.cursor.note_write(layer, index, stamp);
        }

        if let Some(layer) = layers.intensity {
            if let (Some(buffer), Some(intensity)) = (self.cursor.intensity(), intensity) {
                let voxel: IntensityVoxel = buffer.read(index);
                buffer.write(index, voxel.update(intensity, prior_count));
            }
            if intensity.is_some() {
                self.cursor.note_write(layer, index, stamp);
            }
        }

        if let Some(layer) = layers.incident {
            if let Some(buffer) = self.cursor.incident() {
                let packed: u32 = buffer.read(index);
                let incident: Vector3<f32> = (origin - sample).cast();
                buffer.write(index, update_packed_normal(packed, incident, prior_count));
            }
            self.cursor.note_write(layer, index, stamp);
        }

        bump_hit_miss(&mut self.cursor, index, true, stamp);
        update_traversal(&mut self.cursor, index, sample_interval.1 - sample_interval.0, stamp);
        update_touch_time(&mut self.cursor, index, touch, stamp);
        if let Some(time) = timestamp {
            self.cursor.note_time(time);
        }
    }
}

/// Accumulate the in-voxel segment length when the `traversal` layer is present.
pub(crate) fn update_traversal(cursor: &mut LayerCursor<'_>, index: usize, length: f64, stamp: u64) {
    if let Some(layer) = cursor.layers().traversal {
        if let Some(buffer) = cursor.traversal() {
            let accumulated: f32 = buffer.read(index);
            buffer.write(index, accumulated + length as f32);
        }
        cursor.note_write(layer, index, stamp);
    }
}

/// Stamp the voxel's touch time when the layer is present and the batch carried timestamps.
pub(crate) fn update_touch_time(cursor: &mut LayerCursor<'_>, index: usize, touch: Option<u32>, stamp: u64) {
    if let Some(layer) = cursor.layers().touch_time {
        if let Some(touch) = touch {
            if let Some(buffer) = cursor.touch_time() {
                buffer.write(index, touch);
            }
            cursor.note_write(layer, index, stamp);
        }
    }
}

/// Count a hit or a miss when the `hit_miss_count` layer is present.
pub(crate) fn bump_hit_miss(cursor: &mut LayerCursor<'_>, index: usize, hit: bool, stamp: u64) {
    if let Some(layer) = cursor.layers().hit_miss_count {
        if let Some(buffer) = cursor.hit_miss_count() {
            let mut counts: HitMissCount = buffer.read(index);
            if hit {
                counts.hit_count += 1;
            } else {
                counts.miss_count += 1;
            }
            buffer.write(index, counts);
        }
        cursor.note_write(layer, index, stamp);
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
    use approx::assert_relative_eq;
    use voxelmap_storage::{MapFlag, OccupancyMapBuilder};

    /// The map of scenario S1: unit resolution, 8³ regions, origin zero, hit 0.85, miss -0.4.
    fn s1_map(flags: MapFlag) -> OccupancyMap {
        let mut map = OccupancyMapBuilder::new(1.0)
            .region_dim([8, 8, 8])
            .flags(flags)
            .build()
            .unwrap();
        map.set_hit_value(0.85);
        map.set_miss_value(-0.4);
        map
    }

    fn key_at(map: &OccupancyMap, x: f64) -> VoxelKey {
        map.voxel_key(DVec3::new(x + 0.5, 0.5, 0.5))
    }

    #[test]
    fn a_single_ray_misses_then_hits() {
        let mut map = s1_map(MapFlag::empty());
        let rays = [(DVec3::new(0.0, 0.0, 0.0), DVec3::new(3.5, 0.0, 0.0))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        let applied = mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::empty());
        drop(mapper);
        assert_eq!(applied, 1);

        // The ray from (0,0,0) walks voxels x = 0..2 as misses and hits x = 3.
        let k0 = map.voxel_key(DVec3::new(0.0, 0.0, 0.0));
        assert_relative_eq!(map.occupancy(&k0), -0.4, epsilon = 1e-6);
        for x in 1..3 {
            let key = map.voxel_key(DVec3::new(x as f64 + 0.5, 0.0, 0.0));
            assert_relative_eq!(map.occupancy(&key), -0.4, epsilon = 1e-6);
        }
        let sample_key = map.voxel_key(DVec3::new(3.5, 0.0, 0.0));
        assert_relative_eq!(map.occupancy(&sample_key), 0.85, epsilon = 1e-6);
    }

    #[test]
    fn samples_only_touches_just_the_sample_voxel() {
        let mut map = s1_map(MapFlag::empty());
        let rays = [(DVec3::new(0.0, 0.0, 0.0), DVec3::new(3.5, 0.0, 0.0))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::EXCLUDE_RAY);
        drop(mapper);

        for x in 0..3 {
            let key = map.voxel_key(DVec3::new(x as f64 + 0.5, 0.0, 0.0));
            assert_eq!(map.occupancy(&key), UNOBSERVED_OCCUPANCY);
        }
        let sample_key = map.voxel_key(DVec3::new(3.5, 0.0, 0.0));
        assert_relative_eq!(map.occupancy(&sample_key), 0.85, epsilon = 1e-6);
    }

    #[test]
    fn erode_leaves_the_sample_voxel_alone() {
        let mut map = s1_map(MapFlag::empty());
        let rays = [(DVec3::new(0.0, 0.0, 0.0), DVec3::new(3.5, 0.0, 0.0))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::EXCLUDE_SAMPLE);
        drop(mapper);

        let sample_key = map.voxel_key(DVec3::new(3.5, 0.0, 0.0));
        assert_eq!(map.occupancy(&sample_key), UNOBSERVED_OCCUPANCY);
        let key = map.voxel_key(DVec3::new(1.5, 0.0, 0.0));
        assert_relative_eq!(map.occupancy(&key), -0.4, epsilon = 1e-6);
    }

    #[test]
    fn misses_accumulate_from_the_sentinel_then_a_hit_adds() {
        let mut map = s1_map(MapFlag::empty());
        // Three erode passes put three misses on the voxel at x = 1; then hit it directly.
        let miss_rays = [(DVec3::new(0.5, 0.5, 0.5), DVec3::new(2.5, 0.5, 0.5))];
        let hit_rays = [(DVec3::new(0.5, 0.5, 0.5), DVec3::new(1.5, 0.5, 0.5))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        for _ in 0..3 {
            mapper.integrate_rays(&RayBatch::new(&miss_rays), RayFlags::EXCLUDE_SAMPLE);
        }
        mapper.integrate_rays(&RayBatch::new(&hit_rays), RayFlags::EXCLUDE_RAY);
        drop(mapper);

        // First miss replaces the sentinel; each further update adds.
        let key = key_at(&map, 1.0);
        assert_relative_eq!(map.occupancy(&key), 3.0 * -0.4 + 0.85, epsilon = 1e-6);
    }

    #[test]
    fn values_clamp_and_saturation_pins() {
        let mut map = s1_map(MapFlag::empty());
        map.set_voxel_value_range(-1.0, 1.0);

        let rays = [(DVec3::new(0.5, 0.5, 0.5), DVec3::new(2.5, 0.5, 0.5))];
        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        for _ in 0..5 {
            mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::EXCLUDE_SAMPLE);
        }
        drop(mapper);

        let key = key_at(&map, 1.0);
        assert_relative_eq!(map.occupancy(&key), -1.0, epsilon = 1e-6);

        // With min saturation enabled, a later hit cannot lift the pinned voxel.
        let mut map = s1_map(MapFlag::empty());
        map.set_voxel_value_range(-1.0, 1.0);
        map.set_saturate_at_min_value(true);
        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        for _ in 0..5 {
            mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::EXCLUDE_SAMPLE);
        }
        let hit_rays = [(DVec3::new(0.5, 0.5, 0.5), DVec3::new(1.5, 0.5, 0.5))];
        mapper.integrate_rays(&RayBatch::new(&hit_rays), RayFlags::EXCLUDE_RAY);
        drop(mapper);
        assert_relative_eq!(map.occupancy(&key), -1.0, epsilon = 1e-6);
    }

    #[test]
    fn rejected_rays_do_not_count_as_applied() {
        let mut map = s1_map(MapFlag::empty());
        let rays = [
            (DVec3::new(0.0, 0.0, 0.0), DVec3::new(3.5, 0.0, 0.0)),
            (DVec3::new(f64::NAN, 0.0, 0.0), DVec3::new(1.0, 0.0, 0.0)),
        ];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.set_ray_filter(Box::new(crate::filter::RangeFilter::default()));
        let applied = mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::empty());
        assert_eq!(applied, 1);
    }

    #[test]
    fn sample_rejection_downgrades_the_hit_to_a_miss() {
        let mut map = s1_map(MapFlag::empty());
        let rays = [(DVec3::new(0.0, 0.0, 0.0), DVec3::new(10.0, 0.0, 0.0))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.set_ray_filter(Box::new(crate::filter::RangeFilter {
            min_range: 0.0,
            max_range: 3.5,
        }));
        let applied = mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::empty());
        drop(mapper);
        assert_eq!(applied, 1);

        // The clipped end lands in voxel x = 3, which receives a miss rather than a hit.
        let key = key_at(&map, 3.0);
        assert_relative_eq!(map.occupancy(&key), -0.4, epsilon = 1e-6);
    }

    #[test]
    fn traversal_accumulates_segment_lengths() {
        let mut map = s1_map(MapFlag::TRAVERSAL);
        let rays = [(DVec3::new(0.5, 0.5, 0.5), DVec3::new(3.5, 0.5, 0.5))];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.integrate_rays(&RayBatch::new(&rays), RayFlags::empty());
        drop(mapper);

        let traversal_layer = map.layout().traversal_layer().unwrap();
        let key = key_at(&map, 1.0);
        let region = map.region(key.region()).unwrap();
        let length: f32 = region
            .buffer(traversal_layer)
            .unwrap()
            .read(map.grid().local_index(&key));
        // The ray crosses the full metre of voxel x = 1.
        assert_relative_eq!(length, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn aux_layers_update_at_the_sample() {
        let mut map = s1_map(MapFlag::VOXEL_MEAN | MapFlag::TOUCH_TIME | MapFlag::INCIDENT_NORMAL);
        let rays = [(DVec3::new(0.0, 0.0, 0.0), DVec3::new(3.25, 0.25, 0.25))];
        let timestamps = [2.0];

        let mut mapper = OccupancyMapper::new(&mut map).unwrap();
        mapper.integrate_rays(
            &RayBatch::new(&rays).with_timestamps(&timestamps),
            RayFlags::empty(),
        );
        drop(mapper);

        let sample_key = map.voxel_key(DVec3::new(3.25, 0.25, 0.25));
        let index = map.grid().local_index(&sample_key);
        let region = map.region(sample_key.region()).unwrap();

        let mean_layer = map.layout().mean_layer().unwrap();
        let mean: VoxelMean = region.buffer(mean_layer).unwrap().read(index);
        assert_eq!(mean.count, 1);
        let position = map.voxel_position(&sample_key);
        assert!((position - DVec3::new(3.25, 0.25, 0.25)).norm() < 0.01);

        let incident_layer = map.layout().incident_layer().unwrap();
        let packed: u32 = region.buffer(incident_layer).unwrap().read(index);
        let normal = crate::incident::decode_normal(packed);
        // The incident direction points from the sample back toward the origin.
        assert!(normal.x < -0.9);
    }
}
