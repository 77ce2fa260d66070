use nalgebra::Vector3;
use tracing::trace;

use voxelmap_core::{DVec3, RegionGrid, VoxelKey};
use voxelmap_storage::{
    probability_to_value, IntensityVoxel, OccupancyMap, StoreError, VoxelMean,
    UNOBSERVED_OCCUPANCY,
};

use crate::covariance::{hit_with_covariance, miss_ndt, CovarianceVoxel};
use crate::cursor::LayerCursor;
use crate::filter::{RayFilter, RayFilterFlags};
use crate::incident::update_packed_normal;
use crate::occupancy::{
    bump_hit_miss, sample_entry_distance, update_touch_time, update_traversal, RayBatch, RayFlags,
    UpdateParams,
};
use crate::walk::GridRayWalk;

/// Which NDT behaviour a map carries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NdtMode {
    /// NDT disabled. Use the plain [`OccupancyMapper`](crate::OccupancyMapper) instead.
    None,
    /// Occupancy mapping with per-voxel Gaussians (NDT-OM).
    #[default]
    Occupancy,
    /// NDT-OM plus the intensity and hit/miss count layers used for traversability analysis.
    Traversability,
}

/// Tuning for the NDT update rules.
#[derive(Clone, Copy, Debug)]
pub struct NdtParams {
    pub mode: NdtMode,
    /// Sensor range noise, metres. Seeds fresh covariances and shapes the miss probability.
    pub sensor_noise: f32,
    /// Samples required in a voxel before its Gaussian is trusted on the miss path.
    pub sample_threshold: u32,
    /// Occupancy probability below which an established voxel's covariance is considered stale.
    pub reinitialise_probability: f32,
    /// Samples required before the stale-covariance reset may trigger.
    pub reinitialise_sample_count: u32,
}

impl Default for NdtParams {
    fn default() -> Self {
        Self {
            mode: NdtMode::Occupancy,
            sensor_noise: 0.05,
            sample_threshold: 4,
            reinitialise_probability: 0.3,
            reinitialise_sample_count: 10,
        }
    }
}

/// Integrates ray batches using the NDT voxel kernel.
///
/// Sample voxels receive the square-root covariance hit update followed by the mean, intensity,
/// incident and count updates; pass-through voxels receive the NDT-OM miss adjustment. The map
/// must carry `mean` and `covariance` layers; they are installed automatically when the map is
/// still empty.
pub struct NdtMapper<'m> {
    cursor: LayerCursor<'m>,
    params: NdtParams,
    reinitialise_threshold_value: f32,
    filter: Option<Box<dyn RayFilter>>,
}

impl<'m> NdtMapper<'m> {
    pub fn new(map: &'m mut OccupancyMap, params: NdtParams) -> Result<Self, StoreError> {
        if params.mode == NdtMode::None {
            return Err(StoreError::InvalidArgument("NDT mapper requires an NDT mode"));
        }
        if !(params.sensor_noise > 0.0) {
            return Err(StoreError::InvalidArgument("sensor noise must be positive"));
        }

        if map.region_count() == 0 {
            let layout = map.layout_mut();
            if layout.mean_layer().is_none() {
                layout.add_mean();
            }
            if layout.covariance_layer().is_none() {
                layout.add_covariance();
            }
            if params.mode == NdtMode::Traversability {
                if layout.intensity_layer().is_none() {
                    layout.add_intensity();
                }
                if layout.hit_miss_count_layer().is_none() {
                    layout.add_hit_miss_count();
                }
            }
        } else {
            let layout = map.layout();
            if layout.mean_layer().is_none() {
                return Err(StoreError::LayerMissing("mean".to_owned()));
            }
            if layout.covariance_layer().is_none() {
                return Err(StoreError::LayerMissing("covariance".to_owned()));
            }
        }

        let reinitialise_threshold_value = probability_to_value(params.reinitialise_probability);
        Ok(Self {
            cursor: LayerCursor::new(map)?,
            params,
            reinitialise_threshold_value,
            filter: None,
        })
    }

    pub fn set_ray_filter(&mut self, filter: Box<dyn RayFilter>) {
        self.filter = Some(filter);
    }

    /// Integrate a batch. Returns the number of rays actually applied after filtering.
    pub fn integrate_rays(&mut self, batch: &RayBatch<'_>, flags: RayFlags) -> usize {
        let params = UpdateParams::from_map(self.cursor.map());
        let grid = *self.cursor.map().grid();
        let mut applied = 0;

        for (ray_index, &(ray_origin, ray_sample)) in batch.rays().iter().enumerate() {
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
            let timestamp = batch.timestamps().map(|times| times[ray_index]);
            let touch = timestamp.map(|time| self.cursor.encode_touch_time(time));
            let intensity = batch.intensities().map(|values| values[ray_index]);
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
                            self.miss_voxel(
                                &grid, &key, origin, sample, t_exit - t_enter, touch, timestamp,
                                stamp, &params,
                            );
                        }
                        break;
                    }
                    self.miss_voxel(
                        &grid, &key, origin, sample, t_exit - t_enter, touch, timestamp, stamp,
                        &params,
                    );
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
        trace!(applied, batch = batch.len(), "integrated NDT rays");
        applied
    }

    #[allow(clippy::too_many_arguments)]
    fn miss_voxel(
        &mut self,
        grid: &RegionGrid,
        key: &VoxelKey,
        origin: DVec3,
        sample: DVec3,
        length: f64,
        touch: Option<u32>,
        timestamp: Option<f64>,
        stamp: u64,
        params: &UpdateParams,
    ) {
        let index = self.cursor.seek(key);
        let layers = *self.cursor.layers();

        let mut value = self.cursor.occupancy().read::<f32>(index);
        let pinned = value != UNOBSERVED_OCCUPANCY
            && ((params.saturate_at_min_value && value <= params.min_value)
                || (params.saturate_at_max_value && value >= params.max_value));
        if !pinned {
            let mean: VoxelMean = self.cursor.mean().expect("mean layer").read(index);
            let cov: CovarianceVoxel = self.cursor.covariance().expect("covariance layer").read(index);
            let mean_position = grid.voxel_centre(key) + mean.offset(params.resolution);

            miss_ndt(
                &cov,
                &mut value,
                origin,
                sample,
                mean_position,
                mean.count,
                UNOBSERVED_OCCUPANCY,
                params.miss_value,
                self.params.sensor_noise,
                self.params.sample_threshold,
            );
            value = value.clamp(params.min_value, params.max_value);
            self.cursor.occupancy().write(index, value);
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

        let mut value = self.cursor.occupancy().read::<f32>(index);
        let pinned = value != UNOBSERVED_OCCUPANCY
            && ((params.saturate_at_min_value && value <= params.min_value)
                || (params.saturate_at_max_value && value >= params.max_value));

        let mean: VoxelMean = self.cursor.mean().expect("mean layer").read(index);
        let centre = grid.voxel_centre(key);
        let mut prior_count = mean.count;
        let mut base_mean = mean;

        if !pinned {
            let mut cov: CovarianceVoxel =
                self.cursor.covariance().expect("covariance layer").read(index);
            let mean_position = centre + mean.offset(params.resolution);
            let reinitialised = hit_with_covariance(
                &mut cov,
                &mut value,
                sample,
                mean_position,
                mean.count,
                params.hit_value,
                UNOBSERVED_OCCUPANCY,
                self.params.sensor_noise,
                self.reinitialise_threshold_value,
                self.params.reinitialise_sample_count,
            );
            value = value.clamp(params.min_value, params.max_value);
            self.cursor.covariance().expect("covariance layer").write(index, cov);
            self.cursor.occupancy().write(index, value);
            self.cursor.note_write(layers.occupancy, index, stamp);
            if let Some(layer) = layers.covariance {
                self.cursor.note_write(layer, index, stamp);
            }

            if reinitialised {
                // The old distribution no longer applies; restart the accumulation from this
                // sample.
                prior_count = 0;
                base_mean = VoxelMean::default();
            }
        }

        if let Some(layer) = layers.mean {
            if let Some(buffer) = self.cursor.mean() {
                buffer.write(index, base_mean.update(sample - centre, params.resolution));
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

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
