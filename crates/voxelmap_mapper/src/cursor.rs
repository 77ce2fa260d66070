//! A write cursor over the recognised layers of one map.
//!
//! Ray integration touches long runs of voxels in the same region. The cursor retains the
//! region's layer buffers once per region change instead of once per voxel, and batches the
//! region bookkeeping (first-valid index, dirty and layer stamps, touched time) into a single
//! flush when the walk leaves the region.

use voxelmap_core::{key::RegionCoord, VoxelKey};
use voxelmap_storage::{OccupancyMap, StoreError, VoxelBuffer};

#[derive(Clone, Copy)]
pub(crate) struct LayerIndices {
    pub occupancy: usize,
    pub mean: Option<usize>,
    pub covariance: Option<usize>,
    pub traversal: Option<usize>,
    pub intensity: Option<usize>,
    pub hit_miss_count: Option<usize>,
    pub touch_time: Option<usize>,
    pub incident: Option<usize>,
}

impl LayerIndices {
    pub fn resolve(map: &OccupancyMap) -> Result<Self, StoreError> {
        let layout = map.layout();
        let occupancy = layout
            .occupancy_layer()
            .ok_or_else(|| StoreError::LayerMissing("occupancy".to_owned()))?;
        Ok(Self {
            occupancy,
            mean: layout.mean_layer(),
            covariance: layout.covariance_layer(),
            traversal: layout.traversal_layer(),
            intensity: layout.intensity_layer(),
            hit_miss_count: layout.hit_miss_count_layer(),
            touch_time: layout.touch_time_layer(),
            incident: layout.incident_layer(),
        })
    }
}

#[derive(Default)]
struct PendingNotes {
    written_layers: u32,
    min_index: u32,
    stamp: u64,
    time: Option<f64>,
}

impl PendingNotes {
    fn is_empty(&self) -> bool {
        self.written_layers == 0 && self.time.is_none()
    }
}

#[derive(Default)]
struct Buffers {
    occupancy: Option<VoxelBuffer>,
    mean: Option<VoxelBuffer>,
    covariance: Option<VoxelBuffer>,
    traversal: Option<VoxelBuffer>,
    intensity: Option<VoxelBuffer>,
    hit_miss_count: Option<VoxelBuffer>,
    touch_time: Option<VoxelBuffer>,
    incident: Option<VoxelBuffer>,
}

pub(crate) struct LayerCursor<'m> {
    map: &'m mut OccupancyMap,
    layers: LayerIndices,
    region_coord: Option<RegionCoord>,
    buffers: Buffers,
    pending: PendingNotes,
}

impl<'m> LayerCursor<'m> {
    pub fn new(map: &'m mut OccupancyMap) -> Result<Self, StoreError> {
        let layers = LayerIndices::resolve(map)?;
        Ok(Self {
            map,
            layers,
            region_coord: None,
            buffers: Buffers::default(),
            pending: PendingNotes::default(),
        })
    }

    #[inline]
    pub fn map(&self) -> &OccupancyMap {
        self.map
    }

    #[inline]
    pub fn layers(&self) -> &LayerIndices {
        &self.layers
    }

    /// Advance the map's mutation stamp.
    pub fn touch_map(&mut self) -> u64 {
        self.map.touch()
    }

    pub fn encode_touch_time(&mut self, timestamp: f64) -> u32 {
        self.map.encode_touch_time(timestamp)
    }

    /// Focus the cursor on `key`'s region and return the voxel's local index. Retains buffers on
    /// region change only.
    pub fn seek(&mut self, key: &VoxelKey) -> usize {
        if self.region_coord != Some(key.region()) {
            self.flush();
            let layers = self.layers;
            let region = self.map.get_or_create_region(key.region());
            self.buffers.occupancy = region.buffer(layers.occupancy);
            self.buffers.mean = layers.mean.and_then(|l| region.buffer(l));
            self.buffers.covariance = layers.covariance.and_then(|l| region.buffer(l));
            self.buffers.traversal = layers.traversal.and_then(|l| region.buffer(l));
            self.buffers.intensity = layers.intensity.and_then(|l| region.buffer(l));
            self.buffers.hit_miss_count = layers.hit_miss_count.and_then(|l| region.buffer(l));
            self.buffers.touch_time = layers.touch_time.and_then(|l| region.buffer(l));
            self.buffers.incident = layers.incident.and_then(|l| region.buffer(l));
            self.region_coord = Some(key.region());
        }
        self.map.grid().local_index(key)
    }

    /// Record a write through `layer` at `local_index`, applied to the region on flush.
    pub fn note_write(&mut self, layer: usize, local_index: usize, stamp: u64) {
        if self.pending.written_layers == 0 {
            self.pending.min_index = local_index as u32;
        } else {
            self.pending.min_index = self.pending.min_index.min(local_index as u32);
        }
        self.pending.written_layers |= 1 << layer;
        self.pending.stamp = self.pending.stamp.max(stamp);
    }

    /// Record the sample time for the region's touched time.
    pub fn note_time(&mut self, timestamp: f64) {
        self.pending.time = Some(self.pending.time.map_or(timestamp, |t: f64| t.max(timestamp)));
    }

    /// Apply the pending bookkeeping to the focused region.
    pub fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(coord) = self.region_coord {
            if let Some(region) = self.map.region_mut(coord) {
                let mut written = self.pending.written_layers;
                while written != 0 {
                    let layer = written.trailing_zeros() as usize;
                    written &= written - 1;
                    region.note_write(layer, self.pending.min_index as usize, self.pending.stamp);
                }
                if let Some(time) = self.pending.time {
                    region.set_touched_time(time);
                }
            }
        }
        self.pending = PendingNotes::default();
    }

    #[inline]
    pub fn occupancy(&self) -> &VoxelBuffer {
        self.buffers.occupancy.as_ref().expect("cursor accessed before seek")
    }

    #[inline]
    pub fn mean(&self) -> Option<&VoxelBuffer> {
        self.buffers.mean.as_ref()
    }

    #[inline]
    pub fn covariance(&self) -> Option<&VoxelBuffer> {
        self.buffers.covariance.as_ref()
    }

    #[inline]
    pub fn traversal(&self) -> Option<&VoxelBuffer> {
        self.buffers.traversal.as_ref()
    }

    #[inline]
    pub fn intensity(&self) -> Option<&VoxelBuffer> {
        self.buffers.intensity.as_ref()
    }

    #[inline]
    pub fn hit_miss_count(&self) -> Option<&VoxelBuffer> {
        self.buffers.hit_miss_count.as_ref()
    }

    #[inline]
    pub fn touch_time(&self) -> Option<&VoxelBuffer> {
        self.buffers.touch_time.as_ref()
    }

    #[inline]
    pub fn incident(&self) -> Option<&VoxelBuffer> {
        self.buffers.incident.as_ref()
    }
}

impl Drop for LayerCursor<'_> {
    fn drop(&mut self) {
        self.flush();
    }
}
