use std::sync::Arc;

use voxelmap_core::{key::RegionCoord, DVec3, RegionGrid};

use crate::block::{VoxelBlock, VoxelBuffer};
use crate::compression::CompressionBackend;
use crate::layout::MapLayout;

/// The sentinel stored in [`Region::first_valid_index`] while every voxel still holds its clear
/// value.
const NO_VALID_INDEX: u32 = u32::MAX;

/// One fixed-size block of voxels, allocated lazily when the first sample lands in it.
///
/// A region owns one [`VoxelBlock`] per layer of the map layout, all indexed in the same
/// row-major local order. Regions are destroyed only on explicit map clear.
pub struct Region {
    coord: RegionCoord,
    centre: DVec3,
    touched_time: f64,
    dirty_stamp: u64,
    first_valid_index: u32,
    layer_stamps: Vec<u64>,
    blocks: Vec<Arc<VoxelBlock>>,
}

impl Region {
    pub fn new(
        coord: RegionCoord,
        grid: &RegionGrid,
        layout: &MapLayout,
        backend: Option<CompressionBackend>,
    ) -> Self {
        let voxel_count = grid.region_voxel_count();
        let blocks = layout
            .layers()
            .iter()
            .enumerate()
            .map(|(index, layer)| VoxelBlock::new(index, layer.clear_pattern(), voxel_count, backend))
            .collect();

        Self {
            coord,
            centre: grid.region_centre(coord),
            touched_time: 0.0,
            dirty_stamp: 0,
            first_valid_index: NO_VALID_INDEX,
            layer_stamps: vec![0; layout.layer_count()],
            blocks,
        }
    }

    #[inline]
    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    #[inline]
    pub fn centre(&self) -> DVec3 {
        self.centre
    }

    /// Latest sample time stamp that touched this region.
    #[inline]
    pub fn touched_time(&self) -> f64 {
        self.touched_time
    }

    pub fn set_touched_time(&mut self, time: f64) {
        self.touched_time = self.touched_time.max(time);
    }

    #[inline]
    pub fn dirty_stamp(&self) -> u64 {
        self.dirty_stamp
    }

    /// Least local index at which any layer departs from its clear value, if any.
    #[inline]
    pub fn first_valid_index(&self) -> Option<u32> {
        (self.first_valid_index != NO_VALID_INDEX).then_some(self.first_valid_index)
    }

    #[inline]
    pub fn layer_stamps(&self) -> &[u64] {
        &self.layer_stamps
    }

    #[inline]
    pub fn block(&self, layer: usize) -> Option<&Arc<VoxelBlock>> {
        self.blocks.get(layer)
    }

    /// Retain the layer's block, pinning it uncompressed for the lifetime of the returned buffer.
    pub fn buffer(&self, layer: usize) -> Option<VoxelBuffer> {
        self.blocks.get(layer).map(VoxelBlock::retain)
    }

    #[inline]
    pub fn blocks(&self) -> &[Arc<VoxelBlock>] {
        &self.blocks
    }

    /// Record a write to `local_index` through `layer` at map stamp `stamp`.
    pub fn note_write(&mut self, layer: usize, local_index: usize, stamp: u64) {
        self.first_valid_index = self.first_valid_index.min(local_index as u32);
        self.dirty_stamp = stamp;
        if let Some(layer_stamp) = self.layer_stamps.get_mut(layer) {
            *layer_stamp = stamp;
        }
    }

    /// Restore serialised metadata while loading.
    pub(crate) fn restore_meta(&mut self, touched_time: f64, layer_stamps: Vec<u64>) {
        self.touched_time = touched_time;
        debug_assert_eq!(layer_stamps.len(), self.layer_stamps.len());
        self.layer_stamps = layer_stamps;
        self.dirty_stamp = self.layer_stamps.iter().copied().max().unwrap_or(0);
    }

    /// Restore `first_valid_index` by scanning every layer against its clear pattern. Used after
    /// loading raw layer bytes.
    pub fn search_first_valid(&mut self, layout: &MapLayout) {
        let mut first_valid = NO_VALID_INDEX;
        for (layer, block) in layout.layers().iter().zip(&self.blocks) {
            let clear = layer.clear_pattern();
            if clear.is_empty() {
                continue;
            }
            let buffer = block.retain();
            let found = buffer.with_bytes(|bytes| {
                bytes
                    .chunks_exact(clear.len())
                    .position(|voxel| voxel != clear)
            });
            if let Some(index) = found {
                first_valid = first_valid.min(index as u32);
            }
        }
        self.first_valid_index = first_valid;
    }

    /// Reset every layer to its clear value and forget the region's update history.
    pub fn clear(&mut self, layout: &MapLayout) {
        for (layer, block) in layout.layers().iter().zip(&self.blocks) {
            block.retain().fill_clear(layer.clear_pattern());
        }
        self.touched_time = 0.0;
        self.dirty_stamp = 0;
        self.first_valid_index = NO_VALID_INDEX;
        self.layer_stamps.fill(0);
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
