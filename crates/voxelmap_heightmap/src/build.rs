use thiserror::Error;
use tracing::debug;

use voxelmap_core::{key::RegionCoord, Aabb, DVec3, UpAxis, VoxelKey};
use voxelmap_mapper::CovarianceVoxel;
use voxelmap_storage::{
    MapFlag, MapInfo, OccupancyMap, OccupancyMapBuilder, OccupancyType, ProgressObserver,
    StoreError, VoxelBuffer, VoxelMean, UNOBSERVED_OCCUPANCY,
};

use crate::voxel::{
    add_heightmap_layer, HeightmapVoxel, HeightmapVoxelType, HEIGHTMAP_SURFACE_VALUE,
    HEIGHTMAP_VIRTUAL_SURFACE_VALUE,
};
use crate::walker::{PlaneFillWalker, PlaneWalker, Revisit};

/// Grid size of heightmap regions when none is given.
pub const DEFAULT_REGION_SIZE: u8 = 128;

#[derive(Debug, Error)]
pub enum HeightmapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The progress observer requested quit. The heightmap holds the columns completed so far.
    #[error("heightmap build cancelled")]
    Cancelled,
}

/// Read access to the source map's occupancy, mean and covariance layers, caching the retained
/// buffers of the most recently visited region.
struct SourceCursor<'a> {
    map: &'a OccupancyMap,
    occupancy_layer: usize,
    mean_layer: Option<usize>,
    covariance_layer: Option<usize>,
    region_coord: Option<RegionCoord>,
    occupancy: Option<VoxelBuffer>,
    mean: Option<VoxelBuffer>,
    covariance: Option<VoxelBuffer>,
}

impl<'a> SourceCursor<'a> {
    fn new(map: &'a OccupancyMap, use_mean: bool) -> Result<Self, StoreError> {
        let occupancy_layer = map
            .layout()
            .occupancy_layer()
            .ok_or_else(|| StoreError::LayerMissing("occupancy".to_owned()))?;
        Ok(Self {
            map,
            occupancy_layer,
            mean_layer: if use_mean { map.layout().mean_layer() } else { None },
            covariance_layer: map.layout().covariance_layer(),
            region_coord: None,
            occupancy: None,
            mean: None,
            covariance: None,
        })
    }

    /// Focus `key`'s region. Returns the voxel's local index, or `None` when no region holds it.
    fn seek(&mut self, key: &VoxelKey) -> Option<usize> {
        if self.region_coord != Some(key.region()) {
            self.region_coord = Some(key.region());
            match self.map.region(key.region()) {
                Some(region) => {
                    self.occupancy = region.buffer(self.occupancy_layer);
                    self.mean = self.mean_layer.and_then(|layer| region.buffer(layer));
                    self.covariance = self.covariance_layer.and_then(|layer| region.buffer(layer));
                }
                None => {
                    self.occupancy = None;
                    self.mean = None;
                    self.covariance = None;
                }
            }
        }
        self.occupancy
            .is_some()
            .then(|| self.map.grid().local_index(key))
    }

    fn occupancy_type(&mut self, key: &VoxelKey) -> OccupancyType {
        if key.is_null() {
            return OccupancyType::Null;
        }
        match self.seek(key) {
            Some(index) => {
                let value = self.occupancy.as_ref().expect("seek succeeded").read::<f32>(index);
                self.map.classify_value(value)
            }
            None => OccupancyType::Null,
        }
    }

    /// The voxel's position: mean-refined when available, else its centre.
    fn position(&mut self, key: &VoxelKey) -> DVec3 {
        let centre = self.map.voxel_centre(key);
        let index = self.seek(key);
        match (index, &self.mean) {
            (Some(index), Some(mean)) => {
                let mean: VoxelMean = mean.read(index);
                if mean.count > 0 {
                    centre + mean.offset(self.map.resolution())
                } else {
                    centre
                }
            }
            _ => centre,
        }
    }

    fn covariance_at(&mut self, key: &VoxelKey) -> Option<CovarianceVoxel> {
        let index = self.seek(key)?;
        self.covariance.as_ref().map(|buffer| buffer.read(index))
    }
}

/// Occupancy classification plus the voxel's surface position and its height along `up`.
fn source_voxel_height(
    src: &mut SourceCursor<'_>,
    key: &VoxelKey,
    up: DVec3,
) -> (OccupancyType, DVec3, f64) {
    let voxel_type = src.occupancy_type(key);
    let position = if voxel_type == OccupancyType::Occupied {
        src.position(key)
    } else {
        src.map.voxel_centre(key)
    };
    (voxel_type, position, position.dot(&up))
}

/// Search one direction of a column for the first occupied voxel, tracking the best virtual
/// surface candidate on the way.
///
/// Returns `(key, offset, is_virtual)`; the key is null and the offset -1 when nothing viable was
/// found. The virtual candidate rules differ per direction: searching down keeps the last free
/// voxel resting on unobserved space (the lowest such interface), while searching up keeps the
/// first free voxel whose predecessor was unobserved.
#[allow(clippy::too_many_arguments)]
fn find_supporting_voxel_in_direction(
    src: &mut SourceCursor<'_>,
    from_key: &VoxelKey,
    to_key: &VoxelKey,
    up_index: usize,
    step_limit: i32,
    search_up: bool,
    allow_virtual: bool,
) -> (VoxelKey, i32, bool) {
    let grid = *src.map.grid();
    let dim_up = i32::from(grid.region_dim()[up_index]);

    let mut vertical_range = grid.range_between(from_key, to_key)[up_index] + 1;
    let step = if vertical_range >= 0 { 1 } else { -1 };
    vertical_range = vertical_range.abs();
    if step_limit > 0 {
        vertical_range = vertical_range.min(step_limit);
    }

    let mut best_virtual = VoxelKey::NULL;
    let mut last_unknown = true;
    let mut last_free = true;
    let mut last_key = VoxelKey::NULL;

    let mut offset = -1;
    let mut current = *from_key;
    let mut i = 0;
    while i < vertical_range {
        offset = i + i32::from(search_up);

        let voxel_type = src.occupancy_type(&current);
        let occupied = voxel_type == OccupancyType::Occupied;
        let free = voxel_type == OccupancyType::Free;
        let unknown = !occupied && !free;

        if occupied {
            return (current, offset, false);
        }

        // Upward: take the first free voxel over unobserved space and keep it.
        if allow_virtual && search_up && free && last_unknown && best_virtual.is_null() {
            best_virtual = current;
        }
        // Downward: progressively take the last free voxel each time unobserved space opens
        // beneath it, so the lowest interface wins.
        if allow_virtual && !search_up && last_free && unknown {
            best_virtual = last_key;
        }

        last_unknown = unknown;
        last_free = free;
        last_key = current;

        // An absent region is all unobserved; skip to its last voxel so the virtual interface
        // rules still see the transition.
        let mut next_step = step;
        if voxel_type == OccupancyType::Null {
            let local_up = i32::from(current.local()[up_index]);
            next_step = if step > 0 { dim_up - local_up } else { -(1 + local_up) };
            i += next_step.abs() - 1;
        }

        grid.step_key(&mut current, up_index, next_step);
        i += 1;
    }

    if best_virtual.is_null() {
        if allow_virtual && !search_up && last_free {
            best_virtual = last_key;
        } else {
            offset = -1;
        }
    }

    let is_virtual = !best_virtual.is_null();
    (best_virtual, offset, is_virtual)
}

/// Search the column of `seed_key` for the supporting voxel to seed the ground search with.
///
/// The downward search is unbounded; the upward search is limited to `voxel_ceiling` voxels.
/// Real candidates are preferred over virtual ones and lower ones over upper, except that an
/// upper real candidate within `clearance_voxel_count_permissive` total search steps wins on
/// proximity, and `promote_virtual_below` lets a downward virtual candidate outrank a real one
/// above.
#[allow(clippy::too_many_arguments)]
fn find_nearest_supporting_voxel(
    src: &mut SourceCursor<'_>,
    seed_key: &VoxelKey,
    up_axis: UpAxis,
    min_key: &VoxelKey,
    max_key: &VoxelKey,
    voxel_ceiling: i32,
    clearance_voxel_count_permissive: i32,
    allow_virtual: bool,
    promote_virtual_below: bool,
) -> VoxelKey {
    let up_index = up_axis.index();
    let (search_down_to, search_up_to) = if up_axis.is_positive() {
        (min_key, max_key)
    } else {
        (max_key, min_key)
    };

    let (below, offset_below, below_virtual) = find_supporting_voxel_in_direction(
        src,
        seed_key,
        search_down_to,
        up_index,
        0,
        false,
        allow_virtual,
    );
    let (above, offset_above, virtual_above) = find_supporting_voxel_in_direction(
        src,
        seed_key,
        search_up_to,
        up_index,
        voxel_ceiling,
        true,
        allow_virtual,
    );

    let have_candidate_below = offset_below >= 0;
    let have_candidate_above = offset_above >= 0;

    // Under promotion a virtual candidate below counts as solid for the preference rules.
    let virtual_below = have_candidate_below && below_virtual && !promote_virtual_below;

    // Prefer non-virtual over virtual, and the closer result.
    if have_candidate_below && virtual_above && !virtual_below {
        return below;
    }
    if have_candidate_above && !virtual_above && virtual_below {
        return above;
    }

    // Virtual surfaces above are never taken over one below; a virtual floor approaching a slope
    // down is the more useful estimate.
    if have_candidate_below && virtual_above && virtual_below {
        return below;
    }

    if have_candidate_below
        && (!have_candidate_above
            || offset_below <= offset_above
            || (!virtual_above && offset_below + offset_above >= clearance_voxel_count_permissive))
    {
        return below;
    }

    above
}

/// Walk up from `seed_key` to the first candidate surface with at least `min_clearance` of space
/// above it. Candidates are occupied voxels, or the first virtual-surface voxel when enabled; on
/// insufficient clearance the obstructing candidate becomes the new base and the walk continues.
///
/// Returns the ground key and its clearance (zero when the column ended with no information
/// above the surface), or `None` when the column holds no candidate at all.
#[allow(clippy::too_many_arguments)]
fn find_ground(
    src: &mut SourceCursor<'_>,
    seed_key: &VoxelKey,
    min_key: &VoxelKey,
    max_key: &VoxelKey,
    up_axis: UpAxis,
    min_clearance: f64,
    generate_virtual_surface: bool,
) -> Option<(VoxelKey, f64)> {
    let grid = *src.map.grid();
    let up_index = up_axis.index();
    let up = up_axis.normal();
    let step_dir = if up_axis.is_positive() { 1 } else { -1 };

    let mut column_height = f64::MAX;
    let mut column_clearance_height = f64::MAX;
    let mut candidate_type = OccupancyType::Null;
    let mut last_type = OccupancyType::Null;
    let mut ground_key = VoxelKey::NULL;
    let mut found_clearance = false;

    let mut key = *seed_key;
    while key.is_bounded_on_axis(up_index, min_key, max_key, grid.region_dim()) {
        let (voxel_type, _position, height) = source_voxel_height(src, &key, up);

        let last_is_unobserved =
            last_type == OccupancyType::Unobserved || last_type == OccupancyType::Null;
        if voxel_type == OccupancyType::Occupied
            || (generate_virtual_surface
                && last_is_unobserved
                && voxel_type == OccupancyType::Free
                && candidate_type == OccupancyType::Null)
        {
            if candidate_type != OccupancyType::Null {
                // A candidate exists; this voxel bounds its clearance.
                column_clearance_height = height;
                if column_clearance_height - column_height >= min_clearance {
                    found_clearance = true;
                    break;
                }

                // Insufficient room. This voxel becomes the new base.
                column_height = height;
                column_clearance_height = height;
                ground_key = key;
                candidate_type = voxel_type;
            } else {
                ground_key = key;
                column_height = height;
                column_clearance_height = height;
                candidate_type = voxel_type;
            }
        }

        last_type = voxel_type;
        grid.step_key(&mut key, up_index, step_dir);
    }

    if candidate_type != OccupancyType::Null {
        let clearance = if found_clearance {
            column_clearance_height - column_height
        } else {
            // Nothing above the surface: no clearance information.
            0.0
        };
        return Some((ground_key, clearance));
    }

    None
}

enum Walker<'g> {
    Planar(PlaneWalker<'g>),
    Fill(PlaneFillWalker<'g>),
}

/// Extracts a heightmap from an occupancy map.
///
/// Configure the extraction policies, then call [`build`](Self::build) with the source map and a
/// reference position. The result is held in [`heightmap`](Self::heightmap), a one-voxel-deep
/// occupancy map of surface markers and [`HeightmapVoxel`] data.
pub struct Heightmap {
    up_axis: UpAxis,
    min_clearance: f64,
    ceiling: f64,
    ignore_voxel_mean: bool,
    generate_virtual_surface: bool,
    promote_virtual_below: bool,
    use_flood_fill: bool,
    revisit: Revisit,
    heightmap: OccupancyMap,
    multilayer_heightmap: OccupancyMap,
}

impl Heightmap {
    /// Create a heightmap with the given grid resolution and minimum surface clearance. Pass a
    /// `region_size` of zero for the default.
    pub fn new(
        resolution: f64,
        min_clearance: f64,
        up_axis: UpAxis,
        region_size: u8,
    ) -> Result<Self, StoreError> {
        let region_size = if region_size == 0 { DEFAULT_REGION_SIZE } else { region_size };

        let mut region_dim = [region_size; 3];
        region_dim[up_axis.index()] = 1;
        let mut heightmap = OccupancyMapBuilder::new(resolution)
            .region_dim(region_dim)
            .flags(MapFlag::empty())
            .build()?;
        add_heightmap_layer(heightmap.layout_mut());

        // Reserved for multi-layer extraction: room for a few surfaces per column.
        region_dim[up_axis.index()] = 4;
        let mut multilayer_heightmap = OccupancyMapBuilder::new(resolution)
            .region_dim(region_dim)
            .flags(MapFlag::empty())
            .build()?;
        add_heightmap_layer(multilayer_heightmap.layout_mut());

        Ok(Self {
            up_axis,
            min_clearance,
            ceiling: 0.0,
            ignore_voxel_mean: false,
            generate_virtual_surface: false,
            promote_virtual_below: false,
            use_flood_fill: false,
            revisit: Revisit::default(),
            heightmap,
            multilayer_heightmap,
        })
    }

    #[inline]
    pub fn up_axis(&self) -> UpAxis {
        self.up_axis
    }

    #[inline]
    pub fn min_clearance(&self) -> f64 {
        self.min_clearance
    }

    pub fn set_min_clearance(&mut self, clearance: f64) {
        self.min_clearance = clearance;
    }

    /// Voxels above this height over the search seed are ignored. Non-positive disables the
    /// ceiling.
    #[inline]
    pub fn ceiling(&self) -> f64 {
        self.ceiling
    }

    pub fn set_ceiling(&mut self, ceiling: f64) {
        self.ceiling = ceiling;
    }

    #[inline]
    pub fn ignore_voxel_mean(&self) -> bool {
        self.ignore_voxel_mean
    }

    pub fn set_ignore_voxel_mean(&mut self, ignore: bool) {
        self.ignore_voxel_mean = ignore;
    }

    /// Infer floor candidates at the interface between free and unobserved voxels.
    #[inline]
    pub fn generate_virtual_surface(&self) -> bool {
        self.generate_virtual_surface
    }

    pub fn set_generate_virtual_surface(&mut self, enable: bool) {
        self.generate_virtual_surface = enable;
    }

    /// Prefer a virtual candidate below the reference over a real candidate above it.
    #[inline]
    pub fn promote_virtual_below(&self) -> bool {
        self.promote_virtual_below
    }

    pub fn set_promote_virtual_below(&mut self, enable: bool) {
        self.promote_virtual_below = enable;
    }

    #[inline]
    pub fn use_flood_fill(&self) -> bool {
        self.use_flood_fill
    }

    pub fn set_use_flood_fill(&mut self, enable: bool) {
        self.use_flood_fill = enable;
    }

    /// The flood-fill revisit policy.
    #[inline]
    pub fn revisit(&self) -> Revisit {
        self.revisit
    }

    pub fn set_revisit(&mut self, revisit: Revisit) {
        self.revisit = revisit;
    }

    /// The generated heightmap.
    #[inline]
    pub fn heightmap(&self) -> &OccupancyMap {
        &self.heightmap
    }

    /// The destination reserved for multi-layer extraction: four voxels deep along the up axis.
    #[inline]
    pub fn multilayer_heightmap(&self) -> &OccupancyMap {
        &self.multilayer_heightmap
    }

    /// Project `key` onto the heightmap plane.
    pub fn project(&self, key: &mut VoxelKey) {
        key.set_region_axis(self.up_axis.index(), 0);
        key.set_local_axis(self.up_axis.index(), 0);
    }

    /// Record how this heightmap is generated into `info`.
    pub fn update_map_info(&self, info: &mut MapInfo) {
        let normal = self.up_axis.normal();
        info.set("heightmap", true);
        info.set("heightmap-axis", i64::from(self.up_axis.id()));
        info.set("heightmap-axis-x", normal[0]);
        info.set("heightmap-axis-y", normal[1]);
        info.set("heightmap-axis-z", normal[2]);
        info.set("heightmap-clearance", self.min_clearance);
        info.set("heightmap-blur", 0.0f64);
    }

    /// Generate the heightmap around `reference_pos`, optionally culled to `cull_to` (pass
    /// [`Aabb::ZERO`] for no culling). Returns the number of populated cells.
    pub fn build(
        &mut self,
        source: &OccupancyMap,
        reference_pos: DVec3,
        cull_to: Aabb,
        progress: &mut dyn ProgressObserver,
    ) -> Result<usize, HeightmapError> {
        let mut info = self.heightmap.info().clone();
        self.update_map_info(&mut info);
        *self.heightmap.info_mut() = info;
        self.heightmap.clear();

        let mut src_region = match source.calculate_extents() {
            Some(extents) => extents,
            None => return Ok(0),
        };
        for axis in 0..3 {
            if cull_to.constrains_axis(axis) {
                src_region.min[axis] = cull_to.min[axis];
                src_region.max[axis] = cull_to.max[axis];
            }
        }
        let min_ext_key = source.voxel_key(src_region.min);
        let max_ext_key = source.voxel_key(src_region.max);

        let use_voxel_mean = source.voxel_mean_enabled() && !self.ignore_voxel_mean;
        if use_voxel_mean && self.heightmap.layout().mean_layer().is_none() {
            self.heightmap.layout_mut().add_mean();
        }

        let grid = source.grid();
        let region_dim = grid.region_dim();
        let mut walk_key = source.voxel_key(reference_pos);
        if !walk_key.is_bounded(&min_ext_key, &max_ext_key, region_dim) {
            walk_key.clamp_to_axis(self.up_axis.surface_index_a(), &min_ext_key, &max_ext_key);
            walk_key.clamp_to_axis(self.up_axis.surface_index_b(), &min_ext_key, &max_ext_key);
        }

        let voxel_ceiling = (self.ceiling / grid.resolution()).round() as i32;
        let clearance_voxel_count_permissive =
            (((self.min_clearance / grid.resolution()).round() as i32) - 1).max(1);

        let mut src = SourceCursor::new(source, use_voxel_mean)?;

        let mut walker = if self.use_flood_fill {
            Walker::Fill(PlaneFillWalker::new(grid, min_ext_key, max_ext_key, self.up_axis))
        } else {
            Walker::Planar(PlaneWalker::new(
                grid,
                min_ext_key,
                max_ext_key,
                self.up_axis,
                &walk_key,
            ))
        };

        let mut current = match &mut walker {
            Walker::Planar(planar) => {
                progress.set_target(planar.column_count());
                planar.begin()
            }
            Walker::Fill(fill) => {
                progress.set_target(0);
                fill.begin(walk_key)
            }
        };

        let mut populated_count = 0usize;
        while let Some(column_key) = current {
            if progress.quit() {
                return Err(HeightmapError::Cancelled);
            }

            // The voxel closest to the seed which could be ground: occupied, or a virtual
            // surface voxel resting on unobserved space.
            let candidate_key = find_nearest_supporting_voxel(
                &mut src,
                &column_key,
                self.up_axis,
                &min_ext_key,
                &max_ext_key,
                voxel_ceiling,
                clearance_voxel_count_permissive,
                self.generate_virtual_surface,
                self.promote_virtual_below,
            );

            // Walk up from the candidate for the first surface with sufficient clearance.
            let ground = if !candidate_key.is_null() {
                find_ground(
                    &mut src,
                    &candidate_key,
                    &min_ext_key,
                    &max_ext_key,
                    self.up_axis,
                    self.min_clearance,
                    self.generate_virtual_surface,
                )
            } else {
                None
            };
            let (ground_key, clearance) = ground.unwrap_or((column_key, 0.0));

            if let Walker::Fill(fill) = &mut walker {
                let revisit = if candidate_key.is_null() { Revisit::None } else { self.revisit };
                fill.add_neighbours(&ground_key, revisit);
            }

            if self.write_column(&mut src, &ground_key, clearance) {
                populated_count += 1;
            }

            progress.increment();
            current = match &mut walker {
                Walker::Planar(planar) => planar.walk_next(),
                Walker::Fill(fill) => fill.walk_next(),
            };
        }

        debug!(populated_count, "heightmap build complete");
        Ok(populated_count)
    }

    /// Migrate one ground voxel into the heightmap. Returns true when a cell was written.
    fn write_column(
        &mut self,
        src: &mut SourceCursor<'_>,
        ground_key: &VoxelKey,
        clearance: f64,
    ) -> bool {
        let voxel_type = src.occupancy_type(ground_key);
        if voxel_type != OccupancyType::Occupied && !self.generate_virtual_surface {
            return false;
        }
        if voxel_type == OccupancyType::Unobserved || voxel_type == OccupancyType::Null {
            return false;
        }

        // Mean positioning is only trustworthy for occupied voxels.
        let mut voxel_pos = if voxel_type == OccupancyType::Occupied {
            src.position(ground_key)
        } else {
            src.map.voxel_centre(ground_key)
        };
        let surface_value = if voxel_type == OccupancyType::Occupied {
            HEIGHTMAP_SURFACE_VALUE
        } else {
            HEIGHTMAP_VIRTUAL_SURFACE_VALUE
        };

        let up_index = self.up_axis.index();
        let src_height = voxel_pos[up_index];
        voxel_pos[up_index] = 0.0;

        let mut normal = DVec3::zeros();
        if voxel_type == OccupancyType::Occupied {
            if let Some(cov) = src.covariance_at(ground_key) {
                normal = cov.estimate_primary_normal();
                let flip = if normal.dot(&self.up_axis.normal()) >= 0.0 { 1.0 } else { -1.0 };
                normal *= flip;
            }
        }

        let mut hm_key = self.heightmap.voxel_key(voxel_pos);
        self.project(&mut hm_key);

        let grid = *self.heightmap.grid();
        let index = grid.local_index(&hm_key);
        let centre = grid.voxel_centre(&hm_key);
        let resolution = grid.resolution();
        let layout = self.heightmap.layout();
        let occupancy_layer = layout.occupancy_layer().expect("heightmap occupancy layer");
        let heightmap_layer = layout.heightmap_layer().expect("heightmap layer");
        let mean_layer = layout.mean_layer();

        let stamp = self.heightmap.touch();
        let region = self.heightmap.get_or_create_region(hm_key.region());

        let occupancy = region.buffer(occupancy_layer).expect("occupancy block");
        occupancy.write(index, surface_value);
        region.note_write(occupancy_layer, index, stamp);

        if let Some(mean_layer) = mean_layer {
            if let Some(mean) = region.buffer(mean_layer) {
                mean.write(
                    index,
                    VoxelMean {
                        coord: voxelmap_storage::voxel::pack_sub_voxel_offset(
                            voxel_pos - centre,
                            resolution,
                        ),
                        count: 1,
                    },
                );
                region.note_write(mean_layer, index, stamp);
            }
        }

        let heightmap = region.buffer(heightmap_layer).expect("heightmap block");
        let mut cell: HeightmapVoxel = heightmap.read(index);
        cell.height = (src_height - centre[up_index]) as f32;
        cell.clearance = clearance as f32;
        cell.normal_x = normal[0] as f32;
        cell.normal_y = normal[1] as f32;
        cell.normal_z = normal[2] as f32;
        heightmap.write(index, cell);
        region.note_write(heightmap_layer, index, stamp);

        true
    }

    /// Query one heightmap cell: its classification, its surface position and its voxel data.
    pub fn voxel_info(&self, key: &VoxelKey) -> (HeightmapVoxelType, DVec3, HeightmapVoxel) {
        let mut position = DVec3::zeros();
        let cell = HeightmapVoxel::default();
        if key.is_null() {
            return (HeightmapVoxelType::Unknown, position, cell);
        }

        let layout = self.heightmap.layout();
        let (occupancy_layer, heightmap_layer) =
            match (layout.occupancy_layer(), layout.heightmap_layer()) {
                (Some(occupancy), Some(heightmap)) => (occupancy, heightmap),
                _ => return (HeightmapVoxelType::Unknown, position, cell),
            };
        let region = match self.heightmap.region(key.region()) {
            Some(region) => region,
            None => return (HeightmapVoxelType::Unknown, position, cell),
        };

        let index = self.heightmap.grid().local_index(key);
        let occupancy: f32 = match region.buffer(occupancy_layer) {
            Some(buffer) => buffer.read(index),
            None => return (HeightmapVoxelType::Unknown, position, cell),
        };
        if occupancy == UNOBSERVED_OCCUPANCY {
            return (HeightmapVoxelType::Unknown, position, cell);
        }

        let cell: HeightmapVoxel = match region.buffer(heightmap_layer) {
            Some(buffer) => buffer.read(index),
            None => return (HeightmapVoxelType::Unknown, position, cell),
        };

        let centre = self.heightmap.voxel_centre(key);
        position = self.heightmap.voxel_position(key);
        position[self.up_axis.index()] = centre[self.up_axis.index()] + f64::from(cell.height);

        (HeightmapVoxelType::from_occupancy(occupancy), position, cell)
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
