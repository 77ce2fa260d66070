use crate::layer::{FieldKind, LayerFlags, MapLayer, VoxelField};
use crate::map::UNOBSERVED_OCCUPANCY;

/// The names of the recognised semantic layers.
pub mod layer_names {
    pub const OCCUPANCY: &str = "occupancy";
    pub const MEAN: &str = "mean";
    pub const COVARIANCE: &str = "covariance";
    pub const TRAVERSAL: &str = "traversal";
    pub const INTENSITY: &str = "intensity";
    pub const HIT_MISS_COUNT: &str = "hit_miss_count";
    pub const TOUCH_TIME: &str = "touch_time";
    pub const INCIDENT: &str = "incident";
    pub const CLEARANCE: &str = "clearance";
    pub const HEIGHTMAP: &str = "heightmap";
}

/// The ordered set of layers a map stores per voxel.
///
/// Layers keep their insertion order, which fixes both the block order within a region and the
/// serialised order. Indices of the recognised layers are cached on insertion so the hot paths
/// avoid name lookups.
#[derive(Clone, Debug, Default)]
pub struct MapLayout {
    layers: Vec<MapLayer>,
    occupancy: Option<usize>,
    mean: Option<usize>,
    covariance: Option<usize>,
    traversal: Option<usize>,
    intensity: Option<usize>,
    hit_miss_count: Option<usize>,
    touch_time: Option<usize>,
    incident: Option<usize>,
    clearance: Option<usize>,
    heightmap: Option<usize>,
}

impl MapLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer and return its index.
    pub fn add_layer(&mut self, layer: MapLayer) -> usize {
        let index = self.layers.len();
        let cache = match layer.name() {
            layer_names::OCCUPANCY => Some(&mut self.occupancy),
            layer_names::MEAN => Some(&mut self.mean),
            layer_names::COVARIANCE => Some(&mut self.covariance),
            layer_names::TRAVERSAL => Some(&mut self.traversal),
            layer_names::INTENSITY => Some(&mut self.intensity),
            layer_names::HIT_MISS_COUNT => Some(&mut self.hit_miss_count),
            layer_names::TOUCH_TIME => Some(&mut self.touch_time),
            layer_names::INCIDENT => Some(&mut self.incident),
            layer_names::CLEARANCE => Some(&mut self.clearance),
            layer_names::HEIGHTMAP => Some(&mut self.heightmap),
            _ => None,
        };
        if let Some(slot) = cache {
            *slot = Some(index);
        }
        self.layers.push(layer);
        index
    }

    #[inline]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn layers(&self) -> &[MapLayer] {
        &self.layers
    }

    #[inline]
    pub fn layer(&self, index: usize) -> Option<&MapLayer> {
        self.layers.get(index)
    }

    pub fn layer_index(&self, name: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.name() == name)
    }

    #[inline]
    pub fn occupancy_layer(&self) -> Option<usize> {
        self.occupancy
    }

    #[inline]
    pub fn mean_layer(&self) -> Option<usize> {
        self.mean
    }

    #[inline]
    pub fn covariance_layer(&self) -> Option<usize> {
        self.covariance
    }

    #[inline]
    pub fn traversal_layer(&self) -> Option<usize> {
        self.traversal
    }

    #[inline]
    pub fn intensity_layer(&self) -> Option<usize> {
        self.intensity
    }

    #[inline]
    pub fn hit_miss_count_layer(&self) -> Option<usize> {
        self.hit_miss_count
    }

    #[inline]
    pub fn touch_time_layer(&self) -> Option<usize> {
        self.touch_time
    }

    #[inline]
    pub fn incident_layer(&self) -> Option<usize> {
        self.incident
    }

    #[inline]
    pub fn clearance_layer(&self) -> Option<usize> {
        self.clearance
    }

    #[inline]
    pub fn heightmap_layer(&self) -> Option<usize> {
        self.heightmap
    }

    /// Add the `occupancy` layer: one `f32` of log-odds, cleared to the unobserved sentinel.
    pub fn add_occupancy(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::OCCUPANCY,
            LayerFlags::empty(),
            vec![VoxelField::new("occupancy", FieldKind::Float32, 1)],
            UNOBSERVED_OCCUPANCY.to_le_bytes().to_vec(),
        ))
    }

    /// Add the `mean` layer: packed sub-voxel coordinate plus sample count.
    pub fn add_mean(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::MEAN,
            LayerFlags::empty(),
            vec![
                VoxelField::new("coord", FieldKind::UInt32, 1),
                VoxelField::new("count", FieldKind::UInt32, 1),
            ],
            vec![0; 8],
        ))
    }

    /// Add the `covariance` layer: the packed lower-triangular square root of the voxel
    /// covariance.
    pub fn add_covariance(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::COVARIANCE,
            LayerFlags::empty(),
            vec![VoxelField::new("sqrt_cov", FieldKind::Float32, 6)],
            vec![0; 24],
        ))
    }

    /// Add the `traversal` layer: accumulated ray path length through each voxel.
    pub fn add_traversal(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::TRAVERSAL,
            LayerFlags::empty(),
            vec![VoxelField::new("traversal", FieldKind::Float32, 1)],
            0f32.to_le_bytes().to_vec(),
        ))
    }

    /// Add the `intensity` layer: running mean and variance of sample intensities.
    pub fn add_intensity(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::INTENSITY,
            LayerFlags::empty(),
            vec![
                VoxelField::new("mean", FieldKind::Float32, 1),
                VoxelField::new("covariance", FieldKind::Float32, 1),
            ],
            vec![0; 8],
        ))
    }

    /// Add the `hit_miss_count` layer.
    pub fn add_hit_miss_count(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::HIT_MISS_COUNT,
            LayerFlags::empty(),
            vec![
                VoxelField::new("hit_count", FieldKind::UInt32, 1),
                VoxelField::new("miss_count", FieldKind::UInt32, 1),
            ],
            vec![0; 8],
        ))
    }

    /// Add the `touch_time` layer: quantised last-touch times.
    pub fn add_touch_time(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::TOUCH_TIME,
            LayerFlags::empty(),
            vec![VoxelField::new("touch_time", FieldKind::UInt32, 1)],
            vec![0; 4],
        ))
    }

    /// Add the `incident` layer: packed unit-length incident directions.
    pub fn add_incident(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::INCIDENT,
            LayerFlags::empty(),
            vec![VoxelField::new("incident", FieldKind::UInt32, 1)],
            vec![0; 4],
        ))
    }

    /// Add the `clearance` layer: distance to the nearest occupied voxel, cleared to -1 for "not
    /// calculated".
    pub fn add_clearance(&mut self) -> usize {
        self.add_layer(MapLayer::new(
            layer_names::CLEARANCE,
            LayerFlags::empty(),
            vec![VoxelField::new("clearance", FieldKind::Float32, 1)],
            (-1f32).to_le_bytes().to_vec(),
        ))
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
    fn insertion_order_is_preserved() {
        let mut layout = MapLayout::new();
        layout.add_occupancy();
        layout.add_mean();
        layout.add_covariance();

        let names: Vec<_> = layout.layers().iter().map(|l| l.name().to_owned()).collect();
        assert_eq!(names, ["occupancy", "mean", "covariance"]);
    }

    #[test]
    fn recognised_indices_are_cached() {
        let mut layout = MapLayout::new();
        let occupancy = layout.add_occupancy();
        let mean = layout.add_mean();

        assert_eq!(layout.occupancy_layer(), Some(occupancy));
        assert_eq!(layout.mean_layer(), Some(mean));
        assert_eq!(layout.covariance_layer(), None);
        assert_eq!(layout.layer_index("mean"), Some(mean));
        assert_eq!(layout.layer_index("no-such-layer"), None);
    }

    #[test]
    fn occupancy_clears_to_the_unobserved_sentinel() {
        let mut layout = MapLayout::new();
        let occupancy = layout.add_occupancy();
        let layer = layout.layer(occupancy).unwrap();
        let value = f32::from_le_bytes(layer.clear_pattern().try_into().unwrap());
        assert!(value.is_infinite() && value < 0.0);
    }
}
