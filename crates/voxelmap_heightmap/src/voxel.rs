use bytemuck::{Pod, Zeroable};

use voxelmap_storage::{
    layer_names, FieldKind, LayerFlags, MapLayer, MapLayout, VoxelField, UNOBSERVED_OCCUPANCY,
};

/// Occupancy value marking a real surface extracted from the source map.
pub const HEIGHTMAP_SURFACE_VALUE: f32 = 1.0;
/// Occupancy value marking a virtual surface: a free voxel supported by unobserved space.
pub const HEIGHTMAP_VIRTUAL_SURFACE_VALUE: f32 = -1.0;
/// Occupancy value for columns with no valid voxel in the source map.
pub const HEIGHTMAP_VACANT_VALUE: f32 = 0.0;

/// Voxel struct of the `heightmap` layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct HeightmapVoxel {
    /// Signed offset of the surface from the heightmap voxel centre, along the up axis.
    pub height: f32,
    /// Space above the surface before the next obstruction. Zero means no information.
    pub clearance: f32,
    pub normal_x: f32,
    pub normal_y: f32,
    pub normal_z: f32,
    /// Index of the layer this surface belongs to in a multi-layer extraction.
    pub layer: u8,
    pub flags: u8,
    pub reserved: [u8; 2],
}

/// Classification of a heightmap cell.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HeightmapVoxelType {
    /// Not part of the heightmap, or an invalid query.
    Unknown,
    /// The column was searched but holds no supporting voxel.
    Vacant,
    /// A real supporting surface.
    Surface,
    /// A virtual surface inferred from a free voxel over unobserved space.
    VirtualSurface,
}

impl HeightmapVoxelType {
    /// Classify a heightmap occupancy value.
    pub fn from_occupancy(value: f32) -> Self {
        if value == UNOBSERVED_OCCUPANCY {
            Self::Unknown
        } else if value == HEIGHTMAP_VACANT_VALUE {
            Self::Vacant
        } else if value > 0.0 {
            Self::Surface
        } else {
            Self::VirtualSurface
        }
    }
}

/// Install the `heightmap` layer into `layout` and return its index.
pub fn add_heightmap_layer(layout: &mut MapLayout) -> usize {
    layout.add_layer(MapLayer::new(
        layer_names::HEIGHTMAP,
        LayerFlags::empty(),
        vec![
            VoxelField::new("height", FieldKind::Float32, 1),
            VoxelField::new("clearance", FieldKind::Float32, 1),
            VoxelField::new("normal", FieldKind::Float32, 3),
            VoxelField::new("layer", FieldKind::UInt8, 1),
            VoxelField::new("flags", FieldKind::UInt8, 1),
            VoxelField::new("reserved", FieldKind::UInt8, 2),
        ],
        vec![0; 24],
    ))
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
