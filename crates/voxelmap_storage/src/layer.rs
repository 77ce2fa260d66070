use bitflags::bitflags;

/// Scalar type of one member of a layer's voxel struct. The discriminants are the serialised
/// type ids.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum FieldKind {
    Int8 = 0,
    UInt8 = 1,
    Int16 = 2,
    UInt16 = 3,
    Int32 = 4,
    UInt32 = 5,
    Int64 = 6,
    UInt64 = 7,
    Float32 = 8,
    Float64 = 9,
}

impl FieldKind {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(Self::Int8),
            1 => Some(Self::UInt8),
            2 => Some(Self::Int16),
            3 => Some(Self::UInt16),
            4 => Some(Self::Int32),
            5 => Some(Self::UInt32),
            6 => Some(Self::Int64),
            7 => Some(Self::UInt64),
            8 => Some(Self::Float32),
            9 => Some(Self::Float64),
            _ => None,
        }
    }

    #[inline]
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Byte size of one scalar of this kind.
    #[inline]
    pub fn byte_size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }
}

/// One named member of a layer's voxel struct. `count > 1` describes a fixed-size array member.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VoxelField {
    pub name: String,
    pub kind: FieldKind,
    pub count: u16,
}

impl VoxelField {
    pub fn new(name: impl Into<String>, kind: FieldKind, count: u16) -> Self {
        Self {
            name: name.into(),
            kind,
            count,
        }
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.kind.byte_size() * usize::from(self.count)
    }
}

bitflags! {
    /// Per-layer behaviour flags.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct LayerFlags: u16 {
        /// The layer's voxel bytes are not written on serialisation and are restored to the clear
        /// value on load.
        const SKIP_SERIALISE = 1 << 0;
    }
}

/// Describes one parallel voxel attribute: a name, a typed struct of fixed byte size and the byte
/// pattern a cleared voxel holds.
///
/// Layers do not own voxel memory; each [`Region`](crate::region::Region) allocates one
/// [`VoxelBlock`](crate::VoxelBlock) per layer.
#[derive(Clone, Debug)]
pub struct MapLayer {
    name: String,
    flags: LayerFlags,
    subsampling: u16,
    fields: Vec<VoxelField>,
    clear_pattern: Vec<u8>,
}

impl MapLayer {
    /// Build a layer from its fields and clear pattern. The pattern length must equal the summed
    /// field size.
    pub fn new(
        name: impl Into<String>,
        flags: LayerFlags,
        fields: Vec<VoxelField>,
        clear_pattern: Vec<u8>,
    ) -> Self {
        let layer = Self {
            name: name.into(),
            flags,
            subsampling: 0,
            fields,
            clear_pattern,
        };
        debug_assert_eq!(layer.voxel_byte_size(), layer.clear_pattern.len());
        layer
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn flags(&self) -> LayerFlags {
        self.flags
    }

    #[inline]
    pub fn subsampling(&self) -> u16 {
        self.subsampling
    }

    pub fn set_subsampling(&mut self, subsampling: u16) {
        self.subsampling = subsampling;
    }

    #[inline]
    pub fn fields(&self) -> &[VoxelField] {
        &self.fields
    }

    /// Byte size of one voxel in this layer.
    #[inline]
    pub fn voxel_byte_size(&self) -> usize {
        self.fields.iter().map(VoxelField::byte_size).sum()
    }

    /// The byte pattern a cleared voxel holds.
    #[inline]
    pub fn clear_pattern(&self) -> &[u8] {
        &self.clear_pattern
    }

    #[inline]
    pub fn serialised(&self) -> bool {
        !self.flags.contains(LayerFlags::SKIP_SERIALISE)
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
    fn voxel_byte_size_sums_fields() {
        let layer = MapLayer::new(
            "mean",
            LayerFlags::empty(),
            vec![
                VoxelField::new("coord", FieldKind::UInt32, 1),
                VoxelField::new("count", FieldKind::UInt32, 1),
            ],
            vec![0; 8],
        );
        assert_eq!(layer.voxel_byte_size(), 8);
    }

    #[test]
    fn field_kind_ids_round_trip() {
        for id in 0..10 {
            let kind = FieldKind::from_id(id).unwrap();
            assert_eq!(kind.id(), id);
        }
        assert_eq!(FieldKind::from_id(10), None);
    }

    #[test]
    fn array_fields_scale_by_count() {
        let field = VoxelField::new("sqrt_cov", FieldKind::Float32, 6);
        assert_eq!(field.byte_size(), 24);
    }
}
