use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use voxelmap_core::DVec3;

use crate::error::SerialiseError;
use crate::info::{InfoValue, MapInfo};
use crate::layer::{FieldKind, LayerFlags, MapLayer, VoxelField};
use crate::layout::MapLayout;
use crate::map::{MapFlag, OccupancyMap, OccupancyMapBuilder};
use crate::progress::ProgressObserver;

use super::stream::*;
use super::{v0, MapVersion, MAGIC};

/// Load a map from a file.
pub fn load(
    path: impl AsRef<Path>,
    progress: &mut dyn ProgressObserver,
) -> Result<OccupancyMap, SerialiseError> {
    let mut reader = BufReader::new(File::open(path)?);
    load_from(&mut reader, progress)
}

/// Load a map from any reader.
pub fn load_from(
    mut reader: impl Read,
    progress: &mut dyn ProgressObserver,
) -> Result<OccupancyMap, SerialiseError> {
    let reader = &mut reader;

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(SerialiseError::FormatMismatch("bad magic bytes".to_owned()));
    }
    let version = MapVersion {
        major: read_u32(reader)?,
        minor: read_u32(reader)?,
        patch: read_u32(reader)?,
    };
    if !version.supported() {
        return Err(SerialiseError::FormatMismatch(format!(
            "unreadable stream version {}.{}.{}",
            version.major, version.minor, version.patch
        )));
    }

    let resolution = read_f64(reader)?;
    let mut region_dim = [0u8; 3];
    reader.read_exact(&mut region_dim)?;
    let origin = DVec3::new(read_f64(reader)?, read_f64(reader)?, read_f64(reader)?);
    let hit_value = read_f32(reader)?;
    let miss_value = read_f32(reader)?;
    let threshold_value = read_f32(reader)?;
    let min_value = read_f32(reader)?;
    let max_value = read_f32(reader)?;
    let saturation = read_u8(reader)?;
    let flags = MapFlag::from_bits_truncate(read_u32(reader)?);
    let stamp = read_u64(reader)?;
    let region_count = read_u64(reader)?;

    let mut map = OccupancyMapBuilder::new(resolution)
        .region_dim(region_dim)
        .origin(origin)
        .flags(flags)
        .build()?;
    map.restore_values(
        hit_value,
        miss_value,
        threshold_value,
        min_value,
        max_value,
        saturation & 1 != 0,
        saturation & 2 != 0,
    );

    if version.is_legacy_interleaved() {
        v0::load_regions(reader, &mut map, region_count, progress)?;
    } else {
        *map.layout_mut() = read_layout(reader)?;
        read_info(reader, map.info_mut())?;
        load_regions(reader, &mut map, region_count, progress)?;
    }

    map.restore_stamp(stamp);
    Ok(map)
}

fn read_layout(reader: &mut impl Read) -> Result<MapLayout, SerialiseError> {
    let mut layout = MapLayout::new();
    let layer_count = read_u32(reader)?;
    for _ in 0..layer_count {
        let name = read_string(reader)?;
        let flags = LayerFlags::from_bits_truncate(read_u16(reader)?);
        let subsampling = read_u16(reader)?;
        let field_count = read_u32(reader)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name = read_string(reader)?;
            let kind_id = read_u8(reader)?;
            let kind = FieldKind::from_id(kind_id).ok_or_else(|| {
                SerialiseError::FormatMismatch(format!("unknown voxel field type id {}", kind_id))
            })?;
            let count = read_u16(reader)?;
            fields.push(VoxelField::new(field_name, kind, count));
        }
        let clear_len = read_u32(reader)? as usize;
        let mut clear = vec![0u8; clear_len];
        reader.read_exact(&mut clear)?;

        let expected: usize = fields.iter().map(VoxelField::byte_size).sum();
        if expected != clear_len {
            return Err(SerialiseError::FormatMismatch(format!(
                "layer '{}' clear pattern size {} does not match its fields ({})",
                name, clear_len, expected
            )));
        }

        let mut layer = MapLayer::new(name, flags, fields, clear);
        layer.set_subsampling(subsampling);
        layout.add_layer(layer);
    }
    Ok(layout)
}

fn read_info(reader: &mut impl Read, info: &mut MapInfo) -> Result<(), SerialiseError> {
    let count = read_u32(reader)?;
    for _ in 0..count {
        let name = read_string(reader)?;
        let type_id = read_u8(reader)?;
        let value = match type_id {
            0 => InfoValue::Bool(read_u8(reader)? != 0),
            1 => InfoValue::Int(read_i64(reader)?),
            2 => InfoValue::UInt(read_u64(reader)?),
            3 => InfoValue::Float(read_f32(reader)?),
            4 => InfoValue::Double(read_f64(reader)?),
            5 => InfoValue::Str(read_string(reader)?),
            _ => {
                return Err(SerialiseError::FormatMismatch(format!(
                    "unknown info value type id {}",
                    type_id
                )))
            }
        };
        info.set(name, value);
    }
    Ok(())
}

fn load_regions(
    reader: &mut impl Read,
    map: &mut OccupancyMap,
    region_count: u64,
    progress: &mut dyn ProgressObserver,
) -> Result<(), SerialiseError> {
    let layout = map.layout().clone();
    let voxel_count = map.grid().region_voxel_count();

    progress.set_target(region_count);
    for _ in 0..region_count {
        if progress.quit() {
            return Err(SerialiseError::Cancelled);
        }

        let mut coord = [0i16; 3];
        for axis in 0..3 {
            coord[axis] = i16::try_from(read_i32(reader)?).map_err(|_| SerialiseError::ValueOverflow)?;
        }
        // The centre is derivable from the grid; read and discard.
        for _ in 0..3 {
            read_f64(reader)?;
        }
        let touched_time = read_f64(reader)?;
        let mut stamps = Vec::with_capacity(layout.layer_count());
        for _ in 0..layout.layer_count() {
            stamps.push(read_u64(reader)?);
        }

        let region = map.get_or_create_region(coord);
        region.restore_meta(touched_time, stamps);

        for (index, layer) in layout.layers().iter().enumerate() {
            if !layer.serialised() {
                continue;
            }
            let byte_count = voxel_count * layer.voxel_byte_size();
            let mut bytes = vec![0u8; byte_count];
            reader.read_exact(&mut bytes)?;
            let buffer = region
                .buffer(index)
                .ok_or_else(|| crate::StoreError::LayerMissing(layer.name().to_owned()))?;
            buffer.with_bytes_mut(|dest| dest.copy_from_slice(&bytes));
        }

        region.search_first_valid(&layout);
        progress.increment();
    }

    Ok(())
}
