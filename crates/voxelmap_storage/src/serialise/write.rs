use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::SerialiseError;
use crate::info::{InfoValue, MapInfo};
use crate::layout::MapLayout;
use crate::map::OccupancyMap;
use crate::progress::ProgressObserver;
use crate::region::Region;

use super::stream::*;
use super::{CURRENT_VERSION, MAGIC};

/// Serialise `map` to a file.
pub fn save(
    path: impl AsRef<Path>,
    map: &OccupancyMap,
    progress: &mut dyn ProgressObserver,
) -> Result<(), SerialiseError> {
    let mut writer = BufWriter::new(File::create(path)?);
    save_to(&mut writer, map, progress)?;
    writer.flush()?;
    Ok(())
}

/// Serialise `map` to any writer. Regions are written in coordinate order so equal maps produce
/// equal streams.
pub fn save_to(
    writer: &mut impl Write,
    map: &OccupancyMap,
    progress: &mut dyn ProgressObserver,
) -> Result<(), SerialiseError> {
    writer.write_all(&MAGIC)?;
    write_u32(writer, CURRENT_VERSION.major)?;
    write_u32(writer, CURRENT_VERSION.minor)?;
    write_u32(writer, CURRENT_VERSION.patch)?;

    write_f64(writer, map.resolution())?;
    writer.write_all(&map.region_dim())?;
    for axis in 0..3 {
        write_f64(writer, map.origin()[axis])?;
    }
    write_f32(writer, map.hit_value())?;
    write_f32(writer, map.miss_value())?;
    write_f32(writer, map.occupancy_threshold_value())?;
    write_f32(writer, map.min_voxel_value())?;
    write_f32(writer, map.max_voxel_value())?;
    let saturation =
        u8::from(map.saturate_at_min_value()) | (u8::from(map.saturate_at_max_value()) << 1);
    write_u8(writer, saturation)?;
    write_u32(writer, map.flags().bits())?;
    write_u64(writer, map.stamp())?;
    write_u64(writer, map.region_count() as u64)?;

    write_layout(writer, map.layout())?;
    write_info(writer, map.info())?;

    let mut regions: Vec<&Region> = map.regions().collect();
    regions.sort_by_key(|region| region.coord());

    progress.set_target(regions.len() as u64);
    for region in regions {
        if progress.quit() {
            return Err(SerialiseError::Cancelled);
        }
        write_region(writer, region, map.layout())?;
        progress.increment();
    }

    Ok(())
}

fn write_layout(writer: &mut impl Write, layout: &MapLayout) -> Result<(), SerialiseError> {
    write_u32(writer, layout.layer_count() as u32)?;
    for layer in layout.layers() {
        write_string(writer, layer.name())?;
        write_u16(writer, layer.flags().bits())?;
        write_u16(writer, layer.subsampling())?;
        write_u32(writer, layer.fields().len() as u32)?;
        for field in layer.fields() {
            write_string(writer, &field.name)?;
            write_u8(writer, field.kind.id())?;
            write_u16(writer, field.count)?;
        }
        let clear = layer.clear_pattern();
        let clear_len = u32::try_from(clear.len()).map_err(|_| SerialiseError::ValueOverflow)?;
        write_u32(writer, clear_len)?;
        writer.write_all(clear)?;
    }
    Ok(())
}

fn write_info(writer: &mut impl Write, info: &MapInfo) -> Result<(), SerialiseError> {
    write_u32(writer, info.len() as u32)?;
    for (name, value) in info.iter() {
        write_string(writer, name)?;
        write_u8(writer, value.type_id())?;
        match value {
            InfoValue::Bool(v) => write_u8(writer, u8::from(*v))?,
            InfoValue::Int(v) => write_i64(writer, *v)?,
            InfoValue::UInt(v) => write_u64(writer, *v)?,
            InfoValue::Float(v) => write_f32(writer, *v)?,
            InfoValue::Double(v) => write_f64(writer, *v)?,
            InfoValue::Str(v) => write_string(writer, v)?,
        }
    }
    Ok(())
}

fn write_region(
    writer: &mut impl Write,
    region: &Region,
    layout: &MapLayout,
) -> Result<(), SerialiseError> {
    let coord = region.coord();
    for axis in 0..3 {
        write_i32(writer, i32::from(coord[axis]))?;
    }
    for axis in 0..3 {
        write_f64(writer, region.centre()[axis])?;
    }
    write_f64(writer, region.touched_time())?;
    for stamp in region.layer_stamps() {
        write_u64(writer, *stamp)?;
    }

    for (index, layer) in layout.layers().iter().enumerate() {
        if !layer.serialised() {
            continue;
        }
        let buffer = region
            .buffer(index)
            .ok_or_else(|| crate::StoreError::LayerMissing(layer.name().to_owned()))?;
        buffer.with_bytes(|bytes| writer.write_all(bytes))?;
    }

    Ok(())
}
