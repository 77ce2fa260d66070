//! Loader for legacy version-0 streams.
//!
//! Version 0 predates map layouts: every region carries one interleaved occupancy/clearance
//! float pair per voxel. The loader installs the matching two-layer layout and de-interleaves
//! each region block.

use std::io::Read;

use crate::error::SerialiseError;
use crate::layout::MapLayout;
use crate::map::OccupancyMap;
use crate::progress::ProgressObserver;

use super::stream::*;

pub(super) fn load_regions(
    reader: &mut impl Read,
    map: &mut OccupancyMap,
    region_count: u64,
    progress: &mut dyn ProgressObserver,
) -> Result<(), SerialiseError> {
    let mut layout = MapLayout::new();
    layout.add_occupancy();
    layout.add_clearance();
    *map.layout_mut() = layout;
    let layout = map.layout().clone();

    let occupancy_layer = layout.occupancy_layer().expect("occupancy layer just added");
    let clearance_layer = layout.clearance_layer().expect("clearance layer just added");

    let voxel_count = map.grid().region_voxel_count();
    let pair_bytes = voxel_count
        .checked_mul(2 * core::mem::size_of::<f32>())
        .filter(|&bytes| bytes <= u32::MAX as usize)
        .ok_or(SerialiseError::ValueOverflow)?;

    progress.set_target(region_count);
    for _ in 0..region_count {
        if progress.quit() {
            return Err(SerialiseError::Cancelled);
        }

        let mut coord = [0i16; 3];
        for axis in 0..3 {
            coord[axis] = i16::try_from(read_i32(reader)?).map_err(|_| SerialiseError::ValueOverflow)?;
        }
        for _ in 0..3 {
            read_f64(reader)?;
        }
        let touched_time = read_f64(reader)?;

        let mut interleaved = vec![0u8; pair_bytes];
        reader.read_exact(&mut interleaved)?;

        let mut occupancy_bytes = vec![0u8; voxel_count * 4];
        let mut clearance_bytes = vec![0u8; voxel_count * 4];
        for voxel in 0..voxel_count {
            let src = voxel * 8;
            occupancy_bytes[voxel * 4..voxel * 4 + 4].copy_from_slice(&interleaved[src..src + 4]);
            clearance_bytes[voxel * 4..voxel * 4 + 4]
                .copy_from_slice(&interleaved[src + 4..src + 8]);
        }

        let region = map.get_or_create_region(coord);
        region.restore_meta(touched_time, vec![0; layout.layer_count()]);
        region
            .buffer(occupancy_layer)
            .expect("occupancy block")
            .with_bytes_mut(|dest| dest.copy_from_slice(&occupancy_bytes));
        region
            .buffer(clearance_layer)
            .expect("clearance block")
            .with_bytes_mut(|dest| dest.copy_from_slice(&clearance_bytes));
        region.search_first_valid(&layout);

        progress.increment();
    }

    Ok(())
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝

#[cfg(test)]
mod tests {
    use super::super::{load_from, MAGIC};
    use crate::map::UNOBSERVED_OCCUPANCY;
    use crate::progress::NoProgress;
    use crate::serialise::stream::*;

    /// Hand-build a minimal version 0 stream with one region.
    fn legacy_stream() -> Vec<u8> {
        let region_dim = [4u8, 4, 4];
        let voxel_count = 64usize;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        write_u32(&mut bytes, 0).unwrap(); // major
        write_u32(&mut bytes, 0).unwrap(); // minor
        write_u32(&mut bytes, 1).unwrap(); // patch

        write_f64(&mut bytes, 0.5).unwrap(); // resolution
        bytes.extend_from_slice(&region_dim);
        for _ in 0..3 {
            write_f64(&mut bytes, 0.0).unwrap(); // origin
        }
        write_f32(&mut bytes, 0.85).unwrap(); // hit
        write_f32(&mut bytes, -0.4).unwrap(); // miss
        write_f32(&mut bytes, 0.0).unwrap(); // threshold
        write_f32(&mut bytes, -2.0).unwrap(); // min
        write_f32(&mut bytes, 2.0).unwrap(); // max
        write_u8(&mut bytes, 0).unwrap(); // saturation
        write_u32(&mut bytes, 0).unwrap(); // flags
        write_u64(&mut bytes, 7).unwrap(); // stamp
        write_u64(&mut bytes, 1).unwrap(); // region count

        // Region 0,0,0 with voxel 0 occupied and a clearance of 1.5.
        for _ in 0..3 {
            write_i32(&mut bytes, 0).unwrap();
        }
        for _ in 0..3 {
            write_f64(&mut bytes, 1.0).unwrap(); // centre, ignored
        }
        write_f64(&mut bytes, 3.25).unwrap(); // touched time
        for voxel in 0..voxel_count {
            let occupancy = if voxel == 0 { 0.9 } else { UNOBSERVED_OCCUPANCY };
            let clearance = if voxel == 0 { 1.5 } else { -1.0 };
            write_f32(&mut bytes, occupancy).unwrap();
            write_f32(&mut bytes, clearance).unwrap();
        }

        bytes
    }

    #[test]
    fn legacy_streams_are_de_interleaved() {
        let map = load_from(legacy_stream().as_slice(), &mut NoProgress).unwrap();
        assert_eq!(map.stamp(), 7);
        assert_eq!(map.region_count(), 1);

        let layout = map.layout();
        let occupancy_layer = layout.occupancy_layer().unwrap();
        let clearance_layer = layout.clearance_layer().unwrap();

        let region = map.region([0, 0, 0]).unwrap();
        assert_eq!(region.touched_time(), 3.25);
        assert_eq!(region.buffer(occupancy_layer).unwrap().read::<f32>(0), 0.9);
        assert_eq!(region.buffer(clearance_layer).unwrap().read::<f32>(0), 1.5);
        assert_eq!(
            region.buffer(occupancy_layer).unwrap().read::<f32>(1),
            UNOBSERVED_OCCUPANCY
        );
        assert_eq!(region.buffer(clearance_layer).unwrap().read::<f32>(1), -1.0);
        assert_eq!(region.first_valid_index(), Some(0));
    }
}
