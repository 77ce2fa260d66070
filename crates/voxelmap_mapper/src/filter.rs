use bitflags::bitflags;
use voxelmap_core::DVec3;

bitflags! {
    /// The outcome of running a [`RayFilter`] over one ray.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RayFilterFlags: u32 {
        /// The origin was moved.
        const CLIPPED_START = 1 << 0;
        /// The sample was moved; the sample voxel no longer holds a real surface return.
        const CLIPPED_END = 1 << 1;
        /// Drop the ray entirely. No voxel is updated.
        const REJECT_RAY = 1 << 2;
        /// Keep the ray, but the sample voxel only sees the miss-update path.
        const REJECT_SAMPLE = 1 << 3;
    }
}

/// A pluggable transform applied to each ray before traversal. Filters may move the endpoints
/// (clipping) and may reject the ray or just its sample.
///
/// Filter rejection is silent: rejected rays are counted out of the batch result, never raised as
/// errors.
pub trait RayFilter {
    fn filter(&self, origin: &mut DVec3, sample: &mut DVec3) -> RayFilterFlags;
}

impl<F> RayFilter for F
where
    F: Fn(&mut DVec3, &mut DVec3) -> RayFilterFlags,
{
    fn filter(&self, origin: &mut DVec3, sample: &mut DVec3) -> RayFilterFlags {
        self(origin, sample)
    }
}

/// Rejects degenerate rays and bounds the usable range.
///
/// - Non-finite endpoints reject the ray.
/// - Rays shorter than `min_range` reject the ray.
/// - Rays longer than `max_range` (when positive) are clipped: the sample moves onto the range
///   sphere and is rejected as a surface return.
#[derive(Clone, Copy, Debug)]
pub struct RangeFilter {
    pub min_range: f64,
    pub max_range: f64,
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self {
            min_range: 0.0,
            max_range: 0.0,
        }
    }
}

impl RayFilter for RangeFilter {
    fn filter(&self, origin: &mut DVec3, sample: &mut DVec3) -> RayFilterFlags {
        if !(origin.iter().all(|v| v.is_finite()) && sample.iter().all(|v| v.is_finite())) {
            return RayFilterFlags::REJECT_RAY;
        }

        let length = (*sample - *origin).norm();
        if length < self.min_range {
            return RayFilterFlags::REJECT_RAY;
        }

        if self.max_range > 0.0 && length > self.max_range {
            let direction = (*sample - *origin) / length;
            *sample = *origin + direction * self.max_range;
            return RayFilterFlags::CLIPPED_END | RayFilterFlags::REJECT_SAMPLE;
        }

        RayFilterFlags::empty()
    }
}

// ████████╗███████╗███████╗████████╗███████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝
//    ██║   █████╗  ███████╗   ██║   ███████╗
//    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║
//    ██║   ███████╗███████║   ██║   ███████║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝
