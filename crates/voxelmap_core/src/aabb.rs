use crate::DVec3;

/// An axis-aligned bounding box in world coordinates.
///
/// The zero box (`min == max == 0`) is used as "no constraint" by callers that accept an optional
/// culling volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub const ZERO: Self = Self {
        min: DVec3::new(0.0, 0.0, 0.0),
        max: DVec3::new(0.0, 0.0, 0.0),
    };

    #[inline]
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn diagonal(&self) -> DVec3 {
        self.max - self.min
    }

    /// True when the box has positive extent on `axis`.
    #[inline]
    pub fn constrains_axis(&self, axis: usize) -> bool {
        self.diagonal()[axis] > 0.0
    }

    #[inline]
    pub fn contains(&self, p: DVec3) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] && p[i] <= self.max[i])
    }

    /// Grow the box to cover `p`.
    pub fn expand(&mut self, p: DVec3) {
        for i in 0..3 {
            self.min[i] = self.min[i].min(p[i]);
            self.max[i] = self.max[i].max(p[i]);
        }
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
    fn contains_is_inclusive() {
        let b = Aabb::new(DVec3::new(-1.0, -1.0, -1.0), DVec3::new(1.0, 1.0, 1.0));
        assert!(b.contains(DVec3::new(1.0, 0.0, -1.0)));
        assert!(!b.contains(DVec3::new(1.0001, 0.0, 0.0)));
    }

    #[test]
    fn zero_box_constrains_nothing() {
        assert!(!Aabb::ZERO.constrains_axis(0));
        assert!(!Aabb::ZERO.constrains_axis(1));
        assert!(!Aabb::ZERO.constrains_axis(2));
    }

    #[test]
    fn expand_covers_new_points() {
        let mut b = Aabb::new(DVec3::zeros(), DVec3::zeros());
        b.expand(DVec3::new(2.0, -3.0, 0.5));
        assert!(b.contains(DVec3::new(1.0, -1.0, 0.25)));
    }
}
