use crate::DVec3;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A signed primary axis. Consumers that collapse the 3D grid along one direction (heightmap
/// extraction, column searches) use this to identify "up".
///
/// The discriminants are chosen so that non-negative values index XYZ directly while negative
/// values encode the reversed directions, which keeps the value serialisable as a small signed
/// integer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[repr(i8)]
pub enum UpAxis {
    NegZ = -3,
    NegY = -2,
    NegX = -1,
    X = 0,
    Y = 1,
    Z = 2,
}

impl UpAxis {
    /// Recover an `UpAxis` from its serialised discriminant.
    pub fn from_id(id: i8) -> Option<Self> {
        match id {
            -3 => Some(Self::NegZ),
            -2 => Some(Self::NegY),
            -1 => Some(Self::NegX),
            0 => Some(Self::X),
            1 => Some(Self::Y),
            2 => Some(Self::Z),
            _ => None,
        }
    }

    /// The serialisable discriminant.
    #[inline]
    pub fn id(self) -> i8 {
        self as i8
    }

    /// Index of the vertical axis in `[0, 2]`, ignoring direction.
    #[inline]
    pub fn index(self) -> usize {
        let id = self as i8;
        if id >= 0 {
            id as usize
        } else {
            (-id - 1) as usize
        }
    }

    /// True for `X`, `Y` and `Z`; false for the reversed directions.
    #[inline]
    pub fn is_positive(self) -> bool {
        (self as i8) >= 0
    }

    /// The unit normal pointing "up".
    pub fn normal(self) -> DVec3 {
        let mut n = DVec3::zeros();
        n[self.index()] = if self.is_positive() { 1.0 } else { -1.0 };
        n
    }

    /// Index of the first axis lying in the collapse plane.
    #[inline]
    pub fn surface_index_a(self) -> usize {
        (self.index() + 1) % 3
    }

    /// Index of the second axis lying in the collapse plane.
    #[inline]
    pub fn surface_index_b(self) -> usize {
        (self.index() + 2) % 3
    }

    /// Unit vector along the first surface axis.
    pub fn surface_normal_a(self) -> DVec3 {
        let mut n = DVec3::zeros();
        n[self.surface_index_a()] = 1.0;
        n
    }

    /// Unit vector along the second surface axis.
    pub fn surface_normal_b(self) -> DVec3 {
        let mut n = DVec3::zeros();
        n[self.surface_index_b()] = 1.0;
        n
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
    fn axis_indices_ignore_direction() {
        assert_eq!(UpAxis::X.index(), 0);
        assert_eq!(UpAxis::NegX.index(), 0);
        assert_eq!(UpAxis::Y.index(), 1);
        assert_eq!(UpAxis::NegY.index(), 1);
        assert_eq!(UpAxis::Z.index(), 2);
        assert_eq!(UpAxis::NegZ.index(), 2);
    }

    #[test]
    fn normals_point_along_the_signed_axis() {
        assert_eq!(UpAxis::Z.normal(), DVec3::new(0.0, 0.0, 1.0));
        assert_eq!(UpAxis::NegZ.normal(), DVec3::new(0.0, 0.0, -1.0));
        assert_eq!(UpAxis::NegX.normal(), DVec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn surface_axes_span_the_collapse_plane() {
        for axis in [UpAxis::X, UpAxis::Y, UpAxis::Z, UpAxis::NegX, UpAxis::NegY, UpAxis::NegZ] {
            let a = axis.surface_index_a();
            let b = axis.surface_index_b();
            assert_ne!(a, axis.index());
            assert_ne!(b, axis.index());
            assert_ne!(a, b);
        }
    }

    #[test]
    fn id_round_trip() {
        for axis in [UpAxis::X, UpAxis::Y, UpAxis::Z, UpAxis::NegX, UpAxis::NegY, UpAxis::NegZ] {
            assert_eq!(UpAxis::from_id(axis.id()), Some(axis));
        }
        assert_eq!(UpAxis::from_id(3), None);
    }
}
