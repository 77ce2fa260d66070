//! Packed storage for per-voxel incident directions.
//!
//! A unit direction is quantised into one `u32`: 15 bits each for X and Y, bit 30 marking that a
//! normal has been stored and bit 31 carrying the sign of Z. Z's magnitude is recovered from the
//! unit-length constraint.

use nalgebra::Vector3;

const QUANT: f32 = 16383.0;
const MASK: u32 = 0x3FFF;
const SHIFT_X: u32 = 0;
const SHIFT_Y: u32 = 15;
const SET_BIT: u32 = 1 << 30;
const SIGN_BIT_Z: u32 = 1 << 31;

/// Decode a packed incident direction. Returns zero when no normal has been stored.
pub fn decode_normal(packed: u32) -> Vector3<f32> {
    let mut x = 2.0 * (((packed >> SHIFT_X) & MASK) as f32 / QUANT) - 1.0;
    let mut y = 2.0 * (((packed >> SHIFT_Y) & MASK) as f32 / QUANT) - 1.0;

    x = x.clamp(-1.0, 1.0);
    y = y.clamp(-1.0, 1.0);
    let z2 = (1.0 - (x * x + y * y)).clamp(-1.0, 1.0);

    if packed & SET_BIT == 0 {
        return Vector3::zeros();
    }

    let mut z = z2.max(0.0).sqrt();
    if packed & SIGN_BIT_Z != 0 {
        z = -z;
    }

    Vector3::new(x, y, z)
}

/// Encode a normalised direction. The zero vector encodes as "no normal stored".
pub fn encode_normal(normal: Vector3<f32>) -> u32 {
    let mut packed = 0u32;

    // Map [-1, 1] onto [0, 1] before quantising.
    let x = 0.5 * (normal.x.clamp(-1.0, 1.0) + 1.0);
    let y = 0.5 * (normal.y.clamp(-1.0, 1.0) + 1.0);

    packed |= ((x * QUANT) as u32 & MASK) << SHIFT_X;
    packed |= ((y * QUANT) as u32 & MASK) << SHIFT_Y;

    if normal.z < 0.0 {
        packed |= SIGN_BIT_Z;
    }
    if normal.x != 0.0 || normal.y != 0.0 || normal.z != 0.0 {
        packed |= SET_BIT;
    }

    packed
}

/// Fold one incident ray into the running mean direction, keeping the result unit length.
pub fn update_normal(normal: Vector3<f32>, incident_ray: Vector3<f32>, sample_count: u32) -> Vector3<f32> {
    // A zero normal means nothing has been accumulated yet, whatever the count says.
    let sample_count = if normal != Vector3::zeros() { sample_count } else { 0 };
    let one_on_count_plus_one = 1.0 / (sample_count as f32 + 1.0);

    let length2 = incident_ray.norm_squared();
    let incident = if length2 > 1e-6 {
        incident_ray / length2.sqrt()
    } else {
        Vector3::zeros()
    };

    let mut updated = normal + (incident - normal) * one_on_count_plus_one;
    let length2 = updated.norm_squared();
    updated *= if length2 > 1e-6 { 1.0 / length2.sqrt() } else { 0.0 };
    updated
}

/// [`update_normal`] on the packed representation.
pub fn update_packed_normal(packed: u32, incident_ray: Vector3<f32>, sample_count: u32) -> u32 {
    encode_normal(update_normal(decode_normal(packed), incident_ray, sample_count))
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
    use approx::assert_relative_eq;

    #[test]
    fn zero_encodes_as_unset() {
        let packed = encode_normal(Vector3::zeros());
        assert_eq!(packed & SET_BIT, 0);
        assert_eq!(decode_normal(packed), Vector3::zeros());
    }

    #[test]
    fn encode_decode_round_trip() {
        let directions = [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(0.0, -1.0, 0.0),
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(0.577_35, 0.577_35, 0.577_35),
            Vector3::new(-0.267_26, 0.534_52, -0.801_78),
        ];
        for direction in directions {
            let decoded = decode_normal(encode_normal(direction));
            for axis in 0..3 {
                assert_relative_eq!(decoded[axis], direction[axis], epsilon = 2e-4);
            }
        }
    }

    #[test]
    fn first_update_stores_the_incident_direction() {
        let packed = update_packed_normal(0, Vector3::new(0.0, 0.0, 4.0), 0);
        let decoded = decode_normal(packed);
        assert_relative_eq!(decoded.z, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn updates_average_toward_new_rays() {
        let mut packed = update_packed_normal(0, Vector3::new(1.0, 0.0, 0.0), 0);
        for count in 1..10 {
            packed = update_packed_normal(packed, Vector3::new(0.0, 1.0, 0.0), count);
        }
        let decoded = decode_normal(packed);
        assert!(decoded.y > decoded.x);
        assert_relative_eq!(decoded.norm(), 1.0, epsilon = 1e-3);
    }
}
