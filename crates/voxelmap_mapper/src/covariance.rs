//! The NDT voxel kernel: a packed covariance square root per voxel, updated on hits by a
//! modified Gram-Schmidt decomposition and consulted on misses for the NDT-OM probability
//! adjustment of Saarinen et al., "3D normal distributions transform occupancy maps" (2013).
//!
//! The kernel is written against fixed-size scalar and vector arithmetic only and performs no
//! allocation, keeping its shape portable to batch back-ends.

use bytemuck::{Pod, Zeroable};
use nalgebra::Matrix3;
use voxelmap_core::DVec3;

/// The packed lower-triangular square root `C` of a voxel's 3×3 covariance `P = C·Cᵀ`.
///
/// Storage order within the triangle:
///
/// ```text
/// 0 .  .
/// 1 2  .
/// 3 4  5
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct CovarianceVoxel {
    pub sqrt_cov: [f32; 6],
}

impl CovarianceVoxel {
    /// Reset to `sensor_noise · I`, the square root of a covariance of `sensor_noise² · I`.
    ///
    /// Seeding with the sensor noise keeps the triangular solves in the miss path away from a
    /// division by zero when all samples lie on a perfect plane.
    pub fn initialise(&mut self, sensor_noise: f32) {
        self.sqrt_cov = [sensor_noise, 0.0, sensor_noise, 0.0, 0.0, sensor_noise];
    }

    /// Solve `C·x = y` for `x` by forward substitution on the packed triangle.
    pub fn solve_triangular(&self, y: DVec3) -> DVec3 {
        let c = &self.sqrt_cov;
        let x0 = y[0] / f64::from(c[0]);
        let x1 = (y[1] - f64::from(c[1]) * x0) / f64::from(c[2]);
        let x2 = (y[2] - f64::from(c[3]) * x0 - f64::from(c[4]) * x1) / f64::from(c[5]);
        DVec3::new(x0, x1, x2)
    }

    /// The unpacked square root matrix `C`.
    pub fn sqrt_matrix(&self) -> Matrix3<f64> {
        let c = &self.sqrt_cov;
        Matrix3::new(
            f64::from(c[0]),
            0.0,
            0.0,
            f64::from(c[1]),
            f64::from(c[2]),
            0.0,
            f64::from(c[3]),
            f64::from(c[4]),
            f64::from(c[5]),
        )
    }

    /// The full covariance matrix `P = C·Cᵀ`.
    pub fn covariance_matrix(&self) -> Matrix3<f64> {
        let c = self.sqrt_matrix();
        c * c.transpose()
    }

    /// Estimate the distribution's surface normal: the eigenvector belonging to the smallest
    /// eigenvalue of `P`.
    pub fn estimate_primary_normal(&self) -> DVec3 {
        let eigen = self.covariance_matrix().symmetric_eigen();
        let mut smallest = 0;
        for i in 1..3 {
            if eigen.eigenvalues[i] < eigen.eigenvalues[smallest] {
                smallest = i;
            }
        }
        let normal = eigen.eigenvectors.column(smallest);
        DVec3::new(normal[0], normal[1], normal[2])
    }

    /// Eigenvalues of `P`, unsorted.
    pub fn eigenvalues(&self) -> DVec3 {
        self.covariance_matrix().symmetric_eigen().eigenvalues
    }
}

/// Dot product of the j-th and k-th columns of the augmented square-root matrix.
///
/// The matrix is 4×3, packed as below, where `z` is a non-represented zero:
///
/// ```text
/// 0 1 3
/// z 2 4
/// z z 5
/// 6 7 8
/// ```
fn packed_dot(a: &[f64; 9], j: usize, k: usize) -> f64 {
    const COL_FIRST_EL: [usize; 3] = [0, 1, 3];
    let indj = COL_FIRST_EL[j];
    let indk = COL_FIRST_EL[k];
    let m = j.min(k);
    let mut d = a[6 + k] * a[6 + j];
    for i in 0..=m {
        d += a[indj + i] * a[indk + i];
    }
    d
}

/// Build the augmented matrix whose Gram product is the target covariance
/// `n/(n+1)·P + n/(n+1)²·(z−μ)(z−μ)ᵀ`: the scaled triangle in rows 0-2 and the scaled
/// sample-to-mean difference in row 3.
fn unpack_covariance(cov: &CovarianceVoxel, point_count: u32, sample_to_mean: DVec3) -> [f64; 9] {
    let one_on_num_pt_plus_one = 1.0 / (f64::from(point_count) + 1.0);
    let sc_1 = if point_count > 0 {
        (f64::from(point_count) * one_on_num_pt_plus_one).sqrt()
    } else {
        1.0
    };
    let sc_2 = one_on_num_pt_plus_one * f64::from(point_count).sqrt();

    let mut matrix = [0.0; 9];
    for i in 0..6 {
        matrix[i] = sc_1 * f64::from(cov.sqrt_cov[i]);
    }
    matrix[6] = sc_2 * sample_to_mean[0];
    matrix[7] = sc_2 * sample_to_mean[1];
    matrix[8] = sc_2 * sample_to_mean[2];
    matrix
}

/// Apply a hit to a voxel carrying covariance, updating the occupancy value and the packed
/// square root in place.
///
/// The covariance is reinitialised to `sensor_noise · I` whenever the voxel transitions from
/// unobserved to occupied, has no accumulated samples, or has decayed below
/// `reinitialise_threshold` with at least `reinitialise_sample_count` samples behind it. The
/// latter handles voxels vacated by transient objects: the old distribution no longer describes
/// what now occupies the voxel, and the sample count gate stops the reset from retriggering while
/// the value oscillates around the threshold.
///
/// Returns true when the covariance was reinitialised; the caller must then restart the voxel's
/// mean accumulation before folding in the sample.
#[allow(clippy::too_many_arguments)]
pub fn hit_with_covariance(
    cov: &mut CovarianceVoxel,
    value: &mut f32,
    sample: DVec3,
    voxel_mean: DVec3,
    point_count: u32,
    hit_value: f32,
    unobserved_value: f32,
    sensor_noise: f32,
    reinitialise_threshold: f32,
    reinitialise_sample_count: u32,
) -> bool {
    let initial_value = *value;
    let was_uncertain = initial_value == unobserved_value;
    let initialised_covariance = was_uncertain
        || point_count == 0
        || (initial_value < reinitialise_threshold && point_count >= reinitialise_sample_count);
    if initialised_covariance {
        cov.initialise(sensor_noise);
        *value = hit_value;
    } else {
        *value += hit_value;
    }

    // The covariance update is applied directly on the square-root form. The augmented matrix A
    // satisfies AᵀA = P_new; a modified Gram-Schmidt decomposition extracts the new triangular
    // square root. Reference: Maybeck 1978, Stochastic Models, Estimation and Control, vol 1,
    // p381.
    let point_count = if initialised_covariance { 0 } else { point_count };
    let sample_to_mean = sample - voxel_mean;
    let mut a = unpack_covariance(cov, point_count, sample_to_mean);

    for k in 0..3 {
        let ind1 = (k * (k + 3)) >> 1; // packed index of the (k, k) term
        let indk = ind1 - k; // packed index of (1, k)
        let ak = packed_dot(&a, k, k).sqrt();
        cov.sqrt_cov[ind1] = ak as f32;
        if ak > 0.0 {
            let aki = 1.0 / ak;
            for j in (k + 1)..3 {
                let indj = (j * (j + 1)) >> 1;
                let indkj = indj + k;
                let mut c = packed_dot(&a, j, k) * aki;
                cov.sqrt_cov[indkj] = c as f32;
                c *= aki;
                a[j + 6] -= c * a[k + 6];
                for l in 0..=k {
                    a[indj + l] -= c * a[indk + l];
                }
            }
        }
    }

    initialised_covariance
}

/// Apply a ray pass-through to a voxel carrying covariance (NDT-OM).
///
/// Voxels that are unobserved, free or hold fewer than `sample_threshold` samples fall back to
/// the standard miss rule. Otherwise the adjustment follows equation (24) of the paper: find the
/// maximum-likelihood point of the voxel's Gaussian along the sensor ray, evaluate the Gaussian
/// there and the sensor-noise Gaussian at the sample, and fold the resulting probability into the
/// voxel's log-odds. A non-finite result leaves the voxel unchanged.
///
/// Returns the maximum-likelihood point used for the adjustment (the voxel mean when the
/// standard rule applied).
#[allow(clippy::too_many_arguments)]
pub fn miss_ndt(
    cov: &CovarianceVoxel,
    value: &mut f32,
    sensor: DVec3,
    sample: DVec3,
    voxel_mean: DVec3,
    point_count: u32,
    unobserved_value: f32,
    miss_value: f32,
    sensor_noise: f32,
    sample_threshold: u32,
) -> DVec3 {
    if *value == unobserved_value {
        // First touch of the voxel. Apply the miss value as is.
        *value = miss_value;
        return voxel_mean;
    }

    if point_count < sample_threshold {
        // Re-enforcement of a free voxel, or too few points to resolve a Gaussian.
        *value += miss_value;
        return voxel_mean;
    }

    // x_ML = sensor + t·ℓ with t = −(a·b̂)/(a·a) for a = C⁻¹ℓ, b̂ = C⁻¹(sensor − μ), both via
    // triangular solves on the packed square root.
    let sensor_to_sample = sample - sensor;
    let sensor_ray = sensor_to_sample / sensor_to_sample.norm();
    let sensor_to_mean = sensor - voxel_mean;

    let a = cov.solve_triangular(sensor_ray);
    let b_norm = cov.solve_triangular(sensor_to_mean);

    let t = -a.dot(&b_norm) / a.dot(&a);
    let maximum_likelihood = sensor_ray * t + sensor;

    // Equation (22): the voxel Gaussian at x_ML.
    let p_x_ml_given_voxel =
        (-0.5 * cov.solve_triangular(maximum_likelihood - voxel_mean).norm_squared()).exp();

    // Equation (23): the sensor-noise Gaussian at the sample.
    let sensor_noise_variance = f64::from(sensor_noise) * f64::from(sensor_noise);
    let p_x_ml_given_sample =
        (-0.5 * (maximum_likelihood - sample).norm_squared() / sensor_noise_variance).exp();

    // Equation (24), with the scaling factor derived from the miss probability.
    let scaling_factor = 1.0 - 1.0 / (1.0 + f64::from(miss_value).exp());
    let probability_update = 0.5 - scaling_factor * p_x_ml_given_voxel * (1.0 - p_x_ml_given_sample);

    let adjustment = (probability_update / (1.0 - probability_update)).ln();
    if adjustment.is_finite() {
        *value += adjustment as f32;
    }

    maximum_likelihood
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

    const UNOBSERVED: f32 = f32::NEG_INFINITY;

    #[test]
    fn initialise_seeds_a_scaled_identity() {
        let mut cov = CovarianceVoxel::default();
        cov.initialise(0.05);
        assert_eq!(cov.sqrt_cov, [0.05, 0.0, 0.05, 0.0, 0.0, 0.05]);

        let p = cov.covariance_matrix();
        assert_relative_eq!(p[(0, 0)], 0.0025, epsilon = 1e-9);
        assert_relative_eq!(p[(1, 1)], 0.0025, epsilon = 1e-9);
        assert_relative_eq!(p[(2, 2)], 0.0025, epsilon = 1e-9);
        assert_relative_eq!(p[(0, 1)], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn solve_triangular_inverts_the_sqrt() {
        let mut cov = CovarianceVoxel::default();
        cov.sqrt_cov = [2.0, 0.5, 1.5, 0.25, -0.5, 1.0];
        let y = DVec3::new(1.0, -2.0, 0.5);
        let x = cov.solve_triangular(y);
        let back = cov.sqrt_matrix() * x;
        for axis in 0..3 {
            assert_relative_eq!(back[axis], y[axis], epsilon = 1e-12);
        }
    }

    #[test]
    fn first_hit_resets_to_sensor_noise() {
        let mut cov = CovarianceVoxel::default();
        let mut value = UNOBSERVED;
        let reinitialised = hit_with_covariance(
            &mut cov,
            &mut value,
            DVec3::new(0.1, 0.0, 0.0),
            DVec3::zeros(),
            0,
            0.85,
            UNOBSERVED,
            0.05,
            -1.1,
            10,
        );
        assert!(reinitialised);
        assert_eq!(value, 0.85);
        // With no accumulated samples the Gram-Schmidt pass returns the seeded identity exactly.
        assert_relative_eq!(cov.covariance_matrix()[(0, 0)], 0.0025, epsilon = 1e-9);
        assert_relative_eq!(cov.covariance_matrix()[(2, 2)], 0.0025, epsilon = 1e-9);
    }

    #[test]
    fn decayed_voxels_reinitialise_after_enough_samples() {
        let mut cov = CovarianceVoxel::default();
        cov.initialise(0.01);

        // Occupancy well below the reset threshold, plenty of samples: must reset.
        let mut value = -2.0;
        let reinitialised = hit_with_covariance(
            &mut cov,
            &mut value,
            DVec3::new(0.1, 0.0, 0.0),
            DVec3::zeros(),
            20,
            0.85,
            UNOBSERVED,
            0.05,
            -1.1,
            10,
        );
        assert!(reinitialised);
        assert_eq!(value, 0.85);

        // Same occupancy but too few samples: no reset.
        let mut cov = CovarianceVoxel::default();
        cov.initialise(0.01);
        let mut value = -2.0;
        let reinitialised = hit_with_covariance(
            &mut cov,
            &mut value,
            DVec3::new(0.1, 0.0, 0.0),
            DVec3::zeros(),
            5,
            0.85,
            UNOBSERVED,
            0.05,
            -1.1,
            10,
        );
        assert!(!reinitialised);
        assert_relative_eq!(value, -1.15, epsilon = 1e-6);
    }

    #[test]
    fn planar_samples_shape_the_covariance() {
        // Samples spread in the XY plane at z = 0. The accumulated covariance must become thin
        // along Z with its primary normal pointing up.
        let samples = [
            DVec3::new(0.05, 0.00, 0.0),
            DVec3::new(-0.05, 0.01, 0.0),
            DVec3::new(0.02, -0.05, 0.0),
            DVec3::new(-0.01, 0.05, 0.0),
            DVec3::new(0.04, 0.04, 0.0),
            DVec3::new(-0.04, -0.04, 0.0),
            DVec3::new(0.05, -0.02, 0.0),
            DVec3::new(-0.05, 0.03, 0.0),
            DVec3::new(0.00, -0.05, 0.0),
            DVec3::new(0.01, 0.05, 0.0),
        ];

        let mut cov = CovarianceVoxel::default();
        let mut value = UNOBSERVED;
        let mut mean = DVec3::zeros();
        let mut count = 0u32;
        for sample in samples {
            hit_with_covariance(
                &mut cov, &mut value, sample, mean, count, 0.85, UNOBSERVED, 0.05, -1.1, 40,
            );
            mean += (sample - mean) / f64::from(count + 1);
            count += 1;
        }

        let eigenvalues = cov.eigenvalues();
        let mut sorted = [eigenvalues[0], eigenvalues[1], eigenvalues[2]];
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

        // Two planar spreads near the sample variance, one thin direction well below them.
        assert!(sorted[2] > 4.0 * sorted[0]);
        assert!(sorted[1] > 1e-4 && sorted[2] < 5e-3);

        let normal = cov.estimate_primary_normal();
        assert!(normal[2].abs() > 0.99, "normal {:?} should align with Z", normal);
    }

    #[test]
    fn ndt_miss_falls_back_below_the_sample_threshold() {
        let cov = CovarianceVoxel::default();

        let mut value = UNOBSERVED;
        miss_ndt(
            &cov,
            &mut value,
            DVec3::zeros(),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::zeros(),
            0,
            UNOBSERVED,
            -0.4,
            0.05,
            4,
        );
        assert_eq!(value, -0.4);

        miss_ndt(
            &cov,
            &mut value,
            DVec3::zeros(),
            DVec3::new(2.0, 0.0, 0.0),
            DVec3::zeros(),
            2,
            UNOBSERVED,
            -0.4,
            0.05,
            4,
        );
        assert_relative_eq!(value, -0.8, epsilon = 1e-6);
    }

    #[test]
    fn ndt_miss_barely_erodes_a_voxel_the_ray_skims() {
        // The ray passes well to the side of the distribution: the maximum-likelihood point is
        // far from the mean, so p1 ≈ 0 and the update is close to log-odds of 0.5, i.e. nothing.
        let mut cov = CovarianceVoxel::default();
        cov.initialise(0.05);

        let mut value = 1.5f32;
        let mean = DVec3::new(0.0, 0.5, 0.0);
        miss_ndt(
            &cov,
            &mut value,
            DVec3::new(-5.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 0.0),
            mean,
            10,
            UNOBSERVED,
            -0.4,
            0.05,
            4,
        );
        assert_relative_eq!(value, 1.5, epsilon = 1e-3);
    }

    #[test]
    fn ndt_miss_erodes_a_voxel_the_ray_pierces() {
        // The ray passes straight through the distribution mean and ends far beyond it.
        let mut cov = CovarianceVoxel::default();
        cov.initialise(0.05);

        let mut value = 1.5f32;
        let before = value;
        let mean = DVec3::new(0.0, 0.0, 0.0);
        let ml = miss_ndt(
            &cov,
            &mut value,
            DVec3::new(-5.0, 0.0, 0.0),
            DVec3::new(5.0, 0.0, 0.0),
            mean,
            10,
            UNOBSERVED,
            -0.4,
            0.05,
            4,
        );
        assert!(value < before);
        // The maximum-likelihood point is the projection of the mean onto the ray.
        assert_relative_eq!(ml[0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(ml[1], 0.0, epsilon = 1e-9);
    }
}
