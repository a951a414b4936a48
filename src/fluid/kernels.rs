//! SPH smoothing kernels.
//!
//! Two kernels drive the solver:
//!
//! - **Poly6** over the normalized distance `r = |x| / H`, for density
//! - **Spiky gradient** over the raw separation vector, for constraint gradients
//!
//! Both vanish outside their support. Neither kernel is scaled by particle mass.

use std::f32::consts::PI;

use bevy::prelude::*;

/// Normalization constant of the poly6 kernel on the unit sphere.
pub const POLY6_COEFFICIENT: f32 = 315.0 / (64.0 * PI);

/// Separations shorter than this produce no gradient.
pub const GRADIENT_EPSILON: f32 = 1e-4;

/// Kernel functions for SPH.
pub struct SphKernels;

impl SphKernels {
    /// Poly6 density kernel of a normalized distance `r`.
    ///
    /// Strictly decreasing on `[0, 1)` and zero for `r >= 1`.
    #[inline]
    pub fn density(r: f32) -> f32 {
        if r >= 1.0 {
            return 0.0;
        }
        let t = 1.0 - r * r;
        POLY6_COEFFICIENT * t * t * t
    }

    /// Coefficient of the spiky gradient for support `h`.
    #[inline]
    pub fn spiky_gradient_coefficient(h: f32) -> f32 {
        // 45 / (π h⁶): π is not raised to the sixth power.
        45.0 / (PI * h.powi(6))
    }

    /// Spiky gradient of the separation `pi - pj` with support `h`.
    ///
    /// Zero when the separation is longer than `h` or shorter than
    /// [`GRADIENT_EPSILON`]. Swapping the arguments negates the result.
    #[inline]
    pub fn gradient(pi: Vec3, pj: Vec3, h: f32) -> Vec3 {
        Self::gradient_with_coefficient(pi, pj, h, Self::spiky_gradient_coefficient(h))
    }

    /// [`gradient`](Self::gradient) with the coefficient hoisted out of a loop.
    #[inline]
    pub fn gradient_with_coefficient(pi: Vec3, pj: Vec3, h: f32, coefficient: f32) -> Vec3 {
        let r = pi - pj;
        let len = r.length();
        if len > h || len < GRADIENT_EPSILON {
            return Vec3::ZERO;
        }
        let falloff = 1.0 - len;
        r * coefficient * falloff * falloff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_density_kernel_peak_and_support() {
        assert!((SphKernels::density(0.0) - POLY6_COEFFICIENT).abs() < 1e-6);
        assert_eq!(SphKernels::density(1.0), 0.0);
        assert_eq!(SphKernels::density(2.5), 0.0);
        assert!(SphKernels::density(0.5) > 0.0);
    }

    #[test]
    fn test_density_kernel_decreases() {
        let mut previous = SphKernels::density(0.0);
        for i in 1..100 {
            let value = SphKernels::density(i as f32 / 100.0);
            assert!(value < previous);
            previous = value;
        }
    }

    #[test]
    fn test_spiky_coefficient_value() {
        // h = 0.5: 45 / (π / 64)
        let expected = 45.0 * 64.0 / PI;
        let coefficient = SphKernels::spiky_gradient_coefficient(0.5);
        assert!((coefficient - expected).abs() / expected < 1e-5);
    }

    #[test]
    fn test_gradient_zero_outside_support() {
        let h = 0.012;
        assert_eq!(SphKernels::gradient(Vec3::ZERO, Vec3::X * 0.02, h), Vec3::ZERO);
        assert_eq!(
            SphKernels::gradient(Vec3::ZERO, Vec3::X * 0.5e-4, h),
            Vec3::ZERO
        );
        assert_eq!(SphKernels::gradient(Vec3::ONE, Vec3::ONE, h), Vec3::ZERO);
    }

    #[test]
    fn test_gradient_points_away_from_neighbor() {
        let h = 1.0;
        let grad = SphKernels::gradient(Vec3::new(0.5, 0.0, 0.0), Vec3::ZERO, h);
        assert!(grad.x > 0.0);
        assert_eq!(grad.y, 0.0);
        assert_eq!(grad.z, 0.0);

        let expected = 0.5 * SphKernels::spiky_gradient_coefficient(h) * 0.25;
        assert!((grad.x - expected).abs() < 1e-5);
    }

    #[test]
    fn test_gradient_antisymmetric() {
        let a = Vec3::new(0.001, 0.002, -0.003);
        let b = Vec3::new(-0.002, 0.004, 0.001);
        let h = 0.012;
        let ab = SphKernels::gradient(a, b, h);
        let ba = SphKernels::gradient(b, a, h);
        assert!(ab.length() > 0.0);
        assert!((ab + ba).length() <= 1e-6 * ab.length());
    }
}
