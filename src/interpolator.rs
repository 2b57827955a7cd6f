use crate::error::ConfigurationError;

use nalgebra::Vector3;
use ndarray::ArrayView3;

// Continuous indices this close to a grid point are treated as on it, so
// quarter turns and identity grids sample voxels exactly.
const GRID_SNAP_TOLERANCE: f64 = 1e-6;

/// Voxel types that can be resampled.
pub trait Voxel: Copy + Send + Sync + 'static {
    fn to_f64(self) -> f64;
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_float_voxel {
    ($($t:ty),*) => {$(
        impl Voxel for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(value: f64) -> Self {
                value as $t
            }
        }
    )*};
}

macro_rules! impl_integer_voxel {
    ($($t:ty),*) => {$(
        impl Voxel for $t {
            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }
            #[inline]
            fn from_f64(value: f64) -> Self {
                // `as` saturates at the type's bounds.
                value.round_ties_even() as $t
            }
        }
    )*};
}

impl_float_voxel!(f32, f64);
impl_integer_voxel!(u8, u16, i16, i32);

impl Voxel for bool {
    #[inline]
    fn to_f64(self) -> f64 {
        if self { 1.0 } else { 0.0 }
    }
    #[inline]
    fn from_f64(value: f64) -> Self {
        value >= 0.5
    }
}

pub(crate) struct Interpolator;

impl Interpolator {
    /// Voxel counts after changing the spacing, keeping the physical extent.
    ///
    /// Fails when the new grid could not be allocated as one array.
    pub(crate) fn resampled_size(
        size: [usize; 3],
        old_spacing: &Vector3<f64>,
        new_spacing: &Vector3<f64>,
    ) -> Result<[usize; 3], ConfigurationError> {
        let too_large = || {
            ConfigurationError::ResampledSizeTooLarge([new_spacing.x, new_spacing.y, new_spacing.z])
        };
        let mut new_size = [0usize; 3];
        for axis in 0..3 {
            let scaled = size[axis] as f64 * old_spacing[axis] / new_spacing[axis];
            let scaled = scaled.round_ties_even();
            if !scaled.is_finite() || scaled >= isize::MAX as f64 {
                return Err(too_large());
            }
            new_size[axis] = (scaled as usize).max(1);
        }
        let fits = new_size
            .iter()
            .try_fold(1usize, |count, &n| count.checked_mul(n))
            .is_some_and(|count| count <= isize::MAX as usize);
        if !fits {
            return Err(too_large());
        }
        Ok(new_size)
    }

    #[inline]
    fn snap(value: f64) -> f64 {
        let nearest = value.round_ties_even();
        if (value - nearest).abs() < GRID_SNAP_TOLERANCE {
            nearest
        } else {
            value
        }
    }

    /// Nearest-neighbour sample at the continuous index `(i, j, k)`, or `None`
    /// outside the volume. Volumes are laid out `(slice, row, column)`.
    #[inline]
    pub(crate) fn nearest<T: Voxel>(volume: &ArrayView3<'_, T>, index: &Vector3<f64>) -> Option<T> {
        let (depth, height, width) = volume.dim();
        let i = Self::snap(index.x).round_ties_even();
        let j = Self::snap(index.y).round_ties_even();
        let k = Self::snap(index.z).round_ties_even();
        let inside = |v: f64, n: usize| v >= 0.0 && v < n as f64;
        if !(inside(i, width) && inside(j, height) && inside(k, depth)) {
            return None;
        }
        Some(volume[[k as usize, j as usize, i as usize]])
    }

    /// Trilinear sample at the continuous index `(i, j, k)`.
    ///
    /// Indices within half a voxel outside the grid take the edge value.
    /// Anything further out is `None`.
    #[inline]
    pub(crate) fn trilinear<T: Voxel>(
        volume: &ArrayView3<'_, T>,
        index: &Vector3<f64>,
    ) -> Option<T> {
        let (depth, height, width) = volume.dim();
        let x = Self::snap(index.x);
        let y = Self::snap(index.y);
        let z = Self::snap(index.z);
        let inside = |v: f64, n: usize| v >= -0.5 && v <= n as f64 - 0.5;
        if !(inside(x, width) && inside(y, height) && inside(z, depth)) {
            return None;
        }

        let corners = |v: f64, n: usize| {
            let floor = v.floor();
            let lo = (floor.max(0.0) as usize).min(n - 1);
            let hi = ((floor + 1.0).max(0.0) as usize).min(n - 1);
            (lo, hi, v - floor)
        };
        let (x0, x1, dx) = corners(x, width);
        let (y0, y1, dy) = corners(y, height);
        let (z0, z1, dz) = corners(z, depth);

        // Exact grid points need no blending.
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return Some(volume[[z0, y0, x0]]);
        }

        let v = |k: usize, j: usize, i: usize| volume[[k, j, i]].to_f64();
        let lerp = |a: f64, b: f64, t: f64| a.mul_add(1.0 - t, b * t);

        let c00 = lerp(v(z0, y0, x0), v(z0, y0, x1), dx);
        let c01 = lerp(v(z0, y1, x0), v(z0, y1, x1), dx);
        let c10 = lerp(v(z1, y0, x0), v(z1, y0, x1), dx);
        let c11 = lerp(v(z1, y1, x0), v(z1, y1, x1), dx);
        let c0 = lerp(c00, c01, dy);
        let c1 = lerp(c10, c11, dy);

        Some(T::from_f64(lerp(c0, c1, dz)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    fn ramp() -> Array3<f32> {
        Array3::from_shape_fn((2, 3, 4), |(k, j, i)| (100 * k + 10 * j + i) as f32)
    }

    #[test]
    fn test_resampled_size_rounds_half_to_even() {
        let size = Interpolator::resampled_size(
            [20, 5, 10],
            &Vector3::new(2.0, 1.0, 5.0),
            &Vector3::new(1.0, 2.0, 2.5),
        );
        // 5 * 1 / 2 = 2.5 rounds to 2.
        assert_eq!(size, Ok([40, 2, 20]));
    }

    #[test]
    fn test_resampled_size_rejects_unallocatable_grids() {
        let tiny = Vector3::new(1e-7, 1e-7, 1e-7);
        assert_eq!(
            Interpolator::resampled_size([4, 4, 4], &Vector3::new(1.0, 1.0, 1.0), &tiny),
            Err(ConfigurationError::ResampledSizeTooLarge([1e-7; 3]))
        );

        let subnormal = Vector3::new(1.0, 1.0, f64::MIN_POSITIVE);
        assert!(
            Interpolator::resampled_size([4, 4, 4], &Vector3::new(1.0, 1.0, 1.0), &subnormal)
                .is_err()
        );
    }

    #[test]
    fn test_trilinear_on_grid_points_is_exact() {
        let volume = ramp();
        let value = Interpolator::trilinear(&volume.view(), &Vector3::new(3.0, 2.0, 1.0));
        assert_eq!(value, Some(123.0));
    }

    #[test]
    fn test_trilinear_blends_linearly() {
        let volume = ramp();
        let value = Interpolator::trilinear(&volume.view(), &Vector3::new(1.5, 0.5, 0.5)).unwrap();
        assert_relative_eq!(value, 56.5, epsilon = 1e-5);
    }

    #[test]
    fn test_trilinear_edge_and_outside() {
        let volume = ramp();
        let edge = Interpolator::trilinear(&volume.view(), &Vector3::new(-0.4, 0.0, 0.0));
        assert_eq!(edge, Some(0.0));
        let outside = Interpolator::trilinear(&volume.view(), &Vector3::new(4.0, 0.0, 0.0));
        assert_eq!(outside, None);
    }

    #[test]
    fn test_nearest_keeps_labels() {
        let mut labels = Array3::from_elem((2, 2, 2), false);
        labels[[1, 1, 1]] = true;
        let view = labels.view();
        assert_eq!(Interpolator::nearest(&view, &Vector3::new(0.6, 0.6, 0.6)), Some(true));
        assert_eq!(Interpolator::nearest(&view, &Vector3::new(0.5, 0.5, 0.5)), Some(false));
        assert_eq!(Interpolator::nearest(&view, &Vector3::new(2.0, 0.0, 0.0)), None);
    }

    #[test]
    fn test_integer_voxels_round_and_saturate() {
        assert_eq!(u8::from_f64(2.5), 2);
        assert_eq!(u8::from_f64(300.0), 255);
        assert_eq!(i16::from_f64(-1000.4), -1000);
    }
}
