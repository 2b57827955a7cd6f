//! Display resampling: rotation, mirroring and spacing changes about the
//! volume center, plus resampling onto a reference grid.

use crate::enums::{Interpolation, Rotation};
use crate::error::{ConfigurationError, Error};
use crate::geometry::VolumeGeometry;
use crate::interpolator::{Interpolator, Voxel};

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, ArrayView3, ArrayViewD, Ix3, Zip};
use serde::Deserialize;
use tracing::debug;

/// User-facing display transform.
///
/// Flip flags are expressed in the displayed frame: after a 90° or 270°
/// rotation the left-right and anterior-posterior flips act on swapped axes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisplayTransformParams {
    pub spacing: Option<[f64; 3]>,
    pub rotation: Rotation,
    pub flip_lr: bool,
    pub flip_ap: bool,
    pub flip_si: bool,
}

impl DisplayTransformParams {
    pub fn new(
        spacing: Option<[f64; 3]>,
        rotation_degrees: i32,
        flips: [bool; 3],
    ) -> Result<Self, ConfigurationError> {
        let params = Self {
            spacing,
            rotation: Rotation::from_degrees(rotation_degrees)?,
            flip_lr: flips[0],
            flip_ap: flips[1],
            flip_si: flips[2],
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        match self.spacing {
            Some(spacing) if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) => {
                Err(ConfigurationError::NonPositiveSpacing(spacing))
            }
            _ => Ok(()),
        }
    }

    /// `R · F`, the matrix applied on the left of the source direction.
    pub fn transformation_matrix(&self) -> Matrix3<f64> {
        let (flip_x, flip_y) = if self.rotation.swaps_in_plane_axes() {
            (self.flip_ap, self.flip_lr)
        } else {
            (self.flip_lr, self.flip_ap)
        };
        let sign = |flip: bool| if flip { -1.0 } else { 1.0 };
        let flips = Matrix3::from_diagonal(&Vector3::new(
            sign(flip_x),
            sign(flip_y),
            sign(self.flip_si),
        ));
        self.rotation.matrix() * flips
    }

    /// True when the parameters leave `geometry` unchanged.
    pub fn is_identity_for(&self, geometry: &VolumeGeometry) -> bool {
        let same_spacing = self
            .spacing
            .is_none_or(|s| Vector3::from(s) == *geometry.spacing());
        same_spacing
            && self.rotation == Rotation::None
            && !(self.flip_lr || self.flip_ap || self.flip_si)
    }
}

/// Sampling options chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ResampleOptions {
    pub interpolation: Interpolation,
    /// Value written where the output grid falls outside the source volume.
    pub fill_value: f64,
}

impl Default for ResampleOptions {
    fn default() -> Self {
        Self {
            interpolation: Interpolation::Linear,
            fill_value: 0.0,
        }
    }
}

impl ResampleOptions {
    /// Nearest-neighbour sampling with a zero fill, for masks and labels.
    pub fn labels() -> Self {
        Self {
            interpolation: Interpolation::Nearest,
            fill_value: 0.0,
        }
    }
}

/// Resampled voxels and the geometry they live on.
#[derive(Debug, Clone, PartialEq)]
pub struct Resampled<T> {
    pub data: Array3<T>,
    pub geometry: VolumeGeometry,
}

pub struct VolumeResampler;

impl VolumeResampler {
    /// Geometry produced by applying `params` to `geometry`.
    ///
    /// The physical point at the center of the source grid stays at the
    /// center of the new grid.
    pub fn output_geometry(
        geometry: &VolumeGeometry,
        params: &DisplayTransformParams,
    ) -> Result<VolumeGeometry, Error> {
        params.validate()?;

        let direction = params.transformation_matrix() * geometry.direction();
        let (size, spacing) = match params.spacing {
            Some(spacing) => {
                let spacing = Vector3::from(spacing);
                let size =
                    Interpolator::resampled_size(geometry.size(), geometry.spacing(), &spacing)?;
                (size, spacing)
            }
            None => (geometry.size(), *geometry.spacing()),
        };

        let center = geometry.center();
        let center_index = Vector3::new(
            (size[0] as f64 - 1.0) / 2.0,
            (size[1] as f64 - 1.0) / 2.0,
            (size[2] as f64 - 1.0) / 2.0,
        );
        let origin = center.coords - direction * Matrix3::from_diagonal(&spacing) * center_index;

        Ok(VolumeGeometry::new(
            size,
            origin.into(),
            spacing.into(),
            direction,
        )?)
    }

    /// Applies a display transform to a volume.
    pub fn resample<T: Voxel>(
        source: ArrayView3<'_, T>,
        geometry: &VolumeGeometry,
        params: &DisplayTransformParams,
        options: &ResampleOptions,
    ) -> Result<Resampled<T>, Error> {
        Self::check_shape(&source, geometry)?;

        if params.is_identity_for(geometry) {
            return Ok(Resampled {
                data: source.to_owned(),
                geometry: geometry.clone(),
            });
        }

        let target = Self::output_geometry(geometry, params)?;
        debug!(
            size = ?target.size(),
            spacing = ?target.spacing(),
            rotation = params.rotation.degrees(),
            orientation = %target.orientation_code(),
            "Resampling volume"
        );
        let data = Self::pull(&source, geometry, &target, options)?;
        Ok(Resampled {
            data,
            geometry: target,
        })
    }

    /// Same as [`VolumeResampler::resample`] for arrays of unknown
    /// dimensionality. Anything but a 3D array is rejected.
    pub fn resample_dyn<T: Voxel>(
        source: ArrayViewD<'_, T>,
        geometry: &VolumeGeometry,
        params: &DisplayTransformParams,
        options: &ResampleOptions,
    ) -> Result<Resampled<T>, Error> {
        let ndim = source.ndim();
        let source = source
            .into_dimensionality::<Ix3>()
            .map_err(|_| ConfigurationError::NotThreeDimensional(ndim))?;
        Self::resample(source, geometry, params, options)
    }

    /// Resamples a volume onto another grid, e.g. a dose grid onto the CT.
    pub fn resample_to_reference<T: Voxel>(
        source: ArrayView3<'_, T>,
        source_geometry: &VolumeGeometry,
        reference: &VolumeGeometry,
        options: &ResampleOptions,
    ) -> Result<Array3<T>, Error> {
        Self::check_shape(&source, source_geometry)?;
        if source_geometry == reference {
            return Ok(source.to_owned());
        }
        Self::pull(&source, source_geometry, reference, options)
    }

    fn check_shape<T>(source: &ArrayView3<'_, T>, geometry: &VolumeGeometry) -> Result<(), Error> {
        if source.dim() != geometry.shape() {
            return Err(ConfigurationError::ShapeMismatch {
                expected: geometry.shape(),
                actual: source.dim(),
            }
            .into());
        }
        Ok(())
    }

    /// Fills every voxel of `target` by sampling the source at the same
    /// physical location.
    fn pull<T: Voxel>(
        source: &ArrayView3<'_, T>,
        source_geometry: &VolumeGeometry,
        target: &VolumeGeometry,
        options: &ResampleOptions,
    ) -> Result<Array3<T>, Error> {
        let source_transform = source_geometry.transform()?;
        let target_transform = target.transform()?;

        // Target index -> source continuous index in one affine step.
        let to_source = source_transform.physical_to_index_matrix();
        let linear = to_source * target_transform.index_to_physical_matrix();
        let offset = to_source * (target.origin() - source_geometry.origin());

        let fill = T::from_f64(options.fill_value);
        let mut output = Array3::from_elem(target.shape(), fill);
        let interpolation = options.interpolation;

        Zip::indexed(&mut output).par_for_each(|(k, j, i), value| {
            let index = linear * Vector3::new(i as f64, j as f64, k as f64) + offset;
            let sample = match interpolation {
                Interpolation::Linear => Interpolator::trilinear(source, &index),
                Interpolation::Nearest => Interpolator::nearest(source, &index),
            };
            if let Some(sample) = sample {
                *value = sample;
            }
        });

        Ok(output)
    }
}
