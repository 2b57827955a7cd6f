//! Volume geometry and the physical ↔ voxel-index affine mapping.
//!
//! Geometry follows the ITK/DICOM convention: an index `(i, j, k)` addresses
//! column, row and slice, and maps to the physical point
//! `P = O + D · diag(S) · (i, j, k)`. Arrays built from a geometry are laid out
//! as `(slice, row, column)`, see [`VolumeGeometry::shape`].

use crate::error::{GeometryError, ValidationError};

use nalgebra::{Matrix3, Point3, Vector3};
use ndarray::{Array1, Array2, ArrayView2};
use rayon::prelude::*;

/// A physical point in the patient frame, in millimetres.
pub type ContourPoint = Point3<f64>;

const SINGULAR_TOLERANCE: f64 = 1e-12;
const ORTHONORMAL_TOLERANCE: f64 = 1e-4;
// Below this many points the rayon split costs more than it saves.
const PARALLEL_POINT_THRESHOLD: usize = 4096;

/// Rounds a continuous index to the nearest voxel, ties to even.
///
/// Every component that turns continuous indices into voxels goes through
/// this function so boundary voxels are assigned the same way everywhere.
#[inline]
pub fn round_index(index: &Vector3<f64>) -> [i64; 3] {
    [
        index.x.round_ties_even() as i64,
        index.y.round_ties_even() as i64,
        index.z.round_ties_even() as i64,
    ]
}

/// Size, origin, spacing and direction of a voxel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeGeometry {
    size: [usize; 3],
    origin: Vector3<f64>,
    spacing: Vector3<f64>,
    direction: Matrix3<f64>,
}

impl VolumeGeometry {
    /// Builds a geometry, checking that every axis is non-empty, the spacing
    /// is strictly positive and the direction matrix is invertible.
    ///
    /// `size` is given in index order `(columns, rows, slices)`. The columns of
    /// `direction` are the physical unit vectors of those three axes.
    pub fn new(
        size: [usize; 3],
        origin: [f64; 3],
        spacing: [f64; 3],
        direction: Matrix3<f64>,
    ) -> Result<Self, GeometryError> {
        if size.contains(&0) {
            return Err(GeometryError::EmptySize(size));
        }
        if origin.iter().any(|v| !v.is_finite()) {
            return Err(GeometryError::NonFiniteOrigin(origin));
        }
        if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(GeometryError::NonPositiveSpacing(spacing));
        }
        let determinant = direction.determinant();
        if !determinant.is_finite() || determinant.abs() < SINGULAR_TOLERANCE {
            return Err(GeometryError::SingularDirection { determinant });
        }

        let geometry = Self {
            size,
            origin: Vector3::from(origin),
            spacing: Vector3::from(spacing),
            direction,
        };
        if !geometry.is_orthonormal() {
            tracing::debug!(?direction, "Direction matrix is not orthonormal");
        }
        Ok(geometry)
    }

    /// Identity-oriented geometry.
    pub fn axis_aligned(
        size: [usize; 3],
        origin: [f64; 3],
        spacing: [f64; 3],
    ) -> Result<Self, GeometryError> {
        Self::new(size, origin, spacing, Matrix3::identity())
    }

    /// Builds a geometry from 9 direction cosines in row-major order, the
    /// flattened layout used by ITK-style direction tuples.
    pub fn from_direction_cosines(
        size: [usize; 3],
        origin: [f64; 3],
        spacing: [f64; 3],
        cosines: &[f64],
    ) -> Result<Self, GeometryError> {
        if cosines.len() != 9 {
            return Err(GeometryError::DirectionArity {
                expected: 9,
                actual: cosines.len(),
            });
        }
        Self::new(size, origin, spacing, Matrix3::from_row_slice(cosines))
    }

    /// Builds a geometry from a DICOM `ImageOrientationPatient` value: the row
    /// and column direction cosines. The slice axis is their cross product.
    pub fn from_image_orientation(
        size: [usize; 3],
        origin: [f64; 3],
        spacing: [f64; 3],
        orientation: &[f64],
    ) -> Result<Self, GeometryError> {
        if orientation.len() != 6 {
            return Err(GeometryError::DirectionArity {
                expected: 6,
                actual: orientation.len(),
            });
        }
        let row_dir = Vector3::new(orientation[0], orientation[1], orientation[2]);
        let col_dir = Vector3::new(orientation[3], orientation[4], orientation[5]);
        let slice_dir = row_dir.cross(&col_dir);
        Self::new(
            size,
            origin,
            spacing,
            Matrix3::from_columns(&[row_dir, col_dir, slice_dir]),
        )
    }

    /// Number of voxels along `(columns, rows, slices)`.
    pub fn size(&self) -> [usize; 3] {
        self.size
    }

    /// Array shape `(slices, rows, columns)` of volumes and masks on this grid.
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.size[2], self.size[1], self.size[0])
    }

    pub fn origin(&self) -> &Vector3<f64> {
        &self.origin
    }

    pub fn spacing(&self) -> &Vector3<f64> {
        &self.spacing
    }

    pub fn direction(&self) -> &Matrix3<f64> {
        &self.direction
    }

    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// The affine part `A = D · diag(S)`.
    pub fn index_to_physical_matrix(&self) -> Matrix3<f64> {
        self.direction * Matrix3::from_diagonal(&self.spacing)
    }

    /// Continuous index of the volume center, `(size - 1) / 2`.
    pub fn center_index(&self) -> Vector3<f64> {
        Vector3::new(
            (self.size[0] as f64 - 1.0) / 2.0,
            (self.size[1] as f64 - 1.0) / 2.0,
            (self.size[2] as f64 - 1.0) / 2.0,
        )
    }

    /// Physical location of the volume center.
    pub fn center(&self) -> ContourPoint {
        Point3::from(self.origin + self.index_to_physical_matrix() * self.center_index())
    }

    pub fn is_orthonormal(&self) -> bool {
        let product = self.direction.transpose() * self.direction;
        (product - Matrix3::identity()).amax() < ORTHONORMAL_TOLERANCE
    }

    /// Whether an `(i, j, k)` index addresses a voxel inside the grid.
    pub fn contains_index(&self, index: [i64; 3]) -> bool {
        index
            .iter()
            .zip(self.size.iter())
            .all(|(&i, &n)| i >= 0 && (i as u64) < n as u64)
    }

    /// Coordinate transform for this geometry.
    pub fn transform(&self) -> Result<CoordinateTransform, GeometryError> {
        CoordinateTransform::new(&self.origin, &self.spacing, &self.direction)
    }

    /// Patient orientation code of the direction matrix, e.g. `"LPS"`.
    pub fn orientation_code(&self) -> String {
        orientation_code(&self.direction)
    }
}

/// Physical ↔ index mapping for one geometry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    origin: Vector3<f64>,
    index_to_physical: Matrix3<f64>,
    physical_to_index: Matrix3<f64>,
}

impl CoordinateTransform {
    pub fn new(
        origin: &Vector3<f64>,
        spacing: &Vector3<f64>,
        direction: &Matrix3<f64>,
    ) -> Result<Self, GeometryError> {
        if spacing.iter().any(|s| !s.is_finite() || *s == 0.0) {
            return Err(GeometryError::NonPositiveSpacing([spacing.x, spacing.y, spacing.z]));
        }
        let determinant = direction.determinant();
        if !determinant.is_finite() || determinant.abs() < SINGULAR_TOLERANCE {
            return Err(GeometryError::SingularDirection { determinant });
        }
        let index_to_physical = direction * Matrix3::from_diagonal(spacing);
        let physical_to_index = index_to_physical
            .try_inverse()
            .ok_or(GeometryError::SingularDirection { determinant })?;

        Ok(Self {
            origin: *origin,
            index_to_physical,
            physical_to_index,
        })
    }

    /// Unrounded index `A⁻¹ (P − O)`.
    #[inline]
    pub fn continuous_index(&self, point: &ContourPoint) -> Vector3<f64> {
        self.physical_to_index * (point.coords - self.origin)
    }

    /// Voxel index of a physical point. Not clamped to the volume.
    ///
    /// A NaN or infinite coordinate has no voxel and is rejected.
    #[inline]
    pub fn physical_to_index(&self, point: &ContourPoint) -> Result<[i64; 3], ValidationError> {
        if !is_finite_point(point) {
            return Err(ValidationError::NonFiniteCoordinate { index: 0 });
        }
        Ok(round_index(&self.continuous_index(point)))
    }

    /// Voxel indices of many points, in input order. The error names the
    /// first non-finite point.
    pub fn physical_to_indices(
        &self,
        points: &[ContourPoint],
    ) -> Result<Vec<[i64; 3]>, ValidationError> {
        if let Some(index) = points.iter().position(|p| !is_finite_point(p)) {
            return Err(ValidationError::NonFiniteCoordinate { index });
        }
        let convert = |p: &ContourPoint| round_index(&self.continuous_index(p));
        Ok(if points.len() < PARALLEL_POINT_THRESHOLD {
            points.iter().map(convert).collect()
        } else {
            points.par_iter().map(convert).collect()
        })
    }

    /// Vectorized conversion of an `N × 3` array of `(x, y, z)` points into
    /// an `N × 3` array of `(i, j, k)` indices.
    pub fn physical_to_index_batch(
        &self,
        points: ArrayView2<'_, f64>,
    ) -> Result<Array2<i64>, ValidationError> {
        if points.ncols() != 3 {
            return Err(ValidationError::ColumnCount(points.ncols()));
        }
        if let Some(index) = points
            .outer_iter()
            .position(|row| row.iter().any(|v| !v.is_finite()))
        {
            return Err(ValidationError::NonFiniteCoordinate { index });
        }
        let origin = Array1::from_iter(self.origin.iter().copied());
        // Row vectors, so multiply by the transposed inverse.
        let inverse_t = Array2::from_shape_fn((3, 3), |(r, c)| self.physical_to_index[(c, r)]);
        let centered = &points - &origin;
        Ok(centered
            .dot(&inverse_t)
            .mapv(|v| v.round_ties_even() as i64))
    }

    /// Physical point of a (possibly fractional) index.
    #[inline]
    pub fn index_to_physical(&self, index: &Vector3<f64>) -> ContourPoint {
        Point3::from(self.origin + self.index_to_physical * index)
    }

    pub fn index_to_physical_matrix(&self) -> &Matrix3<f64> {
        &self.index_to_physical
    }

    pub fn physical_to_index_matrix(&self) -> &Matrix3<f64> {
        &self.physical_to_index
    }
}

fn is_finite_point(point: &ContourPoint) -> bool {
    point.coords.iter().all(|v| v.is_finite())
}

/// Three-letter patient orientation of a direction matrix.
///
/// Each letter names the patient direction the corresponding index axis
/// points towards, using its dominant component: `L`/`R` for x, `P`/`A` for
/// y, `S`/`I` for z. An identity matrix is `"LPS"`.
pub fn orientation_code(direction: &Matrix3<f64>) -> String {
    (0..3)
        .map(|axis| {
            let column = direction.column(axis);
            let dominant = column.iamax();
            let positive = column[dominant] >= 0.0;
            match (dominant, positive) {
                (0, true) => 'L',
                (0, false) => 'R',
                (1, true) => 'P',
                (1, false) => 'A',
                (_, true) => 'S',
                (_, false) => 'I',
            }
        })
        .collect()
}
