//! Hounsfield unit to relative electron density conversion.

use crate::error::{ConfigurationError, ValidationError};

use ndarray::{Array, Array3, ArrayView, Dimension, Zip};
use tracing::{debug, warn};

const DEFAULT_HU_START: f64 = -1050.0;
const DEFAULT_HU_STEP: f64 = 50.0;

/// RED values of the built-in table, one per 50 HU from -1050 HU to 20000 HU.
#[rustfmt::skip]
const DEFAULT_RED: [f64; 422] = [
    0.0, 0.001, 0.05, 0.096, 0.145, 0.193, 0.237, 0.28, 0.321, 0.352,
    0.398, 0.448, 0.498, 0.557, 0.613, 0.67, 0.726, 0.784, 0.839, 0.906,
    0.965, 1.0, 1.064, 1.067, 1.075, 1.088, 1.131, 1.164, 1.204, 1.241,
    1.282, 1.302, 1.327, 1.359, 1.387, 1.414, 1.442, 1.474, 1.503, 1.528,
    1.56, 1.59, 1.621, 1.649, 1.676, 1.704, 1.726, 1.748, 1.772, 1.795,
    1.817, 1.84, 1.863, 1.886, 1.908, 1.931, 1.954, 1.976, 2.0, 2.022,
    2.044, 2.067, 2.09, 2.113, 2.135, 2.158, 2.18, 2.202, 2.225, 2.248,
    2.271, 2.295, 2.317, 2.34, 2.363, 2.385, 2.408, 2.431, 2.454, 2.477,
    2.5, 2.517, 2.528, 2.544, 2.56, 2.575, 2.589, 2.605, 2.621, 2.636,
    2.65, 2.666, 2.681, 2.695, 2.711, 2.726, 2.741, 2.756, 2.771, 2.786,
    2.801, 2.816, 2.832, 2.848, 2.863, 2.878, 2.893, 2.908, 2.923, 2.939,
    2.953, 2.968, 2.984, 2.999, 3.013, 3.029, 3.045, 3.059, 3.074, 3.089,
    3.105, 3.12, 3.134, 3.15, 3.166, 3.18, 3.195, 3.211, 3.227, 3.241,
    3.255, 3.27, 3.287, 3.302, 3.316, 3.331, 3.347, 3.363, 3.378, 3.392,
    3.407, 3.423, 3.439, 3.453, 3.468, 3.484, 3.5, 3.514, 3.529, 3.544,
    3.559, 3.574, 3.589, 3.604, 3.62, 3.635, 3.649, 3.665, 3.68, 3.696,
    3.709, 3.73, 3.774, 3.82, 3.873, 3.922, 3.973, 4.022, 4.073, 4.123,
    4.173, 4.222, 4.272, 4.323, 4.373, 4.423, 4.473, 4.523, 4.573, 4.623,
    4.674, 4.724, 4.773, 4.823, 4.874, 4.925, 4.975, 5.024, 5.073, 5.124,
    5.175, 5.225, 5.275, 5.324, 5.374, 5.424, 5.475, 5.526, 5.575, 5.624,
    5.675, 5.725, 5.776, 5.825, 5.875, 5.925, 5.975, 6.026, 6.076, 6.126,
    6.175, 6.226, 6.276, 6.326, 6.376, 6.426, 6.476, 6.526, 6.577, 6.627,
    6.7, 6.74, 6.745, 6.747, 6.749, 6.753, 6.756, 6.763, 6.769, 6.772,
    6.777, 6.785, 6.787, 6.789, 6.796, 6.802, 6.804, 6.809, 6.817, 6.819,
    6.82, 6.83, 6.852, 6.877, 6.905, 6.932, 6.96, 6.988, 7.014, 7.04,
    7.069, 7.096, 7.123, 7.149, 7.176, 7.202, 7.229, 7.258, 7.286, 7.313,
    7.341, 7.37, 7.401, 7.435, 7.472, 7.507, 7.543, 7.579, 7.616, 7.651,
    7.688, 7.724, 7.76, 7.795, 7.831, 7.868, 7.904, 7.94, 7.975, 8.012,
    8.044, 8.09, 8.132, 8.178, 8.229, 8.277, 8.328, 8.377, 8.426, 8.475,
    8.524, 8.573, 8.623, 8.673, 8.722, 8.771, 8.82, 8.869, 8.92, 8.969,
    9.017, 9.067, 9.117, 9.167, 9.216, 9.265, 9.314, 9.362, 9.413, 9.463,
    9.511, 9.561, 9.609, 9.659, 9.709, 9.759, 9.808, 9.857, 9.906, 9.956,
    10.005, 10.054, 10.104, 10.153, 10.203, 10.252, 10.302, 10.351, 10.399, 10.448,
    10.498, 10.548, 10.597, 10.647, 10.696, 10.745, 10.794, 10.844, 10.893, 10.943,
    10.992, 11.042, 11.091, 11.14, 11.19, 11.239, 11.288, 11.338, 11.387, 11.437,
    11.487, 11.535, 11.584, 11.634, 11.683, 11.732, 11.781, 11.831, 11.881, 11.93,
    11.98, 12.028, 12.077, 12.127, 12.177, 12.226, 12.276, 12.325, 12.373, 12.423,
    12.473, 12.522, 12.572, 12.621, 12.67, 12.72, 12.77, 12.818, 12.868, 12.917,
    12.966, 13.016, 13.065, 13.115, 13.163, 13.213, 13.262, 13.312, 13.362, 13.41,
    13.459, 13.509, 13.559, 13.608, 13.658, 13.707, 13.756, 13.805, 13.855, 13.904,
    13.953, 14.004, 14.052, 14.101, 14.151, 14.201, 14.25, 14.3, 14.348, 14.397,
    14.447, 14.497, 14.546, 14.595, 14.645, 14.694, 14.743, 14.793, 14.841, 14.89,
    14.947, 15.0,
];

/// Piecewise-linear HU → RED calibration curve.
///
/// HU values are strictly increasing and there are always at least two
/// points, so every HU value has a bracketing or boundary segment.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationTable {
    hu: Vec<f64>,
    red: Vec<f64>,
}

impl CalibrationTable {
    /// Builds a table from paired HU and RED values.
    ///
    /// Pairs with a non-finite member are dropped. The rest are stably sorted
    /// by HU and repeated HU values keep their first RED value.
    pub fn new(hu: &[f64], red: &[f64]) -> Result<Self, ConfigurationError> {
        if hu.len() != red.len() {
            return Err(ConfigurationError::CalibrationLengthMismatch {
                hu: hu.len(),
                red: red.len(),
            });
        }

        let mut pairs: Vec<(f64, f64)> = hu
            .iter()
            .copied()
            .zip(red.iter().copied())
            .filter(|(h, r)| h.is_finite() && r.is_finite())
            .collect();
        pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
        pairs.dedup_by(|later, earlier| later.0 == earlier.0);

        if pairs.len() < 2 {
            return Err(ConfigurationError::TooFewCalibrationPoints(pairs.len()));
        }

        let (hu, red) = pairs.into_iter().unzip();
        Ok(Self { hu, red })
    }

    pub fn hu(&self) -> &[f64] {
        &self.hu
    }

    pub fn red(&self) -> &[f64] {
        &self.red
    }

    pub fn len(&self) -> usize {
        self.hu.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hu.is_empty()
    }

    /// Linear interpolation between the bracketing points. Outside the table
    /// the first or last segment is extended without clamping.
    pub fn evaluate(&self, hu: f64) -> f64 {
        let upper = self.hu.partition_point(|&h| h < hu);
        if upper < self.hu.len() && self.hu[upper] == hu {
            return self.red[upper];
        }
        let upper = upper.clamp(1, self.hu.len() - 1);
        let lower = upper - 1;

        let (h0, h1) = (self.hu[lower], self.hu[upper]);
        let (r0, r1) = (self.red[lower], self.red[upper]);
        r0 + (hu - h0) * (r1 - r0) / (h1 - h0)
    }
}

impl Default for CalibrationTable {
    fn default() -> Self {
        Self {
            hu: (0..DEFAULT_RED.len())
                .map(|i| DEFAULT_HU_START + DEFAULT_HU_STEP * i as f64)
                .collect(),
            red: DEFAULT_RED.to_vec(),
        }
    }
}

/// Converts CT volumes from HU to RED.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DensityCalibrator {
    table: CalibrationTable,
}

impl DensityCalibrator {
    pub fn new(table: CalibrationTable) -> Self {
        Self { table }
    }

    /// Builds a calibrator from optional user-supplied lists.
    ///
    /// Missing, mismatched or degenerate input falls back to the built-in
    /// table with a warning instead of failing.
    pub fn from_values(hu: Option<&[f64]>, red: Option<&[f64]>) -> Self {
        let (Some(hu), Some(red)) = (hu, red) else {
            warn!("No HU/RED calibration provided, using the default table");
            return Self::default();
        };
        match CalibrationTable::new(hu, red) {
            Ok(table) => {
                debug!(points = table.len(), "Using supplied HU/RED calibration");
                Self::new(table)
            }
            Err(error) => {
                warn!(%error, "Invalid HU/RED calibration, using the default table");
                Self::default()
            }
        }
    }

    pub fn table(&self) -> &CalibrationTable {
        &self.table
    }

    /// RED of a single HU value.
    #[inline]
    pub fn red(&self, hu: f64) -> f64 {
        self.table.evaluate(hu)
    }

    /// Converts an HU array of any dimensionality into a new RED array.
    pub fn apply<D: Dimension>(&self, hu: ArrayView<'_, f32, D>) -> Array<f32, D> {
        let mut red = hu.to_owned();
        self.apply_inplace(&mut red);
        red
    }

    /// Converts an HU array to RED in place.
    pub fn apply_inplace<D: Dimension>(&self, values: &mut Array<f32, D>) {
        values.par_mapv_inplace(|hu| self.red(hu as f64) as f32);
    }

    /// Overwrites the RED of voxels inside each mask with a fixed value.
    /// Later entries win where masks overlap.
    pub fn apply_roi_overrides(
        red: &mut Array3<f32>,
        overrides: &[(&Array3<bool>, f64)],
    ) -> Result<(), ValidationError> {
        for (mask, value) in overrides {
            if mask.dim() != red.dim() {
                return Err(ValidationError::MaskShape {
                    expected: red.dim(),
                    actual: mask.dim(),
                });
            }
            let value = *value as f32;
            Zip::from(&mut *red).and(*mask).par_for_each(|voxel, &inside| {
                if inside {
                    *voxel = value;
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_default_table_tissue_points() {
        let calibrator = DensityCalibrator::default();
        assert_eq!(calibrator.table().len(), 422);
        assert_eq!(calibrator.table().hu()[421], 20000.0);
        assert_eq!(calibrator.red(-1000.0), 0.001);
        assert_eq!(calibrator.red(-800.0), 0.193);
        assert_eq!(calibrator.red(0.0), 1.0);
        assert_eq!(calibrator.red(1000.0), 1.59);
    }

    #[test]
    fn test_interpolates_between_points() {
        let table = CalibrationTable::new(&[0.0, 100.0], &[1.0, 2.0]).unwrap();
        assert_relative_eq!(table.evaluate(25.0), 1.25);
    }

    #[test]
    fn test_extrapolates_boundary_segments() {
        let calibrator = DensityCalibrator::default();
        let below = calibrator.red(-1100.0);
        assert!(below.is_finite());
        assert_relative_eq!(below, -0.001, epsilon = 1e-12);

        let table = CalibrationTable::new(&[-1000.0, 0.0, 1000.0], &[0.0, 1.0, 1.5]).unwrap();
        assert_relative_eq!(table.evaluate(3000.0), 2.5);
        assert_relative_eq!(table.evaluate(-2000.0), -1.0);
    }

    #[test]
    fn test_sorts_and_keeps_first_duplicate() {
        let table = CalibrationTable::new(
            &[100.0, -100.0, 100.0, f64::NAN, 0.0],
            &[2.0, 0.5, 9.0, 1.0, 1.0],
        )
        .unwrap();
        assert_eq!(table.hu(), &[-100.0, 0.0, 100.0]);
        assert_eq!(table.red(), &[0.5, 1.0, 2.0]);
    }

    #[test]
    fn test_invalid_tables_are_rejected() {
        assert_eq!(
            CalibrationTable::new(&[0.0, 1.0], &[1.0]),
            Err(ConfigurationError::CalibrationLengthMismatch { hu: 2, red: 1 })
        );
        assert_eq!(
            CalibrationTable::new(&[0.0, 0.0], &[1.0, 2.0]),
            Err(ConfigurationError::TooFewCalibrationPoints(1))
        );
        assert_eq!(
            CalibrationTable::new(&[], &[]),
            Err(ConfigurationError::TooFewCalibrationPoints(0))
        );
    }

    #[test]
    fn test_invalid_input_falls_back_to_default() {
        let fallback = DensityCalibrator::default();
        assert_eq!(DensityCalibrator::from_values(None, None), fallback);
        assert_eq!(DensityCalibrator::from_values(Some(&[][..]), Some(&[][..])), fallback);
        assert_eq!(
            DensityCalibrator::from_values(Some(&[0.0, 1.0][..]), Some(&[1.0][..])),
            fallback
        );
        assert_eq!(
            DensityCalibrator::from_values(Some(&[5.0][..]), Some(&[1.0][..])),
            fallback
        );

        let custom = DensityCalibrator::from_values(Some(&[0.0, 10.0][..]), Some(&[1.0, 2.0][..]));
        assert_relative_eq!(custom.red(5.0), 1.5);
    }

    #[test]
    fn test_apply_keeps_shape() {
        let calibrator = DensityCalibrator::default();
        let hu = arr2(&[[-1000.0f32, 0.0], [1000.0, -800.0]]);
        let red = calibrator.apply(hu.view());
        assert_eq!(red.dim(), (2, 2));
        assert_relative_eq!(red[[0, 0]], 0.001);
        assert_relative_eq!(red[[1, 0]], 1.59);

        let mut line = arr1(&[0.0f32, 50.0]);
        calibrator.apply_inplace(&mut line);
        assert_relative_eq!(line[1], 1.064);
    }

    #[test]
    fn test_roi_overrides() {
        let mut red = Array3::<f32>::from_elem((1, 2, 2), 1.0);
        let mut first = Array3::from_elem((1, 2, 2), false);
        first[[0, 0, 0]] = true;
        first[[0, 1, 1]] = true;
        let mut second = Array3::from_elem((1, 2, 2), false);
        second[[0, 1, 1]] = true;

        DensityCalibrator::apply_roi_overrides(&mut red, &[(&first, 0.5), (&second, 2.0)])
            .unwrap();
        assert_eq!(red[[0, 0, 0]], 0.5);
        assert_eq!(red[[0, 0, 1]], 1.0);
        assert_eq!(red[[0, 1, 1]], 2.0);

        let wrong = Array3::from_elem((2, 2, 2), true);
        assert!(matches!(
            DensityCalibrator::apply_roi_overrides(&mut red, &[(&wrong, 1.0)]),
            Err(ValidationError::MaskShape { .. })
        ));
    }
}
