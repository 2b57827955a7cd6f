use approx::assert_relative_eq;
use dicom_rt_volume::{CalibrationTable, DensityCalibrator, Settings, Volume, VolumeGeometry};
use ndarray::{Array3, ArrayD, IxDyn};
use proptest::prelude::*;

const TISSUE_POINTS: [(f64, f64); 3] = [(-1000.0, 0.001), (0.0, 1.0), (1000.0, 1.59)];

fn assert_tissue_points(calibrator: &DensityCalibrator) {
    for (hu, red) in TISSUE_POINTS {
        assert_relative_eq!(calibrator.red(hu), red, max_relative = 1e-3);
    }
}

#[test]
fn test_tissue_points_from_explicit_table() {
    let hu = [-1000.0, -800.0, 0.0, 1000.0, 3000.0];
    let red = [0.001, 0.193, 1.0, 1.59, 2.5];
    assert_tissue_points(&DensityCalibrator::from_values(Some(&hu[..]), Some(&red[..])));

    // Order of the input does not matter.
    let hu = [1000.0, 0.0, -1000.0];
    let red = [1.59, 1.0, 0.001];
    assert_tissue_points(&DensityCalibrator::from_values(Some(&hu[..]), Some(&red[..])));
}

#[test]
fn test_tissue_points_from_fallback() {
    let mismatched_hu = [0.0, 100.0, 200.0];
    let mismatched_red = [1.0, 1.1];
    let single_hu = [0.0];
    let single_red = [1.0];
    let cases = [
        DensityCalibrator::from_values(None, None),
        DensityCalibrator::from_values(Some(&[][..]), Some(&[][..])),
        DensityCalibrator::from_values(Some(&mismatched_hu[..]), None),
        DensityCalibrator::from_values(Some(&mismatched_hu[..]), Some(&mismatched_red[..])),
        DensityCalibrator::from_values(Some(&single_hu[..]), Some(&single_red[..])),
        Settings::default().calibrator(),
    ];
    for calibrator in &cases {
        assert_tissue_points(calibrator);
        assert_eq!(calibrator.table(), &CalibrationTable::default());
    }
}

#[test]
fn test_extrapolation_continues_boundary_slope() {
    let table = CalibrationTable::new(&[-1000.0, 0.0, 1000.0], &[0.0, 1.0, 1.6]).unwrap();
    let calibrator = DensityCalibrator::new(table);

    let high_slope = (calibrator.red(5000.0) - calibrator.red(3000.0)) / 2000.0;
    assert_relative_eq!(high_slope, 0.6 / 1000.0, max_relative = 1e-9);
    assert_relative_eq!(calibrator.red(2000.0), 2.2, max_relative = 1e-9);

    let low = calibrator.red(-3000.0);
    assert!(low.is_finite());
    assert_relative_eq!(low, -2.0, max_relative = 1e-9);
}

#[test]
fn test_applies_to_any_dimensionality() {
    let calibrator = DensityCalibrator::default();
    let hu = ArrayD::from_shape_vec(IxDyn(&[2, 1, 1, 2]), vec![-1000.0f32, 0.0, 1000.0, -800.0])
        .unwrap();

    let red = calibrator.apply(hu.view());

    assert_eq!(red.shape(), &[2, 1, 1, 2]);
    let expected = [0.001f32, 1.0, 1.59, 0.193];
    for (value, expected) in red.iter().zip(expected) {
        assert_relative_eq!(*value, expected, max_relative = 1e-6);
    }
}

#[test]
fn test_volume_to_red_with_roi_override() {
    let geometry = VolumeGeometry::axis_aligned([3, 3, 1], [0.0; 3], [1.0; 3]).unwrap();
    let volume = Volume::new(Array3::zeros(geometry.shape()), geometry).unwrap();
    let mut red = volume.to_red(&DensityCalibrator::default());

    let mut bolus = Array3::from_elem(volume.dim(), false);
    bolus[[0, 1, 1]] = true;
    DensityCalibrator::apply_roi_overrides(&mut red.data, &[(&bolus, 1.12)]).unwrap();

    assert_relative_eq!(red.data[[0, 1, 1]], 1.12f32);
    assert_eq!(red.data.iter().filter(|&&v| v == 1.0).count(), 8);
}

proptest! {
    #[test]
    fn test_default_table_is_monotonic_and_finite(a in -5000.0f64..25000.0, b in -5000.0f64..25000.0) {
        let calibrator = DensityCalibrator::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let (red_low, red_high) = (calibrator.red(low), calibrator.red(high));
        prop_assert!(red_low.is_finite() && red_high.is_finite());
        prop_assert!(red_low <= red_high + 1e-12);
    }
}
