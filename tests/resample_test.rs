use approx::assert_relative_eq;
use dicom_rt_volume::{
    DisplayTransformParams, Interpolation, ResampleOptions, Rotation, VolumeGeometry,
    VolumeResampler, geometry::round_index,
};
use nalgebra::Vector3;
use ndarray::Array3;
use proptest::prelude::*;

fn rotation() -> impl Strategy<Value = i32> {
    prop_oneof![Just(0), Just(90), Just(180), Just(270)]
}

fn spacing_factor() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![Just(None), Just(Some(1.0)), Just(Some(0.5))]
}

proptest! {
    #[test]
    fn test_center_is_preserved(
        half in (1usize..6, 1usize..6, 1usize..6),
        in_plane in 0.5f64..2.0,
        slice_spacing in 1.0f64..3.0,
        origin in (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0),
        degrees in rotation(),
        flips in (any::<bool>(), any::<bool>(), any::<bool>()),
        factor in spacing_factor(),
    ) {
        let size = [2 * half.0 + 1, 2 * half.1 + 1, 2 * half.2 + 1];
        let spacing = [in_plane, in_plane, slice_spacing];
        let geometry = VolumeGeometry::axis_aligned(
            size,
            [origin.0, origin.1, origin.2],
            spacing,
        ).unwrap();

        let center = [half.0, half.1, half.2];
        let mut source = Array3::<f32>::zeros(geometry.shape());
        source[[center[2], center[1], center[0]]] = 1.0;

        let params = DisplayTransformParams::new(
            factor.map(|f| spacing.map(|s| s * f)),
            degrees,
            [flips.0, flips.1, flips.2],
        ).unwrap();
        let options = ResampleOptions {
            interpolation: Interpolation::Nearest,
            fill_value: 0.0,
        };

        let out = VolumeResampler::resample(source.view(), &geometry, &params, &options).unwrap();

        let source_center = geometry.center();
        let out_center = out.geometry.center();
        prop_assert!((source_center - out_center).norm() < 1e-6);

        let marker = geometry
            .transform()
            .unwrap()
            .index_to_physical(&Vector3::new(center[0] as f64, center[1] as f64, center[2] as f64));
        let out_transform = out.geometry.transform().unwrap();
        let index = out_transform.continuous_index(&marker);
        let offset = index - out.geometry.center_index();
        for axis in 0..3 {
            prop_assert!(offset[axis].abs() <= 1.0, "axis {} drifted by {}", axis, offset[axis]);
        }

        let [i, j, k] = round_index(&index);
        prop_assert!(out.geometry.contains_index([i, j, k]));
        prop_assert_eq!(out.data[[k as usize, j as usize, i as usize]], 1.0);
    }
}

#[test]
fn test_rotation_and_flip_orientation_codes() {
    let geometry = VolumeGeometry::axis_aligned([4, 4, 4], [0.0; 3], [1.0; 3]).unwrap();
    let cases = [
        (0, [false, false, false], "LPS"),
        (0, [true, false, false], "RPS"),
        (0, [false, false, true], "LPI"),
        (180, [false, false, false], "RAS"),
        (90, [false, false, false], "ALS"),
        (270, [false, false, false], "PRS"),
    ];
    for (degrees, flips, expected) in cases {
        let params = DisplayTransformParams::new(None, degrees, flips).unwrap();
        let out = VolumeResampler::output_geometry(&geometry, &params).unwrap();
        assert_eq!(out.orientation_code(), expected, "{degrees}° {flips:?}");
    }
}

#[test]
fn test_display_params_from_json() {
    let params: DisplayTransformParams =
        serde_json::from_str(r#"{ "rotation": 270, "flip_si": true }"#).unwrap();
    assert_eq!(params.rotation, Rotation::Clockwise270);
    assert!(params.flip_si);
    assert_eq!(params.spacing, None);
}

#[test]
fn test_identity_with_explicit_spacing_is_exact() {
    let geometry =
        VolumeGeometry::axis_aligned([5, 4, 3], [1.0, 2.0, 3.0], [0.7, 0.7, 2.5]).unwrap();
    let source = Array3::from_shape_fn(geometry.shape(), |(k, j, i)| (k * 97 + j * 13 + i) as i16);
    let params = DisplayTransformParams::new(Some([0.7, 0.7, 2.5]), 0, [false; 3]).unwrap();

    let out = VolumeResampler::resample(
        source.view(),
        &geometry,
        &params,
        &ResampleOptions::default(),
    )
    .unwrap();

    assert_eq!(out.data, source);
    assert_relative_eq!(*out.geometry.origin(), *geometry.origin());
}

#[test]
fn test_masks_resample_with_nearest_neighbour() {
    let geometry = VolumeGeometry::axis_aligned([6, 6, 2], [0.0; 3], [2.0, 2.0, 2.0]).unwrap();
    let mut mask = Array3::from_elem(geometry.shape(), false);
    mask[[0, 1, 1]] = true;
    let params = DisplayTransformParams::new(Some([1.0, 1.0, 2.0]), 0, [false; 3]).unwrap();

    let out = VolumeResampler::resample(
        mask.view(),
        &geometry,
        &params,
        &ResampleOptions::labels(),
    )
    .unwrap();

    assert_eq!(out.data.dim(), (2, 12, 12));
    assert_eq!(out.data.iter().filter(|&&v| v).count(), 4);
    assert!(out.data[[0, 2, 2]]);
    assert!(!out.data[[1, 2, 2]]);
}
