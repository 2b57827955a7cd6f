use crate::{enums::SortBy, error::GeometryError, geometry::VolumeGeometry, volume::Volume};

use dicom::{
    core::Tag,
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use nalgebra::{Matrix3, Vector3};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{fs, path::Path};
use thiserror::Error;
use tracing::{debug, warn};

// Largest allowed spread between slice gaps, relative to their mean.
const SLICE_SPACING_TOLERANCE: f64 = 0.01;
const ORIENTATION_TOLERANCE: f64 = 1e-3;

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("Inconsistent image dimensions")]
    InconsistentDimensions,

    #[error("Missing spacing information")]
    MissingSpacing,

    #[error("Missing required attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Slices do not share one ImageOrientationPatient")]
    InconsistentOrientation,

    #[error("Non-uniform slice spacing: steps range from {min} mm to {max} mm")]
    NonUniformSpacing { min: f64, max: f64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// One decoded CT slice with the attributes needed to place it.
struct Slice {
    position: Option<Vector3<f64>>,
    orientation: Option<Vec<f64>>,
    instance_number: Option<i32>,
    pixels: Array2<f32>,
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Load a volume from DICOM objects
    ///
    /// # Arguments
    ///
    /// * `dicom_objects` - Slice of DICOM file objects
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if no valid images found, dimensions are inconsistent or
    /// the slices do not form a regular grid
    pub fn load_from_dicom_objects(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let mut slices: Vec<Slice> = dicom_objects
            .par_iter()
            .filter_map(Self::read_slice)
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        if slices.len() < dicom_objects.len() {
            warn!(
                skipped = dicom_objects.len() - slices.len(),
                "Some DICOM objects had no decodable image"
            );
        }

        Self::validate_dimensions(&slices)?;

        let orientation = slices[0]
            .orientation
            .clone()
            .ok_or(VolumeLoaderError::MissingAttribute("ImageOrientationPatient"))?;
        let [row_dir, col_dir, normal] = Self::direction_cosines(&orientation)?;
        Self::validate_orientation(&slices, &orientation)?;
        Self::sort_slices(&mut slices, sort_by, &normal);

        let [spacing_x, spacing_y] = Self::get_pixel_spacing(dicom_objects)?;
        // The slice axis follows the stacking order, which may run against
        // the normal when sorting by instance number.
        let (spacing_z, slice_dir) = match Self::measure_slice_spacing(&slices, &normal)? {
            Some(step) if step < 0.0 => (-step, -normal),
            Some(step) => (step, normal),
            None => (
                Self::get_slice_thickness(dicom_objects).ok_or(VolumeLoaderError::MissingSpacing)?,
                normal,
            ),
        };
        let origin = slices[0]
            .position
            .ok_or(VolumeLoaderError::MissingAttribute("ImagePositionPatient"))?;

        let (height, width) = slices[0].pixels.dim();
        let geometry = VolumeGeometry::new(
            [width, height, slices.len()],
            origin.into(),
            [spacing_x, spacing_y, spacing_z],
            Matrix3::from_columns(&[row_dir, col_dir, slice_dir]),
        )?;
        debug!(
            size = ?geometry.size(),
            spacing = ?geometry.spacing(),
            orientation = %geometry.orientation_code(),
            "Loaded CT series"
        );

        let data = Self::build_volume_array(&slices);
        Volume::new(data, geometry).map_err(|_| VolumeLoaderError::InconsistentDimensions)
    }

    /// Load a volume from file paths
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let objects: Result<Vec<_>, _> = paths
            .par_iter()
            .map(|path| open_file(path.as_ref()))
            .collect();

        Self::load_from_dicom_objects(&objects?, sort_by)
    }

    /// Load a volume from a directory containing .dcm files
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension()
                    .and_then(|s| s.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dcm"))
            })
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Self::load_from_file_paths(&paths, sort_by)
    }

    fn read_slice(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Slice> {
        let pixels = Self::decode_image(dicom_object)?;
        let position = get_f64_vec(dicom_object, tags::IMAGE_POSITION_PATIENT)
            .filter(|v| v.len() == 3)
            .map(|v| Vector3::new(v[0], v[1], v[2]));
        let instance_number = dicom_object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok());

        Some(Slice {
            position,
            orientation: get_f64_vec(dicom_object, tags::IMAGE_ORIENTATION_PATIENT),
            instance_number,
            pixels,
        })
    }

    /// First frame as HU: stored values times `RescaleSlope` plus
    /// `RescaleIntercept`.
    fn decode_image(dicom_object: &FileDicomObject<InMemDicomObject>) -> Option<Array2<f32>> {
        let pixel_data = dicom_object.decode_pixel_data().ok()?;
        let options = ConvertOptions::new()
            .with_modality_lut(ModalityLutOption::None)
            .with_voi_lut(VoiLutOption::Identity);
        let mut image = pixel_data
            .to_ndarray_with_options::<f32>(&options)
            .ok()
            .map(|arr| arr.slice_move(s![0, .., .., 0]))?;

        let slope = get_f64(dicom_object, tags::RESCALE_SLOPE).unwrap_or(1.0) as f32;
        let intercept = get_f64(dicom_object, tags::RESCALE_INTERCEPT).unwrap_or(0.0) as f32;
        image.mapv_inplace(|v| v.mul_add(slope, intercept));
        Some(image)
    }

    /// Row, column and normal directions from `ImageOrientationPatient`.
    fn direction_cosines(orientation: &[f64]) -> Result<[Vector3<f64>; 3], VolumeLoaderError> {
        if orientation.len() != 6 {
            return Err(GeometryError::DirectionArity {
                expected: 6,
                actual: orientation.len(),
            }
            .into());
        }
        let row = Vector3::new(orientation[0], orientation[1], orientation[2]);
        let column = Vector3::new(orientation[3], orientation[4], orientation[5]);
        Ok([row, column, row.cross(&column)])
    }

    fn validate_orientation(slices: &[Slice], reference: &[f64]) -> Result<(), VolumeLoaderError> {
        let consistent = slices.iter().all(|slice| match &slice.orientation {
            Some(orientation) => {
                orientation.len() == reference.len()
                    && orientation
                        .iter()
                        .zip(reference)
                        .all(|(a, b)| (a - b).abs() <= ORIENTATION_TOLERANCE)
            }
            None => true,
        });
        if consistent {
            Ok(())
        } else {
            Err(VolumeLoaderError::InconsistentOrientation)
        }
    }

    fn sort_slices(slices: &mut [Slice], sort_by: SortBy, normal: &Vector3<f64>) {
        match sort_by {
            SortBy::ImagePositionPatient => {
                let distance = |slice: &Slice| slice.position.map(|p| p.dot(normal));
                slices.sort_by(|a, b| {
                    distance(a)
                        .partial_cmp(&distance(b))
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            SortBy::InstanceNumber => slices.sort_by_key(|slice| slice.instance_number),
            SortBy::None => {}
        }
    }

    /// Mean signed step between neighbouring slices along the normal, in
    /// stacking order. Negative when the slices run against the normal.
    /// `None` for a single slice or when positions are missing.
    fn measure_slice_spacing(
        slices: &[Slice],
        normal: &Vector3<f64>,
    ) -> Result<Option<f64>, VolumeLoaderError> {
        let positions: Option<Vec<f64>> = slices
            .iter()
            .map(|slice| slice.position.map(|p| p.dot(normal)))
            .collect();
        let Some(positions) = positions.filter(|p| p.len() > 1) else {
            return Ok(None);
        };

        let steps: Vec<f64> = positions.windows(2).map(|w| w[1] - w[0]).collect();
        let min = steps.iter().copied().fold(f64::INFINITY, f64::min);
        let max = steps.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = steps.iter().sum::<f64>() / steps.len() as f64;

        if mean == 0.0 || max - min > SLICE_SPACING_TOLERANCE * mean.abs() {
            return Err(VolumeLoaderError::NonUniformSpacing { min, max });
        }
        Ok(Some(mean))
    }

    fn validate_dimensions(slices: &[Slice]) -> Result<(), VolumeLoaderError> {
        let first_dim = slices[0].pixels.dim();
        if slices.iter().any(|slice| slice.pixels.dim() != first_dim) {
            return Err(VolumeLoaderError::InconsistentDimensions);
        }
        Ok(())
    }

    fn build_volume_array(slices: &[Slice]) -> Array3<f32> {
        let (height, width) = slices[0].pixels.dim();
        let depth = slices.len();
        let mut volume = Array3::<f32>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            volume.slice_mut(s![i, .., ..]).assign(&slice.pixels);
        }

        volume
    }

    /// `PixelSpacing` as `(column spacing, row spacing)`, i.e. x then y.
    fn get_pixel_spacing(
        dicom_objects: &[FileDicomObject<InMemDicomObject>],
    ) -> Result<[f64; 2], VolumeLoaderError> {
        dicom_objects
            .iter()
            .find_map(|dicom_object| {
                let spacing = get_f64_vec(dicom_object, tags::PIXEL_SPACING)?;
                (spacing.len() == 2).then(|| [spacing[1], spacing[0]])
            })
            .ok_or(VolumeLoaderError::MissingSpacing)
    }

    fn get_slice_thickness(dicom_objects: &[FileDicomObject<InMemDicomObject>]) -> Option<f64> {
        dicom_objects
            .iter()
            .find_map(|dicom_object| get_f64(dicom_object, tags::SLICE_THICKNESS))
            .filter(|thickness| *thickness > 0.0)
    }
}

fn get_f64(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<f64> {
    obj.element(tag).ok()?.to_float64().ok()
}

fn get_f64_vec(obj: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}
