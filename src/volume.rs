use crate::calibration::DensityCalibrator;
use crate::enums::Orientation;
use crate::error::{ConfigurationError, Error, GeometryError};
use crate::geometry::VolumeGeometry;
use crate::rasterizer::ContourRasterizer;
use crate::resampler::{DisplayTransformParams, ResampleOptions, VolumeResampler};

use image::{GrayImage, Luma, Rgb, RgbImage};
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

/// Display window in HU.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Window {
    pub center: f32,
    pub width: f32,
}

impl Window {
    pub const SOFT_TISSUE: Window = Window {
        center: 40.0,
        width: 400.0,
    };
    pub const LUNG: Window = Window {
        center: -600.0,
        width: 1500.0,
    };
    pub const BONE: Window = Window {
        center: 400.0,
        width: 1800.0,
    };

    pub fn new(center: f32, width: f32) -> Self {
        Self {
            center,
            width: width.max(1.0),
        }
    }

    /// Covers `[min, max]`, e.g. for RED maps.
    pub fn from_range(min: f32, max: f32) -> Self {
        Self::new((min + max) / 2.0, max - min)
    }

    #[inline]
    fn to_u8(self, value: f32) -> u8 {
        let low = self.center - self.width / 2.0;
        ((value - low) / self.width * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::SOFT_TISSUE
    }
}

/// CT volume: voxel values laid out `(slice, row, column)` plus the grid
/// they live on.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: Array3<f32>,
    pub geometry: VolumeGeometry,
}

impl Volume {
    pub fn new(data: Array3<f32>, geometry: VolumeGeometry) -> Result<Self, ConfigurationError> {
        if data.dim() != geometry.shape() {
            return Err(ConfigurationError::ShapeMismatch {
                expected: geometry.shape(),
                actual: data.dim(),
            });
        }
        Ok(Self { data, geometry })
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array3<f32> {
        &mut self.data
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Rasterizer targeting this volume's grid.
    pub fn rasterizer(&self) -> Result<ContourRasterizer, GeometryError> {
        ContourRasterizer::new(&self.geometry)
    }

    /// HU → RED conversion of the whole volume.
    pub fn to_red(&self, calibrator: &DensityCalibrator) -> Volume {
        Volume {
            data: calibrator.apply(self.data.view()),
            geometry: self.geometry.clone(),
        }
    }

    /// Applies a display transform, returning the resampled volume.
    pub fn resample(
        &self,
        params: &DisplayTransformParams,
        options: &ResampleOptions,
    ) -> Result<Volume, Error> {
        let resampled =
            VolumeResampler::resample(self.data.view(), &self.geometry, params, options)?;
        Ok(Volume {
            data: resampled.data,
            geometry: resampled.geometry,
        })
    }

    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: &Orientation,
    ) -> Option<ArrayView2<'_, f32>> {
        slice_along(&self.data, index, orientation)
    }

    /// Windowed 8-bit image of one slice, `None` when `index` is out of range.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        window: Window,
    ) -> Option<GrayImage> {
        let slice = self.get_slice_from_axis(index, &orientation)?;
        slice_to_image(&slice, window)
    }

    /// Same slice as [`Volume::get_image_from_axis`] with `mask` blended on
    /// top in `color`.
    pub fn get_overlay_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        window: Window,
        mask: &Array3<bool>,
        color: [u8; 3],
    ) -> Option<RgbImage> {
        if mask.dim() != self.dim() {
            return None;
        }
        let base = self.get_image_from_axis(index, orientation, window)?;
        let mask = slice_along(mask, index, &orientation)?;
        Some(overlay_mask(&base, &mask, color))
    }
}

fn slice_along<'a, T>(
    data: &'a Array3<T>,
    index: usize,
    orientation: &Orientation,
) -> Option<ArrayView2<'a, T>> {
    let axis = match orientation {
        Orientation::Axial => Axis(0),
        Orientation::Coronal => Axis(1),
        Orientation::Sagittal => Axis(2),
    };
    (index < data.len_of(axis)).then(|| data.index_axis(axis, index))
}

fn slice_to_image(slice: &ArrayView2<'_, f32>, window: Window) -> Option<GrayImage> {
    let (height, width) = slice.dim();
    // Iterate in logical order so transposed views render correctly.
    let rows: Vec<_> = slice.outer_iter().collect();
    let pixel_data: Vec<u8> = rows
        .par_iter()
        .flat_map_iter(|row| row.iter().map(|&v| window.to_u8(v)).collect::<Vec<_>>())
        .collect();
    GrayImage::from_raw(width as u32, height as u32, pixel_data)
}

fn overlay_mask(base: &GrayImage, mask: &ArrayView2<'_, bool>, color: [u8; 3]) -> RgbImage {
    RgbImage::from_fn(base.width(), base.height(), |x, y| {
        let Luma([gray]) = *base.get_pixel(x, y);
        if mask[[y as usize, x as usize]] {
            Rgb(color.map(|c| ((c as u16 + gray as u16) / 2) as u8))
        } else {
            Rgb([gray; 3])
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn volume() -> Volume {
        let geometry = VolumeGeometry::axis_aligned([4, 3, 2], [0.0; 3], [1.0, 1.0, 2.0]).unwrap();
        let data = Array3::from_shape_fn((2, 3, 4), |(k, j, i)| (100 * k + 10 * j + i) as f32);
        Volume::new(data, geometry).unwrap()
    }

    #[test]
    fn test_shape_must_match_geometry() {
        let geometry = VolumeGeometry::axis_aligned([4, 3, 2], [0.0; 3], [1.0; 3]).unwrap();
        let result = Volume::new(Array3::zeros((2, 4, 3)), geometry);
        assert!(matches!(result, Err(ConfigurationError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_slices_along_each_axis() {
        let volume = volume();
        let axial = volume.get_slice_from_axis(1, &Orientation::Axial).unwrap();
        assert_eq!(axial.dim(), (3, 4));
        assert_eq!(axial[[2, 3]], 123.0);

        let coronal = volume.get_slice_from_axis(2, &Orientation::Coronal).unwrap();
        assert_eq!(coronal.dim(), (2, 4));
        let sagittal = volume.get_slice_from_axis(3, &Orientation::Sagittal).unwrap();
        assert_eq!(sagittal.dim(), (2, 3));

        assert!(volume.get_slice_from_axis(2, &Orientation::Axial).is_none());
    }

    #[test]
    fn test_window_maps_to_full_range() {
        let window = Window::new(0.0, 100.0);
        assert_eq!(window.to_u8(-50.0), 0);
        assert_eq!(window.to_u8(-1000.0), 0);
        assert_eq!(window.to_u8(50.0), 255);
        assert_eq!(window.to_u8(0.0), 128);
    }

    #[test]
    fn test_image_dimensions() {
        let volume = volume();
        let image = volume
            .get_image_from_axis(0, Orientation::Sagittal, Window::from_range(0.0, 200.0))
            .unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert!(volume
            .get_image_from_axis(9, Orientation::Axial, Window::default())
            .is_none());
    }

    #[test]
    fn test_overlay_colors_mask_voxels() {
        let volume = volume();
        let mut mask = Array3::from_elem(volume.dim(), false);
        mask[[0, 1, 2]] = true;
        let image = volume
            .get_overlay_from_axis(0, Orientation::Axial, Window::new(0.0, 2.0), &mask, [255, 0, 0])
            .unwrap();
        assert_eq!(image.get_pixel(2, 1), &Rgb([255, 127, 127]));
        assert_eq!(image.get_pixel(0, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_to_red_keeps_geometry() {
        let volume = volume();
        let red = volume.to_red(&DensityCalibrator::default());
        assert_eq!(red.geometry, volume.geometry);
        assert_eq!(red.data[[0, 0, 0]], 1.0);
    }
}
