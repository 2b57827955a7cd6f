//! # DICOM-RT volume library
//!
//! This crate prepares CT volumes and RT Structure Sets for radiotherapy
//! planning and display. It builds on the dicom-rs ecosystem for reading
//! files and on ndarray for voxel data.
//!
//! The core is free of I/O:
//!  - [`CoordinateTransform`] maps physical points (mm) to voxel indices and
//!    back through the volume's affine geometry
//!  - [`ContourRasterizer`] turns structure-set contours into boolean masks
//!  - [`VolumeResampler`] rotates, mirrors and respaces volumes for display,
//!    keeping the volume center fixed
//!  - [`DensityCalibrator`] converts Hounsfield units to relative electron
//!    density
//!
//! [`VolumeLoader`] and [`RtStructReader`] read CT series and structure sets
//! from disk. Malformed contours are logged through `tracing`, reported in a
//! [`RasterReport`] and skipped, so one bad contour never loses its siblings.
//!
//! Heavy loops run in parallel using rayon.
//!
//! # Examples
//!
//! ## Rasterizing a structure set on a CT grid
//!
//! ```no_run
//! # use dicom_rt_volume::{RtStructReader, SortBy, VolumeLoader};
//! let volume = VolumeLoader::load_from_directory("ct", SortBy::ImagePositionPatient)
//!     .expect("should have loaded the CT series");
//! let rois = RtStructReader::read_file("ct/rtstruct.dcm")
//!     .expect("should have read the structure set");
//! let rasterizer = volume.rasterizer().expect("CT geometry should be invertible");
//! for (roi, mask) in rois.iter().zip(rasterizer.rasterize_rois(&rois)) {
//!     println!("{}: {} voxels", roi.name, mask.report.voxels_set);
//! }
//! ```
//!
//! ## Rotating a volume for display
//!
//! ```no_run
//! # use dicom_rt_volume::{DisplayTransformParams, ResampleOptions, SortBy, VolumeLoader};
//! let volume = VolumeLoader::load_from_directory("ct", SortBy::ImagePositionPatient)
//!     .expect("should have loaded the CT series");
//! let params = DisplayTransformParams::new(Some([1.0, 1.0, 1.0]), 90, [false, true, false])
//!     .expect("parameters should be valid");
//! let display = volume
//!     .resample(&params, &ResampleOptions::default())
//!     .expect("should have resampled the volume");
//! println!("{}", display.geometry.orientation_code());
//! ```

pub mod calibration;
pub mod config;
pub mod contour;
pub mod enums;
pub mod error;
pub mod geometry;
mod interpolator;
pub mod rasterizer;
pub mod resampler;
pub mod rtstruct;
pub mod volume;
pub mod volume_loader;

pub use calibration::{CalibrationTable, DensityCalibrator};
pub use config::Settings;
pub use contour::{Contour, ContourGeometry, RawContour, Roi};
pub use enums::{Interpolation, Orientation, Rotation, SortBy};
pub use error::{ConfigurationError, Error, GeometryError, ValidationError};
pub use geometry::{ContourPoint, CoordinateTransform, VolumeGeometry};
pub use interpolator::Voxel;
pub use rasterizer::{ContourRasterizer, RasterReport, RoiMask, SkippedContour};
pub use resampler::{DisplayTransformParams, ResampleOptions, Resampled, VolumeResampler};
pub use rtstruct::{RtStructError, RtStructReader};
pub use volume::{Volume, Window};
pub use volume_loader::{VolumeLoader, VolumeLoaderError};
