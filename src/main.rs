use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use dicom_rt_volume::{
    DensityCalibrator, Orientation, ResampleOptions, RtStructReader, Settings, SortBy, Volume,
    VolumeLoader, VolumeResampler, Window,
};

/// Loads a CT series, optionally with a structure set, and writes preview
/// images of the center slice.
#[derive(Parser)]
#[command(name = "dicom-rt-volume")]
#[command(author, version, about)]
struct Cli {
    /// Directory holding the CT series (.dcm files)
    ct_dir: PathBuf,

    /// RT Structure Set to rasterize on the CT grid
    #[arg(long)]
    rtstruct: Option<PathBuf>,

    /// JSON settings file
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Display rotation in degrees (0, 90, 180, 270)
    #[arg(long)]
    rotation: Option<i32>,

    /// Mirror left-right
    #[arg(long)]
    flip_lr: bool,

    /// Mirror anterior-posterior
    #[arg(long)]
    flip_ap: bool,

    /// Mirror superior-inferior
    #[arg(long)]
    flip_si: bool,

    /// Display voxel spacing in mm, e.g. --spacing 1 1 2.5
    #[arg(long, num_args = 3, value_names = ["X", "Y", "Z"])]
    spacing: Option<Vec<f64>>,

    /// Output directory for the PNG previews
    #[arg(short, long, default_value = ".")]
    output: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => Settings::load(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?,
        None => Settings::default(),
    };
    apply_overrides(&mut settings, &cli)?;

    let volume = VolumeLoader::load_from_directory(&cli.ct_dir, SortBy::ImagePositionPatient)
        .with_context(|| format!("Failed to load CT series from {}", cli.ct_dir.display()))?;
    info!(
        size = ?volume.geometry.size(),
        orientation = %volume.geometry.orientation_code(),
        "Loaded CT"
    );

    let calibrator = settings.calibrator();
    let mut red = volume.to_red(&calibrator);

    let mut masks = Vec::new();
    if let Some(path) = &cli.rtstruct {
        let rois = RtStructReader::read_file(path)
            .with_context(|| format!("Failed to read structure set {}", path.display()))?;
        let rasterizer = volume.rasterizer()?;
        let roi_masks = rasterizer.rasterize_rois(&rois);

        for (roi, roi_mask) in rois.iter().zip(&roi_masks) {
            let report = &roi_mask.report;
            if report.is_complete() {
                info!(roi = %roi.name, voxels = report.voxels_set, "Rasterized ROI");
            } else {
                warn!(
                    roi = %roi.name,
                    voxels = report.voxels_set,
                    skipped_contours = report.skipped_contours.len(),
                    skipped_points = report.skipped_points,
                    clipped_points = report.clipped_points,
                    "Rasterized ROI with omissions"
                );
            }
        }

        let overrides: Vec<_> = rois
            .iter()
            .zip(&roi_masks)
            .filter_map(|(roi, roi_mask)| {
                roi.relative_electron_density
                    .map(|density| (&roi_mask.mask, density))
            })
            .collect();
        DensityCalibrator::apply_roi_overrides(&mut red.data, &overrides)?;

        masks = rois
            .iter()
            .zip(roi_masks)
            .filter(|(_, roi_mask)| !roi_mask.is_empty())
            .map(|(roi, roi_mask)| (roi.display_color.unwrap_or([0, 255, 0]), roi_mask.mask))
            .collect();
    }

    let params = settings.display_params()?;
    let display_volume = volume.resample(&params, &settings.resample_options())?;
    let display_red = red.resample(
        &params,
        &ResampleOptions {
            fill_value: calibrator.red(settings.fill_value),
            ..settings.resample_options()
        },
    )?;
    info!(
        size = ?display_volume.geometry.size(),
        orientation = %display_volume.geometry.orientation_code(),
        "Display volume ready"
    );

    std::fs::create_dir_all(&cli.output)?;
    let center = display_volume.dim().0 / 2;
    save_preview(&display_volume, center, Window::SOFT_TISSUE, &cli.output.join("ct_axial.png"))?;
    save_preview(
        &display_red,
        center,
        Window::from_range(0.0, 2.0),
        &cli.output.join("red_axial.png"),
    )?;

    if let Some((color, mask)) = masks.first() {
        let mask = VolumeResampler::resample(
            mask.view(),
            &volume.geometry,
            &params,
            &ResampleOptions::labels(),
        )?
        .data;
        let path = cli.output.join("overlay_axial.png");
        display_volume
            .get_overlay_from_axis(center, Orientation::Axial, Window::SOFT_TISSUE, &mask, *color)
            .context("Center slice is out of range")?
            .save(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    Ok(())
}

fn apply_overrides(settings: &mut Settings, cli: &Cli) -> Result<()> {
    if let Some(rotation) = cli.rotation {
        settings.rotation = rotation.try_into()?;
    }
    settings.flip_lr |= cli.flip_lr;
    settings.flip_ap |= cli.flip_ap;
    settings.flip_si |= cli.flip_si;
    if let Some(spacing) = &cli.spacing {
        settings.voxel_spacing = Some([spacing[0], spacing[1], spacing[2]]);
        settings.use_config_voxel_spacing = true;
    }
    Ok(())
}

fn save_preview(volume: &Volume, index: usize, window: Window, path: &Path) -> Result<()> {
    volume
        .get_image_from_axis(index, Orientation::Axial, window)
        .context("Center slice is out of range")?
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Wrote preview");
    Ok(())
}
