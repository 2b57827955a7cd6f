//! Contour → binary mask rasterization.
//!
//! Each [`ContourGeometry`] variant has its own rasterization routine:
//!  - [`ContourGeometry::ClosedPlanar`]: even-odd scanline fill on the
//!    contour's slice, with the boundary edges drawn in as well
//!  - [`ContourGeometry::OpenPlanar`] / [`ContourGeometry::OpenNonplanar`]:
//!    connected voxel path through the vertices
//!  - [`ContourGeometry::Point`]: the vertex voxels only
//!
//! All contours of one ROI are OR-ed into the same mask. Vertices may lie
//! outside the grid. Fills and paths are clipped to the array and never wrap.

use crate::contour::{Contour, ContourGeometry, RawContour, Roi};
use crate::error::{GeometryError, ValidationError};
use crate::geometry::{CoordinateTransform, VolumeGeometry};

use ndarray::{Array3, ArrayViewMut2, ArrayViewMut3, Axis, s};
use rayon::prelude::*;
use tracing::{debug, warn};

/// Contour that was left out of a mask, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedContour {
    pub index: usize,
    pub reason: ValidationError,
}

/// Diagnostics returned with every mask, so partial results stay traceable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RasterReport {
    /// Contours that passed validation and were rasterized.
    pub contours_rasterized: usize,
    /// Contours rejected during validation.
    pub skipped_contours: Vec<SkippedContour>,
    /// Vertices that contributed nothing: off the contour's plane, or outside
    /// the grid where only vertex voxels are marked.
    pub skipped_points: usize,
    /// Vertices outside the grid whose fill or path was clipped.
    pub clipped_points: usize,
    /// Voxels set in the final mask.
    pub voxels_set: usize,
}

impl RasterReport {
    /// True when nothing was skipped or clipped.
    pub fn is_complete(&self) -> bool {
        self.skipped_contours.is_empty() && self.skipped_points == 0 && self.clipped_points == 0
    }
}

/// Binary mask of one ROI with its diagnostics.
#[derive(Debug, Clone)]
pub struct RoiMask {
    pub mask: Array3<bool>,
    pub report: RasterReport,
}

impl RoiMask {
    pub fn is_empty(&self) -> bool {
        self.report.voxels_set == 0
    }
}

/// Rasterizes contours onto the grid of one reference geometry.
#[derive(Debug, Clone)]
pub struct ContourRasterizer {
    geometry: VolumeGeometry,
    transform: CoordinateTransform,
}

impl ContourRasterizer {
    pub fn new(geometry: &VolumeGeometry) -> Result<Self, GeometryError> {
        Ok(Self {
            geometry: geometry.clone(),
            transform: geometry.transform()?,
        })
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    /// Empty mask matching the reference geometry.
    pub fn empty_mask(&self) -> Array3<bool> {
        Array3::from_elem(self.geometry.shape(), false)
    }

    /// Builds the mask of one ROI from validated contours.
    pub fn rasterize(&self, contours: &[Contour]) -> RoiMask {
        let mut mask = self.empty_mask();
        let mut report = RasterReport::default();
        for (index, contour) in contours.iter().enumerate() {
            let result = self.rasterize_contour(&mut mask.view_mut(), contour, &mut report);
            if let Err(reason) = result {
                Self::skip(&mut report, index, reason);
            }
        }
        Self::finish(mask, report)
    }

    /// Builds the mask of one ROI from raw structure-set contours.
    ///
    /// Malformed contours are logged, recorded in the report and skipped.
    pub fn rasterize_raw(&self, contours: &[RawContour]) -> RoiMask {
        let mut mask = self.empty_mask();
        let mut report = RasterReport::default();
        for (index, raw) in contours.iter().enumerate() {
            let result = raw.parse().and_then(|contour| {
                self.rasterize_contour(&mut mask.view_mut(), &contour, &mut report)
            });
            if let Err(reason) = result {
                Self::skip(&mut report, index, reason);
            }
        }
        Self::finish(mask, report)
    }

    /// Builds the masks of many ROIs in parallel, in input order.
    pub fn rasterize_rois(&self, rois: &[Roi]) -> Vec<RoiMask> {
        rois.par_iter()
            .map(|roi| {
                let roi_mask = self.rasterize_raw(&roi.contours);
                debug!(
                    roi = %roi.name,
                    number = roi.number,
                    voxels = roi_mask.report.voxels_set,
                    skipped_contours = roi_mask.report.skipped_contours.len(),
                    skipped_points = roi_mask.report.skipped_points,
                    "Rasterized ROI"
                );
                roi_mask
            })
            .collect()
    }

    /// ORs one contour into a caller-owned mask.
    ///
    /// The mask must have the reference geometry's shape. `report.voxels_set`
    /// is left to the caller, who owns the buffer.
    pub fn rasterize_into(
        &self,
        mask: &mut Array3<bool>,
        contour: &Contour,
        report: &mut RasterReport,
    ) -> Result<(), ValidationError> {
        let expected = self.geometry.shape();
        if mask.dim() != expected {
            return Err(ValidationError::MaskShape {
                expected,
                actual: mask.dim(),
            });
        }
        self.rasterize_contour(&mut mask.view_mut(), contour, report)
    }

    fn rasterize_contour(
        &self,
        mask: &mut ArrayViewMut3<'_, bool>,
        contour: &Contour,
        report: &mut RasterReport,
    ) -> Result<(), ValidationError> {
        let indices = self.transform.physical_to_indices(contour.points())?;
        match contour.geometry() {
            ContourGeometry::ClosedPlanar => fill_closed_planar(mask, &indices, report),
            ContourGeometry::OpenPlanar | ContourGeometry::OpenNonplanar => {
                draw_path(mask, &indices, report)
            }
            ContourGeometry::Point => mark_points(mask, &indices, report),
        }
        report.contours_rasterized += 1;
        Ok(())
    }

    fn skip(report: &mut RasterReport, index: usize, reason: ValidationError) {
        warn!(index, %reason, "Skipping malformed contour");
        report.skipped_contours.push(SkippedContour { index, reason });
    }

    fn finish(mask: Array3<bool>, mut report: RasterReport) -> RoiMask {
        report.voxels_set = mask.iter().filter(|&&v| v).count();
        RoiMask { mask, report }
    }
}

fn in_bounds(mask: &ArrayViewMut3<'_, bool>, index: [i64; 3]) -> bool {
    let (slices, rows, cols) = mask.dim();
    (0..cols as i64).contains(&index[0])
        && (0..rows as i64).contains(&index[1])
        && (0..slices as i64).contains(&index[2])
}

/// Sets the voxel at `(i, j, k)` if it lies inside the mask.
fn set_voxel(mask: &mut ArrayViewMut3<'_, bool>, index: [i64; 3]) -> bool {
    if !in_bounds(mask, index) {
        return false;
    }
    mask[[index[2] as usize, index[1] as usize, index[0] as usize]] = true;
    true
}

fn mark_points(
    mask: &mut ArrayViewMut3<'_, bool>,
    indices: &[[i64; 3]],
    report: &mut RasterReport,
) {
    for &index in indices {
        if !set_voxel(mask, index) {
            report.skipped_points += 1;
        }
    }
}

fn draw_path(
    mask: &mut ArrayViewMut3<'_, bool>,
    indices: &[[i64; 3]],
    report: &mut RasterReport,
) {
    report.clipped_points += indices.iter().filter(|&&i| !in_bounds(mask, i)).count();
    match indices {
        [] => {}
        [single] => {
            set_voxel(mask, *single);
        }
        _ => {
            for pair in indices.windows(2) {
                draw_segment(mask, pair[0], pair[1]);
            }
        }
    }
}

/// Fills a closed contour on the slice of its first vertex.
///
/// Vertices are valid when they sit on that slice, whether inside the grid or
/// beyond it: an out-of-grid vertex still shapes the polygon, which is then
/// clipped. With fewer than 3 distinct valid vertices there is no area, so
/// only the vertex voxels that fall inside the grid are marked.
fn fill_closed_planar(
    mask: &mut ArrayViewMut3<'_, bool>,
    indices: &[[i64; 3]],
    report: &mut RasterReport,
) {
    let Some(first) = indices.first() else {
        return;
    };
    let slice = first[2];
    let (slices, rows, cols) = mask.dim();
    if !(0..slices as i64).contains(&slice) {
        report.skipped_points += indices.len();
        return;
    }

    let mut polygon: Vec<[i64; 2]> = Vec::with_capacity(indices.len());
    for index in indices {
        if index[2] != slice {
            report.skipped_points += 1;
            continue;
        }
        let vertex = [index[0], index[1]];
        if polygon.last() != Some(&vertex) {
            polygon.push(vertex);
        }
    }
    if polygon.len() > 1 && polygon.first() == polygon.last() {
        polygon.pop();
    }

    let outside = |v: &[i64; 2]| {
        !(0..cols as i64).contains(&v[0]) || !(0..rows as i64).contains(&v[1])
    };

    if polygon.len() < 3 {
        for vertex in &polygon {
            if !set_voxel(mask, [vertex[0], vertex[1], slice]) {
                report.skipped_points += 1;
            }
        }
        return;
    }
    report.clipped_points += polygon.iter().filter(|v| outside(v)).count();

    scanline_fill(&mut mask.index_axis_mut(Axis(0), slice as usize), &polygon);
    for (a, b) in polygon.iter().zip(polygon.iter().cycle().skip(1)) {
        draw_segment(mask, [a[0], a[1], slice], [b[0], b[1], slice]);
    }
}

/// Even-odd fill of a polygon given as `(column, row)` vertices.
///
/// Each row samples the edges at the pixel center with a half-open rule on
/// the edge's row span, so shared vertices are counted once.
fn scanline_fill(plane: &mut ArrayViewMut2<'_, bool>, polygon: &[[i64; 2]]) {
    let (rows, cols) = plane.dim();
    let min_row = polygon.iter().map(|v| v[1]).min().unwrap_or(0).max(0);
    let max_row = polygon
        .iter()
        .map(|v| v[1])
        .max()
        .unwrap_or(-1)
        .min(rows as i64 - 1);
    let last_col = cols as f64 - 1.0;

    let mut crossings: Vec<f64> = Vec::with_capacity(polygon.len());
    for row in min_row..=max_row {
        let y = row as f64;
        crossings.clear();
        for (a, b) in polygon.iter().zip(polygon.iter().cycle().skip(1)) {
            let (ya, yb) = (a[1] as f64, b[1] as f64);
            if (ya <= y && y < yb) || (yb <= y && y < ya) {
                let t = (y - ya) / (yb - ya);
                crossings.push(a[0] as f64 + t * (b[0] as f64 - a[0] as f64));
            }
        }
        crossings.sort_by(f64::total_cmp);

        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0);
            let end = span[1].floor().min(last_col);
            if start > end {
                continue;
            }
            let (row, start, end) = (row as usize, start as usize, end as usize);
            plane.slice_mut(s![row, start..=end]).fill(true);
        }
    }
}

/// Restricts the segment `start + t·delta, t ∈ [0, 1]` to the part inside
/// the voxel box `[-0.5, upper]` on every axis.
fn clip_to_box(start: [f64; 3], delta: [f64; 3], upper: [f64; 3]) -> Option<(f64, f64)> {
    const LOWER: f64 = -0.5;
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for axis in 0..3 {
        if delta[axis] == 0.0 {
            if start[axis] < LOWER || start[axis] > upper[axis] {
                return None;
            }
            continue;
        }
        let ta = (LOWER - start[axis]) / delta[axis];
        let tb = (upper[axis] - start[axis]) / delta[axis];
        t0 = t0.max(ta.min(tb));
        t1 = t1.min(ta.max(tb));
        if t0 > t1 {
            return None;
        }
    }
    Some((t0, t1))
}

/// Marks a connected run of voxels from `a` to `b` (both `(i, j, k)`).
///
/// The step count is the largest per-axis extent, so consecutive samples
/// are never more than one voxel apart on any axis.
fn draw_segment(mask: &mut ArrayViewMut3<'_, bool>, a: [i64; 3], b: [i64; 3]) {
    let (slices, rows, cols) = mask.dim();
    let start = a.map(|v| v as f64);
    let delta = [
        b[0] as f64 - start[0],
        b[1] as f64 - start[1],
        b[2] as f64 - start[2],
    ];
    let steps = delta.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
    if steps == 0.0 {
        set_voxel(mask, a);
        return;
    }

    let upper = [cols as f64 - 0.5, rows as f64 - 0.5, slices as f64 - 0.5];
    let Some((t0, t1)) = clip_to_box(start, delta, upper) else {
        return;
    };
    let first = (t0 * steps).floor() as u64;
    let last = ((t1 * steps).ceil() as u64).min(steps as u64);
    for step in first..=last {
        let t = step as f64 / steps;
        let point = [
            (start[0] + t * delta[0]).round_ties_even() as i64,
            (start[1] + t * delta[1]).round_ties_even() as i64,
            (start[2] + t * delta[2]).round_ties_even() as i64,
        ];
        set_voxel(mask, point);
    }
}
