//! Structure-set contours in physical space.

use crate::error::ValidationError;
use crate::geometry::ContourPoint;

use std::fmt;
use std::str::FromStr;

/// DICOM `ContourGeometricType` of a contour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContourGeometry {
    /// Closed polygon lying in one slice plane. Rasterized as a filled area.
    ClosedPlanar,
    /// Open polyline lying in one slice plane.
    OpenPlanar,
    /// Open polyline crossing slices.
    OpenNonplanar,
    /// Isolated points.
    Point,
}

impl ContourGeometry {
    pub fn as_dicom_str(&self) -> &'static str {
        match self {
            ContourGeometry::ClosedPlanar => "CLOSED_PLANAR",
            ContourGeometry::OpenPlanar => "OPEN_PLANAR",
            ContourGeometry::OpenNonplanar => "OPEN_NONPLANAR",
            ContourGeometry::Point => "POINT",
        }
    }
}

impl FromStr for ContourGeometry {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // DICOM pads odd-length strings with a trailing space or NUL.
        match s.trim_matches(|c: char| c.is_whitespace() || c == '\0') {
            "CLOSED_PLANAR" => Ok(ContourGeometry::ClosedPlanar),
            "OPEN_PLANAR" => Ok(ContourGeometry::OpenPlanar),
            "OPEN_NONPLANAR" => Ok(ContourGeometry::OpenNonplanar),
            "POINT" => Ok(ContourGeometry::Point),
            other => Err(ValidationError::UnknownGeometricType(other.to_string())),
        }
    }
}

impl fmt::Display for ContourGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_dicom_str())
    }
}

/// One boundary curve of an ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    geometry: ContourGeometry,
    points: Vec<ContourPoint>,
}

impl Contour {
    /// Builds a contour from points, rejecting non-finite coordinates.
    pub fn new(
        geometry: ContourGeometry,
        points: Vec<ContourPoint>,
    ) -> Result<Self, ValidationError> {
        if let Some(index) = points
            .iter()
            .position(|p| p.coords.iter().any(|v| !v.is_finite()))
        {
            return Err(ValidationError::NonFiniteCoordinate { index });
        }
        Ok(Self { geometry, points })
    }

    /// Builds a contour from DICOM `ContourData`: flat `x, y, z` triples in mm.
    pub fn from_contour_data(
        geometry: ContourGeometry,
        data: &[f64],
    ) -> Result<Self, ValidationError> {
        if data.len() % 3 != 0 {
            return Err(ValidationError::ContourArity(data.len()));
        }
        let points = data
            .chunks_exact(3)
            .map(|xyz| ContourPoint::new(xyz[0], xyz[1], xyz[2]))
            .collect();
        Self::new(geometry, points)
    }

    pub fn geometry(&self) -> ContourGeometry {
        self.geometry
    }

    pub fn points(&self) -> &[ContourPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Contour as read from a structure set, before validation.
///
/// Structure-set adapters keep malformed contours in this form so the
/// rasterizer can report and skip them instead of losing the whole ROI.
#[derive(Debug, Clone, PartialEq)]
pub struct RawContour {
    pub geometric_type: String,
    pub data: Vec<f64>,
}

impl RawContour {
    pub fn new(geometric_type: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            geometric_type: geometric_type.into(),
            data,
        }
    }

    pub fn parse(&self) -> Result<Contour, ValidationError> {
        let geometry = self.geometric_type.parse()?;
        Contour::from_contour_data(geometry, &self.data)
    }
}

/// A structure-set ROI: identity, display attributes and its contours.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roi {
    pub number: i32,
    pub name: String,
    pub display_color: Option<[u8; 3]>,
    /// `REL_ELEC_DENSITY` physical property, when the structure set assigns one.
    pub relative_electron_density: Option<f64>,
    pub contours: Vec<RawContour>,
}
