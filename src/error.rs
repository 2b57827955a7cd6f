use thiserror::Error;

/// Errors raised while building or inverting a volume geometry.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Volume size must be positive on every axis, got {0:?}")]
    EmptySize([usize; 3]),

    #[error("Spacing must be finite and strictly positive, got {0:?}")]
    NonPositiveSpacing([f64; 3]),

    #[error("Origin must be finite, got {0:?}")]
    NonFiniteOrigin([f64; 3]),

    #[error("Direction matrix is not invertible (determinant {determinant})")]
    SingularDirection { determinant: f64 },

    #[error("Expected {expected} direction cosines, got {actual}")]
    DirectionArity { expected: usize, actual: usize },
}

/// Errors raised for malformed contour input. Callers skip the affected
/// contour or ROI and continue with its siblings.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Contour data holds {0} values, which is not a multiple of 3")]
    ContourArity(usize),

    #[error("Point array has {0} columns, expected 3")]
    ColumnCount(usize),

    #[error("Contour point {index} has a non-finite coordinate")]
    NonFiniteCoordinate { index: usize },

    #[error("Unknown contour geometric type '{0}'")]
    UnknownGeometricType(String),

    #[error("Mask shape {actual:?} does not match geometry shape {expected:?}")]
    MaskShape {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },
}

/// Errors raised for invalid resample or calibration parameters.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Expected a 3D volume, got {0} dimensions")]
    NotThreeDimensional(usize),

    #[error("Overridden spacing must be finite and strictly positive, got {0:?}")]
    NonPositiveSpacing([f64; 3]),

    #[error("Spacing {0:?} would need more voxels than can be allocated")]
    ResampledSizeTooLarge([f64; 3]),

    #[error("Unsupported rotation of {0} degrees, expected one of 0, 90, 180, 270")]
    UnsupportedRotation(i32),

    #[error("Volume shape {actual:?} does not match geometry shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize, usize),
        actual: (usize, usize, usize),
    },

    #[error("Calibration needs at least 2 valid points, got {0}")]
    TooFewCalibrationPoints(usize),

    #[error("Calibration lists differ in length: {hu} HU values, {red} RED values")]
    CalibrationLengthMismatch { hu: usize, red: usize },
}

/// Crate-level error used by the DICOM and configuration adapters.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings error: {0}")]
    Json(#[from] serde_json::Error),
}
