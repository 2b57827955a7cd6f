use crate::error::ConfigurationError;

use nalgebra::Matrix3;
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

/// Sampling kernel used when resampling a volume.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    /// Trilinear, for continuous data such as CT or dose.
    #[default]
    Linear,
    /// Nearest neighbour, for labels and masks.
    Nearest,
}

/// In-plane display rotation, clockwise.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "i32")]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Result<Self, ConfigurationError> {
        match degrees {
            0 => Ok(Rotation::None),
            90 => Ok(Rotation::Clockwise90),
            180 => Ok(Rotation::Clockwise180),
            270 => Ok(Rotation::Clockwise270),
            other => Err(ConfigurationError::UnsupportedRotation(other)),
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }

    /// Whether the rotation exchanges the displayed left-right and
    /// anterior-posterior axes.
    pub fn swaps_in_plane_axes(&self) -> bool {
        matches!(self, Rotation::Clockwise90 | Rotation::Clockwise270)
    }

    /// Rotation about the patient z axis by `-degrees`.
    ///
    /// Built from exact cosines so quarter turns map grid points onto grid
    /// points without rounding noise.
    pub fn matrix(&self) -> Matrix3<f64> {
        let (cos, sin) = match self {
            Rotation::None => (1.0, 0.0),
            Rotation::Clockwise90 => (0.0, -1.0),
            Rotation::Clockwise180 => (-1.0, 0.0),
            Rotation::Clockwise270 => (0.0, 1.0),
        };
        Matrix3::new(cos, -sin, 0.0, sin, cos, 0.0, 0.0, 0.0, 1.0)
    }
}

impl TryFrom<i32> for Rotation {
    type Error = ConfigurationError;

    fn try_from(degrees: i32) -> Result<Self, Self::Error> {
        Self::from_degrees(degrees)
    }
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortBy {
    /// Position along the slice normal.
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    None,
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(270), Ok(Rotation::Clockwise270));
        assert_eq!(
            Rotation::from_degrees(45),
            Err(ConfigurationError::UnsupportedRotation(45))
        );
        assert_eq!(Rotation::try_from(90).map(|r| r.degrees()), Ok(90));
    }

    #[test]
    fn test_quarter_turn_is_exact() {
        let rotated = Rotation::Clockwise90.matrix() * Vector3::new(1.0, 0.0, 0.0);
        assert_eq!(rotated, Vector3::new(0.0, -1.0, 0.0));
        let full = Rotation::Clockwise90.matrix() * Rotation::Clockwise270.matrix();
        assert_eq!(full, Matrix3::identity());
    }

    #[test]
    fn test_rotation_deserializes_from_degrees() {
        let rotation: Rotation = serde_json::from_str("180").unwrap();
        assert_eq!(rotation, Rotation::Clockwise180);
        assert!(serde_json::from_str::<Rotation>("30").is_err());
    }
}
