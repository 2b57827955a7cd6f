//! RT Structure Set reading.
//!
//! Contour data is kept raw so a malformed contour only affects itself when
//! it is rasterized.

use crate::contour::{RawContour, Roi};

use dicom::core::Tag;
use dicom::object::{InMemDicomObject, open_file};
use dicom_dictionary_std::tags;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

const RED_PROPERTY_NAMES: [&str; 3] = ["REL_ELEC_DENSITY", "RELELECDENSITY", "RED"];

#[derive(Debug, Error)]
pub enum RtStructError {
    #[error("Expected modality RTSTRUCT, found {0}")]
    NotStructureSet(String),

    #[error("Missing required attribute {0}")]
    MissingAttribute(&'static str),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

pub struct RtStructReader;

impl RtStructReader {
    pub fn read_file(path: impl AsRef<Path>) -> Result<Vec<Roi>, RtStructError> {
        let object = open_file(path.as_ref())?;
        Self::read_object(&object)
    }

    /// Extracts every ROI of a structure set, in `StructureSetROISequence`
    /// order.
    pub fn read_object(object: &InMemDicomObject) -> Result<Vec<Roi>, RtStructError> {
        if let Some(modality) = get_string(object, tags::MODALITY) {
            if modality != "RTSTRUCT" {
                return Err(RtStructError::NotStructureSet(modality));
            }
        }

        let roi_items = sequence(object, tags::STRUCTURE_SET_ROI_SEQUENCE)
            .ok_or(RtStructError::MissingAttribute("StructureSetROISequence"))?;

        let mut rois: Vec<Roi> = Vec::with_capacity(roi_items.len());
        let mut by_number: HashMap<i32, usize> = HashMap::new();
        for item in roi_items {
            let Some(number) = get_i32(item, tags::ROI_NUMBER) else {
                warn!("Skipping structure set ROI without ROINumber");
                continue;
            };
            by_number.insert(number, rois.len());
            rois.push(Roi {
                number,
                name: get_string(item, tags::ROI_NAME).unwrap_or_default(),
                ..Roi::default()
            });
        }

        for item in sequence(object, tags::ROI_CONTOUR_SEQUENCE).unwrap_or_default() {
            let Some(roi) = get_i32(item, tags::REFERENCED_ROI_NUMBER)
                .and_then(|number| by_number.get(&number))
                .map(|&index| &mut rois[index])
            else {
                warn!("ROI contour references an unknown ROI");
                continue;
            };
            roi.display_color = display_color(item);
            roi.contours = read_contours(item, roi.number);
        }

        for item in sequence(object, tags::RTROI_OBSERVATIONS_SEQUENCE).unwrap_or_default() {
            let Some(&index) = get_i32(item, tags::REFERENCED_ROI_NUMBER)
                .and_then(|number| by_number.get(&number))
            else {
                continue;
            };
            if let Some(density) = relative_electron_density(item) {
                rois[index].relative_electron_density = Some(density);
            }
        }

        debug!(rois = rois.len(), "Read structure set");
        Ok(rois)
    }
}

fn read_contours(item: &InMemDicomObject, roi_number: i32) -> Vec<RawContour> {
    let mut contours = Vec::new();
    for contour in sequence(item, tags::CONTOUR_SEQUENCE).unwrap_or_default() {
        let geometric_type = get_string(contour, tags::CONTOUR_GEOMETRIC_TYPE).unwrap_or_default();
        match contour
            .element(tags::CONTOUR_DATA)
            .ok()
            .map(|e| e.to_multi_float64())
        {
            Some(Ok(data)) => contours.push(RawContour::new(geometric_type, data)),
            Some(Err(error)) => {
                warn!(roi = roi_number, %error, "Skipping contour with unreadable ContourData")
            }
            None => warn!(roi = roi_number, "Skipping contour without ContourData"),
        }
    }
    contours
}

fn display_color(item: &InMemDicomObject) -> Option<[u8; 3]> {
    let values = item
        .element(tags::ROI_DISPLAY_COLOR)
        .ok()?
        .to_multi_int::<i32>()
        .ok()?;
    match values.as_slice() {
        &[r, g, b] => Some([r, g, b].map(|c| c.clamp(0, 255) as u8)),
        _ => None,
    }
}

/// First relative electron density found in `ROIPhysicalPropertiesSequence`.
fn relative_electron_density(item: &InMemDicomObject) -> Option<f64> {
    sequence(item, tags::ROI_PHYSICAL_PROPERTIES_SEQUENCE)?
        .iter()
        .filter(|property| {
            get_string(property, tags::ROI_PHYSICAL_PROPERTY)
                .is_some_and(|name| RED_PROPERTY_NAMES.contains(&name.to_uppercase().as_str()))
        })
        .find_map(|property| {
            property
                .element(tags::ROI_PHYSICAL_PROPERTY_VALUE)
                .ok()?
                .to_float64()
                .ok()
                .filter(|value| value.is_finite())
        })
}

fn sequence(object: &InMemDicomObject, tag: Tag) -> Option<&[InMemDicomObject]> {
    object.element(tag).ok()?.items()
}

fn get_string(object: &InMemDicomObject, tag: Tag) -> Option<String> {
    let value = object.element(tag).ok()?.to_str().ok()?;
    Some(value.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
}

fn get_i32(object: &InMemDicomObject, tag: Tag) -> Option<i32> {
    object.element(tag).ok()?.to_int::<i32>().ok()
}
