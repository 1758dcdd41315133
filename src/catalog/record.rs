use chrono::{DateTime, Utc};
use dicom_core::Tag;
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{HoneypotError, Result};

/// Synthetic patient served by the honeypot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectRecord {
    /// PatientID of the source file, unique within a store
    pub id: String,
    /// PatientName as stored in the catalog file
    pub name: String,
    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uid: String,
    pub modality: String,
    pub created_at: DateTime<Utc>,
}

impl SubjectRecord {
    /// Read a record from a parsed catalog object; PatientID is required
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        let id = read_text(obj, tags::PATIENT_ID)
            .filter(|id| !id.is_empty())
            .ok_or(HoneypotError::MissingAttribute("PatientID"))?;

        Ok(Self {
            id,
            name: read_text(obj, tags::PATIENT_NAME).unwrap_or_default(),
            study_instance_uid: read_text(obj, tags::STUDY_INSTANCE_UID).unwrap_or_default(),
            series_instance_uid: read_text(obj, tags::SERIES_INSTANCE_UID).unwrap_or_default(),
            sop_instance_uid: read_text(obj, tags::SOP_INSTANCE_UID).unwrap_or_default(),
            modality: read_text(obj, tags::MODALITY).unwrap_or_else(|| "OT".to_string()),
            created_at: Utc::now(),
        })
    }

    /// The record every C-MOVE answers with
    pub fn fabricated() -> Self {
        Self {
            id: "12345".to_string(),
            name: "Doe^John".to_string(),
            study_instance_uid: new_uid(),
            series_instance_uid: new_uid(),
            sop_instance_uid: new_uid(),
            modality: "CT".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Fresh UID under the UUID-derived `2.25` root
pub fn new_uid() -> String {
    format!("2.25.{}", Uuid::new_v4().as_u128())
}

/// Text value of `tag` without DICOM padding
pub(crate) fn read_text(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(&['\0', ' '][..]).trim_start().to_string())
}
