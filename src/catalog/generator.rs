//! Synthetic catalog files written when the catalog directory is empty

use std::path::{Path, PathBuf};

use chrono::Local;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::meta::FileMetaTableBuilder;
use dicom_object::{FileDicomObject, InMemDicomObject};
use rand::seq::SliceRandom;

use crate::audit::{AuditEvent, AuditKind, AuditLogger};
use crate::catalog::record::new_uid;
use crate::error::{HoneypotError, Result};

const GIVEN_NAMES: &[&str] = &[
    "Frederik", "Sofie", "Lukas", "Emma", "William", "Ida", "Noah", "Anna", "Oliver", "Laura",
];

const FAMILY_NAMES: &[&str] = &[
    "Jensen",
    "Nielsen",
    "Hansen",
    "Pedersen",
    "Andersen",
    "Christensen",
    "Larsen",
    "Sørensen",
    "Rasmussen",
    "Jørgensen",
];

/// Write `count` CT files named `test_file<N>.dcm` into `dir`.
///
/// Patient ids run from 1 to `count`. Each written file is reported as a
/// housekeeping event.
pub fn generate(
    dir: &Path,
    count: usize,
    image_size: u16,
    audit: &AuditLogger,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut rng = rand::thread_rng();
    let mut written = Vec::with_capacity(count);

    for n in 1..=count {
        let given = GIVEN_NAMES.choose(&mut rng).copied().unwrap_or("Anna");
        let family = FAMILY_NAMES.choose(&mut rng).copied().unwrap_or("Jensen");
        let name = format!("{}^{}", given, family);

        let path = dir.join(format!("test_file{}.dcm", n));
        synthetic_file(&n.to_string(), &name, image_size)?
            .write_to_file(&path)
            .map_err(HoneypotError::dicom)?;

        audit.emit(
            AuditEvent::info(AuditKind::CatalogGenerate, "Created")
                .describe("Created fake DICOM file")
                .with("file", &path.display().to_string()),
        );
        written.push(path);
    }

    Ok(written)
}

fn synthetic_file(
    patient_id: &str,
    patient_name: &str,
    image_size: u16,
) -> Result<FileDicomObject<InMemDicomObject>> {
    let now = Local::now();
    let sop_instance_uid = new_uid();
    let pixels = usize::from(image_size) * usize::from(image_size);

    let obj = InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(sop_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::STUDY_DATE,
            VR::DA,
            PrimitiveValue::from(now.format("%Y%m%d").to_string()),
        ),
        DataElement::new(
            tags::STUDY_TIME,
            VR::TM,
            PrimitiveValue::from(now.format("%H%M%S").to_string()),
        ),
        DataElement::new(tags::MODALITY, VR::CS, PrimitiveValue::from("CT")),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(patient_name)),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::from(patient_id)),
        DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(new_uid()),
        ),
        DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(new_uid()),
        ),
        DataElement::new(tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1_u16)),
        DataElement::new(
            tags::PHOTOMETRIC_INTERPRETATION,
            VR::CS,
            PrimitiveValue::from("MONOCHROME2"),
        ),
        DataElement::new(tags::ROWS, VR::US, PrimitiveValue::from(image_size)),
        DataElement::new(tags::COLUMNS, VR::US, PrimitiveValue::from(image_size)),
        DataElement::new(tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(16_u16)),
        DataElement::new(tags::BITS_STORED, VR::US, PrimitiveValue::from(12_u16)),
        DataElement::new(tags::HIGH_BIT, VR::US, PrimitiveValue::from(11_u16)),
        DataElement::new(
            tags::PIXEL_REPRESENTATION,
            VR::US,
            PrimitiveValue::from(0_u16),
        ),
        DataElement::new(
            tags::PIXEL_DATA,
            VR::OW,
            PrimitiveValue::U16(vec![0_u16; pixels].into()),
        ),
    ]);

    obj.with_meta(
        FileMetaTableBuilder::new()
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_instance_uid.as_str())
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN),
    )
    .map_err(HoneypotError::dicom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SubjectRecord;
    use tempfile::tempdir;

    #[test]
    fn test_generated_files_load_back() {
        let dir = tempdir().unwrap();
        let (audit, channels) = AuditLogger::in_memory();

        let written = generate(dir.path(), 3, 16, &audit).unwrap();
        assert_eq!(written.len(), 3);
        assert!(written[2].ends_with("test_file3.dcm"));

        let obj = dicom_object::open_file(&written[0]).unwrap();
        let record = SubjectRecord::from_object(&obj).unwrap();
        assert_eq!(record.id, "1");
        assert_eq!(record.modality, "CT");
        let (given, family) = record.name.split_once('^').unwrap();
        assert!(GIVEN_NAMES.contains(&given));
        assert!(FAMILY_NAMES.contains(&family));

        // housekeeping only reaches the detailed channel
        assert_eq!(channels.detailed.len(), 3);
        assert!(channels.simplified.is_empty());
    }
}
