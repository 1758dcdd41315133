//! Conversions between catalog records, query identifiers and log payloads

use std::collections::BTreeMap;

use dicom_core::dictionary::{DataDictionary, DataDictionaryEntry};
use dicom_core::header::Header;
use dicom_core::value::Value;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::{tags, uids, StandardDataDictionary};
use dicom_object::InMemDicomObject;

use crate::catalog::SubjectRecord;
use crate::error::{HoneypotError, Result};

/// Longest value written to the logs, in characters
const MAX_LOGGED_VALUE: usize = 256;

/// Response dataset describing `record`
pub fn record_dataset(record: &SubjectRecord) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(uids::CT_IMAGE_STORAGE),
        ),
        DataElement::new(
            tags::SOP_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(record.sop_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::MODALITY,
            VR::CS,
            PrimitiveValue::from(record.modality.as_str()),
        ),
        DataElement::new(
            tags::PATIENT_NAME,
            VR::PN,
            PrimitiveValue::from(record.name.as_str()),
        ),
        DataElement::new(
            tags::PATIENT_ID,
            VR::LO,
            PrimitiveValue::from(record.id.as_str()),
        ),
        DataElement::new(
            tags::STUDY_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(record.study_instance_uid.as_str()),
        ),
        DataElement::new(
            tags::SERIES_INSTANCE_UID,
            VR::UI,
            PrimitiveValue::from(record.series_instance_uid.as_str()),
        ),
    ])
}

/// PatientName search term of a query identifier.
///
/// `None` when the identifier has no PatientName element; an element that
/// cannot be read as text is an error.
pub fn patient_name_term(identifier: &InMemDicomObject) -> Result<Option<String>> {
    match identifier.element(tags::PATIENT_NAME) {
        Ok(elem) => {
            let text = elem.to_str().map_err(HoneypotError::dicom)?;
            Ok(Some(text.trim_end_matches(&['\0', ' '][..]).to_string()))
        }
        Err(_) => Ok(None),
    }
}

/// Tag to text rendering of a dataset for the audit channels.
///
/// Binary values are summarized by length and long values are truncated.
pub fn text_map(obj: &InMemDicomObject) -> BTreeMap<String, String> {
    obj.iter()
        .map(|elem| {
            let tag = elem.tag();
            let key = match StandardDataDictionary.by_tag(tag) {
                Some(entry) => format!("({:04X},{:04X}) {}", tag.0, tag.1, entry.alias()),
                None => format!("({:04X},{:04X})", tag.0, tag.1),
            };
            (key, render_value(elem.vr(), elem.value()))
        })
        .collect()
}

fn render_value<I, P>(vr: VR, value: &Value<I, P>) -> String {
    match value {
        Value::Sequence(seq) => format!("<sequence of {} items>", seq.items().len()),
        Value::PixelSequence(_) => "<encapsulated pixel data>".to_string(),
        Value::Primitive(primitive) if is_binary(vr) => {
            format!("<{} bytes>", primitive.calculate_byte_len())
        }
        Value::Primitive(primitive) => truncate(&primitive.to_str()),
    }
}

fn is_binary(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB | VR::OD | VR::OF | VR::OL | VR::OV | VR::OW | VR::UN
    )
}

fn truncate(text: &str) -> String {
    let text = text.trim_end_matches(&['\0', ' '][..]);
    match text.char_indices().nth(MAX_LOGGED_VALUE) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
