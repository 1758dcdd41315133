//! DIMSE message encoding: command sets, response commands and PDV reassembly
//!
//! Command sets are always encoded in Implicit VR Little Endian. Datasets use
//! the transfer syntax negotiated for their presentation context.

use dicom_core::{dicom_value, DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_encoding::transfer_syntax::{TransferSyntax, TransferSyntaxIndex};
use dicom_object::InMemDicomObject;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;

use crate::types::DimseStatus;
use crate::{DimseError, Result};

/// Implicit VR Little Endian, the transfer syntax of every command set
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";

/// CommandDataSetType value meaning "no dataset follows"
pub const NO_DATASET: u16 = 0x0101;

/// Payload budget for one PDV so a P-DATA-TF fits the smallest common max PDU
pub const MAX_PDV_PAYLOAD: usize = 16_372;

/// Command Field (0000,0100) values of the request primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    CStore,
    CGet,
    CFind,
    CMove,
    CEcho,
    CCancel,
    Other(u16),
}

impl CommandField {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => CommandField::CStore,
            0x0010 => CommandField::CGet,
            0x0020 => CommandField::CFind,
            0x0021 => CommandField::CMove,
            0x0030 => CommandField::CEcho,
            0x0FFF => CommandField::CCancel,
            other => CommandField::Other(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            CommandField::CStore => 0x0001,
            CommandField::CGet => 0x0010,
            CommandField::CFind => 0x0020,
            CommandField::CMove => 0x0021,
            CommandField::CEcho => 0x0030,
            CommandField::CCancel => 0x0FFF,
            CommandField::Other(code) => *code,
        }
    }

    /// Command field of the matching response primitive
    pub fn response_code(&self) -> u16 {
        self.code() | 0x8000
    }
}

/// The parts of a request command set the listener acts on
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSet {
    pub field: CommandField,
    pub message_id: u16,
    pub sop_class_uid: String,
    pub sop_instance_uid: Option<String>,
    pub move_destination: Option<String>,
    pub has_dataset: bool,
}

impl CommandSet {
    /// Extract the request fields from a decoded command set
    pub fn from_object(obj: &InMemDicomObject) -> Result<Self> {
        let field = obj
            .element(tags::COMMAND_FIELD)
            .map_err(|_| DimseError::MalformedCommand("missing CommandField".into()))?
            .to_int::<u16>()
            .map_err(|e| DimseError::MalformedCommand(format!("CommandField: {}", e)))?;

        // C-CANCEL carries MessageIDBeingRespondedTo instead of MessageID
        let message_id = read_u16(obj, tags::MESSAGE_ID)
            .or_else(|| read_u16(obj, tags::MESSAGE_ID_BEING_RESPONDED_TO))
            .unwrap_or(0);

        let data_set_type = read_u16(obj, tags::COMMAND_DATA_SET_TYPE).unwrap_or(NO_DATASET);

        Ok(Self {
            field: CommandField::from_code(field),
            message_id,
            sop_class_uid: read_str(obj, tags::AFFECTED_SOP_CLASS_UID).unwrap_or_default(),
            sop_instance_uid: read_str(obj, tags::AFFECTED_SOP_INSTANCE_UID),
            move_destination: read_str(obj, tags::MOVE_DESTINATION),
            has_dataset: data_set_type != NO_DATASET,
        })
    }
}

/// Sub-operation counters reported in C-GET/C-MOVE responses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubOperationCounters {
    pub remaining: u32,
    pub completed: u32,
    pub failed: u32,
    pub warning: u32,
}

/// Build the response command set answering `request`
pub fn response_command(
    request: &CommandSet,
    status: DimseStatus,
    with_dataset: bool,
    counters: Option<SubOperationCounters>,
) -> InMemDicomObject {
    let data_set_type = if with_dataset { 0x0000 } else { NO_DATASET };
    let mut elements = vec![
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(request.sop_class_uid.as_str()),
        ),
        DataElement::new(
            tags::COMMAND_FIELD,
            VR::US,
            dicom_value!(U16, [request.field.response_code()]),
        ),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [request.message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [data_set_type]),
        ),
        DataElement::new(tags::STATUS, VR::US, dicom_value!(U16, [status.code()])),
    ];

    if request.field == CommandField::CStore {
        if let Some(uid) = &request.sop_instance_uid {
            elements.push(DataElement::new(
                tags::AFFECTED_SOP_INSTANCE_UID,
                VR::UI,
                PrimitiveValue::from(uid.as_str()),
            ));
        }
    }

    if let Some(counters) = counters {
        let clamp = |n: u32| n.min(u16::MAX as u32) as u16;
        // Remaining is only meaningful while the operation is pending
        if !status.is_final() {
            elements.push(DataElement::new(
                tags::NUMBER_OF_REMAINING_SUBOPERATIONS,
                VR::US,
                dicom_value!(U16, [clamp(counters.remaining)]),
            ));
        }
        elements.push(DataElement::new(
            tags::NUMBER_OF_COMPLETED_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [clamp(counters.completed)]),
        ));
        elements.push(DataElement::new(
            tags::NUMBER_OF_FAILED_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [clamp(counters.failed)]),
        ));
        elements.push(DataElement::new(
            tags::NUMBER_OF_WARNING_SUBOPERATIONS,
            VR::US,
            dicom_value!(U16, [clamp(counters.warning)]),
        ));
    }

    InMemDicomObject::command_from_element_iter(elements)
}

/// Look up a transfer syntax by UID, tolerating trailing padding
pub fn transfer_syntax(uid: &str) -> Result<&'static TransferSyntax> {
    let uid = uid.trim_end_matches(&['\0', ' '][..]);
    TransferSyntaxRegistry
        .get(uid)
        .ok_or_else(|| DimseError::UnsupportedTransferSyntax(uid.to_string()))
}

pub fn encode_command(obj: &InMemDicomObject) -> Result<Vec<u8>> {
    encode_dataset(obj, IMPLICIT_VR_LITTLE_ENDIAN)
}

pub fn decode_command(bytes: &[u8]) -> Result<CommandSet> {
    let obj = decode_dataset(bytes, IMPLICIT_VR_LITTLE_ENDIAN)?;
    CommandSet::from_object(&obj)
}

pub fn encode_dataset(obj: &InMemDicomObject, ts_uid: &str) -> Result<Vec<u8>> {
    let ts = transfer_syntax(ts_uid)?;
    let mut out = Vec::new();
    obj.write_dataset_with_ts(&mut out, ts)
        .map_err(|e| DimseError::encoding(e.to_string()))?;
    Ok(out)
}

pub fn decode_dataset(bytes: &[u8], ts_uid: &str) -> Result<InMemDicomObject> {
    let ts = transfer_syntax(ts_uid)?;
    InMemDicomObject::read_dataset_with_ts(bytes, ts).map_err(|e| DimseError::parsing(e.to_string()))
}

/// A complete request message: command set plus raw dataset bytes
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub presentation_context_id: u8,
    pub command: CommandSet,
    pub data: Option<Vec<u8>>,
}

/// Reassembles request messages from P-DATA value fragments.
///
/// A command set may be split over several fragments, and so may the
/// dataset that follows it. A message is complete once the last command
/// fragment arrived and, if the command announces one, the last data
/// fragment as well.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    command_buffer: Vec<u8>,
    data_buffer: Vec<u8>,
    awaiting_data: Option<(u8, CommandSet)>,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment; returns a message once it is complete
    pub fn push(
        &mut self,
        presentation_context_id: u8,
        is_command: bool,
        is_last: bool,
        bytes: &[u8],
    ) -> Result<Option<InboundMessage>> {
        if is_command {
            self.command_buffer.extend_from_slice(bytes);
            if !is_last {
                return Ok(None);
            }
            let raw = std::mem::take(&mut self.command_buffer);
            let command = decode_command(&raw)?;
            if command.has_dataset {
                self.data_buffer.clear();
                self.awaiting_data = Some((presentation_context_id, command));
                return Ok(None);
            }
            return Ok(Some(InboundMessage {
                presentation_context_id,
                command,
                data: None,
            }));
        }

        if self.awaiting_data.is_none() {
            return Err(DimseError::MalformedCommand(
                "dataset fragment without a preceding command".into(),
            ));
        }
        self.data_buffer.extend_from_slice(bytes);
        if !is_last {
            return Ok(None);
        }
        match self.awaiting_data.take() {
            Some((pc_id, command)) => Ok(Some(InboundMessage {
                presentation_context_id: pc_id,
                command,
                data: Some(std::mem::take(&mut self.data_buffer)),
            })),
            None => Ok(None),
        }
    }

    /// Drop any partially received message
    pub fn reset(&mut self) {
        self.command_buffer.clear();
        self.data_buffer.clear();
        self.awaiting_data = None;
    }
}

fn read_u16(obj: &InMemDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

fn read_str(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    obj.element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim_end_matches(&['\0', ' '][..]).to_string())
        .filter(|s| !s.is_empty())
}
