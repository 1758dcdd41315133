//! Honeypot listener plus a minimal synchronous SCU for wire-level tests
#![allow(dead_code)]

use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use dicom_core::{dicom_value, DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::tags;
use dicom_object::InMemDicomObject;
use dicom_ul::pdu::{PDataValue, PDataValueType, PresentationContextResultReason};
use dicom_ul::{ClientAssociation, ClientAssociationOptions, Pdu};
use dicomhawk::audit::{AuditLogger, MemoryChannels};
use dicomhawk::catalog::{RecordStore, SubjectRecord};
use dicomhawk::responder::HoneypotResponder;
use dicomhawk::session::SessionRegistry;
use dimse::message::{decode_dataset, encode_command, encode_dataset, NO_DATASET};
use dimse::{DimseConfig, DimseScp};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const VERIFICATION: &str = "1.2.840.10008.1.1";
pub const PATIENT_ROOT_FIND: &str = "1.2.840.10008.5.1.4.1.2.1.1";
pub const PATIENT_ROOT_GET: &str = "1.2.840.10008.5.1.4.1.2.1.3";

pub const C_GET_RQ: u16 = 0x0010;
pub const C_FIND_RQ: u16 = 0x0020;
pub const C_ECHO_RQ: u16 = 0x0030;
pub const C_CANCEL_RQ: u16 = 0x0FFF;

pub fn record(id: &str, name: &str) -> SubjectRecord {
    SubjectRecord {
        id: id.to_string(),
        name: name.to_string(),
        ..SubjectRecord::fabricated()
    }
}

pub fn frederik_and_sofie() -> Vec<SubjectRecord> {
    vec![record("1", "Frederik^Jensen"), record("2", "Sofie^Nielsen")]
}

pub struct RunningHoneypot {
    pub addr: SocketAddr,
    pub channels: MemoryChannels,
    shutdown: CancellationToken,
    server: JoinHandle<dimse::Result<()>>,
}

impl RunningHoneypot {
    pub async fn start(records: Vec<SubjectRecord>) -> Self {
        let (audit, channels) = AuditLogger::in_memory();
        let responder = Arc::new(HoneypotResponder::new(
            Arc::new(RecordStore::from_records(records)),
            Arc::new(SessionRegistry::new()),
            Arc::new(audit),
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephem port");
        let addr = listener.local_addr().unwrap();
        let config = DimseConfig {
            local_aet: "DICOMHAWK".to_string(),
            bind_addr: "127.0.0.1".parse().unwrap(),
            association_timeout_ms: 5_000,
            ..DimseConfig::default()
        };
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(DimseScp::new(config, responder).serve(listener, shutdown.clone()));

        Self {
            addr,
            channels,
            shutdown,
            server,
        }
    }

    /// Simplified records whose `msg` is `msg`, waiting briefly for them to appear
    pub async fn wait_for(&self, msg: &str) -> Vec<Value> {
        for _ in 0..100 {
            let found: Vec<Value> = self
                .channels
                .records()
                .into_iter()
                .filter(|r| r["msg"] == msg)
                .collect();
            if !found.is_empty() {
                return found;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Vec::new()
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.server).await;
    }
}

/// Synchronous requestor talking to the honeypot
pub struct Scu {
    association: ClientAssociation<TcpStream>,
}

impl Scu {
    pub fn connect(addr: SocketAddr, abstract_syntaxes: &[&str]) -> Self {
        let mut options = ClientAssociationOptions::new()
            .calling_ae_title("WIRESCU")
            .called_ae_title("DICOMHAWK")
            .read_timeout(Duration::from_secs(5));
        for uid in abstract_syntaxes {
            options = options.with_abstract_syntax(*uid);
        }
        Self {
            association: options.establish(addr).expect("association accepted"),
        }
    }

    /// Negotiated presentation context id and transfer syntax for `abstract_syntax`
    pub fn context(&self, abstract_syntax: &str) -> (u8, String) {
        let pc = self
            .association
            .presentation_contexts()
            .iter()
            .find(|pc| {
                pc.reason == PresentationContextResultReason::Acceptance
                    && pc.abstract_syntax.trim_end_matches('\0') == abstract_syntax
            })
            .expect("presentation context accepted");
        (pc.id, pc.transfer_syntax.trim_end_matches('\0').to_string())
    }

    pub fn send(&mut self, abstract_syntax: &str, command: &InMemDicomObject, dataset: Option<&InMemDicomObject>) {
        let (pc_id, ts) = self.context(abstract_syntax);
        self.association
            .send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Command,
                    is_last: true,
                    data: encode_command(command).unwrap(),
                }],
            })
            .unwrap();
        if let Some(dataset) = dataset {
            self.association
                .send(&Pdu::PData {
                    data: vec![PDataValue {
                        presentation_context_id: pc_id,
                        value_type: PDataValueType::Data,
                        is_last: true,
                        data: encode_dataset(dataset, &ts).unwrap(),
                    }],
                })
                .unwrap();
        }
    }

    /// Read one complete response message
    pub fn receive(&mut self, abstract_syntax: &str) -> Response {
        let (_, ts) = self.context(abstract_syntax);
        let mut command_bytes = Vec::new();
        let mut data_bytes = Vec::new();
        let mut command: Option<InMemDicomObject> = None;

        loop {
            let data = match self.association.receive().expect("response PDU") {
                Pdu::PData { data } => data,
                other => panic!("unexpected PDU while waiting for a response: {:?}", other),
            };
            for pdv in data {
                if pdv.value_type == PDataValueType::Command {
                    command_bytes.extend_from_slice(&pdv.data);
                    if pdv.is_last {
                        let decoded = decode_dataset(&command_bytes, "1.2.840.10008.1.2").unwrap();
                        if read_u16(&decoded, tags::COMMAND_DATA_SET_TYPE) == Some(NO_DATASET) {
                            return Response {
                                command: decoded,
                                dataset: None,
                            };
                        }
                        command = Some(decoded);
                    }
                } else {
                    data_bytes.extend_from_slice(&pdv.data);
                    if pdv.is_last {
                        return Response {
                            command: command.take().expect("dataset after its command"),
                            dataset: Some(decode_dataset(&data_bytes, &ts).unwrap()),
                        };
                    }
                }
            }
        }
    }

    /// Read responses up to and including the first non-pending one
    pub fn receive_sequence(&mut self, abstract_syntax: &str) -> Vec<Response> {
        let mut responses = Vec::new();
        loop {
            let response = self.receive(abstract_syntax);
            let done = response.status() != 0xFF00;
            responses.push(response);
            if done {
                return responses;
            }
        }
    }

    pub fn release(self) {
        self.association.release().expect("orderly release");
    }
}

pub struct Response {
    pub command: InMemDicomObject,
    pub dataset: Option<InMemDicomObject>,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.field(tags::STATUS).expect("Status")
    }

    pub fn field(&self, tag: Tag) -> Option<u16> {
        read_u16(&self.command, tag)
    }

    pub fn text(&self, tag: Tag) -> Option<String> {
        self.dataset
            .as_ref()?
            .element(tag)
            .ok()?
            .to_str()
            .ok()
            .map(|s| s.trim_end_matches(&['\0', ' '][..]).to_string())
    }
}

fn read_u16(obj: &InMemDicomObject, tag: Tag) -> Option<u16> {
    obj.element(tag).ok().and_then(|e| e.to_int::<u16>().ok())
}

pub fn request(field: u16, message_id: u16, sop_class: &str, with_dataset: bool) -> InMemDicomObject {
    let data_set_type = if with_dataset { 0x0000 } else { NO_DATASET };
    InMemDicomObject::command_from_element_iter([
        DataElement::new(
            tags::AFFECTED_SOP_CLASS_UID,
            VR::UI,
            PrimitiveValue::from(sop_class),
        ),
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [field])),
        DataElement::new(tags::MESSAGE_ID, VR::US, dicom_value!(U16, [message_id])),
        DataElement::new(tags::PRIORITY, VR::US, dicom_value!(U16, [0])),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [data_set_type]),
        ),
    ])
}

pub fn cancel(message_id: u16) -> InMemDicomObject {
    InMemDicomObject::command_from_element_iter([
        DataElement::new(tags::COMMAND_FIELD, VR::US, dicom_value!(U16, [C_CANCEL_RQ])),
        DataElement::new(
            tags::MESSAGE_ID_BEING_RESPONDED_TO,
            VR::US,
            dicom_value!(U16, [message_id]),
        ),
        DataElement::new(
            tags::COMMAND_DATA_SET_TYPE,
            VR::US,
            dicom_value!(U16, [NO_DATASET]),
        ),
    ])
}

pub fn patient_query(name: &str) -> InMemDicomObject {
    InMemDicomObject::from_element_iter([
        DataElement::new(
            tags::QUERY_RETRIEVE_LEVEL,
            VR::CS,
            PrimitiveValue::from("PATIENT"),
        ),
        DataElement::new(tags::PATIENT_NAME, VR::PN, PrimitiveValue::from(name)),
        DataElement::new(tags::PATIENT_ID, VR::LO, PrimitiveValue::Empty),
    ])
}
