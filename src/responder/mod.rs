//! Simulated DICOM service answering every association event
//!
//! Each command resolves its session, writes audit events and answers with
//! a plausible reply built from the record store. Internal failures are
//! logged to the exception channel and degrade to an empty successful reply.

mod dataset;
mod find;
mod retrieve;

pub use dataset::{patient_name_term, record_dataset, text_map};
pub use find::FindResponses;
pub use retrieve::{GetResponses, MoveResponses};

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use dicom_object::InMemDicomObject;
use dimse::{
    AssociationHandle, AssociationHandler, AssociationInfo, DimseStatus, MoveRequest,
    ResponseStream, StoreRequest,
};
use futures_util::stream::{self, StreamExt};

use crate::audit::{AuditEvent, AuditKind, AuditLogger};
use crate::catalog::{NameFilter, RecordStore};
use crate::error::{HoneypotError, Result};
use crate::session::{Closed, SessionId, SessionRegistry};

pub struct HoneypotResponder {
    store: Arc<RecordStore>,
    registry: Arc<SessionRegistry>,
    audit: Arc<AuditLogger>,
}

impl HoneypotResponder {
    pub fn new(
        store: Arc<RecordStore>,
        registry: Arc<SessionRegistry>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            registry,
            audit,
        }
    }

    fn received(&self, kind: AuditKind, session_id: &SessionId) -> AuditEvent {
        let description = format!("{} request received", kind.command().unwrap_or(kind.as_str()));
        AuditEvent::info(kind, "Received")
            .session(session_id)
            .describe(description)
    }

    /// Answer with `build`, or with an empty sequence if it fails
    fn respond(
        &self,
        kind: AuditKind,
        session_id: &SessionId,
        build: impl FnOnce() -> Result<ResponseStream>,
    ) -> ResponseStream {
        build().unwrap_or_else(|e| {
            self.audit.exception(
                &format!("{} handler failed for session {}", kind.as_str(), session_id),
                &e,
            );
            stream::empty().boxed()
        })
    }

    fn begin_find(
        &self,
        session_id: &SessionId,
        identifier: &InMemDicomObject,
    ) -> Result<ResponseStream> {
        let term = patient_name_term(identifier)?;
        if let Some(term) = &term {
            self.audit.emit(
                AuditEvent::info(AuditKind::Find, "C-FIND Search")
                    .session(session_id)
                    .with("Term", term)
                    .with("Type", "PatientName"),
            );
        }
        self.audit.emit(
            self.received(AuditKind::Find, session_id)
                .with("identifier", &text_map(identifier)),
        );

        let responses = FindResponses::new(
            Arc::clone(&self.store),
            NameFilter::from_term(term.as_deref()),
            session_id.clone(),
            Arc::clone(&self.audit),
        );
        Ok(stream::iter(responses).boxed())
    }

    fn begin_get(
        &self,
        session_id: &SessionId,
        identifier: &InMemDicomObject,
    ) -> Result<ResponseStream> {
        self.audit.emit(
            self.received(AuditKind::Get, session_id)
                .with("identifier", &text_map(identifier)),
        );

        let total = u32::try_from(self.store.len()).map_err(|_| {
            HoneypotError::Dicom(format!(
                "{} records exceed the sub-operation counter",
                self.store.len()
            ))
        })?;
        Ok(stream::iter(GetResponses::new(Arc::clone(&self.store), total)).boxed())
    }
}

#[async_trait]
impl AssociationHandler for HoneypotResponder {
    async fn association_opened(&self, info: &AssociationInfo) {
        let session_id = self.registry.open(
            info.handle,
            info.peer,
            info.client_version.clone(),
            info.calling_ae_title.clone(),
        );

        self.audit.emit(
            AuditEvent::warning(AuditKind::AssocOpen, "Connection from")
                .session(&session_id)
                .describe("Association requested")
                .with("IP", &info.peer.ip().to_string())
                .with("Port", &info.peer.port())
                .with("Version", info.client_version.as_deref().unwrap_or("N/A"))
                .with("AETitle", info.calling_ae_title.as_deref().unwrap_or("N/A")),
        );
    }

    async fn association_closed(&self, handle: AssociationHandle) {
        let closed = self.registry.close(handle);
        let mut event = AuditEvent::warning(AuditKind::AssocClose, "Connection")
            .session(closed.session_id())
            .describe("Association released")
            .with("Status", "Finished");

        match &closed {
            Closed::Tracked(session) => {
                if let Some(peer) = session.peer {
                    event = event
                        .with("IP", &peer.ip().to_string())
                        .with("Port", &peer.port());
                }
            }
            Closed::Untracked(_) => {
                event = event.with("Anomaly", "close without open");
            }
        }
        self.audit.emit(event);
    }

    async fn connection_rejected(&self, peer: SocketAddr, reason: &str) {
        self.audit.emit(
            AuditEvent::warning(AuditKind::AssocRejected, "Connection rejected")
                .describe("Association rejected")
                .with("IP", &peer.ip().to_string())
                .with("Port", &peer.port())
                .with("Reason", reason),
        );
    }

    async fn echo(&self, handle: AssociationHandle) -> DimseStatus {
        let session_id = self.registry.resolve(handle);
        self.audit.emit(self.received(AuditKind::Echo, &session_id));
        DimseStatus::Success
    }

    async fn store(&self, handle: AssociationHandle, request: StoreRequest) -> DimseStatus {
        let session_id = self.registry.resolve(handle);
        let mut event = self
            .received(AuditKind::Store, &session_id)
            .with("SOPClassUID", &request.sop_class_uid)
            .with("SOPInstanceUID", &request.sop_instance_uid)
            .with("dataset", &text_map(&request.dataset));
        if let Some(error) = &request.decode_error {
            event = event.with("DecodeError", error);
        }
        self.audit.emit(event);
        DimseStatus::Success
    }

    async fn find(
        &self,
        handle: AssociationHandle,
        identifier: InMemDicomObject,
    ) -> ResponseStream {
        let session_id = self.registry.resolve(handle);
        self.respond(AuditKind::Find, &session_id, || {
            self.begin_find(&session_id, &identifier)
        })
    }

    async fn move_request(
        &self,
        handle: AssociationHandle,
        request: MoveRequest,
    ) -> ResponseStream {
        let session_id = self.registry.resolve(handle);
        self.audit.emit(
            self.received(AuditKind::Move, &session_id)
                .with("identifier", &text_map(&request.identifier))
                .with("MoveDestination", &request.destination),
        );
        stream::iter(MoveResponses::new()).boxed()
    }

    async fn get(
        &self,
        handle: AssociationHandle,
        identifier: InMemDicomObject,
    ) -> ResponseStream {
        let session_id = self.registry.resolve(handle);
        self.respond(AuditKind::Get, &session_id, || {
            self.begin_get(&session_id, &identifier)
        })
    }
}
