//! Event interface between the listener and whatever answers the peer

use std::net::SocketAddr;

use async_trait::async_trait;
use dicom_object::InMemDicomObject;

use crate::types::{
    AssociationHandle, AssociationInfo, DimseStatus, MoveRequest, ResponseStream, StoreRequest,
};

/// Receives the typed events raised for every association.
///
/// Implementations must not fail: every command method returns a valid
/// protocol response even when something goes wrong internally. Handlers are
/// invoked concurrently for different associations.
#[async_trait]
pub trait AssociationHandler: Send + Sync {
    /// An association was negotiated and accepted
    async fn association_opened(&self, info: &AssociationInfo);

    /// The association ended (release, abort, timeout or transport error)
    async fn association_closed(&self, handle: AssociationHandle);

    /// A peer connected but no association could be established
    async fn connection_rejected(&self, _peer: SocketAddr, _reason: &str) {}

    /// C-ECHO, answered with a single status
    async fn echo(&self, handle: AssociationHandle) -> DimseStatus;

    /// C-STORE, answered with a single status
    async fn store(&self, handle: AssociationHandle, request: StoreRequest) -> DimseStatus;

    /// C-FIND, answered with pending matches
    async fn find(&self, handle: AssociationHandle, identifier: InMemDicomObject)
        -> ResponseStream;

    /// C-MOVE, answered with sub-operation progress
    async fn move_request(&self, handle: AssociationHandle, request: MoveRequest)
        -> ResponseStream;

    /// C-GET, answered with sub-operation progress
    async fn get(&self, handle: AssociationHandle, identifier: InMemDicomObject)
        -> ResponseStream;
}
