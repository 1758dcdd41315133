//! Common types for DIMSE operations

use dicom_object::InMemDicomObject;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Opaque identity of one accepted connection.
///
/// Handles are allocated by the listener and never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationHandle(u64);

impl AssociationHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssociationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "assoc-{}", self.0)
    }
}

/// What the listener knows about a freshly established association
#[derive(Debug, Clone)]
pub struct AssociationInfo {
    /// Handle used as lookup key for every later event
    pub handle: AssociationHandle,

    /// Remote socket address of the requestor
    pub peer: SocketAddr,

    /// Calling AE title sent by the requestor
    pub calling_ae_title: Option<String>,

    /// Called AE title (our side)
    pub called_ae_title: String,

    /// Implementation version name of the requestor, when known
    pub client_version: Option<String>,
}

/// DIMSE command types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimseCommand {
    /// C-ECHO command
    Echo,
    /// C-FIND command
    Find,
    /// C-MOVE command
    Move,
    /// C-STORE command
    Store,
    /// C-GET command
    Get,
}

impl DimseCommand {
    /// Name as written in the DICOM standard, e.g. `C-FIND`
    pub fn as_str(&self) -> &'static str {
        match self {
            DimseCommand::Echo => "C-ECHO",
            DimseCommand::Find => "C-FIND",
            DimseCommand::Move => "C-MOVE",
            DimseCommand::Store => "C-STORE",
            DimseCommand::Get => "C-GET",
        }
    }
}

impl fmt::Display for DimseCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DIMSE operation status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimseStatus {
    /// Operation completed successfully
    Success,
    /// Operation is pending (more responses to follow)
    Pending,
    /// Operation cancelled by user
    Cancel,
    /// Operation failed with error
    Failure(u16), // DICOM status code
    /// Warning occurred during operation
    Warning(u16), // DICOM status code
}

impl DimseStatus {
    /// Unrecognized operation
    pub const UNRECOGNIZED_OPERATION: DimseStatus = DimseStatus::Failure(0x0211);

    /// Status code carried in the Status (0000,0900) element
    pub fn code(&self) -> u16 {
        match self {
            DimseStatus::Success => 0x0000,
            DimseStatus::Pending => 0xFF00,
            DimseStatus::Cancel => 0xFE00,
            DimseStatus::Failure(code) | DimseStatus::Warning(code) => *code,
        }
    }

    /// Whether the status terminates a response sequence
    pub fn is_final(&self) -> bool {
        !matches!(self, DimseStatus::Pending)
    }
}

/// One element of a multi-response sequence (C-FIND, C-MOVE, C-GET)
#[derive(Debug, Clone)]
pub enum DimseReply {
    /// Announces how many sub-operations follow
    SubOperations(u32),

    /// Intermediate response carrying a dataset
    Pending {
        /// Remaining sub-operations, for C-MOVE/C-GET
        remaining: Option<u32>,
        dataset: InMemDicomObject,
    },

    /// Terminal response, nothing follows it
    Final {
        status: DimseStatus,
        remaining: Option<u32>,
    },
}

impl DimseReply {
    pub fn pending(dataset: InMemDicomObject) -> Self {
        Self::Pending {
            remaining: None,
            dataset,
        }
    }

    pub fn sub_operation(remaining: u32, dataset: InMemDicomObject) -> Self {
        Self::Pending {
            remaining: Some(remaining),
            dataset,
        }
    }

    pub fn success() -> Self {
        Self::Final {
            status: DimseStatus::Success,
            remaining: None,
        }
    }

    /// Status this element is sent with
    pub fn status(&self) -> DimseStatus {
        match self {
            DimseReply::SubOperations(_) | DimseReply::Pending { .. } => DimseStatus::Pending,
            DimseReply::Final { status, .. } => *status,
        }
    }

    /// Remaining sub-operation count, if the element carries one
    pub fn remaining(&self) -> Option<u32> {
        match self {
            DimseReply::SubOperations(total) => Some(*total),
            DimseReply::Pending { remaining, .. } | DimseReply::Final { remaining, .. } => {
                *remaining
            }
        }
    }

    pub fn dataset(&self) -> Option<&InMemDicomObject> {
        match self {
            DimseReply::Pending { dataset, .. } => Some(dataset),
            _ => None,
        }
    }
}

/// Lazily produced response sequence.
///
/// The listener pulls one element, transmits it and only then pulls the next.
/// Dropping the stream cancels the sequence. A stream that ends without a
/// [`DimseReply::Final`] element is terminated with `Success`.
pub type ResponseStream = BoxStream<'static, DimseReply>;

/// Inbound C-STORE request
#[derive(Debug, Clone)]
pub struct StoreRequest {
    /// Affected SOP Class UID from the command set
    pub sop_class_uid: String,

    /// Affected SOP Instance UID from the command set
    pub sop_instance_uid: String,

    /// Dataset being stored; empty when it could not be decoded
    pub dataset: InMemDicomObject,

    /// Why the dataset could not be decoded, if it could not
    pub decode_error: Option<String>,
}

/// Inbound C-MOVE request
#[derive(Debug, Clone)]
pub struct MoveRequest {
    /// Move Destination AE title from the command set
    pub destination: String,

    /// Query identifier
    pub identifier: InMemDicomObject,
}
