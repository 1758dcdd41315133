//! DIMSE (DICOM Message Service Element) listener
//!
//! This crate accepts inbound associations over `dicom-ul`, reassembles
//! command and data fragments into requests and hands them to an
//! [`AssociationHandler`]. Replies flow back as typed statuses or lazily
//! pulled [`ResponseStream`]s.
//!
//! # Features
//! - Inbound DIMSE services (SCP): C-ECHO, C-STORE, C-FIND, C-MOVE, C-GET
//! - Association lifecycle events, including rejected connections
//! - Bounded number of concurrent associations

pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod scp;
pub mod types;

// Re-export commonly used types
pub use config::DimseConfig;
pub use error::{DimseError, Result};
pub use handler::AssociationHandler;
pub use scp::DimseScp;
pub use types::{
    AssociationHandle, AssociationInfo, DimseCommand, DimseReply, DimseStatus, MoveRequest,
    ResponseStream, StoreRequest,
};

/// Default DICOM port
pub const DEFAULT_DIMSE_PORT: u16 = 11112;
