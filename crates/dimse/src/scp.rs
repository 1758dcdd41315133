//! Service Class Provider implementation for inbound associations
//!
//! Every accepted connection is served on the blocking thread pool because
//! `dicom-ul` associations are synchronous. Handler calls are driven back on
//! the runtime through its [`Handle`].
//!
//! Response sequences are pulled one element at a time. Between two elements
//! the connection is polled without blocking, so a C-CANCEL sent by the
//! requestor stops the sequence before the next element is produced.

use std::collections::VecDeque;
use std::net::{SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use dicom_object::InMemDicomObject;
use dicom_ul::association::{Association, SyncAssociation};
use dicom_ul::pdu::{PDataValue, PDataValueType, Pdu, UserVariableItem};
use dicom_ul::{ServerAssociation, ServerAssociationOptions};
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DimseConfig;
use crate::handler::AssociationHandler;
use crate::message::{
    decode_dataset, encode_command, encode_dataset, response_command, CommandField, CommandSet,
    InboundMessage, MessageAssembler, SubOperationCounters, MAX_PDV_PAYLOAD,
};
use crate::types::{
    AssociationHandle, AssociationInfo, DimseReply, DimseStatus, MoveRequest, ResponseStream,
    StoreRequest,
};
use crate::{DimseError, Result};

/// Abstract syntaxes offered explicitly; anything else is accepted when the
/// listener runs promiscuous.
const ABSTRACT_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.1",             // Verification
    "1.2.840.10008.5.1.4.1.1.2",     // CT Image Storage
    "1.2.840.10008.5.1.4.1.1.4",     // MR Image Storage
    "1.2.840.10008.5.1.4.1.1.7",     // Secondary Capture Image Storage
    "1.2.840.10008.5.1.4.1.2.1.1",   // Patient Root Q/R FIND
    "1.2.840.10008.5.1.4.1.2.1.2",   // Patient Root Q/R MOVE
    "1.2.840.10008.5.1.4.1.2.1.3",   // Patient Root Q/R GET
    "1.2.840.10008.5.1.4.1.2.2.1",   // Study Root Q/R FIND
    "1.2.840.10008.5.1.4.1.2.2.2",   // Study Root Q/R MOVE
    "1.2.840.10008.5.1.4.1.2.2.3",   // Study Root Q/R GET
];

const TRANSFER_SYNTAXES: &[&str] = &[
    "1.2.840.10008.1.2",   // Implicit VR Little Endian
    "1.2.840.10008.1.2.1", // Explicit VR Little Endian
];

/// DIMSE Service Class Provider
pub struct DimseScp {
    config: DimseConfig,
    handler: Arc<dyn AssociationHandler>,
    active_associations: Arc<AtomicU32>,
    next_handle: AtomicU64,
}

impl DimseScp {
    /// Create a new SCP dispatching every event to `handler`
    pub fn new(config: DimseConfig, handler: Arc<dyn AssociationHandler>) -> Self {
        Self {
            config,
            handler,
            active_associations: Arc::new(AtomicU32::new(0)),
            next_handle: AtomicU64::new(1),
        }
    }

    /// Bind the configured address and serve until `shutdown` fires
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;
        let addr = SocketAddr::new(self.config.bind_addr, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve associations arriving on an already bound listener
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        info!(
            "Starting DIMSE SCP on {} (AET: {})",
            listener.local_addr()?,
            self.config.local_aet
        );

        let scp = Arc::new(self);
        let runtime = Handle::current();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DIMSE SCP shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            continue;
                        }
                    };
                    debug!("Accepted connection from {}", peer_addr);

                    if scp.active_associations.load(Ordering::Acquire) >= scp.config.max_associations {
                        warn!(
                            "Maximum associations reached, rejecting connection from {}",
                            peer_addr
                        );
                        drop(stream);
                        continue;
                    }

                    let stream = match stream.into_std().and_then(|s| {
                        s.set_nonblocking(false)?;
                        Ok(s)
                    }) {
                        Ok(s) => s,
                        Err(e) => {
                            error!("Cannot hand over connection from {}: {}", peer_addr, e);
                            continue;
                        }
                    };

                    let active = ActiveGuard::enter(&scp.active_associations);
                    let scp = Arc::clone(&scp);
                    let runtime = runtime.clone();
                    tokio::task::spawn_blocking(move || {
                        let _active = active;
                        scp.handle_association(stream, peer_addr, &runtime);
                    });
                }
            }
        }
    }

    /// Serve one connection from negotiation to release
    fn handle_association(&self, stream: TcpStream, peer: SocketAddr, runtime: &Handle) {
        let handle = AssociationHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));

        // establish() applies these to the socket, replacing anything set on it before
        let timeout = self.config.association_timeout();
        let mut options = ServerAssociationOptions::new()
            .accept_any()
            .ae_title(self.config.local_aet.as_str())
            .max_pdu_length(self.config.max_pdu)
            .strict(self.config.strict)
            .promiscuous(self.config.promiscuous)
            .read_timeout(timeout)
            .write_timeout(timeout);
        for uid in ABSTRACT_SYNTAXES {
            options = options.with_abstract_syntax(*uid);
        }
        for uid in TRANSFER_SYNTAXES {
            options = options.with_transfer_syntax(*uid);
        }

        let association = match options.establish(stream) {
            Ok(association) => association,
            Err(e) => {
                debug!("Association with {} not established: {}", peer, e);
                runtime.block_on(self.handler.connection_rejected(peer, &e.to_string()));
                return;
            }
        };

        let info = AssociationInfo {
            handle,
            peer,
            calling_ae_title: non_blank(association.peer_ae_title()),
            called_ae_title: self.config.local_aet.clone(),
            client_version: implementation_version(association.user_variables()),
        };
        info!("Association {} established with {}", handle, peer);
        runtime.block_on(self.handler.association_opened(&info));

        let mut connection = Connection::new(handle, association);
        loop {
            match connection.next_inbound() {
                Inbound::Message(message) => {
                    let transfer_syntax = connection.transfer_syntax(message.presentation_context_id);
                    let outcome = self.dispatch(
                        handle,
                        message,
                        transfer_syntax.as_deref(),
                        &mut connection,
                        runtime,
                    );
                    match outcome {
                        Ok(()) => {}
                        Err(e) if e.is_recoverable() => {
                            warn!("Request on {} left unanswered: {}", handle, e);
                        }
                        Err(e) => {
                            warn!("Closing association {} after failed reply: {}", handle, e);
                            break;
                        }
                    }
                }
                Inbound::Released => {
                    if let Err(e) = connection.send(&Pdu::ReleaseRP) {
                        debug!("Release reply to {} failed: {}", peer, e);
                    }
                    info!("Association {} released by {}", handle, peer);
                    break;
                }
                Inbound::Aborted => {
                    info!("Association {} aborted by {}", handle, peer);
                    break;
                }
                Inbound::Closed(reason) => {
                    debug!("Association {} ended: {}", handle, reason);
                    break;
                }
            }
        }

        runtime.block_on(self.handler.association_closed(handle));
    }

    /// Route one complete request to the handler and answer it
    fn dispatch<S: ReplySink>(
        &self,
        handle: AssociationHandle,
        message: InboundMessage,
        transfer_syntax: Option<&str>,
        sink: &mut S,
        runtime: &Handle,
    ) -> Result<()> {
        let pc_id = message.presentation_context_id;
        let command = &message.command;
        let data = message.data.as_deref();

        match command.field {
            CommandField::CEcho => {
                let status = runtime.block_on(self.handler.echo(handle));
                send_response(sink, pc_id, command, status, None, None, transfer_syntax)
            }
            CommandField::CStore => {
                let (dataset, decode_error) = match decode_payload(data, transfer_syntax) {
                    Ok(dataset) => (dataset, None),
                    Err(e) => (InMemDicomObject::new_empty(), Some(e.to_string())),
                };
                let request = StoreRequest {
                    sop_class_uid: command.sop_class_uid.clone(),
                    sop_instance_uid: command.sop_instance_uid.clone().unwrap_or_default(),
                    dataset,
                    decode_error,
                };
                let status = runtime.block_on(self.handler.store(handle, request));
                send_response(sink, pc_id, command, status, None, None, transfer_syntax)
            }
            CommandField::CFind => {
                let identifier = identifier_or_empty(handle, data, transfer_syntax);
                let replies = runtime.block_on(self.handler.find(handle, identifier));
                pump_replies(sink, pc_id, command, replies, transfer_syntax, runtime, false)
            }
            CommandField::CMove => {
                let request = MoveRequest {
                    destination: command.move_destination.clone().unwrap_or_default(),
                    identifier: identifier_or_empty(handle, data, transfer_syntax),
                };
                let replies = runtime.block_on(self.handler.move_request(handle, request));
                pump_replies(sink, pc_id, command, replies, transfer_syntax, runtime, true)
            }
            CommandField::CGet => {
                let identifier = identifier_or_empty(handle, data, transfer_syntax);
                let replies = runtime.block_on(self.handler.get(handle, identifier));
                pump_replies(sink, pc_id, command, replies, transfer_syntax, runtime, true)
            }
            CommandField::CCancel => {
                // The sequence it names has already completed
                debug!("Late C-CANCEL for message {} on {}", command.message_id, handle);
                Ok(())
            }
            CommandField::Other(code) => {
                warn!("Unrecognized command field {:#06x} on {}", code, handle);
                send_response(
                    sink,
                    pc_id,
                    command,
                    DimseStatus::UNRECOGNIZED_OPERATION,
                    None,
                    None,
                    transfer_syntax,
                )
            }
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    Some(value.trim_matches(&['\0', ' '][..]).to_string()).filter(|s| !s.is_empty())
}

/// Implementation Version Name from the requestor's user information items
fn implementation_version(items: &[UserVariableItem]) -> Option<String> {
    items.iter().find_map(|item| match item {
        UserVariableItem::ImplementationVersionName(name) => non_blank(name),
        _ => None,
    })
}

/// Where the replies of a running request go
trait ReplySink {
    fn send(&mut self, pdu: &Pdu) -> Result<()>;

    /// Whether the requestor asked to cancel `message_id`, or went away.
    ///
    /// Must return promptly when nothing has arrived.
    fn cancel_requested(&mut self, message_id: u16) -> bool;
}

/// What the requestor sent, in arrival order
#[derive(Debug)]
enum Inbound {
    Message(InboundMessage),
    Released,
    Aborted,
    Closed(String),
}

impl Inbound {
    fn ends_association(&self) -> bool {
        !matches!(self, Inbound::Message(_))
    }
}

/// An established association plus the requests read ahead of dispatch
struct Connection {
    handle: AssociationHandle,
    association: ServerAssociation<TcpStream>,
    assembler: MessageAssembler,
    backlog: VecDeque<Inbound>,
}

impl Connection {
    fn new(handle: AssociationHandle, association: ServerAssociation<TcpStream>) -> Self {
        Self {
            handle,
            association,
            assembler: MessageAssembler::new(),
            backlog: VecDeque::new(),
        }
    }

    /// Block until the next request or association event
    fn next_inbound(&mut self) -> Inbound {
        loop {
            if let Some(inbound) = self.backlog.pop_front() {
                return inbound;
            }
            self.read_pdu();
        }
    }

    fn transfer_syntax(&self, pc_id: u8) -> Option<String> {
        self.association
            .presentation_contexts()
            .iter()
            .find(|pc| pc.id == pc_id)
            .map(|pc| pc.transfer_syntax.clone())
    }

    /// Receive one PDU and queue whatever it completes
    fn read_pdu(&mut self) {
        match self.association.receive() {
            Ok(Pdu::PData { data }) => {
                for pdv in data {
                    let is_command = pdv.value_type == PDataValueType::Command;
                    match self.assembler.push(
                        pdv.presentation_context_id,
                        is_command,
                        pdv.is_last,
                        &pdv.data,
                    ) {
                        Ok(Some(message)) => self.backlog.push_back(Inbound::Message(message)),
                        Ok(None) => {}
                        Err(e) => {
                            warn!("Dropping malformed message on {}: {}", self.handle, e);
                            self.assembler.reset();
                        }
                    }
                }
            }
            Ok(Pdu::ReleaseRQ) => self.backlog.push_back(Inbound::Released),
            Ok(Pdu::AbortRQ { source }) => {
                debug!("Abort source on {}: {:?}", self.handle, source);
                self.backlog.push_back(Inbound::Aborted);
            }
            Ok(_) => debug!("Ignoring unexpected PDU on association {}", self.handle),
            Err(e) => self.backlog.push_back(Inbound::Closed(e.to_string())),
        }
    }

    fn ended(&self) -> bool {
        self.backlog.iter().any(Inbound::ends_association)
    }

    /// Whether a receive would find data, either already buffered or
    /// waiting on the socket
    fn input_ready(&mut self) -> bool {
        let (socket, buffer) = SyncAssociation::get_mut(&mut self.association);
        if !buffer.is_empty() {
            return true;
        }
        if let Err(e) = socket.set_nonblocking(true) {
            debug!("Cannot poll association {}: {}", self.handle, e);
            return false;
        }
        let mut byte = [0u8; 1];
        // Ok(0) is an orderly shutdown, which the next receive reports
        let ready = socket.peek(&mut byte).is_ok();
        if let Err(e) = socket.set_nonblocking(false) {
            warn!("Cannot restore blocking mode on {}: {}", self.handle, e);
        }
        ready
    }
}

impl ReplySink for Connection {
    fn send(&mut self, pdu: &Pdu) -> Result<()> {
        self.association
            .send(pdu)
            .map_err(|e| DimseError::ul(e.to_string()))
    }

    fn cancel_requested(&mut self, message_id: u16) -> bool {
        while !self.ended() && self.input_ready() {
            self.read_pdu();
        }

        let mut cancelled = false;
        self.backlog.retain(|inbound| match inbound {
            Inbound::Message(message) if message.command.field == CommandField::CCancel => {
                cancelled |= message.command.message_id == message_id;
                false
            }
            _ => true,
        });
        cancelled || self.ended()
    }
}

/// Pull replies one by one, sending each before asking for the next.
///
/// A cancellation seen between two pulls drops the sequence and answers
/// with a final Cancel status.
fn pump_replies<S: ReplySink>(
    sink: &mut S,
    pc_id: u8,
    command: &CommandSet,
    mut replies: ResponseStream,
    transfer_syntax: Option<&str>,
    runtime: &Handle,
    sub_operations: bool,
) -> Result<()> {
    let mut total: Option<u32> = None;
    let mut remaining: Option<u32> = None;

    loop {
        if sink.cancel_requested(command.message_id) {
            drop(replies);
            debug!("Message {} cancelled by the requestor", command.message_id);
            let counters = sub_operations.then(|| SubOperationCounters {
                completed: total.unwrap_or(0).saturating_sub(remaining.or(total).unwrap_or(0)),
                ..Default::default()
            });
            return send_response(
                sink,
                pc_id,
                command,
                DimseStatus::Cancel,
                None,
                counters,
                transfer_syntax,
            );
        }

        match runtime.block_on(replies.next()) {
            Some(DimseReply::SubOperations(n)) => total = Some(n),
            Some(DimseReply::Pending {
                remaining: left,
                dataset,
            }) => {
                if sub_operations {
                    let left = left.unwrap_or(0);
                    let total = *total.get_or_insert(left);
                    remaining = Some(left);
                    let counters = SubOperationCounters {
                        remaining: left,
                        completed: total.saturating_sub(left),
                        ..Default::default()
                    };
                    // Pending C-GET/C-MOVE responses never carry an identifier
                    send_response(
                        sink,
                        pc_id,
                        command,
                        DimseStatus::Pending,
                        None,
                        Some(counters),
                        transfer_syntax,
                    )?;
                } else {
                    send_response(
                        sink,
                        pc_id,
                        command,
                        DimseStatus::Pending,
                        Some(&dataset),
                        None,
                        transfer_syntax,
                    )?;
                }
            }
            Some(DimseReply::Final { status, .. }) => {
                let counters = sub_operations.then(|| finished(total));
                return send_response(sink, pc_id, command, status, None, counters, transfer_syntax);
            }
            None => {
                let counters = sub_operations.then(|| finished(total));
                return send_response(
                    sink,
                    pc_id,
                    command,
                    DimseStatus::Success,
                    None,
                    counters,
                    transfer_syntax,
                );
            }
        }
    }
}

fn finished(total: Option<u32>) -> SubOperationCounters {
    SubOperationCounters {
        completed: total.unwrap_or(0),
        ..Default::default()
    }
}

/// Encode and send one response message
fn send_response<S: ReplySink>(
    sink: &mut S,
    pc_id: u8,
    command: &CommandSet,
    status: DimseStatus,
    dataset: Option<&InMemDicomObject>,
    counters: Option<SubOperationCounters>,
    transfer_syntax: Option<&str>,
) -> Result<()> {
    // Encode the dataset first so the command never announces data we cannot send
    let data = match (dataset, transfer_syntax) {
        (Some(dataset), Some(ts)) => match encode_dataset(dataset, ts) {
            Ok(bytes) => Some(bytes),
            Err(e) if status == DimseStatus::Pending => {
                warn!("Skipping pending response that failed to encode: {}", e);
                return Ok(());
            }
            Err(e) => {
                warn!("Sending response without dataset: {}", e);
                None
            }
        },
        (Some(_), None) => return Err(DimseError::UnknownPresentationContext(pc_id)),
        (None, _) => None,
    };

    let command_obj = response_command(command, status, data.is_some(), counters);
    sink.send(&Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: pc_id,
            value_type: PDataValueType::Command,
            is_last: true,
            data: encode_command(&command_obj)?,
        }],
    })?;

    if let Some(bytes) = data {
        let chunks: Vec<&[u8]> = if bytes.is_empty() {
            vec![&[][..]]
        } else {
            bytes.chunks(MAX_PDV_PAYLOAD).collect()
        };
        let last = chunks.len() - 1;
        for (i, chunk) in chunks.into_iter().enumerate() {
            sink.send(&Pdu::PData {
                data: vec![PDataValue {
                    presentation_context_id: pc_id,
                    value_type: PDataValueType::Data,
                    is_last: i == last,
                    data: chunk.to_vec(),
                }],
            })?;
        }
    }

    Ok(())
}

fn decode_payload(data: Option<&[u8]>, transfer_syntax: Option<&str>) -> Result<InMemDicomObject> {
    match (data, transfer_syntax) {
        (None, _) => Ok(InMemDicomObject::new_empty()),
        (Some(bytes), Some(ts)) => decode_dataset(bytes, ts),
        (Some(_), None) => Err(DimseError::internal(
            "dataset received on an unnegotiated presentation context",
        )),
    }
}

/// Query identifiers that fail to decode are treated as empty (match all)
fn identifier_or_empty(
    handle: AssociationHandle,
    data: Option<&[u8]>,
    transfer_syntax: Option<&str>,
) -> InMemDicomObject {
    decode_payload(data, transfer_syntax).unwrap_or_else(|e| {
        warn!("Undecodable identifier on {}: {}", handle, e);
        InMemDicomObject::new_empty()
    })
}

/// Keeps the active association count accurate whatever way a session ends
struct ActiveGuard {
    counter: Arc<AtomicU32>,
}

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicU32>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
