//! Audit event values

use chrono::{DateTime, SecondsFormat, Utc};
use dimse::DimseCommand;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::session::SessionId;

/// What an audit event is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Echo,
    Find,
    Store,
    Move,
    Get,
    AssocOpen,
    AssocClose,
    AssocRejected,
    CatalogLoad,
    CatalogGenerate,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditKind::Echo => "ECHO",
            AuditKind::Find => "FIND",
            AuditKind::Store => "STORE",
            AuditKind::Move => "MOVE",
            AuditKind::Get => "GET",
            AuditKind::AssocOpen => "ASSOC_OPEN",
            AuditKind::AssocClose => "ASSOC_CLOSE",
            AuditKind::AssocRejected => "ASSOC_REJECTED",
            AuditKind::CatalogLoad => "CATALOG_LOAD",
            AuditKind::CatalogGenerate => "CATALOG_GENERATE",
        }
    }

    /// DIMSE command name for command events
    pub fn command(&self) -> Option<&'static str> {
        match self {
            AuditKind::Echo => Some(DimseCommand::Echo.as_str()),
            AuditKind::Find => Some(DimseCommand::Find.as_str()),
            AuditKind::Store => Some(DimseCommand::Store.as_str()),
            AuditKind::Move => Some(DimseCommand::Move.as_str()),
            AuditKind::Get => Some(DimseCommand::Get.as_str()),
            _ => None,
        }
    }

    /// Housekeeping is not observable by peers and stays out of the
    /// simplified channel
    pub fn is_housekeeping(&self) -> bool {
        matches!(self, AuditKind::CatalogGenerate)
    }
}

impl From<DimseCommand> for AuditKind {
    fn from(command: DimseCommand) -> Self {
        match command {
            DimseCommand::Echo => AuditKind::Echo,
            DimseCommand::Find => AuditKind::Find,
            DimseCommand::Store => AuditKind::Store,
            DimseCommand::Move => AuditKind::Move,
            DimseCommand::Get => AuditKind::Get,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
        }
    }
}

/// One write-once audit record.
///
/// Built with [`AuditEvent::new`] and the chained setters, then handed to
/// [`AuditLogger::emit`](crate::audit::AuditLogger::emit), which assigns the
/// event id. A payload value that cannot be serialized is remembered as a
/// fault instead of failing the builder.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub kind: AuditKind,
    pub level: AuditLevel,
    pub session_id: Option<SessionId>,
    pub timestamp: DateTime<Utc>,
    pub event: Option<String>,
    pub msg: String,
    pub payload: Map<String, Value>,
    fault: Option<String>,
}

impl AuditEvent {
    pub fn new(kind: AuditKind, level: AuditLevel, msg: impl Into<String>) -> Self {
        Self {
            kind,
            level,
            session_id: None,
            timestamp: Utc::now(),
            event: None,
            msg: msg.into(),
            payload: Map::new(),
            fault: None,
        }
    }

    pub fn info(kind: AuditKind, msg: impl Into<String>) -> Self {
        Self::new(kind, AuditLevel::Info, msg)
    }

    pub fn warning(kind: AuditKind, msg: impl Into<String>) -> Self {
        Self::new(kind, AuditLevel::Warning, msg)
    }

    pub fn error(kind: AuditKind, msg: impl Into<String>) -> Self {
        Self::new(kind, AuditLevel::Error, msg)
    }

    pub fn session(mut self, session_id: &SessionId) -> Self {
        self.session_id = Some(session_id.clone());
        self
    }

    /// Long description, written as the `event` field
    pub fn describe(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Add a payload field
    pub fn with<T: Serialize + ?Sized>(mut self, key: &str, value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                self.payload.insert(key.to_string(), value);
            }
            Err(e) => {
                if self.fault.is_none() {
                    self.fault = Some(format!("payload field {:?}: {}", key, e));
                }
            }
        }
        self
    }

    /// Why the event cannot be written as structured data, if it cannot
    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// JSON object written to the simplified channel
    pub fn to_record(&self, event_id: &str) -> Value {
        let mut record = self.payload.clone();
        record.insert("ID".into(), Value::from(event_id));
        record.insert(
            "session_id".into(),
            self.session_id
                .as_ref()
                .map_or(Value::Null, |id| Value::from(id.as_str())),
        );
        if let Some(event) = &self.event {
            record.insert("event".into(), Value::from(event.as_str()));
        }
        if let Some(command) = self.kind.command() {
            record.insert("Command".into(), Value::from(command));
        }
        record.insert("level".into(), Value::from(self.level.as_str()));
        record.insert("msg".into(), Value::from(self.msg.as_str()));
        record.insert("timestamp".into(), Value::from(self.iso_timestamp()));
        Value::Object(record)
    }

    /// Human-readable line for the detailed channel
    pub fn to_detailed_line(&self, event_id: &str) -> String {
        let session = self.session_id.as_ref().map_or("-", |id| id.as_str());
        let mut line = format!(
            "{} {:<7} [{}] {} {}: {}",
            self.iso_timestamp(),
            self.level.as_str().to_uppercase(),
            session,
            event_id,
            self.kind.as_str(),
            self.event.as_deref().unwrap_or(&self.msg),
        );
        if !self.payload.is_empty() {
            line.push(' ');
            line.push_str(&Value::Object(self.payload.clone()).to_string());
        }
        line
    }

    pub fn iso_timestamp(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}
