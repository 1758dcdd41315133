//! Three-channel audit logger
//!
//! - detailed: human-readable line per event
//! - simplified: one JSON object per line, peer-observable events only
//! - exception: internal failures, including failures of the other two
//!
//! [`AuditLogger::emit`] never fails. Everything emitted is also mirrored to
//! `tracing` under the `dicomhawk::audit` target.

mod event;
mod sink;

pub use event::{AuditEvent, AuditKind, AuditLevel};
pub use sink::{AuditSink, FileSink, MemorySink};

use std::fmt::Display;
use std::io;
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};

use crate::config::LoggingConfig;
use crate::session::IdGenerator;

const AUDIT_TARGET: &str = "dicomhawk::audit";

pub struct AuditLogger {
    detailed: Arc<dyn AuditSink>,
    simplified: Arc<dyn AuditSink>,
    exception: Arc<dyn AuditSink>,
    ids: IdGenerator,
}

/// In-memory channels returned by [`AuditLogger::in_memory`]
#[derive(Debug, Clone, Default)]
pub struct MemoryChannels {
    pub detailed: MemorySink,
    pub simplified: MemorySink,
    pub exception: MemorySink,
}

impl MemoryChannels {
    /// Parsed simplified records
    pub fn records(&self) -> Vec<serde_json::Value> {
        self.simplified
            .lines()
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}

impl AuditLogger {
    pub fn new(
        detailed: Arc<dyn AuditSink>,
        simplified: Arc<dyn AuditSink>,
        exception: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            detailed,
            simplified,
            exception,
            ids: IdGenerator::new(),
        }
    }

    /// Open the three log files, creating directories as needed
    pub fn open_files(config: &LoggingConfig) -> io::Result<Self> {
        Ok(Self::new(
            Arc::new(FileSink::open(config.detailed_log_path())?),
            Arc::new(FileSink::open(config.simplified_log_path())?),
            Arc::new(FileSink::open(config.exception_log_path())?),
        ))
    }

    pub fn in_memory() -> (Self, MemoryChannels) {
        let channels = MemoryChannels::default();
        let logger = Self::new(
            Arc::new(channels.detailed.clone()),
            Arc::new(channels.simplified.clone()),
            Arc::new(channels.exception.clone()),
        );
        (logger, channels)
    }

    /// Write `event` to its channels
    pub fn emit(&self, event: AuditEvent) {
        let event_id = self.ids.next_string();
        mirror(&event, &event_id);

        if let Some(fault) = event.fault() {
            self.exception(
                &format!("Failed to log {} event {}", event.kind.as_str(), event_id),
                &fault,
            );
            return;
        }

        self.write("detailed", &self.detailed, &event.to_detailed_line(&event_id));

        if event.kind.is_housekeeping() {
            return;
        }

        match serde_json::to_string(&event.to_record(&event_id)) {
            Ok(line) => self.write("simplified", &self.simplified, &line),
            Err(e) => self.exception(
                &format!("Failed to log simplified message {}", event_id),
                &e,
            ),
        }
    }

    /// Record an internal failure on the exception channel
    pub fn exception(&self, context: &str, error: &dyn Display) {
        tracing::error!(target: AUDIT_TARGET, "{}: {}", context, error);

        let line = format!(
            "{} ERROR {}: {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            context,
            error
        );
        if let Err(e) = self.exception.write_line(&line) {
            tracing::error!("exception channel unavailable: {}", e);
        }
    }

    fn write(&self, channel: &str, sink: &Arc<dyn AuditSink>, line: &str) {
        if let Err(e) = sink.write_line(line) {
            self.exception(&format!("Failed to write {} channel", channel), &e);
        }
    }
}

fn mirror(event: &AuditEvent, event_id: &str) {
    let session = event.session_id.as_ref().map(|id| id.as_str()).unwrap_or("-");
    let text = event.event.as_deref().unwrap_or(&event.msg);
    match event.level {
        AuditLevel::Info => tracing::info!(
            target: AUDIT_TARGET,
            kind = event.kind.as_str(),
            session,
            id = event_id,
            "{}",
            text
        ),
        AuditLevel::Warning => tracing::warn!(
            target: AUDIT_TARGET,
            kind = event.kind.as_str(),
            session,
            id = event_id,
            "{}",
            text
        ),
        AuditLevel::Error => tracing::error!(
            target: AUDIT_TARGET,
            kind = event.kind.as_str(),
            session,
            id = event_id,
            "{}",
            text
        ),
    }
}
