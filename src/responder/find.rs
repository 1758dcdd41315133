use std::sync::Arc;

use dimse::DimseReply;

use crate::audit::{AuditEvent, AuditKind, AuditLogger};
use crate::catalog::{NameFilter, RecordStore};
use crate::responder::dataset::record_dataset;
use crate::session::SessionId;

/// Pending C-FIND responses, one per matching record.
///
/// Records are matched and rendered only when pulled. Running out of matches
/// logs the match count; dropping the sequence earlier logs a cancellation
/// with the number of matches delivered so far.
pub struct FindResponses {
    store: Arc<RecordStore>,
    filter: NameFilter,
    cursor: usize,
    delivered: usize,
    exhausted: bool,
    session_id: SessionId,
    audit: Arc<AuditLogger>,
}

impl FindResponses {
    pub fn new(
        store: Arc<RecordStore>,
        filter: NameFilter,
        session_id: SessionId,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            filter,
            cursor: 0,
            delivered: 0,
            exhausted: false,
            session_id,
            audit,
        }
    }
}

impl Iterator for FindResponses {
    type Item = DimseReply;

    fn next(&mut self) -> Option<DimseReply> {
        if self.exhausted {
            return None;
        }

        let found = self
            .store
            .find_from(&self.filter, self.cursor)
            .next()
            .map(|(position, record)| (position, record_dataset(record)));
        if let Some((position, dataset)) = found {
            self.cursor = position + 1;
            self.delivered += 1;
            return Some(DimseReply::pending(dataset));
        }

        self.exhausted = true;
        self.audit.emit(
            AuditEvent::warning(AuditKind::Find, "C-FIND Search result")
                .session(&self.session_id)
                .with("Matches", &self.delivered),
        );
        None
    }
}

impl Drop for FindResponses {
    fn drop(&mut self) {
        if !self.exhausted {
            self.audit.emit(
                AuditEvent::warning(AuditKind::Find, "C-FIND Search cancelled")
                    .session(&self.session_id)
                    .with("Matches", &self.delivered),
            );
        }
    }
}
