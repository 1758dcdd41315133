//! Sub-operation sequences for C-GET and C-MOVE

use std::sync::Arc;

use dimse::{DimseReply, DimseStatus};

use crate::catalog::{RecordStore, SubjectRecord};
use crate::responder::dataset::record_dataset;

/// C-GET progress over the whole store.
///
/// Yields the total count, then `(n - k + 1, record k)` for every record k,
/// then a final zero-remaining success without a record.
pub struct GetResponses {
    store: Arc<RecordStore>,
    total: u32,
    next_index: usize,
    announced: bool,
    finished: bool,
}

impl GetResponses {
    pub fn new(store: Arc<RecordStore>, total: u32) -> Self {
        Self {
            store,
            total,
            next_index: 0,
            announced: false,
            finished: false,
        }
    }
}

impl Iterator for GetResponses {
    type Item = DimseReply;

    fn next(&mut self) -> Option<DimseReply> {
        if !self.announced {
            self.announced = true;
            return Some(DimseReply::SubOperations(self.total));
        }

        if self.next_index < self.total as usize {
            if let Some(record) = self.store.records().get(self.next_index) {
                let remaining = self.total - self.next_index as u32;
                self.next_index += 1;
                return Some(DimseReply::sub_operation(remaining, record_dataset(record)));
            }
        }

        if self.finished {
            return None;
        }
        self.finished = true;
        Some(DimseReply::Final {
            status: DimseStatus::Success,
            remaining: Some(0),
        })
    }
}

impl Drop for GetResponses {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                "C-GET sequence dropped after {} of {} sub-operations",
                self.next_index,
                self.total
            );
        }
    }
}

/// C-MOVE progress: a single sub-operation carrying a fabricated record.
///
/// The move destination is not contacted.
pub struct MoveResponses {
    record: Option<SubjectRecord>,
    announced: bool,
}

impl MoveResponses {
    pub fn new() -> Self {
        Self {
            record: Some(SubjectRecord::fabricated()),
            announced: false,
        }
    }
}

impl Default for MoveResponses {
    fn default() -> Self {
        Self::new()
    }
}

impl Iterator for MoveResponses {
    type Item = DimseReply;

    fn next(&mut self) -> Option<DimseReply> {
        if !self.announced {
            self.announced = true;
            return Some(DimseReply::SubOperations(1));
        }
        self.record
            .take()
            .map(|record| DimseReply::sub_operation(1, record_dataset(&record)))
    }
}
