//! In-memory catalog of synthetic subjects
//!
//! The store is filled once at startup and never mutated afterwards, so it
//! is shared between associations behind a plain `Arc`.

mod generator;
mod record;

pub use generator::generate;
pub use record::{new_uid, SubjectRecord};

use std::collections::HashSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::audit::{AuditEvent, AuditKind, AuditLogger};
use crate::config::CatalogConfig;
use crate::error::{HoneypotError, Result};

/// Name predicate applied by C-FIND
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameFilter {
    /// Universal match
    Any,
    /// Case-sensitive equality
    Exact(String),
}

impl NameFilter {
    /// Absent, blank and `*` terms match everything
    pub fn from_term(term: Option<&str>) -> Self {
        let trimmed = term
            .map(|t| t.trim_matches(&['\0', ' '][..]))
            .unwrap_or_default();
        if trimmed.is_empty() || trimmed == "*" {
            NameFilter::Any
        } else {
            NameFilter::Exact(trimmed.to_string())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::Any => true,
            NameFilter::Exact(expected) => name == expected,
        }
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    records: Vec<SubjectRecord>,
    ids: HashSet<String>,
}

impl RecordStore {
    /// Build a store from records in order; later duplicates are dropped
    pub fn from_records(records: impl IntoIterator<Item = SubjectRecord>) -> Self {
        let mut store = Self::default();
        for record in records {
            // first record with an id wins
            let _ = store.insert(record);
        }
        store
    }

    /// Load every `*.dcm` file under `dir`, in file name order.
    ///
    /// Unreadable files, files without PatientID and duplicate ids are
    /// skipped and reported; loading itself never fails.
    pub fn load(dir: &Path, audit: &AuditLogger) -> Self {
        let mut store = Self::default();

        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| dir.display().to_string());
                    report_load_failure(audit, &path, &e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !is_dicom_file(entry.path()) {
                continue;
            }

            let loaded = dicom_object::open_file(entry.path())
                .map_err(HoneypotError::dicom)
                .and_then(|obj| SubjectRecord::from_object(&obj))
                .and_then(|record| store.insert(record));
            if let Err(e) = loaded {
                report_load_failure(audit, &entry.path().display().to_string(), &e);
            }
        }

        tracing::info!("Loaded {} catalog records from {}", store.len(), dir.display());
        store
    }

    /// Generate a synthetic catalog when the directory holds no `*.dcm` file,
    /// then load it
    pub fn load_or_generate(config: &CatalogConfig, audit: &AuditLogger) -> Self {
        if !contains_dicom_files(&config.directory) {
            tracing::info!(
                "Catalog {} is empty, generating {} files",
                config.directory.display(),
                config.generate_count
            );
            if let Err(e) = generate(
                &config.directory,
                config.generate_count,
                config.image_size,
                audit,
            ) {
                audit.exception("Failed to generate synthetic catalog", &e);
            }
        }
        Self::load(&config.directory, audit)
    }

    /// Records whose name passes `filter`, in catalog order
    pub fn find_all<'a>(&'a self, filter: &'a NameFilter) -> Vec<&'a SubjectRecord> {
        self.find_from(filter, 0).map(|(_, record)| record).collect()
    }

    /// Lazily match records at catalog position `start` and later.
    ///
    /// Each match comes with its position so a caller can resume after it.
    pub fn find_from<'a>(
        &'a self,
        filter: &'a NameFilter,
        start: usize,
    ) -> impl Iterator<Item = (usize, &'a SubjectRecord)> + 'a {
        self.records
            .iter()
            .enumerate()
            .skip(start)
            .filter(move |(_, record)| filter.matches(&record.name))
    }

    pub fn records(&self) -> &[SubjectRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, record: SubjectRecord) -> Result<()> {
        if !self.ids.insert(record.id.clone()) {
            return Err(HoneypotError::DuplicateRecord(record.id));
        }
        self.records.push(record);
        Ok(())
    }
}

fn is_dicom_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("dcm")
}

fn contains_dicom_files(dir: &Path) -> bool {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .any(|e| e.file_type().is_file() && is_dicom_file(e.path()))
}

fn report_load_failure(audit: &AuditLogger, path: &str, error: &dyn std::fmt::Display) {
    audit.emit(
        AuditEvent::error(AuditKind::CatalogLoad, "Failed")
            .describe("Failed to read DICOM file")
            .with("file", path)
            .with("error", &error.to_string()),
    );
}
