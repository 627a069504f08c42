// src/manifest.rs
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// A failure isolated to one unit of work. The `Display` text is the
/// manifest message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    #[error("failed to fetch document: {message}")]
    DocumentFetch { document: String, message: String },

    #[error("could not determine geocode(s) for document '{document}'")]
    JurisdictionUnresolved { document: String },

    #[error("row {row}: {message}")]
    RowMapping {
        document: String,
        row: usize,
        message: String,
    },

    #[error("row {row}: no tax types for geocode {geocode} and tax category {tax_cat} (direct or parent)")]
    TaxTypeUnresolved {
        document: String,
        row: usize,
        geocode: String,
        tax_cat: String,
    },

    #[error("no short code mapping for identifier '{identifier}'")]
    UnmappedIdentifier { identifier: String },

    #[error("{count} identifier(s) could not be mapped")]
    UnmappedIdentifierSummary {
        count: usize,
        identifiers: Vec<String>,
    },

    #[error("city geocode {geocode} has no matching state-level tax treatments (parent {parent_geocode}) for {records} record(s)")]
    ReplicationGap {
        geocode: String,
        parent_geocode: String,
        records: usize,
    },

    #[error("run deadline of {deadline_secs}s elapsed with {} document(s) unfinished", pending.len())]
    Timeout {
        deadline_secs: u64,
        pending: Vec<String>,
    },

    #[error("worker for document '{document}' terminated abnormally: {message}")]
    WorkerFailed { document: String, message: String },
}

/// Flat, serializable view of a [`ProcessingError`] for the error artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManifestEntry {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub geocode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_cat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    pub message: String,
}

impl ProcessingError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DocumentFetch { .. } => "document_fetch",
            Self::JurisdictionUnresolved { .. } => "jurisdiction_unresolved",
            Self::RowMapping { .. } => "row_mapping",
            Self::TaxTypeUnresolved { .. } => "tax_type_unresolved",
            Self::UnmappedIdentifier { .. } => "unmapped_identifier",
            Self::UnmappedIdentifierSummary { .. } => "unmapped_identifier_summary",
            Self::ReplicationGap { .. } => "replication_gap",
            Self::Timeout { .. } => "timeout",
            Self::WorkerFailed { .. } => "worker_failed",
        }
    }

    /// Name of the document this error belongs to, if any.
    pub fn document(&self) -> Option<&str> {
        match self {
            Self::DocumentFetch { document, .. }
            | Self::JurisdictionUnresolved { document }
            | Self::RowMapping { document, .. }
            | Self::TaxTypeUnresolved { document, .. }
            | Self::WorkerFailed { document, .. } => Some(document),
            _ => None,
        }
    }

    pub fn to_entry(&self) -> ManifestEntry {
        let mut entry = ManifestEntry {
            kind: self.kind(),
            document: self.document().map(str::to_string),
            row: None,
            geocode: None,
            tax_cat: None,
            identifier: None,
            identifiers: Vec::new(),
            count: None,
            message: self.to_string(),
        };
        match self {
            Self::RowMapping { row, .. } => entry.row = Some(*row),
            Self::TaxTypeUnresolved {
                row,
                geocode,
                tax_cat,
                ..
            } => {
                entry.row = Some(*row);
                entry.geocode = Some(geocode.clone());
                entry.tax_cat = Some(tax_cat.clone());
            }
            Self::UnmappedIdentifier { identifier } => {
                entry.identifier = Some(identifier.clone());
            }
            Self::UnmappedIdentifierSummary { count, identifiers } => {
                entry.count = Some(*count);
                entry.identifiers = identifiers.clone();
            }
            Self::ReplicationGap {
                geocode, records, ..
            } => {
                entry.geocode = Some(geocode.clone());
                entry.count = Some(*records);
            }
            Self::Timeout { pending, .. } => {
                entry.count = Some(pending.len());
                entry.identifiers = pending.clone();
            }
            _ => {}
        }
        entry
    }
}

/// Append-only error list shared by all workers of a run.
#[derive(Debug, Default)]
pub struct ErrorManifest {
    entries: Mutex<Vec<ProcessingError>>,
}

impl ErrorManifest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, err: ProcessingError) {
        warn!(kind = err.kind(), document = ?err.document(), "{}", err);
        self.lock().push(err);
    }

    pub fn extend(&self, errs: impl IntoIterator<Item = ProcessingError>) {
        for err in errs {
            self.push(err);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take everything recorded so far, leaving the manifest empty.
    pub fn drain(&self) -> Vec<ProcessingError> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProcessingError>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
