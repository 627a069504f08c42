// src/process/worker.rs
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::header::HeaderMap;
use super::mapper::RowMapper;
use super::utils::{cell, clean_str, same_text};
use crate::config::Config;
use crate::fetch::{fetch_rows_with_retry, DocumentSource, RateLimiter, RetryPolicy, RowRange};
use crate::lookup::LookupTables;
use crate::manifest::{ErrorManifest, ProcessingError};
use crate::model::{DocumentDescriptor, Item, RawRow, Record};

/// Records and item candidates produced by one document.
#[derive(Debug, Default)]
pub struct DocumentOutput {
    pub records: Vec<Record>,
    pub items: Vec<Item>,
}

/// Everything a worker needs, shared across all workers of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub source: Arc<dyn DocumentSource>,
    pub limiter: Arc<RateLimiter>,
    pub tables: Arc<LookupTables>,
    pub header: Arc<HeaderMap>,
    pub config: Arc<Config>,
    pub errors: Arc<ErrorManifest>,
}

impl WorkerContext {
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.retry_base(),
        }
    }

    /// Process one document end to end. Failures are recorded in the shared
    /// manifest and never escape.
    #[instrument(level = "info", skip(self, document), fields(document = %document.name))]
    pub async fn process_document(&self, document: &DocumentDescriptor) -> DocumentOutput {
        let mut out = DocumentOutput::default();

        let Some(jurisdiction) = self
            .tables
            .geocodes
            .resolve_document(&document.name, &self.config.document_suffix)
        else {
            self.errors.push(ProcessingError::JurisdictionUnresolved {
                document: document.name.clone(),
            });
            return out;
        };
        debug!(
            jurisdiction = %jurisdiction.name,
            geocodes = ?jurisdiction.geocodes,
            "resolved jurisdiction"
        );

        if self.header.admin.is_none() {
            self.errors.push(ProcessingError::RowMapping {
                document: document.name.clone(),
                row: self.config.header_row,
                message: format!(
                    "admin column '{}' not present in header",
                    self.config.columns.admin
                ),
            });
            return out;
        }

        let first_data_row = self.config.header_row + 1;
        let rows = match fetch_rows_with_retry(
            self.source.as_ref(),
            &self.limiter,
            self.retry_policy(),
            document,
            RowRange::starting_at(first_data_row),
        )
        .await
        {
            Ok(rows) => rows,
            Err(e) => {
                self.errors.push(ProcessingError::DocumentFetch {
                    document: document.name.clone(),
                    message: e.to_string(),
                });
                return out;
            }
        };

        let doc_name: Arc<str> = Arc::from(document.name.as_str());
        let mapper = RowMapper::new(&self.tables, &self.header, &self.config.effective_date);
        let total = rows.len();
        let mut kept = 0usize;

        for (offset, cells) in rows.into_iter().enumerate() {
            let cells: Vec<String> = cells.iter().map(|c| clean_str(c)).collect();
            if !same_text(cell(&cells, self.header.admin), &self.config.admin_filter_value) {
                continue;
            }
            kept += 1;
            let row = RawRow {
                document: Arc::clone(&doc_name),
                row_number: first_data_row + offset,
                cells,
            };
            let mapped = mapper.map_row(&row, &jurisdiction);
            out.records.extend(mapped.records);
            out.items.extend(mapped.item);
            self.errors.extend(mapped.errors);
        }

        info!(
            rows = total,
            matched = kept,
            records = out.records.len(),
            items = out.items.len(),
            "document processed"
        );
        out
    }
}
