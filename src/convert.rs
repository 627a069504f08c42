// src/convert.rs
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::lookup::{normalize, IdentifierTable};
use crate::manifest::ProcessingError;
use crate::model::{Item, Record};

/// Width of an output item code.
pub const SHORT_CODE_WIDTH: usize = 3;

/// Left-pad with `0` to three characters. Longer codes pass through
/// untouched.
pub fn pad_code(code: &str) -> String {
    let code = code.trim();
    if code.len() > SHORT_CODE_WIDTH {
        warn!(code, "item code longer than {} characters, not truncating", SHORT_CODE_WIDTH);
        return code.to_string();
    }
    format!("{:0>width$}", code, width = SHORT_CODE_WIDTH)
}

/// Maps hierarchical identifiers to short codes, remembering every original
/// identifier that had no mapping.
#[derive(Debug)]
pub struct ItemCodeConverter<'a> {
    table: &'a IdentifierTable,
    unmapped: BTreeSet<String>,
}

impl<'a> ItemCodeConverter<'a> {
    pub fn new(table: &'a IdentifierTable) -> Self {
        Self {
            table,
            unmapped: BTreeSet::new(),
        }
    }

    pub fn convert(&mut self, identifier: &str) -> Option<String> {
        let normalized = normalize(identifier);
        match self.table.get(&normalized) {
            Some(code) => Some(pad_code(code)),
            None => {
                if self.unmapped.insert(identifier.to_string()) {
                    debug!(identifier, %normalized, "no short code mapping");
                }
                None
            }
        }
    }

    /// Records with a converted item code; unmapped ones are dropped.
    pub fn convert_records(&mut self, records: Vec<Record>) -> Vec<Record> {
        let before = records.len();
        let out: Vec<Record> = records
            .into_iter()
            .filter_map(|r| self.convert(&r.item).map(|code| r.with_item(code)))
            .collect();
        info!(before, after = out.len(), "converted record identifiers");
        out
    }

    pub fn convert_items(&mut self, items: Vec<Item>) -> Vec<Item> {
        let before = items.len();
        let out: Vec<Item> = items
            .into_iter()
            .filter_map(|i| self.convert(&i.item).map(|code| i.with_item(code)))
            .collect();
        info!(before, after = out.len(), "converted item identifiers");
        out
    }

    /// Original identifiers without a mapping, sorted.
    pub fn unmapped(&self) -> impl Iterator<Item = &str> {
        self.unmapped.iter().map(String::as_str)
    }

    /// One entry per unmapped identifier plus a summary, or nothing.
    pub fn unmapped_errors(&self) -> Vec<ProcessingError> {
        if self.unmapped.is_empty() {
            return Vec::new();
        }
        let mut errors: Vec<ProcessingError> = self
            .unmapped
            .iter()
            .map(|id| ProcessingError::UnmappedIdentifier {
                identifier: id.clone(),
            })
            .collect();
        errors.push(ProcessingError::UnmappedIdentifierSummary {
            count: self.unmapped.len(),
            identifiers: self.unmapped.iter().cloned().collect(),
        });
        errors
    }
}
