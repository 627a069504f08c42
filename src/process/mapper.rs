// src/process/mapper.rs
use rust_decimal::Decimal;
use tracing::{debug, trace, warn};

use super::header::HeaderMap;
use super::percent::parse_percent;
use super::utils::cell;
use crate::lookup::{Jurisdiction, LookupTables, DEFAULT_TAX_CAT};
use crate::manifest::ProcessingError;
use crate::model::{
    Item, RawRow, Record, CUSTOMER_BUSINESS, CUSTOMER_PERSONAL, GROUP_CODE,
    PER_TAXABLE_TYPE_DEFAULT, PROVIDER_DEFAULT, TAX_TYPE_DEFAULT, TRANSACTION_DEFAULT,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Business,
    Personal,
}

impl Side {
    pub fn customer(self) -> &'static str {
        match self {
            Side::Business => CUSTOMER_BUSINESS,
            Side::Personal => CUSTOMER_PERSONAL,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Side::Business => "business",
            Side::Personal => "personal",
        }
    }
}

/// `TAXABLE` → 1; `NOT TAXABLE`, `NONTAXABLE`, `EXEMPT` → 0. Anything else
/// is not a settled answer.
pub fn parse_taxable(text: &str) -> Option<i8> {
    match text.trim().to_uppercase().as_str() {
        "TAXABLE" => Some(1),
        "NOT TAXABLE" | "NONTAXABLE" | "EXEMPT" => Some(0),
        _ => None,
    }
}

/// One side's treatment of a row, before it is tied to a geocode.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Treatment {
    side: Side,
    taxable: i8,
    tax_cat: String,
    tax_type: &'static str,
    percent: Option<Decimal>,
}

impl Treatment {
    fn same_treatment(&self, other: &Treatment) -> bool {
        self.taxable == other.taxable
            && self.percent == other.percent
            && self.tax_type == other.tax_type
            && self.tax_cat == other.tax_cat
    }

    fn record(&self, geocode: &str, item: &str, tax_type: &str, effective: &str) -> Record {
        Record {
            geocode: geocode.to_string(),
            tax_auth_id: String::new(),
            group: GROUP_CODE.to_string(),
            item: item.to_string(),
            customer: self.side.customer().to_string(),
            provider: PROVIDER_DEFAULT.to_string(),
            transaction: TRANSACTION_DEFAULT.to_string(),
            taxable: self.taxable,
            tax_type: tax_type.to_string(),
            tax_cat: self.tax_cat.clone(),
            effective: effective.to_string(),
            per_taxable_type: PER_TAXABLE_TYPE_DEFAULT.to_string(),
            percent_taxable: self.percent,
        }
    }
}

/// What one input row turned into.
#[derive(Debug, Default)]
pub struct RowOutput {
    pub records: Vec<Record>,
    pub item: Option<Item>,
    pub errors: Vec<ProcessingError>,
}

/// Turns filtered rows into records and item candidates.
#[derive(Debug, Clone, Copy)]
pub struct RowMapper<'a> {
    tables: &'a LookupTables,
    header: &'a HeaderMap,
    effective_date: &'a str,
}

impl<'a> RowMapper<'a> {
    pub fn new(tables: &'a LookupTables, header: &'a HeaderMap, effective_date: &'a str) -> Self {
        Self {
            tables,
            header,
            effective_date,
        }
    }

    pub fn map_row(&self, row: &RawRow, jurisdiction: &Jurisdiction) -> RowOutput {
        let mut out = RowOutput::default();
        let row_error = |message: String| ProcessingError::RowMapping {
            document: row.document.to_string(),
            row: row.row_number,
            message,
        };

        if self.header.current_id.is_none() {
            out.errors
                .push(row_error("identifier column not present in header".into()));
            return out;
        }
        let identifier = cell(&row.cells, self.header.current_id).trim();
        if identifier.is_empty() {
            trace!(row = row.row_number, "no identifier, skipping row");
            return out;
        }

        out.item = self.derive_item(&row.cells, identifier);

        let mut treatments = Vec::with_capacity(2);
        for side in [Side::Business, Side::Personal] {
            match self.treatment(&row.cells, side) {
                Ok(Some(t)) => treatments.push(t),
                Ok(None) => {}
                Err(message) => out.errors.push(row_error(message)),
            }
        }

        // Identical business and personal treatment collapses to personal.
        if let [business, personal] = treatments.as_slice() {
            if business.same_treatment(personal) {
                trace!(row = row.row_number, "business matches personal, keeping personal");
                treatments.remove(0);
            }
        }
        if treatments.is_empty() {
            return out;
        }

        for geocode in &jurisdiction.geocodes {
            let mut expanded = Vec::new();
            let mut unresolved: Vec<&str> = Vec::new();
            for t in &treatments {
                match self.tables.tax_types.resolve(geocode, &t.tax_cat) {
                    Some(resolved) => expanded.extend(resolved.tax_types.iter().map(|tax_type| {
                        t.record(geocode, identifier, tax_type, self.effective_date)
                    })),
                    None if !unresolved.contains(&t.tax_cat.as_str()) => {
                        unresolved.push(&t.tax_cat)
                    }
                    None => {}
                }
            }
            if unresolved.is_empty() {
                out.records.extend(expanded);
            } else {
                debug!(%geocode, row = row.row_number, "excluding geocode without tax types");
                out.errors.extend(unresolved.into_iter().map(|tax_cat| {
                    ProcessingError::TaxTypeUnresolved {
                        document: row.document.to_string(),
                        row: row.row_number,
                        geocode: geocode.clone(),
                        tax_cat: tax_cat.to_string(),
                    }
                }));
            }
        }
        out
    }

    fn derive_item(&self, cells: &[String], identifier: &str) -> Option<Item> {
        let description: String = self
            .header
            .descriptions
            .iter()
            .map(|idx| cell(cells, *idx).trim())
            .collect();
        (!description.is_empty()).then(|| Item::new(identifier, description))
    }

    /// `Ok(None)` when the side has no settled answer; `Err` when one of the
    /// side's columns is missing from the header or a cell is malformed.
    fn treatment(&self, cells: &[String], side: Side) -> Result<Option<Treatment>, String> {
        let (use_idx, cat_idx, pct_idx) = match side {
            Side::Business => (
                self.header.business_use,
                self.header.business_tax_cat,
                self.header.business_percent_tax,
            ),
            Side::Personal => (
                self.header.personal_use,
                self.header.personal_tax_cat,
                self.header.personal_percent_tax,
            ),
        };

        let missing: Vec<&str> = [
            ("use", use_idx),
            ("tax_cat", cat_idx),
            ("percent_taxable", pct_idx),
        ]
        .into_iter()
        .filter(|(_, idx)| idx.is_none())
        .map(|(field, _)| field)
        .collect();
        if !missing.is_empty() {
            return Err(format!(
                "{} {} column(s) not present in header",
                side.label(),
                missing.join(", ")
            ));
        }

        let use_text = cell(cells, use_idx).trim();
        if use_text.is_empty() {
            return Ok(None);
        }
        let Some(taxable) = parse_taxable(use_text) else {
            trace!(side = side.label(), value = use_text, "unsettled taxability");
            return Ok(None);
        };

        let percent = parse_percent(cell(cells, pct_idx))
            .map_err(|e| format!("{} side: {}", side.label(), e))?;

        Ok(Some(Treatment {
            side,
            taxable,
            tax_cat: self.tax_cat_code(cell(cells, cat_idx)),
            tax_type: TAX_TYPE_DEFAULT,
            percent,
        }))
    }

    fn tax_cat_code(&self, label: &str) -> String {
        match self.tables.tax_cats.code_for(label) {
            Some(code) => code.to_string(),
            None => {
                warn!(label = label.trim(), "no tax category code, using {}", DEFAULT_TAX_CAT);
                DEFAULT_TAX_CAT.to_string()
            }
        }
    }
}
