// src/model.rs
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::manifest::ProcessingError;

/// Group code stamped on every record and item.
pub const GROUP_CODE: &str = "ZZZZ";
/// Customer class for business-use treatments.
pub const CUSTOMER_BUSINESS: &str = "BB";
/// Customer class for personal-use treatments.
pub const CUSTOMER_PERSONAL: &str = "99";
pub const PROVIDER_DEFAULT: &str = "99";
pub const TRANSACTION_DEFAULT: &str = "01";
pub const TAX_TYPE_DEFAULT: &str = "01";
pub const PER_TAXABLE_TYPE_DEFAULT: &str = "01";

/// One input document as enumerated by the document source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentDescriptor {
    /// Source-specific handle (spreadsheet id, file path, ...).
    pub id: String,
    /// Human-facing name; the jurisdiction is derived from it.
    pub name: String,
}

impl DocumentDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A data row of a document, cells already cleaned to strings.
#[derive(Debug, Clone)]
pub struct RawRow {
    pub document: Arc<str>,
    /// 1-based row number within the document tab.
    pub row_number: usize,
    pub cells: Vec<String>,
}

/// One line of the output matrix. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub geocode: String,
    pub tax_auth_id: String,
    pub group: String,
    pub item: String,
    pub customer: String,
    pub provider: String,
    pub transaction: String,
    pub taxable: i8,
    pub tax_type: String,
    pub tax_cat: String,
    pub effective: String,
    pub per_taxable_type: String,
    /// Always scaled to 6 fractional digits when present.
    pub percent_taxable: Option<Decimal>,
}

impl Record {
    pub const COLUMNS: [&'static str; 13] = [
        "geocode",
        "tax_auth_id",
        "group",
        "item",
        "customer",
        "provider",
        "transaction",
        "taxable",
        "tax_type",
        "tax_cat",
        "effective",
        "per_taxable_type",
        "percent_taxable",
    ];

    /// Copy of this record with a different item code.
    pub fn with_item(&self, item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            ..self.clone()
        }
    }

    pub fn with_geocode(&self, geocode: impl Into<String>) -> Self {
        Self {
            geocode: geocode.into(),
            ..self.clone()
        }
    }

    pub fn percent_text(&self) -> String {
        self.percent_taxable
            .map(|p| p.to_string())
            .unwrap_or_default()
    }

    /// Cells in column order.
    pub fn to_row(&self) -> [String; 13] {
        [
            self.geocode.clone(),
            self.tax_auth_id.clone(),
            self.group.clone(),
            self.item.clone(),
            self.customer.clone(),
            self.provider.clone(),
            self.transaction.clone(),
            self.taxable.to_string(),
            self.tax_type.clone(),
            self.tax_cat.clone(),
            self.effective.clone(),
            self.per_taxable_type.clone(),
            self.percent_text(),
        ]
    }
}

/// Secondary output entity; identity is the item code after conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Item {
    pub group: String,
    pub item: String,
    pub description: String,
}

impl Item {
    pub const COLUMNS: [&'static str; 3] = ["group", "item", "description"];

    pub fn new(item: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            group: GROUP_CODE.to_string(),
            item: item.into(),
            description: description.into(),
        }
    }

    pub fn with_item(&self, item: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            ..self.clone()
        }
    }
}

/// Everything a run hands to the output sink.
#[derive(Debug, Default)]
pub struct OutputBundle {
    pub records: Vec<Record>,
    pub items: Vec<Item>,
    pub errors: Vec<ProcessingError>,
}

impl OutputBundle {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn sample() -> Record {
        Record {
            geocode: "US1700000000".into(),
            tax_auth_id: String::new(),
            group: GROUP_CODE.into(),
            item: "1.1.1.4.3.0.0.0".into(),
            customer: CUSTOMER_PERSONAL.into(),
            provider: PROVIDER_DEFAULT.into(),
            transaction: TRANSACTION_DEFAULT.into(),
            taxable: 1,
            tax_type: TAX_TYPE_DEFAULT.into(),
            tax_cat: "05".into(),
            effective: "1999-01-01".into(),
            per_taxable_type: PER_TAXABLE_TYPE_DEFAULT.into(),
            percent_taxable: Some(Decimal::from_str("0.087500").unwrap()),
        }
    }

    #[test]
    fn row_follows_column_order() {
        let row = sample().to_row();
        assert_eq!(row.len(), Record::COLUMNS.len());
        assert_eq!(row[0], "US1700000000");
        assert_eq!(row[1], "");
        assert_eq!(row[3], "1.1.1.4.3.0.0.0");
        assert_eq!(row[7], "1");
        assert_eq!(row[12], "0.087500");
    }

    #[test]
    fn with_item_leaves_original_untouched() {
        let original = sample();
        let converted = original.with_item("005");
        assert_eq!(converted.item, "005");
        assert_eq!(original.item, "1.1.1.4.3.0.0.0");
        assert_eq!(converted.geocode, original.geocode);
    }

    #[test]
    fn missing_percent_renders_empty() {
        let mut r = sample();
        r.percent_taxable = None;
        assert_eq!(r.to_row()[12], "");
    }
}
