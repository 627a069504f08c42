// src/process/header.rs
use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::utils::clean_str;
use crate::config::ColumnNames;

/// Logical field → column index, computed once from the first document and
/// shared by all others.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    pub admin: Option<usize>,
    pub current_id: Option<usize>,
    pub business_use: Option<usize>,
    pub business_tax_cat: Option<usize>,
    pub business_percent_tax: Option<usize>,
    pub personal_use: Option<usize>,
    pub personal_tax_cat: Option<usize>,
    pub personal_percent_tax: Option<usize>,
    /// One entry per configured description column, in configured order.
    pub descriptions: Vec<Option<usize>>,
}

impl HeaderMap {
    /// Bind configured column names to positions in `header`. Matching is
    /// on trimmed, case-insensitive text; the first occurrence wins.
    pub fn from_header_row(header: &[String], columns: &ColumnNames) -> Result<Self> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        for (idx, raw) in header.iter().enumerate() {
            let name = clean_str(raw);
            if !name.is_empty() {
                positions.entry(name.to_uppercase()).or_insert(idx);
            }
        }
        if positions.is_empty() {
            bail!("header row is empty");
        }

        let find = |name: &str| positions.get(&name.trim().to_uppercase()).copied();
        let map = Self {
            admin: find(&columns.admin),
            current_id: find(&columns.current_id),
            business_use: find(&columns.business_use),
            business_tax_cat: find(&columns.business_tax_cat),
            business_percent_tax: find(&columns.business_percent_tax),
            personal_use: find(&columns.personal_use),
            personal_tax_cat: find(&columns.personal_tax_cat),
            personal_percent_tax: find(&columns.personal_percent_tax),
            descriptions: columns.descriptions.iter().map(|d| find(d)).collect(),
        };

        if map.bound_count() == 0 {
            bail!(
                "header row matched none of the configured columns (found: {:?})",
                header.iter().map(|h| clean_str(h)).collect::<Vec<_>>()
            );
        }
        for name in map.missing(columns) {
            warn!(column = %name, "configured column not present in header row");
        }
        debug!(?map, "header map");
        Ok(map)
    }

    fn bound_count(&self) -> usize {
        [
            self.admin,
            self.current_id,
            self.business_use,
            self.business_tax_cat,
            self.business_percent_tax,
            self.personal_use,
            self.personal_tax_cat,
            self.personal_percent_tax,
        ]
        .iter()
        .chain(self.descriptions.iter())
        .filter(|i| i.is_some())
        .count()
    }

    /// Configured names of the fields that are not bound.
    pub fn missing<'a>(&self, columns: &'a ColumnNames) -> Vec<&'a str> {
        let mut out = Vec::new();
        for (idx, name) in [
            (self.admin, &columns.admin),
            (self.current_id, &columns.current_id),
            (self.business_use, &columns.business_use),
            (self.business_tax_cat, &columns.business_tax_cat),
            (self.business_percent_tax, &columns.business_percent_tax),
            (self.personal_use, &columns.personal_use),
            (self.personal_tax_cat, &columns.personal_tax_cat),
            (self.personal_percent_tax, &columns.personal_percent_tax),
        ] {
            if idx.is_none() {
                out.push(name.as_str());
            }
        }
        out
    }
}
