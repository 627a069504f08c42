// src/lookup/tax.rs
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, trace};

use super::geocode::parent_geocode;

/// Category code used when a label is empty or unknown.
pub const DEFAULT_TAX_CAT: &str = "00";

#[derive(Debug, Deserialize)]
struct TaxCatRow {
    tax_cat: String,
    tax_cat_desc: String,
}

/// Free-text tax category label → 2-character code.
#[derive(Debug, Default, Clone)]
pub struct TaxCatTable {
    codes: HashMap<String, String>,
}

impl TaxCatTable {
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let mut codes = HashMap::new();
        for (i, row) in reader.deserialize::<TaxCatRow>().enumerate() {
            let row = row.with_context(|| format!("tax_cat.csv row {}", i + 2))?;
            if row.tax_cat_desc.is_empty() || row.tax_cat.is_empty() {
                continue;
            }
            codes.insert(row.tax_cat_desc.to_uppercase(), row.tax_cat);
        }
        debug!(categories = codes.len(), "loaded tax category table");
        Ok(Self { codes })
    }

    pub fn code_for(&self, label: &str) -> Option<&str> {
        let key = label.trim().to_uppercase();
        if key.is_empty() {
            return None;
        }
        self.codes.get(&key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct TaxTypeRow {
    geocode: String,
    tax_cat: String,
    tax_type: String,
}

/// Which level of the geocode hierarchy answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedLevel {
    Direct,
    Parent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<'a> {
    pub tax_types: &'a [String],
    pub level: ResolvedLevel,
}

/// (geocode, tax category) → sorted, de-duplicated tax types.
#[derive(Debug, Default, Clone)]
pub struct TaxTypeTable {
    types: HashMap<(String, String), Vec<String>>,
}

fn key(geocode: &str, tax_cat: &str) -> Option<(String, String)> {
    let g = geocode.trim().to_uppercase();
    let c = tax_cat.trim().to_uppercase();
    (!g.is_empty() && !c.is_empty()).then_some((g, c))
}

impl TaxTypeTable {
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new().trim(csv::Trim::All).from_reader(rdr);
        let mut table = Self::default();
        for (i, row) in reader.deserialize::<TaxTypeRow>().enumerate() {
            let row = row.with_context(|| format!("unique_tax_type.csv row {}", i + 2))?;
            table.insert(&row.geocode, &row.tax_cat, &row.tax_type);
        }
        for list in table.types.values_mut() {
            list.sort();
            list.dedup();
        }
        debug!(keys = table.types.len(), "loaded tax type table");
        Ok(table)
    }

    fn insert(&mut self, geocode: &str, tax_cat: &str, tax_type: &str) {
        let tax_type = tax_type.trim();
        if tax_type.is_empty() {
            return;
        }
        if let Some(k) = key(geocode, tax_cat) {
            self.types.entry(k).or_default().push(tax_type.to_string());
        }
    }

    /// Exact-key lookup with no fallback.
    pub fn get(&self, geocode: &str, tax_cat: &str) -> Option<&[String]> {
        let k = key(geocode, tax_cat)?;
        self.types
            .get(&k)
            .map(Vec::as_slice)
            .filter(|list| !list.is_empty())
    }

    /// Direct match on `(geocode, tax_cat)`, otherwise the parent geocode.
    /// The two levels are never combined.
    pub fn resolve(&self, geocode: &str, tax_cat: &str) -> Option<Resolved<'_>> {
        if let Some(tax_types) = self.get(geocode, tax_cat) {
            trace!(geocode, tax_cat, "direct tax types");
            return Some(Resolved {
                tax_types,
                level: ResolvedLevel::Direct,
            });
        }
        let parent = parent_geocode(geocode);
        if parent.eq_ignore_ascii_case(geocode.trim()) {
            return None;
        }
        self.get(&parent, tax_cat).map(|tax_types| {
            trace!(geocode, %parent, tax_cat, "parent tax types");
            Resolved {
                tax_types,
                level: ResolvedLevel::Parent,
            }
        })
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_TAX_TYPE_CSV: &str = "geocode,tax_cat,tax_type
US1700000000,01,47
US1700000000,01,02
US1700000000,01,01
US1700000000,01,02
US0800000000,01,01
US0800000000,01,02
US0800000000,01,03
US08013A0025,01,01
US08013A0025,01,04
US17031A0047,01,47
";

#[cfg(test)]
pub(crate) const SAMPLE_TAX_CAT_CSV: &str = "tax_cat,tax_cat_desc
01,General Sales Tax
02,Special Tax
";

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn types() -> TaxTypeTable {
        TaxTypeTable::from_reader(SAMPLE_TAX_TYPE_CSV.as_bytes()).unwrap()
    }

    #[test]
    fn lists_are_sorted_and_unique() {
        assert_eq!(
            types().get("US1700000000", "01").unwrap(),
            &["01", "02", "47"]
        );
    }

    #[test]
    fn direct_match_preempts_parent() {
        let t = types();
        let r = t.resolve("US08013A0025", "01").unwrap();
        assert_eq!(r.level, ResolvedLevel::Direct);
        assert_eq!(r.tax_types, &["01", "04"]);
    }

    #[test]
    fn falls_back_to_parent() {
        let t = types();
        let r = t.resolve("US08031A0002", "01").unwrap();
        assert_eq!(r.level, ResolvedLevel::Parent);
        assert_eq!(r.tax_types, &["01", "02", "03"]);
    }

    #[test]
    fn no_match_at_either_level() {
        let t = types();
        assert!(t.resolve("US08031A0002", "99").is_none());
        assert!(t.resolve("US9900000000", "01").is_none());
        assert!(t.resolve("", "01").is_none());
        assert!(t.resolve("US1700000000", " ").is_none());
    }

    #[test]
    fn keys_are_normalized() {
        let t = types();
        assert!(t.get(" us1700000000 ", "01").is_some());
    }

    #[test]
    fn tax_cat_labels_are_case_insensitive() {
        let cats = TaxCatTable::from_reader(SAMPLE_TAX_CAT_CSV.as_bytes()).unwrap();
        assert_eq!(cats.code_for("general sales tax"), Some("01"));
        assert_eq!(cats.code_for("  Special Tax "), Some("02"));
        assert_eq!(cats.code_for("Unknown"), None);
        assert_eq!(cats.code_for(""), None);
    }

    proptest! {
        #[test]
        fn resolution_never_mixes_levels(
            city in prop::sample::select(vec!["US08013A0025", "US08031A0002", "US17031A0047", "US17031A0003"]),
            cat in prop::sample::select(vec!["01", "02"]),
        ) {
            let t = types();
            if let Some(r) = t.resolve(city, cat) {
                let direct = t.get(city, cat);
                let parent = t.get(&parent_geocode(city), cat);
                match r.level {
                    ResolvedLevel::Direct => prop_assert_eq!(Some(r.tax_types), direct),
                    ResolvedLevel::Parent => {
                        prop_assert!(direct.is_none());
                        prop_assert_eq!(Some(r.tax_types), parent);
                    }
                }
            }
        }
    }
}
