// src/lookup/identifier.rs
use anyhow::{bail, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::io::Read;
use tracing::{debug, warn};

/// Strip trailing `"0"` segments: `"1.1.1.4.3.0.0.0"` → `"1.1.1.4.3"`.
/// An identifier made only of zero segments is returned trimmed.
pub fn normalize(identifier: &str) -> String {
    let trimmed = identifier.trim();
    let mut parts: Vec<&str> = trimmed.split('.').collect();
    while parts.last() == Some(&"0") {
        parts.pop();
    }
    if parts.is_empty() {
        trimmed.to_string()
    } else {
        parts.join(".")
    }
}

/// Normalized hierarchical identifier → raw short code (unpadded).
#[derive(Debug, Default, Clone)]
pub struct IdentifierTable {
    codes: HashMap<String, String>,
}

fn column(headers: &StringRecord, name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

impl IdentifierTable {
    /// Reads `product_code_mapping.csv`, using its `research_id` and `item`
    /// columns.
    pub fn from_reader<R: Read>(rdr: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(rdr);
        let headers = reader.headers().context("reading mapping header")?.clone();
        let (Some(id_idx), Some(code_idx)) =
            (column(&headers, "research_id"), column(&headers, "item"))
        else {
            bail!("identifier mapping needs 'research_id' and 'item' columns");
        };

        let mut codes = HashMap::new();
        for (i, rec) in reader.records().enumerate() {
            let rec = rec.with_context(|| format!("mapping row {}", i + 2))?;
            let id = rec.get(id_idx).unwrap_or("").trim_matches('"');
            let code = rec.get(code_idx).unwrap_or("").trim_matches('"');
            if id.is_empty() || code.is_empty() {
                warn!(row = i + 2, "mapping row without identifier or code, skipping");
                continue;
            }
            codes.insert(normalize(id), code.to_string());
        }
        debug!(mappings = codes.len(), "loaded identifier table");
        Ok(Self { codes })
    }

    /// Raw code for an already-normalized identifier.
    pub fn get(&self, normalized: &str) -> Option<&str> {
        self.codes.get(normalized).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

#[cfg(test)]
pub(crate) const SAMPLE_MAPPING_CSV: &str = "research_id,taxonomy_id,product_id,group,item,description
1.1.1.4.3,597,GENERAL_SAAS_NO_MS_SERVER,7777,22,Technology | Cloud Computing | SaaS
1.1.2.1.1,598,PROGRAMMING_IMPLEMENTATION,7777,5,Technology | Programming | Implementation
1.1.3.2.1,599,MAINTENANCE_REQUIRED,7777,123,Technology | Maintenance | Required
1.2.0.0,600,HARDWARE,7777,1234,Hardware
";
