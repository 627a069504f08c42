// src/lookup/mod.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, instrument};

use crate::fetch::FetchError;

pub mod geocode;
pub mod identifier;
pub mod tax;

pub use geocode::{parent_geocode, GeocodeTable, Jurisdiction, JurisdictionKind};
pub use identifier::{normalize, IdentifierTable};
pub use tax::{Resolved, ResolvedLevel, TaxCatTable, TaxTypeTable, DEFAULT_TAX_CAT};

/// The four reference tables a run depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Geocode,
    TaxCategory,
    TaxType,
    Identifier,
}

impl TableKind {
    pub const ALL: [TableKind; 4] = [
        TableKind::Geocode,
        TableKind::TaxCategory,
        TableKind::TaxType,
        TableKind::Identifier,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            TableKind::Geocode => "geo_state.csv",
            TableKind::TaxCategory => "tax_cat.csv",
            TableKind::TaxType => "unique_tax_type.csv",
            TableKind::Identifier => "product_code_mapping.csv",
        }
    }
}

/// Supplies the raw CSV text of each lookup table.
#[async_trait]
pub trait LookupSource: Send + Sync {
    async fn read_table(&self, table: TableKind) -> Result<String, FetchError>;
}

/// Lookup tables stored as CSV files in one directory.
#[derive(Debug, Clone)]
pub struct DirLookupSource {
    dir: PathBuf,
}

impl DirLookupSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl LookupSource for DirLookupSource {
    async fn read_table(&self, table: TableKind) -> Result<String, FetchError> {
        let path = self.dir.join(table.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Read-only reference data, built once per run and shared by every worker.
#[derive(Debug, Default, Clone)]
pub struct LookupTables {
    pub geocodes: GeocodeTable,
    pub tax_cats: TaxCatTable,
    pub tax_types: TaxTypeTable,
    pub identifiers: IdentifierTable,
}

impl LookupTables {
    /// Load and parse all four tables. Any failure is fatal to the run.
    #[instrument(level = "info", skip(source))]
    pub async fn load(source: &dyn LookupSource) -> Result<Self> {
        let mut texts = Vec::with_capacity(TableKind::ALL.len());
        for kind in TableKind::ALL {
            let text = source
                .read_table(kind)
                .await
                .with_context(|| format!("loading lookup table {}", kind.file_name()))?;
            texts.push(text);
        }
        let tables = Self::from_csv(&texts[0], &texts[1], &texts[2], &texts[3])?;
        info!(
            tax_categories = tables.tax_cats.len(),
            tax_type_keys = tables.tax_types.len(),
            identifiers = tables.identifiers.len(),
            "lookup tables loaded"
        );
        Ok(tables)
    }

    pub fn from_csv(geo: &str, tax_cat: &str, tax_type: &str, identifiers: &str) -> Result<Self> {
        Ok(Self {
            geocodes: GeocodeTable::from_reader(geo.as_bytes())
                .context("parsing geo_state.csv")?,
            tax_cats: TaxCatTable::from_reader(tax_cat.as_bytes())
                .context("parsing tax_cat.csv")?,
            tax_types: TaxTypeTable::from_reader(tax_type.as_bytes())
                .context("parsing unique_tax_type.csv")?,
            identifiers: IdentifierTable::from_reader(identifiers.as_bytes())
                .context("parsing product_code_mapping.csv")?,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_tables() -> LookupTables {
    LookupTables::from_csv(
        geocode::SAMPLE_GEO_CSV,
        tax::SAMPLE_TAX_CAT_CSV,
        tax::SAMPLE_TAX_TYPE_CSV,
        identifier::SAMPLE_MAPPING_CSV,
    )
    .unwrap()
}
