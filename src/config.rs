// src/config.rs
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, str::FromStr, time::Duration};
use tracing::{debug, info};

/// Environment variable naming an optional YAML config file.
pub const CONFIG_PATH_VAR: &str = "TAXMATRIX_CONFIG";

/// Spreadsheet column names bound to each logical field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnNames {
    pub admin: String,
    pub current_id: String,
    pub business_use: String,
    pub business_tax_cat: String,
    pub business_percent_tax: String,
    pub personal_use: String,
    pub personal_tax_cat: String,
    pub personal_percent_tax: String,
    /// Concatenated, in order and without separator, into item descriptions.
    pub descriptions: Vec<String>,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            admin: "Admin".into(),
            current_id: "Current ID".into(),
            business_use: "Business Use".into(),
            business_tax_cat: "Business tax_cat".into(),
            business_percent_tax: "Business percent_taxable".into(),
            personal_use: "Personal Use".into(),
            personal_tax_cat: "Personal tax_cat".into(),
            personal_percent_tax: "Personal percent_taxable".into(),
            descriptions: vec![
                "L1 Description".into(),
                "L2 Description".into(),
                "L3 Description".into(),
                "L4 Description".into(),
            ],
        }
    }
}

/// Where input documents come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// A directory of CSV exports, one file per jurisdiction.
    Local { dir: PathBuf },
    /// A Drive folder of spreadsheets, read through the Sheets API.
    Drive {
        folder_id: String,
        /// Environment variable holding the OAuth bearer token.
        #[serde(default = "default_token_var")]
        token_var: String,
    },
}

fn default_token_var() -> String {
    "GOOGLE_ACCESS_TOKEN".into()
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Local {
            dir: PathBuf::from("documents"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Documents processed in parallel.
    pub max_concurrent_requests: usize,
    /// Minimum spacing between outbound source calls, in seconds.
    pub rate_limit_delay: f64,
    pub max_retries: u32,
    /// Base of the exponential retry backoff, in seconds.
    pub retry_base_delay: f64,
    /// Whole-run deadline in seconds; `None` disables it.
    pub run_timeout_secs: Option<u64>,

    pub sheet_name: String,
    /// 1-based row holding the column headers.
    pub header_row: usize,
    pub admin_filter_value: String,
    pub columns: ColumnNames,
    /// Stripped from document names to obtain the jurisdiction.
    pub document_suffix: String,
    pub effective_date: String,

    pub replicate_state_treatments: bool,

    pub source: SourceConfig,
    pub lookup_dir: PathBuf,
    pub output_dir: PathBuf,
    pub write_parquet: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            rate_limit_delay: 0.1,
            max_retries: 3,
            retry_base_delay: 1.0,
            run_timeout_secs: Some(840),
            sheet_name: "Research".into(),
            header_row: 4,
            admin_filter_value: "Tag Level".into(),
            columns: ColumnNames::default(),
            document_suffix: " Sales Tax Research".into(),
            effective_date: "1999-01-01".into(),
            replicate_state_treatments: false,
            source: SourceConfig::default(),
            lookup_dir: PathBuf::from("mapping"),
            output_dir: PathBuf::from("output"),
            write_parquet: false,
        }
    }
}

impl Config {
    /// Defaults, then the optional YAML file, then environment overrides.
    /// The result is validated; any problem is fatal.
    pub fn load() -> Result<Self> {
        let mut cfg = match env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.trim().is_empty() => {
                info!(path = %path, "loading config file");
                Self::from_yaml_file(&path)?
            }
            _ => Self::default(),
        };
        cfg.apply_overrides(|key| env::var(key).ok())?;
        cfg.validate()?;
        debug!(?cfg, "configuration");
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// Apply `KEY=value` overrides using the legacy variable names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MAX_CONCURRENT_REQUESTS") {
            self.max_concurrent_requests = parse_var("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        if let Some(v) = get("RATE_LIMIT_DELAY") {
            self.rate_limit_delay = parse_var("RATE_LIMIT_DELAY", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            self.max_retries = parse_var("MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("RUN_TIMEOUT_SECS") {
            let secs: u64 = parse_var("RUN_TIMEOUT_SECS", &v)?;
            self.run_timeout_secs = (secs > 0).then_some(secs);
        }
        if let Some(v) = get("SHEET_NAME") {
            self.sheet_name = v;
        }
        if let Some(v) = get("HEADER_ROW") {
            self.header_row = parse_var("HEADER_ROW", &v)?;
        }
        if let Some(v) = get("ADMIN_FILTER_VALUE") {
            self.admin_filter_value = v;
        }
        if let Some(v) = get("EFFECTIVE_DATE") {
            self.effective_date = v;
        }
        if let Some(v) = get("DOCUMENT_SUFFIX") {
            self.document_suffix = v;
        }
        if let Some(v) = get("REPLICATE_STATE_TREATMENTS") {
            self.replicate_state_treatments = parse_flag("REPLICATE_STATE_TREATMENTS", &v)?;
        }
        if let Some(v) = get("WRITE_PARQUET") {
            self.write_parquet = parse_flag("WRITE_PARQUET", &v)?;
        }
        if let Some(v) = get("LOOKUP_DIR") {
            self.lookup_dir = PathBuf::from(v);
        }
        if let Some(v) = get("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }

        let cols = &mut self.columns;
        for (key, slot) in [
            ("ADMIN_COLUMN", &mut cols.admin),
            ("COL_CURRENT_ID", &mut cols.current_id),
            ("COL_BUSINESS_USE", &mut cols.business_use),
            ("COL_BUSINESS_TAX_CAT", &mut cols.business_tax_cat),
            ("COL_BUSINESS_PERCENT_TAX", &mut cols.business_percent_tax),
            ("COL_PERSONAL_USE", &mut cols.personal_use),
            ("COL_PERSONAL_TAX_CAT", &mut cols.personal_tax_cat),
            ("COL_PERSONAL_PERCENT_TAX", &mut cols.personal_percent_tax),
        ] {
            if let Some(v) = get(key) {
                *slot = v;
            }
        }
        if let Some(v) = get("COL_DESCRIPTIONS") {
            cols.descriptions = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // DRIVE_FOLDER_ID wins over DOCUMENTS_DIR when both are set.
        if let Some(dir) = get("DOCUMENTS_DIR") {
            self.source = SourceConfig::Local {
                dir: PathBuf::from(dir),
            };
        }
        if let Some(folder_id) = get("DRIVE_FOLDER_ID") {
            self.source = SourceConfig::Drive {
                folder_id,
                token_var: default_token_var(),
            };
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_requests == 0 {
            bail!("max_concurrent_requests must be at least 1");
        }
        if !self.rate_limit_delay.is_finite() || self.rate_limit_delay < 0.0 {
            bail!("rate_limit_delay must be a non-negative number of seconds");
        }
        if !self.retry_base_delay.is_finite() || self.retry_base_delay < 0.0 {
            bail!("retry_base_delay must be a non-negative number of seconds");
        }
        if self.header_row == 0 {
            bail!("header_row is 1-based and must be at least 1");
        }
        if self.sheet_name.trim().is_empty() {
            bail!("sheet_name must not be empty");
        }
        if self.admin_filter_value.trim().is_empty() {
            bail!("admin_filter_value must not be empty");
        }
        NaiveDate::parse_from_str(&self.effective_date, "%Y-%m-%d").with_context(|| {
            format!(
                "effective_date '{}' is not a YYYY-MM-DD date",
                self.effective_date
            )
        })?;

        let cols = &self.columns;
        for (field, value) in [
            ("admin", &cols.admin),
            ("current_id", &cols.current_id),
            ("business_use", &cols.business_use),
            ("business_tax_cat", &cols.business_tax_cat),
            ("business_percent_tax", &cols.business_percent_tax),
            ("personal_use", &cols.personal_use),
            ("personal_tax_cat", &cols.personal_tax_cat),
            ("personal_percent_tax", &cols.personal_percent_tax),
        ] {
            if value.trim().is_empty() {
                bail!("column name for '{}' must not be empty", field);
            }
        }

        match &self.source {
            SourceConfig::Local { dir } if dir.as_os_str().is_empty() => {
                bail!("local document source needs a directory")
            }
            SourceConfig::Drive { folder_id, .. } if folder_id.trim().is_empty() => {
                bail!("drive document source needs a folder id")
            }
            _ => {}
        }
        Ok(())
    }

    pub fn min_call_interval(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_delay)
    }

    pub fn retry_base(&self) -> Duration {
        Duration::from_secs_f64(self.retry_base_delay)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("invalid value '{}' for {}", value, key))
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("invalid boolean '{}' for {}", other, key),
    }
}
