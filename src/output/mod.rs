// src/output/mod.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::OutputBundle;

pub mod csv_sink;
pub mod parquet_sink;

pub use csv_sink::CsvSink;
pub use parquet_sink::ParquetSink;

/// Serializes a finished run.
pub trait OutputSink {
    fn name(&self) -> &'static str;

    /// Write the bundle's artifacts into `run_dir`, which already exists.
    fn write(&self, bundle: &OutputBundle, run_dir: &Path) -> Result<()>;
}

/// `<root>/output-<yyyymmdd-HHMM>`, created if missing.
pub fn prepare_run_dir(root: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
    let dir = root.join(format!("output-{}", now.format("%Y%m%d-%H%M")));
    fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

/// Write through a temporary file so readers never see a partial artifact.
pub(crate) fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut fs::File) -> Result<()>,
{
    let tmp = path.with_extension("tmp");
    let mut file =
        fs::File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    write(&mut file)?;
    file.sync_all().ok();
    drop(file);
    fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn run_dir_is_named_by_utc_minute() {
        let root = tempdir().unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 59).unwrap();
        let dir = prepare_run_dir(root.path(), now).unwrap();
        assert!(dir.ends_with("output-20240309-0705"));
        assert!(dir.is_dir());
    }
}
