// src/fetch/local.rs
use async_trait::async_trait;
use csv::ReaderBuilder;
use std::path::{Path, PathBuf};
use tokio::task;
use tracing::{debug, info};

use super::{DocumentSource, FetchError, RowRange};
use crate::model::DocumentDescriptor;

/// A directory of CSV exports. Each file is one document, named by its stem.
#[derive(Debug, Clone)]
pub struct LocalCsvSource {
    dir: PathBuf,
}

impl LocalCsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn read_all_rows(path: &Path) -> Result<Vec<Vec<String>>, FetchError> {
    if !path.exists() {
        return Err(FetchError::NotFound(path.display().to_string()));
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        rows.push(rec.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

fn list_dir(dir: &Path) -> Result<Vec<DocumentDescriptor>, FetchError> {
    let mut docs: Vec<DocumentDescriptor> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map_or(false, |e| e.eq_ignore_ascii_case("csv"))
        })
        .filter_map(|p| {
            let stem = p.file_stem()?.to_string_lossy().to_string();
            Some(DocumentDescriptor::new(p.to_string_lossy(), stem))
        })
        .collect();
    docs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(docs)
}

#[async_trait]
impl DocumentSource for LocalCsvSource {
    async fn list_documents(&self) -> Result<Vec<DocumentDescriptor>, FetchError> {
        let dir = self.dir.clone();
        let docs = task::spawn_blocking(move || list_dir(&dir))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        info!(dir = %self.dir.display(), documents = docs.len(), "listed local documents");
        Ok(docs)
    }

    async fn fetch_rows(
        &self,
        document: &DocumentDescriptor,
        range: RowRange,
    ) -> Result<Vec<Vec<String>>, FetchError> {
        let path = PathBuf::from(&document.id);
        let rows = task::spawn_blocking(move || read_all_rows(&path))
            .await
            .map_err(|e| FetchError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;
        let (lo, hi) = range.bounds(rows.len());
        debug!(document = %document.name, total = rows.len(), lo, hi, "read local document");
        Ok(rows[lo..hi].to_vec())
    }
}
