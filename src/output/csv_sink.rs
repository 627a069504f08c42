// src/output/csv_sink.rs
use anyhow::{Context, Result};
use chrono::Utc;
use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use tracing::info;

use super::{write_atomically, OutputSink};
use crate::manifest::ManifestEntry;
use crate::model::{Item, OutputBundle, Record};

pub const RESULTS_FILE: &str = "results.csv";
pub const ITEMS_FILE: &str = "items.csv";
pub const ERRORS_FILE: &str = "errors.json";

#[derive(Debug, Serialize)]
struct ErrorReport<'a> {
    timestamp: String,
    total_errors: usize,
    errors: &'a [ManifestEntry],
}

/// `results.csv` and `items.csv` with every value quoted, plus
/// `errors.json` when the run recorded errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSink;

fn write_table<W: Write, const N: usize>(
    out: W,
    header: [&str; N],
    rows: impl Iterator<Item = [String; N]>,
) -> Result<()> {
    let mut wtr = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(out);
    wtr.write_record(header)?;
    for row in rows {
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn item_row(i: &Item) -> [String; 3] {
    [i.group.clone(), i.item.clone(), i.description.clone()]
}

impl OutputSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn write(&self, bundle: &OutputBundle, run_dir: &Path) -> Result<()> {
        write_atomically(&run_dir.join(RESULTS_FILE), |f| {
            write_table(f, Record::COLUMNS, bundle.records.iter().map(Record::to_row))
        })
        .context("writing results.csv")?;

        write_atomically(&run_dir.join(ITEMS_FILE), |f| {
            write_table(f, Item::COLUMNS, bundle.items.iter().map(item_row))
        })
        .context("writing items.csv")?;

        if !bundle.errors.is_empty() {
            let entries: Vec<ManifestEntry> = bundle.errors.iter().map(|e| e.to_entry()).collect();
            let report = ErrorReport {
                timestamp: Utc::now().to_rfc3339(),
                total_errors: entries.len(),
                errors: &entries,
            };
            write_atomically(&run_dir.join(ERRORS_FILE), |f| {
                serde_json::to_writer_pretty(&mut *f, &report)?;
                Ok(())
            })
            .context("writing errors.json")?;
        }

        info!(
            dir = %run_dir.display(),
            records = bundle.records.len(),
            items = bundle.items.len(),
            errors = bundle.errors.len(),
            "wrote csv output"
        );
        Ok(())
    }
}
