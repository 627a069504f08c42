// src/output/parquet_sink.rs
use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use super::{write_atomically, OutputSink};
use crate::model::{OutputBundle, Record};

pub const PARQUET_FILE: &str = "results.parquet";

/// The record matrix as one Parquet file, every column Utf8 in output order.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetSink;

fn schema() -> Arc<Schema> {
    Arc::new(Schema::new(
        Record::COLUMNS
            .iter()
            .map(|name| Field::new(*name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ))
}

fn to_batch(records: &[Record]) -> Result<RecordBatch> {
    let mut builders: Vec<StringBuilder> = Record::COLUMNS
        .iter()
        .map(|_| StringBuilder::with_capacity(records.len(), records.len() * 12))
        .collect();
    for r in records {
        for (builder, value) in builders.iter_mut().zip(r.to_row()) {
            if value.is_empty() {
                builder.append_null();
            } else {
                builder.append_value(value);
            }
        }
    }
    let columns: Vec<ArrayRef> = builders
        .into_iter()
        .map(|mut b| Arc::new(b.finish()) as ArrayRef)
        .collect();
    RecordBatch::try_new(schema(), columns).context("building record batch")
}

impl OutputSink for ParquetSink {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn write(&self, bundle: &OutputBundle, run_dir: &Path) -> Result<()> {
        let batch = to_batch(&bundle.records)?;
        let path = run_dir.join(PARQUET_FILE);
        write_atomically(&path, |file| {
            let props = WriterProperties::builder()
                .set_compression(Compression::SNAPPY)
                .build();
            let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
                .context("initializing Parquet writer")?;
            writer.write(&batch).context("writing Parquet batch")?;
            writer.close().context("closing Parquet writer")?;
            Ok(())
        })?;
        info!(path = %path.display(), rows = batch.num_rows(), "wrote parquet output");
        Ok(())
    }
}
