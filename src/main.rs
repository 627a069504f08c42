use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::Client;
use std::{env, sync::Arc, time::Duration};
use taxmatrix::{
    config::{Config, SourceConfig},
    fetch::{DocumentSource, LocalCsvSource, SheetsSource},
    lookup::{DirLookupSource, LookupTables},
    output::{prepare_run_dir, CsvSink, OutputSink, ParquetSink},
    Orchestrator,
};
use tokio::time::Instant;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

fn build_source(config: &Config) -> Result<Arc<dyn DocumentSource>> {
    Ok(match &config.source {
        SourceConfig::Local { dir } => {
            info!(dir = %dir.display(), "reading documents from local directory");
            Arc::new(LocalCsvSource::new(dir))
        }
        SourceConfig::Drive {
            folder_id,
            token_var,
        } => {
            let token = env::var(token_var)
                .with_context(|| format!("{} must hold a Google OAuth access token", token_var))?;
            let client = Client::builder()
                .timeout(Duration::from_secs(60))
                .gzip(true)
                .build()
                .context("building HTTP client")?;
            info!(%folder_id, "reading documents from Drive folder");
            Arc::new(SheetsSource::new(
                client,
                token,
                folder_id.clone(),
                config.sheet_name.clone(),
            ))
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into())))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    // ─── 2) config, collaborators ────────────────────────────────────
    let config = Config::load()?;
    let source = build_source(&config)?;
    let tables = LookupTables::load(&DirLookupSource::new(&config.lookup_dir))
        .await
        .context("loading lookup tables")?;

    // ─── 3) run ──────────────────────────────────────────────────────
    let start = Instant::now();
    let orchestrator = Orchestrator::new(config.clone(), source, tables);
    let bundle = orchestrator.run().await?;

    // ─── 4) write artifacts ──────────────────────────────────────────
    let run_dir = prepare_run_dir(&config.output_dir, Utc::now())?;
    let mut sinks: Vec<Box<dyn OutputSink>> = vec![Box::new(CsvSink)];
    if config.write_parquet {
        sinks.push(Box::new(ParquetSink));
    }
    for sink in &sinks {
        sink.write(&bundle, &run_dir)
            .with_context(|| format!("writing {} output", sink.name()))?;
    }

    if !bundle.is_clean() {
        warn!(errors = bundle.errors.len(), "run finished with errors; see errors.json");
    }
    info!(
        records = bundle.records.len(),
        items = bundle.items.len(),
        dir = %run_dir.display(),
        elapsed = ?start.elapsed(),
        "done"
    );
    Ok(())
}
