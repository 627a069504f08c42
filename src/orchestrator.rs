// src/orchestrator.rs
use anyhow::{bail, Context, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::{
    sync::Semaphore,
    task::{Id, JoinError, JoinHandle, JoinSet},
    time::{timeout_at, Instant},
};
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::convert::ItemCodeConverter;
use crate::dedup::dedup_items;
use crate::fetch::{fetch_rows_with_retry, DocumentSource, RateLimiter, RetryPolicy, RowRange};
use crate::lookup::LookupTables;
use crate::manifest::{ErrorManifest, ProcessingError};
use crate::model::{DocumentDescriptor, OutputBundle};
use crate::process::{replicate_state_treatments, DocumentOutput, HeaderMap, WorkerContext};

/// Aborts the wrapped task when dropped, so abandoning a worker slot also
/// stops its document.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

type WorkerResult = (usize, Result<DocumentOutput, String>);

/// Fan-in bookkeeping: which documents are still out, which slot task runs
/// which document, and what has come back.
#[derive(Default)]
struct FanIn {
    pending: BTreeMap<usize, String>,
    slots: HashMap<Id, usize>,
    outputs: Vec<(usize, DocumentOutput)>,
}

impl FanIn {
    fn settle(&mut self, joined: Result<WorkerResult, JoinError>, errors: &ErrorManifest) {
        let (idx, message) = match joined {
            Ok((idx, Ok(out))) => {
                self.pending.remove(&idx);
                self.outputs.push((idx, out));
                return;
            }
            Ok((idx, Err(message))) => (idx, message),
            Err(e) => {
                let Some(idx) = self.slots.get(&e.id()).copied() else {
                    error!(error = %e, "unknown worker slot failed");
                    return;
                };
                let message = if e.is_panic() {
                    "worker slot panicked".to_string()
                } else {
                    e.to_string()
                };
                (idx, message)
            }
        };
        let document = self.pending.remove(&idx).unwrap_or_default();
        error!(%document, %message, "worker failed");
        errors.push(ProcessingError::WorkerFailed { document, message });
    }
}

/// Owns one aggregation run: header discovery, bounded fan-out over
/// documents, fan-in, then conversion and deduplication.
pub struct Orchestrator {
    config: Arc<Config>,
    source: Arc<dyn DocumentSource>,
    tables: Arc<LookupTables>,
    limiter: Arc<RateLimiter>,
}

impl Orchestrator {
    pub fn new(config: Config, source: Arc<dyn DocumentSource>, tables: LookupTables) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.min_call_interval()));
        Self {
            config: Arc::new(config),
            source,
            tables: Arc::new(tables),
            limiter,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// List the source's documents and process them all.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self) -> Result<OutputBundle> {
        self.limiter.acquire().await;
        let documents = self
            .source
            .list_documents()
            .await
            .context("listing documents")?;
        info!(documents = documents.len(), "documents to process");
        self.run_documents(documents).await
    }

    /// Process `documents`. Only a missing header map is fatal; every other
    /// failure lands in the bundle's error list.
    pub async fn run_documents(&self, documents: Vec<DocumentDescriptor>) -> Result<OutputBundle> {
        let Some(first) = documents.first() else {
            info!("no documents, nothing to do");
            return Ok(OutputBundle::default());
        };
        let header = self.header_map(first).await?;
        let deadline = self.config.run_timeout().map(|d| Instant::now() + d);

        let errors = ErrorManifest::new();
        let ctx = WorkerContext {
            source: Arc::clone(&self.source),
            limiter: Arc::clone(&self.limiter),
            tables: Arc::clone(&self.tables),
            header: Arc::new(header),
            config: Arc::clone(&self.config),
            errors: Arc::clone(&errors),
        };

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_requests.max(1)));
        let mut set: JoinSet<WorkerResult> = JoinSet::new();
        let mut fan_in = FanIn::default();

        for (idx, doc) in documents.into_iter().enumerate() {
            fan_in.pending.insert(idx, doc.name.clone());
            let ctx = ctx.clone();
            let sem = Arc::clone(&semaphore);
            let slot = set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => return (idx, Err(e.to_string())),
                };
                let mut worker = AbortOnDrop(tokio::spawn(async move {
                    ctx.process_document(&doc).await
                }));
                match (&mut worker.0).await {
                    Ok(out) => (idx, Ok(out)),
                    Err(e) if e.is_panic() => (idx, Err("worker panicked".to_string())),
                    Err(e) => (idx, Err(e.to_string())),
                }
            });
            fan_in.slots.insert(slot.id(), idx);
        }

        let mut timed_out = false;
        loop {
            let next = match deadline {
                Some(at) => match timeout_at(at, set.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        break;
                    }
                },
                None => set.join_next().await,
            };
            let Some(joined) = next else { break };
            fan_in.settle(joined, &errors);
        }

        if timed_out {
            set.shutdown().await;
            let names: Vec<String> = std::mem::take(&mut fan_in.pending).into_values().collect();
            warn!(unfinished = names.len(), "run deadline elapsed, keeping partial results");
            errors.push(ProcessingError::Timeout {
                deadline_secs: self.config.run_timeout_secs.unwrap_or_default(),
                pending: names,
            });
        }

        // Document order, so first-occurrence dedup is stable across runs.
        let mut outputs = fan_in.outputs;
        outputs.sort_by_key(|(idx, _)| *idx);
        let (mut records, mut items) = (Vec::new(), Vec::new());
        for (_, out) in outputs {
            records.extend(out.records);
            items.extend(out.items);
        }
        info!(records = records.len(), items = items.len(), "fan-in complete");

        let mut converter = ItemCodeConverter::new(&self.tables.identifiers);
        let mut records = converter.convert_records(records);
        let items = converter.convert_items(items);

        if self.config.replicate_state_treatments {
            let (replicated, gaps) = replicate_state_treatments(records);
            records = replicated;
            errors.extend(gaps);
        }

        let items = dedup_items(items);
        errors.extend(converter.unmapped_errors());

        let bundle = OutputBundle {
            records,
            items,
            errors: errors.drain(),
        };
        info!(
            records = bundle.records.len(),
            items = bundle.items.len(),
            errors = bundle.errors.len(),
            "run complete"
        );
        Ok(bundle)
    }

    /// Column layout from the first document's header row.
    async fn header_map(&self, first: &DocumentDescriptor) -> Result<HeaderMap> {
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            base_delay: self.config.retry_base(),
        };
        let rows = fetch_rows_with_retry(
            self.source.as_ref(),
            &self.limiter,
            policy,
            first,
            RowRange::single(self.config.header_row),
        )
        .await
        .with_context(|| format!("fetching header row from '{}'", first.name))?;
        let Some(header) = rows.into_iter().next() else {
            bail!(
                "'{}' has no header row at row {}",
                first.name,
                self.config.header_row
            );
        };
        HeaderMap::from_header_row(&header, &self.config.columns)
            .with_context(|| format!("building header map from '{}'", first.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemorySource;
    use crate::lookup::sample_tables;
    use crate::model::CUSTOMER_PERSONAL;
    use std::time::Duration;

    fn init_test_logging() {
        let subscriber = tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,taxmatrix=debug")),
            )
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }

    fn cells(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn header() -> Vec<String> {
        cells(&[
            "Current ID",
            "Admin",
            "Business Use",
            "Business tax_cat",
            "Business percent_taxable",
            "Personal Use",
            "Personal tax_cat",
            "Personal percent_taxable",
            "L1 Description",
            "L2 Description",
        ])
    }

    /// A tab with three preamble rows, the header, then `data`.
    fn tab(data: Vec<Vec<String>>) -> Vec<Vec<String>> {
        let mut rows = vec![cells(&["Research"]), cells(&["", ""]), cells(&["notes"]), header()];
        rows.extend(data);
        rows
    }

    fn identical(id: &str, desc: &str) -> Vec<String> {
        cells(&[
            id,
            "Tag Level",
            "Taxable",
            "General Sales Tax",
            "100%",
            "Taxable",
            "General Sales Tax",
            "100%",
            desc,
            "",
        ])
    }

    fn config() -> Config {
        Config {
            rate_limit_delay: 0.0,
            retry_base_delay: 0.001,
            max_concurrent_requests: 2,
            ..Config::default()
        }
    }

    fn orchestrator(source: Arc<MemorySource>, config: Config) -> Orchestrator {
        Orchestrator::new(config, source, sample_tables())
    }

    #[tokio::test]
    async fn end_to_end_converts_and_dedups() {
        init_test_logging();
        let source = Arc::new(MemorySource::new());
        source.add_document(
            "il",
            "Illinois Sales Tax Research",
            tab(vec![
                identical("1.1.1.4.3.0.0.0", "SaaS"),
                identical("1.1.2.1.1.0.0.0", "Programming"),
            ]),
        );
        source.add_document(
            "co",
            "Colorado Sales Tax Research",
            tab(vec![identical("1.1.1.4.3.0.0.0", "SaaS again")]),
        );

        let bundle = orchestrator(Arc::clone(&source), config()).run().await.unwrap();

        // IL: 2 rows x 3 state tax types. CO: 1 row x 3.
        assert_eq!(bundle.records.len(), 9);
        assert!(bundle.records.iter().all(|r| r.customer == CUSTOMER_PERSONAL));
        assert!(bundle.records.iter().any(|r| r.item == "022"));
        assert!(bundle.records.iter().any(|r| r.item == "005"));
        assert_eq!(bundle.items.len(), 2);
        assert_eq!(bundle.items[0].item, "022");
        assert_eq!(bundle.items[0].description, "SaaS");
        assert!(bundle.is_clean(), "{:?}", bundle.errors);
    }

    #[tokio::test]
    async fn unmapped_identifier_reported_once_across_rows() {
        let source = Arc::new(MemorySource::new());
        let rows = (0..10).map(|_| identical("8.8.8.0", "Unknown")).collect();
        source.add_document("il", "Illinois Sales Tax Research", tab(rows));

        let bundle = orchestrator(source, config()).run().await.unwrap();
        assert!(bundle.records.is_empty());
        assert!(bundle.items.is_empty());
        let unmapped: Vec<_> = bundle
            .errors
            .iter()
            .filter(|e| e.kind() == "unmapped_identifier")
            .collect();
        assert_eq!(unmapped.len(), 1);
        assert!(bundle.errors.iter().any(|e| matches!(
            e,
            ProcessingError::UnmappedIdentifierSummary { count: 1, identifiers } if identifiers[0] == "8.8.8.0"
        )));
    }

    #[tokio::test]
    async fn failing_document_does_not_affect_others() {
        init_test_logging();
        let healthy = || {
            let source = Arc::new(MemorySource::new());
            source.add_document("il", "Illinois Sales Tax Research", tab(vec![identical("1.1.1.4.3", "a")]));
            source.add_document("co", "Colorado Sales Tax Research", tab(vec![identical("1.1.2.1.1", "b")]));
            source
        };
        let baseline = orchestrator(healthy(), config()).run().await.unwrap();

        let source = healthy();
        source.add_document("in", "Indiana Sales Tax Research", tab(vec![identical("1.1.3.2.1", "c")]));
        source.fail_times("in", 100, 403);
        source.add_document("nowhere", "Nowhere Sales Tax Research", tab(vec![]));
        let bundle = orchestrator(source, config()).run().await.unwrap();

        assert_eq!(bundle.records.len(), baseline.records.len());
        let kinds: Vec<&str> = bundle.errors.iter().map(|e| e.kind()).collect();
        assert!(kinds.contains(&"document_fetch"));
        assert!(bundle.errors.iter().any(|e| matches!(
            e,
            ProcessingError::DocumentFetch { document, .. } if document == "Indiana Sales Tax Research"
        )));
        assert!(kinds.contains(&"jurisdiction_unresolved"));
    }

    #[tokio::test]
    async fn panicking_worker_is_contained() {
        let source = Arc::new(MemorySource::new());
        source.add_document("il", "Illinois Sales Tax Research", tab(vec![identical("1.1.1.4.3", "a")]));
        source.add_document("co", "Colorado Sales Tax Research", tab(vec![identical("1.1.2.1.1", "b")]));
        source.panic_on("co");

        let bundle = orchestrator(source, config()).run().await.unwrap();
        assert_eq!(bundle.records.len(), 3);
        assert!(bundle.errors.iter().any(|e| matches!(
            e,
            ProcessingError::WorkerFailed { document, .. } if document == "Colorado Sales Tax Research"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_keeps_partial_results() {
        let source = Arc::new(MemorySource::new());
        source.add_document("il", "Illinois Sales Tax Research", tab(vec![identical("1.1.1.4.3", "a")]));
        source.add_document("co", "Colorado Sales Tax Research", tab(vec![identical("1.1.2.1.1", "b")]));
        source.delay("co", Duration::from_secs(120));
        let cfg = Config {
            run_timeout_secs: Some(60),
            ..config()
        };

        let bundle = orchestrator(source, cfg).run().await.unwrap();
        assert_eq!(bundle.records.len(), 3);
        assert!(bundle.records.iter().all(|r| r.geocode == "US1700000000"));
        assert!(bundle.errors.iter().any(|e| matches!(
            e,
            ProcessingError::Timeout { deadline_secs: 60, pending } if pending == &vec!["Colorado Sales Tax Research".to_string()]
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_bounds_wall_clock() {
        let source = Arc::new(MemorySource::new());
        for (id, name) in [
            ("il", "Illinois Sales Tax Research"),
            ("co", "Colorado Sales Tax Research"),
            ("in", "Indiana Sales Tax Research"),
            ("chi", "Chicago Sales Tax Research"),
        ] {
            source.add_document(id, name, tab(vec![identical("1.1.1.4.3", "a")]));
            source.delay(id, Duration::from_secs(1));
        }
        let start = Instant::now();
        let bundle = orchestrator(source, config()).run().await.unwrap();
        // One header fetch, then two waves of two documents.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4), "{:?}", elapsed);
        assert!(!bundle.records.is_empty());
    }

    #[tokio::test]
    async fn header_failure_is_fatal() {
        let source = Arc::new(MemorySource::new());
        source.add_document("il", "Illinois Sales Tax Research", tab(vec![]));
        source.fail_times("il", 100, 403);
        assert!(orchestrator(source, config()).run().await.is_err());

        let source = Arc::new(MemorySource::new());
        source.add_document("il", "Illinois Sales Tax Research", vec![cells(&["only"])]);
        assert!(orchestrator(source, config()).run().await.is_err());
    }

    #[tokio::test]
    async fn listing_failure_is_fatal_and_empty_listing_is_empty_bundle() {
        let source = Arc::new(MemorySource::new());
        source.fail_listing("drive unavailable");
        assert!(orchestrator(source, config()).run().await.is_err());

        let source = Arc::new(MemorySource::new());
        let bundle = orchestrator(source, config()).run().await.unwrap();
        assert!(bundle.records.is_empty() && bundle.items.is_empty() && bundle.is_clean());
    }

    #[tokio::test]
    async fn replication_fills_city_records_when_enabled() {
        let source = Arc::new(MemorySource::new());
        source.add_document("il", "Illinois Sales Tax Research", tab(vec![identical("1.1.1.4.3", "a")]));
        source.add_document("chi", "Chicago Sales Tax Research", tab(vec![identical("1.1.1.4.3", "a")]));
        let cfg = Config {
            replicate_state_treatments: true,
            ..config()
        };

        let bundle = orchestrator(source, cfg).run().await.unwrap();
        // US17031A0047 resolves directly to 47 only; it inherits 01 and 02 from the state.
        let direct: Vec<&str> = bundle
            .records
            .iter()
            .filter(|r| r.geocode == "US17031A0047")
            .map(|r| r.tax_type.as_str())
            .collect();
        assert_eq!(direct.len(), 3);
        assert!(direct.contains(&"01") && direct.contains(&"02") && direct.contains(&"47"));
        assert!(bundle.is_clean(), "{:?}", bundle.errors);
    }

    #[tokio::test]
    async fn failed_slot_task_is_recorded_against_its_document() {
        let errors = ErrorManifest::new();
        let mut fan_in = FanIn::default();
        fan_in.pending.insert(0, "Illinois Sales Tax Research".into());
        fan_in.pending.insert(1, "Colorado Sales Tax Research".into());

        let mut set: JoinSet<WorkerResult> = JoinSet::new();
        let dies = true;
        let slot = set.spawn(async move {
            if dies {
                panic!("slot died");
            }
            (1, Ok(DocumentOutput::default()))
        });
        fan_in.slots.insert(slot.id(), 1);

        let joined = set.join_next().await.unwrap();
        assert!(joined.is_err());
        fan_in.settle(joined, &errors);

        assert_eq!(fan_in.pending.len(), 1);
        assert!(fan_in.pending.contains_key(&0));
        let errs = errors.drain();
        assert_eq!(errs.len(), 1);
        assert!(matches!(
            &errs[0],
            ProcessingError::WorkerFailed { document, .. } if document == "Colorado Sales Tax Research"
        ));
    }
}
