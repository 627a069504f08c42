// src/fetch/memory.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{DocumentSource, FetchError, RowRange};
use crate::model::DocumentDescriptor;

#[derive(Debug, Default)]
struct Entry {
    rows: Vec<Vec<String>>,
    fail_remaining: usize,
    fail_status: u16,
    delay: Option<Duration>,
    panic: bool,
    calls: usize,
}

#[derive(Debug, Default)]
struct Inner {
    order: Vec<DocumentDescriptor>,
    entries: HashMap<String, Entry>,
    listing_error: Option<String>,
}

/// Test double: an in-process document source with scripted failures,
/// delays and panics. Only compiled for tests.
#[derive(Debug, Default)]
pub struct MemorySource {
    inner: Mutex<Inner>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; `rows` is the whole tab starting at row 1.
    pub fn add_document(&self, id: &str, name: &str, rows: Vec<Vec<String>>) {
        let mut inner = self.lock();
        inner.order.push(DocumentDescriptor::new(id, name));
        inner.entries.insert(
            id.to_string(),
            Entry {
                rows,
                ..Entry::default()
            },
        );
    }

    /// The next `times` fetches of `id` fail with HTTP `status`.
    pub fn fail_times(&self, id: &str, times: usize, status: u16) {
        if let Some(e) = self.lock().entries.get_mut(id) {
            e.fail_remaining = times;
            e.fail_status = status;
        }
    }

    /// Every fetch of `id` waits `delay` before answering.
    pub fn delay(&self, id: &str, delay: Duration) {
        if let Some(e) = self.lock().entries.get_mut(id) {
            e.delay = Some(delay);
        }
    }

    /// Fetching `id` panics inside the worker.
    pub fn panic_on(&self, id: &str) {
        if let Some(e) = self.lock().entries.get_mut(id) {
            e.panic = true;
        }
    }

    pub fn fail_listing(&self, message: &str) {
        self.lock().listing_error = Some(message.to_string());
    }

    pub fn calls(&self, id: &str) -> usize {
        self.lock().entries.get(id).map_or(0, |e| e.calls)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl DocumentSource for MemorySource {
    async fn list_documents(&self) -> Result<Vec<DocumentDescriptor>, FetchError> {
        let inner = self.lock();
        match &inner.listing_error {
            Some(msg) => Err(FetchError::Transport(msg.clone())),
            None => Ok(inner.order.clone()),
        }
    }

    async fn fetch_rows(
        &self,
        document: &DocumentDescriptor,
        range: RowRange,
    ) -> Result<Vec<Vec<String>>, FetchError> {
        let (delay, outcome) = {
            let mut inner = self.lock();
            let entry = inner
                .entries
                .get_mut(&document.id)
                .ok_or_else(|| FetchError::NotFound(document.id.clone()))?;
            entry.calls += 1;
            if entry.panic {
                panic!("scripted panic for {}", document.id);
            }
            let outcome = if entry.fail_remaining > 0 {
                entry.fail_remaining -= 1;
                Err(FetchError::Http {
                    status: entry.fail_status,
                    body: "scripted failure".into(),
                })
            } else {
                let (lo, hi) = range.bounds(entry.rows.len());
                Ok(entry.rows[lo..hi].to_vec())
            };
            (entry.delay, outcome)
        };
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        outcome
    }
}
