//! In-memory doubles of the snippet service and of extraction routines.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::commit::{CommitRecord, ResultSink};
use crate::error::{CommitError, ExtractionError, FetchError};
use crate::fetch::SnippetSource;
use crate::parser::{Extraction, Extractor, Tally};
use crate::selection::SelectionFilter;
use crate::snippet::Snippet;

/// Applies selection filters the way the snippet service does and flags
/// snippets on commit: `snippet[parserName] = metadata[parserName]`, or `true`
/// when the routine wrote no boolean flag.
#[derive(Default)]
pub struct MemoryStore {
    snippets: Mutex<Vec<Snippet>>,
    records: Mutex<Vec<CommitRecord>>,
    reject: HashSet<String>,
    select_calls: AtomicUsize,
    commit_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_snippets(snippets: Vec<Snippet>) -> Self {
        Self {
            snippets: Mutex::new(snippets),
            ..Default::default()
        }
    }

    /// Commits for these snippet ids fail with HTTP 500.
    pub fn rejecting(mut self, ids: &[&str]) -> Self {
        self.reject = ids.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn select_calls(&self) -> usize {
        self.select_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<CommitRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn snippet(&self, id: &str) -> Option<Snippet> {
        self.snippets
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }
}

fn document(snippet: &Snippet) -> Map<String, Value> {
    match serde_json::to_value(snippet) {
        Ok(Value::Object(m)) => m,
        _ => Map::new(),
    }
}

#[async_trait]
impl SnippetSource for MemoryStore {
    async fn select(&self, filter: &SelectionFilter) -> Result<Vec<Snippet>, FetchError> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        let selected = {
            let snippets = self.snippets.lock().unwrap();
            snippets
                .iter()
                .filter(|s| {
                    s.saving_time
                        .map_or(true, |t| t >= filter.since && t <= filter.until)
                })
                .filter(|s| filter.requirements.matches(&document(s)))
                .cloned()
                .collect()
        };
        Ok(selected)
    }
}

#[async_trait]
impl ResultSink for MemoryStore {
    async fn commit(&self, record: &CommitRecord) -> Result<(), CommitError> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.contains(&record.html_id) {
            return Err(CommitError::Status {
                status: 500,
                body: "rejected".into(),
            });
        }
        let flag = record
            .metadata
            .get(&record.parser_name)
            .filter(|v| v.is_boolean())
            .cloned()
            .unwrap_or(Value::Bool(true));
        {
            let mut snippets = self.snippets.lock().unwrap();
            if let Some(s) = snippets.iter_mut().find(|s| s.id == record.html_id) {
                s.extra.insert(record.parser_name.clone(), flag);
            }
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Extraction routine with scripted failures that records its own concurrency.
#[derive(Default)]
pub struct ScriptedExtractor {
    fail: HashSet<String>,
    panic: HashSet<String>,
    hang: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

fn id_set(ids: &[&str]) -> HashSet<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

impl ScriptedExtractor {
    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.fail = id_set(ids);
        self
    }

    pub fn panicking(mut self, ids: &[&str]) -> Self {
        self.panic = id_set(ids);
        self
    }

    pub fn hanging(mut self, ids: &[&str]) -> Self {
        self.hang = id_set(ids);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for ScriptedExtractor {
    async fn extract(&self, snippet: &Snippet) -> Result<Extraction, ExtractionError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hang.contains(&snippet.id) {
            std::future::pending::<()>().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.panic.contains(&snippet.id) {
            panic!("scripted panic on {}", snippet.id);
        }
        if self.fail.contains(&snippet.id) {
            return Err(ExtractionError::Failed(format!(
                "scripted failure on {}",
                snippet.id
            )));
        }

        let mut tally = Tally::default();
        tally.bump("extracted");
        let metadata = json!({ "promotedLink": true, "postLink": format!("https://{}.example", snippet.id) });
        Ok(Extraction {
            metadata: metadata.as_object().cloned().unwrap_or_default(),
            tally,
        })
    }
}
