use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{info, warn};

use crate::commit::{log_commit, CommitRecord, ParserIdentity, ResultSink};
use crate::error::ExtractionError;
use crate::parser::{Extraction, Extractor, Tally};
use crate::snippet::Snippet;

/// Failure reason for snippets still in flight when the run deadline passes.
pub const DEADLINE_REASON: &str = "run deadline exceeded";

/// What to do with the rest of the batch once an extraction fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Stop dispatching new snippets; work already in flight still commits.
    #[default]
    Abort,
    /// Record the failure and keep going.
    Skip,
}

#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub concurrency: usize,
    pub policy: FailurePolicy,
    pub extract_timeout: Duration,
    /// Workers still running at this instant are cancelled.
    pub deadline: Option<Instant>,
    pub progress: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Commit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnippetFailure {
    pub snippet_id: String,
    pub stage: Stage,
    pub reason: String,
}

enum SnippetOutcome {
    Committed { snippet_id: String, tally: Tally },
    Failed { failure: SnippetFailure, tally: Tally },
}

/// Result of one batch. Every dispatched snippet lands in `committed` or `failures`;
/// snippets never dispatched because of an abort or the deadline land in `skipped`.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub committed: Vec<String>,
    pub failures: Vec<SnippetFailure>,
    pub skipped: Vec<String>,
    pub aborted: bool,
    pub timed_out: bool,
    pub tally: Tally,
}

impl BatchOutcome {
    fn record(
        &mut self,
        joined: Result<(Id, SnippetOutcome), JoinError>,
        in_flight: &mut HashMap<Id, String>,
        policy: FailurePolicy,
    ) {
        let outcome = match joined {
            Ok((id, outcome)) => {
                in_flight.remove(&id);
                outcome
            }
            Err(e) => {
                let snippet_id = in_flight.remove(&e.id()).unwrap_or_default();
                let reason = if e.is_cancelled() {
                    DEADLINE_REASON.to_string()
                } else {
                    format!("worker panicked: {}", e)
                };
                SnippetOutcome::Failed {
                    failure: SnippetFailure {
                        snippet_id,
                        stage: Stage::Commit,
                        reason,
                    },
                    tally: Tally::default(),
                }
            }
        };

        match outcome {
            SnippetOutcome::Committed { snippet_id, tally } => {
                self.tally.merge(&tally);
                self.committed.push(snippet_id);
            }
            SnippetOutcome::Failed { failure, tally } => {
                self.tally.merge(&tally);
                warn!(
                    "{} failed at {:?}: {}",
                    failure.snippet_id, failure.stage, failure.reason
                );
                if failure.stage == Stage::Extract
                    && policy == FailurePolicy::Abort
                    && !self.aborted
                {
                    warn!("Aborting batch after extraction failure on {}", failure.snippet_id);
                    self.aborted = true;
                }
                self.failures.push(failure);
            }
        }
    }
}

/// Extracts and commits every snippet with at most `concurrency` in flight.
/// Extraction and commit of one snippet run in the same worker, in that order.
/// Returns only once no worker is left running.
pub async fn execute_batch(
    snippets: Vec<Snippet>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ResultSink>,
    identity: Arc<ParserIdentity>,
    options: &ExecutorOptions,
) -> BatchOutcome {
    let total = snippets.len();
    let limit = options.concurrency.max(1);
    let pb = progress_bar(total, options.progress);

    let mut outcome = BatchOutcome::default();
    let mut queue = snippets.into_iter();
    let mut workers = JoinSet::new();
    let mut in_flight: HashMap<Id, String> = HashMap::new();

    loop {
        while !outcome.aborted && workers.len() < limit {
            let Some(snippet) = queue.next() else { break };
            outcome.attempted += 1;
            let snippet_id = snippet.id.clone();
            let handle = workers.spawn(process_one(
                snippet,
                Arc::clone(&extractor),
                Arc::clone(&sink),
                Arc::clone(&identity),
                options.extract_timeout,
            ));
            in_flight.insert(handle.id(), snippet_id);
        }

        let next = match options.deadline {
            Some(at) => match timeout_at(at, workers.join_next_with_id()).await {
                Ok(next) => next,
                Err(_) => {
                    warn!(
                        "Run deadline reached with {} snippets in flight, cancelling",
                        workers.len()
                    );
                    outcome.timed_out = true;
                    workers.abort_all();
                    while let Some(joined) = workers.join_next_with_id().await {
                        pb.inc(1);
                        outcome.record(joined, &mut in_flight, options.policy);
                    }
                    break;
                }
            },
            None => workers.join_next_with_id().await,
        };
        let Some(joined) = next else { break };
        pb.inc(1);
        outcome.record(joined, &mut in_flight, options.policy);
    }

    outcome.skipped = queue.map(|s| s.id).collect();
    pb.finish_and_clear();
    info!(
        "Batch done: {} attempted, {} committed, {} failed, {} skipped",
        outcome.attempted,
        outcome.committed.len(),
        outcome.failures.len(),
        outcome.skipped.len()
    );
    outcome
}

async fn process_one(
    snippet: Snippet,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn ResultSink>,
    identity: Arc<ParserIdentity>,
    extract_timeout: Duration,
) -> SnippetOutcome {
    let snippet = Arc::new(snippet);
    let snippet_id = snippet.id.clone();

    let extraction = match extract_guarded(Arc::clone(&snippet), extractor, extract_timeout).await {
        Ok(e) => e,
        Err(e) => {
            return SnippetOutcome::Failed {
                failure: SnippetFailure {
                    snippet_id,
                    stage: Stage::Extract,
                    reason: e.to_string(),
                },
                tally: Tally::default(),
            }
        }
    };

    let record = CommitRecord::build(&identity, &snippet, extraction.metadata);
    log_commit(&snippet, &record);

    match sink.commit(&record).await {
        Ok(()) => SnippetOutcome::Committed {
            snippet_id,
            tally: extraction.tally,
        },
        Err(e) => SnippetOutcome::Failed {
            failure: SnippetFailure {
                snippet_id,
                stage: Stage::Commit,
                reason: e.to_string(),
            },
            tally: extraction.tally,
        },
    }
}

/// Runs the extractor on its own task so a panic or a hang stays attributable
/// to this snippet. The task lives in a set of its own and is aborted as soon
/// as this future is dropped or times out.
async fn extract_guarded(
    snippet: Arc<Snippet>,
    extractor: Arc<dyn Extractor>,
    extract_timeout: Duration,
) -> Result<Extraction, ExtractionError> {
    let mut task = JoinSet::new();
    task.spawn(async move { extractor.extract(&snippet).await });
    match timeout(extract_timeout, task.join_next()).await {
        Ok(Some(Ok(result))) => result,
        Ok(Some(Err(join))) => Err(ExtractionError::Aborted(join.to_string())),
        Ok(None) => Err(ExtractionError::Aborted("extraction task vanished".into())),
        Err(_) => Err(ExtractionError::Timeout(extract_timeout)),
    }
}

fn progress_bar(total: usize, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb
}
