use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout_at, Instant};

use tracing::{debug, info, warn};

use crate::commit::{ParserIdentity, ResultSink};
use crate::error::PipelineError;
use crate::executor::{execute_batch, BatchOutcome, ExecutorOptions, FailurePolicy, SnippetFailure};
use crate::fetch::SnippetSource;
use crate::parser::{Extractor, Tally};
use crate::registry::{self, BaseConfig, Registry, RuntimeConfig};
use crate::selection::{build_filter, Clock, SelectionOverrides};

/// Lifecycle of one invocation. `Failed` is reachable from every state but `Idle`.
/// Extraction and commit interleave per snippet inside `Executing`; `Committing`
/// is the settle step once no worker is left, before the run is judged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RunState {
    #[default]
    Idle,
    ConfigResolved,
    Selected,
    Executing,
    Committing,
    Done,
    Failed,
}

#[derive(Default)]
struct StateTracker {
    state: RunState,
}

impl StateTracker {
    fn advance(&mut self, next: RunState) {
        debug!("run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn fail(&mut self, reason: &dyn std::fmt::Display) {
        warn!("run failed in state {:?}: {}", self.state, reason);
        self.state = RunState::Failed;
    }
}

pub struct RunRequest {
    pub base: BaseConfig,
    pub overrides: SelectionOverrides,
    pub policy: FailurePolicy,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub extract_timeout: Duration,
    pub run_timeout: Duration,
    pub progress: bool,
}

/// Outcome of a run that got past selection.
#[derive(Debug)]
pub struct RunReport {
    pub parser: String,
    pub key: String,
    pub state: RunState,
    pub selected: usize,
    pub attempted: usize,
    pub committed: usize,
    pub failures: Vec<SnippetFailure>,
    pub skipped: Vec<String>,
    pub aborted: bool,
    pub timed_out: bool,
    pub tally: Tally,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(config: &RuntimeConfig, selected: usize) -> Self {
        Self {
            parser: config.name.clone(),
            key: config.key.clone(),
            state: RunState::Selected,
            selected,
            attempted: 0,
            committed: 0,
            failures: Vec::new(),
            skipped: Vec::new(),
            aborted: false,
            timed_out: false,
            tally: Tally::default(),
            elapsed: Duration::ZERO,
        }
    }

    fn absorb(&mut self, batch: BatchOutcome) {
        self.attempted = batch.attempted;
        self.committed = batch.committed.len();
        self.failures = batch.failures;
        self.skipped = batch.skipped;
        self.aborted = batch.aborted;
        self.timed_out = batch.timed_out;
        self.tally = batch.tally;
    }

    pub fn print(&self) {
        println!(
            "{} [{}]: {} selected, {} attempted, {} committed, {} failed, {} skipped",
            self.parser,
            self.key,
            self.selected,
            self.attempted,
            self.committed,
            self.failures.len(),
            self.skipped.len()
        );
        if !self.tally.is_empty() {
            println!("  tally: {}", self.tally);
        }
        for f in &self.failures {
            println!("  {} ({:?}): {}", f.snippet_id, f.stage, f.reason);
        }
        if self.aborted {
            println!("  aborted after first extraction failure");
        }
        if self.timed_out {
            println!("  cancelled at the run deadline");
        }
    }
}

/// Drives one parser over one selection: resolve, select, extract, commit.
pub struct Pipeline {
    registry: Arc<Registry>,
    source: Arc<dyn SnippetSource>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        registry: Arc<Registry>,
        source: Arc<dyn SnippetSource>,
        sink: Arc<dyn ResultSink>,
        clock: Arc<dyn Clock>,
        options: PipelineOptions,
    ) -> Self {
        Self {
            registry,
            source,
            sink,
            clock,
            options,
        }
    }

    /// One invocation under the run deadline. A deadline hit during selection
    /// is fatal; one hit while executing cancels the workers still running and
    /// yields a `Failed` report with everything committed up to that point.
    pub async fn run(
        &self,
        request: RunRequest,
        extractor: Arc<dyn Extractor>,
    ) -> Result<RunReport, PipelineError> {
        let deadline = Instant::now() + self.options.run_timeout;
        self.drive(request, extractor, deadline).await
    }

    async fn drive(
        &self,
        request: RunRequest,
        extractor: Arc<dyn Extractor>,
        deadline: Instant,
    ) -> Result<RunReport, PipelineError> {
        let started = Instant::now();
        let mut tracker = StateTracker::default();

        let config = match registry::resolve(request.base, &self.registry) {
            Ok(c) => c,
            Err(e) => {
                tracker.fail(&e);
                return Err(e.into());
            }
        };
        tracker.advance(RunState::ConfigResolved);

        let filter = build_filter(&config, &request.overrides, self.clock.as_ref());
        info!(
            "Selecting snippets for {} ({}) from {} to {} [{} requirements]",
            config.name,
            config.key,
            filter.since,
            filter.until,
            filter.requirements.len()
        );
        let snippets = match timeout_at(deadline, self.source.select(&filter)).await {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => {
                tracker.fail(&e);
                return Err(e.into());
            }
            Err(_) => {
                let e = PipelineError::Deadline(self.options.run_timeout);
                tracker.fail(&e);
                return Err(e);
            }
        };
        tracker.advance(RunState::Selected);

        let mut report = RunReport::new(&config, snippets.len());
        if snippets.is_empty() {
            info!("No snippets to process for {}", config.name);
            tracker.advance(RunState::Done);
            report.state = tracker.state;
            report.elapsed = started.elapsed();
            return Ok(report);
        }

        tracker.advance(RunState::Executing);
        info!(
            "Processing {} snippets with concurrency {}",
            snippets.len(),
            config.concurrency
        );
        let identity = Arc::new(ParserIdentity {
            name: config.name.clone(),
            key: config.key.clone(),
        });
        let options = ExecutorOptions {
            concurrency: config.concurrency,
            policy: request.policy,
            extract_timeout: self.options.extract_timeout,
            deadline: Some(deadline),
            progress: self.options.progress,
        };
        let batch = execute_batch(
            snippets,
            extractor,
            Arc::clone(&self.sink),
            identity,
            &options,
        )
        .await;

        tracker.advance(RunState::Committing);
        report.absorb(batch);
        if report.timed_out {
            tracker.fail(&PipelineError::Deadline(self.options.run_timeout));
        } else if report.aborted {
            tracker.fail(&"extraction failure under abort policy");
        } else {
            tracker.advance(RunState::Done);
        }
        report.state = tracker.state;
        report.elapsed = started.elapsed();
        Ok(report)
    }
}
