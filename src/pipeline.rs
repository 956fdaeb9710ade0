//! Scrape pipeline: gate → fetch → sanitize → extract.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::fetcher::{FetchError, PageFetcher};
use crate::llm::{ExtractionClient, ExtractionError, ExtractionResult};
use crate::sanitizer;
use crate::tier::{QuotaExceeded, SessionId, TierGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Fetching,
    Sanitizing,
    Extracting,
    Completed,
    /// `None` when the run died without reporting where.
    Failed(Option<Stage>),
}

/// The stage a failed run stopped in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Gate,
    Fetching,
    Sanitizing,
    Extracting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Gate => "gate",
            Stage::Fetching => "fetching",
            Stage::Sanitizing => "sanitizing",
            Stage::Extracting => "extracting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),

    #[error("Fetch error: {0}")]
    Fetch(#[source] FetchError),

    #[error("Sanitizer task failed: {0}")]
    Sanitize(String),

    #[error("AI error: {0}")]
    Extraction(#[source] ExtractionError),

    #[error("Scrape cancelled while {0}")]
    Cancelled(Stage),

    #[error("Scrape task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::QuotaExceeded(_) => Some(Stage::Gate),
            PipelineError::Fetch(_) => Some(Stage::Fetching),
            PipelineError::Sanitize(_) => Some(Stage::Sanitizing),
            PipelineError::Extraction(_) => Some(Stage::Extracting),
            PipelineError::Cancelled(stage) => Some(*stage),
            PipelineError::Aborted(_) => None,
        }
    }
}

/// A validated scrape job.
#[derive(Debug, Clone)]
pub struct ScrapeJob {
    pub session: SessionId,
    pub url: Url,
    pub prompt: String,
    pub license_key: Option<String>,
}

pub struct Pipeline {
    gate: Arc<TierGate>,
    fetcher: Arc<dyn PageFetcher>,
    extractor: ExtractionClient,
}

impl Pipeline {
    pub fn new(gate: Arc<TierGate>, fetcher: Arc<dyn PageFetcher>, extractor: ExtractionClient) -> Self {
        Self {
            gate,
            fetcher,
            extractor,
        }
    }

    pub fn gate(&self) -> &Arc<TierGate> {
        &self.gate
    }

    /// Runs the job on its own task. Cancelling `cancel` drops whatever
    /// stage is in flight.
    pub async fn spawn(
        self: &Arc<Self>,
        job: ScrapeJob,
        cancel: CancellationToken,
    ) -> Result<ExtractionResult, PipelineError> {
        let pipeline = Arc::clone(self);
        let session = job.session;
        let handle = tokio::spawn(async move { pipeline.run(&job, &cancel).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let err = PipelineError::Aborted(e.to_string());
                warn!(session = %session, error = %err, "Scrape task died");
                Err(err)
            }
        }
    }

    pub async fn run(&self, job: &ScrapeJob, cancel: &CancellationToken) -> Result<ExtractionResult, PipelineError> {
        let mut run = Run {
            job,
            state: PipelineState::Received,
            started: Instant::now(),
        };
        run.enter(PipelineState::Received);

        let result = self.stages(&mut run, cancel).await;

        match &result {
            Ok(_) => run.enter(PipelineState::Completed),
            Err(e) => run.fail(e),
        }
        result
    }

    async fn stages(&self, run: &mut Run<'_>, cancel: &CancellationToken) -> Result<ExtractionResult, PipelineError> {
        let job = run.job;

        if let Some(key) = job.license_key.as_deref() {
            self.gate.unlock(job.session, key);
        }
        let admission = self.gate.admit(job.session)?;
        debug!(
            session = %job.session,
            tier = ?admission.tier,
            count = admission.scrape_count,
            fetcher = self.fetcher.name(),
            "Scrape admitted"
        );

        run.enter(PipelineState::Fetching);
        let html = guarded(Stage::Fetching, cancel, self.fetcher.fetch(&job.url))
            .await?
            .map_err(PipelineError::Fetch)?;

        run.enter(PipelineState::Sanitizing);
        let text = guarded(
            Stage::Sanitizing,
            cancel,
            tokio::task::spawn_blocking(move || sanitizer::html_to_text(&html)),
        )
        .await?
        .map_err(|e| PipelineError::Sanitize(e.to_string()))?;
        debug!(chars = text.len(), words = sanitizer::word_count(&text), "Sanitized page");

        run.enter(PipelineState::Extracting);
        guarded(Stage::Extracting, cancel, self.extractor.extract(&text, &job.prompt))
            .await?
            .map_err(PipelineError::Extraction)
    }
}

/// Per-run bookkeeping for state transitions.
struct Run<'a> {
    job: &'a ScrapeJob,
    state: PipelineState,
    started: Instant,
}

impl Run<'_> {
    fn enter(&mut self, state: PipelineState) {
        self.state = state;
        info!(
            session = %self.job.session,
            url = %self.job.url,
            state = ?self.state,
            elapsed = ?self.started.elapsed(),
            "Pipeline state"
        );
    }

    fn fail(&mut self, err: &PipelineError) {
        self.state = PipelineState::Failed(err.stage());
        warn!(
            session = %self.job.session,
            url = %self.job.url,
            state = ?self.state,
            error = %err,
            elapsed = ?self.started.elapsed(),
            "Scrape failed"
        );
    }
}

/// Awaits `fut` unless `cancel` fires first.
async fn guarded<F: Future>(stage: Stage, cancel: &CancellationToken, fut: F) -> Result<F::Output, PipelineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PipelineError::Cancelled(stage)),
        output = fut => Ok(output),
    }
}
