use std::{io, path::PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Failure taxonomy of the harvest pipeline. The retry loop in the
/// extraction worker pool only ever replays errors that look transient;
/// everything else surfaces immediately.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("navigation timed out")]
    NavigationTimeout,
    #[error("navigation failed: {0}")]
    NavigationError(String),
    #[error("no article content could be extracted")]
    NoContentExtracted,
    #[error("pdf rendering failed: {0}")]
    RenderFailure(String),
    #[error("write failed: {0}")]
    WriteFailure(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("early termination")]
    EarlyTermination,
    #[error("browser backend: {0}")]
    Backend(String),
}

impl HarvestError {
    /// Whether another attempt with a fresh page could plausibly succeed.
    /// Rendering and filesystem faults are environment problems, not
    /// transient network problems, so they are terminal right away.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HarvestError::NavigationTimeout
                | HarvestError::NavigationError(_)
                | HarvestError::NoContentExtracted
                | HarvestError::Backend(_)
        )
    }

    /// Stable reason tag used in the run summary.
    pub fn reason(&self) -> &'static str {
        match self {
            HarvestError::NavigationTimeout => "NavigationTimeout",
            HarvestError::NavigationError(_) => "NavigationError",
            HarvestError::NoContentExtracted => "NoContentExtracted",
            HarvestError::RenderFailure(_) => "RenderFailure",
            HarvestError::WriteFailure(_) => "WriteFailure",
            HarvestError::InvalidConfiguration(_) => "InvalidConfiguration",
            HarvestError::EarlyTermination => "EarlyTermination",
            HarvestError::Backend(_) => "Backend",
        }
    }
}

/// What one seed site's crawl produced.
#[derive(Debug)]
pub struct SiteCrawl {
    pub seed: String,
    /// Normalized article urls in first-seen order.
    pub discovered: Vec<String>,
    /// Pages that could not be fetched, with the error message.
    pub failed_pages: Vec<(String, String)>,
    pub pages_visited: usize,
}

/// Union of all site crawls, deduplicated by normalized form.
#[derive(Debug)]
pub struct CollectResult {
    pub sites: Vec<SiteCrawl>,
    /// Per-site order preserved, concatenated in seed order, first seen wins.
    pub urls: Vec<String>,
}

#[derive(Debug)]
pub enum ExtractionOutcome {
    Success {
        path: PathBuf,
        bytes: usize,
        attempts_made: u32,
    },
    Failure {
        error: HarvestError,
        attempts_made: u32,
    },
}

#[derive(Debug)]
pub struct ExtractionResult {
    pub url: String,
    pub outcome: ExtractionOutcome,
}

#[derive(Debug, Serialize)]
pub struct ExtractionFailure {
    pub url: String,
    pub reason: &'static str,
    pub detail: String,
    pub attempts_made: u32,
}

/// Aggregated outcome of one extraction run. Appended to by a single
/// aggregator task as results arrive, finalized when the pool drains.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<ExtractionFailure>,
}

impl RunSummary {
    pub fn record(&mut self, result: &ExtractionResult) {
        self.attempted += 1;
        match &result.outcome {
            ExtractionOutcome::Success { .. } => self.succeeded += 1,
            ExtractionOutcome::Failure {
                error,
                attempts_made,
            } => {
                self.failed += 1;
                self.failures.push(ExtractionFailure {
                    url: result.url.clone(),
                    reason: error.reason(),
                    detail: error.to_string(),
                    attempts_made: *attempts_made,
                });
            }
        }
    }
}
