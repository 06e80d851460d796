use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use tokio::{sync::mpsc, task, time::sleep};

use crate::{
    browser_controller::{Article, BrowserDriver, Extraction},
    types::{ExtractionOutcome, ExtractionResult, HarvestError, RunSummary},
    utils::{get_random_string, slug_for_url},
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct ExtractorOptions {
    /// Size of the worker pool, the hard ceiling on in-flight urls.
    #[builder(default = "4")]
    pub workers: usize,
    /// Per-navigation timeout in seconds, not a per-job budget. A job's
    /// wall time is bounded by timeout × (retries + 1) plus render time.
    #[builder(default = "30")]
    pub timeout_secs: u64,
    /// Extra attempts after the first failure of a retryable kind.
    #[builder(default = "1")]
    pub retries: u32,
    /// Base delay between attempts; grows linearly with the attempt number,
    /// capped at three times the base.
    #[builder(default = "Duration::from_secs(2)")]
    pub retry_backoff: Duration,
    pub out_dir: PathBuf,
}

impl ExtractorOptions {
    pub fn default_builder() -> ExtractorOptionsBuilder {
        ExtractorOptionsBuilder::default()
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.workers == 0 {
            return Err(HarvestError::InvalidConfiguration(
                "worker count must be at least 1".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(HarvestError::InvalidConfiguration(
                "navigation timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }
}

/// Bounded worker pool that renders each url to a PDF document.
///
/// Workers pull from a shared queue, so a slow url never blocks the ones
/// behind it from starting on another worker. Results stream to a single
/// aggregator which owns the `RunSummary`.
pub struct Extractor {
    driver: Arc<dyn BrowserDriver>,
    options: ExtractorOptions,
}

impl Extractor {
    pub fn new(driver: Arc<dyn BrowserDriver>, options: ExtractorOptions) -> Extractor {
        Extractor { driver, options }
    }

    pub async fn run(
        &self,
        urls: &[String],
        should_terminate: Arc<AtomicBool>,
    ) -> Result<RunSummary, HarvestError> {
        self.options.validate()?;
        tokio::fs::create_dir_all(&self.options.out_dir).await?;

        let total = urls.len();
        info!(
            "extracting {} urls with {} workers, timeout {}s, {} retries",
            total, self.options.workers, self.options.timeout_secs, self.options.retries
        );

        let (results_tx, mut results_rx) = mpsc::channel::<ExtractionResult>(self.options.workers + 10);

        let aggregator = tokio::spawn(async move {
            let mut summary = RunSummary::default();
            let mut done = 0usize;
            while let Some(result) = results_rx.recv().await {
                done += 1;
                match &result.outcome {
                    ExtractionOutcome::Success { path, bytes, .. } => {
                        info!(
                            "[{}/{}] ok {} -> {} ({} bytes)",
                            done,
                            total,
                            result.url,
                            path.display(),
                            bytes
                        );
                    }
                    ExtractionOutcome::Failure {
                        error,
                        attempts_made,
                    } => {
                        warn!(
                            "[{}/{}] failed {} after {} attempt(s): {}",
                            done, total, result.url, attempts_made, error
                        );
                    }
                }
                summary.record(&result);
            }
            summary
        });

        futures::stream::iter(urls.to_vec())
            .for_each_concurrent(self.options.workers, |url| {
                let results_tx = results_tx.clone();
                let should_terminate = should_terminate.clone();
                async move {
                    let outcome = self.process_url(&url, &should_terminate).await;
                    if let Err(e) = results_tx.send(ExtractionResult { url, outcome }).await {
                        error!("could not report extraction result: {}", e);
                    }
                }
            })
            .await;
        drop(results_tx);

        aggregator
            .await
            .map_err(|e| HarvestError::Backend(format!("summary task failed: {}", e)))
    }

    /// Per-url state machine: navigate, extract, render, write. Transient
    /// failures loop back to navigation with a fresh page until the retry
    /// budget runs out; everything else is terminal on the spot.
    async fn process_url(
        &self,
        url: &str,
        should_terminate: &AtomicBool,
    ) -> ExtractionOutcome {
        let timeout = Duration::from_secs(self.options.timeout_secs);
        let mut attempt = 0u32;

        loop {
            if should_terminate.load(Ordering::Relaxed) {
                return ExtractionOutcome::Failure {
                    error: HarvestError::EarlyTermination,
                    attempts_made: attempt,
                };
            }
            attempt += 1;

            match self.attempt(url, timeout).await {
                Ok((path, bytes)) => {
                    return ExtractionOutcome::Success {
                        path,
                        bytes,
                        attempts_made: attempt,
                    }
                }
                Err(e) if e.is_retryable() && attempt <= self.options.retries => {
                    let delay = self
                        .options
                        .retry_backoff
                        .saturating_mul(attempt)
                        .min(self.options.retry_backoff.saturating_mul(3));
                    debug!("retrying {} in {:?} after: {}", url, delay, e);
                    sleep(delay).await;
                }
                Err(error) => {
                    return ExtractionOutcome::Failure {
                        error,
                        attempts_made: attempt,
                    }
                }
            }
        }
    }

    /// One attempt on one fresh page. A page that failed an earlier attempt
    /// is never reused; its state may be poisoned.
    async fn attempt(&self, url: &str, timeout: Duration) -> Result<(PathBuf, usize), HarvestError> {
        let driver = self.driver.clone();
        let target = url.to_string();

        let (pdf, article) = task::spawn_blocking(
            move || -> Result<(Vec<u8>, Article), HarvestError> {
                let mut page = driver.open_page()?;
                page.navigate(&target, timeout)?;
                let article = match page.extract_article()? {
                    Extraction::Extracted(article) => article,
                    Extraction::NotExtractable => return Err(HarvestError::NoContentExtracted),
                };
                let pdf = page.render_pdf()?;
                Ok((pdf, article))
            },
        )
        .await
        .map_err(|e| HarvestError::Backend(format!("page task panicked: {}", e)))??;

        debug!("extracted {:?} from {}", article.title, url);

        let bytes = pdf.len();
        let path = self
            .options
            .out_dir
            .join(format!("{}.pdf", slug_for_url(url)));
        let tmp = self
            .options
            .out_dir
            .join(format!(".{}.tmp", get_random_string(8)));
        tokio::fs::write(&tmp, &pdf).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok((path, bytes))
    }
}
