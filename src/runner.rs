use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::{
    browser_controller::{BrowserController, BrowserDriver},
    crawler::Crawler,
    extractor::{Extractor, ExtractorOptions},
    limits::{resolve_limits, CollectMode, LimitOverrides, PER_SITE_PAGE_CAP},
    types::{HarvestError, RunSummary},
    utils,
};

#[derive(Builder, Debug, Clone)]
#[builder(setter(into))]
pub struct RunnerOptions {
    #[builder(default = "CollectMode::Auto")]
    pub mode: CollectMode,
    #[builder(default)]
    pub overrides: LimitOverrides,
    // per-navigation timeout in seconds
    #[builder(default = "30")]
    pub timeout_secs: u64,
    // retries per url during extraction
    #[builder(default = "1")]
    pub retries: u32,
    // pages visited per site before a crawl is cut off
    #[builder(default = "PER_SITE_PAGE_CAP")]
    pub page_visit_cap: usize,
}

impl RunnerOptions {
    pub fn default_builder() -> RunnerOptionsBuilder {
        RunnerOptionsBuilder::default()
    }
}

/// Owns the one browser process for the run and hands it by reference to
/// the collector and the extraction pool. Dropping the runner tears the
/// browser down.
pub struct Runner {
    driver: Arc<dyn BrowserDriver>,
    options: RunnerOptions,
    should_terminate: Arc<AtomicBool>,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> anyhow::Result<Self> {
        if options.timeout_secs == 0 {
            return Err(HarvestError::InvalidConfiguration(
                "navigation timeout must be at least 1 second".into(),
            )
            .into());
        }

        let controller = BrowserController::new(Duration::from_secs(options.timeout_secs))
            .context("could not launch browser")?;

        let should_terminate = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
        signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

        Ok(Runner {
            driver: Arc::new(controller),
            options,
            should_terminate,
        })
    }

    /// Crawl the seed sites and write the collected url list.
    pub async fn run_collect(&self, seed_file: &Path, out_file: &Path) -> anyhow::Result<()> {
        let seeds = utils::read_url_lines(seed_file)
            .with_context(|| format!("could not read seed file {:?}", seed_file))?;
        if seeds.is_empty() {
            warn!("no seed urls in {:?}, nothing to do", seed_file);
            return Ok(());
        }

        let limits = resolve_limits(self.options.mode, &self.options.overrides);
        info!(
            "concurrency: sites={} pages={} mode={:?}",
            limits.max_concurrent_sites, limits.max_concurrent_pages_per_site, self.options.mode
        );
        info!("number of sites to process: {}", seeds.len());

        let crawler = Crawler::new(
            self.driver.clone(),
            limits,
            Duration::from_secs(self.options.timeout_secs),
            self.options.page_visit_cap,
        );
        let result = crawler.collect(&seeds, self.should_terminate.clone()).await;

        for site in &result.sites {
            info!(
                "{}: {} urls, {} pages visited, {} failed pages",
                site.seed,
                site.discovered.len(),
                site.pages_visited,
                site.failed_pages.len()
            );
        }

        if let Some(parent) = out_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("could not create output dir {:?}", parent))?;
            }
        }

        let mut contents = String::new();
        contents.push_str(&format!(
            "# harvested: {}\n",
            chrono::Local::now().to_rfc3339()
        ));
        contents.push_str(&format!("# total: {}\n\n", result.urls.len()));
        for url in &result.urls {
            contents.push_str(url);
            contents.push('\n');
        }
        utils::write_file_atomic(out_file, &contents)
            .with_context(|| format!("could not write url list to {:?}", out_file))?;

        info!("saved {} urls to {:?}", result.urls.len(), out_file);

        if self.should_terminate.load(Ordering::Relaxed) {
            return Err(HarvestError::EarlyTermination.into());
        }
        Ok(())
    }

    /// Render every url in the list to a PDF document and report a summary.
    pub async fn run_extract(&self, url_file: &Path, out_dir: &Path) -> anyhow::Result<RunSummary> {
        let urls = utils::read_url_lines(url_file)
            .with_context(|| format!("could not read url file {:?}", url_file))?;
        if urls.is_empty() {
            warn!("no urls in {:?}, nothing to do", url_file);
            return Ok(RunSummary::default());
        }

        let limits = resolve_limits(self.options.mode, &self.options.overrides);
        let options = ExtractorOptions::default_builder()
            .workers(limits.max_concurrent_extraction_workers)
            .timeout_secs(self.options.timeout_secs)
            .retries(self.options.retries)
            .out_dir(out_dir.to_path_buf())
            .build()
            .context("could not assemble extractor options")?;

        let extractor = Extractor::new(self.driver.clone(), options);
        let summary = extractor
            .run(&urls, self.should_terminate.clone())
            .await
            .context("extraction run failed")?;

        info!(
            "extraction finished: {} attempted, {} succeeded, {} failed",
            summary.attempted, summary.succeeded, summary.failed
        );
        for failure in &summary.failures {
            warn!(
                "failed: {} ({}, {} attempts): {}",
                failure.url, failure.reason, failure.attempts_made, failure.detail
            );
        }

        let summary_path = out_dir.join("summary.json");
        let json = serde_json::to_string_pretty(&summary)?;
        std::fs::write(&summary_path, json)
            .with_context(|| format!("could not write {:?}", summary_path))?;

        if self.should_terminate.load(Ordering::Relaxed) {
            return Err(HarvestError::EarlyTermination.into());
        }
        Ok(summary)
    }
}
