use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::StreamExt;
use itertools::Itertools;
use tokio::{sync::mpsc, task, time::sleep};
use url::Url;

use crate::{
    browser_controller::BrowserDriver,
    limits::ConcurrencyLimits,
    types::{CollectResult, HarvestError, SiteCrawl},
    utils::{article_like, is_crawlable, normalize_url, same_site},
};

/// Breadth-first link discovery over a set of seed sites, bounded by the
/// resolved concurrency limits and a per-site page-visit cap.
pub struct Crawler {
    driver: Arc<dyn BrowserDriver>,
    limits: ConcurrencyLimits,
    timeout: Duration,
    page_cap: usize,
}

impl Crawler {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        limits: ConcurrencyLimits,
        timeout: Duration,
        page_cap: usize,
    ) -> Crawler {
        Crawler {
            driver,
            limits,
            timeout,
            page_cap: page_cap.max(1),
        }
    }

    /// Crawl every seed, at most `max_concurrent_sites` at a time.
    /// `buffered` yields results in seed order, so the concatenated output
    /// is reproducible even though crawl timing is not.
    pub async fn collect(
        &self,
        seeds: &[String],
        should_terminate: Arc<AtomicBool>,
    ) -> CollectResult {
        let total = seeds.len();
        let sites: Vec<SiteCrawl> = futures::stream::iter(seeds.iter().enumerate())
            .map(|(i, seed)| self.crawl_site(i + 1, total, seed.clone(), should_terminate.clone()))
            .buffered(self.limits.max_concurrent_sites)
            .collect()
            .await;

        let urls = sites
            .iter()
            .flat_map(|site| site.discovered.iter().cloned())
            .unique()
            .collect::<Vec<String>>();

        CollectResult { sites, urls }
    }

    /// Crawl one site: a coordinator owns the frontier and the discovered
    /// set, a processor fans page fetches out over at most
    /// `max_concurrent_pages_per_site` concurrent pages. A failed page is
    /// recorded and skipped; it never aborts the site.
    async fn crawl_site(
        &self,
        site_num: usize,
        total_sites: usize,
        seed: String,
        should_terminate: Arc<AtomicBool>,
    ) -> SiteCrawl {
        let mut crawl = SiteCrawl {
            seed: seed.clone(),
            discovered: vec![],
            failed_pages: vec![],
            pages_visited: 0,
        };

        let seed_url = match Url::parse(&seed) {
            Ok(u) => u,
            Err(e) => {
                warn!(
                    "[{}/{}] invalid seed url {}: {}",
                    site_num, total_sites, seed, e
                );
                crawl.failed_pages.push((seed, e.to_string()));
                return crawl;
            }
        };
        let seed_norm = match normalize_url(&seed_url, seed_url.as_str()) {
            Some(u) => u.to_string(),
            None => {
                crawl
                    .failed_pages
                    .push((seed, "unsupported url scheme".into()));
                return crawl;
            }
        };

        info!("[{}/{}] crawling {}", site_num, total_sites, seed_norm);

        let buffer = self.page_cap + 10;
        let (scraped_tx, mut scraped_rx) = mpsc::channel::<(String, Vec<String>)>(buffer);
        let (visit_tx, visit_rx) = mpsc::channel::<String>(buffer);
        let (failed_tx, mut failed_rx) = mpsc::channel::<(String, String)>(buffer);

        self.processor(scraped_tx, visit_rx, failed_tx, should_terminate.clone());

        // scheduled holds every url ever put on the frontier; the crawl is
        // done once each of them has produced a scraped or failed message
        let mut scheduled: HashSet<String> = HashSet::new();
        let mut seen_articles: HashSet<String> = HashSet::new();

        scheduled.insert(seed_norm.clone());
        if visit_tx.send(seed_norm).await.is_err() {
            error!(
                "[{}] frontier channel closed before the seed was sent",
                site_num
            );
            return crawl;
        }

        loop {
            if should_terminate.load(Ordering::Relaxed) {
                warn!(
                    "[{}] termination requested, abandoning crawl of {}",
                    site_num, seed
                );
                break;
            }

            while let Ok((page_url, hrefs)) = scraped_rx.try_recv() {
                crawl.pages_visited += 1;
                debug!(
                    "[{}] visited {} ({} anchors)",
                    site_num,
                    page_url,
                    hrefs.len()
                );
                let page = match Url::parse(&page_url) {
                    Ok(u) => u,
                    Err(_) => continue,
                };
                for href in hrefs {
                    let url = match normalize_url(&page, &href) {
                        Some(u) => u,
                        None => continue,
                    };
                    if !same_site(&seed_url, &url) {
                        continue;
                    }
                    let normalized = url.to_string();

                    if article_like(&url) && seen_articles.insert(normalized.clone()) {
                        debug!("[{}] found article {}", site_num, normalized);
                        crawl.discovered.push(normalized.clone());
                    }

                    if is_crawlable(&url)
                        && scheduled.len() < self.page_cap
                        && scheduled.insert(normalized.clone())
                    {
                        if visit_tx.send(normalized.clone()).await.is_err() {
                            error!("[{}] could not enqueue frontier url", site_num);
                            scheduled.remove(&normalized);
                        }
                    }
                }
            }

            while let Ok((url, reason)) = failed_rx.try_recv() {
                crawl.pages_visited += 1;
                warn!("[{}] page {} failed: {}", site_num, url, reason);
                crawl.failed_pages.push((url, reason));
            }

            if crawl.pages_visited == scheduled.len() {
                break;
            }

            sleep(Duration::from_millis(10)).await;
        }

        info!(
            "[{}/{}] done: {} article urls from {} pages ({} failed)",
            site_num,
            total_sites,
            crawl.discovered.len(),
            crawl.pages_visited,
            crawl.failed_pages.len()
        );
        crawl
    }

    fn processor(
        &self,
        scraped_tx: mpsc::Sender<(String, Vec<String>)>,
        visit_rx: mpsc::Receiver<String>,
        failed_tx: mpsc::Sender<(String, String)>,
        should_terminate: Arc<AtomicBool>,
    ) {
        let concurrent_pages = self.limits.max_concurrent_pages_per_site;
        let driver = self.driver.clone();
        let timeout = self.timeout;

        tokio::spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(visit_rx)
                .for_each_concurrent(concurrent_pages, |url| {
                    let driver = driver.clone();
                    let scraped_tx = scraped_tx.clone();
                    let failed_tx = failed_tx.clone();
                    let should_terminate = should_terminate.clone();

                    async move {
                        // queued pages are dropped on cancellation instead
                        // of running out their timeout
                        if should_terminate.load(Ordering::Relaxed) {
                            return;
                        }

                        let u = url.clone();
                        let links =
                            task::spawn_blocking(move || fetch_page_links(driver, &u, timeout))
                                .await;

                        let outcome = match links {
                            Ok(res) => res,
                            Err(e) => {
                                Err(HarvestError::Backend(format!("page task panicked: {}", e)))
                            }
                        };

                        match outcome {
                            Ok(hrefs) => {
                                if let Err(e) = scraped_tx.send((url, hrefs)).await {
                                    debug!("could not report scraped page: {}", e);
                                }
                            }
                            Err(e) => {
                                if let Err(e) = failed_tx.send((url, e.to_string())).await {
                                    debug!("could not report failed page: {}", e);
                                }
                            }
                        }
                    }
                })
                .await;
        });
    }
}

/// One page-fetch unit of work. The page is released on every exit path
/// because the session closes itself when dropped.
fn fetch_page_links(
    driver: Arc<dyn BrowserDriver>,
    url: &str,
    timeout: Duration,
) -> Result<Vec<String>, HarvestError> {
    let mut page = driver.open_page()?;
    page.navigate(url, timeout)?;
    page.link_hrefs()
}
