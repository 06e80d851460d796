use std::{
    ffi::OsStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use headless_chrome::{browser::default_executable, types::PrintToPdfOptions, Browser, LaunchOptions, Tab};
use rand::Rng;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};

use crate::types::HarvestError;

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 Chrome/120 Safari/537.36";

/// Stylesheet applied to the rewritten article document before rendering.
const MINIMAL_CSS: &str = r#"
:root { color-scheme: light dark; }
body { font-family: system-ui, -apple-system, Segoe UI, Roboto, Noto Sans, Ubuntu, Cantarell, 'Helvetica Neue', Arial, sans-serif;
       line-height: 1.6; max-width: 780px; margin: 2.5rem auto; padding: 0 1rem; }
h1 { line-height: 1.25; font-size: 1.8rem; margin: 0 0 1rem; }
article img, article video, article figure, img { max-width: 100%; height: auto; }
pre, code { white-space: pre-wrap; word-break: break-word; }
a { text-decoration: none; }
hr { border: none; border-top: 1px solid #ccc; margin: 2rem 0; }
"#;

/// Locates the main article node, strips the document down to it, and
/// returns the title. An empty string means nothing readable was found.
const EXTRACT_SCRIPT: &str = r#"
(() => {
    const candidates = [
        'article',
        'main',
        '[role="main"]',
        '.entry-content',
        '.post-content',
        '.article-content',
        '.blog-post',
    ];
    let node = null;
    for (const sel of candidates) {
        const el = document.querySelector(sel);
        if (el && el.innerText && el.innerText.trim().length >= 140) {
            node = el;
            break;
        }
    }
    if (!node) {
        return '';
    }
    const h1 = document.querySelector('h1');
    const title = ((h1 && h1.innerText) || document.title || '').trim() || 'untitled';
    const article = node.outerHTML;
    document.head.innerHTML = '<meta charset="utf-8">';
    const style = document.createElement('style');
    style.textContent = __MINIMAL_CSS__;
    document.head.appendChild(style);
    document.title = title;
    document.body.innerHTML = '';
    const heading = document.createElement('h1');
    heading.textContent = title;
    document.body.appendChild(heading);
    const container = document.createElement('div');
    container.innerHTML = article;
    document.body.appendChild(container);
    return title;
})()
"#;

fn scroll_script(step_ms: u32) -> String {
    format!(
        r#" new Promise((resolve) => {{
            var totalHeight = 0;
            var distance = 200;
            var timer = setInterval(() => {{
                var scrollHeight = document.body.scrollHeight;
                window.scrollBy(0, distance);
                totalHeight += distance;

                if (totalHeight >= scrollHeight - window.innerHeight) {{
                    clearInterval(timer);
                    resolve("ok");
                }}
            }}, {});
        }});"#,
        step_ms
    )
}

#[derive(Debug, Clone)]
pub struct Article {
    pub title: String,
}

/// Outcome of running the content extractor against a loaded page. Not
/// finding an article is a normal result, distinct from a backend fault.
#[derive(Debug)]
pub enum Extraction {
    Extracted(Article),
    NotExtractable,
}

/// The rendering backend the pipeline runs against. Production is headless
/// Chrome; tests drive the pipeline through scripted fakes.
pub trait BrowserDriver: Send + Sync {
    fn open_page(&self) -> Result<Box<dyn PageSession>, HarvestError>;

    /// Number of pages currently open. Should come back to zero after a run.
    fn open_pages(&self) -> usize;
}

/// One exclusively-owned page. All methods block; callers run page work in
/// `spawn_blocking`. Dropping the session closes the page.
pub trait PageSession: Send {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), HarvestError>;
    fn link_hrefs(&mut self) -> Result<Vec<String>, HarvestError>;
    fn extract_article(&mut self) -> Result<Extraction, HarvestError>;
    fn render_pdf(&mut self) -> Result<Vec<u8>, HarvestError>;
}

pub struct BrowserController {
    browser: Browser,
    open_pages: Arc<AtomicUsize>,
}

impl BrowserController {
    pub fn new(navigation_timeout: Duration) -> Result<Self> {
        let is_docker = std::env::var("IN_DOCKER").is_ok();
        let ua = format!("--user-agent={}", USER_AGENT);
        let options = LaunchOptions::default_builder()
            .path(Some(default_executable().map_err(anyhow::Error::msg)?))
            .window_size(Some((1280, 2000)))
            .idle_browser_timeout(navigation_timeout.max(Duration::from_secs(45)))
            // warning: only disable the sandbox inside a container
            .sandbox(!is_docker)
            .args(vec![OsStr::new(&ua)])
            .build()
            .context("could not assemble browser launch options")?;
        let browser = Browser::new(options).context("browser launching error")?;

        Ok(BrowserController {
            browser,
            open_pages: Arc::new(AtomicUsize::new(0)),
        })
    }

    fn kill(&self) -> bool {
        let pid = match self.browser.get_process_id() {
            Some(pid) => pid,
            None => return false,
        };
        let s = System::new();
        if let Some(process) = s.process(Pid::from_u32(pid)) {
            debug!("killing browser process with id {}", pid);
            process.kill();
            return true;
        }
        false
    }
}

impl BrowserDriver for BrowserController {
    fn open_page(&self) -> Result<Box<dyn PageSession>, HarvestError> {
        let tab = self
            .browser
            .new_tab()
            .map_err(|e| HarvestError::Backend(format!("could not open tab: {}", e)))?;
        self.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChromePage {
            tab,
            open_pages: self.open_pages.clone(),
        }))
    }

    fn open_pages(&self) -> usize {
        self.open_pages.load(Ordering::SeqCst)
    }
}

impl Drop for BrowserController {
    fn drop(&mut self) {
        debug!("killing browser process...");
        self.kill();
    }
}

struct ChromePage {
    tab: Arc<Tab>,
    open_pages: Arc<AtomicUsize>,
}

fn classify_nav_error(e: anyhow::Error) -> HarvestError {
    let msg = e.to_string();
    if msg.to_ascii_lowercase().contains("timeout") || msg.contains("timed out") {
        HarvestError::NavigationTimeout
    } else {
        HarvestError::NavigationError(msg)
    }
}

impl PageSession for ChromePage {
    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), HarvestError> {
        self.tab.set_default_timeout(timeout);
        self.tab.navigate_to(url).map_err(classify_nav_error)?;
        self.tab
            .wait_until_navigated()
            .map_err(classify_nav_error)?;

        // trigger lazy-loaded listings, then a short politeness pause
        if let Err(e) = self.tab.evaluate(&scroll_script(60), true) {
            debug!("scroll on {} failed: {}", url, e);
        }
        let wait_ms = {
            let mut rng = rand::thread_rng();
            rng.gen_range(500..1500)
        };
        std::thread::sleep(Duration::from_millis(wait_ms));
        Ok(())
    }

    fn link_hrefs(&mut self) -> Result<Vec<String>, HarvestError> {
        let elems = match self.tab.find_elements("a") {
            Ok(elems) => elems,
            Err(e) => {
                debug!("no anchors on {}: {}", self.tab.get_url(), e);
                return Ok(vec![]);
            }
        };

        let mut hrefs = Vec::with_capacity(elems.len());
        for elem in elems {
            let attributes = match elem.get_attributes() {
                Ok(Some(attrs)) => attrs,
                _ => continue,
            };
            // attributes come back as a flat [name, value, ...] list
            for pair in attributes.chunks_exact(2) {
                if pair[0] == "href" {
                    hrefs.push(pair[1].clone());
                    break;
                }
            }
        }
        Ok(hrefs)
    }

    fn extract_article(&mut self) -> Result<Extraction, HarvestError> {
        let css_literal = serde_json::to_string(MINIMAL_CSS)
            .map_err(|e| HarvestError::Backend(e.to_string()))?;
        let script = EXTRACT_SCRIPT.replace("__MINIMAL_CSS__", &css_literal);

        let result = self
            .tab
            .evaluate(&script, false)
            .map_err(|e| HarvestError::Backend(format!("extractor script failed: {}", e)))?;

        let title = result
            .value
            .as_ref()
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        if title.is_empty() {
            Ok(Extraction::NotExtractable)
        } else {
            Ok(Extraction::Extracted(Article { title }))
        }
    }

    fn render_pdf(&mut self) -> Result<Vec<u8>, HarvestError> {
        let options = PrintToPdfOptions {
            print_background: Some(true),
            paper_width: Some(8.27),
            paper_height: Some(11.69),
            margin_top: Some(0.47),
            margin_bottom: Some(0.63),
            margin_left: Some(0.47),
            margin_right: Some(0.47),
            ..Default::default()
        };
        self.tab
            .print_to_pdf(Some(options))
            .map_err(|e| HarvestError::RenderFailure(e.to_string()))
    }
}

impl Drop for ChromePage {
    fn drop(&mut self) {
        if let Err(e) = self.tab.close(true) {
            debug!("could not close tab: {}", e);
        }
        self.open_pages.fetch_sub(1, Ordering::SeqCst);
    }
}
