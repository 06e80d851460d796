use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rand::{distributions::Alphanumeric, thread_rng, Rng};
use sha2::{Digest, Sha256};
use url::Url;

/// Path segments that mark navigation/index/utility pages rather than
/// article content.
const DENY_SEGMENTS: &[&str] = &[
    "tag",
    "tags",
    "category",
    "categories",
    "page",
    "search",
    "login",
    "contact",
    "about",
    "about-us",
    "author",
    "feed",
    "wp-content",
    "wp-admin",
    "privacy",
    "terms",
    "careers",
    "products",
    "product",
    "services",
    "service",
    "solutions",
    "solution",
    "archive",
    "archives",
];

const BINARY_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".svg", ".webp", ".ico", ".css", ".js", ".pdf", ".zip",
    ".gz", ".tar", ".mp3", ".mp4", ".webm", ".woff", ".woff2", ".xml", ".rss",
];

const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "youtube.com",
    "github.com",
];

/// Query parameters that carry tracking state and nothing else.
fn is_tracking_param(key: &str) -> bool {
    key.starts_with("utm_") || key == "fbclid" || key == "gclid"
}

/// Resolve an href against the page it was found on and bring it into
/// canonical form: fragment dropped, tracking parameters removed, remaining
/// query pairs sorted, trailing slash stripped from non-root paths.
/// Canonicalization is idempotent: normalizing an already normalized url is
/// a no-op.
pub fn normalize_url(page_url: &Url, href: &str) -> Option<Url> {
    let mut url = match Url::parse(href) {
        Ok(u) => u,
        Err(_) => page_url.join(href).ok()?,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        url.set_query(Some(&query));
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    Some(url)
}

fn host_without_www(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

/// In-scope check relative to a seed site. A bare `www.` prefix difference
/// is treated as the same site; anything else is off-origin.
pub fn same_site(seed: &Url, candidate: &Url) -> bool {
    match (host_without_www(seed), host_without_www(candidate)) {
        (Some(a), Some(b)) => a == b && seed.port() == candidate.port(),
        _ => false,
    }
}

fn last_path_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .filter(|s| !s.is_empty())
        .last()
        .map(|s| s.to_ascii_lowercase())
}

fn has_binary_extension(url: &Url) -> bool {
    match last_path_segment(url) {
        Some(seg) => BINARY_EXTENSIONS.iter().any(|ext| seg.ends_with(ext)),
        None => false,
    }
}

fn has_date_segment(url: &Url) -> bool {
    let Some(mut segments) = url.path_segments() else {
        return false;
    };
    segments.any(|s| s.len() == 4 && s.starts_with("20") && s.chars().all(|c| c.is_ascii_digit()))
}

/// Eligible for the crawl frontier: an http(s) page that could contain more
/// links. Listing pages stay crawlable even when they are not article-like.
pub fn is_crawlable(url: &Url) -> bool {
    (url.scheme() == "http" || url.scheme() == "https") && !has_binary_extension(url)
}

/// Heuristic for "this link points at an article, not navigation".
///
/// A url qualifies when its path has at least one segment, carries no
/// denylisted non-content segment, no binary extension, and either encodes
/// a date (`/2024/05/09/...`) or ends in a slug-looking segment (8+ chars
/// or hyphenated). Known social hosts never qualify.
pub fn article_like(url: &Url) -> bool {
    if let Some(host) = host_without_www(url) {
        if SOCIAL_HOSTS.iter().any(|s| host == *s) {
            return false;
        }
    }

    let segments: Vec<String> = match url.path_segments() {
        Some(segs) => segs
            .filter(|s| !s.is_empty())
            .map(|s| s.to_ascii_lowercase())
            .collect(),
        None => return false,
    };
    if segments.is_empty() {
        return false;
    }

    if segments
        .iter()
        .any(|s| DENY_SEGMENTS.contains(&s.as_str()))
    {
        return false;
    }

    if has_binary_extension(url) {
        return false;
    }

    let last = segments.last().map(String::as_str).unwrap_or("");
    has_date_segment(url) || last.len() >= 8 || last.contains('-')
}

/// Deterministic, filesystem-safe identifier for a url. The readable part
/// comes from the host and path; the sha256 suffix keeps two different urls
/// from colliding after sanitization.
pub fn slug_for_url(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let tag: String = digest[..6].iter().map(|b| format!("{:02x}", b)).collect();

    let without_scheme = match url.find("://") {
        Some(pos) => &url[pos + 3..],
        None => url,
    };
    let mut readable = String::new();
    let mut last_dash = true;
    for c in without_scheme.chars() {
        if c.is_ascii_alphanumeric() {
            readable.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            readable.push('-');
            last_dash = true;
        }
    }
    let readable = readable.trim_matches('-');
    let readable: String = readable.chars().take(80).collect();

    if readable.is_empty() {
        tag
    } else {
        format!("{}-{}", readable.trim_end_matches('-'), tag)
    }
}

/// Read a line-delimited url list. Blank lines and `#` comments are
/// ignored.
pub fn read_url_lines(path: &Path) -> io::Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse_url_lines(&contents))
}

pub fn parse_url_lines(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect()
}

/// Replace `path` with `contents` via a sibling temp file and rename, so
/// readers never observe a half-written url list.
pub fn write_file_atomic(path: &Path, contents: &str) -> io::Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", get_random_string(8)));
    fs::write(&tmp, contents)?;
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            Err(e)
        }
    }
}

pub fn get_random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

pub fn create_random_tmp_folder() -> io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("ctiharvest-{}", get_random_string(11)));
    fs::create_dir(&path)?;
    Ok(path)
}
