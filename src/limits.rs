use std::{convert::Infallible, str::FromStr};

/// Hard cap on pages visited within one site, so a misbehaving site with an
/// endless link graph cannot keep a crawl alive forever.
pub const PER_SITE_PAGE_CAP: usize = 100;

/// Named concurrency preset for a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectMode {
    Auto,
    Safe,
    Aggressive,
}

impl FromStr for CollectMode {
    type Err = Infallible;

    // total: anything unrecognized falls back to auto
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(CollectMode::Auto),
            "safe" => Ok(CollectMode::Safe),
            "aggressive" => Ok(CollectMode::Aggressive),
            other => {
                warn!("unknown collect mode {:?}, falling back to auto", other);
                Ok(CollectMode::Auto)
            }
        }
    }
}

/// Explicit per-field overrides for the mode-derived limits. `None` means
/// "use the mode's value"; a non-positive value is ignored with a warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct LimitOverrides {
    pub sites: Option<i64>,
    pub pages_per_site: Option<i64>,
    pub workers: Option<i64>,
}

/// Resolved per-run ceilings. All fields are at least 1 by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub max_concurrent_sites: usize,
    pub max_concurrent_pages_per_site: usize,
    pub max_concurrent_extraction_workers: usize,
}

/// Pure resolver: preset table, then field-by-field overrides.
pub fn resolve_limits(mode: CollectMode, overrides: &LimitOverrides) -> ConcurrencyLimits {
    let (sites, pages, workers) = match mode {
        CollectMode::Safe => (2, 2, 2),
        CollectMode::Auto => (4, 6, 4),
        CollectMode::Aggressive => (8, 10, 8),
    };

    ConcurrencyLimits {
        max_concurrent_sites: apply_override("sites", sites, overrides.sites),
        max_concurrent_pages_per_site: apply_override("pages", pages, overrides.pages_per_site),
        max_concurrent_extraction_workers: apply_override("workers", workers, overrides.workers),
    }
}

fn apply_override(field: &str, base: usize, value: Option<i64>) -> usize {
    match value {
        Some(v) if v >= 1 => v as usize,
        Some(v) => {
            warn!("ignoring non-positive {} override {}", field, v);
            base
        }
        None => base,
    }
}

/// Parse a numeric override from an environment variable. Unset and empty
/// are silently absent; garbage is dropped with a warning.
pub fn override_from_env(var: &str) -> Option<i64> {
    let raw = std::env::var(var).ok()?;
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<i64>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring non-numeric {}={:?}", var, raw);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mode_table() {
        let none = LimitOverrides::default();
        assert_eq!(
            resolve_limits(CollectMode::Safe, &none),
            ConcurrencyLimits {
                max_concurrent_sites: 2,
                max_concurrent_pages_per_site: 2,
                max_concurrent_extraction_workers: 2,
            }
        );
        assert_eq!(
            resolve_limits(CollectMode::Auto, &none).max_concurrent_pages_per_site,
            6
        );
        assert_eq!(
            resolve_limits(CollectMode::Aggressive, &none).max_concurrent_sites,
            8
        );
    }

    #[test]
    fn overrides_replace_single_fields() {
        let overrides = LimitOverrides {
            sites: Some(12),
            pages_per_site: None,
            workers: Some(1),
        };
        let limits = resolve_limits(CollectMode::Auto, &overrides);
        assert_eq!(limits.max_concurrent_sites, 12);
        assert_eq!(limits.max_concurrent_pages_per_site, 6);
        assert_eq!(limits.max_concurrent_extraction_workers, 1);
    }

    #[test]
    fn non_positive_overrides_are_ignored() {
        let overrides = LimitOverrides {
            sites: Some(0),
            pages_per_site: Some(-3),
            workers: None,
        };
        let limits = resolve_limits(CollectMode::Safe, &overrides);
        assert_eq!(limits.max_concurrent_sites, 2);
        assert_eq!(limits.max_concurrent_pages_per_site, 2);
    }

    #[test]
    fn limits_are_always_positive() {
        for mode in [CollectMode::Auto, CollectMode::Safe, CollectMode::Aggressive] {
            let limits = resolve_limits(
                mode,
                &LimitOverrides {
                    sites: Some(-100),
                    pages_per_site: Some(0),
                    workers: Some(-1),
                },
            );
            assert!(limits.max_concurrent_sites >= 1);
            assert!(limits.max_concurrent_pages_per_site >= 1);
            assert!(limits.max_concurrent_extraction_workers >= 1);
        }
    }

    #[test]
    fn unknown_mode_falls_back_to_auto() {
        assert_eq!("AGGRESSIVE".parse::<CollectMode>().unwrap(), CollectMode::Aggressive);
        assert_eq!("turbo".parse::<CollectMode>().unwrap(), CollectMode::Auto);
    }

    #[test]
    fn env_override_parsing() {
        std::env::set_var("CTI_TEST_LIMIT_OK", "7");
        std::env::set_var("CTI_TEST_LIMIT_BAD", "many");
        assert_eq!(override_from_env("CTI_TEST_LIMIT_OK"), Some(7));
        assert_eq!(override_from_env("CTI_TEST_LIMIT_BAD"), None);
        assert_eq!(override_from_env("CTI_TEST_LIMIT_UNSET"), None);
    }
}
