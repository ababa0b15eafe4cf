use std::path::PathBuf;
use std::time::Duration;

use crate::listing::SitePreset;

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 20;
pub const DEFAULT_WORKERS: usize = 10;

/// Keywords that mark an anchor as worth following when hunting for contact pages.
pub const CONTACT_KEYWORDS: &[&str] = &[
    "contact",
    "about",
    "team",
    "support",
    "impressum",
    "kontakt",
    "imprint",
    "get-in-touch",
];

#[derive(Debug, Clone)]
pub struct FetchSettings {
    /// Slept after every request, success or not.
    pub delay: Duration,
    pub page_timeout: Duration,
    pub probe_timeout: Duration,
    /// Attempts per page at the resolver/extractor level. The fetcher itself never retries.
    pub attempts: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            delay: Duration::from_millis(500),
            page_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            attempts: 2,
        }
    }
}

impl FetchSettings {
    /// Back-off applied on a 429 before the failure is reported.
    pub fn rate_limit_backoff(&self) -> Duration {
        self.delay * 5
    }
}

/// OpenRouter-compatible chat completion endpoint used as the secondary email strategy.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub attempts: usize,
    pub timeout: Duration,
    /// Markup is truncated to this many bytes before being sent.
    pub max_input_chars: usize,
}

impl LlmSettings {
    pub fn new(api_key: String, model: String) -> Self {
        LlmSettings {
            api_key,
            model,
            base_url: "https://openrouter.ai/api/v1".to_string(),
            attempts: 2,
            timeout: Duration::from_secs(60),
            max_input_chars: 24_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub seed_path: PathBuf,
    /// Previously resolved companies; when set, listing and resolution are skipped.
    pub companies_path: Option<PathBuf>,
    pub out_dir: PathBuf,
    pub grouping: Option<String>,
    pub workers: usize,
    pub force_recrawl: bool,
    pub site: SitePreset,
    pub max_listing_pages: usize,
    pub max_contact_links: usize,
    pub fetch: FetchSettings,
    pub llm: Option<LlmSettings>,
}

impl PipelineConfig {
    pub fn new(seed_path: impl Into<PathBuf>, out_dir: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            seed_path: seed_path.into(),
            companies_path: None,
            out_dir: out_dir.into(),
            grouping: None,
            workers: DEFAULT_WORKERS,
            force_recrawl: false,
            site: SitePreset::EuStartups,
            max_listing_pages: 100,
            max_contact_links: 3,
            fetch: FetchSettings::default(),
            llm: None,
        }
    }

    pub fn worker_count(&self) -> usize {
        clamp_workers(self.workers)
    }
}

pub fn clamp_workers(requested: usize) -> usize {
    requested.clamp(MIN_WORKERS, MAX_WORKERS)
}
