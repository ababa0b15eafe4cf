use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::StatusCode;
use log::{debug, warn};

use crate::config::FetchSettings;
use crate::delay_manager;
use crate::error::Result;

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchStatus {
    Ok,
    /// Non-2xx response other than 429.
    Http(u16),
    RateLimited,
    Network(String),
}

impl FetchStatus {
    pub fn describe(&self) -> String {
        match self {
            FetchStatus::Ok => "ok".to_string(),
            FetchStatus::Http(code) => format!("HTTP {}", code),
            FetchStatus::RateLimited => "rate limited (429)".to_string(),
            FetchStatus::Network(e) => e.clone(),
        }
    }
}

/// Result of a single GET. `html` is empty unless the request succeeded.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub html: String,
    pub status: FetchStatus,
}

impl Fetched {
    pub fn ok(html: impl Into<String>) -> Self {
        Fetched { html: html.into(), status: FetchStatus::Ok }
    }

    pub fn failed(status: FetchStatus) -> Self {
        Fetched { html: String::new(), status }
    }

    pub fn is_success(&self) -> bool {
        self.status == FetchStatus::Ok
    }
}

/// Where pages come from. One instance per worker; implementations are never shared
/// between threads.
pub trait PageSource {
    /// GET the page. Never retries.
    fn fetch(&self, url: &str) -> Fetched;

    /// Cheap existence check (HEAD). True when the server answers with a status below 400.
    fn probe(&self, url: &str) -> bool;
}

/// Retries `fetch` up to `attempts` times while the failure looks transient.
/// A 4xx other than 429 is final.
pub fn fetch_with_retry(source: &dyn PageSource, url: &str, attempts: usize) -> Fetched {
    let attempts = attempts.max(1);
    let mut last = Fetched::failed(FetchStatus::Network("not attempted".to_string()));
    for attempt in 1..=attempts {
        last = source.fetch(url);
        match &last.status {
            FetchStatus::Ok => return last,
            FetchStatus::Http(code) if (400..500).contains(code) => return last,
            status => {
                if attempt < attempts {
                    debug!("Attempt {}/{} for {} failed: {}", attempt, attempts, url, status.describe());
                }
            }
        }
    }
    last
}

/// Blocking HTTP fetcher. Each worker builds its own, so cookies and connection pools are
/// never shared between threads.
pub struct Fetcher {
    client: Client,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(settings: FetchSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );

        let client = Client::builder()
            .timeout(settings.page_timeout)
            .default_headers(headers)
            .cookie_store(true)
            .build()?;

        Ok(Self::from_client(client, settings))
    }

    fn from_client(client: Client, settings: FetchSettings) -> Self {
        Fetcher { client, settings }
    }

    fn random_user_agent(&self) -> &'static str {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        USER_AGENTS[rng.gen_range(0..USER_AGENTS.len())]
    }

    fn visit_page(&self, url: &str) -> std::result::Result<(String, StatusCode), reqwest::Error> {
        let resp = self.client.get(url)
            .header(USER_AGENT, self.random_user_agent())
            .send()?;

        let status = resp.status();
        let text = resp.text()?;
        Ok((text, status))
    }
}

impl PageSource for Fetcher {
    fn fetch(&self, url: &str) -> Fetched {
        let outcome = match self.visit_page(url) {
            Ok((html, status)) if status.is_success() => Fetched::ok(html),
            Ok((_, status)) if status == StatusCode::TOO_MANY_REQUESTS => {
                delay_manager::rate_limit_backoff(self.settings.rate_limit_backoff(), url);
                Fetched::failed(FetchStatus::RateLimited)
            }
            Ok((_, status)) => {
                warn!("Error fetching {}: HTTP {}", url, status);
                Fetched::failed(FetchStatus::Http(status.as_u16()))
            }
            Err(e) => {
                let reason = if e.is_timeout() {
                    format!("timeout: {}", e)
                } else {
                    e.to_string()
                };
                warn!("Error fetching {}: {}", url, reason);
                Fetched::failed(FetchStatus::Network(reason))
            }
        };

        delay_manager::politeness_delay(self.settings.delay);
        outcome
    }

    fn probe(&self, url: &str) -> bool {
        let result = self.client.head(url)
            .header(USER_AGENT, self.random_user_agent())
            .timeout(self.settings.probe_timeout)
            .send();

        match result {
            Ok(resp) => {
                let ok = resp.status().as_u16() < 400;
                debug!("Probe {} -> {}", url, resp.status());
                ok
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                false
            }
        }
    }
}
