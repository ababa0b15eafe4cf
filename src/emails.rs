use std::collections::BTreeSet;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use log::debug;

use crate::secondary::SecondaryExtractor;

// TLD must be at least two letters; "a@b.c" never matches.
static EMAIL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").expect("email regex")
});

static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Asset extensions that the regex happily mistakes for a TLD (`logo@2x.png`).
const FILE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "svg", "webp", "bmp", "ico", "tif", "tiff", "avif", "heic",
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "zip", "css", "js", "json", "mp4",
    "mp3", "woff", "woff2", "ttf", "eot",
];

/// Placeholder and tracker domains that never belong to a real contact.
const NON_CONTACT_DOMAINS: &[&str] = &[
    "example.com", "example.org", "example.net", "domain.com", "yourdomain.com",
    "your-domain.com", "yourcompany.com", "mysite.com", "test.com", "sentry.io",
    "wixpress.com",
];

/// A page as handed to [`EmailExtractor::scan`].
#[derive(Debug, Clone)]
pub struct CrawledPage {
    pub url: String,
    pub html: String,
}

/// Validity filter applied to every regex or secondary-strategy candidate.
pub fn is_valid_email(candidate: &str) -> bool {
    let email = candidate.trim().to_lowercase();
    let (local, domain) = match email.split_once('@') {
        Some(parts) => parts,
        None => return false,
    };
    if local.is_empty() || domain.contains('@') || !domain.contains('.') {
        return false;
    }

    let tld = domain.rsplit('.').next().unwrap_or("");
    if tld.len() < 2 || !tld.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    if FILE_EXTENSIONS.contains(&tld) {
        return false;
    }

    !NON_CONTACT_DOMAINS
        .iter()
        .any(|d| domain == *d || domain.ends_with(&format!(".{}", d)))
}

/// Runs the regex over raw text/markup and keeps only valid candidates, lowercased.
pub fn extract_from_text(text: &str) -> BTreeSet<String> {
    EMAIL_REGEX
        .find_iter(text)
        .map(|m| m.as_str().trim_matches('.').to_lowercase())
        .filter(|e| is_valid_email(e))
        .collect()
}

/// Addresses from a single `mailto:` href. Query string is dropped; several recipients
/// separated by `,` or `;` are all returned. No validity filter here.
pub fn parse_mailto(href: &str) -> Vec<String> {
    let href = href.trim();
    let rest = match href.get(..7) {
        Some(prefix) if prefix.eq_ignore_ascii_case("mailto:") => &href[7..],
        _ => return Vec::new(),
    };
    let target = rest.split('?').next().unwrap_or("");
    target
        .split(|c| c == ',' || c == ';')
        .map(|part| part.trim().replace("%40", "@").to_lowercase())
        .filter(|part| {
            matches!(part.split_once('@'), Some((l, d)) if !l.is_empty() && !d.is_empty())
        })
        .collect()
}

pub fn extract_mailtos(html: &str) -> BTreeSet<String> {
    let document = Html::parse_document(html);
    document
        .select(&ANCHOR_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .flat_map(parse_mailto)
        .collect()
}

pub struct EmailExtractor {
    secondary: Option<Box<dyn SecondaryExtractor>>,
}

impl EmailExtractor {
    pub fn new() -> Self {
        EmailExtractor { secondary: None }
    }

    pub fn with_secondary(secondary: Box<dyn SecondaryExtractor>) -> Self {
        EmailExtractor { secondary: Some(secondary) }
    }

    /// Regex + mailto over one page; the secondary strategy only runs when both came up empty.
    pub fn scan_page(&self, page: &CrawledPage) -> BTreeSet<String> {
        let mut emails = extract_from_text(&page.html);
        emails.extend(extract_mailtos(&page.html));

        if emails.is_empty() {
            if let Some(secondary) = &self.secondary {
                if let Some(output) = secondary.extract(&page.url, &page.html) {
                    let found = output.into_candidates();
                    debug!("Secondary strategy found {} candidate(s) on {}", found.len(), page.url);
                    emails.extend(found);
                }
            }
        }
        emails
    }

    pub fn scan(&self, pages: &[CrawledPage]) -> BTreeSet<String> {
        pages.iter().flat_map(|p| self.scan_page(p)).collect()
    }
}

impl Default for EmailExtractor {
    fn default() -> Self {
        Self::new()
    }
}
