//! Detail page → company website.
//!
//! Strategies are tried in order and the first `Some` wins:
//!
//! 1. the directory's structural "website" field,
//! 2. a LinkedIn company link, turned into a slug and probed as candidate domains,
//! 3. the detail page's own URL segment (or display name), probed the same way.
//!
//! An empty `resolved_website` after all three is an ordinary outcome.

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;
use log::{debug, info, warn};

use crate::fetcher::{fetch_with_retry, PageSource};
use crate::listing::SitePreset;
use crate::records::{ListingRecord, ResolvedCompany};
use crate::urls::{bare_host, normalize_website};

static LINKEDIN_COMPANY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)linkedin\.com/company/([a-z0-9%_\-]+)").expect("linkedin regex")
});

static LINKEDIN_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("a[href*='linkedin.com/company/']").expect("linkedin selector")
});

/// Stripped from slugs before guessing domains. Longer suffixes first.
const CORPORATE_SUFFIXES: &[&str] = &[
    "-limited", "-company", "-corp", "-gmbh", "-inc", "-llc", "-ltd", "-sas", "-srl",
    "-ag", "-ab", "-as", "-aps", "-bv", "-nv", "-oy", "-sa", "-se", "-co",
];

/// TLDs tried for each slug variant, in order.
const GUESS_TLDS: &[&str] = &["com", "io", "co"];

/// Hosts that are never a company's own website.
const NON_COMPANY_HOSTS: &[&str] = &[
    "linkedin.com", "twitter.com", "x.com", "facebook.com", "instagram.com", "youtube.com",
    "crunchbase.com", "angel.co", "wellfound.com", "github.com", "medium.com", "google.com",
    "apple.com",
];

#[derive(Debug, Clone)]
pub struct DetailRules {
    pub name_selectors: &'static [&'static str],
    /// Elements whose href (or text, if no href) holds the website.
    pub website_selectors: &'static [&'static str],
    /// The directory's own host; links back to it are ignored.
    pub directory_host: &'static str,
}

impl SitePreset {
    pub fn detail_rules(&self) -> DetailRules {
        match self {
            SitePreset::EuStartups => DetailRules {
                name_selectors: &["div.td-page-header h1.entry-title span", "div.td-page-header h1.entry-title", "h1.wpbdp-listing-title", "h1"],
                website_selectors: &["div.wpbdp-field-website div.value a[href]", "div.wpbdp-field-website div.value"],
                directory_host: "eu-startups.com",
            },
            SitePreset::Seedtable => DetailRules {
                name_selectors: &["h1"],
                website_selectors: &["a[data-website]", "a[href^='http'][target='_blank']"],
                directory_host: "seedtable.com",
            },
            SitePreset::F6s => DetailRules {
                name_selectors: &["h1"],
                website_selectors: &["a[href^='http']"],
                directory_host: "f6s.com",
            },
        }
    }
}

/// A fetched and parsed detail page, plus what the listing already told us.
pub struct DetailPage {
    pub url: Url,
    pub listing_name: String,
    pub document: Html,
}

/// Uniform strategy signature: `None` means "try the next one".
pub type Strategy = fn(&DetailPage, &DetailRules, &dyn PageSource) -> Option<String>;

pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("website field", website_field),
    ("linkedin slug", linkedin_slug),
    ("page slug", page_slug),
];

fn is_company_host(url: &str, rules: &DetailRules) -> bool {
    let host = match Url::parse(url).ok().as_ref().and_then(bare_host) {
        Some(h) => h,
        None => return false,
    };
    let blocked = |d: &str| host == d || host.ends_with(&format!(".{}", d));
    !blocked(rules.directory_host) && !NON_COMPANY_HOSTS.iter().any(|d| blocked(d))
}

pub fn website_field(page: &DetailPage, rules: &DetailRules, _source: &dyn PageSource) -> Option<String> {
    for raw in rules.website_selectors {
        let selector = match Selector::parse(raw) {
            Ok(s) => s,
            Err(_) => continue,
        };
        for el in page.document.select(&selector) {
            let value = el
                .value()
                .attr("data-website")
                .or_else(|| el.value().attr("href"))
                .map(str::to_string)
                .unwrap_or_else(|| el.text().collect::<String>());
            if let Some(site) = normalize_website(&value) {
                if is_company_host(&site, rules) {
                    return Some(site);
                }
            }
        }
    }
    None
}

pub fn linkedin_slug(page: &DetailPage, _rules: &DetailRules, source: &dyn PageSource) -> Option<String> {
    let slug = page
        .document
        .select(&LINKEDIN_SELECTOR)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| LINKEDIN_COMPANY.captures(href).map(|c| c[1].to_string()))?;
    debug!("LinkedIn slug for {}: {}", page.url, slug);
    probe_candidates(source, &slug)
}

pub fn page_slug(page: &DetailPage, _rules: &DetailRules, source: &dyn PageSource) -> Option<String> {
    let from_url = page
        .url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string));

    let slug = from_url
        .filter(|s| s.chars().any(|c| c.is_ascii_alphabetic()))
        .unwrap_or_else(|| page.listing_name.clone());
    if slug.trim().is_empty() {
        return None;
    }
    probe_candidates(source, &slug)
}

/// Lowercases, collapses anything non-alphanumeric to single dashes, then strips
/// corporate suffixes (repeatedly, so `acme-gmbh-co` becomes `acme`).
pub fn clean_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for c in raw.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let mut slug = slug.trim_matches('-').to_string();

    loop {
        let stripped = CORPORATE_SUFFIXES
            .iter()
            .find_map(|suffix| slug.strip_suffix(suffix).filter(|rest| !rest.is_empty()));
        match stripped {
            Some(rest) => slug = rest.to_string(),
            None => break,
        }
    }
    slug
}

/// Candidate URLs for a slug: every `.com` form (bare, `www.`, de-hyphenated) before
/// `.io`, then `.co`.
pub fn candidate_domains(raw_slug: &str) -> Vec<String> {
    let slug = clean_slug(raw_slug);
    if slug.is_empty() {
        return Vec::new();
    }

    let mut bases = vec![slug.clone()];
    let compact = slug.replace('-', "");
    if compact != slug {
        bases.push(compact);
    }

    let mut candidates = Vec::new();
    for tld in GUESS_TLDS {
        for base in &bases {
            candidates.push(format!("https://{}.{}", base, tld));
            if *tld == "com" {
                candidates.push(format!("https://www.{}.{}", base, tld));
            }
        }
    }
    candidates
}

fn probe_candidates(source: &dyn PageSource, slug: &str) -> Option<String> {
    candidate_domains(slug).into_iter().find(|candidate| {
        let ok = source.probe(candidate);
        debug!("Probe {} -> {}", candidate, ok);
        ok
    })
}

fn page_name(document: &Html, rules: &DetailRules) -> Option<String> {
    rules.name_selectors.iter().find_map(|raw| {
        let selector = Selector::parse(raw).ok()?;
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|n| !n.is_empty())
    })
}

pub struct DetailResolver {
    rules: DetailRules,
    attempts: usize,
}

impl DetailResolver {
    pub fn new(rules: DetailRules, attempts: usize) -> Self {
        DetailResolver { rules, attempts }
    }

    pub fn resolve(&self, source: &dyn PageSource, record: &ListingRecord, grouping: &str) -> ResolvedCompany {
        let mut company = ResolvedCompany {
            display_name: record.display_name.clone(),
            grouping: grouping.to_string(),
            detail_url: record.detail_url.clone(),
            resolved_website: String::new(),
        };

        let url = match Url::parse(&record.detail_url) {
            Ok(u) => u,
            Err(e) => {
                warn!("Invalid detail URL {}: {}", record.detail_url, e);
                return company;
            }
        };

        let fetched = fetch_with_retry(source, &record.detail_url, self.attempts);
        if !fetched.is_success() {
            warn!("Could not fetch detail page {}: {}", record.detail_url, fetched.status.describe());
        }

        let page = DetailPage {
            url,
            listing_name: record.display_name.clone(),
            document: Html::parse_document(&fetched.html),
        };

        if company.display_name.is_empty() {
            if let Some(name) = page_name(&page.document, &self.rules) {
                company.display_name = name;
            }
        }

        for (label, strategy) in STRATEGIES {
            if let Some(site) = strategy(&page, &self.rules, source) {
                info!("Resolved {} via {}: {}", company.display_name, label, site);
                company.resolved_website = site;
                return company;
            }
        }

        info!("No website found for {}", company.display_name);
        company
    }
}
