use std::collections::{BTreeSet, HashSet, VecDeque};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use url::Url;
use log::{info, warn};

use crate::config::CONTACT_KEYWORDS;
use crate::emails::{CrawledPage, EmailExtractor};
use crate::fetcher::{fetch_with_retry, PageSource};
use crate::records::{ContactResult, ScanStatus};
use crate::urls::{absolutize, normalize_website, same_site};

static ANCHOR_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));

// Keyword must start a word: "contactus" and "about-us" match, "steam" and "roundabout" don't.
static CONTACT_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = CONTACT_KEYWORDS.iter().map(|k| regex::escape(k)).collect();
    Regex::new(&format!(r"(?i)\b(?:{})", alternatives.join("|"))).expect("contact keyword regex")
});

/// Scans one company website: the home page plus at most `max_links` same-site pages whose
/// anchor text or href mentions a contact keyword.
pub struct ContactScanner {
    extractor: EmailExtractor,
    max_links: usize,
    attempts: usize,
}

impl ContactScanner {
    pub fn new(extractor: EmailExtractor, max_links: usize, attempts: usize) -> Self {
        ContactScanner { extractor, max_links, attempts }
    }

    pub fn scan_site(&self, source: &dyn PageSource, website: &str) -> ContactResult {
        let start = match normalize_website(website).and_then(|s| Url::parse(&s).ok()) {
            Some(u) => u,
            None => return ContactResult::failed(website, "invalid website URL"),
        };

        // Per-company pass; independent of the cross-run resume set.
        let mut visited: HashSet<String> = HashSet::new();
        let mut emails: BTreeSet<String> = BTreeSet::new();
        let mut pages_scanned = 0;

        info!("Visiting: {}", start);
        visited.insert(start.to_string());
        let home = fetch_with_retry(source, start.as_str(), self.attempts);
        if !home.is_success() {
            warn!("Failed to fetch {}: {}", start, home.status.describe());
            return ContactResult::failed(website, home.status.describe());
        }
        pages_scanned += 1;
        emails.extend(self.extractor.scan_page(&CrawledPage { url: start.to_string(), html: home.html.clone() }));

        let mut queue: VecDeque<Url> = discover_contact_links(&home.html, &start)
            .into_iter()
            .filter(|u| !visited.contains(u.as_str()))
            .take(self.max_links)
            .collect();

        while let Some(link) = queue.pop_front() {
            if !visited.insert(link.to_string()) {
                continue;
            }
            info!("Visiting: {}", link);
            let page = fetch_with_retry(source, link.as_str(), self.attempts);
            if !page.is_success() {
                warn!("Failed to fetch {}: {}", link, page.status.describe());
                continue;
            }
            pages_scanned += 1;
            emails.extend(self.extractor.scan_page(&CrawledPage { url: link.to_string(), html: page.html }));
        }

        ContactResult {
            resolved_website: website.to_string(),
            emails,
            pages_scanned,
            status: ScanStatus::Scanned,
        }
    }
}

/// Same-site anchors whose visible text or href has a word starting with a contact
/// keyword, in document order, deduplicated.
pub fn discover_contact_links(html: &str, base_url: &Url) -> Vec<Url> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    for element in document.select(&ANCHOR_SELECTOR) {
        let href = match element.value().attr("href") {
            Some(h) => h,
            None => continue,
        };
        if href.trim_start().to_lowercase().starts_with("mailto:") {
            continue;
        }

        let text = element.text().collect::<String>();
        if !CONTACT_KEYWORD_RE.is_match(&text) && !CONTACT_KEYWORD_RE.is_match(href) {
            continue;
        }

        if let Some(joined) = absolutize(base_url, href) {
            if same_site(&joined, base_url) && joined != *base_url && seen.insert(joined.to_string()) {
                links.push(joined);
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{FetchStatus, Fetched};
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct Site {
        pages: HashMap<String, String>,
        fetched: RefCell<Vec<String>>,
    }

    impl PageSource for Site {
        fn fetch(&self, url: &str) -> Fetched {
            self.fetched.borrow_mut().push(url.to_string());
            match self.pages.get(url) {
                Some(h) => Fetched::ok(h.clone()),
                None => Fetched::failed(FetchStatus::Http(404)),
            }
        }

        fn probe(&self, _url: &str) -> bool {
            false
        }
    }

    fn site(pages: &[(&str, &str)]) -> Site {
        Site {
            pages: pages.iter().map(|(u, h)| (u.to_string(), h.to_string())).collect(),
            fetched: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn discovers_keyword_links_on_same_site_only() {
        let base = Url::parse("https://acme.io/").unwrap();
        let html = r#"
            <a href="/contact">Contact</a>
            <a href="https://www.acme.io/ueber-uns">About us</a>
            <a href="/pricing">Pricing</a>
            <a href="https://twitter.com/acme/about">About on Twitter</a>
            <a href="/contact#form">Contact form</a>
            <a href="mailto:hi@acme.io">Contact</a>
            <a href="/impressum">Legal</a>
        "#;
        let links: Vec<String> = discover_contact_links(html, &base).into_iter().map(|u| u.to_string()).collect();
        assert_eq!(
            links,
            vec!["https://acme.io/contact", "https://www.acme.io/ueber-uns", "https://acme.io/impressum"]
        );
    }

    #[test]
    fn keywords_inside_other_words_are_ignored() {
        let base = Url::parse("https://acme.io/").unwrap();
        let html = r#"
            <a href="/steam-deck">Steam deck</a>
            <a href="/blog/roundabout">Roundabout</a>
            <a href="/contactus">Reach us</a>
            <a href="/x">Our Team</a>
        "#;
        let links: Vec<String> = discover_contact_links(html, &base).into_iter().map(|u| u.to_string()).collect();
        assert_eq!(links, vec!["https://acme.io/contactus", "https://acme.io/x"]);
    }

    #[test]
    fn follows_at_most_three_links_and_merges_emails() {
        let home = r#"
            <p>hello@acme.io</p>
            <a href="/contact">Contact</a><a href="/about">About</a>
            <a href="/team">Team</a><a href="/support">Support</a>
        "#;
        let source = site(&[
            ("https://acme.io/", home),
            ("https://acme.io/contact", r#"<a href="mailto:sales@acme.io?subject=x">Mail</a> hello@acme.io"#),
            ("https://acme.io/about", "<p>nothing here</p>"),
            ("https://acme.io/team", "jobs@acme.io"),
            ("https://acme.io/support", "help@acme.io"),
        ]);

        let scanner = ContactScanner::new(EmailExtractor::new(), 3, 1);
        let result = scanner.scan_site(&source, "acme.io");

        assert_eq!(result.status, ScanStatus::Scanned);
        assert_eq!(result.pages_scanned, 4);
        assert_eq!(
            result.emails.iter().cloned().collect::<Vec<_>>(),
            vec!["hello@acme.io", "jobs@acme.io", "sales@acme.io"]
        );
        assert!(!source.fetched.borrow().contains(&"https://acme.io/support".to_string()));
    }

    #[test]
    fn home_page_failure_is_an_error_marker() {
        let source = site(&[]);
        let scanner = ContactScanner::new(EmailExtractor::new(), 3, 1);
        let result = scanner.scan_site(&source, "https://gone.io");
        assert_eq!(result.status, ScanStatus::Failed("HTTP 404".into()));
        assert_eq!(result.emails_field(), "ERROR: HTTP 404");
    }

    #[test]
    fn invalid_website_is_reported() {
        let scanner = ContactScanner::new(EmailExtractor::new(), 3, 1);
        let result = scanner.scan_site(&site(&[]), "not a url");
        assert!(matches!(result.status, ScanStatus::Failed(_)));
    }
}
