use std::collections::HashSet;
use scraper::{ElementRef, Html, Selector};
use url::Url;
use log::{error, info, warn};

use crate::fetcher::{fetch_with_retry, PageSource};
use crate::records::ListingRecord;
use crate::urls::absolutize;

/// Consecutive pages that still paginate but yield no records before we give up.
pub const MAX_EMPTY_PAGES: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pagination {
    /// Follow the href of the first element matching this selector.
    NextLink(&'static str),
    /// Increment a numeric query parameter while pages keep yielding items.
    PageParam(&'static str),
}

#[derive(Debug, Clone)]
pub struct ListingRules {
    pub item: &'static str,
    pub name: &'static str,
    pub link: &'static str,
    pub pagination: Pagination,
    /// Text that marks a listing page as past the end of the results.
    pub no_results_marker: Option<&'static str>,
}

/// Directory sites we know the markup of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SitePreset {
    EuStartups,
    Seedtable,
    F6s,
}

impl SitePreset {
    pub fn listing_rules(&self) -> ListingRules {
        match self {
            SitePreset::EuStartups => ListingRules {
                item: "div.wpbdp-listing-excerpt",
                name: "div.listing-title a",
                link: "div.listing-title a",
                pagination: Pagination::NextLink("span.next a"),
                no_results_marker: None,
            },
            SitePreset::Seedtable => ListingRules {
                item: "div.border-gray-300.border.rounded-lg",
                name: "h3",
                link: "a[href*='/startups/']",
                pagination: Pagination::NextLink("a[rel='next']"),
                no_results_marker: None,
            },
            SitePreset::F6s => ListingRules {
                item: "div.result-item, div.startup-item",
                name: "h3",
                link: "a.viewProfileLink, a[href*='profile']",
                pagination: Pagination::PageParam("page"),
                no_results_marker: Some("No companies found"),
            },
        }
    }
}

/// One listing page worth of output.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub records: Vec<ListingRecord>,
    pub next_page_url: Option<String>,
}

fn parse_selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(s) => Some(s),
        Err(e) => {
            error!("Invalid selector '{}': {:?}", raw, e);
            None
        }
    }
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn with_page_param(url: &Url, name: &str, page: u32) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != name)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut next = url.clone();
    next.set_query(None);
    {
        let mut pairs = next.query_pairs_mut();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(name, &page.to_string());
    }
    next
}

fn current_page_number(url: &Url, name: &str) -> u32 {
    url.query_pairs()
        .find(|(k, _)| k == name)
        .and_then(|(_, v)| v.parse().ok())
        .unwrap_or(1)
}

/// Pulls `(name, detail link)` out of every item container and works out the next page.
///
/// `next_page_url` is `None` when there is no next-page affordance, when no item
/// containers exist at all, or when the page carries the no-results marker.
pub fn extract_listing(html: &str, base_url: &Url, rules: &ListingRules) -> ListingPage {
    if let Some(marker) = rules.no_results_marker {
        if html.contains(marker) {
            return ListingPage::default();
        }
    }

    let (item_sel, name_sel, link_sel) = match (
        parse_selector(rules.item),
        parse_selector(rules.name),
        parse_selector(rules.link),
    ) {
        (Some(i), Some(n), Some(l)) => (i, n, l),
        _ => return ListingPage::default(),
    };

    let document = Html::parse_document(html);
    let mut records = Vec::new();
    let mut containers = 0;

    for item in document.select(&item_sel) {
        containers += 1;

        let name = match item.select(&name_sel).next().map(|el| element_text(&el)) {
            Some(n) if !n.is_empty() => n,
            _ => continue,
        };
        let detail_url = match item
            .select(&link_sel)
            .filter_map(|el| el.value().attr("href"))
            .find_map(|href| absolutize(base_url, href))
        {
            Some(u) => u.to_string(),
            None => continue,
        };

        records.push(ListingRecord { display_name: name, detail_url });
    }

    if containers == 0 {
        return ListingPage { records, next_page_url: None };
    }

    let next_page_url = match &rules.pagination {
        Pagination::NextLink(raw) => parse_selector(raw).and_then(|sel| {
            document
                .select(&sel)
                .filter_map(|el| el.value().attr("href"))
                .find_map(|href| absolutize(base_url, href))
                .map(|u| u.to_string())
        }),
        Pagination::PageParam(name) => {
            if records.is_empty() {
                None
            } else {
                current_page_number(base_url, name)
                    .checked_add(1)
                    .map(|next| with_page_param(base_url, name, next).to_string())
            }
        }
    };

    ListingPage { records, next_page_url }
}

#[derive(Debug, Default)]
pub struct ListingCrawl {
    pub records: Vec<ListingRecord>,
    pub pages_fetched: usize,
}

/// Walks a paginated listing from `start_url` until pagination ends.
///
/// Stops on: no next page, fetch failure, a next URL already visited, `MAX_EMPTY_PAGES`
/// consecutive empty pages, or `max_pages`. Records are deduplicated by `detail_url`.
pub fn crawl_listing(
    source: &dyn PageSource,
    start_url: &str,
    rules: &ListingRules,
    max_pages: usize,
    attempts: usize,
) -> ListingCrawl {
    let mut crawl = ListingCrawl::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut seen_details: HashSet<String> = HashSet::new();
    let mut current = Url::parse(start_url)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| start_url.to_string());
    let mut empty_streak = 0;

    while crawl.pages_fetched < max_pages {
        visited.insert(current.clone());
        info!("Fetching page {}: {}", crawl.pages_fetched + 1, current);

        let fetched = fetch_with_retry(source, &current, attempts);
        crawl.pages_fetched += 1;
        if !fetched.is_success() {
            warn!("Failed to fetch page {} ({}). Stopping.", crawl.pages_fetched, fetched.status.describe());
            break;
        }

        let base = match Url::parse(&current) {
            Ok(u) => u,
            Err(e) => {
                error!("Invalid listing URL {}: {}", current, e);
                break;
            }
        };

        let page = extract_listing(&fetched.html, &base, rules);
        if page.records.is_empty() {
            empty_streak += 1;
        } else {
            empty_streak = 0;
        }
        for record in page.records {
            if seen_details.insert(record.detail_url.clone()) {
                crawl.records.push(record);
            }
        }

        if empty_streak >= MAX_EMPTY_PAGES {
            info!("{} consecutive empty pages. Stopping.", empty_streak);
            break;
        }

        match page.next_page_url {
            None => {
                info!("No more pages available");
                break;
            }
            Some(next) if visited.contains(&next) => {
                info!("Next page {} already visited. Stopping.", next);
                break;
            }
            Some(next) => current = next,
        }
    }

    info!("Extracted {} company links from {} pages", crawl.records.len(), crawl.pages_fetched);
    crawl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::Fetched;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct Pages {
        pages: HashMap<String, String>,
        fetched: RefCell<Vec<String>>,
    }

    impl Pages {
        fn new(pages: &[(&str, String)]) -> Self {
            Pages {
                pages: pages.iter().map(|(u, h)| (u.to_string(), h.clone())).collect(),
                fetched: RefCell::new(Vec::new()),
            }
        }
    }

    impl PageSource for Pages {
        fn fetch(&self, url: &str) -> Fetched {
            self.fetched.borrow_mut().push(url.to_string());
            match self.pages.get(url) {
                Some(html) => Fetched::ok(html.clone()),
                None => Fetched::failed(crate::fetcher::FetchStatus::Http(404)),
            }
        }

        fn probe(&self, _url: &str) -> bool {
            false
        }
    }

    fn eu_page(items: &[(&str, &str)], next: Option<&str>) -> String {
        let mut html = String::from("<html><body>");
        for (name, href) in items {
            html.push_str(&format!(
                r#"<div class="wpbdp-listing-excerpt"><div class="listing-title"><a href="{}">{}</a></div></div>"#,
                href, name
            ));
        }
        if let Some(n) = next {
            html.push_str(&format!(r#"<span class="next"><a href="{}">Next</a></span>"#, n));
        }
        html.push_str("</body></html>");
        html
    }

    #[test]
    fn extracts_records_and_resolves_next_link() {
        let rules = SitePreset::EuStartups.listing_rules();
        let base = Url::parse("https://www.eu-startups.com/directory/wpbdp_category/germany/").unwrap();
        let html = eu_page(
            &[("Acme GmbH", "/directory/acme-gmbh/"), ("Beta", "https://www.eu-startups.com/directory/beta/")],
            Some("page/2/"),
        );

        let page = extract_listing(&html, &base, &rules);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].display_name, "Acme GmbH");
        assert_eq!(page.records[0].detail_url, "https://www.eu-startups.com/directory/acme-gmbh/");
        assert_eq!(
            page.next_page_url.as_deref(),
            Some("https://www.eu-startups.com/directory/wpbdp_category/germany/page/2/")
        );
    }

    #[test]
    fn items_missing_name_or_link_are_skipped() {
        let rules = SitePreset::EuStartups.listing_rules();
        let base = Url::parse("https://www.eu-startups.com/").unwrap();
        let html = r#"
            <div class="wpbdp-listing-excerpt"><div class="listing-title"><a>No link</a></div></div>
            <div class="wpbdp-listing-excerpt"><div class="listing-title"><a href="/x/"> </a></div></div>
            <div class="wpbdp-listing-excerpt"><div class="listing-title"><a href="/ok/">Ok</a></div></div>
        "#;
        let page = extract_listing(html, &base, &rules);
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].display_name, "Ok");
    }

    #[test]
    fn no_containers_means_no_next_page() {
        let rules = SitePreset::EuStartups.listing_rules();
        let base = Url::parse("https://www.eu-startups.com/").unwrap();
        let html = r#"<span class="next"><a href="/page/2/">Next</a></span>"#;
        let page = extract_listing(html, &base, &rules);
        assert!(page.records.is_empty());
        assert!(page.next_page_url.is_none());
    }

    #[test]
    fn page_param_pagination_and_no_results_marker() {
        let rules = SitePreset::F6s.listing_rules();
        let base = Url::parse("https://www.f6s.com/companies/sweden?sort=new").unwrap();
        let html = r#"<div class="result-item"><h3>Nordic AI</h3><a class="viewProfileLink" href="/nordic-ai">View</a></div>"#;
        let page = extract_listing(html, &base, &rules);
        assert_eq!(page.records[0].detail_url, "https://www.f6s.com/nordic-ai");
        assert_eq!(
            page.next_page_url.as_deref(),
            Some("https://www.f6s.com/companies/sweden?sort=new&page=2")
        );

        let done = extract_listing("<p>No companies found</p>", &base, &rules);
        assert!(done.records.is_empty() && done.next_page_url.is_none());
    }

    #[test]
    fn page_param_at_u32_max_ends_pagination() {
        let rules = SitePreset::F6s.listing_rules();
        let base = Url::parse("https://www.f6s.com/companies/sweden?page=4294967295").unwrap();
        let html = r#"<div class="result-item"><h3>Nordic AI</h3><a class="viewProfileLink" href="/nordic-ai">View</a></div>"#;
        let page = extract_listing(html, &base, &rules);
        assert_eq!(page.records.len(), 1);
        assert!(page.next_page_url.is_none());
    }

    #[test]
    fn crawl_halts_after_exactly_n_pages() {
        let rules = SitePreset::EuStartups.listing_rules();
        let p1 = "https://dir.test/list/";
        let p2 = "https://dir.test/list/page/2/";
        let p3 = "https://dir.test/list/page/3/";
        let source = Pages::new(&[
            (p1, eu_page(&[("A", "/a/"), ("B", "/b/")], Some("/list/page/2/"))),
            (p2, eu_page(&[("C", "/c/"), ("A", "/a/")], Some("../3/"))),
            (p3, eu_page(&[("D", "/d/")], None)),
        ]);

        let crawl = crawl_listing(&source, p1, &rules, 100, 1);
        assert_eq!(crawl.pages_fetched, 3);
        assert_eq!(*source.fetched.borrow(), vec![p1.to_string(), p2.to_string(), p3.to_string()]);
        let names: Vec<&str> = crawl.records.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn crawl_stops_on_cycle() {
        let rules = SitePreset::EuStartups.listing_rules();
        let p1 = "https://dir.test/list/";
        let p2 = "https://dir.test/list/page/2/";
        let source = Pages::new(&[
            (p1, eu_page(&[("A", "/a/")], Some("/list/page/2/"))),
            (p2, eu_page(&[("B", "/b/")], Some("/list/"))),
        ]);
        let crawl = crawl_listing(&source, p1, &rules, 100, 1);
        assert_eq!(crawl.pages_fetched, 2);
        assert_eq!(crawl.records.len(), 2);
    }

    #[test]
    fn crawl_gives_up_after_three_empty_pages() {
        let rules = SitePreset::EuStartups.listing_rules();
        // containers present but every item is missing its link
        let empty = |next: &str| {
            format!(
                r#"<div class="wpbdp-listing-excerpt"><div class="listing-title">x</div></div><span class="next"><a href="{}">n</a></span>"#,
                next
            )
        };
        let source = Pages::new(&[
            ("https://dir.test/1", eu_page(&[("A", "/a/")], Some("/2"))),
            ("https://dir.test/2", empty("/3")),
            ("https://dir.test/3", empty("/4")),
            ("https://dir.test/4", empty("/5")),
            ("https://dir.test/5", eu_page(&[("Z", "/z/")], None)),
        ]);
        let crawl = crawl_listing(&source, "https://dir.test/1", &rules, 100, 1);
        assert_eq!(crawl.pages_fetched, 4);
        assert_eq!(crawl.records.len(), 1);
    }
}
