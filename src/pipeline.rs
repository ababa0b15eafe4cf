//! Stage-by-stage orchestration.
//!
//! ```text
//! INIT -> LISTING -> RESOLVING -> EXTRACTING -> MERGING -> DONE
//!   \________\___________\____________\___________\-----> FAILED
//! ```
//!
//! Stages only move forward; `--companies` jumps straight from INIT to EXTRACTING.
//! Each grouping gets its own checkpoint and stage files, and every row is persisted
//! by a [`ResumeStore`] the moment a worker produces it.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use log::{debug, error, info, warn};

use crate::config::{LlmSettings, FetchSettings, PipelineConfig};
use crate::contact::ContactScanner;
use crate::emails::EmailExtractor;
use crate::error::{Result, ScrapeError};
use crate::fetcher::{Fetcher, PageSource};
use crate::input_loader::{self, SeedGrouping};
use crate::layout::{OutputLayout, CONTACTS_SUFFIX, WEBSITES_SUFFIX};
use crate::listing::crawl_listing;
use crate::merge::{merge_tables, stage_files, MergeReport};
use crate::pool::run_pool;
use crate::progress::Progress;
use crate::records::{ContactRow, ListingRecord, ResolvedCompany, ScanStatus};
use crate::resolver::DetailResolver;
use crate::secondary::{KillSwitch, LlmExtractor, SecondaryExtractor};
use crate::store::{self, load_from, KeySet, ResumeStore};
use crate::urls::normalize_website;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Listing,
    Resolving,
    Extracting,
    Merging,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// Forward only; `Failed` from any non-terminal stage; nothing leaves a terminal stage.
    pub fn can_advance_to(self, next: Stage) -> bool {
        !self.is_terminal() && next > self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "INIT",
            Stage::Listing => "LISTING",
            Stage::Resolving => "RESOLVING",
            Stage::Extracting => "EXTRACTING",
            Stage::Merging => "MERGING",
            Stage::Done => "DONE",
            Stage::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Builds the worker-local pieces. Called once per worker thread, never shared.
pub trait WorkerFactory: Sync {
    type Source: PageSource;

    fn page_source(&self) -> Result<Self::Source>;

    /// Secondary email strategy for one worker, if any is configured.
    fn secondary(&self) -> Result<Option<Box<dyn SecondaryExtractor>>>;
}

/// Real HTTP: one [`Fetcher`] per worker, optional LLM extractor sharing one kill switch.
pub struct HttpFactory {
    fetch: FetchSettings,
    llm: Option<LlmSettings>,
    kill_switch: KillSwitch,
}

impl HttpFactory {
    pub fn new(fetch: FetchSettings, llm: Option<LlmSettings>) -> Self {
        HttpFactory { fetch, llm, kill_switch: KillSwitch::new() }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.fetch.clone(), config.llm.clone())
    }
}

impl WorkerFactory for HttpFactory {
    type Source = Fetcher;

    fn page_source(&self) -> Result<Fetcher> {
        Fetcher::new(self.fetch.clone())
    }

    fn secondary(&self) -> Result<Option<Box<dyn SecondaryExtractor>>> {
        match &self.llm {
            Some(settings) => {
                let extractor = LlmExtractor::new(settings.clone(), self.kill_switch.clone())?;
                Ok(Some(Box::new(extractor)))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub groupings: usize,
    pub listed: usize,
    /// Rows written to resolution files in this run.
    pub resolved: usize,
    pub websites_found: usize,
    /// Rows written to contact files in this run.
    pub scanned: usize,
    pub with_emails: usize,
    pub errors: usize,
    pub skipped: usize,
    pub websites_merge: Option<MergeReport>,
    pub contacts_merge: Option<MergeReport>,
}

enum Plan {
    Seeds(Vec<SeedGrouping>),
    Resolved(Vec<GroupWork>),
}

/// What the extraction stage works on for one grouping.
struct GroupWork {
    grouping: String,
    companies: Vec<ResolvedCompany>,
}

pub struct Pipeline<F: WorkerFactory> {
    config: PipelineConfig,
    factory: F,
    layout: OutputLayout,
    stage: Stage,
}

impl Pipeline<HttpFactory> {
    pub fn with_http(config: PipelineConfig) -> Self {
        let factory = HttpFactory::from_config(&config);
        Pipeline::new(config, factory)
    }
}

impl<F: WorkerFactory> Pipeline<F> {
    pub fn new(config: PipelineConfig, factory: F) -> Self {
        let layout = OutputLayout::new(config.out_dir.clone());
        Pipeline { config, factory, layout, stage: Stage::Init }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    fn enter(&mut self, next: Stage) {
        if !self.stage.can_advance_to(next) {
            warn!("Ignoring stage transition {} -> {}", self.stage, next);
            return;
        }
        info!("Stage {} -> {}", self.stage, next);
        self.stage = next;
    }

    /// Runs every stage. Per-row failures end up in the output; only setup failures
    /// (missing input, unknown grouping, unwritable output) return `Err`.
    pub fn run(&mut self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        match self.run_stages(&mut summary) {
            Ok(()) => {
                self.enter(Stage::Done);
                info!(
                    "Run complete: {} groupings, {} listed, {} resolved ({} with website), {} scanned ({} with emails), {} errors",
                    summary.groupings, summary.listed, summary.resolved, summary.websites_found,
                    summary.scanned, summary.with_emails, summary.errors
                );
                Ok(summary)
            }
            Err(e) => {
                error!("Pipeline failed in {}: {}", self.stage, e);
                self.enter(Stage::Failed);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self, summary: &mut RunSummary) -> Result<()> {
        // Inputs are validated before anything is written.
        let plan = match self.config.companies_path.clone() {
            Some(path) => Plan::Resolved(self.companies_from_file(&path)?),
            None => Plan::Seeds(self.select_groupings()?),
        };
        self.layout.ensure_dirs()?;

        let work = match plan {
            Plan::Resolved(work) => work,
            Plan::Seeds(seeds) => {
                self.enter(Stage::Listing);
                let mut listed = Vec::with_capacity(seeds.len());
                for seed in &seeds {
                    let records = self.list_grouping(seed)?;
                    summary.listed += records.len();
                    listed.push((seed.grouping.clone(), records));
                }

                self.enter(Stage::Resolving);
                let mut work = Vec::with_capacity(listed.len());
                for (grouping, records) in listed {
                    let companies = self.resolve_grouping(&grouping, records, summary)?;
                    work.push(GroupWork { grouping, companies });
                }
                work
            }
        };
        summary.groupings = work.len();
        summary.websites_found = work
            .iter()
            .flat_map(|g| &g.companies)
            .filter(|c| !c.resolved_website.trim().is_empty())
            .count();

        self.enter(Stage::Extracting);
        let claimed = self.existing_contact_keys()?;
        for group in &work {
            self.extract_grouping(group, &claimed, summary)?;
        }

        self.enter(Stage::Merging);
        self.merge(summary)?;
        Ok(())
    }

    fn select_groupings(&self) -> Result<Vec<SeedGrouping>> {
        let seeds = input_loader::load_seed(&self.config.seed_path)?;
        match &self.config.grouping {
            None => Ok(seeds),
            Some(wanted) => {
                let selected: Vec<SeedGrouping> = seeds
                    .into_iter()
                    .filter(|s| s.grouping.eq_ignore_ascii_case(wanted.trim()))
                    .collect();
                if selected.is_empty() {
                    return Err(ScrapeError::UnknownGrouping(wanted.clone()));
                }
                Ok(selected)
            }
        }
    }

    fn companies_from_file(&self, path: &std::path::Path) -> Result<Vec<GroupWork>> {
        let companies = input_loader::load_companies(path)?;
        let mut groups: BTreeMap<String, Vec<ResolvedCompany>> = BTreeMap::new();
        for company in companies {
            groups.entry(company.grouping.trim().to_string()).or_default().push(company);
        }

        if let Some(wanted) = &self.config.grouping {
            groups.retain(|g, _| g.eq_ignore_ascii_case(wanted.trim()));
            if groups.is_empty() {
                return Err(ScrapeError::UnknownGrouping(wanted.clone()));
            }
        }
        Ok(groups
            .into_iter()
            .map(|(grouping, companies)| GroupWork { grouping, companies })
            .collect())
    }

    fn list_grouping(&self, seed: &SeedGrouping) -> Result<Vec<ListingRecord>> {
        let checkpoint = self.layout.companies_file(&seed.grouping);
        if !self.config.force_recrawl {
            if let Some(records) = store::read_checkpoint(&checkpoint)? {
                info!(
                    "Loaded {} companies for {} from checkpoint {:?}",
                    records.len(), seed.grouping, checkpoint
                );
                return Ok(records);
            }
        }

        info!("Crawling listing for {}: {}", seed.grouping, seed.link);
        let source = self.factory.page_source()?;
        let rules = self.config.site.listing_rules();
        let crawl = crawl_listing(
            &source,
            &seed.link,
            &rules,
            self.config.max_listing_pages,
            self.config.fetch.attempts,
        );

        if let Some(expected) = seed.expected {
            info!("{}: found {} of {} advertised companies", seed.grouping, crawl.records.len(), expected);
        }
        store::write_checkpoint(&checkpoint, &seed.grouping, &crawl.records)?;
        Ok(crawl.records)
    }

    fn resolve_grouping(
        &self,
        grouping: &str,
        records: Vec<ListingRecord>,
        summary: &mut RunSummary,
    ) -> Result<Vec<ResolvedCompany>> {
        let path = self.layout.websites_file(grouping);
        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url")?;

        let total = records.len();
        let pending: Vec<ListingRecord> = records.into_iter().filter(|r| !store.seen(&r.detail_url)).collect();
        summary.skipped += total - pending.len();
        info!("Resolving {} companies for {} ({} already done)", pending.len(), grouping, total - pending.len());

        let progress = Progress::new(format!("{} websites", grouping), pending.len());
        let resolver = DetailResolver::new(self.config.site.detail_rules(), self.config.fetch.attempts);
        let write_errors = std::sync::atomic::AtomicUsize::new(0);

        run_pool(
            pending,
            self.config.worker_count(),
            |_| self.factory.page_source(),
            |source, record: ListingRecord| {
                let company = resolver.resolve(source, &record, grouping);
                let failed = match store.record(&company.detail_url, &company) {
                    Ok(_) => false,
                    Err(e) => {
                        error!("Failed to write row for {}: {}", company.detail_url, e);
                        write_errors.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        true
                    }
                };
                progress.tick(failed || company.resolved_website.is_empty());
            },
        )?;

        summary.resolved += progress.done() - write_errors.load(std::sync::atomic::Ordering::SeqCst);
        summary.errors += write_errors.into_inner();
        drop(store);

        // The file now holds this run's rows plus everything from earlier runs.
        input_loader::load_companies(&path)
    }

    /// Keys already present in any grouping's contact file.
    fn existing_contact_keys(&self) -> Result<KeySet> {
        let keys = KeySet::new();
        for file in stage_files(&self.layout.contacts_dir(), CONTACTS_SUFFIX)? {
            keys.extend(load_from(&file, "resolved_website")?);
        }
        Ok(keys)
    }

    fn extract_grouping(&self, group: &GroupWork, claimed: &KeySet, summary: &mut RunSummary) -> Result<()> {
        let path = self.layout.contacts_file(&group.grouping);
        let store = ResumeStore::open_with(&path, &ContactRow::HEADERS, "resolved_website", claimed.clone())?;

        let mut queued: HashSet<String> = HashSet::new();
        let mut pending = Vec::new();
        for company in &group.companies {
            let website = match normalize_website(&company.resolved_website) {
                Some(w) => w,
                None => continue,
            };
            if store.seen(&website) {
                summary.skipped += 1;
                continue;
            }
            if queued.insert(website.clone()) {
                let mut company = company.clone();
                company.resolved_website = website;
                pending.push(company);
            }
        }
        info!("Scanning {} websites for {}", pending.len(), group.grouping);

        let progress = Progress::new(format!("{} contacts", group.grouping), pending.len());
        let written = std::sync::atomic::AtomicUsize::new(0);
        let with_emails = std::sync::atomic::AtomicUsize::new(0);
        let errors = std::sync::atomic::AtomicUsize::new(0);
        let (max_links, attempts) = (self.config.max_contact_links, self.config.fetch.attempts);

        run_pool(
            pending,
            self.config.worker_count(),
            |_| {
                let source = self.factory.page_source()?;
                let extractor = match self.factory.secondary()? {
                    Some(secondary) => EmailExtractor::with_secondary(secondary),
                    None => EmailExtractor::new(),
                };
                Ok((source, ContactScanner::new(extractor, max_links, attempts)))
            },
            |(source, scanner), company: ResolvedCompany| {
                use std::sync::atomic::Ordering;

                let result = scanner.scan_site(source, &company.resolved_website);
                let mut failed = matches!(result.status, ScanStatus::Failed(_));
                let row = ContactRow::new(&company, &result);
                match store.record(&company.resolved_website, &row) {
                    Ok(true) => {
                        written.fetch_add(1, Ordering::SeqCst);
                        if !result.emails.is_empty() {
                            with_emails.fetch_add(1, Ordering::SeqCst);
                        }
                        debug!("{} -> {}", company.resolved_website, row.emails);
                    }
                    Ok(false) => debug!("{} already written elsewhere", company.resolved_website),
                    Err(e) => {
                        error!("Failed to write row for {}: {}", company.resolved_website, e);
                        failed = true;
                    }
                }
                if failed {
                    errors.fetch_add(1, Ordering::SeqCst);
                }
                progress.tick(failed);
            },
        )?;

        summary.scanned += written.into_inner();
        summary.with_emails += with_emails.into_inner();
        summary.errors += errors.into_inner();
        Ok(())
    }

    fn merge(&self, summary: &mut RunSummary) -> Result<()> {
        let (websites, contacts) = merge_outputs(&self.layout)?;
        summary.websites_merge = websites;
        summary.contacts_merge = contacts;
        Ok(())
    }
}

/// Consolidates every grouping's stage files into `websites.csv` and `contacts.csv`.
/// A stage with no files yields `None`.
pub fn merge_outputs(layout: &OutputLayout) -> Result<(Option<MergeReport>, Option<MergeReport>)> {
    let website_files = stage_files(&layout.websites_dir(), WEBSITES_SUFFIX)?;
    let websites = if website_files.is_empty() {
        None
    } else {
        Some(merge_tables(&website_files, "resolved_website", &layout.merged_websites())?)
    };

    let contact_files = stage_files(&layout.contacts_dir(), CONTACTS_SUFFIX)?;
    let contacts = if contact_files.is_empty() {
        None
    } else {
        Some(merge_tables(&contact_files, "resolved_website", &layout.merged_contacts())?)
    };

    if websites.is_none() && contacts.is_none() {
        warn!("No stage files found under {:?}", layout.root());
    }
    Ok((websites, contacts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_only_move_forward() {
        assert!(Stage::Init.can_advance_to(Stage::Listing));
        assert!(Stage::Init.can_advance_to(Stage::Extracting));
        assert!(Stage::Resolving.can_advance_to(Stage::Failed));
        assert!(!Stage::Extracting.can_advance_to(Stage::Listing));
        assert!(!Stage::Listing.can_advance_to(Stage::Listing));
    }

    #[test]
    fn terminal_stages_are_final() {
        assert!(!Stage::Done.can_advance_to(Stage::Failed));
        assert!(!Stage::Failed.can_advance_to(Stage::Done));
        assert!(Stage::Done.is_terminal() && Stage::Failed.is_terminal());
    }

    #[test]
    fn failed_pipeline_reports_failed_stage() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new(dir.path().join("missing_seed.csv"), dir.path().join("out"));
        let mut pipeline = Pipeline::with_http(config);
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, ScrapeError::MissingInput(_)));
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(!dir.path().join("out").exists());
    }
}
