use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{info, warn};

use startup_scraper_lib::config::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS};
use startup_scraper_lib::keyword_filter::{self, KeywordFilter, DEFAULT_KEYWORDS};
use startup_scraper_lib::layout::OutputLayout;
use startup_scraper_lib::{logger, pipeline, LlmSettings, Pipeline, PipelineConfig, SitePreset};

#[derive(Parser)]
#[command(name = "startup-scraper")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Crawl startup directories, resolve company websites and collect contact emails")]
struct Cli {
    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full pipeline: listing, website resolution, email extraction, merge
    Run {
        /// Seed file of groupings (CSV or XLSX with Country/Link columns)
        #[arg(long, default_value = "startups_data.csv")]
        seed: PathBuf,

        /// Previously resolved companies; skips listing and resolution
        #[arg(long)]
        companies: Option<PathBuf>,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        /// Only process this grouping (e.g. a country)
        #[arg(short, long)]
        grouping: Option<String>,

        /// Concurrent workers, clamped to the allowed range
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Re-crawl listings even when a checkpoint exists
        #[arg(long)]
        force_recrawl: bool,

        #[arg(long, value_enum, default_value = "eu-startups")]
        site: SitePreset,

        /// Pause after every request, in milliseconds
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,

        #[arg(long, default_value_t = 3)]
        max_contact_links: usize,

        #[arg(long, default_value_t = 100)]
        max_listing_pages: usize,

        /// Disable the LLM fallback even when a key is configured
        #[arg(long)]
        no_llm: bool,

        #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
        api_key: Option<String>,

        #[arg(long, env = "OPENROUTER_MODEL", default_value = "openai/gpt-4o-mini")]
        model: String,
    },

    /// Consolidate per-grouping stage files into websites.csv and contacts.csv
    Merge {
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Print and save addresses whose local part matches a keyword
    FilterEmails {
        #[arg(short, long, default_value = "contacts.csv")]
        input: PathBuf,

        #[arg(short, long, default_value = "extracted_emails.txt")]
        output: PathBuf,

        /// Replaces the default keyword list
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logger::init(cli.verbose);

    match cli.command {
        Command::Run {
            seed, companies, out_dir, grouping, workers, force_recrawl, site, delay_ms,
            max_contact_links, max_listing_pages, no_llm, api_key, model,
        } => {
            info!("Starting Startup Contact Scraper...");
            if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
                warn!("Worker count {} clamped to [{}, {}]", workers, MIN_WORKERS, MAX_WORKERS);
            }

            let mut config = PipelineConfig::new(seed, out_dir);
            config.companies_path = companies;
            config.grouping = grouping;
            config.workers = workers;
            config.force_recrawl = force_recrawl;
            config.site = site;
            config.max_contact_links = max_contact_links;
            config.max_listing_pages = max_listing_pages;
            config.fetch.delay = Duration::from_millis(delay_ms);
            config.llm = match (no_llm, api_key) {
                (false, Some(key)) if !key.trim().is_empty() => Some(LlmSettings::new(key, model)),
                (false, _) => {
                    info!("No OPENROUTER_API_KEY set. Using regex extraction only.");
                    None
                }
                (true, _) => None,
            };

            let summary = Pipeline::with_http(config).run()?;
            info!(
                "Scraping Completed. {} new website rows, {} new contact rows, {} skipped as already done.",
                summary.resolved, summary.scanned, summary.skipped
            );
        }

        Command::Merge { out_dir } => {
            let layout = OutputLayout::new(out_dir);
            let (websites, contacts) = pipeline::merge_outputs(&layout)?;
            for (label, report) in [("websites", websites), ("contacts", contacts)] {
                if let Some(r) = report {
                    info!(
                        "{}: {} files, {} rows read, {} duplicates removed, {} rows written",
                        label, r.files, r.rows_read, r.duplicates, r.rows_written
                    );
                }
            }
        }

        Command::FilterEmails { input, output, keywords } => {
            let filter = if keywords.is_empty() {
                KeywordFilter::new(DEFAULT_KEYWORDS)?
            } else {
                KeywordFilter::new(keywords.as_slice())?
            };
            let emails = filter.filter_file(&input)?;
            for email in &emails {
                println!("{}", email);
            }
            if !emails.is_empty() {
                keyword_filter::write_list(&output, &emails)?;
                info!("Saved {} emails to {:?}", emails.len(), output);
            }
        }
    }

    Ok(())
}
