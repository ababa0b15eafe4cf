pub mod config;
pub mod contact;
pub mod delay_manager;
pub mod emails;
pub mod error;
pub mod fetcher;
pub mod input_loader;
pub mod keyword_filter;
pub mod layout;
pub mod listing;
pub mod logger;
pub mod merge;
pub mod pipeline;
pub mod pool;
pub mod progress;
pub mod records;
pub mod resolver;
pub mod secondary;
pub mod store;
pub mod urls;

// Exporting types for convenience
pub use config::{FetchSettings, LlmSettings, PipelineConfig};
pub use error::{Result, ScrapeError};
pub use fetcher::{FetchStatus, Fetched, Fetcher, PageSource};
pub use listing::SitePreset;
pub use pipeline::{HttpFactory, Pipeline, RunSummary, Stage, WorkerFactory};
pub use records::{ContactResult, ContactRow, ListingRecord, ResolvedCompany};
pub use secondary::{SecondaryExtractor, SecondaryOutput};
