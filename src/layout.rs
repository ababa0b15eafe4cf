use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, ScrapeError};

pub const CRAWL_DIR: &str = "crawl_results";
pub const WEBSITES_DIR: &str = "scrape_results";
pub const CONTACTS_DIR: &str = "contact_results";

pub const COMPANIES_SUFFIX: &str = "_companies.csv";
pub const WEBSITES_SUFFIX: &str = "_websites.csv";
pub const CONTACTS_SUFFIX: &str = "_contacts.csv";

/// File-name-safe form of a grouping label: every non-ASCII-alphanumeric char becomes `_`.
pub fn safe_label(grouping: &str) -> String {
    grouping
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Where each stage writes, relative to the output root.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        OutputLayout { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [CRAWL_DIR, WEBSITES_DIR, CONTACTS_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| ScrapeError::io(&path, e))?;
        }
        Ok(())
    }

    pub fn websites_dir(&self) -> PathBuf {
        self.root.join(WEBSITES_DIR)
    }

    pub fn contacts_dir(&self) -> PathBuf {
        self.root.join(CONTACTS_DIR)
    }

    pub fn companies_file(&self, grouping: &str) -> PathBuf {
        self.root.join(CRAWL_DIR).join(format!("{}{}", safe_label(grouping), COMPANIES_SUFFIX))
    }

    pub fn websites_file(&self, grouping: &str) -> PathBuf {
        self.websites_dir().join(format!("{}{}", safe_label(grouping), WEBSITES_SUFFIX))
    }

    pub fn contacts_file(&self, grouping: &str) -> PathBuf {
        self.contacts_dir().join(format!("{}{}", safe_label(grouping), CONTACTS_SUFFIX))
    }

    pub fn merged_websites(&self) -> PathBuf {
        self.root.join("websites.csv")
    }

    pub fn merged_contacts(&self) -> PathBuf {
        self.root.join("contacts.csv")
    }
}
