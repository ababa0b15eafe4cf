use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use log::info;
use regex::Regex;

use crate::error::{Result, ScrapeError};
use crate::records::ERROR_MARKER;

/// Generic-mailbox words worth keeping from a contacts table.
pub const DEFAULT_KEYWORDS: &[&str] = &[
    "info", "support", "hello", "hk", "supportdt", "email", "contact", "contactus", "team",
];

/// Matches an address when its local part equals a keyword or contains one as a whole word.
pub struct KeywordFilter {
    keywords: Vec<String>,
    pattern: Regex,
}

impl KeywordFilter {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self> {
        let keywords: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        let alternatives: Vec<String> = keywords.iter().map(|k| regex::escape(k)).collect();
        let pattern = Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|")))?;
        Ok(KeywordFilter { keywords, pattern })
    }

    pub fn matches(&self, email: &str) -> bool {
        let local = match email.trim().split_once('@') {
            Some((local, domain)) if !domain.contains('@') => local.to_lowercase(),
            _ => return false,
        };
        !self.keywords.is_empty() && (self.keywords.contains(&local) || self.pattern.is_match(&local))
    }

    /// Splits every comma-joined `emails` cell in `contacts_csv` and keeps the matches, in
    /// file order, without repeats. `ERROR:` cells are ignored.
    pub fn filter_file(&self, contacts_csv: &Path) -> Result<Vec<String>> {
        if !contacts_csv.exists() {
            return Err(ScrapeError::MissingInput(contacts_csv.to_path_buf()));
        }
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(contacts_csv)
            .map_err(|e| ScrapeError::csv(contacts_csv, e))?;

        let idx = reader
            .headers()
            .map_err(|e| ScrapeError::csv(contacts_csv, e))?
            .iter()
            .position(|h| h.trim() == "emails")
            .ok_or_else(|| ScrapeError::MissingColumn {
                path: contacts_csv.to_path_buf(),
                column: "emails".to_string(),
            })?;

        let mut seen = HashSet::new();
        let mut kept = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ScrapeError::csv(contacts_csv, e))?;
            let cell = record.get(idx).unwrap_or("").trim();
            if cell.starts_with(ERROR_MARKER) {
                continue;
            }
            for email in cell.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                if self.matches(email) && seen.insert(email.to_lowercase()) {
                    kept.push(email.to_string());
                }
            }
        }
        info!("Extracted {} emails matching keywords {:?}", kept.len(), self.keywords);
        Ok(kept)
    }
}

/// One address per line.
pub fn write_list(path: &Path, emails: &[String]) -> Result<()> {
    let file = File::create(path).map_err(|e| ScrapeError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for email in emails {
        writeln!(out, "{}", email).map_err(|e| ScrapeError::io(path, e))?;
    }
    out.flush().map_err(|e| ScrapeError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn default_filter() -> KeywordFilter {
        KeywordFilter::new(DEFAULT_KEYWORDS).unwrap()
    }

    #[test]
    fn whole_word_matches_only() {
        let f = default_filter();
        assert!(f.matches("info@acme.io"));
        assert!(f.matches("Hello@Acme.io"));
        assert!(f.matches("sales.team@acme.io"));
        assert!(f.matches("hk-office@acme.io"));
        assert!(!f.matches("information@acme.io"));
        assert!(!f.matches("jane.doe@acme.io"));
        assert!(!f.matches("not-an-email"));
    }

    #[test]
    fn filters_contacts_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.csv");
        fs::write(
            &path,
            "name,grouping,detail_url,resolved_website,emails\n\
             Acme,Germany,https://d.test/acme/,https://acme.io,\"hello@acme.io,jane@acme.io\"\n\
             Beta,Germany,https://d.test/beta/,https://beta.io,ERROR: HTTP 503\n\
             Gamma,Austria,https://d.test/gamma/,https://gamma.io,support@gamma.io\n\
             Acme2,Austria,https://d.test/acme2/,https://acme.de,hello@acme.io\n",
        )
        .unwrap();

        let kept = default_filter().filter_file(&path).unwrap();
        assert_eq!(kept, vec!["hello@acme.io", "support@gamma.io"]);

        let out = dir.path().join("extracted_emails.txt");
        write_list(&out, &kept).unwrap();
        assert_eq!(fs::read_to_string(&out).unwrap(), "hello@acme.io\nsupport@gamma.io\n");
    }

    #[test]
    fn custom_keywords() {
        let f = KeywordFilter::new(&["press"]).unwrap();
        assert!(f.matches("press@acme.io"));
        assert!(!f.matches("info@acme.io"));
    }
}
