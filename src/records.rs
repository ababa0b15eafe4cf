use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};

pub const ERROR_MARKER: &str = "ERROR:";

/// One item on a listing page. Identity is `detail_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingRecord {
    pub display_name: String,
    pub detail_url: String,
}

/// Resolution-stage row. `resolved_website` is empty when every strategy failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCompany {
    #[serde(rename = "name")]
    pub display_name: String,
    pub grouping: String,
    pub detail_url: String,
    #[serde(default)]
    pub resolved_website: String,
}

impl ResolvedCompany {
    pub const HEADERS: [&'static str; 4] = ["name", "grouping", "detail_url", "resolved_website"];
}

/// Extraction-stage row; `emails` is the comma-joined set or an `ERROR: ...` marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRow {
    pub name: String,
    pub grouping: String,
    pub detail_url: String,
    pub resolved_website: String,
    pub emails: String,
}

impl ContactRow {
    pub const HEADERS: [&'static str; 5] = ["name", "grouping", "detail_url", "resolved_website", "emails"];

    pub fn new(company: &ResolvedCompany, result: &ContactResult) -> Self {
        ContactRow {
            name: company.display_name.clone(),
            grouping: company.grouping.clone(),
            detail_url: company.detail_url.clone(),
            resolved_website: company.resolved_website.clone(),
            emails: result.emails_field(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// The site was scanned (even if nothing was found).
    Scanned,
    /// The primary page could not be fetched or parsed.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactResult {
    pub resolved_website: String,
    pub emails: BTreeSet<String>,
    pub pages_scanned: usize,
    pub status: ScanStatus,
}

impl ContactResult {
    pub fn failed(website: &str, reason: impl Into<String>) -> Self {
        ContactResult {
            resolved_website: website.to_string(),
            emails: BTreeSet::new(),
            pages_scanned: 0,
            status: ScanStatus::Failed(reason.into()),
        }
    }

    pub fn emails_field(&self) -> String {
        match &self.status {
            ScanStatus::Failed(reason) => format!("{} {}", ERROR_MARKER, reason),
            ScanStatus::Scanned => self.emails.iter().cloned().collect::<Vec<_>>().join(","),
        }
    }
}

/// Both empty and `ERROR:`-marked values count as missing when comparing rows.
pub fn is_filled(value: &str) -> bool {
    let v = value.trim();
    !v.is_empty() && !v.starts_with(ERROR_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_field_is_sorted_and_comma_joined() {
        let mut result = ContactResult::failed("https://acme.io", "unused");
        result.status = ScanStatus::Scanned;
        result.emails.insert("team@acme.io".into());
        result.emails.insert("hello@acme.io".into());
        result.emails.insert("hello@acme.io".into());
        assert_eq!(result.emails_field(), "hello@acme.io,team@acme.io");
    }

    #[test]
    fn failed_scan_carries_error_marker() {
        let result = ContactResult::failed("https://acme.io", "HTTP 503");
        assert_eq!(result.emails_field(), "ERROR: HTTP 503");
        assert!(!is_filled(&result.emails_field()));
    }
}
