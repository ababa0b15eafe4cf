use std::fs::File;
use std::path::Path;
use log::{info, warn};
use serde::Deserialize;
use calamine::{open_workbook, Reader, Xlsx};

use crate::error::{Result, ScrapeError};
use crate::records::ResolvedCompany;

/// One grouping from the seed file: a label and its directory listing URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedGrouping {
    pub grouping: String,
    pub link: String,
    /// Company count advertised by the directory, when the seed carries it.
    pub expected: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    #[serde(rename = "Country", alias = "country", alias = "Grouping", alias = "grouping", alias = "Category", alias = "category")]
    grouping: String,
    #[serde(rename = "Link", alias = "link", alias = "Url", alias = "URL", alias = "url")]
    link: String,
    #[serde(rename = "NumberOfCompanies", alias = "number_of_companies", alias = "Companies", default)]
    expected: Option<String>,
}

const GROUPING_HEADERS: &[&str] = &["country", "grouping", "category"];
const LINK_HEADERS: &[&str] = &["link", "url"];
const COUNT_HEADERS: &[&str] = &["numberofcompanies", "number_of_companies", "companies"];

fn parse_count(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    raw.parse::<u32>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u32))
}

fn seed_entry(grouping: &str, link: &str, expected: Option<&str>) -> Option<SeedGrouping> {
    let grouping = grouping.trim();
    let link = link.trim();
    if grouping.is_empty() || link.is_empty() {
        return None;
    }
    Some(SeedGrouping {
        grouping: grouping.to_string(),
        link: link.to_string(),
        expected: expected.and_then(parse_count),
    })
}

/// Seed file of groupings. XLSX by extension, CSV otherwise. Rows missing a label or a
/// link are skipped; a missing file or column is an error.
pub fn load_seed(path: &Path) -> Result<Vec<SeedGrouping>> {
    if !path.exists() {
        return Err(ScrapeError::MissingInput(path.to_path_buf()));
    }

    let is_excel = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("xlsx") || ext.eq_ignore_ascii_case("xls"));

    let seeds = if is_excel { load_seed_excel(path)? } else { load_seed_csv(path)? };
    if seeds.is_empty() {
        return Err(ScrapeError::EmptySeed(path.to_path_buf()));
    }
    info!("Loaded {} groupings from {:?}", seeds.len(), path);
    Ok(seeds)
}

fn require_column(path: &Path, headers: &[String], names: &[&str], column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| names.contains(&h.trim().to_lowercase().as_str()))
        .ok_or_else(|| ScrapeError::MissingColumn {
            path: path.to_path_buf(),
            column: column.to_string(),
        })
}

fn load_seed_csv(path: &Path) -> Result<Vec<SeedGrouping>> {
    let file = File::open(path).map_err(|e| ScrapeError::io(path, e))?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(file);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(|e| ScrapeError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();
    require_column(path, &headers, GROUPING_HEADERS, "Country")?;
    require_column(path, &headers, LINK_HEADERS, "Link")?;

    let mut seeds = Vec::new();
    for result in rdr.deserialize::<SeedRow>() {
        match result {
            Ok(row) => {
                if let Some(seed) = seed_entry(&row.grouping, &row.link, row.expected.as_deref()) {
                    seeds.push(seed);
                }
            }
            Err(e) => warn!("Skipping malformed seed row in {:?}: {}", path, e),
        }
    }
    Ok(seeds)
}

fn load_seed_excel(path: &Path) -> Result<Vec<SeedGrouping>> {
    let mut excel: Xlsx<_> = open_workbook(path).map_err(|e: calamine::XlsxError| ScrapeError::Spreadsheet {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let worksheets = excel.worksheets();
    let (_name, range) = match worksheets.first() {
        Some(sheet) => sheet,
        None => return Ok(Vec::new()),
    };

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(|c| c.to_string()).collect(),
        None => return Ok(Vec::new()),
    };
    let grouping_idx = require_column(path, &headers, GROUPING_HEADERS, "Country")?;
    let link_idx = require_column(path, &headers, LINK_HEADERS, "Link")?;
    let count_idx = require_column(path, &headers, COUNT_HEADERS, "NumberOfCompanies").ok();

    let cell = |row: &[calamine::Data], idx: usize| row.get(idx).map(|c| c.to_string()).unwrap_or_default();
    Ok(rows
        .filter_map(|row| {
            let count = count_idx.map(|i| cell(row, i));
            seed_entry(&cell(row, grouping_idx), &cell(row, link_idx), count.as_deref())
        })
        .collect())
}

/// Previously resolved companies (`name, grouping, detail_url, resolved_website[, emails]`).
pub fn load_companies(path: &Path) -> Result<Vec<ResolvedCompany>> {
    if !path.exists() {
        return Err(ScrapeError::MissingInput(path.to_path_buf()));
    }

    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(|e| ScrapeError::csv(path, e))?;

    let mut companies = Vec::new();
    for result in rdr.deserialize::<ResolvedCompany>() {
        match result {
            Ok(company) => companies.push(company),
            Err(e) => warn!("Skipping malformed company row in {:?}: {}", path, e),
        }
    }
    info!("Loaded {} companies from {:?}", companies.len(), path);
    Ok(companies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn seed_csv_accepts_header_aliases() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("startups_data.csv");
        fs::write(
            &path,
            "Country,Link,NumberOfCompanies\n\
             Germany,https://www.eu-startups.com/directory/wpbdp_category/germany/,2500\n\
             ,https://missing-label.test/,1\n\
             Czech Republic,https://www.eu-startups.com/directory/wpbdp_category/czech-republic/,\n",
        )
        .unwrap();

        let seeds = load_seed(&path).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].grouping, "Germany");
        assert_eq!(seeds[0].expected, Some(2500));
        assert_eq!(seeds[1].grouping, "Czech Republic");
        assert_eq!(seeds[1].expected, None);
    }

    #[test]
    fn category_and_url_headers_work_too() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.csv");
        fs::write(&path, "category,url\nFintech,https://www.f6s.com/companies/fintech/\n").unwrap();
        let seeds = load_seed(&path).unwrap();
        assert_eq!(seeds[0].grouping, "Fintech");
    }

    #[test]
    fn missing_seed_is_fatal() {
        let err = load_seed(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, ScrapeError::MissingInput(_)));
    }

    #[test]
    fn seed_without_link_column_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.csv");
        fs::write(&path, "Country,Size\nGermany,10\n").unwrap();
        assert!(matches!(load_seed(&path), Err(ScrapeError::MissingColumn { .. })));
    }

    #[test]
    fn companies_file_may_carry_emails_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("companies.csv");
        fs::write(
            &path,
            "name,grouping,detail_url,resolved_website,emails\n\
             Acme,Germany,https://d.test/acme/,https://acme.io,hello@acme.io\n\
             Nowhere,Germany,https://d.test/nowhere/,,\n",
        )
        .unwrap();

        let companies = load_companies(&path).unwrap();
        assert_eq!(companies.len(), 2);
        assert_eq!(companies[0].resolved_website, "https://acme.io");
        assert!(companies[1].resolved_website.is_empty());
    }
}
