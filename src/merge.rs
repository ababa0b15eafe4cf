//! Consolidation of per-grouping stage files into one table per stage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{Result, ScrapeError};
use crate::records::is_filled;
use crate::urls::normalize_website;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub files: usize,
    pub rows_read: usize,
    pub skipped_empty_key: usize,
    pub duplicates: usize,
    pub rows_written: usize,
}

/// CSV files in `dir` whose name ends with `suffix`, sorted by name.
pub fn stage_files(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ScrapeError::io(dir, e))? {
        let path = entry.map_err(|e| ScrapeError::io(dir, e))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(suffix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

type Row = HashMap<String, String>;

fn completeness(row: &Row) -> usize {
    row.values().filter(|v| is_filled(v)).count()
}

fn merge_key(raw: &str) -> String {
    normalize_website(raw).unwrap_or_else(|| raw.trim().to_string())
}

/// Merges `inputs` into `output`, one row per distinct `key_column` value.
///
/// Rows with an empty key are dropped. On a collision the row with more filled fields
/// (`ERROR:` markers count as empty) wins; ties keep the row seen first. Output columns are
/// the union of input headers in first-seen order, rows sorted by `grouping` then `name`.
pub fn merge_tables(inputs: &[PathBuf], key_column: &str, output: &Path) -> Result<MergeReport> {
    let mut report = MergeReport::default();
    let mut columns: Vec<String> = Vec::new();
    let mut rows: HashMap<String, Row> = HashMap::new();

    for input in inputs {
        let mut reader = match csv::ReaderBuilder::new().flexible(true).trim(csv::Trim::All).from_path(input) {
            Ok(r) => r,
            Err(e) => {
                warn!("Error processing CSV file {:?}: {}", input, e);
                continue;
            }
        };
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ScrapeError::csv(input, e))?
            .iter()
            .map(str::to_string)
            .collect();
        if !headers.iter().any(|h| h == key_column) {
            warn!("Skipping {:?}: no '{}' column", input, key_column);
            continue;
        }
        for h in &headers {
            if !columns.contains(h) {
                columns.push(h.clone());
            }
        }
        report.files += 1;

        let mut file_rows = 0;
        for record in reader.records() {
            let record = record.map_err(|e| ScrapeError::csv(input, e))?;
            file_rows += 1;
            let row: Row = headers
                .iter()
                .cloned()
                .zip(record.iter().map(str::to_string))
                .collect();

            let key = match row.get(key_column).map(|k| k.trim()).filter(|k| !k.is_empty()) {
                Some(k) => merge_key(k),
                None => {
                    report.skipped_empty_key += 1;
                    continue;
                }
            };

            match rows.get(&key) {
                Some(existing) => {
                    report.duplicates += 1;
                    if completeness(&row) > completeness(existing) {
                        rows.insert(key, row);
                    }
                }
                None => {
                    rows.insert(key, row);
                }
            }
        }
        info!("Found {} rows in {:?}", file_rows, input);
        report.rows_read += file_rows;
    }

    let mut merged: Vec<Row> = rows.into_values().collect();
    let field = |r: &Row, name: &str| r.get(name).cloned().unwrap_or_default();
    merged.sort_by(|a, b| {
        (field(a, "grouping"), field(a, "name"), field(a, key_column))
            .cmp(&(field(b, "grouping"), field(b, "name"), field(b, key_column)))
    });

    let mut writer = csv::Writer::from_path(output).map_err(|e| ScrapeError::csv(output, e))?;
    writer.write_record(&columns).map_err(|e| ScrapeError::csv(output, e))?;
    for row in &merged {
        writer
            .write_record(columns.iter().map(|c| row.get(c).map(String::as_str).unwrap_or("")))
            .map_err(|e| ScrapeError::csv(output, e))?;
    }
    writer.flush().map_err(|e| ScrapeError::io(output, e))?;

    report.rows_written = merged.len();
    info!(
        "Consolidated {} files into {:?}: {} unique rows, {} duplicates removed",
        report.files, output, report.rows_written, report.duplicates
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        csv::Reader::from_path(path)
            .unwrap()
            .records()
            .map(|r| r.unwrap().iter().map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn more_complete_row_wins_and_errors_count_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(
            dir.path(),
            "Germany_contacts.csv",
            "name,grouping,detail_url,resolved_website,emails\n\
             Acme,Germany,https://d.test/acme/,https://acme.io,ERROR: HTTP 503\n\
             Beta,Germany,https://d.test/beta/,https://beta.io,hi@beta.io\n\
             Nosite,Germany,https://d.test/nosite/,,\n",
        );
        let b = write(
            dir.path(),
            "Austria_contacts.csv",
            "name,grouping,detail_url,resolved_website,emails\n\
             Acme,Austria,https://d.test/acme-at/,https://acme.io/,hello@acme.io\n\
             Beta,Austria,,https://beta.io,\n",
        );
        let out = dir.path().join("contacts.csv");

        let report = merge_tables(&[a, b], "resolved_website", &out).unwrap();
        assert_eq!(report.files, 2);
        assert_eq!(report.rows_read, 5);
        assert_eq!(report.skipped_empty_key, 1);
        assert_eq!(report.duplicates, 2);
        assert_eq!(report.rows_written, 2);

        let rows = read_rows(&out);
        assert_eq!(rows[0][0], "Acme");
        assert_eq!(rows[0][1], "Austria");
        assert_eq!(rows[0][4], "hello@acme.io");
        assert_eq!(rows[1][0], "Beta");
        assert_eq!(rows[1][4], "hi@beta.io");
    }

    #[test]
    fn stage_files_filters_by_suffix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b_websites.csv", "x\n");
        write(dir.path(), "a_websites.csv", "x\n");
        write(dir.path(), "a_contacts.csv", "x\n");
        let files = stage_files(dir.path(), "_websites.csv").unwrap();
        let names: Vec<_> = files.iter().map(|p| p.file_name().unwrap().to_str().unwrap().to_string()).collect();
        assert_eq!(names, vec!["a_websites.csv", "b_websites.csv"]);
        assert!(stage_files(&dir.path().join("missing"), "_websites.csv").unwrap().is_empty());
    }
}
