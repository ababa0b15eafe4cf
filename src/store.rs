//! Resume-by-replay persistence.
//!
//! The stage's output CSV is the durable log: on open, its key column becomes the
//! seen-set, and every new row is appended and flushed inside one exclusive section
//! together with the seen-set update.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScrapeError};
use crate::records::ListingRecord;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A seen-set that several stores may share, e.g. one per grouping file that must not
/// repeat a key already written by another grouping.
#[derive(Debug, Clone, Default)]
pub struct KeySet(Arc<Mutex<HashSet<String>>>);

impl KeySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        lock(&self.0).contains(key.trim())
    }

    pub fn extend(&self, keys: impl IntoIterator<Item = String>) {
        lock(&self.0).extend(keys.into_iter().map(|k| k.trim().to_string()));
    }

    pub fn len(&self) -> usize {
        lock(&self.0).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reads the `key_column` of an existing output file. A missing or empty file yields an
/// empty set.
pub fn load_from(path: &Path, key_column: &str) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();
    if !path.exists() || fs::metadata(path).map_err(|e| ScrapeError::io(path, e))?.len() == 0 {
        return Ok(keys);
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ScrapeError::csv(path, e))?;

    let headers = reader.headers().map_err(|e| ScrapeError::csv(path, e))?.clone();
    let idx = headers
        .iter()
        .position(|h| h == key_column)
        .ok_or_else(|| ScrapeError::MissingColumn {
            path: path.to_path_buf(),
            column: key_column.to_string(),
        })?;

    for record in reader.records() {
        let record = record.map_err(|e| ScrapeError::csv(path, e))?;
        if let Some(key) = record.get(idx).map(str::trim).filter(|k| !k.is_empty()) {
            keys.insert(key.to_string());
        }
    }
    Ok(keys)
}

/// Cuts a row left half-written by an interrupted run, so only complete rows count.
/// Returns the number of bytes dropped.
fn drop_partial_row(path: &Path) -> std::io::Result<u64> {
    let mut file = match OpenOptions::new().read(true).write(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(0);
    }

    let mut bytes = Vec::with_capacity(len as usize);
    file.read_to_end(&mut bytes)?;
    let keep = match bytes.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos as u64 + 1,
        None => 0,
    };
    if keep < len {
        file.set_len(keep)?;
    }
    Ok(len - keep)
}

/// Append-only CSV output with skip-if-seen semantics.
pub struct ResumeStore {
    path: PathBuf,
    keys: KeySet,
    writer: Mutex<csv::Writer<File>>,
}

impl ResumeStore {
    pub fn open(path: &Path, headers: &[&str], key_column: &str) -> Result<Self> {
        Self::open_with(path, headers, key_column, KeySet::new())
    }

    /// Like [`open`](Self::open) but registers the file's keys in, and checks against,
    /// a caller-provided set.
    pub fn open_with(path: &Path, headers: &[&str], key_column: &str, keys: KeySet) -> Result<Self> {
        let dropped = drop_partial_row(path).map_err(|e| ScrapeError::io(path, e))?;
        if dropped > 0 {
            warn!("Dropped {} bytes of an incomplete last row in {:?}", dropped, path);
        }
        let existing = load_from(path, key_column)?;
        if !existing.is_empty() {
            info!("Resuming {:?}: {} rows already written", path, existing.len());
        }
        keys.extend(existing);

        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|e| ScrapeError::io(path, e))?;

        let is_new = file.metadata().map_err(|e| ScrapeError::io(path, e))?.len() == 0;

        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if is_new {
            writer.write_record(headers).map_err(|e| ScrapeError::csv(path, e))?;
            writer.flush().map_err(|e| ScrapeError::io(path, e))?;
        }

        Ok(ResumeStore {
            path: path.to_path_buf(),
            keys,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seen(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Appends `row` unless `key` was already recorded. Returns whether a row was written.
    pub fn record<T: Serialize>(&self, key: &str, row: &T) -> Result<bool> {
        let key = key.trim();
        let mut keys = lock(&self.keys.0);
        if keys.contains(key) {
            debug!("Skipping duplicate key {}", key);
            return Ok(false);
        }

        let mut writer = lock(&self.writer);
        writer.serialize(row).map_err(|e| ScrapeError::csv(&self.path, e))?;
        writer.flush().map_err(|e| ScrapeError::io(&self.path, e))?;
        keys.insert(key.to_string());
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointRow {
    name: String,
    grouping: String,
    detail_url: String,
}

/// Listing checkpoint: written once per grouping after its listing crawl finishes.
pub fn write_checkpoint(path: &Path, grouping: &str, records: &[ListingRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path).map_err(|e| ScrapeError::csv(path, e))?;
    for r in records {
        writer
            .serialize(CheckpointRow {
                name: r.display_name.clone(),
                grouping: grouping.to_string(),
                detail_url: r.detail_url.clone(),
            })
            .map_err(|e| ScrapeError::csv(path, e))?;
    }
    if records.is_empty() {
        writer
            .write_record(["name", "grouping", "detail_url"])
            .map_err(|e| ScrapeError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ScrapeError::io(path, e))?;
    Ok(())
}

/// `None` when there is no usable checkpoint (absent or no rows).
pub fn read_checkpoint(path: &Path) -> Result<Option<Vec<ListingRecord>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ScrapeError::csv(path, e))?;

    let mut records = Vec::new();
    let mut seen = HashSet::new();
    for row in reader.deserialize::<CheckpointRow>() {
        let row = row.map_err(|e| ScrapeError::csv(path, e))?;
        if !row.detail_url.is_empty() && seen.insert(row.detail_url.clone()) {
            records.push(ListingRecord {
                display_name: row.name,
                detail_url: row.detail_url,
            });
        }
    }

    Ok(if records.is_empty() { None } else { Some(records) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::ResolvedCompany;
    use std::thread;

    fn company(i: usize) -> ResolvedCompany {
        ResolvedCompany {
            display_name: format!("Company {}", i),
            grouping: "Germany".into(),
            detail_url: format!("https://dir.test/listing/company-{}/", i),
            resolved_website: String::new(),
        }
    }

    fn row_count(path: &Path) -> usize {
        csv::Reader::from_path(path).unwrap().records().count()
    }

    #[test]
    fn reopening_replays_keys_and_skips_them() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("germany_websites.csv");

        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();
        assert!(store.record(&company(1).detail_url, &company(1)).unwrap());
        assert!(!store.record(&company(1).detail_url, &company(1)).unwrap());
        drop(store);

        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();
        assert!(store.seen(&company(1).detail_url));
        assert!(!store.record(&company(1).detail_url, &company(1)).unwrap());
        assert!(store.record(&company(2).detail_url, &company(2)).unwrap());
        drop(store);

        assert_eq!(row_count(&path), 2);
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("name,grouping,detail_url,resolved_website").count(), 1);
    }

    #[test]
    fn cut_off_last_row_is_dropped_and_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("germany_websites.csv");
        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();
        assert!(store.record(&company(1).detail_url, &company(1)).unwrap());
        drop(store);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, b"Company 2,Germany,https://dir.te").unwrap();
        drop(file);

        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();
        assert!(!store.seen("https://dir.te"));
        assert!(store.seen(&company(1).detail_url));
        assert!(!store.seen(&company(2).detail_url));
        assert!(store.record(&company(2).detail_url, &company(2)).unwrap());
        drop(store);

        let keys = load_from(&path, "detail_url").unwrap();
        let expected: HashSet<String> = [company(1).detail_url, company(2).detail_url].into_iter().collect();
        assert_eq!(keys, expected);
        assert_eq!(row_count(&path), 2);
    }

    #[test]
    fn cut_off_header_starts_the_file_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        fs::write(&path, "name,grouping,det").unwrap();

        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();
        assert!(store.is_empty());
        store.record(&company(3).detail_url, &company(3)).unwrap();
        drop(store);

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("name,grouping,detail_url,resolved_website\n"));
        assert_eq!(row_count(&path), 1);
    }

    #[test]
    fn missing_key_column_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.csv");
        fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(load_from(&path, "detail_url"), Err(ScrapeError::MissingColumn { .. })));
    }

    #[test]
    fn shared_key_set_spans_files() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeySet::new();
        let a = ResumeStore::open_with(&dir.path().join("a.csv"), &ResolvedCompany::HEADERS, "detail_url", keys.clone()).unwrap();
        let b = ResumeStore::open_with(&dir.path().join("b.csv"), &ResolvedCompany::HEADERS, "detail_url", keys.clone()).unwrap();
        assert!(a.record(&company(1).detail_url, &company(1)).unwrap());
        assert!(b.seen(&company(1).detail_url));
        assert!(!b.record(&company(1).detail_url, &company(1)).unwrap());
    }

    #[test]
    fn concurrent_writers_produce_one_row_per_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.csv");
        let store = ResumeStore::open(&path, &ResolvedCompany::HEADERS, "detail_url").unwrap();

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for i in 0..50 {
                        store.record(&company(i).detail_url, &company(i)).unwrap();
                    }
                });
            }
        });
        drop(store);
        assert_eq!(row_count(&path), 50);
    }

    #[test]
    fn checkpoint_round_trip_dedups_and_ignores_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("germany_companies.csv");
        assert!(read_checkpoint(&path).unwrap().is_none());

        write_checkpoint(&path, "Germany", &[]).unwrap();
        assert!(read_checkpoint(&path).unwrap().is_none());

        let records = vec![
            ListingRecord { display_name: "A".into(), detail_url: "https://d.test/a/".into() },
            ListingRecord { display_name: "B".into(), detail_url: "https://d.test/b/".into() },
        ];
        write_checkpoint(&path, "Germany", &records).unwrap();
        assert_eq!(read_checkpoint(&path).unwrap(), Some(records));
    }
}
