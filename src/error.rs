use std::path::PathBuf;

/// Failures that abort a stage or the whole run.
///
/// Per-page network problems are not errors; they travel as
/// [`FetchStatus`](crate::fetcher::FetchStatus) values and end up as empty
/// fields or `ERROR:` markers in the output.
#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error on {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to open spreadsheet {path:?}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    #[error("Input file {0:?} does not exist")]
    MissingInput(PathBuf),

    #[error("Column '{column}' not found in {path:?}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Grouping '{0}' not found in seed file")]
    UnknownGrouping(String),

    #[error("No groupings found in seed file {0:?}")]
    EmptySeed(PathBuf),

    #[error("Invalid keyword pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl ScrapeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ScrapeError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        ScrapeError::Csv {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
