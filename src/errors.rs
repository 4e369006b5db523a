//! Per-key error taxonomy

use std::path::PathBuf;
use thiserror::Error;

/// Why a link selector could not settle on a single download link.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectError {
    #[error("no anchor matched {rule}")]
    NoMatch { rule: String },

    #[error("{count} anchors matched {rule}, expected exactly one")]
    Ambiguous { rule: String, count: usize },
}

/// Failure of one key's cycle. Never aborts sibling keys.
#[derive(Error, Debug)]
pub enum KeyError {
    #[error("could not build target URL: {0}")]
    InvalidTarget(String),

    #[error("page load failed for {url}: {reason}")]
    PageLoad { url: String, reason: String },

    #[error("link extraction failed: {0}")]
    LinkExtraction(#[from] SelectError),

    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("write to {} failed: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("batch timed out before this key completed")]
    Timeout,
}

impl KeyError {
    /// Network-class failures that are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, KeyError::PageLoad { .. } | KeyError::Fetch { .. })
    }

    /// Stable name of the error class, used in summaries and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            KeyError::InvalidTarget(_) | KeyError::PageLoad { .. } => "PageLoadError",
            KeyError::LinkExtraction(_) => "LinkExtractionError",
            KeyError::Fetch { .. } => "FetchError",
            KeyError::Write { .. } => "WriteError",
            KeyError::Timeout => "TimeoutError",
        }
    }
}
