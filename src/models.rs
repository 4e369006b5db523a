use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::errors::KeyError;

/// Identifier for one unit of batch work: a ticker symbol or an index name.
pub type Key = String;

/// URL scraped from a rendered page that serves the actual file payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadLink(pub Url);

impl DownloadLink {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for DownloadLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// A file written to disk for a key.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact {
    pub key: Key,
    pub path: PathBuf,
    pub source: DownloadLink,
    pub bytes: usize,
}

/// Per-key progress through one fetch-extract-download cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyState {
    Pending,
    Loading,
    LinkExtracted,
    Fetching,
    Written,
    Failed,
}

impl KeyState {
    pub fn as_str(&self) -> &str {
        match self {
            KeyState::Pending => "pending",
            KeyState::Loading => "loading",
            KeyState::LinkExtracted => "link-extracted",
            KeyState::Fetching => "fetching",
            KeyState::Written => "written",
            KeyState::Failed => "failed",
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A key that did not produce an artifact, with the reason.
#[derive(Debug)]
pub struct KeyFailure {
    pub key: Key,
    pub error: KeyError,
}

/// Final result for one key.
#[derive(Debug)]
pub enum KeyOutcome {
    Written(Artifact),
    Failed(KeyFailure),
}

impl KeyOutcome {
    pub fn key(&self) -> &str {
        match self {
            KeyOutcome::Written(artifact) => &artifact.key,
            KeyOutcome::Failed(failure) => &failure.key,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, KeyOutcome::Written(_))
    }
}

/// Outcomes of a batch, in the order the keys were supplied.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<KeyOutcome>,
}

impl BatchReport {
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            KeyOutcome::Written(artifact) => Some(artifact),
            KeyOutcome::Failed(_) => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = &KeyFailure> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            KeyOutcome::Written(_) => None,
            KeyOutcome::Failed(failure) => Some(failure),
        })
    }

    pub fn success_count(&self) -> usize {
        self.artifacts().count()
    }

    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    pub fn is_success(&self) -> bool {
        self.failure_count() == 0
    }

    /// Collapse into the batch contract: number of artifacts written, or the
    /// list of failed keys if any key failed.
    pub fn into_result(self) -> Result<usize, Vec<KeyFailure>> {
        let mut written = 0;
        let mut failures = Vec::new();
        for outcome in self.outcomes {
            match outcome {
                KeyOutcome::Written(_) => written += 1,
                KeyOutcome::Failed(failure) => failures.push(failure),
            }
        }
        if failures.is_empty() {
            Ok(written)
        } else {
            Err(failures)
        }
    }
}
