//! Batch summaries for the terminal and as JSON

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::models::{BatchReport, KeyOutcome};

#[derive(Debug, Serialize)]
pub struct ReportEntry {
    pub key: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReportDocument {
    pub generated_at: chrono::DateTime<chrono::Utc>,
    pub written: usize,
    pub failed: usize,
    pub keys: Vec<ReportEntry>,
}

impl ReportDocument {
    pub fn from_report(report: &BatchReport) -> Self {
        let keys = report
            .outcomes
            .iter()
            .map(|outcome| match outcome {
                KeyOutcome::Written(artifact) => ReportEntry {
                    key: artifact.key.clone(),
                    status: "written",
                    path: Some(artifact.path.clone()),
                    link: Some(artifact.source.to_string()),
                    bytes: Some(artifact.bytes),
                    error_kind: None,
                    error: None,
                },
                KeyOutcome::Failed(failure) => ReportEntry {
                    key: failure.key.clone(),
                    status: "failed",
                    path: None,
                    link: None,
                    bytes: None,
                    error_kind: Some(failure.error.kind()),
                    error: Some(failure.error.to_string()),
                },
            })
            .collect();

        Self {
            generated_at: chrono::Utc::now(),
            written: report.success_count(),
            failed: report.failure_count(),
            keys,
        }
    }
}

/// Lines printed once the batch has fully finished.
pub fn summary_lines(report: &BatchReport) -> Vec<String> {
    let mut lines = vec![format!(
        "Downloaded {} of {} keys ({} failed)",
        report.success_count(),
        report.outcomes.len(),
        report.failure_count()
    )];

    for failure in report.failures() {
        lines.push(format!(
            "  FAILED {} [{}]: {}",
            failure.key,
            failure.error.kind(),
            failure.error
        ));
    }
    lines
}

pub fn print_summary(report: &BatchReport) {
    for line in summary_lines(report) {
        println!("{}", line);
    }
}

pub fn write_json_report(report: &BatchReport, path: &Path) -> Result<()> {
    let document = ReportDocument::from_report(report);
    let json = serde_json::to_string_pretty(&document)?;
    std::fs::write(path, json)
        .with_context(|| format!("Cannot write report: {}", path.display()))?;
    Ok(())
}
