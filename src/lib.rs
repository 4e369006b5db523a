//! Batch scraper/downloader for NSE equity and sector index CSV reports.
//!
//! For each key (a ticker symbol or index name) the batch builds a page URL,
//! loads the rendered page, picks the single download link out of its
//! anchors, fetches the bytes behind it and writes them to `<KEY>.csv`.

pub mod cli;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod extract;
pub mod fetch;
pub mod keys;
pub mod models;
pub mod page;
pub mod report;
pub mod targets;

pub use downloader::{download_keys, BatchDownloader, BatchOptions, CsvNamer, Namer};
pub use errors::{KeyError, SelectError};
pub use models::{Artifact, BatchReport, DownloadLink, Key, KeyFailure, KeyOutcome, KeyState};
