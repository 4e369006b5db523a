use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{parse_base_url, Config};
use crate::extract::{ContainsSelector, LinkSelector, NthSelector, SuffixSelector};
use crate::keys;
use crate::models::Key;
use crate::targets::DateRange;

#[derive(Parser)]
#[command(name = "nsefetch")]
#[command(about = "Batch downloader for NSE equity and sector index CSV reports")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download price/volume/deliverable reports for equity symbols
    Equities {
        #[command(flatten)]
        keys: KeyArgs,

        /// Named period understood by the site (1day, 7days, 2weeks, 1month, 3month, 12month)
        #[arg(long, default_value = "3month")]
        date_range: String,

        /// Start date (YYYY-MM-DD); replaces --date-range
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// End date (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Download historical values for sector indices
    Indices {
        #[command(flatten)]
        keys: KeyArgs,

        /// Start date (YYYY-MM-DD), default 2014-03-10
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// End date (YYYY-MM-DD), default 2014-03-14
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        #[command(flatten)]
        common: CommonArgs,
    },

    /// Download from any site using a URL template with a {key} placeholder
    Fetch {
        /// Page URL template, e.g. "https://example.com/report?symbol={key}"
        #[arg(long)]
        url_template: String,

        #[command(flatten)]
        keys: KeyArgs,

        #[command(flatten)]
        common: CommonArgs,
    },
}

impl Commands {
    pub fn common(&self) -> &CommonArgs {
        match self {
            Commands::Equities { common, .. }
            | Commands::Indices { common, .. }
            | Commands::Fetch { common, .. } => common,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Key to process; repeat for several. Overrides the built-in list
    #[arg(short, long = "key", value_name = "KEY")]
    pub keys: Vec<String>,

    /// File with one key per line ('#' starts a comment)
    #[arg(long)]
    pub keys_file: Option<PathBuf>,
}

impl KeyArgs {
    /// Explicit keys win over a keys file, which wins over the default list.
    pub fn resolve(&self, default: impl FnOnce() -> Vec<Key>) -> Result<Vec<Key>> {
        if !self.keys.is_empty() {
            let explicit = self.keys.iter().map(|k| k.trim().to_string()).collect();
            return Ok(keys::unique(explicit));
        }
        match &self.keys_file {
            Some(path) => keys::load_keys_file(path),
            None => Ok(default()),
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct CommonArgs {
    /// Output directory for <KEY>.csv files
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Keys processed at once
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,

    /// Retries for page load and download failures
    #[arg(long)]
    pub retries: Option<u32>,

    /// Abort the whole batch after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// User agent sent with every request
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Site root used for templates and to resolve relative links
    #[arg(long)]
    pub base_url: Option<String>,

    /// Fetch pages over plain HTTP instead of rendering them in headless Chrome
    #[arg(long)]
    pub no_render: bool,

    /// Pick the one link whose path ends with this suffix (default .csv)
    #[arg(long, conflicts_with_all = ["link_contains", "link_index"])]
    pub link_suffix: Option<String>,

    /// Pick the one link containing this text
    #[arg(long, conflicts_with = "link_index")]
    pub link_contains: Option<String>,

    /// Pick the anchor at this position in document order, counting every anchor with an href
    #[arg(long)]
    pub link_index: Option<usize>,

    /// Write a JSON report of every key's outcome
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl CommonArgs {
    /// Overlay command line flags on the environment configuration.
    pub fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(output) = &self.output {
            config.output_dir = output.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.batch.concurrency = concurrency;
        }
        if let Some(retries) = self.retries {
            config.batch.max_retries = retries;
        }
        if let Some(timeout) = self.timeout {
            config.batch.run_timeout_seconds = Some(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            config.http.user_agent = user_agent.clone();
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = parse_base_url(base_url)?;
        }
        Ok(())
    }

    pub fn selector(&self) -> Box<dyn LinkSelector> {
        if let Some(index) = self.link_index {
            Box::new(NthSelector::new(index))
        } else if let Some(needle) = &self.link_contains {
            Box::new(ContainsSelector::new(needle.clone()))
        } else {
            match &self.link_suffix {
                Some(suffix) => Box::new(SuffixSelector::new(suffix.clone())),
                None => Box::new(SuffixSelector::csv()),
            }
        }
    }
}

pub fn parse_date_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<Option<DateRange>> {
    match (from, to) {
        (Some(from), Some(to)) => DateRange::new(from, to).map(Some),
        (None, None) => Ok(None),
        _ => Err(anyhow!("--from and --to must be given together")),
    }
}
