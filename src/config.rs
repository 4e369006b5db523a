//! Centralized configuration management for nsefetch

use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, Context};
use url::Url;

/// User agent the original scrapers identified as.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_8_2) AppleWebKit/537.11 (KHTML, like Gecko) Chrome/23.0.1271.97 Safari/537.11";

pub const DEFAULT_BASE_URL: &str = "http://www.nseindia.com/";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory artifacts are written to
    pub output_dir: PathBuf,
    /// Site root used by the URL templates and to resolve relative links
    pub base_url: Url,
    /// Batch execution settings
    pub batch: BatchConfig,
    /// HTTP client configuration
    pub http: HttpConfig,
}

/// Batch execution configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Number of keys processed at once
    pub concurrency: usize,
    /// Retries after a page load or fetch failure
    pub max_retries: u32,
    /// Base delay between retries (milliseconds), doubled on each attempt
    pub retry_backoff_ms: u64,
    /// Abort the whole batch after this many seconds
    pub run_timeout_seconds: Option<u64>,
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// User agent string
    pub user_agent: String,
    /// Time given to client-side scripts after navigation (milliseconds)
    pub render_wait_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            max_retries: 2,
            retry_backoff_ms: 500,
            run_timeout_seconds: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            render_wait_ms: 2000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables and defaults
    pub fn from_env() -> Result<Self> {
        let output_dir = std::env::var("NSEFETCH_OUTPUT_DIR")
            .unwrap_or_else(|_| ".".to_string())
            .into();

        let base_url = std::env::var("NSEFETCH_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let base_url = parse_base_url(&base_url)?;

        let batch = BatchConfig {
            concurrency: parse_env_var("NSEFETCH_CONCURRENCY")?.unwrap_or(1),
            max_retries: parse_env_var("NSEFETCH_MAX_RETRIES")?.unwrap_or(2),
            retry_backoff_ms: parse_env_var("NSEFETCH_RETRY_BACKOFF_MS")?.unwrap_or(500),
            run_timeout_seconds: parse_env_var("NSEFETCH_RUN_TIMEOUT_SECONDS")?,
        };

        let http = HttpConfig {
            timeout_seconds: parse_env_var("NSEFETCH_HTTP_TIMEOUT_SECONDS")?.unwrap_or(30),
            user_agent: std::env::var("NSEFETCH_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            render_wait_ms: parse_env_var("NSEFETCH_RENDER_WAIT_MS")?.unwrap_or(2000),
        };

        Ok(Config {
            output_dir,
            base_url,
            batch,
            http,
        })
    }

    /// Get HTTP timeout as Duration
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_seconds)
    }

    /// Get render settle time as Duration
    pub fn render_wait(&self) -> Duration {
        Duration::from_millis(self.http.render_wait_ms)
    }

    /// Get retry backoff base as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.batch.retry_backoff_ms)
    }

    /// Get the run-level timeout, if any
    pub fn run_timeout(&self) -> Option<Duration> {
        self.batch.run_timeout_seconds.map(Duration::from_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch.concurrency == 0 {
            return Err(anyhow::anyhow!("Concurrency must be at least 1"));
        }

        // Check if output directory can be created
        std::fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Cannot create output directory: {}", self.output_dir.display()))?;

        Ok(())
    }
}

/// Parse a site root, making sure relative joins land under it.
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let mut raw = raw.trim().to_string();
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).with_context(|| format!("Invalid base URL: {}", raw))
}

/// Helper function to parse environment variable as a specific type
fn parse_env_var<T>(var_name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display + Send + Sync + std::error::Error + 'static,
{
    match std::env::var(var_name) {
        Ok(val) => val.parse().map(Some).with_context(|| {
            format!("Failed to parse environment variable {} = '{}'", var_name, val)
        }),
        Err(_) => Ok(None),
    }
}
