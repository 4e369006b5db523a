//! Batch fetch-extract-download driver

use anyhow::Result;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::errors::KeyError;
use crate::extract::LinkSelector;
use crate::fetch::{build_client, Fetcher, HttpFetcher};
use crate::models::{Artifact, BatchReport, Key, KeyFailure, KeyOutcome, KeyState};
#[cfg(feature = "browser")]
use crate::page::BrowserPageLoader;
use crate::page::{HttpPageLoader, PageLoader};
use crate::targets::TargetTemplate;

/// Maps a key to the file its artifact is written to.
pub trait Namer: Send + Sync {
    fn artifact_path(&self, key: &str) -> PathBuf;
}

impl<F> Namer for F
where
    F: Fn(&str) -> PathBuf + Send + Sync,
{
    fn artifact_path(&self, key: &str) -> PathBuf {
        self(key)
    }
}

/// `<dir>/<Key>.csv`
#[derive(Debug, Clone)]
pub struct CsvNamer {
    dir: PathBuf,
}

impl CsvNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Namer for CsvNamer {
    fn artifact_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", key))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Keys in flight at once; 1 processes strictly in list order
    pub concurrency: usize,
    /// Extra attempts for page loads and fetches
    pub max_retries: u32,
    /// First retry delay, doubled per attempt
    pub retry_backoff: Duration,
    /// Whole-batch deadline
    pub run_timeout: Option<Duration>,
    /// Root that scraped hrefs are resolved against; the page URL when unset
    pub link_base: Option<Url>,
}

impl BatchOptions {
    pub fn new(link_base: Option<Url>) -> Self {
        Self {
            concurrency: 1,
            max_retries: 2,
            retry_backoff: Duration::from_millis(500),
            run_timeout: None,
            link_base,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.batch.concurrency.max(1),
            max_retries: config.batch.max_retries,
            retry_backoff: config.retry_backoff(),
            run_timeout: config.run_timeout(),
            link_base: Some(config.base_url.clone()),
        }
    }
}

/// Runs one fetch-extract-download cycle per key.
///
/// Owns the page loader and fetcher for the duration of the batch; dropping
/// the downloader releases them (for the browser loader, the Chrome process).
pub struct BatchDownloader<L, F> {
    loader: L,
    fetcher: F,
    options: BatchOptions,
}

impl<L, F> BatchDownloader<L, F>
where
    L: PageLoader,
    F: Fetcher,
{
    pub fn new(loader: L, fetcher: F, options: BatchOptions) -> Self {
        Self {
            loader,
            fetcher,
            options,
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Process every key and report per-key outcomes in input order.
    ///
    /// A failing key never stops the others. Each task carries its own key
    /// and slot position from creation, so completion order cannot mix up
    /// which artifact belongs to which key. On run timeout every key without
    /// an outcome is reported as timed out.
    pub async fn run(
        &self,
        keys: &[Key],
        template: &dyn TargetTemplate,
        selector: &dyn LinkSelector,
        namer: &dyn Namer,
    ) -> BatchReport {
        if keys.is_empty() {
            info!("No keys to process");
            return BatchReport::default();
        }

        let total = keys.len();
        let concurrency = self.options.concurrency.max(1);
        info!(
            "Starting batch of {} keys (concurrency {}, link rule: {})",
            total,
            concurrency,
            selector.describe()
        );

        let mut slots: Vec<Option<KeyOutcome>> = keys.iter().map(|_| None).collect();

        let drain = async {
            let mut outcomes = stream::iter(keys.iter().enumerate())
                .map(move |(position, key)| async move {
                    let outcome = self
                        .process_key(position, total, key, template, selector, namer)
                        .await;
                    (position, outcome)
                })
                .buffer_unordered(concurrency);

            while let Some((position, outcome)) = outcomes.next().await {
                slots[position] = Some(outcome);
            }
        };

        match self.options.run_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, drain).await.is_err() {
                    warn!("Batch timed out after {:?}; unfinished keys are abandoned", limit);
                }
            }
            None => drain.await,
        }

        let outcomes = keys
            .iter()
            .zip(slots)
            .map(|(key, slot)| {
                slot.unwrap_or_else(|| {
                    transition(key, KeyState::Failed);
                    KeyOutcome::Failed(KeyFailure {
                        key: key.clone(),
                        error: KeyError::Timeout,
                    })
                })
            })
            .collect();

        let report = BatchReport { outcomes };
        info!(
            "Batch finished: {} written, {} failed",
            report.success_count(),
            report.failure_count()
        );
        report
    }

    async fn process_key(
        &self,
        position: usize,
        total: usize,
        key: &str,
        template: &dyn TargetTemplate,
        selector: &dyn LinkSelector,
        namer: &dyn Namer,
    ) -> KeyOutcome {
        info!("Processing key {}/{}: {}", position + 1, total, key);
        transition(key, KeyState::Pending);

        match self.cycle(key, template, selector, namer).await {
            Ok(artifact) => {
                info!("✓ {} -> {} ({} bytes)", key, artifact.path.display(), artifact.bytes);
                KeyOutcome::Written(artifact)
            }
            Err(error) => {
                transition(key, KeyState::Failed);
                warn!("✗ {} failed: {}", key, error);
                KeyOutcome::Failed(KeyFailure {
                    key: key.to_string(),
                    error,
                })
            }
        }
    }

    async fn cycle(
        &self,
        key: &str,
        template: &dyn TargetTemplate,
        selector: &dyn LinkSelector,
        namer: &dyn Namer,
    ) -> Result<Artifact, KeyError> {
        let target = template
            .target(key)
            .map_err(|e| KeyError::InvalidTarget(format!("{:#}", e)))?;
        let target = &target;
        let path = namer.artifact_path(key);
        check_file_name(key, &path)?;

        transition(key, KeyState::Loading);
        let page = self
            .with_retries(key, "page load", move || async move {
                self.loader.load(target).await.map_err(|e| KeyError::PageLoad {
                    url: target.to_string(),
                    reason: format!("{:#}", e),
                })
            })
            .await?;

        let base = self.options.link_base.as_ref().unwrap_or(&page.url);
        let hrefs = page.anchor_hrefs();
        debug!("{}: {} anchors on {}", key, hrefs.len(), page.url);
        let link = selector.select_anchors(base, &hrefs)?;
        transition(key, KeyState::LinkExtracted);
        debug!("{}: download link {}", key, link);

        transition(key, KeyState::Fetching);
        let link_url = link.url();
        let bytes = self
            .with_retries(key, "fetch", move || async move {
                self.fetcher.fetch(link_url, target).await.map_err(|e| KeyError::Fetch {
                    url: link_url.to_string(),
                    reason: format!("{:#}", e),
                })
            })
            .await?;

        write_artifact(&path, &bytes).await?;
        transition(key, KeyState::Written);

        Ok(Artifact {
            key: key.to_string(),
            path,
            source: link,
            bytes: bytes.len(),
        })
    }

    /// Retry transient failures with exponential backoff. Non-transient
    /// errors are returned on first sight.
    async fn with_retries<T, Op, Fut>(&self, key: &str, stage: &str, mut op: Op) -> Result<T, KeyError>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, KeyError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt < self.options.max_retries => {
                    let delay = backoff_delay(self.options.retry_backoff, attempt);
                    attempt += 1;
                    warn!(
                        "{} {} failed (attempt {}/{}): {}; retrying in {:?}",
                        key,
                        stage,
                        attempt,
                        self.options.max_retries + 1,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Run a batch with the HTTP stack described by `config`.
///
/// With `render` set (and the `browser` feature enabled) pages are rendered
/// in headless Chrome; otherwise they are fetched as plain HTML. The browser
/// and HTTP client live only for the duration of this call.
pub async fn download_keys(
    config: &Config,
    options: BatchOptions,
    render: bool,
    keys: &[Key],
    template: &dyn TargetTemplate,
    selector: &dyn LinkSelector,
) -> Result<BatchReport> {
    let namer = CsvNamer::new(&config.output_dir);
    if keys.is_empty() {
        info!("No keys to process");
        return Ok(BatchReport::default());
    }

    let client = build_client(&config.http.user_agent, config.http_timeout())?;
    let fetcher = HttpFetcher::new(client.clone());

    if render {
        #[cfg(feature = "browser")]
        {
            let loader = BrowserPageLoader::launch(
                &config.http.user_agent,
                config.http_timeout(),
                config.render_wait(),
            )?;
            let downloader = BatchDownloader::new(loader, fetcher, options);
            return Ok(downloader.run(keys, template, selector, &namer).await);
        }
        #[cfg(not(feature = "browser"))]
        warn!("Built without the browser feature; loading pages without rendering");
    }

    let downloader = BatchDownloader::new(HttpPageLoader::new(client), fetcher, options);
    Ok(downloader.run(keys, template, selector, &namer).await)
}

fn transition(key: &str, state: KeyState) {
    debug!("{} -> {}", key, state);
}

/// `base * 2^attempt`, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// A key becomes a file name, so it must be a single plain path component.
fn check_file_name(key: &str, path: &Path) -> Result<(), KeyError> {
    let mut components = Path::new(key).components();
    let plain = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !key.contains(|c: char| c == '/' || c == '\\');

    if plain {
        Ok(())
    } else {
        Err(KeyError::Write {
            path: path.to_path_buf(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("key '{}' is not a plain file name", key),
            ),
        })
    }
}

/// Write through a `.part` sibling and rename, so an interrupted write never
/// leaves a truncated artifact under the final name.
async fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), KeyError> {
    let write_error = |source: std::io::Error| KeyError::Write {
        path: path.to_path_buf(),
        source,
    };

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            write_error(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "artifact path has no file name",
            ))
        })?;
    let partial = path.with_file_name(format!("{}.part", file_name));

    tokio::fs::write(&partial, bytes).await.map_err(write_error)?;
    if let Err(source) = tokio::fs::rename(&partial, path).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(write_error(source));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SuffixSelector;
    use crate::page::PageContent;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const SITE: &str = "http://stub.test/";

    fn page_url(key: &str) -> Result<Url> {
        Ok(Url::parse(SITE)?.join(&format!("page/{}", key))?)
    }

    fn csv_page(key: &str) -> String {
        format!(
            r#"<html><body><a href="/">Home</a><a href="/data/{key}.csv">Download</a></body></html>"#
        )
    }

    /// Serves canned pages keyed by target URL. Keys listed in `flaky` fail
    /// that many times before succeeding; keys in `delays` answer late.
    #[derive(Default)]
    struct StubLoader {
        pages: HashMap<String, String>,
        flaky: Mutex<HashMap<String, usize>>,
        delays: HashMap<String, Duration>,
        loads: Arc<AtomicUsize>,
    }

    impl StubLoader {
        fn with_keys(keys: &[&str]) -> Self {
            let mut loader = StubLoader::default();
            for key in keys {
                loader.set_page(key, csv_page(key));
            }
            loader
        }

        fn set_page(&mut self, key: &str, html: String) {
            self.pages.insert(page_url(key).unwrap().to_string(), html);
        }
    }

    #[async_trait]
    impl PageLoader for StubLoader {
        async fn load(&self, target: &Url) -> Result<PageContent> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let key = target.path().trim_start_matches("/page/").to_string();

            if let Some(delay) = self.delays.get(&key) {
                tokio::time::sleep(*delay).await;
            }

            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(remaining) = flaky.get_mut(&key) {
                    if *remaining > 0 {
                        *remaining -= 1;
                        return Err(anyhow!("connection reset"));
                    }
                }
            }

            self.pages
                .get(target.as_str())
                .map(|html| PageContent::new(target.clone(), html.clone()))
                .ok_or_else(|| anyhow!("HTTP 404 Not Found"))
        }
    }

    /// Returns a payload derived from the requested file name.
    #[derive(Default)]
    struct StubFetcher {
        fetches: Arc<AtomicUsize>,
        broken: Vec<String>,
    }

    fn payload(key: &str) -> Vec<u8> {
        format!("Symbol,Close\n{},100.0\n", key).into_bytes()
    }

    #[async_trait]
    impl Fetcher for StubFetcher {
        async fn fetch(&self, link: &Url, _referer: &Url) -> Result<Vec<u8>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let file = link.path().trim_start_matches("/data/").trim_end_matches(".csv");
            if self.broken.iter().any(|b| b == file) {
                return Err(anyhow!("HTTP 500"));
            }
            Ok(payload(file))
        }
    }

    fn options() -> BatchOptions {
        let mut options = BatchOptions::new(Some(Url::parse(SITE).unwrap()));
        options.retry_backoff = Duration::from_millis(1);
        options
    }

    fn keys(list: &[&str]) -> Vec<Key> {
        list.iter().map(|k| k.to_string()).collect()
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_writes_one_file_per_key() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = BatchDownloader::new(
            StubLoader::with_keys(&["FOO", "BAR"]),
            StubFetcher::default(),
            options(),
        );

        let report = downloader
            .run(
                &keys(&["FOO", "BAR"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert!(report.is_success());
        assert_eq!(files_in(temp_dir.path()), vec!["BAR.csv", "FOO.csv"]);
        assert_eq!(std::fs::read(temp_dir.path().join("FOO.csv")).unwrap(), payload("FOO"));
        assert_eq!(std::fs::read(temp_dir.path().join("BAR.csv")).unwrap(), payload("BAR"));

        let artifact = report.artifacts().next().unwrap();
        assert_eq!(artifact.key, "FOO");
        assert_eq!(artifact.source.as_str(), "http://stub.test/data/FOO.csv");
        assert_eq!(report.into_result().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_missing_link_fails_only_that_key() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::with_keys(&["FOO"]);
        loader.set_page("BAR", r#"<html><a href="/about.html">About</a></html>"#.to_string());
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), options());

        let report = downloader
            .run(
                &keys(&["FOO", "BAR"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert_eq!(report.success_count(), 1);
        assert_eq!(report.failure_count(), 1);
        assert_eq!(files_in(temp_dir.path()), vec!["FOO.csv"]);

        let failures = report.into_result().unwrap_err();
        assert_eq!(failures[0].key, "BAR");
        assert_eq!(failures[0].error.kind(), "LinkExtractionError");
    }

    #[tokio::test]
    async fn test_ambiguous_links_fail_without_retry() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::with_keys(&["FOO"]);
        loader.set_page(
            "BAR",
            r#"<a href="/data/BAR.csv">a</a><a href="/data/BAR_old.csv">b</a>"#.to_string(),
        );
        let loads = loader.loads.clone();
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), options());

        let report = downloader
            .run(
                &keys(&["BAR", "FOO"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert_eq!(loads.load(Ordering::SeqCst), 2);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.key, "BAR");
        assert!(matches!(
            failure.error,
            KeyError::LinkExtraction(crate::errors::SelectError::Ambiguous { count: 2, .. })
        ));
        assert!(temp_dir.path().join("FOO.csv").exists());
    }

    #[tokio::test]
    async fn test_empty_batch_makes_no_calls() {
        let temp_dir = TempDir::new().unwrap();
        let loader = StubLoader::default();
        let fetcher = StubFetcher::default();
        let loads = loader.loads.clone();
        let fetches = fetcher.fetches.clone();
        let downloader = BatchDownloader::new(loader, fetcher, options());

        let report = downloader
            .run(&[], &page_url, &SuffixSelector::csv(), &CsvNamer::new(temp_dir.path()))
            .await;

        assert_eq!(report.into_result().unwrap(), 0);
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert_eq!(fetches.load(Ordering::SeqCst), 0);
        assert!(files_in(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_rerun_overwrites_same_files() {
        let temp_dir = TempDir::new().unwrap();
        let downloader = BatchDownloader::new(
            StubLoader::with_keys(&["FOO", "BAR"]),
            StubFetcher::default(),
            options(),
        );
        let namer = CsvNamer::new(temp_dir.path());
        let batch = keys(&["FOO", "BAR"]);

        downloader.run(&batch, &page_url, &SuffixSelector::csv(), &namer).await;
        let first = std::fs::read(temp_dir.path().join("FOO.csv")).unwrap();
        let report = downloader.run(&batch, &page_url, &SuffixSelector::csv(), &namer).await;

        assert!(report.is_success());
        assert_eq!(files_in(temp_dir.path()), vec!["BAR.csv", "FOO.csv"]);
        assert_eq!(std::fs::read(temp_dir.path().join("FOO.csv")).unwrap(), first);
    }

    #[tokio::test]
    async fn test_out_of_order_completion_keeps_key_to_file_mapping() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::with_keys(&["AAA", "BBB", "CCC", "DDD"]);
        // First keys finish last.
        loader.delays.insert("AAA".into(), Duration::from_millis(120));
        loader.delays.insert("BBB".into(), Duration::from_millis(80));
        loader.delays.insert("CCC".into(), Duration::from_millis(40));
        let mut opts = options();
        opts.concurrency = 4;
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), opts);
        let namer = CsvNamer::new(temp_dir.path());

        for order in [
            ["AAA", "BBB", "CCC", "DDD"],
            ["DDD", "CCC", "BBB", "AAA"],
            ["CCC", "AAA", "DDD", "BBB"],
        ] {
            let batch = keys(&order);
            let report = downloader.run(&batch, &page_url, &SuffixSelector::csv(), &namer).await;

            let reported: Vec<&str> = report.outcomes.iter().map(|o| o.key()).collect();
            assert_eq!(reported, order.to_vec());
            for key in order {
                let written = std::fs::read(temp_dir.path().join(format!("{}.csv", key))).unwrap();
                assert_eq!(written, payload(key));
            }
        }
    }

    #[tokio::test]
    async fn test_transient_page_failures_are_retried() {
        let temp_dir = TempDir::new().unwrap();
        let loader = StubLoader::with_keys(&["FOO", "BAR"]);
        loader.flaky.lock().unwrap().insert("FOO".into(), 2);
        loader.flaky.lock().unwrap().insert("BAR".into(), 3);
        let loads = loader.loads.clone();
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), options());

        let report = downloader
            .run(
                &keys(&["FOO", "BAR"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        // FOO: two failures then success. BAR: three failures exhaust 1 + 2 attempts.
        assert_eq!(loads.load(Ordering::SeqCst), 6);
        assert!(report.outcomes[0].is_success());
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.key, "BAR");
        assert_eq!(failure.error.kind(), "PageLoadError");
    }

    #[tokio::test]
    async fn test_fetch_failure_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = StubFetcher {
            broken: vec!["BAR".into()],
            ..Default::default()
        };
        let fetches = fetcher.fetches.clone();
        let downloader = BatchDownloader::new(StubLoader::with_keys(&["FOO", "BAR"]), fetcher, options());

        let report = downloader
            .run(
                &keys(&["FOO", "BAR"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1 + 3);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.key, "BAR");
        assert!(matches!(failure.error, KeyError::Fetch { .. }));
        assert_eq!(files_in(temp_dir.path()), vec!["FOO.csv"]);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_retried() {
        let temp_dir = TempDir::new().unwrap();
        let fetcher = StubFetcher::default();
        let fetches = fetcher.fetches.clone();
        let downloader = BatchDownloader::new(StubLoader::with_keys(&["FOO"]), fetcher, options());
        let missing_dir = temp_dir.path().join("does-not-exist");

        let report = downloader
            .run(
                &keys(&["FOO"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(&missing_dir),
            )
            .await;

        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.error.kind(), "WriteError");
        assert!(files_in(temp_dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_invalid_target_is_a_key_failure() {
        let temp_dir = TempDir::new().unwrap();
        let template = |key: &str| -> Result<Url> {
            if key == "BAD" {
                Err(anyhow!("no template for {}", key))
            } else {
                page_url(key)
            }
        };
        let loader = StubLoader::with_keys(&["FOO"]);
        let loads = loader.loads.clone();
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), options());

        let report = downloader
            .run(
                &keys(&["BAD", "FOO"]),
                &template,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let failure = report.failures().next().unwrap();
        assert!(matches!(failure.error, KeyError::InvalidTarget(_)));
        assert!(report.outcomes[1].is_success());
    }

    #[tokio::test]
    async fn test_run_timeout_marks_unfinished_keys() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::with_keys(&["FAST", "SLOW", "NEXT"]);
        loader.delays.insert("SLOW".into(), Duration::from_secs(30));
        let mut opts = options();
        opts.concurrency = 1;
        opts.run_timeout = Some(Duration::from_millis(300));
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), opts);

        let report = downloader
            .run(
                &keys(&["FAST", "SLOW", "NEXT"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        assert!(report.outcomes[0].is_success());
        let timed_out: Vec<&str> = report
            .failures()
            .filter(|f| matches!(f.error, KeyError::Timeout))
            .map(|f| f.key.as_str())
            .collect();
        assert_eq!(timed_out, vec!["SLOW", "NEXT"]);
        assert_eq!(files_in(temp_dir.path()), vec!["FAST.csv"]);
    }

    #[tokio::test]
    async fn test_relative_links_resolve_against_page_without_base() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::default();
        loader.set_page("FOO", r#"<a href="export/FOO.csv">csv</a>"#.to_string());
        let mut opts = options();
        opts.link_base = None;
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), opts);

        let report = downloader
            .run(
                &keys(&["FOO"]),
                &page_url,
                &SuffixSelector::csv(),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        let artifact = report.artifacts().next().unwrap();
        assert_eq!(artifact.source.as_str(), "http://stub.test/page/export/FOO.csv");
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        std::fs::create_dir(&out).unwrap();
        let absolute = temp_dir.path().join("EVIL").to_string_lossy().to_string();

        let loader = StubLoader::with_keys(&["FOO"]);
        let fetcher = StubFetcher::default();
        let fetches = fetcher.fetches.clone();
        let downloader = BatchDownloader::new(loader, fetcher, options());
        let batch = vec![absolute, "../ESCAPE".to_string(), "..".to_string(), "FOO".to_string()];

        let report = downloader
            .run(&batch, &page_url, &SuffixSelector::csv(), &CsvNamer::new(&out))
            .await;

        assert_eq!(report.failure_count(), 3);
        for failure in report.failures() {
            assert_eq!(failure.error.kind(), "WriteError");
            match &failure.error {
                KeyError::Write { source, .. } => {
                    assert_eq!(source.kind(), std::io::ErrorKind::InvalidInput)
                }
                other => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert_eq!(files_in(&out), vec!["FOO.csv"]);
        assert_eq!(files_in(temp_dir.path()), vec!["out"]);
    }

    #[tokio::test]
    async fn test_link_index_counts_raw_anchors() {
        let temp_dir = TempDir::new().unwrap();
        let mut loader = StubLoader::default();
        loader.set_page(
            "FOO",
            r##"<a href="#top">Top</a><a href="/">Home</a><a href="/data/FOO.csv">csv</a>"##
                .to_string(),
        );
        let downloader = BatchDownloader::new(loader, StubFetcher::default(), options());

        let report = downloader
            .run(
                &keys(&["FOO"]),
                &page_url,
                &crate::extract::NthSelector::new(2),
                &CsvNamer::new(temp_dir.path()),
            )
            .await;

        let artifact = report.artifacts().next().unwrap();
        assert_eq!(artifact.source.as_str(), "http://stub.test/data/FOO.csv");
    }

    #[test]
    fn test_backoff_saturates() {
        assert_eq!(backoff_delay(Duration::from_millis(500), 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(Duration::from_millis(500), 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(Duration::MAX, 3), Duration::MAX);
        assert_eq!(backoff_delay(Duration::from_secs(u64::MAX / 2), 2), Duration::MAX);
    }

    #[test]
    fn test_csv_namer() {
        let namer = CsvNamer::new("/tmp/out");
        assert_eq!(namer.artifact_path("CNX AUTO"), PathBuf::from("/tmp/out/CNX AUTO.csv"));
    }
}
