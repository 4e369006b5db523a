//! Page loading: plain HTTP or rendered through headless Chrome

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::extract;

/// HTML of a loaded page, after client-side rendering where applicable.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub url: Url,
    pub html: String,
}

impl PageContent {
    pub fn new(url: Url, html: impl Into<String>) -> Self {
        Self {
            url,
            html: html.into(),
        }
    }

    pub fn anchor_hrefs(&self) -> Vec<String> {
        extract::anchor_hrefs(&self.html)
    }

    /// Anchor targets resolved against `base`, in document order.
    pub fn links(&self, base: &Url) -> Vec<Url> {
        extract::resolve_links(base, &self.anchor_hrefs())
    }
}

/// Retrieves a target page.
#[async_trait]
pub trait PageLoader: Send + Sync {
    async fn load(&self, target: &Url) -> Result<PageContent>;
}

/// Loads raw server HTML without running scripts.
pub struct HttpPageLoader {
    client: Client,
}

impl HttpPageLoader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageLoader for HttpPageLoader {
    async fn load(&self, target: &Url) -> Result<PageContent> {
        debug!("Fetching page: {}", target);
        let response = self
            .client
            .get(target.clone())
            .header("Accept", "text/html,application/xhtml+xml")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("HTTP {}", response.status()));
        }

        let html = response.text().await?;
        Ok(PageContent::new(target.clone(), html))
    }
}

#[cfg(feature = "browser")]
pub use browser::BrowserPageLoader;

#[cfg(feature = "browser")]
mod browser {
    use super::{PageContent, PageLoader};
    use anyhow::{Context, Result};
    use async_trait::async_trait;
    use headless_chrome::{Browser, LaunchOptions};
    use std::ffi::OsStr;
    use std::time::Duration;
    use tracing::{debug, info, warn};
    use url::Url;

    /// Renders pages in headless Chrome and returns the settled DOM.
    ///
    /// The browser process lives as long as this value; dropping the loader
    /// shuts Chrome down. Each load uses its own tab, so loads may overlap.
    pub struct BrowserPageLoader {
        browser: Browser,
        user_agent: String,
        navigation_timeout: Duration,
        settle: Duration,
    }

    impl BrowserPageLoader {
        pub fn launch(user_agent: &str, navigation_timeout: Duration, settle: Duration) -> Result<Self> {
            info!("Launching headless Chrome browser");

            let options = LaunchOptions {
                headless: true,
                sandbox: false,
                idle_browser_timeout: Duration::from_secs(600),
                args: vec![
                    OsStr::new("--disable-dev-shm-usage"),
                    OsStr::new("--window-size=1280,1024"),
                ],
                ..Default::default()
            };

            let browser = Browser::new(options)
                .context("Failed to launch headless Chrome. Is Chrome/Chromium installed?")?;

            Ok(Self {
                browser,
                user_agent: user_agent.to_string(),
                navigation_timeout,
                settle,
            })
        }
    }

    struct RenderJob {
        browser: Browser,
        user_agent: String,
        navigation_timeout: Duration,
        settle: Duration,
        target: Url,
    }

    impl RenderJob {
        fn run(self) -> Result<String> {
            let tab = self.browser.new_tab().context("Failed to create new browser tab")?;
            tab.set_default_timeout(self.navigation_timeout);
            tab.set_user_agent(&self.user_agent, None, None)
                .context("Failed to set user agent")?;

            let rendered = tab
                .navigate_to(self.target.as_str())
                .and_then(|tab| tab.wait_until_navigated())
                .context("Navigation failed")
                .and_then(|tab| {
                    // Links on the report pages are injected by scripts after load.
                    std::thread::sleep(self.settle);
                    tab.get_content().context("Failed to read rendered page content")
                });

            if let Err(e) = tab.close(true) {
                warn!("Failed to close tab for {}: {}", self.target, e);
            }
            rendered
        }
    }

    #[async_trait]
    impl PageLoader for BrowserPageLoader {
        async fn load(&self, target: &Url) -> Result<PageContent> {
            debug!("Rendering page: {}", target);
            let job = RenderJob {
                browser: self.browser.clone(),
                user_agent: self.user_agent.clone(),
                navigation_timeout: self.navigation_timeout,
                settle: self.settle,
                target: target.clone(),
            };
            let html = tokio::task::spawn_blocking(move || job.run())
                .await
                .context("Render task failed")??;
            Ok(PageContent::new(target.clone(), html))
        }
    }
}
