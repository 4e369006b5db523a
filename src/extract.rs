//! Anchor scraping and download link selection

use scraper::{Html, Selector};
use url::Url;

use crate::errors::SelectError;
use crate::models::DownloadLink;

/// Raw `href` values of every `<a>` element, in document order.
pub fn anchor_hrefs(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let anchor_selector = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return Vec::new(),
    };

    document
        .select(&anchor_selector)
        .filter_map(|element| element.value().attr("href"))
        .map(|href| href.trim().to_string())
        .collect()
}

/// Resolve hrefs against the site root. Fragments, `javascript:` and
/// `mailto:` links are dropped; only http(s) links survive.
pub fn resolve_links(base: &Url, hrefs: &[String]) -> Vec<Url> {
    hrefs
        .iter()
        .filter(|href| !href.is_empty() && !href.starts_with('#'))
        .filter_map(|href| base.join(href).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

/// Picks the single download link out of a page's anchors.
pub trait LinkSelector: Send + Sync {
    /// Human-readable rule, used in error messages.
    fn describe(&self) -> String;

    fn select(&self, links: &[Url]) -> Result<DownloadLink, SelectError>;

    /// Select from raw hrefs in document order. By default the hrefs are
    /// resolved against `base` first and non-http(s) links dropped.
    fn select_anchors(&self, base: &Url, hrefs: &[String]) -> Result<DownloadLink, SelectError> {
        self.select(&resolve_links(base, hrefs))
    }
}

/// Exactly one distinct link whose path ends with the suffix.
#[derive(Debug, Clone)]
pub struct SuffixSelector {
    suffix: String,
}

impl SuffixSelector {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into().to_lowercase(),
        }
    }

    pub fn csv() -> Self {
        Self::new(".csv")
    }
}

impl LinkSelector for SuffixSelector {
    fn describe(&self) -> String {
        format!("path suffix '{}'", self.suffix)
    }

    fn select(&self, links: &[Url]) -> Result<DownloadLink, SelectError> {
        single_match(self.describe(), links, |url| {
            url.path().to_lowercase().ends_with(&self.suffix)
        })
    }
}

/// Exactly one distinct link containing the substring anywhere.
#[derive(Debug, Clone)]
pub struct ContainsSelector {
    needle: String,
}

impl ContainsSelector {
    pub fn new(needle: impl Into<String>) -> Self {
        Self {
            needle: needle.into(),
        }
    }
}

impl LinkSelector for ContainsSelector {
    fn describe(&self) -> String {
        format!("substring '{}'", self.needle)
    }

    fn select(&self, links: &[Url]) -> Result<DownloadLink, SelectError> {
        single_match(self.describe(), links, |url| url.as_str().contains(&self.needle))
    }
}

/// Fixed position among the page's anchors, in document order.
///
/// Positions count every `<a href>`, fragments and `javascript:` links
/// included. The chosen anchor must still resolve to an http(s) link.
#[derive(Debug, Clone, Copy)]
pub struct NthSelector {
    index: usize,
}

impl NthSelector {
    pub fn new(index: usize) -> Self {
        Self { index }
    }
}

impl LinkSelector for NthSelector {
    fn describe(&self) -> String {
        format!("anchor #{}", self.index)
    }

    fn select(&self, links: &[Url]) -> Result<DownloadLink, SelectError> {
        links
            .get(self.index)
            .map(|url| DownloadLink(url.clone()))
            .ok_or_else(|| SelectError::NoMatch {
                rule: self.describe(),
            })
    }

    fn select_anchors(&self, base: &Url, hrefs: &[String]) -> Result<DownloadLink, SelectError> {
        let chosen = hrefs.get(self.index).ok_or_else(|| SelectError::NoMatch {
            rule: self.describe(),
        })?;
        resolve_links(base, std::slice::from_ref(chosen))
            .into_iter()
            .next()
            .map(DownloadLink)
            .ok_or_else(|| SelectError::NoMatch {
                rule: format!("{} ('{}' is not a download link)", self.describe(), chosen),
            })
    }
}

fn single_match<P>(rule: String, links: &[Url], predicate: P) -> Result<DownloadLink, SelectError>
where
    P: Fn(&Url) -> bool,
{
    let mut matches: Vec<&Url> = Vec::new();
    for url in links.iter().filter(|url| predicate(*url)) {
        if !matches.contains(&url) {
            matches.push(url);
        }
    }

    match matches.as_slice() {
        [] => Err(SelectError::NoMatch { rule }),
        [only] => Ok(DownloadLink((*only).clone())),
        many => Err(SelectError::Ambiguous {
            rule,
            count: many.len(),
        }),
    }
}
