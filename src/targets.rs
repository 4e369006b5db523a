//! URL templates turning a key into the page to scrape

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use url::form_urlencoded::byte_serialize;
use url::Url;

/// Date format the NSE report pages expect in `fromDate`/`toDate`.
pub const NSE_DATE_FORMAT: &str = "%d-%m-%Y";

const EQUITY_PATH: &str = "products/dynaContent/common/productsSymbolMapping.jsp";
const INDEX_PATH: &str = "products/dynaContent/equities/indices/historicalindices.jsp";

/// Builds the target URL for a key.
pub trait TargetTemplate: Send + Sync {
    fn target(&self, key: &str) -> Result<Url>;
}

impl<F> TargetTemplate for F
where
    F: Fn(&str) -> Result<Url> + Send + Sync,
{
    fn target(&self, key: &str) -> Result<Url> {
        self(key)
    }
}

/// Inclusive date window sent to the report pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self> {
        if from > to {
            return Err(anyhow!("Start date {} is after end date {}", from, to));
        }
        Ok(Self { from, to })
    }

    fn from_param(&self) -> String {
        self.from.format(NSE_DATE_FORMAT).to_string()
    }

    fn to_param(&self) -> String {
        self.to.format(NSE_DATE_FORMAT).to_string()
    }
}

/// Window of the bundled index scraper: 10-03-2014 .. 14-03-2014.
pub fn default_index_range() -> DateRange {
    DateRange {
        from: NaiveDate::from_ymd_opt(2014, 3, 10).unwrap_or(NaiveDate::MIN),
        to: NaiveDate::from_ymd_opt(2014, 3, 14).unwrap_or(NaiveDate::MIN),
    }
}

/// Period selection for the equity price/volume/deliverable report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EquityPeriod {
    /// Named period understood by the site, e.g. `3month`
    Named(String),
    Dates(DateRange),
}

impl Default for EquityPeriod {
    fn default() -> Self {
        EquityPeriod::Named("3month".to_string())
    }
}

/// Security-wise price, volume and deliverable position page.
#[derive(Debug, Clone)]
pub struct NseEquityTemplate {
    pub base_url: Url,
    pub period: EquityPeriod,
}

impl NseEquityTemplate {
    pub fn new(base_url: Url, period: EquityPeriod) -> Self {
        Self { base_url, period }
    }
}

impl TargetTemplate for NseEquityTemplate {
    fn target(&self, key: &str) -> Result<Url> {
        let (date_range, from, to) = match &self.period {
            EquityPeriod::Named(name) => (name.clone(), String::new(), String::new()),
            EquityPeriod::Dates(range) => (String::new(), range.from_param(), range.to_param()),
        };

        let mut url = self
            .base_url
            .join(EQUITY_PATH)
            .with_context(|| format!("Cannot join {} onto {}", EQUITY_PATH, self.base_url))?;
        url.query_pairs_mut()
            .append_pair("symbol", key)
            .append_pair("segmentLink", "3")
            .append_pair("symbolCount", "2")
            .append_pair("series", "ALL")
            .append_pair("dateRange", &date_range)
            .append_pair("fromDate", &from)
            .append_pair("toDate", &to)
            .append_pair("dataType", "PRICEVOLUMEDELIVERABLE");
        Ok(url)
    }
}

/// Historical sector index values page.
#[derive(Debug, Clone)]
pub struct NseIndexTemplate {
    pub base_url: Url,
    pub range: DateRange,
}

impl NseIndexTemplate {
    pub fn new(base_url: Url, range: DateRange) -> Self {
        Self { base_url, range }
    }
}

impl TargetTemplate for NseIndexTemplate {
    fn target(&self, key: &str) -> Result<Url> {
        let mut url = self
            .base_url
            .join(INDEX_PATH)
            .with_context(|| format!("Cannot join {} onto {}", INDEX_PATH, self.base_url))?;
        url.query_pairs_mut()
            .append_pair("indexType", key)
            .append_pair("fromDate", &self.range.from_param())
            .append_pair("toDate", &self.range.to_param());
        Ok(url)
    }
}

/// Free-form template with a `{key}` placeholder. The key is form-encoded
/// before substitution.
#[derive(Debug, Clone)]
pub struct PlaceholderTemplate {
    pattern: String,
}

impl PlaceholderTemplate {
    pub const PLACEHOLDER: &'static str = "{key}";

    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if !pattern.contains(Self::PLACEHOLDER) {
            return Err(anyhow!(
                "URL template '{}' has no {} placeholder",
                pattern,
                Self::PLACEHOLDER
            ));
        }
        Ok(Self { pattern })
    }
}

impl TargetTemplate for PlaceholderTemplate {
    fn target(&self, key: &str) -> Result<Url> {
        let encoded: String = byte_serialize(key.as_bytes()).collect();
        let raw = self.pattern.replace(Self::PLACEHOLDER, &encoded);
        Url::parse(&raw).with_context(|| format!("Template produced an invalid URL: {}", raw))
    }
}
