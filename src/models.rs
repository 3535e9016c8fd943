//! Core data types shared by every fetch path.
//!
//! `PageData` is the single result shape produced by the static, dynamic,
//! and hybrid scrapers so downstream consumers are mode-agnostic.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// Scraped data from a single web page.
///
/// Produced once per fetch and immutable after construction. Callers own
/// the value they receive; there is no shared mutable state after return.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageData {
    pub url: String,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub html: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scripts: Vec<String>,
    pub fetched_at: SystemTime,
    pub response_time_ms: u64,
}

impl Default for PageData {
    fn default() -> Self {
        Self {
            url: String::new(),
            status_code: 0,
            title: String::new(),
            content: String::new(),
            html: String::new(),
            headers: HashMap::new(),
            metadata: HashMap::new(),
            links: Vec::new(),
            images: Vec::new(),
            scripts: Vec::new(),
            fetched_at: SystemTime::UNIX_EPOCH,
            response_time_ms: 0,
        }
    }
}

impl PageData {
    /// Create an empty result for the given URL with timestamp set to now.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fetched_at: SystemTime::now(),
            ..Self::default()
        }
    }

    /// Approximate in-memory cost of the textual fields, used by the cache
    /// for size accounting.
    #[must_use]
    pub fn byte_cost(&self) -> usize {
        self.html.len() + self.content.len() + self.title.len()
    }
}

/// Which fetch path to use for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScraperMode {
    /// Probe the page and pick the cheapest strategy that still works.
    #[default]
    Auto,
    /// Plain HTTP GET plus static HTML parse.
    Static,
    /// Full headless-browser render.
    Spa,
}

impl fmt::Display for ScraperMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Static => write!(f, "static"),
            Self::Spa => write!(f, "spa"),
        }
    }
}

impl FromStr for ScraperMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "static" => Ok(Self::Static),
            "spa" | "dynamic" => Ok(Self::Spa),
            other => Err(format!("unknown scraper mode: {other}")),
        }
    }
}

/// Options for a single scraping request.
///
/// An immutable value passed by the caller to every fetch.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub url: String,
    pub mode: ScraperMode,
    /// CSS selector to scope content extraction. Empty or "body" means the
    /// whole page.
    pub selector: Option<String>,
    /// Optional field-name -> selector mapping for structured extraction.
    pub fields: Option<HashMap<String, String>>,
    /// Extra request headers, merged over the defaults.
    pub headers: HashMap<String, String>,
    /// Named session to load cookies/headers from before the request.
    pub session_name: Option<String>,
    /// Per-request timeout. Zero means the engine default.
    pub timeout: Duration,
    /// Proxy URL for this request.
    pub proxy: Option<String>,
    /// Additional settle time after navigation, for slow-rendering pages.
    pub extra_wait: Option<Duration>,
}

impl RequestOptions {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ScraperMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = Some(selector.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The effective selector, treating empty/default as whole-page.
    #[must_use]
    pub fn effective_selector(&self) -> Option<&str> {
        match self.selector.as_deref() {
            None | Some("") | Some("body") => None,
            Some(s) => Some(s),
        }
    }
}

/// Outcome of one batch fetch job, delivered on the result channel.
#[derive(Debug)]
pub struct ScrapeResult {
    pub url: String,
    pub data: Option<PageData>,
    pub error: Option<crate::errors::EngineError>,
}

impl ScrapeResult {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.data.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("AUTO".parse::<ScraperMode>().unwrap(), ScraperMode::Auto);
        assert_eq!("spa".parse::<ScraperMode>().unwrap(), ScraperMode::Spa);
        assert_eq!(
            "dynamic".parse::<ScraperMode>().unwrap(),
            ScraperMode::Spa
        );
        assert!("turbo".parse::<ScraperMode>().is_err());
    }

    #[test]
    fn effective_selector_treats_body_as_default() {
        let opts = RequestOptions::new("https://example.com").with_selector("body");
        assert_eq!(opts.effective_selector(), None);

        let opts = RequestOptions::new("https://example.com").with_selector("#main");
        assert_eq!(opts.effective_selector(), Some("#main"));
    }

    #[test]
    fn byte_cost_counts_textual_fields() {
        let mut data = PageData::new("https://example.com");
        data.title = "t".repeat(10);
        data.content = "c".repeat(20);
        data.html = "h".repeat(30);
        assert_eq!(data.byte_cost(), 60);
    }
}
