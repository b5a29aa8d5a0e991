//! The browser automation surface the session is written against.
//!
//! [`PageDriver`] is implemented by [`crate::chrome::ChromePage`] for real
//! Chromium pages. Everything above it (joining, recording, presence,
//! teardown) only talks to this trait.

use async_trait::async_trait;
use eyre::Result;
use futures::stream::BoxStream;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use url::Url;

/// Interval used when polling for visibility changes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How to match the text content of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TextMatch {
    /// Case-insensitive substring of the trimmed text.
    Contains(&'static str),
    /// The trimmed text equals the value.
    Exact(&'static str),
}

/// Identifies the first element that matches a CSS selector and, optionally,
/// a text condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Locator {
    pub css: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextMatch>,
}

impl Locator {
    pub const fn css(css: &'static str) -> Self {
        Self { css, text: None }
    }

    pub const fn has_text(css: &'static str, text: &'static str) -> Self {
        Self {
            css,
            text: Some(TextMatch::Contains(text)),
        }
    }

    pub const fn exact_text(css: &'static str, text: &'static str) -> Self {
        Self {
            css,
            text: Some(TextMatch::Exact(text)),
        }
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.text {
            None => write!(f, "{}", self.css),
            Some(TextMatch::Contains(text)) => write!(f, "{}:has-text({text:?})", self.css),
            Some(TextMatch::Exact(text)) => write!(f, "{}:text-is({text:?})", self.css),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Permission {
    #[strum(to_string = "microphone")]
    Microphone,
    #[strum(to_string = "camera")]
    Camera,
}

#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &Url) -> Result<()>;

    async fn current_url(&self) -> Result<Option<Url>>;

    /// Checks whether the element is visible, retrying until `timeout`
    /// elapses. The element is always checked at least once.
    async fn is_visible(&self, locator: &Locator, timeout: Duration) -> Result<bool>;

    async fn click(&self, locator: &Locator) -> Result<()>;

    async fn fill(&self, locator: &Locator, text: &str) -> Result<()>;

    async fn input_value(&self, locator: &Locator) -> Result<String>;

    async fn attribute(&self, locator: &Locator, name: &str) -> Result<Option<String>>;

    /// Evaluates `script` in the page, awaiting a returned promise.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Exposes a function called `name` to the page. Every string the page
    /// passes to it is yielded by the returned stream, in call order.
    async fn register_host_callback(&self, name: &str) -> Result<BoxStream<'static, String>>;

    async fn grant_permissions(&self, permissions: &[Permission], origin: &str) -> Result<()>;

    /// Releases the page and the browser behind it.
    async fn close(&self) -> Result<()>;

    /// Resolves with the index of the first locator that becomes visible.
    async fn wait_for_any(&self, locators: &[Locator], timeout: Duration) -> Result<usize> {
        let deadline = Instant::now() + timeout;
        loop {
            for (index, locator) in locators.iter().enumerate() {
                if self.is_visible(locator, Duration::ZERO).await.unwrap_or(false) {
                    return Ok(index);
                }
            }
            if Instant::now() >= deadline {
                eyre::bail!("none of {} locators became visible within {timeout:?}", locators.len());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_hidden(&self, locator: &Locator, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_visible(locator, Duration::ZERO).await.unwrap_or(false) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                eyre::bail!("{locator} still visible after {timeout:?}");
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}
