//! Core traits for the page surface, the clock and conversation recording.

use std::{fmt, path::Path, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{TranscriptEntry, Turn};

/// Strategy-tagged element locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "by", content = "value", rename_all = "snake_case")]
pub enum Locator {
    /// CSS selector.
    Css(String),
    /// XPath expression.
    XPath(String),
}

impl Locator {
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    #[must_use]
    pub fn xpath(expr: impl Into<String>) -> Self {
        Self::XPath(expr.into())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(s) => write!(f, "css={s}"),
            Self::XPath(s) => write!(f, "xpath={s}"),
        }
    }
}

/// Page adapter error.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("Timed out after {duration:?} waiting for {locator}")]
    Timeout { locator: Locator, duration: Duration },
    #[error("No element matches {0}")]
    NotFound(Locator),
    #[error("Element {locator}[{index}] is no longer attached")]
    Stale { locator: Locator, index: usize },
    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Page backend error: {0}")]
    Backend(String),
}

impl PageError {
    /// Whether this is a bounded wait running out rather than a hard failure.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A single rendered element handle.
#[async_trait]
pub trait PageElement: Send + Sync {
    /// Rendered text content.
    async fn text(&self) -> Result<String, PageError>;

    /// Click the element.
    async fn click(&self) -> Result<(), PageError>;

    /// Insert text as if typed.
    async fn send_text(&self, text: &str) -> Result<(), PageError>;

    /// Press Enter while the element has focus.
    async fn press_enter(&self) -> Result<(), PageError>;
}

/// Capability set required of a live rendered page.
///
/// Implement this trait to drive a real browser; the session, turn and
/// detection logic only ever talks to the page through it.
#[async_trait]
pub trait PageSurface: Send + Sync {
    /// Element handle type.
    type Element: PageElement;

    /// Load a URL.
    async fn navigate(&self, url: &str) -> Result<(), PageError>;

    /// Wait until the first match is visible and enabled.
    async fn wait_until_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element, PageError>;

    /// Wait until at least one match exists in the document.
    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<Self::Element, PageError>;

    /// All current matches, in document order.
    async fn find_all(&self, locator: &Locator) -> Result<Vec<Self::Element>, PageError>;

    /// First current match, without waiting.
    async fn find(&self, locator: &Locator) -> Result<Self::Element, PageError> {
        self.find_all(locator)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PageError::NotFound(locator.clone()))
    }

    /// Scroll an element into the viewport.
    async fn scroll_into_view(&self, element: &Self::Element) -> Result<(), PageError>;

    /// Save a PNG capture of the viewport.
    async fn screenshot(&self, path: &Path) -> Result<(), PageError>;

    /// Clear an interactive anti-automation challenge if one is showing.
    ///
    /// Returns `true` if a challenge was handled. Adapters without support
    /// report `false`.
    async fn solve_challenge(&self) -> Result<bool, PageError> {
        Ok(false)
    }

    /// Release every resource behind the page.
    async fn quit(&self) -> Result<(), PageError>;
}

/// Monotonic time source and sleep, injectable for tests.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;

    /// Suspend for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by the tokio timer.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Recorder error.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Recorder error: {0}")]
    Internal(String),
}

/// Persists prompt/answer pairs.
#[async_trait]
pub trait ConversationRecorder: Send + Sync {
    /// Append one closed turn. Never overwrites earlier records.
    async fn append_turn(&self, turn: &Turn) -> Result<(), RecorderError>;

    /// Write the full end-of-session transcript, replacing any previous one.
    async fn write_transcript(&self, entries: &[TranscriptEntry]) -> Result<(), RecorderError>;
}

/// Render one `Q:`/`A:` record.
#[must_use]
pub fn format_record(prompt: &str, answer: &str) -> String {
    format!("Q: {prompt}\nA: {answer}\n\n")
}

/// Render a closed turn, with a placeholder when there is no answer.
#[must_use]
pub fn format_turn(turn: &Turn) -> String {
    match &turn.final_answer {
        Some(answer) => format_record(&turn.prompt, answer),
        None => format_record(
            &turn.prompt,
            &format!("[no answer: {}]", turn.outcome.label()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::css("#chat-input").to_string(), "css=#chat-input");
        assert_eq!(
            Locator::xpath("//div[@id='x']").to_string(),
            "xpath=//div[@id='x']"
        );
    }

    #[test]
    fn test_format_turn_placeholder() {
        let turn = Turn::timed_out(3, "B?".into(), Duration::from_secs(100));
        assert_eq!(format_turn(&turn), "Q: B?\nA: [no answer: timed_out]\n\n");

        let done = Turn::completed(0, "A?".into(), "ans1".into(), Duration::ZERO);
        assert_eq!(format_turn(&done), "Q: A?\nA: ans1\n\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_timer() {
        let clock = TokioClock::new();
        clock.sleep(Duration::from_secs(5)).await;
        assert!(clock.now() >= Duration::from_secs(5));
    }
}
