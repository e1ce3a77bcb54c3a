//! Completion sentinel appended by the model at the end of every answer.

use serde::{Deserialize, Serialize};

/// Marker the priming prompt asks the model to append.
pub const DEFAULT_SENTINEL: &str = "<RESPONSE WAS FINISHED>";

/// Completion marker matched against rendered answer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sentinel(String);

impl Default for Sentinel {
    fn default() -> Self {
        Self(DEFAULT_SENTINEL.to_string())
    }
}

impl Sentinel {
    /// Create a sentinel. Returns `None` for empty or whitespace-only markers,
    /// which would match every answer.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Option<Self> {
        let marker = marker.into();
        if marker.trim().is_empty() {
            None
        } else {
            Some(Self(marker))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `text` contains the marker.
    #[must_use]
    pub fn is_present(&self, text: &str) -> bool {
        text.contains(&self.0)
    }

    /// Remove every occurrence of the marker, then trim surrounding whitespace.
    ///
    /// Removal repeats until no occurrence is left, since splicing out one
    /// marker can join two fragments into a new one.
    #[must_use]
    pub fn strip(&self, text: &str) -> String {
        let mut out = text.replace(&self.0, "");
        while out.contains(&self.0) {
            out = out.replace(&self.0, "");
        }
        out.trim().to_string()
    }
}
