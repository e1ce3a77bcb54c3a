//! In-memory conversation recorder.

use std::sync::RwLock;

use async_trait::async_trait;
use chat_harvest_core::{
    ConversationRecorder, RecorderError, TranscriptEntry, Turn, traits::format_turn,
};

/// In-memory recorder.
///
/// Useful for tests and embedding. Data is lost when dropped.
pub struct MemoryRecorder {
    turns: RwLock<Vec<Turn>>,
    transcript: RwLock<Vec<TranscriptEntry>>,
}

impl MemoryRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            turns: RwLock::new(Vec::new()),
            transcript: RwLock::new(Vec::new()),
        }
    }

    /// Turns appended so far, in order.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn turns(&self) -> Result<Vec<Turn>, RecorderError> {
        Ok(self
            .turns
            .read()
            .map_err(|e| RecorderError::Internal(e.to_string()))?
            .clone())
    }

    /// Most recently written transcript.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn transcript(&self) -> Result<Vec<TranscriptEntry>, RecorderError> {
        Ok(self
            .transcript
            .read()
            .map_err(|e| RecorderError::Internal(e.to_string()))?
            .clone())
    }

    /// Turns rendered as the `Q:`/`A:` responses file would contain them.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn rendered(&self) -> Result<String, RecorderError> {
        Ok(self.turns()?.iter().map(format_turn).collect())
    }
}

impl Default for MemoryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationRecorder for MemoryRecorder {
    async fn append_turn(&self, turn: &Turn) -> Result<(), RecorderError> {
        self.turns
            .write()
            .map_err(|e| RecorderError::Internal(e.to_string()))?
            .push(turn.clone());
        Ok(())
    }

    async fn write_transcript(&self, entries: &[TranscriptEntry]) -> Result<(), RecorderError> {
        *self
            .transcript
            .write()
            .map_err(|e| RecorderError::Internal(e.to_string()))? = entries.to_vec();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_appends_in_order_and_renders_placeholder() {
        let recorder = MemoryRecorder::new();
        recorder
            .append_turn(&Turn::completed(0, "A?".into(), "ans1".into(), Duration::ZERO))
            .await
            .unwrap();
        recorder
            .append_turn(&Turn::timed_out(1, "B?".into(), Duration::from_secs(100)))
            .await
            .unwrap();

        assert_eq!(recorder.turns().unwrap().len(), 2);
        assert_eq!(
            recorder.rendered().unwrap(),
            "Q: A?\nA: ans1\n\nQ: B?\nA: [no answer: timed_out]\n\n"
        );
    }

    #[tokio::test]
    async fn test_transcript_is_replaced() {
        let recorder = MemoryRecorder::new();
        let first = [TranscriptEntry {
            prompt: "A?".into(),
            answer: "x".into(),
        }];
        recorder.write_transcript(&first).await.unwrap();
        recorder.write_transcript(&[]).await.unwrap();
        assert!(recorder.transcript().unwrap().is_empty());
    }
}
