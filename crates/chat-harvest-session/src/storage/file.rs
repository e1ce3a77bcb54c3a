//! Plain-text file recorder.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chat_harvest_core::{
    ConversationRecorder, RecorderError, TranscriptEntry, Turn,
    traits::{format_record, format_turn},
};
use tokio::{fs, io::AsyncWriteExt};

/// Writes `Q:`/`A:` records to disk.
///
/// Closed turns are appended to the responses file as they arrive, so a
/// crash mid-run keeps everything recorded so far. The transcript file is
/// rewritten whole. Either output can be disabled by passing `None`.
#[derive(Debug, Clone, Default)]
pub struct FileRecorder {
    responses_path: Option<PathBuf>,
    transcript_path: Option<PathBuf>,
}

impl FileRecorder {
    #[must_use]
    pub const fn new(responses_path: Option<PathBuf>, transcript_path: Option<PathBuf>) -> Self {
        Self {
            responses_path,
            transcript_path,
        }
    }

    #[must_use]
    pub fn responses_path(&self) -> Option<&Path> {
        self.responses_path.as_deref()
    }

    #[must_use]
    pub fn transcript_path(&self) -> Option<&Path> {
        self.transcript_path.as_deref()
    }
}

async fn ensure_parent(path: &Path) -> Result<(), RecorderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

#[async_trait]
impl ConversationRecorder for FileRecorder {
    async fn append_turn(&self, turn: &Turn) -> Result<(), RecorderError> {
        let Some(path) = &self.responses_path else {
            return Ok(());
        };
        ensure_parent(path).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(format_turn(turn).as_bytes()).await?;
        file.flush().await?;
        tracing::debug!(path = %path.display(), index = turn.index, "Appended turn");
        Ok(())
    }

    async fn write_transcript(&self, entries: &[TranscriptEntry]) -> Result<(), RecorderError> {
        let Some(path) = &self.transcript_path else {
            return Ok(());
        };
        ensure_parent(path).await?;
        let contents: String = entries
            .iter()
            .map(|e| format_record(&e.prompt, &e.answer))
            .collect();
        fs::write(path, contents).await?;
        tracing::info!(path = %path.display(), entries = entries.len(), "Transcript saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_turns_are_appended_never_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("responses.txt");
        std::fs::write(&path, "Q: earlier\nA: run\n\n").unwrap();

        let recorder = FileRecorder::new(Some(path.clone()), None);
        recorder
            .append_turn(&Turn::completed(0, "A?".into(), "ans1".into(), Duration::ZERO))
            .await
            .unwrap();
        recorder
            .append_turn(&Turn::failed(1, "B?".into(), "boom", Duration::ZERO))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "Q: earlier\nA: run\n\nQ: A?\nA: ans1\n\nQ: B?\nA: [no answer: error]\n\n"
        );
    }

    #[tokio::test]
    async fn test_transcript_overwrites_and_creates_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("conversation.txt");
        let recorder = FileRecorder::new(None, Some(path.clone()));

        recorder
            .write_transcript(&[TranscriptEntry {
                prompt: "old".into(),
                answer: "old".into(),
            }])
            .await
            .unwrap();
        recorder
            .write_transcript(&[TranscriptEntry {
                prompt: "A?".into(),
                answer: "N/A".into(),
            }])
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "Q: A?\nA: N/A\n\n");
    }

    #[tokio::test]
    async fn test_disabled_outputs_write_nothing() {
        let recorder = FileRecorder::default();
        tokio_test::assert_ok!(
            recorder
                .append_turn(&Turn::timed_out(0, "A?".into(), Duration::ZERO))
                .await
        );
        tokio_test::assert_ok!(recorder.write_transcript(&[]).await);
        assert!(recorder.responses_path().is_none());
    }
}
