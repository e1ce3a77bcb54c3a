//! Completion detector: decides when a streaming answer has finished.
//!
//! The page offers no structured "stream ended" signal. Only the rendered
//! text of each answer block is observable, and that text is final once the
//! sentinel shows up. The detector therefore polls the answer blocks on a
//! fixed interval until the block created after the baseline carries the
//! sentinel, or the mode ceiling elapses.

use std::{sync::Arc, time::Duration};

use chat_harvest_core::{
    AnswerSnapshot, Clock, DetectionSettings, Locator, Mode, PageElement, PageError, PageSurface,
};
use thiserror::Error;

/// Detection failure.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("No answer block appeared within {0:?}")]
    ContainerTimeout(Duration),
    #[error("Page error while polling: {0}")]
    Page(#[from] PageError),
}

/// Terminal result of one detection run.
#[derive(Debug)]
pub enum Detection {
    /// The sentinel was seen; `text` has it stripped and is trimmed.
    Finished { text: String, elapsed: Duration },
    /// The ceiling elapsed without the sentinel.
    TimedOut { elapsed: Duration },
    /// The container never appeared or the page failed.
    Failed(DetectionError),
}

#[derive(Debug, Clone, Copy)]
enum State {
    AwaitingBlock,
    Polling { started: Duration },
}

/// Polling state machine over the rendered answer blocks.
pub struct CompletionDetector {
    settings: DetectionSettings,
    clock: Arc<dyn Clock>,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(settings: DetectionSettings, clock: Arc<dyn Clock>) -> Self {
        Self { settings, clock }
    }

    #[must_use]
    pub const fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Run until the answer that follows `baseline` finishes.
    ///
    /// `baseline` is the number of answer blocks rendered before the prompt
    /// was submitted; blocks at or below it are never reported. Every read of
    /// the new block is handed to `on_snapshot`.
    pub async fn await_completion<P, F>(
        &self,
        page: &P,
        answer_block: &Locator,
        baseline: usize,
        mode: Mode,
        mut on_snapshot: F,
    ) -> Detection
    where
        P: PageSurface,
        F: FnMut(&AnswerSnapshot) + Send,
    {
        let ceiling = self.settings.ceiling(mode);
        let mut state = State::AwaitingBlock;

        loop {
            state = match state {
                State::AwaitingBlock => {
                    match page
                        .wait_until_present(answer_block, self.settings.wait_timeout)
                        .await
                    {
                        Ok(_) => State::Polling {
                            started: self.clock.now(),
                        },
                        Err(e) if e.is_timeout() => {
                            return Detection::Failed(DetectionError::ContainerTimeout(
                                self.settings.wait_timeout,
                            ));
                        }
                        Err(e) => return Detection::Failed(e.into()),
                    }
                }
                State::Polling { started } => {
                    let elapsed = self.clock.now().saturating_sub(started);
                    if elapsed >= ceiling {
                        tracing::warn!(?elapsed, ?ceiling, ?mode, "Answer did not finish in time");
                        return Detection::TimedOut { elapsed };
                    }

                    match self.observe(page, answer_block, baseline).await {
                        Err(e) => return Detection::Failed(e.into()),
                        Ok(None) => {
                            tracing::trace!(baseline, "New answer block not rendered yet");
                        }
                        Ok(Some(snapshot)) => {
                            on_snapshot(&snapshot);
                            if snapshot.is_complete {
                                let text = self.settings.sentinel.strip(&snapshot.raw_text);
                                tracing::debug!(chars = text.len(), ?elapsed, "Answer finished");
                                return Detection::Finished { text, elapsed };
                            }
                            tracing::trace!(chars = snapshot.raw_text.len(), "Answer still streaming");
                        }
                    }

                    self.clock.sleep(self.settings.poll_interval).await;
                    State::Polling { started }
                }
            };
        }
    }

    /// Read the newest block if one exists beyond the baseline.
    async fn observe<P: PageSurface>(
        &self,
        page: &P,
        answer_block: &Locator,
        baseline: usize,
    ) -> Result<Option<AnswerSnapshot>, PageError> {
        let blocks = page.find_all(answer_block).await?;
        if blocks.len() <= baseline {
            return Ok(None);
        }
        let Some(last) = blocks.last() else {
            return Ok(None);
        };
        let raw_text = last.text().await?;
        Ok(Some(AnswerSnapshot {
            is_complete: self.settings.sentinel.is_present(&raw_text),
            raw_text,
            observed_at: self.clock.now(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use chat_harvest_core::{
        PageElement, UiContract,
        testing::{FakePage, Frame, ManualClock},
    };

    use super::*;

    const S: &str = "<RESPONSE WAS FINISHED>";

    fn detector(clock: &Arc<ManualClock>) -> CompletionDetector {
        CompletionDetector::new(DetectionSettings::default(), Arc::clone(clock) as Arc<dyn Clock>)
    }

    async fn submit(page: &FakePage, contract: &UiContract, prompt: &str) {
        let input = page
            .wait_until_clickable(&contract.chat_input, Duration::from_secs(15))
            .await
            .unwrap();
        input.send_text(prompt).await.unwrap();
        input.press_enter().await.unwrap();
    }

    #[tokio::test]
    async fn test_finishes_when_sentinel_appears() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([
            Frame::Pending,
            Frame::text("an"),
            Frame::text("answer"),
            Frame::text(format!("answer {S}")),
        ]);
        submit(&page, &contract, "Q?").await;

        let mut seen = Vec::new();
        let detection = detector(&clock)
            .await_completion(&page, &contract.answer_block, 0, Mode::Standard, |s| {
                seen.push(s.raw_text.clone());
            })
            .await;

        match detection {
            Detection::Finished { text, .. } => assert_eq!(text, "answer"),
            other => panic!("unexpected detection: {other:?}"),
        }
        assert_eq!(seen.last().map(String::as_str), Some("answer <RESPONSE WAS FINISHED>"));
    }

    #[tokio::test]
    async fn test_old_block_with_sentinel_is_ignored() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        // The previous answer is complete, but nothing new ever renders.
        let page = FakePage::new(&contract)
            .with_rendered_answer(format!("ans1{S}"))
            .with_turn([]);
        submit(&page, &contract, "B?").await;

        let detection = detector(&clock)
            .await_completion(&page, &contract.answer_block, 1, Mode::Standard, |_| {
                panic!("no snapshot expected for blocks at or below the baseline");
            })
            .await;

        assert!(matches!(detection, Detection::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_times_out_between_ceiling_and_twice_ceiling() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([Frame::text("never done")]);
        submit(&page, &contract, "Q?").await;

        let detector = detector(&clock);
        let ceiling = detector.settings().ceiling(Mode::Standard);
        let detection = detector
            .await_completion(&page, &contract.answer_block, 0, Mode::Standard, |_| {})
            .await;

        let Detection::TimedOut { elapsed } = detection else {
            panic!("expected timeout, got {detection:?}");
        };
        assert!(elapsed >= ceiling);
        assert!(elapsed < ceiling * 2);
        assert!(clock
            .sleeps()
            .iter()
            .all(|d| *d == detector.settings().poll_interval));
    }

    #[tokio::test]
    async fn test_extended_mode_waits_longer() {
        let contract = UiContract::default();

        let mut elapsed_by_mode = Vec::new();
        for mode in [Mode::Standard, Mode::ExtendedReasoning] {
            let clock = ManualClock::shared();
            let page = FakePage::new(&contract).with_turn([Frame::text("never done")]);
            submit(&page, &contract, "Q?").await;
            match detector(&clock)
                .await_completion(&page, &contract.answer_block, 0, mode, |_| {})
                .await
            {
                Detection::TimedOut { elapsed } => elapsed_by_mode.push(elapsed),
                other => panic!("expected timeout, got {other:?}"),
            }
        }
        assert!(elapsed_by_mode[1] > elapsed_by_mode[0]);
    }

    #[tokio::test]
    async fn test_empty_answer_is_still_a_completion() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([Frame::text(format!("  {S}  "))]);
        submit(&page, &contract, "Q?").await;

        let detection = detector(&clock)
            .await_completion(&page, &contract.answer_block, 0, Mode::Standard, |_| {})
            .await;
        match detection {
            Detection::Finished { text, .. } => assert!(text.is_empty()),
            other => panic!("unexpected detection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_container_timeout() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([Frame::Pending]);
        submit(&page, &contract, "Q?").await;

        let detection = detector(&clock)
            .await_completion(&page, &contract.answer_block, 0, Mode::Standard, |_| {})
            .await;
        assert!(matches!(
            detection,
            Detection::Failed(DetectionError::ContainerTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_poll_failure_is_reported() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract)
            .with_turn([Frame::text("partial"), Frame::Fail("renderer crashed".into())]);
        submit(&page, &contract, "Q?").await;

        let detection = detector(&clock)
            .await_completion(&page, &contract.answer_block, 0, Mode::Standard, |_| {})
            .await;
        assert!(matches!(detection, Detection::Failed(DetectionError::Page(_))));
    }
}
