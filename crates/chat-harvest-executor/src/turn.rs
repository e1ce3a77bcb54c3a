//! Turn executor: submits one prompt and obtains its answer.

use std::{path::PathBuf, sync::Arc};

use chat_harvest_core::{
    PageElement, PageError, PageSurface, Session, Turn, TurnEvents, UiContract,
};
use thiserror::Error;

use crate::detector::{CompletionDetector, Detection, DetectionError};

/// Turn failure. Never propagated past the executor; it becomes an error
/// outcome on the returned [`Turn`].
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("Session is not authenticated")]
    NotAuthenticated,
    #[error("Adapter failure: {0}")]
    Adapter(#[from] PageError),
    #[error("Detection failed: {0}")]
    Detection(#[from] DetectionError),
}

/// Sends prompts over a borrowed page and waits for their answers.
pub struct TurnExecutor<'a, P: PageSurface> {
    page: &'a P,
    contract: &'a UiContract,
    detector: CompletionDetector,
    headless: bool,
    diagnostics_dir: Option<PathBuf>,
    events: Option<Arc<TurnEvents>>,
}

impl<'a, P: PageSurface> TurnExecutor<'a, P> {
    /// Create an executor. Defaults to headless with no diagnostics output.
    #[must_use]
    pub fn new(page: &'a P, contract: &'a UiContract, detector: CompletionDetector) -> Self {
        Self {
            page,
            contract,
            detector,
            headless: true,
            diagnostics_dir: None,
            events: None,
        }
    }

    /// Interactive challenges are only attempted when not headless.
    #[must_use]
    pub const fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    /// Write a screenshot here whenever a turn fails.
    #[must_use]
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    /// Publish turn lifecycle events to this feed.
    #[must_use]
    pub fn with_events(mut self, events: Arc<TurnEvents>) -> Self {
        self.events = Some(events);
        self
    }

    #[must_use]
    pub const fn detector(&self) -> &CompletionDetector {
        &self.detector
    }

    /// Submit `prompt` and wait for its answer.
    ///
    /// Always returns a closed turn; failures are captured in its outcome so
    /// the caller can move on to the next prompt.
    pub async fn execute_turn(&self, session: &Session, index: usize, prompt: &str) -> Turn {
        if let Some(events) = &self.events {
            events.push_started(index, prompt);
        }
        let clock = Arc::clone(self.detector.clock());
        let started = clock.now();

        let result = self.run(session, index, prompt).await;
        let elapsed = clock.now().saturating_sub(started);

        let turn = match result {
            Ok(Detection::Finished { text, .. }) => {
                Turn::completed(index, prompt.to_string(), text, elapsed)
            }
            Ok(Detection::TimedOut { .. }) => Turn::timed_out(index, prompt.to_string(), elapsed),
            Ok(Detection::Failed(e)) => {
                self.fail(index, prompt, &TurnError::Detection(e), elapsed)
                    .await
            }
            Err(e) => self.fail(index, prompt, &e, elapsed).await,
        };

        tracing::info!(
            index,
            outcome = turn.outcome.label(),
            ?elapsed,
            "Turn closed"
        );
        if let Some(events) = &self.events {
            events.push_closed(turn.clone());
        }
        turn
    }

    async fn run(&self, session: &Session, index: usize, prompt: &str) -> Result<Detection, TurnError> {
        if !session.is_authenticated() {
            return Err(TurnError::NotAuthenticated);
        }

        if !self.headless && self.page.solve_challenge().await? {
            tracing::info!(index, "Cleared interactive challenge");
        }

        let baseline = self.page.find_all(&self.contract.answer_block).await?.len();

        let input = self
            .page
            .wait_until_clickable(&self.contract.chat_input, self.detector.settings().wait_timeout)
            .await?;
        input.send_text(prompt).await?;
        input.press_enter().await?;
        tracing::info!(index, baseline, chars = prompt.len(), "Prompt submitted");

        let events = self.events.clone();
        Ok(self
            .detector
            .await_completion(
                self.page,
                &self.contract.answer_block,
                baseline,
                session.mode(),
                move |snapshot| {
                    if let Some(events) = &events {
                        events.push_snapshot(index, snapshot.clone());
                    }
                },
            )
            .await)
    }

    async fn fail(
        &self,
        index: usize,
        prompt: &str,
        error: &TurnError,
        elapsed: std::time::Duration,
    ) -> Turn {
        tracing::error!(index, error = %error, "Turn failed");
        if !matches!(error, TurnError::NotAuthenticated) {
            if let Some(dir) = &self.diagnostics_dir {
                let path = dir.join(format!("turn-{index}-error.png"));
                if let Err(e) = self.page.screenshot(&path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to capture diagnostic screenshot");
                }
            }
        }
        Turn::failed(index, prompt.to_string(), error.to_string(), elapsed)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_harvest_core::{
        Clock, DetectionSettings, TurnEvent, TurnOutcome,
        testing::{Action, FakePage, Frame, ManualClock},
    };

    use super::*;

    const S: &str = "<RESPONSE WAS FINISHED>";

    fn executor<'a>(
        page: &'a FakePage,
        contract: &'a UiContract,
        clock: &Arc<ManualClock>,
    ) -> TurnExecutor<'a, FakePage> {
        let detector =
            CompletionDetector::new(DetectionSettings::default(), Arc::clone(clock) as Arc<dyn Clock>);
        TurnExecutor::new(page, contract, detector).with_diagnostics_dir("diag")
    }

    #[tokio::test]
    async fn test_two_turns_pair_prompts_with_new_blocks() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract)
            .with_turn([Frame::text(format!("ans1{S}"))])
            .with_turn([
                Frame::text("still typing"),
                Frame::text("still typing"),
                Frame::text("still typing"),
                Frame::text(format!("ans2{S}")),
            ]);
        let session = Session::authenticated();
        let exec = executor(&page, &contract, &clock);

        let first = exec.execute_turn(&session, 0, "A?").await;
        assert_eq!(first.outcome, TurnOutcome::Completed);
        assert_eq!(first.final_answer.as_deref(), Some("ans1"));
        assert_eq!(page.answers().len(), 1);

        let second = exec.execute_turn(&session, 1, "B?").await;
        assert_eq!(second.outcome, TurnOutcome::Completed);
        assert_eq!(second.final_answer.as_deref(), Some("ans2"));
        assert_eq!(page.answers().len(), 2);
        assert_eq!(page.prompts(), vec!["A?".to_string(), "B?".to_string()]);
    }

    #[tokio::test]
    async fn test_unauthenticated_session_never_touches_page() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([Frame::text(format!("x{S}"))]);
        let exec = executor(&page, &contract, &clock);

        let turn = exec.execute_turn(&Session::unauthenticated(), 0, "A?").await;
        assert!(matches!(turn.outcome, TurnOutcome::Error { .. }));
        assert!(turn.final_answer.is_none());
        assert!(page.actions().is_empty());
    }

    #[tokio::test]
    async fn test_poll_failure_becomes_error_outcome() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract)
            .with_turn([Frame::text("partial"), Frame::Fail("find_all exploded".into())]);
        let exec = executor(&page, &contract, &clock);

        let turn = exec.execute_turn(&Session::authenticated(), 4, "A?").await;
        match &turn.outcome {
            TurnOutcome::Error { message } => assert!(message.contains("find_all exploded")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(turn.final_answer.is_none());
        assert!(page
            .actions()
            .contains(&Action::Screenshot(PathBuf::from("diag/turn-4-error.png"))));
    }

    #[tokio::test]
    async fn test_missing_chat_input_is_adapter_failure() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).without(&contract.chat_input);
        let exec = executor(&page, &contract, &clock);

        let turn = exec.execute_turn(&Session::authenticated(), 0, "A?").await;
        assert!(matches!(turn.outcome, TurnOutcome::Error { .. }));
        assert!(page.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_challenge_only_attempted_when_headed() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let session = Session::authenticated();

        let headless_page = FakePage::new(&contract).with_turn([Frame::text(format!("a{S}"))]);
        executor(&headless_page, &contract, &clock)
            .execute_turn(&session, 0, "A?")
            .await;
        assert!(!headless_page.actions().contains(&Action::Challenge));

        let headed_page = FakePage::new(&contract).with_turn([Frame::text(format!("a{S}"))]);
        executor(&headed_page, &contract, &clock)
            .headless(false)
            .execute_turn(&session, 0, "A?")
            .await;
        assert!(headed_page.actions().contains(&Action::Challenge));
    }

    #[tokio::test]
    async fn test_events_cover_turn_lifecycle() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let events = TurnEvents::shared();
        let page = FakePage::new(&contract)
            .with_turn([Frame::text("half"), Frame::text(format!("whole{S}"))]);
        let exec = executor(&page, &contract, &clock).with_events(Arc::clone(&events));

        exec.execute_turn(&Session::authenticated(), 0, "A?").await;

        let history = events.get_history();
        assert!(matches!(history.first(), Some(TurnEvent::Started { index: 0, .. })));
        assert!(matches!(history.last(), Some(TurnEvent::Closed(turn)) if turn.is_completed()));
        let snapshots = history
            .iter()
            .filter(|e| matches!(e, TurnEvent::Snapshot { .. }))
            .count();
        assert_eq!(snapshots, 1);
    }

    #[tokio::test]
    async fn test_timed_out_turn_has_no_answer() {
        let contract = UiContract::default();
        let clock = ManualClock::shared();
        let page = FakePage::new(&contract).with_turn([Frame::text("no marker")]);
        let exec = executor(&page, &contract, &clock);

        let turn = exec.execute_turn(&Session::authenticated(), 0, "A?").await;
        assert_eq!(turn.outcome, TurnOutcome::TimedOut);
        assert!(turn.final_answer.is_none());
        assert!(turn.elapsed >= Duration::from_secs(100));
    }
}
