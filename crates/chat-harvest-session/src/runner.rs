//! Conversation runner: one login, one mode, a batch of prompts.

use std::{sync::Arc, time::Duration};

use chat_harvest_core::{
    ConversationLog, ConversationRecorder, Credentials, DetectionSettings, HarvestConfig, Mode,
    PageSurface, TurnEvents, config::ConfigError,
};

use crate::manager::{AuthError, SessionManager};

/// What to send in one run.
#[derive(Debug, Clone, Default)]
pub struct ConversationPlan {
    pub mode: Mode,
    /// Sent first and never recorded.
    pub priming_prompt: Option<String>,
    pub prompts: Vec<String>,
}

impl ConversationPlan {
    #[must_use]
    pub fn new(prompts: Vec<String>) -> Self {
        Self {
            prompts,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_priming_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.priming_prompt = Some(prompt.into());
        self
    }
}

/// Runner timing and output toggles.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub detection: DetectionSettings,
    pub headless: bool,
    /// Pause after login before touching the page.
    pub settle: Duration,
    /// Pause between consecutive prompts.
    pub turn_gap: Duration,
    pub save_transcript: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            detection: DetectionSettings::default(),
            headless: true,
            settle: Duration::from_secs(2),
            turn_gap: Duration::from_secs(2),
            save_transcript: true,
        }
    }
}

impl RunSettings {
    /// Derive run settings from a loaded configuration.
    ///
    /// # Errors
    /// Returns error if the detection settings are invalid.
    pub fn from_config(config: &HarvestConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            detection: config.detection_settings()?,
            headless: config.browser.headless,
            settle: Duration::from_secs(config.run.settle_secs),
            turn_gap: Duration::from_secs(config.run.turn_gap_secs),
            save_transcript: config.output.save_transcript,
        })
    }
}

/// Drives a [`SessionManager`] through a [`ConversationPlan`].
pub struct ConversationRunner<P: PageSurface> {
    manager: SessionManager<P>,
    settings: RunSettings,
    events: Arc<TurnEvents>,
}

impl<P: PageSurface> ConversationRunner<P> {
    #[must_use]
    pub fn new(manager: SessionManager<P>, settings: RunSettings) -> Self {
        Self {
            manager,
            settings,
            events: TurnEvents::shared(),
        }
    }

    /// Publish to an existing event feed instead of a private one.
    #[must_use]
    pub fn with_events(mut self, events: Arc<TurnEvents>) -> Self {
        self.events = events;
        self
    }

    #[must_use]
    pub fn events(&self) -> Arc<TurnEvents> {
        Arc::clone(&self.events)
    }

    #[must_use]
    pub const fn manager(&self) -> &SessionManager<P> {
        &self.manager
    }

    /// Execute the whole plan, then tear the page down.
    ///
    /// # Errors
    /// Returns error if authentication fails. Per-turn failures are recorded
    /// on the returned log instead.
    pub async fn run(
        self,
        credentials: &Credentials,
        plan: &ConversationPlan,
        recorder: Option<&dyn ConversationRecorder>,
    ) -> Result<ConversationLog, AuthError> {
        let result = self.drive(credentials, plan, recorder).await;
        self.shutdown().await;
        result
    }

    /// Execute the plan without tearing down.
    ///
    /// Callers that race this against cancellation must still call
    /// [`ConversationRunner::shutdown`].
    ///
    /// # Errors
    /// Returns error if authentication fails.
    pub async fn drive(
        &self,
        credentials: &Credentials,
        plan: &ConversationPlan,
        recorder: Option<&dyn ConversationRecorder>,
    ) -> Result<ConversationLog, AuthError> {
        let clock = Arc::clone(self.manager.clock());
        let started = clock.now();

        let session = self.manager.authenticate(credentials).await?;
        clock.sleep(self.settings.settle).await;
        let session = self.manager.select_mode(session, plan.mode).await;

        if let Some(priming) = &plan.priming_prompt {
            let primer = self
                .manager
                .executor(self.settings.detection.clone())
                .headless(self.settings.headless);
            let turn = primer.execute_turn(&session, 0, priming).await;
            if turn.is_completed() {
                tracing::info!("Priming prompt answered");
            } else {
                tracing::warn!(outcome = turn.outcome.label(), "Priming prompt did not complete");
            }
            clock.sleep(self.settings.turn_gap).await;
        }

        let executor = self
            .manager
            .executor(self.settings.detection.clone())
            .headless(self.settings.headless)
            .with_events(Arc::clone(&self.events));

        let mut log = ConversationLog::new();
        for (index, prompt) in plan.prompts.iter().enumerate() {
            if index > 0 {
                clock.sleep(self.settings.turn_gap).await;
            }
            let turn = executor.execute_turn(&session, index, prompt).await;
            if let Some(recorder) = recorder {
                if let Err(e) = recorder.append_turn(&turn).await {
                    tracing::error!(index, error = %e, "Failed to record turn");
                }
            }
            log.push(turn);
        }

        if self.settings.save_transcript {
            if let Some(recorder) = recorder {
                self.save_transcript(recorder).await;
            }
        }

        let elapsed = clock.now().saturating_sub(started);
        tracing::info!(
            turns = log.len(),
            completed = log.completed_count(),
            hours = format!("{:.2}", elapsed.as_secs_f64() / 3600.0),
            "Batch finished"
        );
        Ok(log)
    }

    async fn save_transcript(&self, recorder: &dyn ConversationRecorder) {
        match self.manager.transcript(&self.settings.detection.sentinel).await {
            Ok(entries) if entries.is_empty() => {}
            Ok(entries) => {
                if let Err(e) = recorder.write_transcript(&entries).await {
                    tracing::error!(error = %e, "Failed to save transcript");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to read transcript from page"),
        }
    }

    /// Release the page and close the event feed.
    pub async fn shutdown(self) {
        self.manager.teardown().await;
        self.events.push_finished();
    }
}

#[cfg(test)]
mod tests {
    use chat_harvest_core::{
        Clock, SessionSettings, TurnEvent, TurnOutcome, UiContract,
        testing::{Action, FakePage, Frame, ManualClock},
    };

    use super::*;
    use crate::storage::MemoryRecorder;

    const S: &str = "<RESPONSE WAS FINISHED>";

    fn runner(page: &FakePage, clock: &Arc<ManualClock>) -> ConversationRunner<FakePage> {
        let manager = SessionManager::new(
            page.clone(),
            UiContract::default(),
            SessionSettings::default(),
            Arc::clone(clock) as Arc<dyn Clock>,
        );
        ConversationRunner::new(manager, RunSettings::default())
    }

    fn creds() -> Credentials {
        Credentials::new("me@example.com", "hunter2")
    }

    #[tokio::test]
    async fn test_batch_records_each_prompt_in_order() {
        let clock = ManualClock::shared();
        let page = FakePage::new(&UiContract::default())
            .with_turn([Frame::text(format!("ans1{S}"))])
            .with_turn([
                Frame::text("still typing"),
                Frame::text("still typing"),
                Frame::text("still typing"),
                Frame::text(format!("ans2{S}")),
            ]);
        let recorder = MemoryRecorder::new();
        let plan = ConversationPlan::new(vec!["A?".into(), "B?".into()]);

        let log = runner(&page, &clock)
            .run(&creds(), &plan, Some(&recorder))
            .await
            .unwrap();

        assert_eq!(
            log.pairs().collect::<Vec<_>>(),
            vec![("A?", Some("ans1")), ("B?", Some("ans2"))]
        );
        assert_eq!(
            recorder.rendered().unwrap(),
            "Q: A?\nA: ans1\n\nQ: B?\nA: ans2\n\n"
        );
        let transcript = recorder.transcript().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].answer, "ans2");
        assert_eq!(page.quit_calls(), 1);
        assert!(clock.sleeps().contains(&Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn test_auth_failure_still_tears_down_once() {
        let clock = ManualClock::shared();
        let contract = UiContract::default();
        let page = FakePage::new(&contract).without(&contract.chat_input);
        let recorder = MemoryRecorder::new();
        let runner = runner(&page, &clock);
        let events = runner.events();

        let err = runner
            .run(&creds(), &ConversationPlan::new(vec!["A?".into()]), Some(&recorder))
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::Timeout(_)));
        assert!(page.prompts().is_empty());
        assert!(recorder.turns().unwrap().is_empty());
        assert_eq!(page.quit_calls(), 1);
        assert_eq!(events.get_history(), vec![TurnEvent::Finished]);
    }

    #[tokio::test]
    async fn test_failed_turn_does_not_stop_batch() {
        let clock = ManualClock::shared();
        let page = FakePage::new(&UiContract::default())
            .with_turn([Frame::Fail("renderer crashed".into())])
            .with_turn([Frame::text(format!("ans2{S}"))]);
        let recorder = MemoryRecorder::new();

        let log = runner(&page, &clock)
            .run(
                &creds(),
                &ConversationPlan::new(vec!["A?".into(), "B?".into()]),
                Some(&recorder),
            )
            .await
            .unwrap();

        let turns = log.turns();
        assert!(matches!(turns[0].outcome, TurnOutcome::Error { .. }));
        assert_eq!(turns[1].final_answer.as_deref(), Some("ans2"));
        assert!(recorder.rendered().unwrap().contains("A: [no answer: error]"));
    }

    #[tokio::test]
    async fn test_priming_prompt_is_not_recorded() {
        let clock = ManualClock::shared();
        let page = FakePage::new(&UiContract::default())
            .with_turn([Frame::text(format!("Understood.{S}"))])
            .with_turn([Frame::text(format!("ans1{S}"))]);
        let recorder = MemoryRecorder::new();
        let plan = ConversationPlan::new(vec!["A?".into()]).with_priming_prompt("Be brief.");

        let log = runner(&page, &clock)
            .run(&creds(), &plan, Some(&recorder))
            .await
            .unwrap();

        assert_eq!(page.prompts(), vec!["Be brief.".to_string(), "A?".to_string()]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.turns()[0].final_answer.as_deref(), Some("ans1"));
        assert_eq!(recorder.turns().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_extended_mode_is_selected_before_prompts() {
        let clock = ManualClock::shared();
        let contract = UiContract::default();
        let page = FakePage::new(&contract).with_turn([Frame::text(format!("deep{S}"))]);
        let plan = ConversationPlan::new(vec!["A?".into()]).with_mode(Mode::ExtendedReasoning);

        let log = runner(&page, &clock).run(&creds(), &plan, None).await.unwrap();

        assert_eq!(log.completed_count(), 1);
        let actions = page.actions();
        let toggle = actions
            .iter()
            .position(|a| *a == Action::Click(contract.mode_toggle.clone()))
            .unwrap();
        let submit = actions
            .iter()
            .position(|a| matches!(a, Action::Submit(_)))
            .unwrap();
        assert!(toggle < submit);
    }

    #[tokio::test]
    async fn test_drive_then_shutdown_publishes_finished_last() {
        let clock = ManualClock::shared();
        let page = FakePage::new(&UiContract::default()).with_turn([Frame::text(format!("a{S}"))]);
        let runner = runner(&page, &clock);
        let events = runner.events();

        runner
            .drive(&creds(), &ConversationPlan::new(vec!["A?".into()]), None)
            .await
            .unwrap();
        assert_eq!(page.quit_calls(), 0);
        runner.shutdown().await;

        assert_eq!(page.quit_calls(), 1);
        assert_eq!(events.get_history().last(), Some(&TurnEvent::Finished));
    }
}
