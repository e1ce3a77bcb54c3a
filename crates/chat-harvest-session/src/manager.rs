//! Session manager: login, mode selection and teardown over one page.

use std::{sync::Arc, time::Duration};

use chat_harvest_core::{
    Clock, Credentials, DetectionSettings, Mode, PageElement, PageError, PageSurface, Sentinel,
    Session, SessionSettings, TranscriptEntry, UiContract,
};
use chat_harvest_executor::{CompletionDetector, TurnExecutor};

/// Placeholder for a missing half of a transcript pair.
const MISSING: &str = "N/A";

/// Authentication error. Fatal to the run.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credential: {0} is empty")]
    MissingCredential(&'static str),
    #[error("Login page did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Login failed: {0}")]
    Page(PageError),
}

impl From<PageError> for AuthError {
    fn from(e: PageError) -> Self {
        match e {
            PageError::Timeout { duration, .. } => Self::Timeout(duration),
            other => Self::Page(other),
        }
    }
}

/// Owns the page for one conversational session.
///
/// The page is released by [`SessionManager::teardown`], which consumes the
/// manager and so runs at most once.
pub struct SessionManager<P: PageSurface> {
    page: P,
    contract: UiContract,
    settings: SessionSettings,
    clock: Arc<dyn Clock>,
    released: bool,
}

impl<P: PageSurface> SessionManager<P> {
    /// Create a session manager.
    #[must_use]
    pub fn new(
        page: P,
        contract: UiContract,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            page,
            contract,
            settings,
            clock,
            released: false,
        }
    }

    #[must_use]
    pub const fn page(&self) -> &P {
        &self.page
    }

    #[must_use]
    pub const fn contract(&self) -> &UiContract {
        &self.contract
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Log in and wait for the chat interface.
    ///
    /// Credentials are checked before the page is touched.
    ///
    /// # Errors
    /// Returns error if a credential is empty, a login element or the
    /// post-login marker does not appear in time, or the page fails.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Session, AuthError> {
        if credentials.email().trim().is_empty() {
            return Err(AuthError::MissingCredential("Email"));
        }
        if credentials.password().is_empty() {
            return Err(AuthError::MissingCredential("Password"));
        }

        match self.login(credentials).await {
            Ok(()) => {
                let session = Session::authenticated();
                tracing::info!(session_id = %session.id(), "Login successful");
                Ok(session)
            }
            Err(e) => {
                tracing::error!(error = %e, "Login failed");
                self.capture_diagnostics("login_error.png").await;
                Err(e)
            }
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), AuthError> {
        let wait = self.settings.wait_timeout;
        self.page.navigate(&self.settings.entry_url).await?;

        let identity = self
            .page
            .wait_until_clickable(&self.contract.identity_field, wait)
            .await?;
        identity.send_text(credentials.email()).await?;

        self.page
            .find(&self.contract.secret_field)
            .await?
            .send_text(credentials.password())
            .await?;
        self.page.find(&self.contract.consent_control).await?.click().await?;
        self.page.find(&self.contract.submit_button).await?.click().await?;

        self.page
            .wait_until_present(&self.contract.chat_input, wait)
            .await?;
        Ok(())
    }

    /// Switch the session to `mode`.
    ///
    /// Only extended reasoning needs a toggle click; standard mode and an
    /// already-active mode are no-ops. A failed click is logged and the
    /// session keeps its previous mode. Call at most once per session.
    pub async fn select_mode(&self, session: Session, mode: Mode) -> Session {
        if mode == Mode::Standard || session.mode() == mode {
            return session;
        }

        self.clock.sleep(self.settings.mode_settle).await;
        match self.activate_toggle().await {
            Ok(()) => {
                tracing::info!(?mode, "Mode activated");
                session.with_mode(mode)
            }
            Err(e) => {
                tracing::warn!(?mode, error = %e, "Failed to activate mode, keeping current mode");
                session
            }
        }
    }

    async fn activate_toggle(&self) -> Result<(), PageError> {
        let toggle = self
            .page
            .wait_until_clickable(&self.contract.mode_toggle, self.settings.wait_timeout)
            .await?;
        self.page.scroll_into_view(&toggle).await?;
        toggle.click().await
    }

    /// Executor borrowing this session's page.
    #[must_use]
    pub fn executor(&self, detection: DetectionSettings) -> TurnExecutor<'_, P> {
        let detector = CompletionDetector::new(detection, Arc::clone(&self.clock));
        TurnExecutor::new(&self.page, &self.contract, detector)
            .with_diagnostics_dir(self.settings.diagnostics_dir.clone())
    }

    /// Read every rendered prompt/answer pair back from the page.
    ///
    /// Pairs are matched by position; a missing half reads `N/A`.
    ///
    /// # Errors
    /// Returns error if the page cannot be read.
    pub async fn transcript(&self, sentinel: &Sentinel) -> Result<Vec<TranscriptEntry>, PageError> {
        let prompts = self.page.find_all(&self.contract.prompt_block).await?;
        let answers = self.page.find_all(&self.contract.answer_block).await?;
        if prompts.is_empty() || answers.is_empty() {
            tracing::warn!("No conversation found on the page");
            return Ok(Vec::new());
        }

        let mut entries = Vec::with_capacity(prompts.len().max(answers.len()));
        for i in 0..prompts.len().max(answers.len()) {
            let prompt = match prompts.get(i) {
                Some(el) => el.text().await?.trim().to_string(),
                None => MISSING.to_string(),
            };
            let answer = match answers.get(i) {
                Some(el) => sentinel.strip(&el.text().await?),
                None => MISSING.to_string(),
            };
            entries.push(TranscriptEntry { prompt, answer });
        }
        Ok(entries)
    }

    /// Release the page. Consumes the manager.
    pub async fn teardown(mut self) {
        self.released = true;
        match self.page.quit().await {
            Ok(()) => tracing::info!("Page released"),
            Err(e) => tracing::error!(error = %e, "Failed to release page"),
        }
    }

    async fn capture_diagnostics(&self, file_name: &str) {
        let path = self.settings.diagnostics_dir.join(file_name);
        match self.page.screenshot(&path).await {
            Ok(()) => tracing::info!(path = %path.display(), "Saved diagnostic screenshot"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to capture diagnostic screenshot"),
        }
    }
}

impl<P: PageSurface> Drop for SessionManager<P> {
    fn drop(&mut self) {
        if !self.released {
            tracing::error!("Session manager dropped without teardown; page was not released");
        }
    }
}
