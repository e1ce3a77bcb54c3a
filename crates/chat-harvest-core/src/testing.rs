//! Scripted in-memory page and manual clock (feature `testing`).
//!
//! `FakePage` renders answer blocks from per-submission scripts of
//! [`Frame`]s. Each poll of the answer locator consumes one frame of the
//! active script, so tests describe a streaming answer tick by tick.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    contract::UiContract,
    traits::{Clock, Locator, PageElement, PageError, PageSurface},
};

/// One observable state of the answer being rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The new block has not been rendered yet.
    Pending,
    /// The new block shows this text.
    Text(String),
    /// Reading the blocks fails with this message.
    Fail(String),
}

impl Frame {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

/// Interaction recorded by the fake page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate(String),
    Click(Locator),
    Type(Locator, String),
    Submit(String),
    Scroll(Locator),
    Screenshot(PathBuf),
    Challenge,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Answer,
    Prompt,
    Input,
    Other,
}

struct FakeState {
    contract: UiContract,
    absent: HashSet<Locator>,
    failing: HashMap<Locator, String>,
    answers: Vec<String>,
    prompts: Vec<String>,
    input: String,
    scripts: VecDeque<Vec<Frame>>,
    active: VecDeque<Frame>,
    block_open: bool,
    actions: Vec<Action>,
}

impl FakeState {
    fn kind(&self, locator: &Locator) -> Kind {
        if *locator == self.contract.answer_block {
            Kind::Answer
        } else if *locator == self.contract.prompt_block {
            Kind::Prompt
        } else if *locator == self.contract.chat_input {
            Kind::Input
        } else {
            Kind::Other
        }
    }

    fn check_failing(&self, locator: &Locator) -> Result<(), PageError> {
        match self.failing.get(locator) {
            Some(message) => Err(PageError::Backend(message.clone())),
            None => Ok(()),
        }
    }

    fn apply_next_frame(&mut self) -> Result<(), PageError> {
        match self.active.pop_front() {
            None | Some(Frame::Pending) => Ok(()),
            Some(Frame::Text(text)) => {
                if self.block_open {
                    if let Some(last) = self.answers.last_mut() {
                        *last = text;
                    }
                } else {
                    self.answers.push(text);
                    self.block_open = true;
                }
                Ok(())
            }
            Some(Frame::Fail(message)) => Err(PageError::Backend(message)),
        }
    }

    fn submit(&mut self) {
        let prompt = std::mem::take(&mut self.input);
        self.actions.push(Action::Submit(prompt.clone()));
        self.prompts.push(prompt);
        self.active = self.scripts.pop_front().unwrap_or_default().into();
        self.block_open = false;
    }
}

/// Scripted page for tests.
#[derive(Clone)]
pub struct FakePage {
    state: Arc<Mutex<FakeState>>,
}

impl FakePage {
    /// Page where every contract element exists and no answers are rendered.
    #[must_use]
    pub fn new(contract: &UiContract) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                contract: contract.clone(),
                absent: HashSet::new(),
                failing: HashMap::new(),
                answers: Vec::new(),
                prompts: Vec::new(),
                input: String::new(),
                scripts: VecDeque::new(),
                active: VecDeque::new(),
                block_open: false,
                actions: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the answer frames for the next submission.
    #[must_use]
    pub fn with_turn(self, frames: impl IntoIterator<Item = Frame>) -> Self {
        self.lock().scripts.push_back(frames.into_iter().collect());
        self
    }

    /// Pre-render an answer block that predates every submission.
    #[must_use]
    pub fn with_rendered_answer(self, text: impl Into<String>) -> Self {
        self.lock().answers.push(text.into());
        self
    }

    /// Make an element never appear.
    #[must_use]
    pub fn without(self, locator: &Locator) -> Self {
        self.lock().absent.insert(locator.clone());
        self
    }

    /// Make waits and lookups on an element fail.
    #[must_use]
    pub fn failing(self, locator: &Locator, message: impl Into<String>) -> Self {
        self.lock().failing.insert(locator.clone(), message.into());
        self
    }

    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    #[must_use]
    pub fn answers(&self) -> Vec<String> {
        self.lock().answers.clone()
    }

    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    #[must_use]
    pub fn quit_calls(&self) -> usize {
        self.lock()
            .actions
            .iter()
            .filter(|a| matches!(a, Action::Quit))
            .count()
    }

    fn element(&self, locator: &Locator, index: usize, kind: Kind) -> FakeElement {
        FakeElement {
            state: Arc::clone(&self.state),
            locator: locator.clone(),
            index,
            kind,
        }
    }

    fn wait_for(&self, locator: &Locator, timeout: Duration) -> Result<FakeElement, PageError> {
        let mut state = self.lock();
        state.check_failing(locator)?;
        let kind = state.kind(locator);
        let timed_out = || PageError::Timeout {
            locator: locator.clone(),
            duration: timeout,
        };
        if state.absent.contains(locator) {
            return Err(timed_out());
        }
        match kind {
            Kind::Answer => {
                while state.answers.is_empty() && !state.active.is_empty() {
                    state.apply_next_frame()?;
                }
                if state.answers.is_empty() {
                    return Err(timed_out());
                }
            }
            Kind::Prompt if state.prompts.is_empty() => return Err(timed_out()),
            _ => {}
        }
        drop(state);
        Ok(self.element(locator, 0, kind))
    }
}

#[async_trait]
impl PageSurface for FakePage {
    type Element = FakeElement;

    async fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.lock().actions.push(Action::Navigate(url.to_string()));
        Ok(())
    }

    async fn wait_until_clickable(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FakeElement, PageError> {
        self.wait_for(locator, timeout)
    }

    async fn wait_until_present(
        &self,
        locator: &Locator,
        timeout: Duration,
    ) -> Result<FakeElement, PageError> {
        self.wait_for(locator, timeout)
    }

    async fn find_all(&self, locator: &Locator) -> Result<Vec<FakeElement>, PageError> {
        let mut state = self.lock();
        state.check_failing(locator)?;
        if state.absent.contains(locator) {
            return Ok(Vec::new());
        }
        let kind = state.kind(locator);
        let count = match kind {
            Kind::Answer => {
                state.apply_next_frame()?;
                state.answers.len()
            }
            Kind::Prompt => state.prompts.len(),
            Kind::Input | Kind::Other => 1,
        };
        drop(state);
        Ok((0..count)
            .map(|index| self.element(locator, index, kind))
            .collect())
    }

    async fn scroll_into_view(&self, element: &FakeElement) -> Result<(), PageError> {
        self.lock()
            .actions
            .push(Action::Scroll(element.locator.clone()));
        Ok(())
    }

    async fn screenshot(&self, path: &Path) -> Result<(), PageError> {
        self.lock()
            .actions
            .push(Action::Screenshot(path.to_path_buf()));
        Ok(())
    }

    async fn solve_challenge(&self) -> Result<bool, PageError> {
        self.lock().actions.push(Action::Challenge);
        Ok(false)
    }

    async fn quit(&self) -> Result<(), PageError> {
        self.lock().actions.push(Action::Quit);
        Ok(())
    }
}

/// Element handle into a [`FakePage`].
pub struct FakeElement {
    state: Arc<Mutex<FakeState>>,
    locator: Locator,
    index: usize,
    kind: Kind,
}

impl FakeElement {
    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stale(&self) -> PageError {
        PageError::Stale {
            locator: self.locator.clone(),
            index: self.index,
        }
    }
}

#[async_trait]
impl PageElement for FakeElement {
    async fn text(&self) -> Result<String, PageError> {
        let state = self.lock();
        match self.kind {
            Kind::Answer => state.answers.get(self.index).cloned().ok_or_else(|| self.stale()),
            Kind::Prompt => state.prompts.get(self.index).cloned().ok_or_else(|| self.stale()),
            Kind::Input => Ok(state.input.clone()),
            Kind::Other => Ok(String::new()),
        }
    }

    async fn click(&self) -> Result<(), PageError> {
        self.lock().actions.push(Action::Click(self.locator.clone()));
        Ok(())
    }

    async fn send_text(&self, text: &str) -> Result<(), PageError> {
        let mut state = self.lock();
        state
            .actions
            .push(Action::Type(self.locator.clone(), text.to_string()));
        if self.kind == Kind::Input {
            state.input.push_str(text);
        }
        Ok(())
    }

    async fn press_enter(&self) -> Result<(), PageError> {
        let mut state = self.lock();
        if self.kind == Kind::Input {
            state.submit();
        }
        Ok(())
    }
}

/// Clock that only moves when slept on.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Move time forward without a sleep.
    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += by;
    }

    /// Every sleep requested so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_render_one_block_per_submission() {
        let contract = UiContract::default();
        let page = FakePage::new(&contract)
            .with_turn([Frame::Pending, Frame::text("par"), Frame::text("partial done")]);

        let input = page
            .wait_until_clickable(&contract.chat_input, Duration::from_secs(1))
            .await
            .unwrap();
        input.send_text("A?").await.unwrap();
        input.press_enter().await.unwrap();

        assert!(page.find_all(&contract.answer_block).await.unwrap().is_empty());
        assert_eq!(page.find_all(&contract.answer_block).await.unwrap().len(), 1);
        let blocks = page.find_all(&contract.answer_block).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text().await.unwrap(), "partial done");
        assert_eq!(page.prompts(), vec!["A?".to_string()]);
    }

    #[tokio::test]
    async fn test_absent_element_times_out() {
        let contract = UiContract::default();
        let page = FakePage::new(&contract).without(&contract.mode_toggle);
        let err = page
            .wait_until_clickable(&contract.mode_toggle, Duration::from_secs(15))
            .await
            .err()
            .unwrap();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_secs(2)).await;
        assert_eq!(clock.now(), Duration::from_secs(4));
        assert_eq!(clock.sleeps().len(), 2);
    }
}
