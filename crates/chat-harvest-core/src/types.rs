//! Session, turn and snapshot data model.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session identifier.
pub type SessionId = Uuid;

/// Generation mode of the conversational UI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Default generation mode.
    #[default]
    Standard,
    /// Extended-reasoning mode; answers take materially longer to finish.
    ExtendedReasoning,
}

/// One authenticated conversational session.
///
/// Only the session manager produces or transitions a `Session`, so the
/// fields are private and every transition returns a new value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    authenticated: bool,
    mode: Mode,
    started_at: i64,
}

impl Session {
    /// Session produced by a successful login, in standard mode.
    #[must_use]
    pub fn authenticated() -> Self {
        Self {
            id: Uuid::new_v4(),
            authenticated: true,
            mode: Mode::Standard,
            started_at: unix_now(),
        }
    }

    /// Session that never completed login. Turns against it are rejected.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self {
            authenticated: false,
            ..Self::authenticated()
        }
    }

    /// Same session with a different active mode.
    #[must_use]
    pub fn with_mode(self, mode: Mode) -> Self {
        Self { mode, ..self }
    }

    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// Login timestamp (Unix epoch seconds).
    #[must_use]
    pub const fn started_at(&self) -> i64 {
        self.started_at
    }
}

/// Text of the newest answer block as seen on one poll tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSnapshot {
    /// Rendered text, sentinel included if present.
    pub raw_text: String,
    /// Clock reading when the text was read.
    pub observed_at: Duration,
    /// Whether the sentinel was present.
    pub is_complete: bool,
}

/// Terminal outcome of a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The sentinel was observed in a new answer block.
    Completed,
    /// The mode ceiling elapsed without the sentinel.
    TimedOut,
    /// The page adapter or the detector failed.
    Error { message: String },
}

impl TurnOutcome {
    /// Short label used in logs and recorded placeholders.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Error { .. } => "error",
        }
    }
}

/// One prompt and what became of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Zero-based position in the submitted prompt list.
    pub index: usize,
    pub prompt: String,
    /// Sentinel-stripped answer; `None` unless the outcome is `Completed`.
    pub final_answer: Option<String>,
    pub outcome: TurnOutcome,
    /// Time from submission to the terminal state.
    pub elapsed: Duration,
}

impl Turn {
    #[must_use]
    pub fn completed(index: usize, prompt: String, answer: String, elapsed: Duration) -> Self {
        Self {
            index,
            prompt,
            final_answer: Some(answer),
            outcome: TurnOutcome::Completed,
            elapsed,
        }
    }

    #[must_use]
    pub const fn timed_out(index: usize, prompt: String, elapsed: Duration) -> Self {
        Self {
            index,
            prompt,
            final_answer: None,
            outcome: TurnOutcome::TimedOut,
            elapsed,
        }
    }

    #[must_use]
    pub fn failed(index: usize, prompt: String, message: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            index,
            prompt,
            final_answer: None,
            outcome: TurnOutcome::Error {
                message: message.into(),
            },
            elapsed,
        }
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.outcome == TurnOutcome::Completed
    }
}

/// Ordered, append-only record of closed turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    #[must_use]
    pub const fn new() -> Self {
        Self { turns: Vec::new() }
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Number of turns that finished with an answer.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.turns.iter().filter(|t| t.is_completed()).count()
    }

    /// (prompt, answer) pairs in submission order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.turns
            .iter()
            .map(|t| (t.prompt.as_str(), t.final_answer.as_deref()))
    }
}

impl IntoIterator for ConversationLog {
    type Item = Turn;
    type IntoIter = std::vec::IntoIter<Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.into_iter()
    }
}

/// One prompt/answer pair read back from the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub prompt: String,
    pub answer: String,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_transitions_keep_identity() {
        let session = Session::authenticated();
        let id = session.id();
        let extended = session.with_mode(Mode::ExtendedReasoning);
        assert_eq!(extended.id(), id);
        assert!(extended.is_authenticated());
        assert_eq!(extended.mode(), Mode::ExtendedReasoning);
    }

    #[test]
    fn test_unauthenticated_session() {
        let session = Session::unauthenticated();
        assert!(!session.is_authenticated());
        assert_eq!(session.mode(), Mode::Standard);
    }

    #[test]
    fn test_log_preserves_order() {
        let mut log = ConversationLog::new();
        log.push(Turn::completed(0, "A?".into(), "a".into(), Duration::ZERO));
        log.push(Turn::timed_out(1, "B?".into(), Duration::from_secs(100)));

        let pairs: Vec<_> = log.pairs().collect();
        assert_eq!(pairs, vec![("A?", Some("a")), ("B?", None)]);
        assert_eq!(log.completed_count(), 1);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TurnOutcome::Error {
            message: "boom".into(),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert_eq!(TurnOutcome::TimedOut.label(), "timed_out");
    }
}
