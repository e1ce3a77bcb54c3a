//! Broadcast + history feed of turn lifecycle events.

use std::{
    collections::VecDeque,
    sync::{Arc, RwLock},
};

use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::types::{AnswerSnapshot, Turn};

/// History size limit (4 MB of rendered text).
const HISTORY_BYTES: usize = 4 * 1024 * 1024;

/// Something that happened to a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A prompt is about to be submitted.
    Started { index: usize, prompt: String },
    /// The new answer block was read on a poll tick.
    Snapshot { index: usize, snapshot: AnswerSnapshot },
    /// The turn reached a terminal state.
    Closed(Turn),
    /// The run is over; no further events follow.
    Finished,
}

impl TurnEvent {
    fn approx_bytes(&self) -> usize {
        const OVERHEAD: usize = 32;
        OVERHEAD
            + match self {
                Self::Started { prompt, .. } => prompt.len(),
                Self::Snapshot { snapshot, .. } => snapshot.raw_text.len(),
                Self::Closed(turn) => {
                    turn.prompt.len() + turn.final_answer.as_ref().map_or(0, String::len)
                }
                Self::Finished => 0,
            }
    }
}

#[derive(Clone)]
struct StoredEvent {
    event: TurnEvent,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredEvent>,
    total_bytes: usize,
}

/// Turn event store with live broadcast and replayable history.
///
/// Late subscribers receive the retained history first, then live events.
/// Snapshots are the bulk of the traffic; the oldest entries are evicted
/// once the byte budget is exceeded.
pub struct TurnEvents {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<TurnEvent>,
}

impl Default for TurnEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnEvents {
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Create a shared store.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Publish to live listeners and history.
    pub fn push(&self, event: TurnEvent) {
        let _ = self.sender.send(event.clone());
        let bytes = event.approx_bytes();

        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredEvent { event, bytes });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
    }

    pub fn push_started(&self, index: usize, prompt: &str) {
        self.push(TurnEvent::Started {
            index,
            prompt: prompt.to_string(),
        });
    }

    pub fn push_snapshot(&self, index: usize, snapshot: AnswerSnapshot) {
        self.push(TurnEvent::Snapshot { index, snapshot });
    }

    pub fn push_closed(&self, turn: Turn) {
        self.push(TurnEvent::Closed(turn));
    }

    pub fn push_finished(&self) {
        self.push(TurnEvent::Finished);
    }

    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<TurnEvent> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn get_history(&self) -> Vec<TurnEvent> {
        self.inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.event.clone())
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, TurnEvent> {
        let (history, rx) = (self.get_history(), self.get_receiver());

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Closed turns, in order, until `Finished`.
    #[must_use]
    pub fn closed_turns_stream(&self) -> futures::stream::BoxStream<'static, Turn> {
        self.history_plus_stream()
            .take_while(|event| future::ready(!matches!(event, TurnEvent::Finished)))
            .filter_map(|event| async move {
                match event {
                    TurnEvent::Closed(turn) => Some(turn),
                    _ => None,
                }
            })
            .boxed()
    }
}
