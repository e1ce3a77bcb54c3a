//! Core abstractions for harvesting answers from a conversational web UI.
//!
//! This crate provides the fundamental building blocks:
//! - `Session`, `Turn`, `AnswerSnapshot`, `ConversationLog` - the data model
//! - `PageSurface` / `PageElement` - the page adapter capability set
//! - `Clock` - injectable time source for bounded polling
//! - `ConversationRecorder` - persistence seam for prompt/answer pairs
//! - `TurnEvents` - broadcast + history feed of turn progress
//! - `HarvestConfig` - INI configuration with validation

pub mod config;
pub mod contract;
pub mod events;
pub mod sentinel;
pub mod traits;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{Credentials, DetectionSettings, HarvestConfig, SessionSettings};
pub use contract::UiContract;
pub use events::{TurnEvent, TurnEvents};
pub use sentinel::Sentinel;
pub use traits::{
    Clock, ConversationRecorder, Locator, PageElement, PageError, PageSurface, RecorderError,
    TokioClock,
};
pub use types::{
    AnswerSnapshot, ConversationLog, Mode, Session, SessionId, TranscriptEntry, Turn, TurnOutcome,
};
