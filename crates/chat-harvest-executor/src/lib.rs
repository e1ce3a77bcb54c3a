//! Turn execution and answer-completion detection.
//!
//! Provides:
//! - `CompletionDetector` - polling state machine over rendered answer blocks
//! - `TurnExecutor` - submit one prompt, return one closed turn

pub mod detector;
pub mod turn;

pub use detector::{CompletionDetector, Detection, DetectionError};
pub use turn::{TurnError, TurnExecutor};
