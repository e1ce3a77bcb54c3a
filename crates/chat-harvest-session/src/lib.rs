//! Session orchestration and recording for chat harvesting.
//!
//! Provides:
//! - `SessionManager` - login, mode selection and teardown over one page
//! - `ConversationRunner` - drive a batch of prompts through a session
//! - Recorder implementations (memory, file)

pub mod manager;
pub mod runner;
pub mod storage;

pub use manager::{AuthError, SessionManager};
pub use runner::{ConversationPlan, ConversationRunner, RunSettings};
