//! Chrome DevTools page adapter.
//!
//! Provides:
//! - `CdpPage` - a [`chat_harvest_core::PageSurface`] over one Chrome tab
//! - `CdpClient` - command/reply correlation over the DevTools WebSocket
//! - Chrome discovery and launch with a throwaway profile

pub mod cdp;
pub mod error;
pub mod launch;
pub mod page;

pub use cdp::CdpClient;
pub use error::BrowserError;
pub use launch::{ChromeProcess, LaunchOptions};
pub use page::{CdpElement, CdpPage};
