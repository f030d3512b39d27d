//! Minimal Chrome DevTools Protocol client.
//!
//! Covers the slice of CDP that walletflow needs: connecting to a browser
//! over its debugger websocket (local launch or a remote CDP service),
//! browser-context and target management, per-target command sessions, and
//! event fan-out for page-lifecycle, console, and network observation.

mod client;
mod error;
mod protocol;
mod target;

pub use client::CdpClient;
pub use error::CdpError;
pub use protocol::{BrowserVersion, CdpEvent, CdpRequest, CdpResponse, TargetInfo};
pub use target::TargetSession;

pub type Result<T> = std::result::Result<T, CdpError>;
