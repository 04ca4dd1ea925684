//! Shared plumbing for the torctl crates: logging, configuration fragments
//! and the shutdown signal.

pub mod config;
pub mod logging;

pub use tracing;

/// Lifecycle signal broadcast to background tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
