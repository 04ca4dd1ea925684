//! Configuration fragments shared between the library and the binary.
//!
//! - [`timeouts`]: how long the client waits on the control port

pub mod timeouts;

pub use timeouts::ControlTimeouts;
