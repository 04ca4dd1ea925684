//! Client for the Tor control port
//!
//! This crate provides an async connection to a control port that:
//! - Detects which of the two wire dialects (binary v0 or text v1) the peer speaks
//! - Authenticates with a password, a cookie file, or nothing
//! - Sends commands and matches their replies in FIFO order
//! - Decodes asynchronous events and dispatches them to an [`EventHandler`]
//!
//! Everything dialect specific sits behind [`Codec`](dialect::Codec), so one
//! [`Connection`] type serves both dialects.

pub mod auth;
pub mod command;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod detect;
pub mod dialect;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod frame;
pub mod receiver;
pub mod reply;
pub mod sender;
pub mod transport;

pub use auth::{Credential, derive_key, generate_specifier, verify};
pub use command::{Command, ProcessSignal};
pub use config::ControlConfig;
pub use connection::Connection;
pub use dialect::Dialect;
pub use dispatch::{ChannelHandler, EventHandler, LoggingHandler, dispatch};
pub use endpoint::Endpoint;
pub use error::{ControlError, Result};
pub use event::{
    AddressMapped, Bandwidth, CircuitStatus, Event, EventCategory, EventKind, LogMessage,
    NewDescriptor, OrConnStatus, Severity, StreamStatus, UnknownEvent,
};
pub use frame::{Frame, ReplyLine};
pub use reply::Reply;
