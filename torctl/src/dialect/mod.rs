//! Wire dialects
//!
//! The control port speaks one of two incompatible encodings. Everything
//! that differs between them lives behind [`Codec`]; the connection, the
//! receive loop and the correlator only ever talk to the trait object picked
//! at detection time.

pub mod binary;
pub mod text;

use std::fmt::{Display, Formatter};

use crate::{Result, command::Command, event::Event, frame::Frame, reply::Reply};

/// The negotiated wire encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Length-prefixed binary messages (version 0)
    Binary,
    /// CRLF-terminated text lines with status codes (version 1)
    Text,
}

impl Dialect {
    /// Protocol version number
    #[must_use]
    pub const fn version(self) -> u8 {
        match self {
            Self::Binary => 0,
            Self::Text => 1,
        }
    }

    #[must_use]
    pub fn codec(self) -> &'static dyn Codec {
        match self {
            Self::Binary => &binary::BinaryCodec,
            Self::Text => &text::TextCodec,
        }
    }
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Binary => write!(f, "binary (v{})", self.version()),
            Self::Text => write!(f, "text (v{})", self.version()),
        }
    }
}

/// Everything dialect specific: framing, command encoding, reply checking
/// and interpretation, and event decoding
pub trait Codec: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Try to take one complete frame off the front of `buf`
    ///
    /// Returns the frame and the number of bytes it occupied, or `None` if
    /// more bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the buffered bytes can never form
    /// a valid frame, or the frame would exceed `max_frame_size`
    fn parse_frame(&self, buf: &[u8], max_frame_size: usize) -> Result<Option<(Frame, usize)>>;

    /// Whether the frame is an asynchronous event rather than a reply
    fn is_event(&self, frame: &Frame) -> bool;

    /// Decode an event frame
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the event is malformed
    fn decode_event(&self, frame: &Frame) -> Result<Event>;

    /// Decode the payload of an event; see [`crate::event::decode`]
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the event is malformed
    fn decode_event_body(&self, raw: &[u8]) -> Result<Event>;

    /// Serialise a command into the bytes to write
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Unsupported` if the command cannot be expressed
    /// in this dialect, or an argument would break framing
    fn encode_command(&self, command: &Command) -> Result<Vec<u8>>;

    /// Turn a reply frame into a [`Reply`], or an `ErrorReply` if the peer
    /// rejected the command
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ErrorReply` for failure replies
    fn check_reply(&self, frame: Frame) -> Result<Reply>;

    /// Key/value pairs answering GETINFO
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the reply is not shaped like one
    fn info_values(&self, reply: &Reply) -> Result<Vec<(String, String)>>;

    /// Key/value pairs answering GETCONF
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the reply is not shaped like one
    fn conf_values(&self, reply: &Reply) -> Result<Vec<(String, String)>>;

    /// Circuit id answering EXTENDCIRCUIT
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if the reply carries no circuit id
    fn extended_circuit(&self, reply: &Reply) -> Result<u32>;

    /// Address pairs answering MAPADDRESS
    ///
    /// # Errors
    ///
    /// Returns `ControlError::Protocol` if a line is not an address pair
    fn mapped_addresses(&self, reply: &Reply) -> Result<Vec<(String, String)>>;
}

/// Reject arguments that would break out of their line or field
pub(crate) fn check_argument(value: &str, what: &str) -> Result<()> {
    if value.contains(['\r', '\n', '\0']) {
        return Err(crate::ControlError::Unsupported(format!(
            "{what} may not contain line breaks or NUL"
        )));
    }
    Ok(())
}
