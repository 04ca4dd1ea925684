//! Replies to commands
//!
//! A reply is always one value, however many lines the peer used for it: the
//! lines of a multi-line text reply are kept together, in order, with any
//! data blocks attached to the line that announced them.

use crate::frame::{Frame, ReplyLine};

/// A successful reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    frame: Frame,
}

impl Reply {
    pub(crate) const fn new(frame: Frame) -> Self {
        Self { frame }
    }

    /// Status code of the final text line, or the binary message type
    #[must_use]
    pub fn code(&self) -> u16 {
        self.frame.code()
    }

    /// All lines of a text reply; empty for binary replies
    #[must_use]
    pub fn lines(&self) -> &[ReplyLine] {
        match &self.frame {
            Frame::Text { lines } => lines,
            Frame::Binary { .. } => &[],
        }
    }

    /// The raw body of a binary reply; empty for text replies
    #[must_use]
    pub fn body(&self) -> &[u8] {
        match &self.frame {
            Frame::Binary { body, .. } => body,
            Frame::Text { .. } => &[],
        }
    }

    /// The final line's text, or the body up to its first NUL for binary
    /// replies
    #[must_use]
    pub fn message(&self) -> String {
        match &self.frame {
            Frame::Text { lines } => lines
                .last()
                .map(|line| line.text.clone())
                .unwrap_or_default(),
            Frame::Binary { body, .. } => {
                let end = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                String::from_utf8_lossy(&body[..end]).into_owned()
            }
        }
    }

    #[must_use]
    pub const fn frame(&self) -> &Frame {
        &self.frame
    }

    #[must_use]
    pub fn into_frame(self) -> Frame {
        self.frame
    }
}
