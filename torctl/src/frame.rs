//! Frames as they come off the wire, before they are classified as replies or
//! events

/// One line of a text-dialect frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyLine {
    /// The three digit status code (e.g. 250, 515, 650)
    pub code: u16,
    /// The text following the status code and separator
    pub text: String,
    /// The data block that followed a `+` line, already dot-unstuffed
    pub data: Option<String>,
}

impl ReplyLine {
    #[must_use]
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// A complete frame in either dialect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `[u16 length][u16 type][body]`, with fragments already reassembled
    Binary { kind: u16, body: Vec<u8> },
    /// Every line of a (possibly multi-line) text reply or event, in order
    Text { lines: Vec<ReplyLine> },
}

impl Frame {
    /// The message type of a binary frame, or the final status code of a
    /// text frame
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Binary { kind, .. } => *kind,
            Self::Text { lines } => lines.last().map_or(0, |line| line.code),
        }
    }

    /// Size of the frame's payload, used for logging
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Binary { body, .. } => body.len(),
            Self::Text { lines } => lines
                .iter()
                .map(|line| line.text.len() + line.data.as_ref().map_or(0, String::len))
                .sum(),
        }
    }
}
