//! Asynchronous events and the categories they are subscribed by
//!
//! Both dialects decode into the same [`Event`] variant; the category table
//! below is the single list of what can be subscribed to and how each
//! category is spelled on the wire.

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use chrono::NaiveDateTime;
use phf::phf_map;
use serde::Deserialize;

use crate::{ControlError, Result, dialect::Dialect};

/// A kind of asynchronous notification that can be subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum EventCategory {
    Circ,
    Stream,
    OrConn,
    Bandwidth,
    NewDesc,
    Debug,
    Info,
    Notice,
    Warn,
    Err,
    AddrMap,
}

struct CategoryInfo {
    keyword: &'static str,
    binary_code: Option<u16>,
}

impl EventCategory {
    pub const ALL: [Self; 11] = [
        Self::Circ,
        Self::Stream,
        Self::OrConn,
        Self::Bandwidth,
        Self::NewDesc,
        Self::Debug,
        Self::Info,
        Self::Notice,
        Self::Warn,
        Self::Err,
        Self::AddrMap,
    ];

    const fn info(self) -> CategoryInfo {
        let (keyword, binary_code) = match self {
            Self::Circ => ("CIRC", Some(0x0001)),
            Self::Stream => ("STREAM", Some(0x0002)),
            Self::OrConn => ("ORCONN", Some(0x0003)),
            Self::Bandwidth => ("BW", Some(0x0004)),
            Self::NewDesc => ("NEWDESC", Some(0x0006)),
            Self::Debug => ("DEBUG", Some(0x0007)),
            Self::Info => ("INFO", Some(0x0008)),
            Self::Notice => ("NOTICE", Some(0x0009)),
            Self::Warn => ("WARN", Some(0x000A)),
            Self::Err => ("ERR", Some(0x000B)),
            Self::AddrMap => ("ADDRMAP", None),
        };
        CategoryInfo {
            keyword,
            binary_code,
        }
    }

    /// Keyword used by the text dialect
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        self.info().keyword
    }

    /// Event type code used by the binary dialect, if it has one
    #[must_use]
    pub const fn binary_code(self) -> Option<u16> {
        self.info().binary_code
    }

    /// Look up a text keyword, ignoring case
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        KEYWORDS.get(keyword.to_ascii_uppercase().as_str()).copied()
    }

    #[must_use]
    pub fn from_binary_code(code: u16) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| category.binary_code() == Some(code))
    }
}

static KEYWORDS: phf::Map<&'static str, EventCategory> = phf_map! {
    "CIRC" => EventCategory::Circ,
    "STREAM" => EventCategory::Stream,
    "ORCONN" => EventCategory::OrConn,
    "BW" => EventCategory::Bandwidth,
    "NEWDESC" => EventCategory::NewDesc,
    "DEBUG" => EventCategory::Debug,
    "INFO" => EventCategory::Info,
    "NOTICE" => EventCategory::Notice,
    "WARN" => EventCategory::Warn,
    "ERR" => EventCategory::Err,
    "ADDRMAP" => EventCategory::AddrMap,
};

impl Display for EventCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

impl FromStr for EventCategory {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_keyword(s.trim())
            .ok_or_else(|| ControlError::Unsupported(format!("unknown event category {s:?}")))
    }
}

impl TryFrom<String> for EventCategory {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Severity of a [`LogMessage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warn,
    Err,
}

impl Severity {
    #[must_use]
    pub const fn category(self) -> EventCategory {
        match self {
            Self::Debug => EventCategory::Debug,
            Self::Info => EventCategory::Info,
            Self::Notice => EventCategory::Notice,
            Self::Warn => EventCategory::Warn,
            Self::Err => EventCategory::Err,
        }
    }

    pub(crate) const fn from_category(category: EventCategory) -> Option<Self> {
        match category {
            EventCategory::Debug => Some(Self::Debug),
            EventCategory::Info => Some(Self::Info),
            EventCategory::Notice => Some(Self::Notice),
            EventCategory::Warn => Some(Self::Warn),
            EventCategory::Err => Some(Self::Err),
            _ => None,
        }
    }
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.category().keyword())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitStatus {
    pub status: String,
    pub id: u32,
    /// Relays the circuit has been extended through so far, in order
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStatus {
    pub status: String,
    pub id: u32,
    /// Circuit the stream is attached to; always 0 in the binary dialect
    pub circuit: u32,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrConnStatus {
    pub status: String,
    pub target: String,
}

/// Bytes read and written during the last second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bandwidth {
    pub read: u64,
    pub written: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDescriptor {
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogMessage {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressMapped {
    pub from: String,
    pub to: String,
    /// `None` when the mapping never expires
    pub expiry: Option<NaiveDateTime>,
}

/// An event whose type this client does not decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent {
    /// The text keyword, or the binary type code in decimal
    pub kind: String,
    pub body: Vec<u8>,
}

/// A decoded asynchronous event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    CircuitStatus(CircuitStatus),
    StreamStatus(StreamStatus),
    OrConnStatus(OrConnStatus),
    Bandwidth(Bandwidth),
    NewDescriptor(NewDescriptor),
    LogMessage(LogMessage),
    AddressMapped(AddressMapped),
    Unknown(UnknownEvent),
}

/// Discriminant of [`Event`], used to index the dispatch table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CircuitStatus,
    StreamStatus,
    OrConnStatus,
    Bandwidth,
    NewDescriptor,
    LogMessage,
    AddressMapped,
    Unknown,
}

impl EventKind {
    pub const COUNT: usize = 8;
}

impl Event {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::CircuitStatus(_) => EventKind::CircuitStatus,
            Self::StreamStatus(_) => EventKind::StreamStatus,
            Self::OrConnStatus(_) => EventKind::OrConnStatus,
            Self::Bandwidth(_) => EventKind::Bandwidth,
            Self::NewDescriptor(_) => EventKind::NewDescriptor,
            Self::LogMessage(_) => EventKind::LogMessage,
            Self::AddressMapped(_) => EventKind::AddressMapped,
            Self::Unknown(_) => EventKind::Unknown,
        }
    }

    /// The subscription category this event belongs to, `None` for unknown
    /// events
    #[must_use]
    pub const fn category(&self) -> Option<EventCategory> {
        match self {
            Self::CircuitStatus(_) => Some(EventCategory::Circ),
            Self::StreamStatus(_) => Some(EventCategory::Stream),
            Self::OrConnStatus(_) => Some(EventCategory::OrConn),
            Self::Bandwidth(_) => Some(EventCategory::Bandwidth),
            Self::NewDescriptor(_) => Some(EventCategory::NewDesc),
            Self::LogMessage(message) => Some(message.severity.category()),
            Self::AddressMapped(_) => Some(EventCategory::AddrMap),
            Self::Unknown(_) => None,
        }
    }
}

/// Decode the payload of an event frame
///
/// For the binary dialect `raw` is the message body, starting with the
/// two-byte event type. For the text dialect it is the event line after the
/// `650` status code, starting with the keyword.
///
/// # Errors
///
/// Returns `ControlError::Protocol` if the payload is shorter than its type
/// requires, or a required field is missing or cannot be parsed
pub fn decode(raw: &[u8], dialect: Dialect) -> Result<Event> {
    dialect.codec().decode_event_body(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_lookup_ignores_case() {
        assert_eq!(EventCategory::from_keyword("circ"), Some(EventCategory::Circ));
        assert_eq!(EventCategory::from_keyword("Bw"), Some(EventCategory::Bandwidth));
        assert_eq!(EventCategory::from_keyword("NEWCONSENSUS"), None);
    }

    #[test]
    fn test_category_table_is_consistent() {
        for category in EventCategory::ALL {
            assert_eq!(EventCategory::from_keyword(category.keyword()), Some(category));
            if let Some(code) = category.binary_code() {
                assert_eq!(EventCategory::from_binary_code(code), Some(category));
            }
        }
        assert_eq!(EventCategory::AddrMap.binary_code(), None);
        assert_eq!(EventCategory::from_binary_code(0x0005), None);
    }

    #[test]
    fn test_category_from_config_string() {
        let categories: Vec<EventCategory> = ron::from_str(r#"["circ", "BW", "Notice"]"#).unwrap();
        assert_eq!(
            categories,
            vec![
                EventCategory::Circ,
                EventCategory::Bandwidth,
                EventCategory::Notice
            ]
        );
        assert!("bogus".parse::<EventCategory>().is_err());
    }

    #[test]
    fn test_event_category_of_log_message() {
        let event = Event::LogMessage(LogMessage {
            severity: Severity::Warn,
            message: "clock skew".to_string(),
        });
        assert_eq!(event.kind(), EventKind::LogMessage);
        assert_eq!(event.category(), Some(EventCategory::Warn));
    }
}
