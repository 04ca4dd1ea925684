//! Commands that can be sent to the control port

use std::fmt::{Display, Formatter};

use crate::{auth::Credential, event::EventCategory};

/// Signals that can be delivered to the controlled process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Reload configuration (HUP)
    Reload,
    /// Controlled shutdown (INT)
    Shutdown,
    /// Dump statistics to the log (USR1)
    Dump,
    /// Switch logging to debug level (USR2)
    Debug,
    /// Immediate shutdown (TERM)
    Halt,
}

impl ProcessSignal {
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::Reload => "RELOAD",
            Self::Shutdown => "SHUTDOWN",
            Self::Dump => "DUMP",
            Self::Debug => "DEBUG",
            Self::Halt => "HALT",
        }
    }

    /// The POSIX signal number used by the binary dialect
    #[must_use]
    pub const fn binary_code(self) -> u8 {
        match self {
            Self::Reload => 0x01,
            Self::Shutdown => 0x02,
            Self::Dump => 0x0A,
            Self::Debug => 0x0C,
            Self::Halt => 0x0F,
        }
    }
}

impl Display for ProcessSignal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A single request to the control port
///
/// Commands are dialect independent; the negotiated codec turns them into
/// bytes, and rejects the ones it cannot express.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Authenticate(Credential),
    GetInfo(Vec<String>),
    GetConf(Vec<String>),
    /// Set (or, with `None`, reset to default) configuration options
    SetConf(Vec<(String, Option<String>)>),
    SetEvents(Vec<EventCategory>),
    SaveConf,
    Signal(ProcessSignal),
    MapAddress(Vec<(String, String)>),
    /// Extend `circuit` through `path`; circuit 0 asks for a new one
    ExtendCircuit {
        circuit: u32,
        path: Vec<String>,
    },
    AttachStream {
        stream: u32,
        circuit: u32,
    },
    RedirectStream {
        stream: u32,
        address: String,
    },
    CloseStream {
        stream: u32,
        reason: u8,
    },
    CloseCircuit {
        circuit: u32,
        if_unused: bool,
    },
    PostDescriptor(String),
}

impl Command {
    /// The text-dialect keyword, used for logging in both dialects
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticate(_) => "AUTHENTICATE",
            Self::GetInfo(_) => "GETINFO",
            Self::GetConf(_) => "GETCONF",
            Self::SetConf(_) => "SETCONF",
            Self::SetEvents(_) => "SETEVENTS",
            Self::SaveConf => "SAVECONF",
            Self::Signal(_) => "SIGNAL",
            Self::MapAddress(_) => "MAPADDRESS",
            Self::ExtendCircuit { .. } => "EXTENDCIRCUIT",
            Self::AttachStream { .. } => "ATTACHSTREAM",
            Self::RedirectStream { .. } => "REDIRECTSTREAM",
            Self::CloseStream { .. } => "CLOSESTREAM",
            Self::CloseCircuit { .. } => "CLOSECIRCUIT",
            Self::PostDescriptor(_) => "POSTDESCRIPTOR",
        }
    }

    /// Whether the encoded command carries a secret and must not be logged
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Authenticate(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_authenticate_is_sensitive() {
        assert!(Command::Authenticate(Credential::Password("hunter2".into())).is_sensitive());
        assert!(!Command::GetInfo(vec!["version".into()]).is_sensitive());
        assert!(!Command::SaveConf.is_sensitive());
    }

    #[test]
    fn test_signal_codes() {
        assert_eq!(ProcessSignal::Reload.binary_code(), 1);
        assert_eq!(ProcessSignal::Halt.binary_code(), 15);
        assert_eq!(ProcessSignal::Dump.to_string(), "DUMP");
    }
}
