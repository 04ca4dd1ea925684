//! Timeout configuration for control-port sessions.
//!
//! The control protocol has no way to cancel a command once it is on the
//! wire, so the command timeout only bounds how long a caller waits. It is
//! unset by default: a command waits until its reply arrives or the
//! connection closes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timeouts applied by a control connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlTimeouts {
    /// Timeout for establishing the TCP connection.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::connect_secs")]
    pub connect_secs: u64,

    /// Timeout for the dialect probe sent straight after connecting.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::detect_secs")]
    pub detect_secs: u64,

    /// How long a caller waits for a reply before giving up.
    ///
    /// Default: unset (wait for the reply or for the connection to close)
    #[serde(default)]
    pub command_secs: Option<u64>,

    /// How long `close` waits for the receive loop to wind down.
    ///
    /// Default: 5 seconds
    #[serde(default = "defaults::shutdown_secs")]
    pub shutdown_secs: u64,
}

impl Default for ControlTimeouts {
    fn default() -> Self {
        Self {
            connect_secs: defaults::connect_secs(),
            detect_secs: defaults::detect_secs(),
            command_secs: None,
            shutdown_secs: defaults::shutdown_secs(),
        }
    }
}

impl ControlTimeouts {
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    #[must_use]
    pub const fn detect_timeout(&self) -> Duration {
        Duration::from_secs(self.detect_secs)
    }

    #[must_use]
    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_secs.map(Duration::from_secs)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_secs)
    }
}

mod defaults {
    pub const fn connect_secs() -> u64 {
        10
    }
    pub const fn detect_secs() -> u64 {
        10
    }
    pub const fn shutdown_secs() -> u64 {
        5
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_control_timeouts_defaults() {
        let timeouts = ControlTimeouts::default();
        assert_eq!(timeouts.connect_secs, 10);
        assert_eq!(timeouts.detect_secs, 10);
        assert_eq!(timeouts.command_secs, None);
        assert_eq!(timeouts.shutdown_secs, 5);
        assert_eq!(timeouts.command_timeout(), None);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let timeouts: ControlTimeouts = ron::from_str("(command_secs: Some(3))").unwrap();
        assert_eq!(timeouts.command_timeout(), Some(Duration::from_secs(3)));
        assert_eq!(timeouts.connect_timeout(), Duration::from_secs(10));
        assert_eq!(timeouts.detect_timeout(), Duration::from_secs(10));
    }
}
