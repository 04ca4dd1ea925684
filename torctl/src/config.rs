//! Client configuration
//!
//! Everything a [`Connection`](crate::Connection) needs is passed in through
//! [`ControlConfig`]; the crate keeps no process-wide state.

use serde::Deserialize;
use torctl_common::config::ControlTimeouts;

use crate::Endpoint;

/// Configuration for a control-port connection
///
/// # Example Configuration
///
/// ```ron
/// (
///     endpoint: "127.0.0.1:9051",
///     timeouts: (
///         detect_secs: 5,
///         command_secs: Some(30),
///     ),
///     max_frame_size: 1048576,
/// )
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Address of the control port
    #[serde(default)]
    pub endpoint: Endpoint,

    #[serde(default)]
    pub timeouts: ControlTimeouts,

    /// How many bytes the dialect probe may read while looking for a newline
    ///
    /// Default: 512
    #[serde(default = "defaults::detect_window")]
    pub detect_window: usize,

    /// Largest frame accepted from the peer, including reassembled fragments
    ///
    /// Default: 1 MiB
    #[serde(default = "defaults::max_frame_size")]
    pub max_frame_size: usize,

    /// Capacity of the channel used by [`ChannelHandler`](crate::ChannelHandler)
    ///
    /// Default: 1024
    #[serde(default = "defaults::event_capacity")]
    pub event_capacity: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            timeouts: ControlTimeouts::default(),
            detect_window: defaults::detect_window(),
            max_frame_size: defaults::max_frame_size(),
            event_capacity: defaults::event_capacity(),
        }
    }
}

impl ControlConfig {
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }
}

mod defaults {
    pub const fn detect_window() -> usize {
        512
    }
    pub const fn max_frame_size() -> usize {
        1024 * 1024
    }
    pub const fn event_capacity() -> usize {
        1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ControlConfig::default();
        assert_eq!(config.endpoint, Endpoint::default());
        assert_eq!(config.detect_window, 512);
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert_eq!(config.event_capacity, 1024);
    }

    #[test]
    fn test_deserialize_from_ron() {
        let config: ControlConfig = ron::from_str(
            r#"(
                endpoint: "127.0.0.1:9051",
                timeouts: (command_secs: Some(30)),
                max_frame_size: 4096,
            )"#,
        )
        .unwrap();

        assert_eq!(config.endpoint, Endpoint::new("127.0.0.1", 9051));
        assert_eq!(config.timeouts.command_secs, Some(30));
        assert_eq!(config.timeouts.detect_secs, 10);
        assert_eq!(config.max_frame_size, 4096);
        assert_eq!(config.detect_window, 512);
    }

    #[test]
    fn test_deserialize_rejects_bad_endpoint() {
        let result: Result<ControlConfig, _> = ron::from_str(r#"(endpoint: "host:port")"#);
        assert!(result.is_err());
    }
}
