//! Control-port addresses

use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use serde::{Deserialize, Deserializer};

use crate::{ControlError, Result};

pub const DEFAULT_HOST: &str = "localhost";

/// Port the legacy control protocol listened on by default
pub const DEFAULT_PORT: u16 = 9100;

/// Host and port of a control port
///
/// Parsed from `host:port`, `host`, `port` or the empty string; any part that
/// is left out takes its default (`localhost:9100`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse an endpoint string
    ///
    /// # Errors
    ///
    /// Returns `ControlError::InvalidEndpoint` if a port follows a `:` but is
    /// not a valid port number
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();

        if let Some((host, port)) = value.split_once(':') {
            let port = port
                .parse::<u16>()
                .map_err(|_| ControlError::InvalidEndpoint(format!("bad port in {value:?}")))?;
            let host = if host.is_empty() { DEFAULT_HOST } else { host };
            return Ok(Self::new(host, port));
        }

        if value.is_empty() {
            return Ok(Self::default());
        }

        // A bare value is a port if it parses as one, a host otherwise
        Ok(value.parse::<u16>().map_or_else(
            |_| Self::new(value, DEFAULT_PORT),
            |port| Self::new(DEFAULT_HOST, port),
        ))
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_PORT)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl<'de> Deserialize<'de> for Endpoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Self::parse(&value).map_err(serde::de::Error::custom)
    }
}
