//! Environment configuration.
//!
//! The sidecar has no configuration file. The only knob is the listen port,
//! read from `METRICS_SIDECAR_PORT`.

use std::net::{Ipv4Addr, SocketAddr};

/// Environment variable overriding the listen port.
pub const PORT_ENV: &str = "METRICS_SIDECAR_PORT";

/// Port used when [`PORT_ENV`] is unset or empty.
pub const DEFAULT_PORT: u16 = 9999;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid value for `METRICS_SIDECAR_PORT`: '{value}': {source}")]
    InvalidPort {
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPort`] if `METRICS_SIDECAR_PORT` is set to
    /// something other than a valid port number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration using `lookup` to resolve variables.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup(PORT_ENV) {
            Some(value) if !value.trim().is_empty() => {
                let trimmed = value.trim();
                trimmed
                    .parse::<u16>()
                    .map_err(|source| Error::InvalidPort {
                        value: trimmed.to_owned(),
                        source,
                    })?
            }
            _ => DEFAULT_PORT,
        };

        Ok(Self { port })
    }

    /// Address the server binds to: all interfaces on the configured port.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}
