//! Parser for the kernel's local port range, as found in
//! `/proc/sys/net/ipv4/ip_local_port_range`.
//!
//! The file holds two whitespace-separated integers: the first and the last
//! port the kernel hands out for outbound connections, e.g. `32768\t60999`.

use std::fmt;
use std::io::Read;
use std::num::ParseIntError;
use std::path::Path;
use std::str::FromStr;

use crate::fsutil;

use super::{Error, Result};

/// One end of the local port range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    First,
    Last,
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::First => f.write_str("first port"),
            Bound::Last => f.write_str("last port"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PortRangeError {
    #[error("missing {0}")]
    MissingBound(Bound),

    #[error("invalid {bound} '{value}': {source}")]
    InvalidBound {
        bound: Bound,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("last port {last} is below first port {first}")]
    Inverted { first: u16, last: u16 },
}

/// The range of local ports available for outbound connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    /// Number of usable ports in the range, both ends included.
    pub fn total(&self) -> u32 {
        u32::from(self.last) - u32::from(self.first) + 1
    }
}

fn parse_bound(value: Option<&str>, bound: Bound) -> std::result::Result<u16, PortRangeError> {
    let value = value.ok_or(PortRangeError::MissingBound(bound))?;
    value
        .parse::<u16>()
        .map_err(|source| PortRangeError::InvalidBound {
            bound,
            value: value.to_owned(),
            source,
        })
}

impl FromStr for PortRange {
    type Err = PortRangeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut fields = s.split_whitespace();
        let first = parse_bound(fields.next(), Bound::First)?;
        let last = parse_bound(fields.next(), Bound::Last)?;
        if last < first {
            return Err(PortRangeError::Inverted { first, last });
        }

        Ok(Self { first, last })
    }
}

/// Reads and parses an `ip_local_port_range` file.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::Read`] if reading from the file fails.
/// - [`Error::PortRange`] if the contents are not a valid range.
pub fn read_port_range(path: impl AsRef<Path>) -> Result<PortRange> {
    let path = path.as_ref();
    let mut reader = fsutil::open_file_reader(path)?;
    let mut contents = String::with_capacity(32);
    reader
        .read_to_string(&mut contents)
        .map_err(|source| Error::Read {
            path: path.to_path_buf(),
            source,
        })?;

    contents.parse().map_err(|source| Error::PortRange {
        path: path.to_path_buf(),
        source,
    })
}
