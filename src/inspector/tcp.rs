//! Parser for the kernel's TCP connection tables, `/proc/net/tcp` and
//! `/proc/net/tcp6`.
//!
//! Each line after the header describes one socket:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
//!    0: 0100007F:0CEA 00000000:0000 0A 00000000:00000000 00:00000000 00000000   116        0 20598 1 ...
//! ```
//!
//! Addresses are hex dumps of the kernel's in-memory representation, i.e. each
//! 32-bit word is printed in host byte order. Ports and the state code are
//! plain hex numbers.

use std::fmt;
use std::io::BufRead;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::num::ParseIntError;
use std::path::Path;

use crate::classify::TCP_STATE_NAMES;
use crate::fsutil;

use super::{Error, Result};

/// TCP connection state as enumerated by the kernel (`include/net/tcp_states.h`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TcpState {
    Established = 1,
    SynSent = 2,
    SynRecv = 3,
    FinWait1 = 4,
    FinWait2 = 5,
    TimeWait = 6,
    Close = 7,
    CloseWait = 8,
    LastAck = 9,
    Listen = 10,
    Closing = 11,
}

impl TcpState {
    /// Maps a kernel state code to a state. Returns `None` for codes outside `1..=11`.
    pub fn from_code(code: u8) -> Option<Self> {
        let state = match code {
            1 => TcpState::Established,
            2 => TcpState::SynSent,
            3 => TcpState::SynRecv,
            4 => TcpState::FinWait1,
            5 => TcpState::FinWait2,
            6 => TcpState::TimeWait,
            7 => TcpState::Close,
            8 => TcpState::CloseWait,
            9 => TcpState::LastAck,
            10 => TcpState::Listen,
            11 => TcpState::Closing,
            _ => return None,
        };
        Some(state)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Canonical state name, e.g. `ESTABLISHED`.
    pub fn name(self) -> &'static str {
        TCP_STATE_NAMES[usize::from(self.code())]
    }
}

impl fmt::Display for TcpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One socket from a kernel TCP table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub local_addr: IpAddr,
    pub local_port: u16,
    pub remote_addr: IpAddr,
    pub remote_port: u16,
    pub state: TcpState,
}

/// Named fields of a TCP table line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpField {
    Slot,
    LocalAddress,
    RemoteAddress,
    State,
}

impl fmt::Display for TcpField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TcpField::Slot => "sl",
            TcpField::LocalAddress => "local_address",
            TcpField::RemoteAddress => "rem_address",
            TcpField::State => "st",
        };
        write!(f, "{name}")
    }
}

/// Errors that may occur when parsing a TCP table line.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("missing `{0}` field")]
    MissingField(TcpField),

    #[error("invalid address in `{field}`: '{value}'")]
    InvalidAddress { field: TcpField, value: String },

    #[error("invalid port in `{field}`: '{value}': {source}")]
    InvalidPort {
        field: TcpField,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid state code '{value}'")]
    InvalidState { value: String },
}

/// Decodes a hex IPv4 or IPv6 address as printed by the kernel.
fn parse_hex_ip(hex: &str) -> Option<IpAddr> {
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        8 => {
            let word = u32::from_str_radix(hex, 16).ok()?;
            Some(IpAddr::V4(Ipv4Addr::from(word.to_ne_bytes())))
        }
        32 => {
            let mut octets = [0u8; 16];
            for (i, chunk) in octets.chunks_exact_mut(4).enumerate() {
                let word = u32::from_str_radix(&hex[i * 8..i * 8 + 8], 16).ok()?;
                chunk.copy_from_slice(&word.to_ne_bytes());
            }
            Some(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => None,
    }
}

/// Parses an `ADDR:PORT` field.
fn parse_endpoint(
    value: &str,
    field: TcpField,
) -> std::result::Result<(IpAddr, u16), ParseError> {
    let (addr, port) = value
        .split_once(':')
        .ok_or_else(|| ParseError::InvalidAddress {
            field,
            value: value.to_owned(),
        })?;
    let addr = parse_hex_ip(addr).ok_or_else(|| ParseError::InvalidAddress {
        field,
        value: value.to_owned(),
    })?;
    let port = u16::from_str_radix(port, 16).map_err(|source| ParseError::InvalidPort {
        field,
        value: value.to_owned(),
        source,
    })?;

    Ok((addr, port))
}

/// Parses a single (non-header) line of a TCP table.
///
/// Trailing fields after the state code (queues, timers, uid, inode) are ignored.
///
/// # Errors
///
/// Returns a [`ParseError`] if a required field is missing or malformed, or if
/// the state code is not a known TCP state.
pub fn parse_tcp_line(line: &str) -> std::result::Result<ConnectionRecord, ParseError> {
    let mut fields = line.split_whitespace();

    fields
        .next()
        .filter(|slot| slot.ends_with(':'))
        .ok_or(ParseError::MissingField(TcpField::Slot))?;
    let local = fields
        .next()
        .ok_or(ParseError::MissingField(TcpField::LocalAddress))?;
    let remote = fields
        .next()
        .ok_or(ParseError::MissingField(TcpField::RemoteAddress))?;
    let state = fields
        .next()
        .ok_or(ParseError::MissingField(TcpField::State))?;

    let (local_addr, local_port) = parse_endpoint(local, TcpField::LocalAddress)?;
    let (remote_addr, remote_port) = parse_endpoint(remote, TcpField::RemoteAddress)?;
    let state = u8::from_str_radix(state, 16)
        .ok()
        .and_then(TcpState::from_code)
        .ok_or_else(|| ParseError::InvalidState {
            value: state.to_owned(),
        })?;

    Ok(ConnectionRecord {
        local_addr,
        local_port,
        remote_addr,
        remote_port,
        state,
    })
}

/// Reads all connections from a TCP table file such as `/proc/net/tcp`.
///
/// # Errors
///
/// - [`Error::FileOpen`] if the file can't be opened.
/// - [`Error::Read`] if reading from the file fails.
/// - [`Error::Parse`] if any line fails to parse.
pub fn read_tcp_table(path: impl AsRef<Path>) -> Result<Vec<ConnectionRecord>> {
    let path = path.as_ref();
    let buf = fsutil::open_file_reader(path)?;

    read_tcp_table_from_reader(buf, path)
}

/// Reads all connections from a TCP table, skipping the header line.
///
/// `origin` is only used in error messages.
fn read_tcp_table_from_reader<R: BufRead>(
    mut reader: R,
    origin: &Path,
) -> Result<Vec<ConnectionRecord>> {
    let mut line = String::with_capacity(256);
    let mut lineno = 0;
    let mut connections = Vec::new();

    while reader.read_line(&mut line).map_err(|source| Error::Read {
        path: origin.to_path_buf(),
        source,
    })? != 0
    {
        lineno += 1;
        if lineno > 1 && !line.trim().is_empty() {
            let record = parse_tcp_line(&line).map_err(|source| Error::Parse {
                path: origin.to_path_buf(),
                line: lineno,
                source,
            })?;
            connections.push(record);
        }
        line.clear();
    }

    Ok(connections)
}
