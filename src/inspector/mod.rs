//! System inspector: read-only queries against procfs.
//!
//! Reads the host name, the kernel's local port range and the TCP connection
//! tables. The public operations on [`Inspector`] never fail: every error is
//! logged and replaced with a default so a scrape always gets an answer.
//!
//! | Query                                | Source                              | Fallback |
//! |--------------------------------------|-------------------------------------|----------|
//! | [`Inspector::pod_name`]              | `sys/kernel/hostname`               | `""`     |
//! | [`Inspector::port_total_count`]      | `sys/net/ipv4/ip_local_port_range`  | `0`      |
//! | [`Inspector::active_connections`]    | `net/tcp`, `net/tcp6`               | `[]`     |
mod error;
mod hostname;
mod port_range;
mod tcp;

use std::path::{Path, PathBuf};

pub use error::{Error, Result};
pub use hostname::read_hostname;
pub use port_range::{Bound, PortRange, PortRangeError, read_port_range};
pub use tcp::{ConnectionRecord, ParseError, TcpField, TcpState, parse_tcp_line, read_tcp_table};

use crate::error::ResultOkLogExt;

/// Default mount point of procfs.
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Port total reported when the local port range can't be read.
pub const FALLBACK_PORT_TOTAL: u32 = 0;

const HOSTNAME_PATH: &str = "sys/kernel/hostname";
const PORT_RANGE_PATH: &str = "sys/net/ipv4/ip_local_port_range";
const TCP_PATH: &str = "net/tcp";
const TCP6_PATH: &str = "net/tcp6";

/// Host state read for a single scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub pod_name: String,
    pub port_total: u32,
    pub connections: Vec<ConnectionRecord>,
}

/// Reads host state from a procfs mount.
#[derive(Debug, Clone)]
pub struct Inspector {
    proc_root: PathBuf,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl Inspector {
    /// Creates an inspector reading from the procfs mounted at `proc_root`.
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    pub fn proc_root(&self) -> &Path {
        &self.proc_root
    }

    /// Returns the host name, or an empty string if it can't be read.
    pub fn pod_name(&self) -> String {
        read_hostname(self.proc_root.join(HOSTNAME_PATH))
            .ok_log()
            .unwrap_or_default()
    }

    /// Returns the number of ports in the local port range (`last - first + 1`).
    ///
    /// Returns [`FALLBACK_PORT_TOTAL`] if the range can't be read or is malformed.
    pub fn port_total_count(&self) -> u32 {
        read_port_range(self.proc_root.join(PORT_RANGE_PATH))
            .ok_log()
            .map(|range| range.total())
            .unwrap_or(FALLBACK_PORT_TOTAL)
    }

    /// Returns all sockets from the IPv4 and IPv6 TCP tables.
    ///
    /// A table that can't be read or parsed contributes no connections. A
    /// missing IPv6 table is expected on hosts with IPv6 disabled and is not
    /// reported as an error.
    pub fn active_connections(&self) -> Vec<ConnectionRecord> {
        let mut connections = read_tcp_table(self.proc_root.join(TCP_PATH))
            .ok_log()
            .unwrap_or_default();

        match read_tcp_table(self.proc_root.join(TCP6_PATH)) {
            Ok(v6) => connections.extend(v6),
            Err(Error::FileOpen(err)) if err.is_not_found() => {
                log::debug!("IPv6 TCP table not available: {}", err.path.display());
            }
            Err(err) => log::error!("{err}"),
        }

        connections
    }

    /// Reads everything a scrape needs.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            pod_name: self.pod_name(),
            port_total: self.port_total_count(),
            connections: self.active_connections(),
        }
    }
}
