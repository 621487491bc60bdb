//! Connection classifier.
//!
//! Groups a connection table snapshot into buckets keyed by remote endpoint
//! and connection state. Connections whose remote port lies in the dynamic
//! range (`>= 32768`) are most likely inbound connections to a local listener
//! or peers using ephemeral ports, so they are pooled into a single
//! [`OTHER_LABEL`] bucket instead of producing one bucket per peer port.
//!
//! # Example
//!
//! ```rust
//! use std::net::{IpAddr, Ipv4Addr};
//! use metrics_sidecar::classify::{classify, WellKnownPorts, OTHER_LABEL};
//! use metrics_sidecar::inspector::{ConnectionRecord, TcpState};
//!
//! let conn = ConnectionRecord {
//!     local_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
//!     local_port: 40100,
//!     remote_addr: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
//!     remote_port: 443,
//!     state: TcpState::Established,
//! };
//! let usage = classify(&[conn], WellKnownPorts::standard());
//! assert_eq!(usage.count("10.0.0.7 [443:https]", "ESTABLISHED"), 1);
//! assert_eq!(usage.count(OTHER_LABEL, "ESTABLISHED"), 0);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use crate::inspector::ConnectionRecord;

/// Bucket label for connections to dynamic/ephemeral remote ports.
pub const OTHER_LABEL: &str = "OTHER";

/// First port of the dynamic range. Remote ports at or above it go to [`OTHER_LABEL`].
pub const EPHEMERAL_PORT_START: u16 = 32768;

/// Service name used when a remote port has no entry in the well-known port table.
pub const UNKNOWN_SERVICE: &str = "unknown";

/// Canonical TCP state names, indexed by kernel state code. Index 0 is unused.
pub const TCP_STATE_NAMES: [&str; 12] = [
    "",
    "ESTABLISHED",
    "SYN_SENT",
    "SYN_RECV",
    "FIN_WAIT1",
    "FIN_WAIT2",
    "TIME_WAIT",
    "CLOSE",
    "CLOSE_WAIT",
    "LAST_ACK",
    "LISTEN",
    "CLOSING",
];

static STANDARD_PORTS: LazyLock<WellKnownPorts> = LazyLock::new(|| {
    WellKnownPorts::from_iter([
        (20, "ftp-data"),
        (21, "ftp"),
        (22, "ssh"),
        (23, "telnet"),
        (25, "smtp"),
        (53, "domain"),
        (80, "http"),
        (110, "pop3"),
        (123, "ntp"),
        (143, "imap"),
        (389, "ldap"),
        (443, "https"),
        (465, "smtps"),
        (587, "submission"),
        (636, "ldaps"),
        (993, "imaps"),
        (995, "pop3s"),
        (1433, "ms-sql-s"),
        (1521, "oracle"),
        (2181, "zookeeper"),
        (2379, "etcd-client"),
        (2380, "etcd-server"),
        (3306, "mysql"),
        (5432, "postgresql"),
        (5672, "amqp"),
        (6379, "redis"),
        (6443, "kube-apiserver"),
        (8080, "http-alt"),
        (8443, "https-alt"),
        (9092, "kafka"),
        (9200, "elasticsearch"),
        (11211, "memcache"),
        (27017, "mongodb"),
    ])
});

/// Read-only mapping from port number to service name.
///
/// Only used to decorate labels.
#[derive(Debug, Clone, Default)]
pub struct WellKnownPorts(HashMap<u16, &'static str>);

impl WellKnownPorts {
    /// The built-in table, constructed once per process.
    pub fn standard() -> &'static WellKnownPorts {
        &STANDARD_PORTS
    }

    /// Service name for `port`, or [`UNKNOWN_SERVICE`].
    pub fn service_name(&self, port: u16) -> &'static str {
        self.0.get(&port).copied().unwrap_or(UNKNOWN_SERVICE)
    }
}

impl FromIterator<(u16, &'static str)> for WellKnownPorts {
    fn from_iter<I: IntoIterator<Item = (u16, &'static str)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Connection counts grouped by remote endpoint label and state name.
///
/// Always contains the [`OTHER_LABEL`] bucket, possibly empty. Iteration is
/// ordered by label and then by state name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortUsage {
    groups: BTreeMap<String, BTreeMap<&'static str, u64>>,
}

impl Default for PortUsage {
    fn default() -> Self {
        let mut groups = BTreeMap::new();
        groups.insert(OTHER_LABEL.to_owned(), BTreeMap::new());
        Self { groups }
    }
}

impl PortUsage {
    fn increment(&mut self, label: String, state: &'static str) {
        *self.groups.entry(label).or_default().entry(state).or_default() += 1;
    }

    /// Count for a single `(label, state)` bucket; `0` if absent.
    pub fn count(&self, label: &str, state: &str) -> u64 {
        self.groups
            .get(label)
            .and_then(|states| states.get(state))
            .copied()
            .unwrap_or(0)
    }

    /// Sum of all bucket counts, i.e. the number of classified connections.
    pub fn total_used(&self) -> u64 {
        self.groups.values().flat_map(|states| states.values()).sum()
    }

    /// Per-state counts for a label.
    pub fn group(&self, label: &str) -> Option<&BTreeMap<&'static str, u64>> {
        self.groups.get(label)
    }

    /// Iterates over all `(label, state, count)` buckets.
    pub fn buckets(&self) -> impl Iterator<Item = (&str, &'static str, u64)> + '_ {
        self.groups.iter().flat_map(|(label, states)| {
            states
                .iter()
                .map(move |(state, count)| (label.as_str(), *state, *count))
        })
    }

    /// Number of distinct labels, including [`OTHER_LABEL`].
    pub fn label_count(&self) -> usize {
        self.groups.len()
    }
}

/// Builds the label for a connection to a remote port below [`EPHEMERAL_PORT_START`].
fn remote_label(conn: &ConnectionRecord, ports: &WellKnownPorts) -> String {
    format!(
        "{} [{}:{}]",
        conn.remote_addr,
        conn.remote_port,
        ports.service_name(conn.remote_port)
    )
}

/// Groups connections by remote endpoint and state.
///
/// Every connection lands in exactly one bucket, so
/// `classify(conns, ports).total_used() == conns.len()`.
pub fn classify(connections: &[ConnectionRecord], ports: &WellKnownPorts) -> PortUsage {
    let mut usage = PortUsage::default();

    for conn in connections {
        let state = conn.state.name();
        if conn.remote_port < EPHEMERAL_PORT_START {
            usage.increment(remote_label(conn, ports), state);
        } else {
            usage.increment(OTHER_LABEL.to_owned(), state);
        }
    }

    usage
}
