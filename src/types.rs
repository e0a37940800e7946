//! Core types for the cluster bootstrap harness
//!
//! Addresses and identities shared between the server, the gossip
//! transport, and the orchestrator, plus the in-memory output capture
//! used to redirect a node's standard streams.

use std::fmt;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// The identity of a node, as seen by the rest of the cluster.
///
/// One node is designated coordinator per cluster; its `NodeUri` is the
/// coordinator identity propagated to every joining node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeUri {
    /// Host name or address
    pub host: String,
    /// HTTP port
    pub port: u16,
}

impl NodeUri {
    /// Create a node URI from host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Create a node URI from a bound socket address
    pub fn from_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }

    /// Base URL for HTTP access to the node
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// The `host:port` form used in membership state
    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for NodeUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A resolvable gossip address published by a running node.
///
/// Later-joining nodes use seed addresses to locate the existing cluster;
/// a seed stays valid for the lifetime of the transport that published it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeedAddr(String);

impl SeedAddr {
    /// Wrap an already-formatted `host:port` string
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// The address as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<SocketAddr> for SeedAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl fmt::Display for SeedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How cluster membership is maintained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipMode {
    /// Fixed member list supplied at configuration time
    Static,
    /// Members discovered through the gossip transport
    Dynamic,
}

impl Default for MembershipMode {
    fn default() -> Self {
        MembershipMode::Static
    }
}

/// Snapshot of a node's cluster view, served at `GET /status` and parsed
/// back by the probe client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    /// The node's own identity
    pub uri: Option<NodeUri>,
    /// Coordinator identity as this node knows it
    pub coordinator: Option<NodeUri>,
    /// Membership maintenance mode
    pub mode: MembershipMode,
    /// Join seeds the node was configured with
    pub seeds: Vec<SeedAddr>,
    /// Known cluster members, join order
    pub members: Vec<NodeUri>,
}

/// In-memory capture buffer for a node's output streams.
///
/// Clones share the same underlying buffer. When `tee` is set, writes are
/// duplicated to the process's real stderr for verbose diagnostics.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
    tee: bool,
}

impl OutputBuffer {
    /// Create an empty capture buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Duplicate writes to the real stderr as well
    pub fn with_tee(mut self, tee: bool) -> Self {
        self.tee = tee;
        self
    }

    /// Append a single line to the buffer
    pub fn write_line(&self, line: &str) {
        let mut buf = self.inner.lock().unwrap();
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        if self.tee {
            eprintln!("{}", line);
        }
    }

    /// Everything captured so far, lossily decoded
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock().unwrap()).into_owned()
    }

    /// Whether nothing has been captured yet
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.lock().unwrap().extend_from_slice(buf);
        if self.tee {
            io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.tee {
            io::stderr().flush()?;
        }
        Ok(())
    }
}
