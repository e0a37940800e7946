//! # Flotilla: multi-node cluster bootstrap harness
//!
//! Brings up a fleet of cooperating server nodes, wires each one into a
//! gossip-based membership transport, establishes a single elected
//! coordinator, and exposes a controlled lifecycle (start, stop,
//! restart-in-place) for the resulting cluster.
//!
//! The first node of a cluster self-elects as coordinator and publishes a
//! gossip seed address; every later node joins through the seeds published
//! before it and inherits the coordinator identity unchanged.

#![warn(clippy::all)]

pub mod client;
pub mod cluster;
pub mod error;
pub mod gossip;
pub mod server;
pub mod types;

// Re-export main types
pub use client::ProbeClient;
pub use cluster::{BootstrapStage, Cluster, NodeConfig, NodeHarness};
pub use error::{BootstrapError, FlotillaError, FlotillaResult, ProbeError};
pub use gossip::{GossipEvent, GossipMessage, GossipTransport};
pub use server::{BroadcastReceiver, ClusterState, Server};
pub use types::{ClusterStatus, MembershipMode, NodeUri, OutputBuffer, SeedAddr};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bootstrap a running cluster of `size` nodes joined over gossip.
pub async fn run_cluster(size: usize) -> FlotillaResult<Cluster> {
    let cluster = Cluster::bootstrap(size).await?;
    Ok(cluster)
}
