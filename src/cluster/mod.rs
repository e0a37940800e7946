//! Cluster formation and lifecycle
//!
//! A node joins a cluster through seed addresses published by the nodes
//! started before it; the first node self-elects as coordinator. The
//! orchestrator in [`bootstrap`] sequences the nodes, the wrapper in
//! [`node`] drives each one through its bootstrap steps.

pub mod bootstrap;
pub mod node;

pub use bootstrap::Cluster;
pub use node::{BootstrapStage, NodeConfig, NodeHarness};
