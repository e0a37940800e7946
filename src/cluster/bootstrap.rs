//! Cluster bootstrap orchestrator
//!
//! Runs nodes up strictly sequentially: node 0 starts with no seeds and
//! no coordinator and therefore self-elects; node i receives the seeds
//! published by nodes 0..i and the coordinator identity established by
//! node 0, propagated unchanged. A failure at any node aborts the run.

use crate::error::{BootstrapError, BootstrapResult};
use crate::types::{NodeUri, SeedAddr};

use super::node::NodeHarness;

const GOSSIP_HOST: &str = "127.0.0.1";

/// An ordered set of running nodes, join order preserved
#[derive(Debug)]
pub struct Cluster {
    nodes: Vec<NodeHarness>,
}

impl Cluster {
    /// Bring up `size` nodes joined over gossip.
    ///
    /// Fails immediately with [`BootstrapError::InvalidClusterSize`] when
    /// `size` is zero. Fail-fast: a node failure aborts the run; nodes
    /// already started are best-effort closed before the error is
    /// returned.
    pub async fn bootstrap(size: usize) -> BootstrapResult<Self> {
        if size < 1 {
            return Err(BootstrapError::InvalidClusterSize(size));
        }

        let mut nodes: Vec<NodeHarness> = Vec::with_capacity(size);
        let mut seeds: Vec<SeedAddr> = Vec::with_capacity(size);
        let mut coordinator: Option<NodeUri> = None;

        for i in 0..size {
            let mut node = match NodeHarness::create_clustered() {
                Ok(node) => node,
                Err(e) => {
                    Self::teardown(&mut nodes).await;
                    return Err(e);
                }
            };

            match node
                .run_with_transport(GOSSIP_HOST, 0, &seeds, coordinator.clone())
                .await
            {
                Ok((seed, coord)) => {
                    log::info!(
                        "node {} up at {} (seed {}, coordinator {})",
                        i,
                        node.url().unwrap_or_default(),
                        seed,
                        coord
                    );
                    seeds.push(seed);
                    coordinator = Some(coord);
                    nodes.push(node);
                }
                Err(e) => {
                    log::error!("node {} failed to start: {}", i, e);
                    let _ = node.close().await;
                    Self::teardown(&mut nodes).await;
                    return Err(e);
                }
            }
        }

        Ok(Self { nodes })
    }

    async fn teardown(nodes: &mut Vec<NodeHarness>) {
        for node in nodes.iter_mut() {
            if let Err(e) = node.close().await {
                log::warn!("close during teardown: {}", e);
            }
        }
        nodes.clear();
    }

    /// Number of nodes in join order
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster holds no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The i-th node in join order
    pub fn node(&self, i: usize) -> Option<&NodeHarness> {
        self.nodes.get(i)
    }

    /// Mutable access to the i-th node
    pub fn node_mut(&mut self, i: usize) -> Option<&mut NodeHarness> {
        self.nodes.get_mut(i)
    }

    /// All nodes, join order
    pub fn nodes(&self) -> &[NodeHarness] {
        &self.nodes
    }

    /// Coordinator identity as established by node 0
    pub async fn coordinator(&self) -> Option<NodeUri> {
        match self.nodes.first() {
            Some(node) => node.coordinator().await,
            None => None,
        }
    }

    /// Close every node, attempting all and returning the first error
    pub async fn close(&mut self) -> BootstrapResult<()> {
        let mut first_err = None;
        for node in &mut self.nodes {
            if let Err(e) = node.close().await {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
