//! Node process wrapper
//!
//! Owns one server instance's configuration, captured output streams, and
//! isolated working directory, and drives it through the fixed bootstrap
//! sequence: configure, open listener, open gossip transport, networking
//! setup, broadcast start, server open. Any step failure aborts the
//! remaining steps and leaves the node in the `Failed` stage; the caller
//! re-bootstraps with [`NodeHarness::reopen`].

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;

use crate::client::ProbeClient;
use crate::error::{BootstrapError, BootstrapResult};
use crate::gossip::GossipTransport;
use crate::server::{BroadcastReceiver, Server};
use crate::types::{MembershipMode, NodeUri, OutputBuffer, SeedAddr};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable-at-construction node configuration, reused verbatim across a
/// restart
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Isolated working directory for this node's data
    pub data_dir: PathBuf,
    /// HTTP bind address; `:0` allocates an ephemeral port
    pub bind: String,
    /// Whether this node participates in a cluster
    pub cluster_enabled: bool,
    /// Host the gossip endpoint binds on
    pub gossip_host: String,
    /// Gossip port; 0 allocates an ephemeral port
    pub gossip_port: u16,
    /// Explicit join seeds; empty means this node bootstraps a new cluster
    pub gossip_seeds: Vec<SeedAddr>,
    /// Deadline applied to each bootstrap step
    pub step_timeout: Duration,
    /// Duplicate captured output to the real stderr
    pub verbose: bool,
}

/// Per-node bootstrap state machine.
///
/// Strictly sequential; terminal states are `Started` and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapStage {
    /// No step has run yet
    Uninitialized,
    /// Static settings applied from the configuration
    ServerConfigured,
    /// HTTP listener bound, node identity allocated
    ListenerOpen,
    /// Gossip endpoint bound, seed address published
    TransportOpen,
    /// Membership layer configured, join announced
    NetworkingConfigured,
    /// Broadcast-receiving subsystem running
    BroadcastStarted,
    /// Server open, node fully serving
    Started,
    /// A step failed; the node must be re-bootstrapped
    Failed,
}

impl fmt::Display for BootstrapStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootstrapStage::Uninitialized => "Uninitialized",
            BootstrapStage::ServerConfigured => "ServerConfigured",
            BootstrapStage::ListenerOpen => "ListenerOpen",
            BootstrapStage::TransportOpen => "TransportOpen",
            BootstrapStage::NetworkingConfigured => "NetworkingConfigured",
            BootstrapStage::BroadcastStarted => "BroadcastStarted",
            BootstrapStage::Started => "Started",
            BootstrapStage::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

/// A test/orchestration wrapper around one server instance
#[derive(Debug)]
pub struct NodeHarness {
    /// The server collaborator this harness drives
    pub server: Server,
    /// Node configuration, retained across restarts
    pub config: NodeConfig,
    /// Captured standard input of the node
    pub stdin: OutputBuffer,
    /// Captured standard output of the node
    pub stdout: OutputBuffer,
    /// Captured standard error of the node
    pub stderr: OutputBuffer,
    transport: Option<GossipTransport>,
    stage: BootstrapStage,
    started_tx: watch::Sender<bool>,
    started_rx: watch::Receiver<bool>,
}

impl NodeHarness {
    /// Create a fresh node: new isolated working directory, clustering
    /// disabled, ephemeral local bind address.
    pub fn create() -> BootstrapResult<Self> {
        let data_dir = tempfile::Builder::new()
            .prefix("flotilla-")
            .tempdir()
            .map_err(|e| BootstrapError::ResourceAllocation(format!("working directory: {}", e)))?
            .keep();

        let config = NodeConfig {
            data_dir,
            bind: "127.0.0.1:0".to_string(),
            cluster_enabled: false,
            gossip_host: "127.0.0.1".to_string(),
            gossip_port: 0,
            gossip_seeds: Vec::new(),
            step_timeout: DEFAULT_STEP_TIMEOUT,
            verbose: false,
        };

        Ok(Self::with_config(config))
    }

    /// Create a fresh node with clustering enabled
    pub fn create_clustered() -> BootstrapResult<Self> {
        let mut node = Self::create()?;
        node.config.cluster_enabled = true;
        Ok(node)
    }

    /// Build a harness around an existing configuration
    pub fn with_config(config: NodeConfig) -> Self {
        let stdout = OutputBuffer::new().with_tee(config.verbose);
        let stderr = OutputBuffer::new().with_tee(config.verbose);
        let server = Server::new(config.bind.clone(), config.data_dir.clone(), stdout.clone());
        let (started_tx, started_rx) = watch::channel(false);

        Self {
            server,
            config,
            stdin: OutputBuffer::new(),
            stdout,
            stderr,
            transport: None,
            stage: BootstrapStage::Uninitialized,
            started_tx,
            started_rx,
        }
    }

    /// Run the non-cluster bootstrap: configure, open listener, open
    /// server.
    ///
    /// Blocks until success or the first failure; fires the started
    /// signal either way. Not retryable — re-bootstrap with
    /// [`NodeHarness::reopen`].
    pub async fn start(&mut self) -> BootstrapResult<()> {
        let result = self.bootstrap_single().await;
        if result.is_err() {
            self.stage = BootstrapStage::Failed;
        }
        let _ = self.started_tx.send(true);
        result
    }

    /// Run the full cluster bootstrap sequence and return this node's
    /// published seed address and the coordinator identity.
    ///
    /// `seeds` are the addresses published by earlier nodes; empty means
    /// this node bootstraps a new cluster and self-elects as coordinator.
    /// `coordinator` is inherited from the orchestrator, `None` only for
    /// the first node.
    pub async fn run_with_transport(
        &mut self,
        host: &str,
        bind_port: u16,
        seeds: &[SeedAddr],
        coordinator: Option<NodeUri>,
    ) -> BootstrapResult<(SeedAddr, NodeUri)> {
        let result = self
            .bootstrap_with_transport(host, bind_port, seeds, coordinator)
            .await;
        if result.is_err() {
            self.stage = BootstrapStage::Failed;
        }
        // The started signal fires when bootstrap returns, success or
        // failure; waiters check `stage()` to distinguish.
        let _ = self.started_tx.send(true);
        result
    }

    async fn bootstrap_single(&mut self) -> BootstrapResult<()> {
        let deadline = self.config.step_timeout;

        self.configure_server()?;
        self.stage = BootstrapStage::ServerConfigured;

        timeout(deadline, self.server.open_listener())
            .await
            .map_err(|_| BootstrapError::Timeout {
                step: BootstrapStage::ListenerOpen,
                timeout: deadline,
            })??;
        self.stage = BootstrapStage::ListenerOpen;

        self.server.open()?;
        self.stage = BootstrapStage::Started;

        Ok(())
    }

    async fn bootstrap_with_transport(
        &mut self,
        host: &str,
        bind_port: u16,
        seeds: &[SeedAddr],
        coordinator: Option<NodeUri>,
    ) -> BootstrapResult<(SeedAddr, NodeUri)> {
        let deadline = self.config.step_timeout;

        // Explicit seeds and the transport binding are part of the node's
        // configuration and are reused verbatim across a restart.
        self.config.gossip_seeds = seeds.to_vec();
        self.config.gossip_host = host.to_string();
        self.config.gossip_port = bind_port;

        self.configure_server()?;
        self.stage = BootstrapStage::ServerConfigured;

        timeout(deadline, self.server.open_listener())
            .await
            .map_err(|_| BootstrapError::Timeout {
                step: BootstrapStage::ListenerOpen,
                timeout: deadline,
            })??;
        self.stage = BootstrapStage::ListenerOpen;

        let transport = timeout(deadline, GossipTransport::bind(host, bind_port))
            .await
            .map_err(|_| BootstrapError::Timeout {
                step: BootstrapStage::TransportOpen,
                timeout: deadline,
            })??;
        let seed = transport.seed_addr();
        self.transport = Some(transport);
        self.stage = BootstrapStage::TransportOpen;

        timeout(deadline, self.setup_networking(coordinator))
            .await
            .map_err(|_| BootstrapError::Timeout {
                step: BootstrapStage::NetworkingConfigured,
                timeout: deadline,
            })??;
        self.stage = BootstrapStage::NetworkingConfigured;

        self.start_broadcast()?;
        self.stage = BootstrapStage::BroadcastStarted;

        self.server.open()?;
        self.stage = BootstrapStage::Started;

        let coord = self
            .server
            .cluster
            .read()
            .await
            .coordinator
            .clone()
            .ok_or_else(|| {
                BootstrapError::NetworkingConfig("coordinator not assigned".to_string())
            })?;

        Ok((seed, coord))
    }

    /// Apply static settings from the configuration.
    ///
    /// Recreates the working directory when restarting after a close.
    fn configure_server(&mut self) -> BootstrapResult<()> {
        fs::create_dir_all(&self.config.data_dir).map_err(|e| {
            BootstrapError::ResourceAllocation(format!(
                "working directory {}: {}",
                self.config.data_dir.display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Wire the opened gossip transport into the server's membership
    /// layer.
    ///
    /// Explicit seeds are used verbatim; otherwise the node's own
    /// transport address becomes the sole seed (new cluster, this node is
    /// the coordinator). Membership turns dynamic whenever gossip is
    /// used.
    async fn setup_networking(&mut self, coordinator: Option<NodeUri>) -> BootstrapResult<()> {
        let own_uri = self
            .server
            .uri()
            .cloned()
            .ok_or_else(|| BootstrapError::NetworkingConfig("listener not open".to_string()))?;
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| BootstrapError::NetworkingConfig("transport not open".to_string()))?;

        let join_seeds = if self.config.gossip_seeds.is_empty() {
            vec![transport.seed_addr()]
        } else {
            self.config.gossip_seeds.clone()
        };

        // The broadcast receiver is installed before the transport
        // accepts traffic so no membership event is lost.
        let events = transport.take_events().ok_or_else(|| {
            BootstrapError::NetworkingConfig("transport events already claimed".to_string())
        })?;
        self.server.broadcast = Some(BroadcastReceiver::new(events));

        transport.start()?;
        transport.announce(&join_seeds, &own_uri).await?;

        let mut state = self.server.cluster.write().await;
        state.mode = MembershipMode::Dynamic;
        state.seeds = join_seeds;
        state.coordinator = Some(coordinator.unwrap_or_else(|| own_uri.clone()));
        if !state.members.contains(&own_uri) {
            state.members.push(own_uri);
        }

        self.stdout.write_line("networking configured");
        Ok(())
    }

    fn start_broadcast(&mut self) -> BootstrapResult<()> {
        let cluster = Arc::clone(&self.server.cluster);
        let receiver = self.server.broadcast.as_mut().ok_or_else(|| {
            BootstrapError::NetworkingConfig("broadcast receiver not installed".to_string())
        })?;
        receiver.start(cluster)
    }

    /// Close the server and release the working directory.
    ///
    /// The directory removal happens last and unconditionally, even when
    /// the server close fails; the close error is still returned.
    /// Idempotent.
    pub async fn close(&mut self) -> BootstrapResult<()> {
        let close_result = self.server.close().await;

        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }
        if let Some(broadcast) = self.server.broadcast.as_mut() {
            broadcast.stop();
        }

        if let Err(e) = fs::remove_dir_all(&self.config.data_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!(
                    "failed to remove {}: {}",
                    self.config.data_dir.display(),
                    e
                );
            }
        }

        close_result
    }

    /// Close the current server and bootstrap a brand-new one with the
    /// same configuration.
    ///
    /// The working directory path and cluster settings carry over; the
    /// listener and transport get fresh ephemeral addresses.
    pub async fn reopen(&mut self) -> BootstrapResult<()> {
        let prior_coordinator = self.server.cluster.read().await.coordinator.clone();

        self.server.close().await?;
        if let Some(mut transport) = self.transport.take() {
            transport.shutdown().await;
        }

        self.server = Server::new(
            self.config.bind.clone(),
            self.config.data_dir.clone(),
            self.stdout.clone(),
        );
        let _ = self.started_tx.send(false);
        self.stage = BootstrapStage::Uninitialized;

        if self.config.cluster_enabled {
            let host = self.config.gossip_host.clone();
            let port = self.config.gossip_port;
            let seeds = self.config.gossip_seeds.clone();
            self.run_with_transport(&host, port, &seeds, prior_coordinator)
                .await?;
            Ok(())
        } else {
            self.start().await
        }
    }

    /// Block until the node's bootstrap has completed, successfully or
    /// not.
    ///
    /// Safe to call from multiple waiters.
    pub async fn wait_started(&self) {
        let mut rx = self.started_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// A receiver for the one-shot started signal.
    ///
    /// Becomes `true` when bootstrap completes, successfully or not.
    pub fn started(&self) -> watch::Receiver<bool> {
        self.started_rx.clone()
    }

    /// Current bootstrap stage
    pub fn stage(&self) -> BootstrapStage {
        self.stage
    }

    /// Base URL for HTTP access, once the listener is open
    pub fn url(&self) -> Option<String> {
        self.server.uri().map(|u| u.http_base())
    }

    /// The gossip seed address this node published, if any
    pub fn seed_addr(&self) -> Option<SeedAddr> {
        self.transport.as_ref().map(|t| t.seed_addr())
    }

    /// Coordinator identity as this node knows it
    pub async fn coordinator(&self) -> Option<NodeUri> {
        self.server.cluster.read().await.coordinator.clone()
    }

    /// A probe client bound to this node's address
    pub fn client(&self) -> Option<ProbeClient> {
        self.url().map(ProbeClient::new)
    }
}
