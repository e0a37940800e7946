//! Server collaborator
//!
//! The request-serving side of a node: a warp HTTP surface with an
//! explicit listener-open / open / close lifecycle, plus the mutable
//! cluster membership state the networking setup writes into. Query
//! semantics are intentionally minimal; this crate is about bringing the
//! fleet up, not about what it serves.

pub mod broadcast;
pub mod http;

pub use broadcast::BroadcastReceiver;

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;

use crate::error::{BootstrapError, BootstrapResult};
use crate::types::{ClusterStatus, MembershipMode, NodeUri, OutputBuffer, SeedAddr};

/// Mutable cluster view owned by a server.
///
/// Written once by the networking setup, then extended by the broadcast
/// receiver as membership events arrive.
#[derive(Debug, Default)]
pub struct ClusterState {
    /// The node's own identity, known once the listener is open
    pub uri: Option<NodeUri>,
    /// How membership is maintained
    pub mode: MembershipMode,
    /// Coordinator identity for the whole cluster
    pub coordinator: Option<NodeUri>,
    /// Join seeds this node was configured with
    pub seeds: Vec<SeedAddr>,
    /// Known members, join order
    pub members: Vec<NodeUri>,
}

impl ClusterState {
    /// Snapshot for the status endpoint
    pub fn status(&self) -> ClusterStatus {
        ClusterStatus {
            uri: self.uri.clone(),
            coordinator: self.coordinator.clone(),
            mode: self.mode,
            seeds: self.seeds.clone(),
            members: self.members.clone(),
        }
    }
}

/// One server instance with an explicit bootstrap lifecycle.
///
/// `open_listener` allocates the network address, `open` starts serving,
/// `close` shuts the surface down. A second `close` is a no-op.
pub struct Server {
    bind: String,
    data_dir: PathBuf,
    /// Cluster membership state, shared with the broadcast receiver and
    /// the status endpoint
    pub cluster: Arc<RwLock<ClusterState>>,
    /// Broadcast-receiving subsystem, installed during networking setup
    pub broadcast: Option<BroadcastReceiver>,
    log: OutputBuffer,
    uri: Option<NodeUri>,
    pending: Option<Pin<Box<dyn Future<Output = ()> + Send>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("bind", &self.bind)
            .field("data_dir", &self.data_dir)
            .field("uri", &self.uri)
            .finish()
    }
}

impl Server {
    /// Create a server bound-to-be at `bind`, logging into `log`
    pub fn new(bind: impl Into<String>, data_dir: PathBuf, log: OutputBuffer) -> Self {
        Self {
            bind: bind.into(),
            data_dir,
            cluster: Arc::new(RwLock::new(ClusterState::default())),
            broadcast: None,
            log,
            uri: None,
            pending: None,
            shutdown_tx: None,
            handle: None,
        }
    }

    /// Open the HTTP listener.
    ///
    /// Binds the configured address (an ephemeral port when `:0`) and
    /// records the allocated identity; serving does not start until
    /// [`Server::open`]. Must run inside a tokio runtime.
    pub async fn open_listener(&mut self) -> BootstrapResult<()> {
        let addr: SocketAddr = self.bind.parse().map_err(|e| {
            BootstrapError::ResourceAllocation(format!("invalid bind address {}: {}", self.bind, e))
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let routes = http::routes(Arc::clone(&self.cluster), self.log.clone());

        let (bound, serve) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(addr, async move {
                shutdown_rx.await.ok();
            })
            .map_err(|e| BootstrapError::ResourceAllocation(format!("listener bind: {}", e)))?;

        let uri = NodeUri::from_addr(bound);
        self.cluster.write().await.uri = Some(uri.clone());
        self.log.write_line(&format!("listener open on {}", uri));

        self.uri = Some(uri);
        self.pending = Some(Box::pin(serve));
        self.shutdown_tx = Some(shutdown_tx);

        Ok(())
    }

    /// Start serving on the previously opened listener
    pub fn open(&mut self) -> BootstrapResult<()> {
        let serve = self
            .pending
            .take()
            .ok_or_else(|| BootstrapError::ServerOpen("listener not open".to_string()))?;

        self.handle = Some(tokio::spawn(serve));
        if let Some(uri) = &self.uri {
            self.log.write_line(&format!("server open on {}", uri));
        }

        Ok(())
    }

    /// Shut the server down.
    ///
    /// Idempotent: closing an already-closed (or never-opened) server
    /// returns Ok.
    pub async fn close(&mut self) -> BootstrapResult<()> {
        self.pending = None;

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| BootstrapError::ServerOpen(format!("serve task: {}", e)))?;
            self.log.write_line("server closed");
        }

        Ok(())
    }

    /// The allocated socket address, once the listener is open
    pub fn addr(&self) -> Option<SocketAddr> {
        self.uri
            .as_ref()
            .and_then(|u| format!("{}:{}", u.host, u.port).parse().ok())
    }

    /// The server's identity, once the listener is open
    pub fn uri(&self) -> Option<&NodeUri> {
        self.uri.as_ref()
    }

    /// The working directory this server was configured with
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }
}
