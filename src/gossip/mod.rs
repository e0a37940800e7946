//! Gossip transport binding
//!
//! Allocates the peer-to-peer membership endpoint for a node, separate
//! from its request-serving listener. The endpoint's address is published
//! as the node's seed: the only mechanism by which later-joining nodes
//! discover it. Inbound announcements surface as [`GossipEvent`]s on a
//! channel consumed by the broadcast receiver.

pub mod wire;

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::error::{BootstrapError, BootstrapResult};
use crate::types::{NodeUri, SeedAddr};

/// Messages exchanged over the gossip wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// A node announces itself to the cluster
    Join {
        /// Identity of the joining node
        member: NodeUri,
    },
    /// A node announces its departure
    Leave {
        /// Identity of the departing node
        member: NodeUri,
    },
}

/// Membership events produced by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipEvent {
    /// A node joined the cluster
    MemberJoined(NodeUri),
    /// A node left the cluster
    MemberLeft(NodeUri),
}

/// A bound gossip endpoint.
///
/// The address is fixed at bind time and stays stable for the transport's
/// lifetime.
#[derive(Debug)]
pub struct GossipTransport {
    addr: SocketAddr,
    listener: Option<TcpListener>,
    events_tx: mpsc::Sender<GossipEvent>,
    events_rx: Option<mpsc::Receiver<GossipEvent>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl GossipTransport {
    /// Bind a gossip endpoint on `host`. Port 0 selects an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> BootstrapResult<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| BootstrapError::TransportBind(format!("{}:{}: {}", host, port, e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| BootstrapError::TransportBind(e.to_string()))?;

        let (events_tx, events_rx) = mpsc::channel(64);

        log::debug!("gossip transport bound on {}", addr);

        Ok(Self {
            addr,
            listener: Some(listener),
            events_tx,
            events_rx: Some(events_rx),
            shutdown_tx: None,
        })
    }

    /// The bound socket address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The seed address other nodes can join through
    pub fn seed_addr(&self) -> SeedAddr {
        SeedAddr::from(self.addr)
    }

    /// Hand the membership event receiver to the broadcast subsystem.
    ///
    /// Yields `Some` exactly once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<GossipEvent>> {
        self.events_rx.take()
    }

    /// Start the accept loop for inbound gossip connections
    pub fn start(&mut self) -> BootstrapResult<()> {
        let listener = self.listener.take().ok_or_else(|| {
            BootstrapError::NetworkingConfig("gossip transport already started".to_string())
        })?;

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer)) => {
                                let events_tx = events_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = Self::handle_peer(stream, events_tx).await {
                                        log::debug!("gossip peer {} dropped: {}", peer, e);
                                    }
                                });
                            }
                            Err(e) => {
                                log::warn!("gossip accept failed: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Decode frames from one inbound peer connection and surface them
    /// as membership events until the peer closes or the event channel
    /// is gone.
    async fn handle_peer(
        mut stream: TcpStream,
        events_tx: mpsc::Sender<GossipEvent>,
    ) -> BootstrapResult<()> {
        while let Some(message) = wire::read_message(&mut stream).await? {
            let event = match message {
                GossipMessage::Join { member } => GossipEvent::MemberJoined(member),
                GossipMessage::Leave { member } => GossipEvent::MemberLeft(member),
            };
            if events_tx.send(event).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// Announce `member` to the given seeds.
    ///
    /// The transport's own address is skipped. Individual unreachable
    /// seeds are tolerated; joining fails only when every remote seed is
    /// unreachable.
    pub async fn announce(&self, seeds: &[SeedAddr], member: &NodeUri) -> BootstrapResult<()> {
        let own = self.addr.to_string();
        let mut remote = 0usize;
        let mut reached = 0usize;

        for seed in seeds {
            if seed.as_str() == own {
                continue;
            }
            remote += 1;

            match TcpStream::connect(seed.as_str()).await {
                Ok(mut stream) => {
                    let join = GossipMessage::Join {
                        member: member.clone(),
                    };
                    wire::write_message(&mut stream, &join).await?;
                    reached += 1;
                }
                Err(e) => {
                    log::warn!("gossip seed {} unreachable: {}", seed, e);
                }
            }
        }

        if remote > 0 && reached == 0 {
            return Err(BootstrapError::NetworkingConfig(format!(
                "none of {} gossip seeds reachable",
                remote
            )));
        }

        Ok(())
    }

    /// Stop the accept loop
    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_allocates_ephemeral_port() {
        let transport = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(transport.addr().port(), 0);
        assert_eq!(
            transport.seed_addr().as_str(),
            transport.addr().to_string()
        );
    }

    #[tokio::test]
    async fn test_bind_invalid_host_fails() {
        // 240.0.0.1 is not a local address; bind fails immediately.
        let result = GossipTransport::bind("240.0.0.1", 0).await;
        assert!(matches!(result, Err(BootstrapError::TransportBind(_))));
    }

    #[tokio::test]
    async fn test_announce_reaches_seed() {
        let mut seed_transport = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        let mut events = seed_transport.take_events().unwrap();
        seed_transport.start().unwrap();

        let joiner = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        let member = NodeUri::new("127.0.0.1", 10101);
        joiner
            .announce(&[seed_transport.seed_addr()], &member)
            .await
            .unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event, GossipEvent::MemberJoined(member));

        seed_transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_inbound_frames_surface_as_events() {
        let mut transport = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        let mut events = transport.take_events().unwrap();
        transport.start().unwrap();

        let member = NodeUri::new("127.0.0.1", 10101);
        let mut stream = TcpStream::connect(transport.addr()).await.unwrap();
        wire::write_message(
            &mut stream,
            &GossipMessage::Join {
                member: member.clone(),
            },
        )
        .await
        .unwrap();
        wire::write_message(
            &mut stream,
            &GossipMessage::Leave {
                member: member.clone(),
            },
        )
        .await
        .unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            GossipEvent::MemberJoined(member.clone())
        );
        assert_eq!(
            events.recv().await.unwrap(),
            GossipEvent::MemberLeft(member)
        );

        transport.shutdown().await;
    }

    #[tokio::test]
    async fn test_announce_skips_own_address() {
        let transport = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        let member = NodeUri::new("127.0.0.1", 10101);

        // Only seed is the transport itself; nothing remote to reach.
        let seeds = vec![transport.seed_addr()];
        transport.announce(&seeds, &member).await.unwrap();
    }

    #[tokio::test]
    async fn test_announce_all_seeds_unreachable_fails() {
        let transport = GossipTransport::bind("127.0.0.1", 0).await.unwrap();
        let member = NodeUri::new("127.0.0.1", 10101);

        // Bind-then-drop to get a port with nothing listening.
        let dead = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            SeedAddr::from(l.local_addr().unwrap())
        };

        let result = transport.announce(&[dead], &member).await;
        assert!(matches!(result, Err(BootstrapError::NetworkingConfig(_))));
    }
}
