//! Broadcast-receiving subsystem
//!
//! Consumes membership events from the gossip transport and folds them
//! into the server's cluster state. Started exactly once, after the
//! networking setup has wired the transport in.

use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use super::ClusterState;
use crate::error::{BootstrapError, BootstrapResult};
use crate::gossip::GossipEvent;

/// Applies gossip membership events to a server's cluster state
#[derive(Debug)]
pub struct BroadcastReceiver {
    events: Option<mpsc::Receiver<GossipEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl BroadcastReceiver {
    /// Wrap the event stream handed off by a gossip transport
    pub fn new(events: mpsc::Receiver<GossipEvent>) -> Self {
        Self {
            events: Some(events),
            handle: None,
        }
    }

    /// Start applying events to `cluster`.
    ///
    /// The task ends when the transport shuts down and drops its event
    /// senders. Calling `start` a second time is an error.
    pub fn start(&mut self, cluster: Arc<RwLock<ClusterState>>) -> BootstrapResult<()> {
        let mut events = self.events.take().ok_or_else(|| {
            BootstrapError::NetworkingConfig("broadcast receiver already started".to_string())
        })?;

        self.handle = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    GossipEvent::MemberJoined(member) => {
                        let mut state = cluster.write().await;
                        if !state.members.contains(&member) {
                            log::info!("member joined: {}", member);
                            state.members.push(member);
                        }
                    }
                    GossipEvent::MemberLeft(member) => {
                        log::info!("member left: {}", member);
                        cluster.write().await.members.retain(|m| m != &member);
                    }
                }
            }
        }));

        Ok(())
    }

    /// Stop the apply task without waiting for the transport
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
