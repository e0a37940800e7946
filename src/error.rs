//! Error types for flotilla

use std::time::Duration;
use thiserror::Error;

use crate::cluster::BootstrapStage;

/// Main error type for flotilla operations
#[derive(Error, Debug)]
pub enum FlotillaError {
    /// Cluster bootstrap errors
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),

    /// HTTP probe errors
    #[error("probe error: {0}")]
    Probe(#[from] ProbeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("error: {0}")]
    Other(String),
}

/// Errors raised while bringing a node or cluster up
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// Cluster bootstrap requires at least one node
    #[error("cluster must contain at least one node, got {0}")]
    InvalidClusterSize(usize),

    /// Working directory or listener could not be allocated
    #[error("resource allocation failed: {0}")]
    ResourceAllocation(String),

    /// Gossip endpoint could not be bound
    #[error("gossip transport bind failed: {0}")]
    TransportBind(String),

    /// Membership or broadcast setup failed
    #[error("networking setup failed: {0}")]
    NetworkingConfig(String),

    /// Final server open step failed
    #[error("server open failed: {0}")]
    ServerOpen(String),

    /// A bootstrap step exceeded its deadline
    #[error("bootstrap step `{step}` timed out after {timeout:?}")]
    Timeout {
        /// The step that was in flight when the deadline expired
        step: BootstrapStage,
        /// The configured per-step deadline
        timeout: Duration,
    },

    /// Gossip wire encoding errors
    #[error("gossip wire error: {0}")]
    Wire(#[from] bincode::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the HTTP probe client
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Transport-level request failure
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The node answered with a status the probe did not expect
    #[error("unexpected status: {status}, body={body}")]
    UnexpectedStatus {
        /// HTTP status code returned by the node
        status: u16,
        /// Raw response body
        body: String,
    },
}

/// Result type for flotilla operations
pub type FlotillaResult<T> = Result<T, FlotillaError>;

/// Result type for bootstrap operations
pub type BootstrapResult<T> = Result<T, BootstrapError>;
