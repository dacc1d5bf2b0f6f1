//! # waywire-peer
//!
//! The I/O shell around `waywire-core`: a Unix-socket transport that passes
//! file descriptors with `SCM_RIGHTS`, the TOML configuration, and a demo
//! server and client speaking the bundled `scanner_test` protocol.

pub mod client;
pub mod config;
pub mod server;
pub mod transport;

use std::path::PathBuf;

use thiserror::Error;
use waywire_core::WireError;

pub use config::{load_config, ConfigError, PeerConfig, PeerMode};
pub use transport::UnixSocketTransport;

/// Errors surfaced by the peer binary.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    /// The socket could not be bound or connected.
    #[error("socket error at {path}: {source}")]
    Socket {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
