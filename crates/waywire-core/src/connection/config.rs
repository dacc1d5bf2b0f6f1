//! Per-connection settings.
//!
//! Deserialised from the `[connection]` table of a peer's TOML config; every
//! field has a default so an empty table is valid.

use serde::{Deserialize, Serialize};

/// How policy-dependent protocol violations are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Unknown opcodes and unhandled messages close the connection.
    #[default]
    Strict,
    /// They are logged and skipped.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default)]
    pub strictness: Strictness,

    /// Bytes requested from the transport per read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
}

fn default_read_chunk_size() -> usize {
    4096
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            strictness: Strictness::default(),
            read_chunk_size: default_read_chunk_size(),
        }
    }
}

impl ConnectionConfig {
    pub fn lenient() -> Self {
        Self {
            strictness: Strictness::Lenient,
            ..Self::default()
        }
    }
}
