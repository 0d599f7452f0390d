//! Crate-level error type.
//!
//! One `thiserror`-derived enum covering configuration/terrain errors and
//! physical unreachability. Transient simulated failures (collisions,
//! duty-cycle blocks, exhausted retries) are never surfaced here — they are
//! counted by the statistics aggregator instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read terrain file {path}: {source}")]
    TerrainIo { path: String, #[source] source: std::io::Error },

    #[error("malformed terrain file: {0}")]
    TerrainParse(String),

    #[error("terrain has no nodes")]
    NoNodes,

    #[error("terrain has no gateways")]
    NoGateways,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("node {node_id} unreachable: no spreading factor up to SF12 reaches any gateway with the required margin")]
    NodeUnreachable { node_id: u32 },
}

pub type SimResult<T> = Result<T, SimError>;
