//! Failure taxonomy, from run-fatal connectivity problems down to per-tile failures.

use crate::quadtree::NodeKey;
use std::path::PathBuf;
use thiserror::Error;

/// A single GET that could not be completed.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// The archive metadata could not be read. Aborts the batch before any tile is attempted.
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid EPT metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("EPT metadata has degenerate bounds")]
    InvalidBounds,

    #[error("unsupported EPT data type `{0}`, only laszip is supported")]
    UnsupportedDataType(String),
}

/// A hierarchy page could not be merged. The subtree below `key` is treated as absent.
#[derive(Debug, Error)]
pub enum HierarchyPageError {
    #[error("hierarchy page {key} unavailable: {source}")]
    Fetch {
        key: NodeKey,
        #[source]
        source: TransportError,
    },

    #[error("hierarchy page {key} is malformed: {source}")]
    Parse {
        key: NodeKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("hierarchy page {key} contains invalid node key `{entry}`")]
    InvalidKey { key: NodeKey, entry: String },
}

/// Serialization of a tile failed. No partial output is left behind.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("i/o error writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not encode {}: {source}", .path.display())]
    Las {
        path: PathBuf,
        #[source]
        source: las::Error,
    },
}

/// Aborts the current tile only; the batch moves on to the next one.
#[derive(Debug, Error)]
pub enum TileError {
    #[error("failed to fetch node {key}: {source}")]
    NodeFetch {
        key: NodeKey,
        #[source]
        source: TransportError,
    },

    #[error("failed to decode node {key}: {source}")]
    NodeDecode {
        key: NodeKey,
        #[source]
        source: las::Error,
    },

    #[error("no hierarchy nodes intersect the tile")]
    NoNodes,

    #[error("no qualifying points in tile")]
    NoQualifyingPoints,

    #[error(transparent)]
    Write(#[from] WriteError),
}
