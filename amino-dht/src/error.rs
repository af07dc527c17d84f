// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Error types for the amino-dht crate.

use std::time::Duration;

use thiserror::Error;

/// Result type used throughout amino-dht.
pub type Result<T> = std::result::Result<T, DhtError>;

/// Main error type for DHT operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DhtError {
    /// Routing-table admission refused: the peer's measured latency exceeds the
    /// configured ceiling.
    #[error("peer latency {latency:?} exceeds maximum {max:?}")]
    HighLatency {
        /// Measured EWMA latency for the peer.
        latency: Duration,
        /// Configured admission ceiling.
        max: Duration,
    },

    /// Routing-table admission refused: the target bucket is full and holds no
    /// replaceable entry.
    #[error("bucket full, no replaceable peers")]
    NoCapacity,

    /// Routing-table admission refused by the peer-diversity policy.
    #[error("peer rejected by the IP diversity filter")]
    DiversityRejected,

    /// A peer or key was absent from a lookup, peer set, or store.
    #[error("not found")]
    NotFound,

    /// No validator is registered for the key's namespace.
    #[error("invalid record keytype: no validator for namespace {namespace:?}")]
    InvalidRecordType {
        /// Namespace extracted from the key, if any.
        namespace: String,
    },

    /// A strictly better candidate record already exists.
    #[error("a better record already exists for this key")]
    BetterRecord,

    /// A selection was requested over an empty candidate list.
    #[error("no values to select between")]
    NoValues,

    /// Wire-format decode failure.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Operation on a closed provider store or manager.
    #[error("store is closed")]
    Closed,

    /// The operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled explicitly.
    #[error("operation cancelled")]
    Cancelled,

    /// The lookup exhausted its frontier of unqueried peers.
    #[error("lookup ran out of peers to query")]
    NoMorePeers,

    /// A second `run` was issued on an in-progress lookup.
    #[error("lookup is already running")]
    AlreadyRunning,

    /// The routing configuration violates an Amino invariant.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Transport-level failure reported by the host.
    #[error("transport error: {0}")]
    Transport(String),

    /// Backing-store failure, propagated untouched.
    #[error("store error: {0}")]
    Store(String),
}

impl From<tokio::sync::oneshot::error::RecvError> for DhtError {
    fn from(err: tokio::sync::oneshot::error::RecvError) -> Self {
        DhtError::Transport(err.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for DhtError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        DhtError::Transport(err.to_string())
    }
}
