//! Deterministic network calculus for tenant latency guarantees.
//!
//! The building blocks, leaves first:
//!
//! - [`curve`]: piecewise-linear arrival curves fitted from request traces,
//!   with the token-bucket sweep, pruning, cache I/O, and the worst-case
//!   latency scan between two piecewise-linear curves.
//! - [`ops`]: the closed operator set over simple `(rate, burst)` arrival
//!   curves and `(rate, latency)` service curves.
//! - [`graph`]: the admission model: named queues with bandwidths, clients
//!   owning flows, flows traversing ordered queue lists at a priority.
//! - [`analyzer`]: worst-case flow latency, hop-by-hop or via the aggregate
//!   two-hop analysis.
//! - [`optimizer`]: the shaper LP. Per coupling group, choose each flow's
//!   `(rate, burst)` limiter to minimize total reserved rate while every
//!   client meets its tail-latency objective.
//! - [`solver`]: the LP solver seam with the built-in simplex adapter.
//! - [`config`]: descriptor documents, naming scheme, and system constants.

pub mod analyzer;
pub mod config;
pub mod curve;
pub mod graph;
pub mod ops;
pub mod optimizer;
pub mod solver;

pub use analyzer::Analyzer;
pub use config::{
    ClientConfig, EnforcerConfig, FlowConfig, FlowParameters, QueueConfig, RateLimit, WorkloadSpec,
};
pub use curve::{Curve, PointSlope};
pub use graph::{Client, ClientId, Flow, FlowHop, FlowId, Network, Queue, QueueId};
pub use ops::{RateBurst, RateLatency};

use std::path::PathBuf;
use thiserror::Error;

/// Network-calculus error types.
#[derive(Debug, Error)]
pub enum DncError {
    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Trace processing error
    #[error(transparent)]
    Trace(#[from] compactor_trace::TraceError),

    /// Trace had no usable entries
    #[error("trace {path} is empty")]
    EmptyTrace {
        /// Trace path
        path: PathBuf,
    },

    /// Queue name already registered
    #[error("queue name {0:?} already in use")]
    QueueNameInUse(String),

    /// Queue does not exist
    #[error("queue {0:?} does not exist")]
    QueueNonexistent(String),

    /// Queue still referenced by flows
    #[error("queue {0:?} still has active flows")]
    QueueHasActiveFlows(String),

    /// Flow name already registered
    #[error("flow name {0:?} already in use")]
    FlowNameInUse(String),

    /// Client name already registered
    #[error("client name {0:?} already in use")]
    ClientNameInUse(String),

    /// Client does not exist
    #[error("client {0:?} does not exist")]
    ClientNonexistent(String),

    /// Queue bandwidth must be positive
    #[error("queue {name:?} has non-positive bandwidth {bandwidth}")]
    InvalidBandwidth {
        /// Queue name
        name: String,
        /// Offending bandwidth
        bandwidth: f64,
    },

    /// Flow carries no arrival information
    #[error("flow {0:?} has an empty arrival curve")]
    EmptyArrivalCurve(String),

    /// Dangling id passed to a graph accessor
    #[error("stale {kind} id")]
    StaleId {
        /// Entity kind ("queue", "flow", "client")
        kind: &'static str,
    },
}

/// Result type for network-calculus operations.
pub type Result<T> = std::result::Result<T, DncError>;
