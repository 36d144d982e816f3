//! Workload placement across a storage server fleet.
//!
//! The controller fronts a pool of admission workers. Placing a workload
//! means finding the first server (in a deterministic enumeration of the
//! fleet) whose admission worker accepts a trial add; the trial is rolled
//! back immediately and the winning placement is then committed to every
//! worker so all graphs stay consistent for the next placement.
//!
//! Trials for one workload fan out across the workers in parallel. "First
//! fit" is defined by candidate index, not arrival order of results, so the
//! outcome is independent of worker count and interleaving.

pub mod concretize;
pub mod controller;
pub mod server;
pub mod topology;

pub use concretize::ConcretizeContext;
pub use controller::PlacementController;
pub use topology::{ClientVm, ServerVm, Topology};

use std::path::PathBuf;
use thiserror::Error;

/// Placement error types.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// File I/O error
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Topology document parse error
    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    /// Admission RPC failure during a trial or commit
    #[error(transparent)]
    Proto(#[from] compactor_proto::ProtoError),

    /// Curve or estimator failure while concretizing a workload
    #[error(transparent)]
    Dnc(#[from] compactor_dnc::DncError),

    /// Device profile failure
    #[error(transparent)]
    Trace(#[from] compactor_trace::TraceError),

    /// No client machine has a free VM left
    #[error("out of client machines")]
    OutOfClientMachines,

    /// A trial could not be carried out (as opposed to returning "no fit")
    #[error("placement trial failed: {0}")]
    TrialFailed(String),

    /// A commit the workers already accepted in trial was refused
    #[error("commit of {client} rejected by worker {worker}")]
    CommitRejected {
        /// Client being committed
        client: String,
        /// Worker index that refused
        worker: usize,
    },
}

/// Result type for placement operations.
pub type Result<T> = std::result::Result<T, PlacementError>;
