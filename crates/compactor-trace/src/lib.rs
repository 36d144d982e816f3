//! Request-trace ingestion and work estimation.
//!
//! Everything downstream of this crate (arrival curves, the network-calculus
//! analysis, the optimizer) operates on a single scalar unit called *work*.
//! This crate turns raw request traces into work: a [`TraceReader`] parses
//! `(arrival_ns, size, read|write)` records, an [`Estimator`] maps each
//! request onto work units for a particular device, and a [`ProcessedTrace`]
//! chains the two into an iterator of `(arrival_ns, work)` entries.
//!
//! Work units only need to relate to the bandwidth of the queue they flow
//! through: network work is measured in bytes against byte/sec queues, while
//! storage work is measured in device-seconds against a queue of bandwidth
//! 1 device-sec/sec.

pub mod estimator;
pub mod profile;
pub mod reader;
pub mod trace;

pub use estimator::{Estimator, EstimatorSpec};
pub use profile::{BandwidthRow, DeviceProfile};
pub use reader::{TraceEntry, TraceReader};
pub use trace::{ProcessedEntry, ProcessedTrace};

use std::path::PathBuf;
use thiserror::Error;

/// Trace and estimation error types.
#[derive(Debug, Error)]
pub enum TraceError {
    /// File I/O error
    #[error("I/O error reading {path}: {source}")]
    Io {
        /// Path being read
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },

    /// Malformed trace record
    #[error("malformed trace record at {path}:{line}: {text:?}")]
    MalformedRecord {
        /// Path being read
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Offending line text
        text: String,
    },

    /// Device profile parse error
    #[error("invalid device profile: {0}")]
    InvalidProfile(String),

    /// Bandwidth interpolation produced a non-positive value
    #[error("non-positive bandwidth {bandwidth} for request size {request_size}")]
    NonPositiveBandwidth {
        /// Request size being estimated
        request_size: u32,
        /// Interpolated bandwidth
        bandwidth: f64,
    },
}

/// Result type for trace operations.
pub type Result<T> = std::result::Result<T, TraceError>;
