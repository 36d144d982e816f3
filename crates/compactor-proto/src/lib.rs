//! Wire protocol for the admission and placement services.
//!
//! Messages travel as length-prefixed JSON frames over TCP: a 4-byte
//! little-endian payload length followed by the `serde_json` body. Every
//! request gets exactly one response, in order, per connection. The framing
//! is deliberately boring; the interesting payloads are the descriptor
//! types re-used from the analysis crate.
//!
//! RPC deadlines are long by design: a trial admission can sit behind LP
//! solves over dense coupling groups, which is minutes of work, so callers
//! time out in hours, not seconds.

pub mod client;
pub mod framing;
pub mod message;

pub use client::{AdmissionClient, EnforcerClient, PlacementClient};
pub use framing::{read_message, write_message, MAX_FRAME_LEN};
pub use message::{
    AdmissionRequest, AdmissionResponse, AdmissionStatus, EnforcerRequest, EnforcerResponse,
    PlacementRecord, PlacementRequest, PlacementResponse, PlacementStatus,
};

use thiserror::Error;

/// Protocol error types.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Socket I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Body (de)serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame length prefix exceeds the sanity cap
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    FrameTooLarge {
        /// Advertised payload length
        len: usize,
    },

    /// Peer closed the connection mid-exchange
    #[error("connection closed before a response arrived")]
    UnexpectedEof,

    /// RPC deadline expired
    #[error("RPC timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtoError>;
