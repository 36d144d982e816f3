//! Admission control for networked storage with tail-latency objectives.
//!
//! A worker owns one [`compactor_dnc::Network`] under the compactor
//! analyzer. When a batch of workloads asks for admission, their rate-limit
//! parameters are re-optimized jointly with everyone they share queues
//! with; the batch is admitted only if every new client and every affected
//! resident still meets its objective, and is rolled back wholesale
//! otherwise. Rejection at one server is not failure; the placement
//! controller just tries the next one.

pub mod engine;
pub mod server;

pub use engine::{AddClientsOutcome, AdmissionEngine, EnforcerPush};
