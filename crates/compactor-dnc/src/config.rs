//! Descriptor documents, naming scheme, and deployment constants.
//!
//! These are the JSON shapes that cross the admission and placement wire,
//! plus the helpers that derive flow/queue/host names from the topology.
//! Field names match the external documents, which predate this crate.

use crate::curve::{Curve, PointSlope};
use crate::ops::RateBurst;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Host link bandwidth, bytes/sec.
pub const NETWORK_BANDWIDTH: f64 = 125_000_000.0;

/// Storage queue bandwidth: one device-second of work per second.
pub const STORAGE_BANDWIDTH: f64 = 1.0;

/// Enforcement target for one flow, forwarded verbatim to the enforcer push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcerConfig {
    /// `network` or `storage`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Address the enforcer listens on.
    pub addr: String,
    /// Source address of the flow (network enforcement).
    #[serde(rename = "srcAddr", default, skip_serializing_if = "Option::is_none")]
    pub src_addr: Option<String>,
    /// Destination address of the flow (network enforcement).
    #[serde(rename = "dstAddr", default, skip_serializing_if = "Option::is_none")]
    pub dst_addr: Option<String>,
    /// Requesting client address (storage enforcement).
    #[serde(rename = "clientAddr", default, skip_serializing_if = "Option::is_none")]
    pub client_addr: Option<String>,
}

/// One flow of a client's workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowConfig {
    pub name: String,
    /// Ordered queue names the flow traverses.
    pub queues: Vec<String>,
    /// Arrival-curve breakpoints, origin point excluded.
    #[serde(rename = "arrivalInfo")]
    pub arrival: Vec<PointSlope>,
    /// Fixed priority; assigned by the optimizer when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Exclude this flow from latency accounting.
    #[serde(rename = "ignoreLatency", default, skip_serializing_if = "std::ops::Not::not")]
    pub ignore_latency: bool,
    /// Enforcement addressing, present only on committed placements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcer: Option<EnforcerConfig>,
}

/// One tenant workload seeking admission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub name: String,
    /// Tail-latency objective in seconds.
    #[serde(rename = "SLO")]
    pub slo: f64,
    /// Percentile the objective refers to, in (0, 100).
    #[serde(rename = "SLOpercentile", default, skip_serializing_if = "Option::is_none")]
    pub slo_percentile: Option<f64>,
    pub flows: Vec<FlowConfig>,
    /// Set once placed; admitted clients skip the latency re-check when
    /// replayed onto other admission workers.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub admitted: bool,
}

/// A scheduling queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    /// Work units per second.
    pub bandwidth: f64,
}

/// An abstract workload before placement: what the tenant asks for, minus
/// any decision about where it runs. Placement concretizes this into a
/// [`ClientConfig`] once a candidate server is chosen, filling in the
/// host/VM fields on success.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    /// Tail-latency objective in seconds.
    #[serde(rename = "SLO")]
    pub slo: f64,
    /// Percentile the objective refers to, in (0, 100).
    #[serde(rename = "SLOpercentile", default, skip_serializing_if = "Option::is_none")]
    pub slo_percentile: Option<f64>,
    /// Path of the request trace characterizing the workload.
    pub trace: String,
    /// Model only the storage flow.
    #[serde(rename = "storageOnly", default, skip_serializing_if = "std::ops::Not::not")]
    pub storage_only: bool,
    /// Model only the network flows.
    #[serde(rename = "networkOnly", default, skip_serializing_if = "std::ops::Not::not")]
    pub network_only: bool,
    /// Set once placed; replays skip the admission latency check.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub admitted: bool,
    /// Assigned client host, present after placement.
    #[serde(rename = "clientHost", default, skip_serializing_if = "Option::is_none")]
    pub client_host: Option<String>,
    /// Assigned client VM, present after placement.
    #[serde(rename = "clientVM", default, skip_serializing_if = "Option::is_none")]
    pub client_vm: Option<String>,
    /// Assigned server host, present after placement.
    #[serde(rename = "serverHost", default, skip_serializing_if = "Option::is_none")]
    pub server_host: Option<String>,
    /// Assigned server VM, present after placement.
    #[serde(rename = "serverVM", default, skip_serializing_if = "Option::is_none")]
    pub server_vm: Option<String>,
}

/// One `(rate, burst)` stage of a flow's rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub rate: f64,
    pub burst: f64,
}

/// The per-flow output of admission: what the enforcers need to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowParameters {
    /// Worst-case latency of the flow, seconds.
    pub latency: f64,
    /// Scheduling priority, lower is served first.
    pub priority: u32,
    /// Rate-limiter stages, deepest breakpoint first.
    #[serde(rename = "rateLimiters")]
    pub rate_limiters: Vec<RateLimit>,
}

/// Rate limiters equivalent to an optimized shaper.
pub fn rate_limits_from_shaper(shaper: RateBurst) -> Vec<RateLimit> {
    vec![RateLimit {
        rate: shaper.rate,
        burst: shaper.burst,
    }]
}

/// Rate limiters covering a full arrival curve, deepest breakpoint first.
///
/// A first segment running at the device speed is skipped since the device
/// itself already enforces it.
pub fn rate_limits_from_curve(curve: &Curve, max_rate: f64) -> Vec<RateLimit> {
    let mut end = 1;
    if curve.len() > end && curve[end].slope == max_rate {
        end += 1;
    }
    let mut limits = Vec::new();
    for point in curve.iter().skip(end).rev() {
        limits.push(RateLimit {
            rate: point.slope,
            burst: point.y_intercept(),
        });
    }
    limits
}

/// Name of the client-to-server network flow for a client.
pub fn flow_network_in_name(client: &str) -> String {
    format!("F{client}In")
}

/// Name of the server-to-client network flow for a client.
pub fn flow_network_out_name(client: &str) -> String {
    format!("F{client}Out")
}

/// Name of the storage flow for a client.
pub fn flow_storage_name(client: &str) -> String {
    format!("F{client}Storage")
}

/// Name of the queue carrying traffic into a host.
pub fn queue_in_name(host: &str) -> String {
    format!("{host}-in")
}

/// Name of the queue carrying traffic out of a host.
pub fn queue_out_name(host: &str) -> String {
    format!("{host}-out")
}

/// Canonical name of a server VM, also its storage queue name.
pub fn server_name(host: &str, vm: &str) -> String {
    format!("{host}vm{vm}")
}

/// Resolvable address of a VM.
pub fn vm_addr(prefix: &str, host: &str, vm: &str) -> String {
    format!("{prefix}-{}", server_name(host, vm))
}

/// Cache file for a trace/estimator pair.
pub fn arrival_curve_path(cache_dir: &Path, trace: &str, estimator_type: &str) -> PathBuf {
    let basename = Path::new(trace)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    cache_dir.join(format!("arrivalCurve{basename}{estimator_type}.txt"))
}
