//! Flow-graph concretization.
//!
//! Once a candidate server is known, an abstract [`WorkloadSpec`] expands
//! into the concrete client descriptor the admission worker understands:
//! a network-in flow over the client-out and server-in link queues, a
//! storage flow over the server's device queue, and a network-out flow back
//! over the server-out and client-in link queues. Each flow gets an arrival
//! curve fitted from the workload's trace under the matching estimator,
//! cached on disk by `(trace, estimator)`.

use crate::Result;
use compactor_dnc::config::{
    self, EnforcerConfig, NETWORK_BANDWIDTH, STORAGE_BANDWIDTH,
};
use compactor_dnc::curve::arrival_curve_for_trace;
use compactor_dnc::{ClientConfig, FlowConfig, WorkloadSpec};
use compactor_trace::{DeviceProfile, EstimatorSpec};
use std::path::PathBuf;

/// Network estimator header overhead, bytes.
const NETWORK_CONSTANT: f64 = 200.0;
/// Size factor for the non-data-heavy direction.
const NETWORK_NON_DATA_FACTOR: f64 = 0.025;
/// Size factor for the data-heavy direction.
const NETWORK_DATA_FACTOR: f64 = 1.1;

/// Everything concretization needs besides the workload itself.
pub struct ConcretizeContext {
    /// Directory holding cached arrival curves.
    pub curve_cache: PathBuf,
    /// Storage device profile shared by all servers.
    pub profile: DeviceProfile,
}

/// The placement slot a workload is being tried or committed on.
#[derive(Debug, Clone)]
pub struct PlacementSlot {
    pub client_host: String,
    pub client_vm: String,
    pub server_host: String,
    pub server_vm: String,
}

impl ConcretizeContext {
    fn network_estimator(direction_in: bool) -> EstimatorSpec {
        if direction_in {
            EstimatorSpec::NetworkIn {
                non_data_constant: NETWORK_CONSTANT,
                non_data_factor: NETWORK_NON_DATA_FACTOR,
                data_constant: NETWORK_CONSTANT,
                data_factor: NETWORK_DATA_FACTOR,
            }
        } else {
            EstimatorSpec::NetworkOut {
                non_data_constant: NETWORK_CONSTANT,
                non_data_factor: NETWORK_NON_DATA_FACTOR,
                data_constant: NETWORK_CONSTANT,
                data_factor: NETWORK_DATA_FACTOR,
            }
        }
    }

    fn arrival(&self, trace: &str, estimator: &EstimatorSpec, max_rate: f64) -> Result<Vec<compactor_dnc::PointSlope>> {
        let cache = config::arrival_curve_path(&self.curve_cache, trace, estimator.type_name());
        let curve = arrival_curve_for_trace(trace, estimator, max_rate, Some(&cache))?;
        Ok(curve[1..].to_vec())
    }

    /// Expands a workload into the admission descriptor for one placement
    /// slot.
    ///
    /// With `enforce` set, each flow carries the addressing its enforcer
    /// needs; trial descriptors leave it out.
    pub fn client_config(
        &self,
        workload: &WorkloadSpec,
        slot: &PlacementSlot,
        addr_prefix: &str,
        enforce: bool,
    ) -> Result<ClientConfig> {
        let client_addr = config::vm_addr(addr_prefix, &slot.client_host, &slot.client_vm);
        let server_addr = config::vm_addr(addr_prefix, &slot.server_host, &slot.server_vm);
        let mut flows = Vec::new();

        if !workload.storage_only {
            let estimator = Self::network_estimator(true);
            flows.push(FlowConfig {
                name: config::flow_network_in_name(&workload.name),
                queues: vec![
                    config::queue_out_name(&slot.client_host),
                    config::queue_in_name(&slot.server_host),
                ],
                arrival: self.arrival(&workload.trace, &estimator, NETWORK_BANDWIDTH)?,
                priority: None,
                ignore_latency: false,
                enforcer: enforce.then(|| EnforcerConfig {
                    kind: "network".into(),
                    addr: slot.client_host.clone(),
                    src_addr: Some(client_addr.clone()),
                    dst_addr: Some(server_addr.clone()),
                    client_addr: None,
                }),
            });
        }
        if !workload.network_only {
            let estimator = self.profile.storage_estimator();
            flows.push(FlowConfig {
                name: config::flow_storage_name(&workload.name),
                queues: vec![config::server_name(&slot.server_host, &slot.server_vm)],
                arrival: self.arrival(&workload.trace, &estimator, STORAGE_BANDWIDTH)?,
                priority: None,
                ignore_latency: false,
                enforcer: enforce.then(|| EnforcerConfig {
                    kind: "storage".into(),
                    addr: server_addr.clone(),
                    src_addr: None,
                    dst_addr: None,
                    client_addr: Some(client_addr.clone()),
                }),
            });
        }
        if !workload.storage_only {
            let estimator = Self::network_estimator(false);
            flows.push(FlowConfig {
                name: config::flow_network_out_name(&workload.name),
                queues: vec![
                    config::queue_out_name(&slot.server_host),
                    config::queue_in_name(&slot.client_host),
                ],
                arrival: self.arrival(&workload.trace, &estimator, NETWORK_BANDWIDTH)?,
                priority: None,
                ignore_latency: false,
                enforcer: enforce.then(|| EnforcerConfig {
                    kind: "network".into(),
                    addr: slot.server_host.clone(),
                    src_addr: Some(server_addr.clone()),
                    dst_addr: Some(client_addr.clone()),
                    client_addr: None,
                }),
            });
        }

        Ok(ClientConfig {
            name: workload.name.clone(),
            slo: workload.slo,
            slo_percentile: workload.slo_percentile,
            flows,
            admitted: workload.admitted,
        })
    }
}
