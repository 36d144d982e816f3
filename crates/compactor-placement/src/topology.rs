//! Topology documents.
//!
//! A topology names the workloads to place, the client and server VM pools,
//! and the addressing prefix of the deployment. The placement driver reads
//! one and writes it back with the placement results filled in.

use crate::{PlacementError, Result};
use compactor_dnc::WorkloadSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One client VM slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientVm {
    #[serde(rename = "clientHost")]
    pub client_host: String,
    #[serde(rename = "clientVM")]
    pub client_vm: String,
}

/// One server VM slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerVm {
    #[serde(rename = "serverHost")]
    pub server_host: String,
    #[serde(rename = "serverVM")]
    pub server_vm: String,
}

/// The full deployment description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Workloads, in placement order.
    pub clients: Vec<WorkloadSpec>,
    /// Client VM pool.
    #[serde(rename = "clientVMs")]
    pub client_vms: Vec<ClientVm>,
    /// Server VM pool.
    #[serde(rename = "serverVMs")]
    pub server_vms: Vec<ServerVm>,
    /// Prefix for synthesized VM addresses.
    #[serde(rename = "addrPrefix")]
    pub addr_prefix: String,
    /// Whether committed placements carry enforcer addressing.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub enforce: bool,
}

impl Topology {
    /// Loads a topology from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| PlacementError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|e| PlacementError::InvalidTopology(e.to_string()))
    }

    /// Writes the topology, including placement results, to a JSON file.
    pub fn store(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| PlacementError::InvalidTopology(e.to_string()))?;
        std::fs::write(path, text).map_err(|source| PlacementError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
